//! A no-op hasher for keys that are already well distributed (archetype
//! bit-sets), avoiding a second mixing pass on every lookup.

use std::hash::Hasher;

#[derive(Default)]
pub(crate) struct NoOpHasher {
    hash: u64,
}

impl Hasher for NoOpHasher {
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write_u64(&mut self, i: u64) {
        self.hash = i;
    }

    fn write_u32(&mut self, i: u32) {
        self.hash = i as u64;
    }

    fn write(&mut self, bytes: &[u8]) {
        // Archetype bit-sets are hashed through `write_u64`; this path only
        // exists to satisfy the trait for keys we don't otherwise use.
        let mut hash = 0u64;
        for (i, &b) in bytes.iter().take(8).enumerate() {
            hash |= (b as u64) << (i * 8);
        }
        self.hash = hash;
    }
}

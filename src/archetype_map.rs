//! Pre-allocated hash map from archetype bit-set to chunk list, with
//! pointer-stable values.
//!
//! The map holds an index into a separately owned `Vec`, which holds the
//! real `ChunkList` data, so growing the map never moves or invalidates a
//! reference to an existing list. The `Vec`'s capacity guarantee is kept
//! explicit (one slot reserved beyond the declared capacity) instead of
//! relying on `Vec`'s amortized growth, which could otherwise reallocate
//! mid-insert.

use crate::{archetype::Archetype, chunk_list::ChunkList, error::Error, util::NoOpHasher};
use std::{collections::HashMap, hash::BuildHasherDefault};

pub(crate) struct ArchetypeMap {
    index: HashMap<u64, u32, BuildHasherDefault<NoOpHasher>>,
    lists: Vec<ChunkList>,
    capacity: u32,
}

impl ArchetypeMap {
    pub fn new(capacity: u32) -> Self {
        ArchetypeMap {
            index: HashMap::with_capacity_and_hasher(capacity as usize, BuildHasherDefault::default()),
            // +1: headroom for a speculative insert that may need to be
            // rolled back without the Vec ever reallocating (see
            // `get_or_insert_with`).
            lists: Vec::with_capacity(capacity as usize + 1),
            capacity,
        }
    }

    pub fn get(&self, archetype: Archetype) -> Option<&ChunkList> {
        self.index.get(&archetype.bits()).map(|&i| &self.lists[i as usize])
    }

    pub fn get_mut(&mut self, archetype: Archetype) -> Option<&mut ChunkList> {
        let i = *self.index.get(&archetype.bits())?;
        Some(&mut self.lists[i as usize])
    }

    pub fn get_by_index(&self, index: u32) -> &ChunkList {
        &self.lists[index as usize]
    }

    pub fn get_by_index_mut(&mut self, index: u32) -> &mut ChunkList {
        &mut self.lists[index as usize]
    }

    pub fn index_of(&self, archetype: Archetype) -> Option<u32> {
        self.index.get(&archetype.bits()).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkList> {
        self.lists.iter()
    }

    pub fn len(&self) -> u32 {
        self.lists.len() as u32
    }

    /// Looks up `archetype`'s chunk list, creating it with `build` if this
    /// is the first time it's been seen. `build` may fail (e.g. with
    /// `ChunkOverflow` from layout computation); in that case nothing is
    /// inserted.
    pub fn get_or_insert_with(
        &mut self,
        archetype: Archetype,
        build: impl FnOnce(u32) -> Result<ChunkList, Error>,
    ) -> Result<(u32, &mut ChunkList), Error> {
        if let Some(&index) = self.index.get(&archetype.bits()) {
            return Ok((index, &mut self.lists[index as usize]));
        }

        if self.lists.len() as u32 >= self.capacity {
            return Err(Error::ArchOverflow);
        }

        let index = self.lists.len() as u32;
        let list = build(index)?;

        debug_assert!(
            self.lists.len() < self.lists.capacity(),
            "the +1 reserved slot guarantees this push never reallocates"
        );
        self.lists.push(list);
        self.index.insert(archetype.bits(), index);
        Ok((index, &mut self.lists[index as usize]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::SmallVec;

    fn list_for(archetype: Archetype, index: u32) -> Result<ChunkList, Error> {
        Ok(ChunkList::new(
            crate::archetype::ArchetypeLayout::compute(archetype, SmallVec::new(), 4096)?,
            index,
        ))
    }

    #[test]
    fn second_lookup_reuses_the_same_slot() {
        let mut map = ArchetypeMap::new(4);
        let a = Archetype::with_flag(1);
        let (first, _) = map.get_or_insert_with(a, |i| list_for(a, i)).unwrap();
        let (second, _) = map.get_or_insert_with(a, |i| list_for(a, i)).unwrap();
        assert_eq!(first, second);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn overflow_once_capacity_is_used() {
        let mut map = ArchetypeMap::new(1);
        let a = Archetype::with_flag(1);
        let b = Archetype::with_flag(2);
        map.get_or_insert_with(a, |i| list_for(a, i)).unwrap();
        assert_eq!(map.get_or_insert_with(b, |i| list_for(b, i)).unwrap_err(), Error::ArchOverflow);
    }

    #[test]
    fn get_by_index_matches_index_of() {
        let mut map = ArchetypeMap::new(4);
        let a = Archetype::with_flag(3);
        let (index, _) = map.get_or_insert_with(a, |i| list_for(a, i)).unwrap();
        assert_eq!(map.index_of(a), Some(index));
        assert_eq!(map.get_by_index(index).archetype(), a);
        assert!(map.get(a).is_some());
    }
}

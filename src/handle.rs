//! Entity handles: a generation-checked `{index, generation}` pair packed
//! into 64 bits.
//!
//! Generations are bounded `u32`s that can *saturate*: once a slot's
//! generation counter reaches `u32::MAX` it retires permanently rather than
//! wrapping back to a value that could alias an earlier handle.

/// A `{index, generation}` pair that survives relocation. `generation == 0`
/// is reserved to mean "this slot has never been used"; the all-zero handle
/// (`Entity::NONE`) therefore never aliases a live handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct Entity(u64);

impl Entity {
    pub const NONE: Entity = Entity(0);

    pub(crate) fn new(index: u32, generation: u32) -> Self {
        debug_assert_ne!(generation, 0, "generation 0 means never-used, not a live handle");
        Entity(((generation as u64) << 32) | index as u64)
    }

    pub fn index(self) -> u32 {
        self.0 as u32
    }

    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn to_bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        Entity(bits)
    }
}

impl Default for Entity {
    fn default() -> Self {
        Entity::NONE
    }
}

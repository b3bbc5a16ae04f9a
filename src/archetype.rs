//! Archetype bit-sets and per-archetype chunk layout.
//!
//! The bit-set itself is a thin newtype; the layout math packs components
//! by descending alignment, computing a chunk's entity stride and capacity
//! for a sorted component list, and reserves room for the chunk's own
//! entity-index array alongside the component columns.

use crate::{
    component::{TypeDescriptor, MAX_COMPONENTS},
    error::Error,
    util::align_up,
};
use smallvec::SmallVec;
use std::mem::{align_of, size_of};

/// A set of registered component flags. Equality and hashing use the full
/// bit-mask, so two archetypes with the same components (regardless of the
/// order they were added in) compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug)]
pub struct Archetype(u64);

impl Archetype {
    pub const EMPTY: Archetype = Archetype(0);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn from_bits(bits: u64) -> Self {
        Archetype(bits)
    }

    pub fn with_flag(flag: u32) -> Self {
        Archetype(1u64 << flag)
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & (1u64 << flag) != 0
    }

    pub fn inserting(self, flag: u32) -> Self {
        Archetype(self.0 | (1u64 << flag))
    }

    pub fn removing(self, flag: u32) -> Self {
        Archetype(self.0 & !(1u64 << flag))
    }

    pub fn union(self, other: Archetype) -> Self {
        Archetype(self.0 | other.0)
    }

    pub fn intersection(self, other: Archetype) -> Self {
        Archetype(self.0 & other.0)
    }

    pub fn difference(self, other: Archetype) -> Self {
        Archetype(self.0 & !other.0)
    }

    pub fn is_superset_of(self, required: Archetype) -> bool {
        self.0 & required.0 == required.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter_flags(self) -> impl Iterator<Item = u32> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                None
            } else {
                let flag = bits.trailing_zeros();
                bits &= bits - 1;
                Some(flag)
            }
        })
    }
}

/// One component's placement within every chunk of a given archetype.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ComponentSlot {
    pub flag: u32,
    pub descriptor: &'static TypeDescriptor,
    /// Byte offset from the chunk base to this component's column.
    pub offset: u32,
}

/// Chunk layout derived once per archetype at chunk-list creation: which
/// byte offset each component's column starts at, where the entity-index
/// array sits, and how many entities fit in one chunk.
#[derive(Clone, Debug)]
pub(crate) struct ArchetypeLayout {
    pub archetype: Archetype,
    pub components: SmallVec<[ComponentSlot; 8]>,
    pub entity_index_offset: u32,
    pub chunk_capacity: u32,
    pub chunk_size: usize,
    /// Offset table indexed by flag, matching the duplicated header table;
    /// `0` means the component is absent from this archetype.
    pub comp_offset_table: [u32; MAX_COMPONENTS as usize],
}

/// Fixed header bytes preceding the padding/entity-index-array/columns
/// region of every chunk. Kept here (rather than in `chunk.rs`) because
/// layout math needs its size and alignment to place everything else.
pub(crate) const HEADER_SIZE: usize = crate::chunk::HEADER_SIZE;
pub(crate) const HEADER_ALIGN: usize = crate::chunk::HEADER_ALIGN;

impl ArchetypeLayout {
    /// Builds the layout for `archetype` given its resolved component
    /// descriptors. `descriptors` need not be pre-sorted; this function
    /// imposes the deterministic order itself.
    pub fn compute(
        archetype: Archetype,
        mut descriptors: SmallVec<[(u32, &'static TypeDescriptor); 8]>,
        chunk_size: usize,
    ) -> Result<Self, Error> {
        // Deterministic order: descending alignment, then by name. This is
        // a function of the component set alone, independent of the order
        // components were registered or added in.
        descriptors.sort_unstable_by(|a, b| {
            b.1.align()
                .cmp(&a.1.align())
                .then_with(|| a.1.name().cmp(b.1.name()))
        });

        let index_align = align_of::<u32>();
        let index_size = size_of::<u32>() as u32;

        // Find where the entity-index array goes: the first point in the
        // descending-alignment run where the remaining columns no longer
        // need more than `index_align`.
        let split = descriptors
            .iter()
            .position(|(_, d)| d.align() <= index_align)
            .unwrap_or(descriptors.len());

        let header_base = align_up(HEADER_SIZE, HEADER_ALIGN.max(index_align));

        // Lay out columns (with the entity-index array inserted at `split`)
        // for `n` rows, returning the total chunk size consumed.
        let layout_for = |n: u32| -> usize {
            let mut offset = header_base;
            for (i, (_, d)) in descriptors.iter().enumerate() {
                if i == split {
                    offset = align_up(offset, index_align);
                    offset += index_size as usize * n as usize;
                }
                offset = align_up(offset, d.align());
                offset += d.size() * n as usize;
            }
            if split == descriptors.len() {
                offset = align_up(offset, index_align);
                offset += index_size as usize * n as usize;
            }
            offset
        };

        // Binary search the largest n with layout_for(n) <= chunk_size.
        // per_row_bytes is always >= 4 (the entity index itself), so a
        // coarse upper bound is chunk_size / 4 + 1.
        let upper = (chunk_size / index_size.max(1) as usize + 1) as u32;
        let mut lo: u32 = 0;
        let mut hi: u32 = upper;
        while lo < hi {
            let mid = lo + (hi - lo + 1) / 2;
            if layout_for(mid) <= chunk_size {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        let chunk_capacity = lo;

        if chunk_capacity == 0 {
            return Err(Error::ChunkOverflow);
        }

        // Recompute final offsets at the chosen capacity.
        let mut offset = header_base;
        let mut entity_index_offset = 0u32;
        let mut comp_offset_table = [0u32; MAX_COMPONENTS as usize];
        let mut components = SmallVec::new();
        for (i, (flag, d)) in descriptors.iter().enumerate() {
            if i == split {
                offset = align_up(offset, index_align);
                entity_index_offset = offset as u32;
                offset += index_size as usize * chunk_capacity as usize;
            }
            offset = align_up(offset, d.align());
            let col_offset = offset as u32;
            comp_offset_table[*flag as usize] = col_offset;
            components.push(ComponentSlot {
                flag: *flag,
                descriptor: d,
                offset: col_offset,
            });
            offset += d.size() * chunk_capacity as usize;
        }
        if split == descriptors.len() {
            offset = align_up(offset, index_align);
            entity_index_offset = offset as u32;
        }

        Ok(ArchetypeLayout {
            archetype,
            components,
            entity_index_offset,
            chunk_capacity,
            chunk_size,
            comp_offset_table,
        })
    }

    pub fn component_offset(&self, flag: u32) -> Option<u32> {
        let offset = self.comp_offset_table[flag as usize];
        if self.archetype.contains(flag) {
            Some(offset)
        } else {
            None
        }
    }
}

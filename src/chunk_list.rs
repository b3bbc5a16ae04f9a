//! One chunk list per archetype: the main chunk chain plus an availability
//! sublist of chunks that still have room, so "find a chunk to append into"
//! is O(1) instead of a scan over every chunk the archetype owns.

use crate::{
    archetype::{Archetype, ArchetypeLayout},
    chunk::{ChunkIndex, ChunkRef},
    chunk_pool::ChunkPool,
    error::Error,
    handle_table::HandleTable,
};
use smallvec::SmallVec;

/// Where one entity's row lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Location {
    pub chunk: ChunkIndex,
    pub index: u32,
}

impl Location {
    pub const RESERVED: Location = Location {
        chunk: ChunkIndex::NONE,
        index: 0,
    };

    pub fn is_committed(self) -> bool {
        !self.chunk.is_none()
    }
}

#[derive(Debug)]
pub(crate) struct ChunkList {
    pub layout: ArchetypeLayout,
    head: ChunkIndex,
    tail: ChunkIndex,
    avail_head: ChunkIndex,
    avail_tail: ChunkIndex,
    /// Entities currently committed across every chunk in this list.
    len: usize,
    self_index: u32,
}

impl ChunkList {
    pub fn new(layout: ArchetypeLayout, self_index: u32) -> Self {
        ChunkList {
            layout,
            head: ChunkIndex::NONE,
            tail: ChunkIndex::NONE,
            avail_head: ChunkIndex::NONE,
            avail_tail: ChunkIndex::NONE,
            len: 0,
            self_index,
        }
    }

    pub fn archetype(&self) -> Archetype {
        self.layout.archetype
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn chunk_capacity(&self) -> u32 {
        self.layout.chunk_capacity
    }

    fn chunk(&self, pool: &ChunkPool, index: ChunkIndex) -> ChunkRef {
        pool.chunk_ref(index)
    }

    /// Iterates chunk indices from head to tail.
    pub fn chunks<'a>(&'a self, pool: &'a ChunkPool) -> impl Iterator<Item = ChunkIndex> + 'a {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            if cur.is_none() {
                None
            } else {
                let ret = cur;
                cur = pool.chunk_ref(cur).header().next;
                Some(ret)
            }
        })
    }

    fn push_back_main(&mut self, pool: &ChunkPool, index: ChunkIndex) {
        let chunk = self.chunk(pool, index);
        chunk.header_mut().prev = self.tail;
        chunk.header_mut().next = ChunkIndex::NONE;
        if self.tail.is_none() {
            self.head = index;
        } else {
            self.chunk(pool, self.tail).header_mut().next = index;
        }
        self.tail = index;
    }

    fn unlink_main(&mut self, pool: &ChunkPool, index: ChunkIndex) {
        let chunk = self.chunk(pool, index);
        let header = chunk.header();
        let (prev, next) = (header.prev, header.next);
        if prev.is_none() {
            self.head = next;
        } else {
            self.chunk(pool, prev).header_mut().next = next;
        }
        if next.is_none() {
            self.tail = prev;
        } else {
            self.chunk(pool, next).header_mut().prev = prev;
        }
    }

    fn push_front_avail(&mut self, pool: &ChunkPool, index: ChunkIndex) {
        let chunk = self.chunk(pool, index);
        chunk.header_mut().avail_prev = ChunkIndex::NONE;
        chunk.header_mut().avail_next = self.avail_head;
        if self.avail_head.is_none() {
            self.avail_tail = index;
        } else {
            self.chunk(pool, self.avail_head).header_mut().avail_prev = index;
        }
        self.avail_head = index;
        chunk.header_mut().in_availability = true;
    }

    /// Re-inserts a chunk that just freed up a slot right after the current
    /// availability head, keeping the existing head hot: fill one chunk
    /// before spreading new rows across others.
    fn insert_after_avail_head(&mut self, pool: &ChunkPool, index: ChunkIndex) {
        if self.avail_head.is_none() {
            self.push_front_avail(pool, index);
            return;
        }
        let head = self.avail_head;
        let next_of_head = self.chunk(pool, head).header().avail_next;
        let chunk = self.chunk(pool, index);
        chunk.header_mut().avail_prev = head;
        chunk.header_mut().avail_next = next_of_head;
        self.chunk(pool, head).header_mut().avail_next = index;
        if next_of_head.is_none() {
            self.avail_tail = index;
        } else {
            self.chunk(pool, next_of_head).header_mut().avail_prev = index;
        }
        chunk.header_mut().in_availability = true;
    }

    fn unlink_avail(&mut self, pool: &ChunkPool, index: ChunkIndex) {
        let chunk = self.chunk(pool, index);
        let header = chunk.header();
        let (prev, next) = (header.avail_prev, header.avail_next);
        if prev.is_none() {
            self.avail_head = next;
        } else {
            self.chunk(pool, prev).header_mut().avail_next = next;
        }
        if next.is_none() {
            self.avail_tail = prev;
        } else {
            self.chunk(pool, next).header_mut().avail_prev = prev;
        }
        let chunk = self.chunk(pool, index);
        let header = chunk.header_mut();
        header.in_availability = false;
        header.avail_next = ChunkIndex::NONE;
        header.avail_prev = ChunkIndex::NONE;
    }

    /// Appends `entity` to the first chunk with room, growing the chunk
    /// chain from `pool` if every chunk is full.
    pub fn append(&mut self, pool: &mut ChunkPool, entity_index: u32) -> Result<Location, Error> {
        if self.avail_head.is_none() {
            let (index, _chunk) = pool.reserve(self.self_index, &self.layout)?;
            self.push_back_main(pool, index);
            self.push_front_avail(pool, index);
        }

        let chunk_index = self.avail_head;
        let chunk = self.chunk(pool, chunk_index);
        let header = chunk.header_mut();
        let row = header.len;
        unsafe {
            chunk.entity_index_slice_mut(self.layout.entity_index_offset, self.layout.chunk_capacity)[row as usize] = entity_index;
        }
        header.len += 1;
        self.len += 1;

        if header.len == self.layout.chunk_capacity {
            self.unlink_avail(pool, chunk_index);
        }

        Ok(Location {
            chunk: chunk_index,
            index: row,
        })
    }

    /// Removes the entity at `(chunk, index)`, swapping the chunk's last
    /// row into the vacated slot. Returns the raw entity-table index of
    /// whichever entity got moved into `index` (if any), so the caller can
    /// fix up its handle-table location.
    pub fn swap_remove(
        &mut self,
        pool: &mut ChunkPool,
        handles: &mut HandleTable,
        chunk_index: ChunkIndex,
        index: u32,
    ) {
        let chunk = self.chunk(pool, chunk_index);
        let was_full = chunk.header().len == self.layout.chunk_capacity;
        let last = chunk.header().len - 1;

        let moved_entity = unsafe {
            let indices = chunk.entity_index_slice_mut(self.layout.entity_index_offset, self.layout.chunk_capacity);
            let moved = indices[last as usize];
            if index != last {
                indices[index as usize] = moved;
                for slot in &self.layout.components {
                    let size = slot.descriptor.size();
                    if size == 0 {
                        continue;
                    }
                    let src = chunk.row_ptr(slot.offset, size, last);
                    let dst = chunk.row_ptr(slot.offset, size, index);
                    std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), size);
                }
                Some(moved)
            } else {
                None
            }
        };

        if let Some(moved) = moved_entity {
            handles.set_location_by_raw_index(moved, Location { chunk: chunk_index, index });
        }

        let header = chunk.header_mut();
        header.len -= 1;
        self.len -= 1;

        if header.len == 0 {
            if chunk.header().in_availability {
                self.unlink_avail(pool, chunk_index);
            }
            self.unlink_main(pool, chunk_index);
            pool.release(chunk_index);
        } else if was_full {
            self.insert_after_avail_head(pool, chunk_index);
        }
    }

    /// Releases every chunk in this list back to `pool` and resets it to
    /// empty, returning the raw entity-table indices that were present.
    /// Used by `recycle_arch_immediate`, which recycles handle-table slots
    /// without running component destructors.
    pub fn clear_and_release(&mut self, pool: &mut ChunkPool) -> SmallVec<[u32; 16]> {
        let mut raw_indices = SmallVec::new();
        let mut cur = self.head;
        while !cur.is_none() {
            let chunk = self.chunk(pool, cur);
            let len = chunk.header().len;
            let indices = unsafe {
                chunk.entity_index_slice(self.layout.entity_index_offset, self.layout.chunk_capacity)
            };
            raw_indices.extend_from_slice(&indices[..len as usize]);
            let next = chunk.header().next;
            pool.release(cur);
            cur = next;
        }
        self.head = ChunkIndex::NONE;
        self.tail = ChunkIndex::NONE;
        self.avail_head = ChunkIndex::NONE;
        self.avail_tail = ChunkIndex::NONE;
        self.len = 0;
        raw_indices
    }

    #[cfg(feature = "safety-checks")]
    pub fn check_invariants(&self, pool: &ChunkPool) {
        if self.head.is_none() {
            assert!(self.tail.is_none());
        }
        if self.avail_head.is_none() {
            assert!(self.avail_tail.is_none());
        }
        for index in self.chunks(pool) {
            let chunk_ref = pool.chunk_ref(index);
            let header = chunk_ref.header();
            assert!(header.len <= self.layout.chunk_capacity);
            assert_eq!(header.len == self.layout.chunk_capacity, !header.in_availability);
            if header.in_availability {
                assert!(header.len > 0);
            }
        }
    }
}

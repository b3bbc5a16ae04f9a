//! Fixed-size, chunk-aligned buffer allocator.
//!
//! One large, chunk-size-aligned arena is allocated up front, so `index_of`
//! can recover a chunk's index purely from its address by rounding down to
//! chunk-size alignment; this is what lets a component pointer be traced
//! back to the entity that owns it without any extra bookkeeping per row.

use crate::{archetype::ArchetypeLayout, chunk::ChunkIndex, error::Error};
use std::{
    alloc::{alloc, dealloc, handle_alloc_error, Layout},
    ptr::NonNull,
};

use crate::chunk::ChunkRef;

pub(crate) struct ChunkPool {
    buffer: NonNull<u8>,
    layout: Layout,
    chunk_size: usize,
    log2_chunk_size: u32,
    chunk_count: u32,
    cursor: u32,
    free: Vec<u32>,
}

// The pool owns a single heap allocation and nothing but raw bytes; it is
// not `Sync` (callers serialize access through `Entities`), but it is safe
// to move between threads.
unsafe impl Send for ChunkPool {}

impl ChunkPool {
    pub fn new(chunk_count: u32, chunk_size: usize) -> Result<Self, Error> {
        debug_assert!(chunk_size.is_power_of_two());
        let total = (chunk_count as usize)
            .checked_mul(chunk_size)
            .ok_or(Error::OutOfMemory)?;

        let layout = if total == 0 {
            Layout::from_size_align(0, chunk_size).map_err(|_| Error::OutOfMemory)?
        } else {
            Layout::from_size_align(total, chunk_size).map_err(|_| Error::OutOfMemory)?
        };

        let buffer = if total == 0 {
            NonNull::dangling()
        } else {
            let ptr = unsafe { alloc(layout) };
            match NonNull::new(ptr) {
                Some(ptr) => ptr,
                None => handle_alloc_error(layout),
            }
        };

        Ok(ChunkPool {
            buffer,
            layout,
            chunk_size,
            log2_chunk_size: chunk_size.trailing_zeros(),
            chunk_count,
            cursor: 0,
            free: Vec::new(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn ptr_at(&self, index: u32) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.buffer.as_ptr().add(index as usize * self.chunk_size)) }
    }

    pub fn chunk_ref(&self, index: ChunkIndex) -> ChunkRef {
        debug_assert!(!index.is_none());
        ChunkRef {
            ptr: self.ptr_at(index.0),
        }
    }

    /// Reserves a chunk for membership in chunk list `chunk_list_index`,
    /// initializing its header from `layout`. Pops the free list first,
    /// else bumps the never-used cursor.
    pub fn reserve(
        &mut self,
        chunk_list_index: u32,
        layout: &ArchetypeLayout,
    ) -> Result<(ChunkIndex, ChunkRef), Error> {
        let index = if let Some(index) = self.free.pop() {
            index
        } else if self.cursor < self.chunk_count {
            let index = self.cursor;
            self.cursor += 1;
            index
        } else {
            return Err(Error::ChunkPoolOverflow);
        };

        let chunk_ref = ChunkRef {
            ptr: self.ptr_at(index),
        };
        chunk_ref.init_header(chunk_list_index, layout);
        Ok((ChunkIndex(index), chunk_ref))
    }

    pub fn release(&mut self, index: ChunkIndex) {
        debug_assert!(!index.is_none());
        self.free.push(index.0);
    }

    /// Recovers a chunk's index from a pointer anywhere inside it, by
    /// rounding down to chunk-size alignment. Safe because every chunk is
    /// allocated at a multiple of `chunk_size` inside `buffer`.
    pub fn index_of(&self, ptr: NonNull<u8>) -> ChunkIndex {
        // `buffer` itself is allocated at `chunk_size` alignment, so the
        // chunk-size-aligned base of any pointer inside it is exactly
        // `buffer + k * chunk_size` for some chunk index `k`.
        let addr = ptr.as_ptr() as usize;
        let base = self.buffer.as_ptr() as usize;
        debug_assert!(addr >= base);
        ChunkIndex(((addr - base) >> self.log2_chunk_size) as u32)
    }

    pub fn chunk_base_ptr(&self, ptr: NonNull<u8>) -> NonNull<u8> {
        let addr = ptr.as_ptr() as usize;
        let mask = !((1usize << self.log2_chunk_size) - 1);
        unsafe { NonNull::new_unchecked((addr & mask) as *mut u8) }
    }
}

impl Drop for ChunkPool {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            unsafe { dealloc(self.buffer.as_ptr(), self.layout) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::Archetype;
    use smallvec::SmallVec;

    #[test]
    fn reserve_and_release_reuses_free_list() {
        let mut pool = ChunkPool::new(4, 4096).unwrap();
        let layout = ArchetypeLayout::compute(Archetype::EMPTY, SmallVec::new(), 4096).unwrap();
        let (a, _) = pool.reserve(0, &layout).unwrap();
        let (b, _) = pool.reserve(0, &layout).unwrap();
        assert_ne!(a.0, b.0);
        pool.release(a);
        let (c, _) = pool.reserve(0, &layout).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn overflow_when_exhausted() {
        let mut pool = ChunkPool::new(1, 4096).unwrap();
        let layout = ArchetypeLayout::compute(Archetype::EMPTY, SmallVec::new(), 4096).unwrap();
        pool.reserve(0, &layout).unwrap();
        assert_eq!(pool.reserve(0, &layout).unwrap_err(), Error::ChunkPoolOverflow);
    }

    #[test]
    fn index_of_round_trips() {
        let mut pool = ChunkPool::new(8, 4096).unwrap();
        let layout = ArchetypeLayout::compute(Archetype::EMPTY, SmallVec::new(), 4096).unwrap();
        let (idx, chunk) = pool.reserve(3, &layout).unwrap();
        let inner_ptr = unsafe { NonNull::new_unchecked(chunk.ptr.as_ptr().add(100)) };
        assert_eq!(pool.index_of(inner_ptr), idx);
    }
}

//! The `Entities` façade: orchestrates the handle table, archetype map, and
//! chunk pool behind a single entry point for creating, moving, querying,
//! and destroying entities.

use crate::{
    archetype::{Archetype, ArchetypeLayout},
    archetype_map::ArchetypeMap,
    chunk::{ChunkIndex, ChunkRef},
    chunk_pool::ChunkPool,
    component::{self, TypeDescriptor},
    error::Error,
    handle::Entity,
    handle_table::HandleTable,
    options::Options,
    view::View,
};
use smallvec::SmallVec;
use std::{marker::PhantomData, ptr::NonNull};

pub struct Entities {
    handles: HandleTable,
    archetypes: ArchetypeMap,
    pool: ChunkPool,
    pointer_generation: u64,
    committed_count: u32,
    options: Options,
}

impl Entities {
    pub fn init(options: Options) -> Result<Self, Error> {
        options.validate().expect("invalid Options");
        Ok(Entities {
            handles: HandleTable::new(options.max_entities),
            archetypes: ArchetypeMap::new(options.max_archetypes),
            pool: ChunkPool::new(options.max_chunks, options.chunk_size)?,
            pointer_generation: 0,
            committed_count: 0,
            options,
        })
    }

    /// Number of entities that have actually been placed into an archetype's
    /// chunk list. A handle returned by `reserve_immediate` that has not yet
    /// gone through a `change_arch_immediate` commit does not count here,
    /// even though it is live in the handle table.
    pub fn count(&self) -> u32 {
        self.committed_count
    }

    pub fn is_live(&self, handle: Entity) -> bool {
        self.handles.is_live(handle)
    }

    pub fn exists(&self, handle: Entity) -> bool {
        self.is_live(handle)
    }

    pub fn archetype_of(&self, handle: Entity) -> Option<Archetype> {
        let location = self.handles.get(handle)?;
        if !location.is_committed() {
            return Some(Archetype::EMPTY);
        }
        let list_index = self.pool.chunk_ref(location.chunk).header().chunk_list;
        Some(self.archetypes.get_by_index(list_index).archetype())
    }

    pub(crate) fn bump_pointer_generation(&mut self) {
        self.pointer_generation += 1;
    }

    pub(crate) fn pointer_generation(&self) -> u64 {
        self.pointer_generation
    }

    pub fn reserve_immediate(&mut self) -> Result<Entity, Error> {
        self.handles.reserve()
    }

    /// Builds (or looks up) the chunk list for `target` and appends
    /// `handle` into it, moving the slot from reserved to committed.
    fn commit_into(&mut self, handle: Entity, target: Archetype) -> Result<(), Error> {
        let flags = collect_flags(target);
        let chunk_size = self.options.chunk_size;
        let (_, chunk_list) = self.archetypes.get_or_insert_with(target, move |index| {
            Ok(crate::chunk_list::ChunkList::new(
                ArchetypeLayout::compute(target, flags, chunk_size)?,
                index,
            ))
        })?;
        let location = chunk_list.append(&mut self.pool, handle.index())?;
        self.handles.set_location(handle, location);
        Ok(())
    }

    /// Target = `(current ∪ add) \ remove`. Returns `false` if `handle` is
    /// not live.
    pub fn change_arch_immediate(&mut self, handle: Entity, add: Archetype, remove: Archetype) -> Result<bool, Error> {
        self.pointer_generation += 1;

        let Some(old_location) = self.handles.get(handle) else {
            return Ok(false);
        };
        let was_committed = old_location.is_committed();

        let current = if was_committed {
            let list_index = self.pool.chunk_ref(old_location.chunk).header().chunk_list;
            self.archetypes.get_by_index(list_index).archetype()
        } else {
            Archetype::EMPTY
        };

        let target = current.union(add).difference(remove);

        if target == current {
            if !was_committed {
                self.commit_into(handle, target)?;
                self.committed_count += 1;
            }
            return Ok(true);
        }

        // Snapshot source pointers for every surviving component before any
        // list is mutated — the chunk pool is a fixed arena, so these
        // pointers stay valid across the append below regardless of where
        // the new row lands.
        let mut survivors: SmallVec<[(u32, usize, NonNull<u8>); 8]> = SmallVec::new();
        if old_location.is_committed() {
            let old_chunk = self.pool.chunk_ref(old_location.chunk);
            let old_list_index = old_chunk.header().chunk_list;
            let old_layout = &self.archetypes.get_by_index(old_list_index).layout;
            for flag in current.intersection(target).iter_flags() {
                if let Some(offset) = old_layout.component_offset(flag) {
                    let desc = component::descriptor_for_flag(flag);
                    let src = unsafe { old_chunk.row_ptr(offset, desc.size(), old_location.index) };
                    survivors.push((flag, desc.size(), src));
                }
            }
        }

        let flags = collect_flags(target);
        let chunk_size = self.options.chunk_size;
        let (new_list_index, new_location) = {
            let (list_index, chunk_list) = self.archetypes.get_or_insert_with(target, move |index| {
                Ok(crate::chunk_list::ChunkList::new(
                    ArchetypeLayout::compute(target, flags, chunk_size)?,
                    index,
                ))
            })?;
            let new_location = chunk_list.append(&mut self.pool, handle.index())?;
            (list_index, new_location)
        };
        self.handles.set_location(handle, new_location);

        if !survivors.is_empty() {
            let new_chunk = self.pool.chunk_ref(new_location.chunk);
            let new_layout = &self.archetypes.get_by_index(new_list_index).layout;
            for (flag, size, src) in survivors {
                if let Some(offset) = new_layout.component_offset(flag) {
                    let dst = unsafe { new_chunk.row_ptr(offset, size, new_location.index) };
                    unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), size) };
                }
            }
        }

        if was_committed {
            let old_list_index = self.pool.chunk_ref(old_location.chunk).header().chunk_list;
            let old_list = self.archetypes.get_by_index_mut(old_list_index);
            old_list.swap_remove(&mut self.pool, &mut self.handles, old_location.chunk, old_location.index);
        } else {
            self.committed_count += 1;
        }

        Ok(true)
    }

    pub fn get_component<T: 'static>(&self, handle: Entity) -> Option<&mut [u8]> {
        let desc = component::descriptor::<T>();
        let ptr = self.get_component_raw(handle, desc)?;
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, desc.size()) })
    }

    pub(crate) fn get_component_raw(&self, handle: Entity, desc: &'static TypeDescriptor) -> Option<*mut u8> {
        let location = self.handles.get(handle)?;
        if !location.is_committed() {
            return None;
        }
        let flag = desc.flag()?;
        let chunk = self.pool.chunk_ref(location.chunk);
        let list_index = chunk.header().chunk_list;
        let offset = self.archetypes.get_by_index(list_index).layout.component_offset(flag)?;
        Some(unsafe { chunk.row_ptr(offset, desc.size(), location.index).as_ptr() })
    }

    /// Recovers the owning entity from a pointer into a live `T` component,
    /// by rounding down to chunk-size alignment and reading the owning
    /// chunk's entity-index array.
    pub fn entity_from_component_pointer<T: 'static>(&self, ptr: NonNull<T>) -> Entity {
        let desc = component::descriptor::<T>();
        let flag = desc.flag().expect("component must be registered to recover its owner");

        let chunk_base = self.pool.chunk_base_ptr(ptr.cast());
        let chunk_index = self.pool.index_of(chunk_base);
        let chunk = self.pool.chunk_ref(chunk_index);
        let list_index = chunk.header().chunk_list;
        let layout = &self.archetypes.get_by_index(list_index).layout;
        let column_offset = layout
            .component_offset(flag)
            .expect("pointer must belong to a component column present in its own chunk's archetype");

        let addr = ptr.as_ptr() as usize;
        let column_base = chunk_base.as_ptr() as usize + column_offset as usize;
        let row = ((addr - column_base) / desc.size()) as u32;

        let raw_index =
            unsafe { chunk.entity_index_slice(layout.entity_index_offset, layout.chunk_capacity) }[row as usize];
        let generation = self
            .handles
            .current_generation(raw_index)
            .expect("entity-index array must reference a valid handle-table slot");
        Entity::new(raw_index, generation)
    }

    pub fn destroy_immediate(&mut self, handle: Entity) -> bool {
        self.pointer_generation += 1;
        let Some(location) = self.handles.get(handle) else {
            return false;
        };

        if location.is_committed() {
            let chunk = self.pool.chunk_ref(location.chunk);
            let list_index = chunk.header().chunk_list;
            let drops: SmallVec<[(u32, &'static TypeDescriptor); 8]> = self
                .archetypes
                .get_by_index(list_index)
                .layout
                .components
                .iter()
                .map(|slot| (slot.offset, slot.descriptor))
                .collect();
            for (offset, desc) in drops {
                let ptr = unsafe { chunk.row_ptr(offset, desc.size(), location.index) };
                unsafe { desc.drop_in_place(ptr.as_ptr()) };
            }
            let list = self.archetypes.get_by_index_mut(list_index);
            list.swap_remove(&mut self.pool, &mut self.handles, location.chunk, location.index);
            self.committed_count -= 1;
        }

        self.handles.recycle(handle)
    }

    /// Recycles every live slot in `archetype`'s chunk list without running
    /// component destructors, for transient event-like entities that share
    /// one known exact archetype.
    pub fn recycle_arch_immediate(&mut self, archetype: Archetype) {
        self.pointer_generation += 1;
        let Some(list_index) = self.archetypes.index_of(archetype) else {
            return;
        };
        let list = self.archetypes.get_by_index_mut(list_index);
        let raw_indices = list.clear_and_release(&mut self.pool);
        self.committed_count -= raw_indices.len() as u32;
        for raw_index in raw_indices {
            self.handles.recycle_raw_index(raw_index);
        }
    }

    fn candidate_chunks(&self, required: Archetype) -> Vec<(u32, ChunkIndex)> {
        let mut chunks = Vec::new();
        for (list_index, list) in self.archetypes.iter().enumerate() {
            if list.archetype().is_superset_of(required) {
                chunks.extend(list.chunks(&self.pool).map(|c| (list_index as u32, c)));
            }
        }
        chunks
    }

    pub fn iterator<'q, V: View<'q>>(&'q self) -> RowIter<'q, V> {
        RowIter {
            store: self,
            chunks: self.candidate_chunks(V::required()).into_iter(),
            current: None,
            row: 0,
            generation: self.pointer_generation,
            _marker: PhantomData,
        }
    }

    pub fn chunk_iterator<'q, V: View<'q>>(&'q self) -> ChunkIter<'q, V> {
        ChunkIter {
            store: self,
            chunks: self.candidate_chunks(V::required()).into_iter(),
            generation: self.pointer_generation,
            _marker: PhantomData,
        }
    }

    pub fn for_each<'q, V: View<'q>>(&'q self, mut f: impl FnMut(V)) {
        for item in self.iterator::<V>() {
            f(item);
        }
    }

    pub fn for_each_chunk<'q, V: View<'q>>(&'q self, mut f: impl FnMut(ChunkRows<'q, V>)) {
        for chunk in self.chunk_iterator::<V>() {
            f(chunk);
        }
    }
}

fn collect_flags(archetype: Archetype) -> SmallVec<[(u32, &'static TypeDescriptor); 8]> {
    archetype.iter_flags().map(|flag| (flag, component::descriptor_for_flag(flag))).collect()
}

impl Drop for Entities {
    fn drop(&mut self) {
        for list_index in 0..self.archetypes.len() {
            let list = self.archetypes.get_by_index(list_index);
            let components = list.layout.components.clone();
            let chunk_indices: SmallVec<[ChunkIndex; 8]> = list.chunks(&self.pool).collect();
            for chunk_index in chunk_indices {
                let chunk = self.pool.chunk_ref(chunk_index);
                let len = chunk.header().len;
                for slot in &components {
                    for row in 0..len {
                        let ptr = unsafe { chunk.row_ptr(slot.offset, slot.descriptor.size(), row) };
                        unsafe { slot.descriptor.drop_in_place(ptr.as_ptr()) };
                    }
                }
            }
        }
        // `ChunkPool`'s own `Drop` frees the backing arena.
    }
}

/// Checks (under `safety-checks`) that no structural mutation happened
/// since an iterator was constructed.
fn assert_generation_unchanged(captured: u64, store: &Entities) {
    #[cfg(feature = "safety-checks")]
    assert_eq!(
        captured,
        store.pointer_generation(),
        "iterator used after a structural mutation invalidated it"
    );
    #[cfg(not(feature = "safety-checks"))]
    let _ = (captured, store);
}

pub struct RowIter<'q, V: View<'q>> {
    store: &'q Entities,
    chunks: std::vec::IntoIter<(u32, ChunkIndex)>,
    current: Option<(ChunkRef, V::Fetch, u32, u32)>,
    row: u32,
    generation: u64,
    _marker: PhantomData<fn() -> V>,
}

impl<'q, V: View<'q>> Iterator for RowIter<'q, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        assert_generation_unchanged(self.generation, self.store);

        loop {
            if let Some((chunk, fetch, len, list_index)) = self.current {
                if self.row < len {
                    let list = self.store.archetypes.get_by_index(list_index);
                    let raw_index = unsafe {
                        chunk.entity_index_slice(list.layout.entity_index_offset, list.layout.chunk_capacity)
                    }[self.row as usize];
                    let generation = self.store.handles.current_generation(raw_index).unwrap_or(0);
                    let entity = Entity::new(raw_index, generation);
                    let item = unsafe { V::get(fetch, chunk, self.row, entity) };
                    self.row += 1;
                    return Some(item);
                }
            }
            let (list_index, chunk_index) = self.chunks.next()?;
            let chunk = self.store.pool.chunk_ref(chunk_index);
            let list = self.store.archetypes.get_by_index(list_index);
            let fetch = V::prepare(&list.layout);
            let len = chunk.header().len;
            self.current = Some((chunk, fetch, len, list_index));
            self.row = 0;
        }
    }
}

pub struct ChunkIter<'q, V: View<'q>> {
    store: &'q Entities,
    chunks: std::vec::IntoIter<(u32, ChunkIndex)>,
    generation: u64,
    _marker: PhantomData<fn() -> V>,
}

impl<'q, V: View<'q>> Iterator for ChunkIter<'q, V> {
    type Item = ChunkRows<'q, V>;

    fn next(&mut self) -> Option<Self::Item> {
        assert_generation_unchanged(self.generation, self.store);

        let (list_index, chunk_index) = self.chunks.next()?;
        let chunk = self.store.pool.chunk_ref(chunk_index);
        let list = self.store.archetypes.get_by_index(list_index);
        let fetch = V::prepare(&list.layout);
        let len = chunk.header().len;
        Some(ChunkRows {
            store: self.store,
            chunk,
            fetch,
            list_index,
            row: 0,
            len,
            _marker: PhantomData,
        })
    }
}

/// One chunk's worth of rows, yielded by [`ChunkIter`]. Implements
/// `Iterator<Item = V>` directly so `for_each_chunk` callers can process a
/// whole chunk with a tight inner loop.
pub struct ChunkRows<'q, V: View<'q>> {
    store: &'q Entities,
    chunk: ChunkRef,
    fetch: V::Fetch,
    list_index: u32,
    row: u32,
    len: u32,
    _marker: PhantomData<fn() -> V>,
}

impl<'q, V: View<'q>> ChunkRows<'q, V> {
    pub fn len(&self) -> u32 {
        self.len
    }
}

impl<'q, V: View<'q>> Iterator for ChunkRows<'q, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        if self.row >= self.len {
            return None;
        }
        let list = self.store.archetypes.get_by_index(self.list_index);
        let raw_index = unsafe {
            self.chunk
                .entity_index_slice(list.layout.entity_index_offset, list.layout.chunk_capacity)
        }[self.row as usize];
        let generation = self.store.handles.current_generation(raw_index).unwrap_or(0);
        let entity = Entity::new(raw_index, generation);
        let item = unsafe { V::get(self.fetch, self.chunk, self.row, entity) };
        self.row += 1;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentRegistry;

    fn small_store() -> Entities {
        Entities::init(Options {
            max_entities: 64,
            max_archetypes: 8,
            max_chunks: 64,
            chunk_size: 4096,
            ..Options::default()
        })
        .unwrap()
    }

    fn write<T: Copy + 'static>(store: &Entities, e: Entity, value: T) {
        store.get_component::<T>(e).unwrap().copy_from_slice(unsafe {
            std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
        });
    }

    #[test]
    fn reserve_then_empty_change_arch_commits_to_empty_archetype() {
        let mut store = small_store();
        let e = store.reserve_immediate().unwrap();
        assert!(store.change_arch_immediate(e, Archetype::EMPTY, Archetype::EMPTY).unwrap());
        assert_eq!(store.archetype_of(e), Some(Archetype::EMPTY));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn get_component_round_trips_and_disappears_on_removal() {
        #[derive(Copy, Clone)]
        struct Hp(u32);
        let flag = ComponentRegistry::register::<Hp>();
        let mut store = small_store();
        let e = store.reserve_immediate().unwrap();
        store.change_arch_immediate(e, Archetype::with_flag(flag), Archetype::EMPTY).unwrap();
        write(&store, e, Hp(42));
        assert_eq!(unsafe { *(store.get_component::<Hp>(e).unwrap().as_ptr() as *const u32) }, 42);

        store.change_arch_immediate(e, Archetype::EMPTY, Archetype::with_flag(flag)).unwrap();
        assert!(store.get_component::<Hp>(e).is_none());
    }

    #[test]
    fn change_arch_preserves_surviving_component_values() {
        #[derive(Copy, Clone)]
        struct A(u64);
        struct B(u64);
        let flag_a = ComponentRegistry::register::<A>();
        let flag_b = ComponentRegistry::register::<B>();
        let mut store = small_store();
        let e = store.reserve_immediate().unwrap();
        store.change_arch_immediate(e, Archetype::with_flag(flag_a), Archetype::EMPTY).unwrap();
        write(&store, e, A(99));

        store.change_arch_immediate(e, Archetype::with_flag(flag_b), Archetype::EMPTY).unwrap();
        assert_eq!(unsafe { *(store.get_component::<A>(e).unwrap().as_ptr() as *const u64) }, 99);
    }

    #[test]
    fn destroy_immediate_swap_removes_and_recycles() {
        let mut store = small_store();
        let a = store.reserve_immediate().unwrap();
        let b = store.reserve_immediate().unwrap();
        store.change_arch_immediate(a, Archetype::EMPTY, Archetype::EMPTY).unwrap();
        store.change_arch_immediate(b, Archetype::EMPTY, Archetype::EMPTY).unwrap();

        assert!(store.destroy_immediate(a));
        assert!(!store.exists(a));
        assert!(store.exists(b));
        assert_eq!(store.count(), 1);
        // A stale or already-destroyed handle is a no-op, not an error.
        assert!(!store.destroy_immediate(a));
    }

    #[test]
    fn recycle_arch_immediate_clears_every_matching_entity() {
        struct Event;
        let flag = ComponentRegistry::register::<Event>();
        let archetype = Archetype::with_flag(flag);
        let mut store = small_store();
        for _ in 0..5 {
            let e = store.reserve_immediate().unwrap();
            store.change_arch_immediate(e, archetype, Archetype::EMPTY).unwrap();
        }
        assert_eq!(store.count(), 5);
        store.recycle_arch_immediate(archetype);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn iteration_required_set_is_respected() {
        struct A;
        struct B;
        let flag_a = ComponentRegistry::register::<A>();
        let flag_b = ComponentRegistry::register::<B>();
        let mut store = small_store();
        let only_a = store.reserve_immediate().unwrap();
        store.change_arch_immediate(only_a, Archetype::with_flag(flag_a), Archetype::EMPTY).unwrap();
        let both = store.reserve_immediate().unwrap();
        store
            .change_arch_immediate(both, Archetype::with_flag(flag_a).inserting(flag_b), Archetype::EMPTY)
            .unwrap();

        let mut seen = 0;
        store.for_each::<(Entity, &A)>(|_| seen += 1);
        assert_eq!(seen, 2);

        seen = 0;
        store.for_each::<(Entity, &B)>(|_| seen += 1);
        assert_eq!(seen, 1);
    }
}

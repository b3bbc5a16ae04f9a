//! Deferred, thread-local mutation encoder.
//!
//! A producer thread encodes structural changes into this buffer's three
//! streams without ever touching the store directly; a consumer later
//! applies them in one pass via [`execute_immediate`]. Handles for newly
//! created entities are pre-reserved from the store up front, so `reserve`
//! never needs to synchronize with it mid-encode.

use crate::{
    codec::{self, Batch, BatchIter, Payload, Tag},
    component::TypeDescriptor,
    entities::Entities,
    error::Error,
    handle::Entity,
    options::BufferOptions,
    util::align_up,
};

pub struct CommandBuffer {
    tags: Vec<u8>,
    args: Vec<u64>,
    data: Vec<u8>,
    reserved: Vec<Entity>,
    last_bound: Option<Entity>,
    poisoned: bool,
    opts: BufferOptions,
}

impl CommandBuffer {
    pub fn init(opts: BufferOptions, store: &mut Entities) -> Result<Self, Error> {
        let mut buffer = CommandBuffer {
            tags: Vec::with_capacity(2 * opts.cmds),
            args: Vec::with_capacity(3 * opts.cmds),
            data: Vec::with_capacity(data_capacity(&opts)),
            reserved: Vec::with_capacity(opts.reserved_entities),
            last_bound: None,
            poisoned: false,
            opts,
        };
        buffer.refill_reserved(store)?;
        Ok(buffer)
    }

    fn refill_reserved(&mut self, store: &mut Entities) -> Result<(), Error> {
        while self.reserved.len() < self.opts.reserved_entities {
            self.reserved.push(store.reserve_immediate()?);
        }
        Ok(())
    }

    /// Pops a pre-reserved handle. Producer threads call this without
    /// touching the store; encoding never synchronizes with the consumer
    /// thread.
    pub fn reserve(&mut self) -> Result<Entity, Error> {
        self.reserved.pop().ok_or(Error::CmdBufOverflow)
    }

    fn bind(&mut self, entity: Entity) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::CmdBufOverflow);
        }
        let result = codec::encode_bind_if_needed(&mut self.tags, &mut self.args, &mut self.last_bound, entity);
        self.poison_on_err(result)
    }

    fn poison_on_err(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    pub fn destroy(&mut self, entity: Entity) -> Result<(), Error> {
        self.bind(entity)?;
        let result = codec::encode_destroy(&mut self.tags);
        self.poison_on_err(result)
    }

    pub fn remove(&mut self, entity: Entity, desc: &'static TypeDescriptor) -> Result<(), Error> {
        self.bind(entity)?;
        let result = codec::encode_remove(&mut self.tags, &mut self.args, desc);
        self.poison_on_err(result)
    }

    /// Encodes `add(entity, T, value)` by copying `value`'s bytes inline.
    pub fn add_val<T: Copy>(&mut self, entity: Entity, desc: &'static TypeDescriptor, value: T) -> Result<(), Error> {
        self.bind(entity)?;
        let bytes =
            unsafe { std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>()) };
        let data_capacity = self.data.capacity();
        let result = codec::encode_val(
            &mut self.tags,
            &mut self.args,
            &mut self.data,
            data_capacity,
            Tag::AddVal,
            desc,
            bytes,
        );
        self.poison_on_err(result)
    }

    /// Encodes `add(entity, T, *ptr)` by pointer. `ptr` must outlive this
    /// buffer's execution (e.g. an interned static).
    pub fn add_ptr(&mut self, entity: Entity, desc: &'static TypeDescriptor, ptr: *const u8) -> Result<(), Error> {
        self.bind(entity)?;
        let result = codec::encode_add_ptr(&mut self.tags, &mut self.args, desc, ptr);
        self.poison_on_err(result)
    }

    /// Extension commands clear the current binding.
    pub fn ext_val<T: Copy>(&mut self, desc: &'static TypeDescriptor, value: T) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::CmdBufOverflow);
        }
        self.last_bound = None;
        let bytes =
            unsafe { std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>()) };
        let data_capacity = self.data.capacity();
        let result = codec::encode_val(
            &mut self.tags,
            &mut self.args,
            &mut self.data,
            data_capacity,
            Tag::ExtVal,
            desc,
            bytes,
        );
        self.poison_on_err(result)
    }

    pub fn ext_ptr(&mut self, desc: &'static TypeDescriptor, ptr: *const u8) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::CmdBufOverflow);
        }
        self.last_bound = None;
        let result = codec::encode_ext_ptr(&mut self.tags, &mut self.args, desc, ptr);
        self.poison_on_err(result)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Maximum of `len/cap` across tags, args, data, and reserved-consumed.
    pub fn worst_case_usage(&self) -> f32 {
        let reserved_consumed = self.opts.reserved_entities - self.reserved.len();
        let fracs = [
            self.tags.len() as f32 / self.tags.capacity().max(1) as f32,
            self.args.len() as f32 / self.args.capacity().max(1) as f32,
            self.data.len() as f32 / self.data.capacity().max(1) as f32,
            reserved_consumed as f32 / self.opts.reserved_entities.max(1) as f32,
        ];
        fracs.into_iter().fold(0.0f32, f32::max)
    }

    /// Clears the encoded streams and refills `reserved` back to capacity.
    pub(crate) fn clear(&mut self, store: &mut Entities) -> Result<(), Error> {
        self.tags.clear();
        self.args.clear();
        self.data.clear();
        self.last_bound = None;
        self.poisoned = false;
        self.refill_reserved(store)
    }

    /// Destroys any handles this buffer still holds reserved but never
    /// used. Consumes the buffer: there is no use for a `CommandBuffer`
    /// once its reserved handles are gone.
    pub fn deinit(mut self, store: &mut Entities) {
        for handle in self.reserved.drain(..) {
            store.destroy_immediate(handle);
        }
    }

    pub(crate) fn batches(&self) -> BatchIter<'_> {
        BatchIter::new(&self.tags, &self.args, &self.data)
    }
}

/// Applies every batch encoded in `buffer` to `store` in two passes: first
/// compute the archetype delta and move the entity, then copy component
/// bytes into the (possibly relocated) destination.
pub fn execute_immediate(buffer: &mut CommandBuffer, store: &mut Entities) -> Result<(), Error> {
    store.bump_pointer_generation();

    let batches: Vec<Batch> = buffer.batches().collect();
    for batch in batches {
        match batch {
            Batch::ArchChange {
                entity,
                destroyed,
                adds,
                removes,
            } => {
                if destroyed {
                    store.destroy_immediate(entity);
                    continue;
                }

                let mut add_flags = crate::archetype::Archetype::EMPTY;
                let mut remove_flags = crate::archetype::Archetype::EMPTY;
                for op in &adds {
                    if let Some(flag) = op.desc.flag() {
                        add_flags = add_flags.inserting(flag);
                    }
                }
                for op in &removes {
                    if let Some(flag) = op.desc.flag() {
                        remove_flags = remove_flags.inserting(flag);
                    }
                }

                if !store.change_arch_immediate(entity, add_flags, remove_flags)? {
                    continue;
                }

                for op in &adds {
                    let Some(flag) = op.desc.flag() else { continue };
                    // A later `remove` in the same batch wins.
                    if remove_flags.contains(flag) {
                        continue;
                    }
                    let Some(dst) = store.get_component_raw(entity, op.desc) else {
                        continue;
                    };
                    let src = match op.payload {
                        Payload::Val(ptr) => ptr,
                        Payload::Ptr(ptr) => ptr,
                    };
                    unsafe {
                        std::ptr::copy_nonoverlapping(src, dst, op.desc.size());
                    }
                }
            }
            Batch::Ext { .. } => {
                // User-defined event commands have no storage-engine effect
                // of their own; a caller that needs to observe them walks
                // `buffer.batches()` directly instead of calling
                // `execute_immediate`.
            }
        }
    }

    buffer.clear(store)
}

/// Rounds `bytes_per_cmd` up by `MAX_ALIGN` headroom so every encoded
/// payload can be written at its natural alignment without extra bookkeeping.
pub(crate) fn data_capacity(opts: &BufferOptions) -> usize {
    align_up(opts.cmds * opts.bytes_per_cmd, crate::component::MAX_ALIGN) + crate::component::MAX_ALIGN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{archetype::Archetype, component, component::ComponentRegistry, options::Options};

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

    #[test]
    fn add_val_is_visible_after_execute() {
        #[derive(Copy, Clone)]
        struct Hp(u32);
        let flag = ComponentRegistry::register::<Hp>();
        let mut store = small_store();
        let mut buffer = CommandBuffer::init(BufferOptions::new(4, 16), &mut store).unwrap();

        let e = buffer.reserve().unwrap();
        buffer.add_val(e, component::descriptor::<Hp>(), Hp(7)).unwrap();
        execute_immediate(&mut buffer, &mut store).unwrap();

        assert!(store.exists(e));
        assert_eq!(store.archetype_of(e), Some(Archetype::EMPTY.inserting(flag)));
        assert_eq!(&*store.get_component::<Hp>(e).unwrap(), &7u32.to_ne_bytes()[..]);
    }

    #[test]
    fn destroy_takes_effect_on_execute() {
        let mut store = small_store();
        let e = store.reserve_immediate().unwrap();
        let mut buffer = CommandBuffer::init(BufferOptions::new(4, 16), &mut store).unwrap();

        buffer.destroy(e).unwrap();
        assert!(store.exists(e));
        execute_immediate(&mut buffer, &mut store).unwrap();
        assert!(!store.exists(e));
    }

    #[test]
    fn clear_refills_reserved_handles() {
        let mut store = small_store();
        let mut buffer = CommandBuffer::init(BufferOptions::new(4, 16), &mut store).unwrap();
        buffer.reserve().unwrap();
        buffer.reserve().unwrap();
        assert!(buffer.worst_case_usage() > 0.0);
        buffer.clear(&mut store).unwrap();
        assert_eq!(buffer.worst_case_usage(), 0.0);
    }

    #[test]
    fn overflow_poisons_buffer() {
        let mut store = small_store();
        let mut buffer = CommandBuffer::init(BufferOptions::new(1, 0), &mut store).unwrap();
        let e = buffer.reserve().unwrap();
        assert!(buffer.destroy(e).is_ok());
        // `cmds=1` provisions a 2-byte tag stream; `bind_entity` + `destroy`
        // already filled it, so the next bind has nowhere to go.
        let e2 = store.reserve_immediate().unwrap();
        assert!(buffer.destroy(e2).is_err());
        assert!(buffer.is_poisoned());
    }

    #[test]
    fn deinit_destroys_unused_reserved_handles() {
        let mut store = small_store();
        let buffer = CommandBuffer::init(BufferOptions::new(4, 16), &mut store).unwrap();
        let reserved = buffer.reserved.clone();
        assert!(reserved.iter().all(|&e| store.exists(e)));
        buffer.deinit(&mut store);
        assert!(reserved.iter().all(|&e| !store.exists(e)));
    }
}

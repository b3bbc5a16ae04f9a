//! Binary encoding for deferred command-buffer subcommands.
//!
//! Three parallel streams (tags, args, data) are decoded tag-directed: a
//! tag byte says which of the other two streams to pull from next and how
//! far, so the decoder never has to branch on anything but the tag.

use crate::{component::TypeDescriptor, handle::Entity, util::align_up};
use smallvec::SmallVec;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub(crate) enum Tag {
    BindEntity = 0,
    Destroy = 1,
    AddVal = 2,
    AddPtr = 3,
    Remove = 4,
    ExtVal = 5,
    ExtPtr = 6,
}

impl Tag {
    fn from_u8(b: u8) -> Self {
        match b {
            0 => Tag::BindEntity,
            1 => Tag::Destroy,
            2 => Tag::AddVal,
            3 => Tag::AddPtr,
            4 => Tag::Remove,
            5 => Tag::ExtVal,
            6 => Tag::ExtPtr,
            _ => unreachable!("decoder read a tag byte never written by the encoder"),
        }
    }
}

/// A payload handed to the applier: either bytes that live inline in the
/// buffer's `data` stream, or a pointer to memory owned elsewhere (an
/// interned static, or the caller's own storage for the buffer's lifetime).
#[derive(Clone, Copy)]
pub(crate) enum Payload {
    Val(*const u8),
    Ptr(*const u8),
}

pub(crate) struct AddOp {
    pub desc: &'static TypeDescriptor,
    pub payload: Payload,
}

pub(crate) struct RemoveOp {
    pub desc: &'static TypeDescriptor,
}

/// One group of operations sharing a binding, as produced by [`BatchIter`].
pub(crate) enum Batch {
    ArchChange {
        entity: Entity,
        destroyed: bool,
        adds: SmallVec<[AddOp; 4]>,
        removes: SmallVec<[RemoveOp; 4]>,
    },
    Ext {
        desc: &'static TypeDescriptor,
        payload: Payload,
    },
}

/// Appends `bind_entity` unless `last` already names `entity`.
pub(crate) fn encode_bind_if_needed(
    tags: &mut Vec<u8>,
    args: &mut Vec<u64>,
    last: &mut Option<Entity>,
    entity: Entity,
) -> Result<(), crate::error::Error> {
    if *last == Some(entity) {
        return Ok(());
    }
    encode_bind(tags, args, entity)?;
    *last = Some(entity);
    Ok(())
}

pub(crate) fn encode_bind(tags: &mut Vec<u8>, args: &mut Vec<u64>, entity: Entity) -> Result<(), crate::error::Error> {
    push_tag(tags, Tag::BindEntity)?;
    push_arg(args, entity.to_bits())?;
    Ok(())
}

pub(crate) fn encode_destroy(tags: &mut Vec<u8>) -> Result<(), crate::error::Error> {
    push_tag(tags, Tag::Destroy)
}

pub(crate) fn encode_remove(tags: &mut Vec<u8>, args: &mut Vec<u64>, desc: &'static TypeDescriptor) -> Result<(), crate::error::Error> {
    push_tag(tags, Tag::Remove)?;
    push_arg(args, desc as *const TypeDescriptor as u64)
}

pub(crate) fn encode_add_ptr(
    tags: &mut Vec<u8>,
    args: &mut Vec<u64>,
    desc: &'static TypeDescriptor,
    ptr: *const u8,
) -> Result<(), crate::error::Error> {
    push_tag(tags, Tag::AddPtr)?;
    push_arg(args, desc as *const TypeDescriptor as u64)?;
    push_arg(args, ptr as u64)
}

pub(crate) fn encode_ext_ptr(
    tags: &mut Vec<u8>,
    args: &mut Vec<u64>,
    desc: &'static TypeDescriptor,
    ptr: *const u8,
) -> Result<(), crate::error::Error> {
    push_tag(tags, Tag::ExtPtr)?;
    push_arg(args, desc as *const TypeDescriptor as u64)?;
    push_arg(args, ptr as u64)
}

/// Aligns `data`'s cursor to `desc.align()` and appends `bytes` to it,
/// recording `(tag, type-id)` in the tag/arg streams.
pub(crate) fn encode_val(
    tags: &mut Vec<u8>,
    args: &mut Vec<u64>,
    data: &mut Vec<u8>,
    data_cap: usize,
    tag: Tag,
    desc: &'static TypeDescriptor,
    bytes: &[u8],
) -> Result<(), crate::error::Error> {
    debug_assert!(matches!(tag, Tag::AddVal | Tag::ExtVal));
    let aligned = align_up(data.len(), desc.align());
    if aligned + bytes.len() > data_cap {
        return Err(crate::error::Error::CmdBufOverflow);
    }
    data.resize(aligned, 0);
    data.extend_from_slice(bytes);
    push_tag(tags, tag)?;
    push_arg(args, desc as *const TypeDescriptor as u64)
}

fn push_tag(tags: &mut Vec<u8>, tag: Tag) -> Result<(), crate::error::Error> {
    if tags.len() == tags.capacity() {
        return Err(crate::error::Error::CmdBufOverflow);
    }
    tags.push(tag as u8);
    Ok(())
}

fn push_arg(args: &mut Vec<u64>, arg: u64) -> Result<(), crate::error::Error> {
    if args.len() == args.capacity() {
        return Err(crate::error::Error::CmdBufOverflow);
    }
    args.push(arg);
    Ok(())
}

/// Walks the three streams, grouping operations into [`Batch`]es:
/// everything since the last `bind_entity` forms one archetype-change
/// batch, while `ext_*` is always its own single-operation batch (it
/// clears the current binding).
pub(crate) struct BatchIter<'a> {
    tags: &'a [u8],
    args: &'a [u64],
    data: &'a [u8],
    tag_cursor: usize,
    arg_cursor: usize,
    data_cursor: usize,
}

impl<'a> BatchIter<'a> {
    pub fn new(tags: &'a [u8], args: &'a [u64], data: &'a [u8]) -> Self {
        BatchIter {
            tags,
            args,
            data,
            tag_cursor: 0,
            arg_cursor: 0,
            data_cursor: 0,
        }
    }

    fn next_arg(&mut self) -> u64 {
        let v = self.args[self.arg_cursor];
        self.arg_cursor += 1;
        v
    }

    fn take_data(&mut self, desc: &TypeDescriptor) -> *const u8 {
        let aligned = align_up(self.data_cursor, desc.align());
        let ptr = unsafe { self.data.as_ptr().add(aligned) };
        self.data_cursor = aligned + desc.size();
        ptr
    }

    fn type_desc(bits: u64) -> &'static TypeDescriptor {
        unsafe { &*(bits as *const TypeDescriptor) }
    }
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.tag_cursor >= self.tags.len() {
            return None;
        }

        let tag = Tag::from_u8(self.tags[self.tag_cursor]);
        self.tag_cursor += 1;

        match tag {
            Tag::ExtVal => {
                let desc = Self::type_desc(self.next_arg());
                let ptr = self.take_data(desc);
                return Some(Batch::Ext {
                    desc,
                    payload: Payload::Val(ptr),
                });
            }
            Tag::ExtPtr => {
                let desc = Self::type_desc(self.next_arg());
                let ptr = self.next_arg() as *const u8;
                return Some(Batch::Ext {
                    desc,
                    payload: Payload::Ptr(ptr),
                });
            }
            Tag::BindEntity => {}
            _ => unreachable!("stream must begin with bind_entity or ext_*"),
        }

        let entity = Entity::from_bits(self.next_arg());
        let mut destroyed = false;
        let mut adds = SmallVec::new();
        let mut removes = SmallVec::new();

        while self.tag_cursor < self.tags.len() {
            let next_tag = Tag::from_u8(self.tags[self.tag_cursor]);
            if matches!(next_tag, Tag::BindEntity | Tag::ExtVal | Tag::ExtPtr) {
                break;
            }
            self.tag_cursor += 1;
            match next_tag {
                Tag::Destroy => destroyed = true,
                Tag::AddVal => {
                    let desc = Self::type_desc(self.next_arg());
                    let ptr = self.take_data(desc);
                    adds.push(AddOp {
                        desc,
                        payload: Payload::Val(ptr),
                    });
                }
                Tag::AddPtr => {
                    let desc = Self::type_desc(self.next_arg());
                    let ptr = self.next_arg() as *const u8;
                    adds.push(AddOp {
                        desc,
                        payload: Payload::Ptr(ptr),
                    });
                }
                Tag::Remove => {
                    let desc = Self::type_desc(self.next_arg());
                    removes.push(RemoveOp { desc });
                }
                Tag::BindEntity | Tag::ExtVal | Tag::ExtPtr => unreachable!(),
            }
        }

        Some(Batch::ArchChange {
            entity,
            destroyed,
            adds,
            removes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::descriptor;

    #[test]
    fn single_bind_add_remove_batch() {
        let mut tags = Vec::with_capacity(8);
        let mut args = Vec::with_capacity(8);
        let mut data = Vec::with_capacity(64);

        let entity = Entity::new(3, 1);
        let desc = descriptor::<u64>();
        encode_bind(&mut tags, &mut args, entity).unwrap();
        encode_val(&mut tags, &mut args, &mut data, 64, Tag::AddVal, desc, &42u64.to_ne_bytes()).unwrap();
        encode_remove(&mut tags, &mut args, descriptor::<u32>()).unwrap();

        let mut iter = BatchIter::new(&tags, &args, &data);
        let batch = iter.next().unwrap();
        match batch {
            Batch::ArchChange {
                entity: e,
                destroyed,
                adds,
                removes,
            } => {
                assert_eq!(e, entity);
                assert!(!destroyed);
                assert_eq!(adds.len(), 1);
                assert_eq!(removes.len(), 1);
            }
            _ => panic!("expected an archetype-change batch"),
        }
        assert!(iter.next().is_none());
    }

    #[test]
    fn ext_is_its_own_batch_and_clears_binding() {
        let mut tags = Vec::with_capacity(8);
        let mut args = Vec::with_capacity(8);
        let mut data = Vec::with_capacity(64);

        let desc = descriptor::<u64>();
        encode_val(&mut tags, &mut args, &mut data, 64, Tag::ExtVal, desc, &7u64.to_ne_bytes()).unwrap();

        let mut iter = BatchIter::new(&tags, &args, &data);
        match iter.next().unwrap() {
            Batch::Ext { .. } => {}
            _ => panic!("expected an ext batch"),
        }
        assert!(iter.next().is_none());
    }
}

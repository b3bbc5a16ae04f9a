//! Archetypal ECS storage core: chunked, archetype-indexed component
//! storage with generation-checked handles and a deferred command-buffer
//! pipeline for concurrent producers.
//!
//! The store itself (`Entities`) is single-writer (see its docs); the
//! command-buffer pool is the concurrency boundary producer threads use to
//! hand off structural changes without touching the store directly.

mod archetype;
mod archetype_map;
mod chunk;
mod chunk_list;
mod chunk_pool;
mod codec;
mod command_buffer;
mod command_pool;
mod component;
mod entities;
mod error;
mod handle;
mod handle_table;
mod options;
mod util;
mod view;

pub use crate::{
    archetype::Archetype,
    command_buffer::{execute_immediate, CommandBuffer},
    command_pool::{Acquired, CommandPool},
    component::{descriptor, ComponentRegistry, TypeDescriptor, MAX_ALIGN, MAX_COMPONENTS},
    entities::{ChunkIter, ChunkRows, Entities, RowIter},
    error::Error,
    handle::Entity,
    options::{BufferOptions, Options, PoolOptions},
    view::{View, ViewItem},
};

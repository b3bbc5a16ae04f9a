use std::fmt::{self, Display};

/// Closed set of failures this crate ever returns. None of these are
/// exceptions: every fallible operation returns one of these through a
/// `Result`, matching the "errors are a closed set of tagged values, never
/// exceptions" design.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The handle table is full or every slot has saturated its generation
    /// counter. Recoverable: destroy entities and retry.
    EntityOverflow,

    /// The archetype map is at capacity and a never-seen archetype was
    /// requested. Fatal: rebuild the store with a higher `max_archetypes`.
    ArchOverflow,

    /// The chunk pool is exhausted. Fatal: rebuild with a higher
    /// `max_chunks`.
    ChunkPoolOverflow,

    /// An archetype's computed per-chunk capacity would be zero: the
    /// archetype's entities are too large to fit even one per chunk. Fatal:
    /// raise `chunk_size`.
    ChunkOverflow,

    /// A command buffer is at tag, argument, data, or reserved-handle
    /// capacity. The buffer is poisoned; the caller must release it back to
    /// the pool (it will come back empty) or rebuild it with more capacity.
    CmdBufOverflow,

    /// Every buffer in a command pool has been retired (returned below the
    /// headroom threshold); the pool is under-provisioned for the current
    /// load.
    CmdPoolUnderflow,

    /// The allocator failed during initialization.
    OutOfMemory,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::EntityOverflow => "handle table is full or fully saturated",
            Error::ArchOverflow => "archetype map is at capacity",
            Error::ChunkPoolOverflow => "chunk pool is exhausted",
            Error::ChunkOverflow => "archetype's computed chunk capacity is zero",
            Error::CmdBufOverflow => "command buffer is at capacity",
            Error::CmdPoolUnderflow => "command pool has no buffers with headroom left",
            Error::OutOfMemory => "allocation failed during initialization",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

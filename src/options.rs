/// Configuration for [`crate::Entities::init`].
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Handle-table capacity.
    pub max_entities: u32,

    /// Archetype-map capacity.
    pub max_archetypes: u32,

    /// Chunk-pool size, in chunks.
    pub max_chunks: u32,

    /// Power-of-two byte size of each chunk. Must be >= 256 and <= the host
    /// page size (4096 is a safe default across targets).
    pub chunk_size: usize,

    /// Fraction above which pool/command-buffer usage warnings are logged.
    pub warn_ratio: f32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_entities: 1 << 16,
            max_archetypes: 256,
            max_chunks: 1024,
            chunk_size: 4096,
            warn_ratio: 0.9,
        }
    }
}

impl Options {
    pub(crate) fn validate(&self) -> Result<(), &'static str> {
        if !self.chunk_size.is_power_of_two() {
            return Err("chunk_size must be a power of two");
        }
        if self.chunk_size < 256 {
            return Err("chunk_size must be >= 256");
        }
        if self.max_entities == 0 {
            return Err("max_entities must be > 0");
        }
        if self.max_archetypes == 0 {
            return Err("max_archetypes must be > 0");
        }
        if self.max_chunks == 0 {
            return Err("max_chunks must be > 0");
        }
        Ok(())
    }
}

/// Configuration for a single [`crate::CommandBuffer`].
#[derive(Clone, Copy, Debug)]
pub struct BufferOptions {
    /// Expected command count per buffer. Drives `tags`/`args`/`data`
    /// capacity.
    pub cmds: usize,

    /// Expected payload bytes per command.
    pub bytes_per_cmd: usize,

    /// Pre-reserved handles per buffer. Defaults to `cmds` when built via
    /// [`BufferOptions::new`].
    pub reserved_entities: usize,
}

impl BufferOptions {
    pub fn new(cmds: usize, bytes_per_cmd: usize) -> Self {
        BufferOptions {
            cmds,
            bytes_per_cmd,
            reserved_entities: cmds,
        }
    }

    pub fn with_reserved_entities(mut self, reserved_entities: usize) -> Self {
        self.reserved_entities = reserved_entities;
        self
    }
}

/// Configuration for a [`crate::CommandPool`].
#[derive(Clone, Copy, Debug)]
pub struct PoolOptions {
    /// Number of buffers held by the pool.
    pub buffer_count: usize,

    /// Per-buffer configuration, identical for every buffer in the pool.
    pub buffer: BufferOptions,

    /// Minimum remaining usage fraction (`1 - used/capacity`) required for a
    /// released buffer to be handed back out instead of retired. Must be in
    /// `[0, 1]`.
    pub headroom: f32,

    /// Multiplier applied to `(1 - headroom)` above which `release` logs a
    /// warning about a buffer's usage growing between acquire and release.
    pub warn_ratio: f32,
}

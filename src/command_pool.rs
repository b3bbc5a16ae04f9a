//! Elastic pool of [`CommandBuffer`]s, handed out to producer threads and
//! returned through a mutex+condvar free-list handoff. A buffer whose usage
//! grows past the pool's headroom threshold on release is retired instead
//! of recycled, so long-lived producers can't slowly bloat every buffer in
//! the pool to its worst-case size.

use crate::{
    command_buffer::CommandBuffer,
    entities::Entities,
    error::Error,
    options::PoolOptions,
};
use parking_lot::{Condvar, Mutex};

struct Inner {
    reserved: Vec<Box<CommandBuffer>>,
    released: Vec<Box<CommandBuffer>>,
    retired: usize,
}

pub struct CommandPool {
    inner: Mutex<Inner>,
    condvar: Condvar,
    buffer_count: usize,
    headroom: f32,
    warn_ratio: f32,
}

/// A buffer handed out by [`CommandPool::acquire`], remembering the usage
/// fraction observed at acquisition time so `release` can warn on growth.
pub struct Acquired {
    pub buffer: Box<CommandBuffer>,
    initial_usage: f32,
}

impl CommandPool {
    pub fn init(opts: PoolOptions, store: &mut Entities) -> Result<Self, Error> {
        let mut reserved = Vec::with_capacity(opts.buffer_count);
        for _ in 0..opts.buffer_count {
            reserved.push(Box::new(CommandBuffer::init(opts.buffer, store)?));
        }
        Ok(CommandPool {
            inner: Mutex::new(Inner {
                reserved,
                released: Vec::new(),
                retired: 0,
            }),
            condvar: Condvar::new(),
            buffer_count: opts.buffer_count,
            headroom: opts.headroom,
            warn_ratio: opts.warn_ratio,
        })
    }

    /// Blocks until a buffer is available: prefer an already-released
    /// buffer, then a never-used reserved one, then wait; if every buffer
    /// ends up retired, give up.
    pub fn acquire(&self) -> Result<Acquired, Error> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(buffer) = inner.released.pop() {
                return Ok(Acquired {
                    buffer,
                    initial_usage: 0.0,
                });
            }
            if let Some(buffer) = inner.reserved.pop() {
                return Ok(Acquired {
                    buffer,
                    initial_usage: 0.0,
                });
            }
            if inner.retired == self.buffer_count {
                return Err(Error::CmdPoolUnderflow);
            }
            self.condvar.wait(&mut inner);
            if inner.released.is_empty() && inner.retired == self.buffer_count {
                return Err(Error::CmdPoolUnderflow);
            }
        }
    }

    /// Returns a buffer, retiring it if its usage dropped below
    /// `headroom`'s complement. Does not execute or clear `buffer` — a
    /// caller that filled it with commands is expected to have run
    /// [`crate::command_buffer::execute_immediate`] (which clears and
    /// refills it) before releasing it back to the pool.
    pub fn release(&self, acquired: Acquired) -> Result<(), Error> {
        let Acquired { buffer, initial_usage } = acquired;
        let final_usage = buffer.worst_case_usage();

        if final_usage - initial_usage > (1.0 - self.headroom) * self.warn_ratio {
            log::warn!(
                "command buffer usage grew by {:.2} between acquire and release (warn threshold {:.2})",
                final_usage - initial_usage,
                (1.0 - self.headroom) * self.warn_ratio
            );
        }

        let mut inner = self.inner.lock();
        if final_usage < self.headroom {
            inner.released.push(buffer);
            self.condvar.notify_one();
        } else {
            inner.retired += 1;
            if inner.retired == self.buffer_count {
                self.condvar.notify_all();
            }
        }
        Ok(())
    }

    /// Requires every buffer to have been returned; moves everything back
    /// into `reserved` and resets retirement bookkeeping.
    pub fn reset(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let outstanding = self.buffer_count - inner.released.len() - inner.retired - inner.reserved.len();
        if outstanding != 0 {
            return Err(Error::CmdPoolUnderflow);
        }

        let written_fraction = (inner.retired + inner.released.len()) as f32 / self.buffer_count.max(1) as f32;
        if written_fraction > self.warn_ratio {
            log::warn!(
                "command pool reset with {:.0}% of buffers written (warn threshold {:.0}%)",
                written_fraction * 100.0,
                self.warn_ratio * 100.0
            );
        }

        let Inner { reserved, released, .. } = &mut *inner;
        reserved.append(released);
        inner.retired = 0;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.buffer_count
    }

    /// Number of buffers currently held by callers (neither reserved,
    /// released, nor retired).
    pub fn outstanding(&self) -> usize {
        let inner = self.inner.lock();
        self.buffer_count - inner.reserved.len() - inner.released.len() - inner.retired
    }

    pub fn retired_count(&self) -> usize {
        self.inner.lock().retired
    }
}

//! The buffered-output chunk engine.
//!
//! A buffer is a two-stage store owned by exactly one output:
//!
//! ```text
//!   append(key, bytes)                pop(writer)
//!        │                                 ▲
//!        v                                 │
//!   staged: key -> open chunk   ──>   queue: FIFO of closed chunks
//!            (rotation when the next write does not fit)
//! ```
//!
//! Two lock levels guard the state: the buffer lock (staged map, chunk
//! creation, the append/push decision) and the queue sub-lock (queue
//! mutation and the emptiness snapshots). Lock order is buffer -> queue,
//! never the reverse, and neither lock is ever held across an `.await`; the
//! downstream write runs outside both, guarded only by the chunk's advisory
//! lock.
//!
//! Producers observe backpressure exclusively through [`BufferError::QueueFull`],
//! surfaced synchronously from `append`; nothing in the engine ever blocks
//! an emitter on a full queue.

pub mod chunk;
pub mod file;
pub mod memory;

pub use chunk::{AdvisoryLock, Chunk, ChunkId, ChunkLease};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ByteSize, ConfigError, Element};
use crate::output::{ChunkWriter, WriteError};

/// Locks a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Errors surfaced by the chunk engine.
#[derive(Debug, Error)]
pub enum BufferError {
    /// The flush queue is at capacity; the emitter decides what to do.
    #[error("buffer queue is full ({limit} chunks)")]
    QueueFull { limit: usize },

    /// A single record larger than the chunk limit was rejected outright.
    #[error("record of {size} bytes exceeds the chunk limit of {limit} bytes")]
    ChunkTooLarge { size: usize, limit: usize },

    #[error("chunk {id} is closed for append")]
    ChunkClosed { id: ChunkId },

    #[error("chunk {id} was purged")]
    ChunkPurged { id: ChunkId },

    #[error("buffer I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// A failed flush attempt: which chunk, and what the sink said.
///
/// The chunk stays in the queue (retry-visible) until the owner either
/// succeeds, drops it ([`Buffer::drop_chunk`]) or gives up
/// ([`Buffer::clear_queue`]).
#[derive(Debug, Error)]
#[error("write of chunk {chunk} failed: {source}")]
pub struct PopError {
    pub chunk: ChunkId,
    #[source]
    pub source: WriteError,
}

/// Buffer sizing knobs, read from the `<buffer>` configuration element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferConfig {
    /// Bytes per chunk before rotation (`buffer_chunk_limit`, default 8 MiB).
    pub chunk_limit: ByteSize,
    /// Chunks the flush queue holds (`buffer_queue_limit`, default 256).
    pub queue_limit: usize,
    /// Whether flushers may scan past a locked queue head (`parallel_pop`,
    /// default true).
    pub parallel_pop: bool,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            chunk_limit: ByteSize(8 * ByteSize::MIB),
            queue_limit: 256,
            parallel_pop: true,
        }
    }
}

impl BufferConfig {
    pub fn from_element(el: &Element) -> Result<Self, ConfigError> {
        let defaults = BufferConfig::default();
        Ok(BufferConfig {
            chunk_limit: el.parse_or("buffer_chunk_limit", defaults.chunk_limit)?,
            queue_limit: el.parse_or("buffer_queue_limit", defaults.queue_limit)?,
            parallel_pop: el.parse_bool_or("parallel_pop", defaults.parallel_pop)?,
        })
    }
}

/// Factory and lifecycle hooks for a concrete chunk representation.
pub trait ChunkBacking: Send + Sync {
    /// Creates a fresh open chunk for `key`.
    fn create(&self, key: &str) -> Result<Arc<dyn Chunk>, BufferError>;

    /// Returns persisted state from a previous run: open chunks for the
    /// staged map and closed chunks for the queue, in enqueue order.
    /// Volatile backings return empty state.
    fn resume(&self) -> Result<(Vec<Arc<dyn Chunk>>, Vec<Arc<dyn Chunk>>), BufferError> {
        Ok((Vec::new(), Vec::new()))
    }

    /// Invoked inside the queue sub-lock just before `chunk` enters the
    /// queue, so the transition appears atomic with the enqueue.
    fn on_enqueue(&self, chunk: &Arc<dyn Chunk>) -> Result<(), BufferError> {
        chunk.enqueued()
    }
}

/// The two-stage chunk store: open chunk per key plus a FIFO flush queue.
pub struct Buffer {
    config: BufferConfig,
    backing: Box<dyn ChunkBacking>,
    staged: Mutex<HashMap<String, Arc<dyn Chunk>>>,
    queue: Mutex<VecDeque<Arc<dyn Chunk>>>,
}

impl Buffer {
    #[must_use]
    pub fn new(config: BufferConfig, backing: Box<dyn ChunkBacking>) -> Self {
        Buffer {
            config,
            backing,
            staged: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Loads persisted state from the backing. Called once before the first
    /// append; the owner should trigger a flush if the queue came back
    /// non-empty.
    pub fn start(&self) -> Result<(), ConfigError> {
        let (open, queued) = self.backing.resume().map_err(|e| match e {
            BufferError::Io(io) => ConfigError::Io(io),
            other => ConfigError::Io(std::io::Error::other(other.to_string())),
        })?;
        let mut staged = lock(&self.staged);
        let mut queue = lock(&self.queue);
        for chunk in open {
            staged.insert(chunk.key().to_string(), chunk);
        }
        for chunk in queued {
            queue.push_back(chunk);
        }
        if !queue.is_empty() || !staged.is_empty() {
            debug!(
                staged = staged.len(),
                queued = queue.len(),
                "resumed buffer state"
            );
        }
        Ok(())
    }

    /// Appends one record's bytes under `key`.
    ///
    /// Returns `Ok(true)` when this append enqueued a chunk into a
    /// previously empty queue — the caller must wake its flusher, which is
    /// what keeps "queue non-empty implies the flusher has been or will be
    /// notified" true. `Ok(false)` means the periodic tick will get to it.
    ///
    /// Fails with [`BufferError::QueueFull`] when rotation is needed but the
    /// queue is at capacity, and with [`BufferError::ChunkTooLarge`] when a
    /// single record can never fit a chunk; neither failure mutates state.
    pub fn append(&self, key: &str, data: &[u8]) -> Result<bool, BufferError> {
        let chunk_limit = self.config.chunk_limit.bytes();
        if data.len() > chunk_limit {
            return Err(BufferError::ChunkTooLarge {
                size: data.len(),
                limit: chunk_limit,
            });
        }

        let mut staged = lock(&self.staged);
        let chunk = match staged.get(key) {
            Some(chunk) => Arc::clone(chunk),
            None => {
                let chunk = self.backing.create(key)?;
                staged.insert(key.to_string(), Arc::clone(&chunk));
                chunk
            }
        };

        if chunk.size() + data.len() <= chunk_limit {
            chunk.append(data)?;
            return Ok(false);
        }

        // Rotation. Check the queue bound before touching anything: while
        // the buffer lock is held the queue can only shrink, so the check
        // stays valid through the enqueue below.
        {
            let queue = lock(&self.queue);
            if queue.len() >= self.config.queue_limit {
                return Err(BufferError::QueueFull {
                    limit: self.config.queue_limit,
                });
            }
        }

        let fresh = self.backing.create(key)?;
        if let Err(e) = fresh.append(data) {
            if let Err(purge_err) = fresh.purge() {
                warn!(chunk = fresh.id(), error = %purge_err, "failed to purge chunk after append error");
            }
            return Err(e);
        }

        let trigger = {
            let mut queue = lock(&self.queue);
            let trigger = queue.is_empty();
            if let Err(e) = chunk.close().and_then(|()| self.backing.on_enqueue(&chunk)) {
                drop(queue);
                if let Err(purge_err) = fresh.purge() {
                    warn!(chunk = fresh.id(), error = %purge_err, "failed to purge replacement chunk");
                }
                return Err(e);
            }
            queue.push_back(Arc::clone(&chunk));
            staged.insert(key.to_string(), fresh);
            trigger
        };
        Ok(trigger)
    }

    /// Forcibly moves the open chunk for `key` to the flush queue.
    ///
    /// Returns `Ok(false)` when there is no open chunk for the key or it is
    /// empty. Fails with `QueueFull` rather than exceed the queue bound.
    pub fn push(&self, key: &str) -> Result<bool, BufferError> {
        let mut staged = lock(&self.staged);
        let Some(chunk) = staged.get(key).map(Arc::clone) else {
            return Ok(false);
        };
        if chunk.is_empty() {
            return Ok(false);
        }
        let mut queue = lock(&self.queue);
        if queue.len() >= self.config.queue_limit {
            return Err(BufferError::QueueFull {
                limit: self.config.queue_limit,
            });
        }
        chunk.close()?;
        self.backing.on_enqueue(&chunk)?;
        queue.push_back(chunk);
        staged.remove(key);
        Ok(true)
    }

    /// Pops one chunk, writes it through `writer`, and purges it on success.
    ///
    /// Selection depends on `parallel_pop`: serial mode only considers the
    /// queue head (and yields if another flusher holds it); parallel mode
    /// scans for the first chunk whose advisory lock is free, which
    /// preserves ordering per key but not across keys.
    ///
    /// Returns `Ok(true)` while the queue still has work, `Ok(false)` when
    /// it is empty or every chunk is owned by another flusher. On a write
    /// failure the chunk stays in the queue for retry and the error carries
    /// its id.
    pub async fn pop(&self, writer: &dyn ChunkWriter) -> Result<bool, PopError> {
        let lease = {
            let queue = lock(&self.queue);
            let mut selected = None;
            if self.config.parallel_pop {
                for chunk in queue.iter() {
                    if let Some(lease) = ChunkLease::acquire(chunk) {
                        selected = Some(lease);
                        break;
                    }
                }
            } else if let Some(head) = queue.front() {
                selected = ChunkLease::acquire(head);
            }
            match selected {
                Some(lease) => lease,
                None => return Ok(false),
            }
        };

        let chunk = lease.chunk();
        if chunk.is_empty() {
            // Nothing ever enqueues an empty chunk, but readers tolerate
            // one: skip the write, still retire it below.
            debug!(chunk = chunk.id(), key = chunk.key(), "discarding empty queued chunk");
        } else {
            writer.write(chunk).await.map_err(|source| PopError {
                chunk: chunk.id(),
                source,
            })?;
        }

        let queue_empty = {
            let mut queue = lock(&self.queue);
            if let Some(pos) = queue.iter().position(|c| c.id() == chunk.id()) {
                queue.remove(pos);
            }
            queue.is_empty()
        };
        if let Err(e) = chunk.purge() {
            warn!(chunk = chunk.id(), error = %e, "failed to purge flushed chunk");
        }
        drop(lease);
        Ok(!queue_empty)
    }

    /// Removes one queued chunk by identity and purges it. Used when the
    /// sink reported a fatal error for that chunk.
    pub fn drop_chunk(&self, id: ChunkId) -> bool {
        let removed = {
            let mut queue = lock(&self.queue);
            queue
                .iter()
                .position(|c| c.id() == id)
                .and_then(|pos| queue.remove(pos))
        };
        match removed {
            Some(chunk) => {
                if let Err(e) = chunk.purge() {
                    warn!(chunk = id, error = %e, "failed to purge dropped chunk");
                }
                true
            }
            None => false,
        }
    }

    /// Purges every queued chunk, leaving open chunks alone. Returns how
    /// many were dropped. This is the give-up path after retries are
    /// exhausted.
    pub fn clear_queue(&self) -> usize {
        let drained: Vec<Arc<dyn Chunk>> = {
            let mut queue = lock(&self.queue);
            queue.drain(..).collect()
        };
        for chunk in &drained {
            if let Err(e) = chunk.purge() {
                warn!(chunk = chunk.id(), error = %e, "failed to purge chunk");
            }
        }
        drained.len()
    }

    /// Drops everything, staged and queued.
    pub fn clear(&self) {
        let staged: Vec<Arc<dyn Chunk>> = {
            let mut map = lock(&self.staged);
            map.drain().map(|(_, c)| c).collect()
        };
        for chunk in &staged {
            if let Err(e) = chunk.purge() {
                warn!(chunk = chunk.id(), error = %e, "failed to purge chunk");
            }
        }
        self.clear_queue();
    }

    /// Closes every chunk without purging, so durable backings keep their
    /// contents for the next run.
    pub fn shutdown(&self) {
        let staged = lock(&self.staged);
        let queue = lock(&self.queue);
        for chunk in staged.values().chain(queue.iter()) {
            if let Err(e) = chunk.close() {
                warn!(chunk = chunk.id(), error = %e, "failed to close chunk at shutdown");
            }
        }
    }

    /// Keys with an open chunk.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        lock(&self.staged).keys().cloned().collect()
    }

    #[must_use]
    pub fn queue_size(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Total payload bytes across open and queued chunks.
    #[must_use]
    pub fn total_queued_bytes(&self) -> usize {
        let staged = lock(&self.staged);
        let queue = lock(&self.queue);
        staged
            .values()
            .chain(queue.iter())
            .map(|c| c.size())
            .sum()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("config", &self.config)
            .field("staged_keys", &lock(&self.staged).len())
            .field("queued", &lock(&self.queue).len())
            .finish()
    }
}

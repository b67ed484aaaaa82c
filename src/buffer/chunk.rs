//! The chunk contract: append-only, size-bounded byte batches.
//!
//! A chunk is identified by its routing key (chosen by the owning output,
//! usually the tag) and a process-unique [`ChunkId`] used for identity
//! comparison in the flush queue. Appends are serialized by the buffer;
//! flushers coordinate through a non-blocking advisory lock so that at most
//! one of them writes a given chunk at a time.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::buffer::BufferError;

/// Process-unique chunk identifier, assigned at construction.
pub type ChunkId = u64;

static NEXT_CHUNK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next chunk id.
pub(crate) fn next_chunk_id() -> ChunkId {
    NEXT_CHUNK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Moves the id allocator past `max_seen`, so chunks resumed from a durable
/// backing never collide with freshly created ones.
pub(crate) fn reserve_chunk_ids(max_seen: ChunkId) {
    NEXT_CHUNK_ID.fetch_max(max_seen + 1, Ordering::Relaxed);
}

/// Non-blocking advisory lock carried by every chunk.
///
/// Not reentrant. `try_acquire` either takes the lock or reports that
/// another flusher owns the chunk; release happens through [`ChunkLease`]
/// on every exit path.
#[derive(Debug, Default)]
pub struct AdvisoryLock {
    held: AtomicBool,
}

impl AdvisoryLock {
    pub fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }
}

/// An append-only byte batch bound to a routing key.
///
/// Lifecycle: open (accepting appends, addressable from the buffer's staged
/// map) -> closed (enqueued for flush; bytes stay readable) -> purged
/// (terminal, idempotent). `append` must be serialized by the caller.
pub trait Chunk: Send + Sync + fmt::Debug {
    fn id(&self) -> ChunkId;

    fn key(&self) -> &str;

    /// Appends bytes to the payload. Fails once the chunk has been closed
    /// or purged.
    fn append(&self, data: &[u8]) -> Result<(), BufferError>;

    /// Payload length in bytes.
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the full payload. Legal until `purge`.
    fn read(&self) -> Result<Vec<u8>, BufferError>;

    /// Closes the chunk for append. Idempotent.
    fn close(&self) -> Result<(), BufferError>;

    /// Hook invoked (inside the queue sub-lock) when the chunk moves into
    /// the flush queue. Durable backings rename their file here.
    fn enqueued(&self) -> Result<(), BufferError> {
        Ok(())
    }

    /// Discards the chunk and any resources behind it. Terminal and
    /// idempotent.
    fn purge(&self) -> Result<(), BufferError>;

    /// The chunk's advisory lock; acquire it through [`ChunkLease`].
    fn advisory(&self) -> &AdvisoryLock;
}

/// Scoped holder of a chunk's advisory lock.
///
/// Dropping the lease releases the lock, so every exit path of a flush
/// attempt (success, write error, panic unwind) gives the chunk back.
#[derive(Debug)]
pub struct ChunkLease {
    chunk: Arc<dyn Chunk>,
}

impl ChunkLease {
    /// Tries to take the advisory lock; `None` when another flusher owns
    /// the chunk.
    #[must_use]
    pub fn acquire(chunk: &Arc<dyn Chunk>) -> Option<Self> {
        if chunk.advisory().try_acquire() {
            Some(ChunkLease {
                chunk: Arc::clone(chunk),
            })
        } else {
            None
        }
    }

    #[must_use]
    pub fn chunk(&self) -> &Arc<dyn Chunk> {
        &self.chunk
    }
}

impl Drop for ChunkLease {
    fn drop(&mut self) {
        self.chunk.advisory().release();
    }
}

//! Volatile in-memory chunks. Nothing survives a restart; `resume` returns
//! empty state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::chunk::{next_chunk_id, AdvisoryLock, Chunk, ChunkId};
use crate::buffer::{lock, BufferError, ChunkBacking};

/// Chunk payload held in a `Vec<u8>`.
#[derive(Debug)]
pub struct MemoryChunk {
    id: ChunkId,
    key: String,
    payload: Mutex<Vec<u8>>,
    closed: AtomicBool,
    purged: AtomicBool,
    advisory: AdvisoryLock,
}

impl MemoryChunk {
    #[must_use]
    pub fn create(key: &str) -> Self {
        MemoryChunk {
            id: next_chunk_id(),
            key: key.to_string(),
            payload: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            purged: AtomicBool::new(false),
            advisory: AdvisoryLock::default(),
        }
    }
}

impl Chunk for MemoryChunk {
    fn id(&self) -> ChunkId {
        self.id
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn append(&self, data: &[u8]) -> Result<(), BufferError> {
        if self.purged.load(Ordering::Acquire) {
            return Err(BufferError::ChunkPurged { id: self.id });
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(BufferError::ChunkClosed { id: self.id });
        }
        lock(&self.payload).extend_from_slice(data);
        Ok(())
    }

    fn size(&self) -> usize {
        lock(&self.payload).len()
    }

    fn read(&self) -> Result<Vec<u8>, BufferError> {
        if self.purged.load(Ordering::Acquire) {
            return Err(BufferError::ChunkPurged { id: self.id });
        }
        Ok(lock(&self.payload).clone())
    }

    fn close(&self) -> Result<(), BufferError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn purge(&self) -> Result<(), BufferError> {
        if self.purged.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.store(true, Ordering::Release);
        lock(&self.payload).clear();
        Ok(())
    }

    fn advisory(&self) -> &AdvisoryLock {
        &self.advisory
    }
}

/// Backing that hands out [`MemoryChunk`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBacking;

impl ChunkBacking for MemoryBacking {
    fn create(&self, key: &str) -> Result<Arc<dyn Chunk>, BufferError> {
        Ok(Arc::new(MemoryChunk::create(key)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let chunk = MemoryChunk::create("k");
        chunk.append(b"ab").unwrap();
        chunk.append(b"cd").unwrap();
        assert_eq!(chunk.size(), 4);
        assert!(!chunk.is_empty());
        assert_eq!(chunk.read().unwrap(), b"abcd");
    }

    #[test]
    fn closed_chunk_rejects_append_but_stays_readable() {
        let chunk = MemoryChunk::create("k");
        chunk.append(b"ab").unwrap();
        chunk.close().unwrap();
        assert!(matches!(
            chunk.append(b"cd").unwrap_err(),
            BufferError::ChunkClosed { .. }
        ));
        assert_eq!(chunk.read().unwrap(), b"ab");
    }

    #[test]
    fn purge_is_terminal_and_idempotent() {
        let chunk = MemoryChunk::create("k");
        chunk.append(b"ab").unwrap();
        chunk.purge().unwrap();
        chunk.purge().unwrap();
        assert!(chunk.read().is_err());
        assert!(chunk.append(b"x").is_err());
        assert_eq!(chunk.size(), 0);
    }
}

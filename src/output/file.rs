//! File output: a buffered sink appending chunk payloads to one log file
//! per chunk key under a configured directory.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::buffer::file::escape_key;
use crate::buffer::{BufferError, Chunk};
use crate::output::{ChunkWriter, WriteError};

/// Chunk sink behind the `file` output plugin.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Creates the destination directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, BufferError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileSink { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.log", escape_key(key)))
    }
}

#[async_trait]
impl ChunkWriter for FileSink {
    async fn write(&self, chunk: &Arc<dyn Chunk>) -> Result<(), WriteError> {
        let payload = chunk
            .read()
            .map_err(|e| WriteError::Fatal(e.to_string()))?;
        let path = self.path_for(chunk.key());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| WriteError::Transient(e.to_string()))?;
        file.write_all(&payload)
            .map_err(|e| WriteError::Transient(e.to_string()))?;
        Ok(())
    }
}

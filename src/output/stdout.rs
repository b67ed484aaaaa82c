//! Stdout output: one JSON line per event, prefixed with time and tag.
//!
//! Unbuffered by default; configured with a `<buffer>` child it becomes a
//! buffered output that prints whole chunk payloads, which is mostly useful
//! for exercising the flush path in development.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;

use crate::buffer::Chunk;
use crate::event::EventStream;
use crate::output::{ChunkWriter, EmitError, Output, WriteError};

/// Unbuffered output printing each event to standard output.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutOutput;

#[async_trait]
impl Output for StdoutOutput {
    fn kind(&self) -> &'static str {
        "stdout"
    }

    fn emit(&self, tag: &str, stream: EventStream) -> Result<(), EmitError> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for event in stream.iter() {
            let record = serde_json::to_string(&event.record)?;
            writeln!(out, "{} {tag}: {record}", event.time)?;
        }
        Ok(())
    }
}

/// Chunk sink printing raw chunk payloads (already framed JSON lines).
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

#[async_trait]
impl ChunkWriter for StdoutSink {
    async fn write(&self, chunk: &Arc<dyn Chunk>) -> Result<(), WriteError> {
        let payload = chunk
            .read()
            .map_err(|e| WriteError::Fatal(e.to_string()))?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        out.write_all(&payload)
            .map_err(|e| WriteError::Transient(e.to_string()))?;
        Ok(())
    }
}

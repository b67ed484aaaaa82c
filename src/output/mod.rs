//! Output plugins and the buffered flush machinery.
//!
//! An output is the terminal collector of a match rule. Unbuffered outputs
//! handle the stream inline; buffered outputs serialize events into a
//! [`crate::buffer::Buffer`] and hand chunks to a [`ChunkWriter`] from a
//! background flusher with retry and exponential backoff.

pub mod buffered;
pub mod file;
pub mod multi;
pub mod null;
pub mod relabel;
pub mod stdout;

pub use buffered::{BufferedOutput, FlushConfig, RetryConfig};
pub use multi::MultiOutput;
pub use null::NullOutput;
pub use relabel::RelabelOutput;
pub use stdout::StdoutOutput;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::buffer::{BufferError, Chunk};
use crate::config::ConfigError;
use crate::event::EventStream;

/// Failure of a downstream chunk write.
///
/// `Transient` feeds the retry/backoff state; `Fatal` makes the flusher drop
/// the offending chunk after logging; `Unknown` is treated as `Transient`.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("transient write failure: {0}")]
    Transient(String),

    #[error("fatal write failure: {0}")]
    Fatal(String),

    #[error("write failure: {0}")]
    Unknown(String),
}

impl WriteError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, WriteError::Fatal(_))
    }
}

/// Error surfaced synchronously to the emit caller.
///
/// Backpressure (`QueueFull`) and oversize rejections travel through the
/// `Buffer` variant so inputs can decide to drop, retry, or buffer
/// upstream. Write failures never appear here; the flusher folds them into
/// its retry state.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("event serialization failed: {0}")]
    Format(#[from] serde_json::Error),

    #[error("emit I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("label `{0}` is not wired to a router")]
    UnwiredLabel(String),
}

/// The downstream sink a buffered output drains into: `write` either
/// delivers the whole chunk or reports how it failed.
#[async_trait]
pub trait ChunkWriter: Send + Sync {
    async fn write(&self, chunk: &Arc<dyn Chunk>) -> Result<(), WriteError>;
}

/// Terminal collector for matched event streams.
///
/// `emit` is synchronous: buffered outputs only serialize and stage bytes
/// there, all slow I/O happens on the flusher task. `start` and `shutdown`
/// bracket the output's lifetime; `observe` exposes the monitoring counters
/// for this plugin instance.
#[async_trait]
pub trait Output: Send + Sync {
    /// Plugin type name (`stdout`, `file`, ...).
    fn kind(&self) -> &'static str;

    fn emit(&self, tag: &str, stream: EventStream) -> Result<(), EmitError>;

    async fn start(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    async fn shutdown(&self) {}

    fn observe(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(self.kind().to_string()));
        map
    }
}

impl std::fmt::Debug for dyn Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output").field("kind", &self.kind()).finish()
    }
}

/// Flush and retry timing knobs shared by buffered outputs; see
/// [`FlushConfig::from_element`] for the attribute names.
pub(crate) const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_MAX_RETRY_WAIT: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_RETRY_LIMIT: u32 = 10;
pub(crate) const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unknown_errors_are_not_fatal() {
        assert!(WriteError::Fatal("x".into()).is_fatal());
        assert!(!WriteError::Transient("x".into()).is_fatal());
        assert!(!WriteError::Unknown("x".into()).is_fatal());
    }

    #[test]
    fn emit_error_wraps_backpressure() {
        let err = EmitError::from(BufferError::QueueFull { limit: 4 });
        assert!(matches!(err, EmitError::Buffer(BufferError::QueueFull { .. })));
        assert!(err.to_string().contains("queue is full"));
    }
}

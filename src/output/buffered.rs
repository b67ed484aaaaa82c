//! The buffered output: serializes events into chunks and drains them from
//! a background flusher with retry and exponential backoff.
//!
//! ```text
//!   emit(tag, stream)                        flusher task
//!        │ serialize + buffer.append              │ notified / interval tick
//!        │         │                              v
//!        │         └── flush trigger ──────> pop -> writer.write(chunk)
//!        │                                        │
//!        │                              success: purge, keep draining
//!        │                              transient: backoff, retry later
//!        │                              fatal: drop chunk, move on
//! ```
//!
//! After `retry_limit` consecutive transient failures the output is declared
//! dead for the cycle: queued chunks are dropped, the failure history is
//! reset, and the next successful write starts with no delay.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::buffer::{lock, Buffer};
use crate::config::{ConfigError, Element};
use crate::event::{Event, EventStream};
use crate::output::{
    ChunkWriter, EmitError, Output, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_RETRY_WAIT,
    DEFAULT_RETRY_LIMIT, DEFAULT_RETRY_WAIT, DEFAULT_SHUTDOWN_GRACE,
};

/// Exponential backoff policy for transient write failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// First backoff step (`retry_wait`, default 1s).
    pub retry_wait: Duration,
    /// Backoff ceiling (`max_retry_wait`, default 60s).
    pub max_retry_wait: Duration,
    /// Consecutive failures before the output gives up and drops its queue
    /// (`retry_limit`, default 10).
    pub retry_limit: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            retry_wait: DEFAULT_RETRY_WAIT,
            max_retry_wait: DEFAULT_MAX_RETRY_WAIT,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl RetryConfig {
    /// Backoff before the next attempt after `failures` consecutive
    /// failures: `retry_wait * 2^(failures-1)`, capped at `max_retry_wait`.
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.retry_wait
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_retry_wait)
    }
}

/// Flush timing and shutdown knobs for a buffered output.
#[derive(Clone, Copy, Debug)]
pub struct FlushConfig {
    /// Periodic flush tick (`flush_interval`, default 60s).
    pub flush_interval: Duration,
    pub retry: RetryConfig,
    /// Drain remaining chunks on shutdown (`flush_at_shutdown`, default true).
    pub flush_at_shutdown: bool,
    /// How long shutdown waits for in-flight work (`shutdown_grace`,
    /// default 10s) before abandoning it to the backing.
    pub shutdown_grace: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        FlushConfig {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retry: RetryConfig::default(),
            flush_at_shutdown: true,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl FlushConfig {
    pub fn from_element(el: &Element) -> Result<Self, ConfigError> {
        let defaults = FlushConfig::default();
        Ok(FlushConfig {
            flush_interval: el.parse_duration_or("flush_interval", defaults.flush_interval)?,
            retry: RetryConfig {
                retry_wait: el.parse_duration_or("retry_wait", defaults.retry.retry_wait)?,
                max_retry_wait: el
                    .parse_duration_or("max_retry_wait", defaults.retry.max_retry_wait)?,
                retry_limit: el.parse_or("retry_limit", defaults.retry.retry_limit)?,
            },
            flush_at_shutdown: el.parse_bool_or("flush_at_shutdown", defaults.flush_at_shutdown)?,
            shutdown_grace: el.parse_duration_or("shutdown_grace", defaults.shutdown_grace)?,
        })
    }
}

/// Monitoring counters shared between the output handle and its flusher.
#[derive(Debug, Default)]
struct FlushMetrics {
    retry_count: AtomicU64,
    last_error_unix: AtomicI64,
}

impl FlushMetrics {
    fn note_error(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
        self.last_error_unix.store(now, Ordering::Relaxed);
    }
}

/// An output that batches events through a [`Buffer`] and flushes chunks to
/// a [`ChunkWriter`] asynchronously.
pub struct BufferedOutput {
    kind: &'static str,
    buffer: Arc<Buffer>,
    writer: Arc<dyn ChunkWriter>,
    config: FlushConfig,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<FlushMetrics>,
}

impl BufferedOutput {
    #[must_use]
    pub fn new(
        kind: &'static str,
        buffer: Buffer,
        writer: Arc<dyn ChunkWriter>,
        config: FlushConfig,
    ) -> Self {
        BufferedOutput {
            kind,
            buffer: Arc::new(buffer),
            writer,
            config,
            notify: Arc::new(Notify::new()),
            stop: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            metrics: Arc::new(FlushMetrics::default()),
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Wakes the flusher outside the normal trigger/tick paths.
    pub fn flush_now(&self) {
        self.notify.notify_one();
    }

    /// One event, one self-delimiting JSON line.
    fn frame(event: &Event) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[async_trait]
impl Output for BufferedOutput {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn emit(&self, tag: &str, stream: EventStream) -> Result<(), EmitError> {
        let mut trigger = false;
        for event in stream.iter() {
            let line = Self::frame(event)?;
            trigger |= self.buffer.append(tag, &line)?;
        }
        if trigger {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), ConfigError> {
        self.buffer.start()?;
        let worker = FlushWorker {
            buffer: Arc::clone(&self.buffer),
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.notify),
            stop: Arc::clone(&self.stop),
            flush_interval: self.config.flush_interval,
            retry: self.config.retry,
            metrics: Arc::clone(&self.metrics),
        };
        *lock(&self.task) = Some(tokio::spawn(worker.run()));
        // resumed state may already have queued work
        if self.buffer.queue_size() > 0 {
            self.notify.notify_one();
        }
        Ok(())
    }

    async fn shutdown(&self) {
        if self.config.flush_at_shutdown {
            for key in self.buffer.keys() {
                if let Err(e) = self.buffer.push(&key) {
                    warn!(key = %key, error = %e, "could not enqueue open chunk at shutdown");
                }
            }
            let drain = async {
                loop {
                    match self.buffer.pop(self.writer.as_ref()).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => {
                            warn!(error = %e, "write failed during shutdown drain");
                            break;
                        }
                    }
                }
            };
            if tokio::time::timeout(self.config.shutdown_grace, drain)
                .await
                .is_err()
            {
                warn!("shutdown drain exceeded the grace period; leaving chunks to the backing");
            }
        }

        self.stop.store(true, Ordering::Release);
        self.notify.notify_one();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if tokio::time::timeout(self.config.shutdown_grace, task)
                .await
                .is_err()
            {
                warn!("flusher did not stop within the grace period; abandoning it");
            }
        }
        self.buffer.shutdown();
    }

    fn observe(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".to_string(), Value::String(self.kind.to_string()));
        map.insert(
            "buffer_queue_length".to_string(),
            Value::from(self.buffer.queue_size()),
        );
        map.insert(
            "buffer_total_queued_bytes".to_string(),
            Value::from(self.buffer.total_queued_bytes()),
        );
        map.insert(
            "retry_count".to_string(),
            Value::from(self.metrics.retry_count.load(Ordering::Relaxed)),
        );
        let last_error = self.metrics.last_error_unix.load(Ordering::Relaxed);
        map.insert(
            "last_error_at".to_string(),
            if last_error == 0 {
                Value::Null
            } else {
                Value::from(last_error)
            },
        );
        map
    }
}

/// The background flusher owned by one buffered output.
struct FlushWorker {
    buffer: Arc<Buffer>,
    writer: Arc<dyn ChunkWriter>,
    notify: Arc<Notify>,
    stop: Arc<AtomicBool>,
    flush_interval: Duration,
    retry: RetryConfig,
    metrics: Arc<FlushMetrics>,
}

impl FlushWorker {
    async fn run(self) {
        let mut error_history: u32 = 0;
        let mut next_retry_at: Option<Instant> = None;
        loop {
            let deadline =
                next_retry_at.unwrap_or_else(|| Instant::now() + self.flush_interval);
            tokio::select! {
                () = self.notify.notified() => {}
                () = tokio::time::sleep_until(deadline) => {}
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            // while backing off, flush triggers are ignored until the gate
            if let Some(at) = next_retry_at {
                if Instant::now() < at {
                    continue;
                }
            }
            self.drain(&mut error_history, &mut next_retry_at).await;
        }
        debug!("flusher stopped");
    }

    /// Pops until the queue is out of work or a transient failure starts a
    /// backoff window.
    async fn drain(&self, error_history: &mut u32, next_retry_at: &mut Option<Instant>) {
        loop {
            match self.buffer.pop(self.writer.as_ref()).await {
                Ok(true) => {
                    *error_history = 0;
                    *next_retry_at = None;
                }
                Ok(false) => {
                    *error_history = 0;
                    *next_retry_at = None;
                    break;
                }
                Err(e) => {
                    self.metrics.note_error();
                    if e.source.is_fatal() {
                        error!(chunk = e.chunk, error = %e.source, "dropping chunk after fatal write error");
                        self.buffer.drop_chunk(e.chunk);
                        continue;
                    }
                    self.metrics.retry_count.fetch_add(1, Ordering::Relaxed);
                    *error_history += 1;
                    if *error_history >= self.retry.retry_limit {
                        let dropped = self.buffer.clear_queue();
                        error!(
                            failures = *error_history,
                            dropped,
                            "too many consecutive write failures; dropped queued chunks"
                        );
                        *error_history = 0;
                        *next_retry_at = None;
                    } else {
                        let backoff = self.retry.backoff(*error_history);
                        warn!(
                            attempt = *error_history,
                            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                            error = %e.source,
                            "chunk write failed, backing off"
                        );
                        *next_retry_at = Some(Instant::now() + backoff);
                    }
                    break;
                }
            }
        }
    }
}

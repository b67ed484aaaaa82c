//! Black-box scenarios for the chunk engine: rotation, flush signalling,
//! queue bounds, parallel pop, and durable resume.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tagrelay::buffer::file::FileBacking;
use tagrelay::buffer::memory::MemoryBacking;
use tagrelay::{Buffer, BufferConfig, BufferError, Chunk, ChunkWriter, WriteError};
use tagrelay::config::ByteSize;

fn buffer_with(
    backing: Box<dyn tagrelay::ChunkBacking>,
    chunk_limit: usize,
    queue_limit: usize,
) -> Buffer {
    Buffer::new(
        BufferConfig {
            chunk_limit: ByteSize(chunk_limit),
            queue_limit,
            parallel_pop: true,
        },
        backing,
    )
}

#[derive(Default)]
struct RecordingSink {
    written: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingSink {
    fn keys(&self) -> Vec<String> {
        self.written
            .lock()
            .expect("lock")
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ChunkWriter for RecordingSink {
    async fn write(&self, chunk: &Arc<dyn Chunk>) -> Result<(), WriteError> {
        let payload = chunk.read().map_err(|e| WriteError::Fatal(e.to_string()))?;
        self.written
            .lock()
            .expect("lock")
            .push((chunk.key().to_string(), payload));
        Ok(())
    }
}

/// Chunk limit 10, queue limit 2, 5-byte records: the engine rotates on the
/// append that does not fit, signals the flusher exactly when the queue
/// transitions from empty, and fails fast once the queue is at its bound.
#[test]
fn rotation_flush_signal_and_queue_full() {
    let buffer = buffer_with(Box::new(MemoryBacking), 10, 2);

    assert!(!buffer.append("k", b"aaaaa").expect("append"));
    assert!(!buffer.append("k", b"aaaaa").expect("append"));
    // third write does not fit: the full chunk moves to the empty queue
    // and the caller is told to wake its flusher
    assert!(buffer.append("k", b"aaaaa").expect("append"));
    assert_eq!(buffer.queue_size(), 1);

    assert!(!buffer.append("k", b"aaaaa").expect("append"));
    // second rotation: queue already non-empty, no second wake-up
    assert!(!buffer.append("k", b"aaaaa").expect("append"));
    assert_eq!(buffer.queue_size(), 2);

    assert!(!buffer.append("k", b"aaaaa").expect("append"));
    let err = buffer.append("k", b"aaaaa").expect_err("queue is full");
    assert!(matches!(err, BufferError::QueueFull { limit: 2 }));
    // the rejected append mutated nothing
    assert_eq!(buffer.queue_size(), 2);
    assert_eq!(buffer.total_queued_bytes(), 30);
}

/// Bytes appended under one key drain in append order across chunks.
#[tokio::test]
async fn per_key_byte_order_is_preserved_across_chunks() {
    let buffer = buffer_with(Box::new(MemoryBacking), 4, 64);
    for chunk in [b"r1r1", b"r2r2", b"r3r3", b"r4r4"] {
        buffer.append("k", chunk).expect("append");
    }
    buffer.push("k").expect("push");

    let sink = RecordingSink::default();
    while buffer.pop(&sink).await.expect("pop") {}

    let written = sink.written.lock().expect("lock");
    let concatenated: Vec<u8> = written.iter().flat_map(|(_, p)| p.clone()).collect();
    assert_eq!(concatenated, b"r1r1r2r2r3r3r4r4");
}

/// Two flushers with `parallel_pop` pick distinct chunks: the queue holds
/// keys a, b, a and concurrent pops write one `a` and the `b` chunk, never
/// the same chunk twice.
#[tokio::test]
async fn parallel_flushers_take_distinct_chunks() {
    let buffer = Arc::new(buffer_with(Box::new(MemoryBacking), 4, 64));
    buffer.append("a", b"a111").expect("append");
    buffer.push("a").expect("push");
    buffer.append("b", b"b111").expect("append");
    buffer.push("b").expect("push");
    buffer.append("a", b"a222").expect("append");
    buffer.push("a").expect("push");
    assert_eq!(buffer.queue_size(), 3);

    struct BarrierSink {
        barrier: tokio::sync::Barrier,
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChunkWriter for BarrierSink {
        async fn write(&self, chunk: &Arc<dyn Chunk>) -> Result<(), WriteError> {
            self.keys
                .lock()
                .expect("lock")
                .push(chunk.key().to_string());
            // both flushers must be inside a write before either finishes
            self.barrier.wait().await;
            Ok(())
        }
    }

    let sink = Arc::new(BarrierSink {
        barrier: tokio::sync::Barrier::new(2),
        keys: Mutex::new(Vec::new()),
    });

    let (first, second) = tokio::join!(buffer.pop(sink.as_ref()), buffer.pop(sink.as_ref()));
    assert!(first.expect("pop"));
    assert!(second.expect("pop"));

    let mut first_round = sink.keys.lock().expect("lock").clone();
    first_round.sort();
    assert_eq!(first_round, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(buffer.queue_size(), 1);
}

/// A transiently failing write leaves the chunk queued; no record is lost
/// and no chunk is delivered twice once the sink recovers.
#[tokio::test]
async fn no_chunk_is_delivered_twice() {
    let buffer = buffer_with(Box::new(MemoryBacking), 4, 64);
    buffer.append("k", b"r1r1").expect("append");
    buffer.append("k", b"r2r2").expect("append");
    buffer.push("k").expect("push");

    struct FlakySink {
        failures_left: AtomicUsize,
        inner: RecordingSink,
    }

    #[async_trait]
    impl ChunkWriter for FlakySink {
        async fn write(&self, chunk: &Arc<dyn Chunk>) -> Result<(), WriteError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(WriteError::Transient("flaky".to_string()));
            }
            self.inner.write(chunk).await
        }
    }

    let sink = FlakySink {
        failures_left: AtomicUsize::new(1),
        inner: RecordingSink::default(),
    };

    let err = buffer.pop(&sink).await.expect_err("first write fails");
    assert!(matches!(err.source, WriteError::Transient(_)));
    assert_eq!(buffer.queue_size(), 2);

    while buffer.pop(&sink).await.expect("pop") {}

    let written = sink.inner.written.lock().expect("lock");
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].1, b"r1r1");
    assert_eq!(written[1].1, b"r2r2");
}

/// File-backed buffers survive a restart: closed chunks come back queued,
/// the open chunk comes back appendable, and nothing is flushed twice.
#[tokio::test]
async fn file_buffer_resumes_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let buffer = buffer_with(
            Box::new(FileBacking::new(dir.path()).expect("backing")),
            8,
            64,
        );
        buffer.append("app.a", b"11111111").expect("append");
        buffer.append("app.a", b"2222").expect("append"); // rotates
        buffer.append("app.b", b"3333").expect("append");
        buffer.shutdown();
    }

    let buffer = buffer_with(
        Box::new(FileBacking::new(dir.path()).expect("backing")),
        8,
        64,
    );
    buffer.start().expect("resume");
    assert_eq!(buffer.queue_size(), 1);
    let mut keys = buffer.keys();
    keys.sort();
    assert_eq!(keys, vec!["app.a".to_string(), "app.b".to_string()]);
    assert_eq!(buffer.total_queued_bytes(), 16);

    // resumed open chunks still accept writes
    buffer.append("app.b", b"4444").expect("append");

    buffer.push("app.a").expect("push");
    buffer.push("app.b").expect("push");
    let sink = RecordingSink::default();
    while buffer.pop(&sink).await.expect("pop") {}

    let mut keys = sink.keys();
    keys.sort();
    assert_eq!(keys, vec!["app.a".to_string(), "app.a".to_string(), "app.b".to_string()]);
    // everything was purged from disk after the successful writes
    assert_eq!(
        std::fs::read_dir(dir.path()).expect("read_dir").count(),
        0
    );
}

//! Durable file-backed chunks.
//!
//! Each chunk is one file in the buffer directory with two lifecycle names:
//! `<key>.b<id>.chunk` while open and `<key>.q<id>.chunk` once enqueued
//! (the rename happens in the enqueue hook, inside the queue sub-lock). The
//! routing key is percent-escaped into the file name, so a crashed process
//! can rebuild both the staged map and the flush queue from a directory
//! scan alone. Shutdown closes files without purging; `resume` picks them
//! up on the next run and re-seeds the chunk id allocator past everything
//! it saw.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::buffer::chunk::{next_chunk_id, reserve_chunk_ids, AdvisoryLock, Chunk, ChunkId};
use crate::buffer::{lock, BufferError, ChunkBacking};

const CHUNK_SUFFIX: &str = ".chunk";

/// Percent-escapes a routing key for use in a file name. Dots are kept as
/// is; the lifecycle marker is always the final dot-segment, so mixed keys
/// stay parseable.
pub(crate) fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(b as char);
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

pub(crate) fn unescape_key(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn chunk_file_name(key: &str, id: ChunkId, queued: bool) -> String {
    let marker = if queued { 'q' } else { 'b' };
    format!("{}.{marker}{id:016x}{CHUNK_SUFFIX}", escape_key(key))
}

/// Parses `<esc-key>.b<id>.chunk` / `<esc-key>.q<id>.chunk`.
fn parse_file_name(name: &str) -> Option<(String, ChunkId, bool)> {
    let stem = name.strip_suffix(CHUNK_SUFFIX)?;
    let (escaped, marker) = stem.rsplit_once('.')?;
    if marker.len() != 17 {
        return None;
    }
    let queued = match marker.as_bytes()[0] {
        b'b' => false,
        b'q' => true,
        _ => return None,
    };
    let id = ChunkId::from_str_radix(&marker[1..], 16).ok()?;
    Some((unescape_key(escaped)?, id, queued))
}

/// One chunk, one file.
#[derive(Debug)]
pub struct FileChunk {
    id: ChunkId,
    key: String,
    path: Mutex<PathBuf>,
    file: Mutex<Option<File>>,
    size: AtomicUsize,
    closed: AtomicBool,
    purged: AtomicBool,
    advisory: AdvisoryLock,
}

impl FileChunk {
    fn create(dir: &Path, key: &str) -> Result<Self, BufferError> {
        let id = next_chunk_id();
        let path = dir.join(chunk_file_name(key, id, false));
        let file = File::create(&path)?;
        Ok(FileChunk {
            id,
            key: key.to_string(),
            path: Mutex::new(path),
            file: Mutex::new(Some(file)),
            size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            purged: AtomicBool::new(false),
            advisory: AdvisoryLock::default(),
        })
    }

    fn resumed(path: PathBuf, key: String, id: ChunkId, queued: bool) -> Result<Self, BufferError> {
        let size = std::fs::metadata(&path)?.len();
        Ok(FileChunk {
            id,
            key,
            path: Mutex::new(path),
            file: Mutex::new(None),
            size: AtomicUsize::new(usize::try_from(size).unwrap_or(usize::MAX)),
            closed: AtomicBool::new(queued),
            purged: AtomicBool::new(false),
            advisory: AdvisoryLock::default(),
        })
    }
}

impl Chunk for FileChunk {
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
        let path = lock(&self.path).clone();
        let mut file = lock(&self.file);
        if file.is_none() {
            // resumed open chunks reopen their file on first append
            *file = Some(OpenOptions::new().append(true).open(&path)?);
        }
        if let Some(f) = file.as_mut() {
            f.write_all(data)?;
        }
        self.size.fetch_add(data.len(), Ordering::AcqRel);
        Ok(())
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn read(&self) -> Result<Vec<u8>, BufferError> {
        if self.purged.load(Ordering::Acquire) {
            return Err(BufferError::ChunkPurged { id: self.id });
        }
        let path = lock(&self.path).clone();
        Ok(std::fs::read(path)?)
    }

    fn close(&self) -> Result<(), BufferError> {
        self.closed.store(true, Ordering::Release);
        if let Some(file) = lock(&self.file).take() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn enqueued(&self) -> Result<(), BufferError> {
        let mut path = lock(&self.path);
        let queued_name = chunk_file_name(&self.key, self.id, true);
        let queued_path = path
            .parent()
            .map_or_else(|| PathBuf::from(&queued_name), |dir| dir.join(&queued_name));
        std::fs::rename(&*path, &queued_path)?;
        *path = queued_path;
        Ok(())
    }

    fn purge(&self) -> Result<(), BufferError> {
        if self.purged.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.store(true, Ordering::Release);
        drop(lock(&self.file).take());
        let path = lock(&self.path).clone();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn advisory(&self) -> &AdvisoryLock {
        &self.advisory
    }
}

/// Backing that keeps one file per chunk under a spool directory.
#[derive(Debug)]
pub struct FileBacking {
    dir: PathBuf,
}

impl FileBacking {
    /// Creates the spool directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, BufferError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileBacking { dir })
    }
}

impl ChunkBacking for FileBacking {
    fn create(&self, key: &str) -> Result<Arc<dyn Chunk>, BufferError> {
        Ok(Arc::new(FileChunk::create(&self.dir, key)?))
    }

    fn resume(&self) -> Result<(Vec<Arc<dyn Chunk>>, Vec<Arc<dyn Chunk>>), BufferError> {
        let mut open: Vec<Arc<dyn Chunk>> = Vec::new();
        let mut queued: Vec<(ChunkId, Arc<dyn Chunk>)> = Vec::new();
        let mut max_id = 0;

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some((key, id, is_queued)) = parse_file_name(name) else {
                if name.ends_with(CHUNK_SUFFIX) {
                    warn!(file = name, "ignoring unparseable chunk file");
                }
                continue;
            };
            max_id = max_id.max(id);
            let chunk = FileChunk::resumed(entry.path(), key, id, is_queued)?;
            if is_queued {
                queued.push((id, Arc::new(chunk)));
            } else {
                open.push(Arc::new(chunk));
            }
        }

        if max_id > 0 {
            reserve_chunk_ids(max_id);
        }
        // ids are allocated in creation order, which matches enqueue order
        // for any single key
        queued.sort_by_key(|(id, _)| *id);
        Ok((open, queued.into_iter().map(|(_, c)| c).collect()))
    }
}

//! Ingestion pipeline: hash-based change detection and per-file processing.
//!
//! Single-writer by design: one worker thread drains the queue, because the
//! inference sessions are not reentrant and serialization makes per-file
//! audit entries totally ordered. The queue is bounded and coalesces on the
//! path key; on overflow the oldest pending work survives and the newcomer
//! is dropped with a warning.

use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;
use tracing::{info, warn};

use crate::embedder::Embedder;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::metadata;
use crate::store::Store;
use crate::thumbs::ThumbnailService;
use crate::types::{
    is_supported_image, normalize_path, now_ts, settings, ImageRecord, IngestOutcome, RecordStatus,
};
use crate::vecmath;

const HASH_CHUNK: usize = 64 * 1024;
const DEFAULT_QUEUE_CAPACITY: usize = 4096;

// ---------------------------------------------------------------------------
// Work queue
// ---------------------------------------------------------------------------

struct QueueState {
    queue: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
    in_flight: bool,
    shutdown: bool,
}

/// Bounded FIFO with path-key coalescing and drain notification.
pub struct IngestQueue {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    idle: Condvar,
    capacity: usize,
}

impl IngestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                queued: HashSet::new(),
                in_flight: false,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a path. Duplicates of a still-pending path coalesce into the
    /// existing entry; a full queue keeps its oldest entries and rejects the
    /// newcomer. Returns whether the path is (now) queued.
    pub fn push(&self, path: PathBuf) -> bool {
        let mut state = self.state.lock().expect("queue lock");
        if state.shutdown {
            return false;
        }
        if state.queued.contains(&path) {
            return true;
        }
        if state.queue.len() >= self.capacity {
            warn!(path = %path.display(), "ingest queue full, dropping event");
            return false;
        }
        state.queued.insert(path.clone());
        state.queue.push_back(path);
        drop(state);
        self.work_ready.notify_one();
        true
    }

    /// Blocking pop for the worker. `None` means shutdown.
    fn pop(&self) -> Option<PathBuf> {
        let mut state = self.state.lock().expect("queue lock");
        loop {
            if let Some(path) = state.queue.pop_front() {
                state.queued.remove(&path);
                state.in_flight = true;
                return Some(path);
            }
            if state.shutdown {
                return None;
            }
            state = self.work_ready.wait(state).expect("queue lock");
        }
    }

    fn done(&self) {
        let mut state = self.state.lock().expect("queue lock");
        state.in_flight = false;
        if state.queue.is_empty() {
            self.idle.notify_all();
        }
        drop(state);
    }

    /// Block until the queue is drained and the worker is between items.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock().expect("queue lock");
        while !state.shutdown && (!state.queue.is_empty() || state.in_flight) {
            state = self.idle.wait(state).expect("queue lock");
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("queue lock");
        state.shutdown = true;
        drop(state);
        self.work_ready.notify_all();
        self.idle.notify_all();
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Live counters for `/index/status`.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub total_indexed: u64,
    pub favorites_count: u64,
    pub processed_count: u64,
    pub error_count: u64,
    pub current_file: Option<String>,
    pub last_run_time: Option<i64>,
}

pub struct IngestPipeline {
    store: Arc<Store>,
    index: Arc<VectorIndex>,
    embedder: Arc<Embedder>,
    thumbs: ThumbnailService,
    queue: IngestQueue,
    processed: AtomicU64,
    errors: AtomicU64,
    current_file: Mutex<Option<String>>,
    last_run: AtomicI64,
    reindexing: AtomicBool,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<Store>,
        index: Arc<VectorIndex>,
        embedder: Arc<Embedder>,
        thumbs: ThumbnailService,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            thumbs,
            queue: IngestQueue::new(DEFAULT_QUEUE_CAPACITY),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            current_file: Mutex::new(None),
            last_run: AtomicI64::new(0),
            reindexing: AtomicBool::new(false),
        }
    }

    /// Spawn the single ingestion worker.
    pub fn spawn_worker(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        let pipeline = Arc::clone(self);
        std::thread::Builder::new()
            .name("ingest-worker".into())
            .spawn(move || {
                while let Some(path) = pipeline.queue.pop() {
                    pipeline.process_file(&path);
                    pipeline.queue.done();
                }
            })
            .expect("spawn ingest worker")
    }

    pub fn enqueue(&self, path: PathBuf) {
        self.queue.push(path);
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    /// Full per-file procedure. Exposed so tests (and the bulk path) can run
    /// it synchronously; the worker thread is the only steady caller.
    pub fn process_file(&self, path: &Path) -> IngestOutcome {
        let started = Instant::now();
        let normalized = normalize_path(path);
        let path_str = normalized.to_string_lossy().to_string();
        *self.current_file.lock().expect("current file lock") = Some(path_str.clone());

        let outcome = match self.process_inner(&normalized, &path_str) {
            Ok(outcome) => outcome,
            Err(e) => IngestOutcome::Error(e.to_string()),
        };

        match &outcome {
            IngestOutcome::Success => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            IngestOutcome::Error(msg) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path_str, error = %msg, "ingest failed");
            }
            IngestOutcome::Skipped => {}
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.last_run.store(now_ts(), Ordering::Relaxed);
        *self.current_file.lock().expect("current file lock") = None;
        if let Err(e) = self.store.append_audit(&path_str, &outcome, duration_ms, now_ts()) {
            warn!(error = %e, "failed to write audit entry");
        }
        info!(path = %path_str, outcome = outcome.as_str(), ms = duration_ms, "ingest");
        outcome
    }

    fn process_inner(&self, path: &Path, path_str: &str) -> Result<IngestOutcome> {
        let content_hash = hash_file(path)?;
        let existing = self.store.find_by_path(path_str)?;

        let exif_on = self.store.bool_setting(settings::EXIF_ENABLED, true);
        let exif_needed =
            exif_on && !existing.as_ref().map(|r| r.exif_parsed()).unwrap_or(false);
        let embed_needed = match &existing {
            None => true,
            Some(r) => {
                r.embedding.is_none() || r.content_hash.as_deref() != Some(content_hash.as_str())
            }
        };

        if !exif_needed && !embed_needed {
            return Ok(IngestOutcome::Skipped);
        }

        let mut record = existing.unwrap_or_else(|| ImageRecord::new(path_str.to_string()));
        let fs_meta = std::fs::metadata(path)?;
        record.size_bytes = fs_meta.len();
        record.modified_at = fs_meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);

        if embed_needed {
            match self.thumbs.create(path) {
                Ok(thumb) => record.thumbnail_path = Some(thumb.display().to_string()),
                Err(e) => warn!(path = %path_str, error = %e, "thumbnail failed"),
            }
            if let Ok((w, h)) = image::image_dimensions(path) {
                record.width = Some(w);
                record.height = Some(h);
            }
        }

        if exif_needed {
            let camera = metadata::extract(path);
            if let Some(obj) = record.meta.as_object_mut() {
                for (key, value) in camera.fields {
                    obj.insert(key, value);
                }
                obj.insert("exif_parsed".into(), serde_json::Value::Bool(true));
            } else {
                let mut obj = camera.fields;
                obj.insert("exif_parsed".into(), serde_json::Value::Bool(true));
                record.meta = serde_json::Value::Object(obj);
            }
            if camera.latitude.is_some() {
                record.latitude = camera.latitude;
                record.longitude = camera.longitude;
            }
        }

        let mut fresh_vector = None;
        if embed_needed && self.embedder.is_ready() {
            if let Some(vector) = self.embedder.embed_image(path) {
                record.embedding = Some(vecmath::to_bytes(&vector));
                fresh_vector = Some(vector);
            }
        }

        record.content_hash = Some(content_hash);
        record.indexed_at = Some(now_ts());
        record.status = RecordStatus::Indexed;
        self.store.save(&mut record)?;

        // Synchronous upsert so the new item is queryable immediately.
        if let Some(vector) = fresh_vector {
            self.index.upsert(record.id, vector);
        }
        Ok(IngestOutcome::Success)
    }

    /// Observed deletion on disk: thumbnail, vector entry, durable record.
    pub fn remove_deleted(&self, path: &Path) {
        let normalized = normalize_path(path);
        let path_str = normalized.to_string_lossy().to_string();
        match self.store.find_by_path(&path_str) {
            Ok(Some(record)) => self.remove_record(&record),
            Ok(None) => {}
            Err(e) => warn!(path = %path_str, error = %e, "lookup for deletion failed"),
        }
    }

    /// Remove a record (and its thumbnail and vector entry) without touching
    /// the source file.
    pub fn remove_record(&self, record: &ImageRecord) {
        self.thumbs.delete(Path::new(&record.path));
        self.index.remove(record.id);
        if let Err(e) = self.store.delete(record.id) {
            warn!(id = record.id, error = %e, "failed to delete record");
            return;
        }
        info!(id = record.id, path = %record.path, "removed");
    }

    /// Bulk reindex: walk the roots, enqueue every supported file, wait for
    /// the worker to drain, then rebuild the vector index from the store so
    /// the in-memory set is exactly the durable set.
    pub fn reindex_all(self: &Arc<Self>, roots: Vec<PathBuf>) {
        if self.reindexing.swap(true, Ordering::SeqCst) {
            info!("reindex already in progress");
            return;
        }
        let pipeline = Arc::clone(self);
        std::thread::Builder::new()
            .name("bulk-reindex".into())
            .spawn(move || {
                let started = Instant::now();
                let mut scheduled = 0usize;
                for root in &roots {
                    let walk = ignore::WalkBuilder::new(root)
                        .standard_filters(false)
                        .hidden(true)
                        .follow_links(false)
                        .build();
                    for entry in walk.flatten() {
                        let path = entry.path();
                        if entry.file_type().map(|t| t.is_file()).unwrap_or(false)
                            && is_supported_image(path)
                        {
                            pipeline.enqueue(path.to_path_buf());
                            scheduled += 1;
                        }
                    }
                }
                pipeline.queue.wait_idle();
                match pipeline.store.find_all_embeddings() {
                    Ok(rows) => pipeline.index.load_all(rows),
                    Err(e) => warn!(error = %e, "failed to reload vector index"),
                }
                info!(
                    files = scheduled,
                    ms = started.elapsed().as_millis() as u64,
                    "bulk reindex complete"
                );
                pipeline.reindexing.store(false, Ordering::SeqCst);
            })
            .expect("spawn reindex thread");
    }

    pub fn status(&self) -> Result<IndexStatus> {
        let last_run = self.last_run.load(Ordering::Relaxed);
        Ok(IndexStatus {
            total_indexed: self.store.count_indexed()?,
            favorites_count: self.store.count_favorites()?,
            processed_count: self.processed.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
            current_file: self.current_file.lock().expect("current file lock").clone(),
            last_run_time: (last_run != 0).then_some(last_run),
        })
    }
}

/// SHA-256 of the file contents, streamed in 64 KiB chunks.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_file_known_value() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_queue_coalesces_duplicates() {
        let q = IngestQueue::new(16);
        assert!(q.push(PathBuf::from("/a.jpg")));
        assert!(q.push(PathBuf::from("/a.jpg")));
        assert!(q.push(PathBuf::from("/b.jpg")));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_queue_overflow_keeps_oldest() {
        let q = IngestQueue::new(2);
        assert!(q.push(PathBuf::from("/1.jpg")));
        assert!(q.push(PathBuf::from("/2.jpg")));
        assert!(!q.push(PathBuf::from("/3.jpg")));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().unwrap(), PathBuf::from("/1.jpg"));
    }

    #[test]
    fn test_queue_pop_order_and_requeue_after_pop() {
        let q = IngestQueue::new(16);
        q.push(PathBuf::from("/a.jpg"));
        let popped = q.pop().unwrap();
        assert_eq!(popped, PathBuf::from("/a.jpg"));
        // Once popped, the same path may be queued again.
        assert!(q.push(PathBuf::from("/a.jpg")));
        assert_eq!(q.len(), 1);
        q.done();
    }

    #[test]
    fn test_queue_shutdown_unblocks_pop() {
        let q = Arc::new(IngestQueue::new(16));
        let q2 = Arc::clone(&q);
        let handle = std::thread::spawn(move || q2.pop());
        std::thread::sleep(std::time::Duration::from_millis(50));
        q.shutdown();
        assert!(handle.join().unwrap().is_none());
        // Pushes after shutdown are refused.
        assert!(!q.push(PathBuf::from("/late.jpg")));
    }

    #[test]
    fn test_wait_idle_returns_when_drained() {
        let q = Arc::new(IngestQueue::new(16));
        q.push(PathBuf::from("/a.jpg"));
        let worker = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                while let Some(_path) = q.pop() {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    q.done();
                    if q.is_empty() {
                        break;
                    }
                }
            })
        };
        q.wait_idle();
        assert!(q.is_empty());
        worker.join().unwrap();
    }
}

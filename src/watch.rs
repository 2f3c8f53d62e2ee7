//! Filesystem watcher for live incremental indexing.
//!
//! Watches every active folder recursively and feeds the ingestion pipeline:
//! create/modify events are debounced per path through a pending map, delete
//! events flow through immediately so the index never lags the disk. The
//! loop runs on one dedicated thread that also owns the pending map; folder
//! add/remove arrives over a command channel.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::ingest::IngestPipeline;
use crate::store::Store;
use crate::types::{is_supported_image, settings};

/// Debounce window: a path is handed to ingestion once it has been quiet
/// this long.
pub const DEBOUNCE_MS: u64 = 1500;

/// Event-poll timeout; pending entries are flushed on every iteration.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub enum WatchCommand {
    Add(PathBuf),
    Remove(PathBuf),
}

/// Control handle for the watcher thread.
pub struct WatcherHandle {
    commands: mpsc::Sender<WatchCommand>,
    stop: Arc<AtomicBool>,
}

impl WatcherHandle {
    pub fn watch_folder(&self, path: PathBuf) {
        let _ = self.commands.send(WatchCommand::Add(path));
    }

    pub fn unwatch_folder(&self, path: PathBuf) {
        let _ = self.commands.send(WatchCommand::Remove(path));
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Start the watcher thread over the given roots. The returned handle adds
/// and removes folders and signals shutdown; the join handle outlives the
/// notify registration (dropping the watcher closes the OS handle).
pub fn start_watcher(
    pipeline: Arc<IngestPipeline>,
    store: Arc<Store>,
    roots: Vec<PathBuf>,
) -> (Arc<WatcherHandle>, std::thread::JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel::<WatchCommand>();
    let stop = Arc::new(AtomicBool::new(false));
    let handle = Arc::new(WatcherHandle { commands: command_tx, stop: Arc::clone(&stop) });

    let join = std::thread::Builder::new()
        .name("folder-watcher".into())
        .spawn(move || watch_loop(pipeline, store, roots, command_rx, stop))
        .expect("spawn watcher thread");

    (handle, join)
}

fn watch_loop(
    pipeline: Arc<IngestPipeline>,
    store: Arc<Store>,
    roots: Vec<PathBuf>,
    commands: mpsc::Receiver<WatchCommand>,
    stop: Arc<AtomicBool>,
) {
    let (event_tx, event_rx) = mpsc::channel::<Event>();
    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = event_tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to create file watcher");
            return;
        }
    };

    for root in &roots {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => info!(root = %root.display(), "watching"),
            Err(e) => warn!(root = %root.display(), error = %e, "failed to watch"),
        }
    }

    let debounce = Duration::from_millis(DEBOUNCE_MS);
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    while !stop.load(Ordering::SeqCst) {
        // Folder add/remove from the settings API.
        while let Ok(command) = commands.try_recv() {
            match command {
                WatchCommand::Add(path) => match watcher.watch(&path, RecursiveMode::Recursive) {
                    Ok(()) => info!(root = %path.display(), "watching"),
                    Err(e) => warn!(root = %path.display(), error = %e, "failed to watch"),
                },
                WatchCommand::Remove(path) => {
                    if let Err(e) = watcher.unwatch(&path) {
                        warn!(root = %path.display(), error = %e, "failed to unwatch");
                    }
                    pending.retain(|p, _| !p.starts_with(&path));
                }
            }
        }

        match event_rx.recv_timeout(POLL_TIMEOUT) {
            Ok(event) => handle_event(event, &pipeline, &store, &mut pending),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        // Flush on every iteration, idle polls included.
        for path in take_ready(&mut pending, Instant::now(), debounce) {
            pipeline.enqueue(path);
        }
    }
    info!("watcher stopped");
}

fn handle_event(
    event: Event,
    pipeline: &IngestPipeline,
    store: &Store,
    pending: &mut HashMap<PathBuf, Instant>,
) {
    match event.kind {
        EventKind::Remove(_) => {
            // Deletions bypass the debounce and the auto-index toggle so the
            // index stays consistent with the disk.
            for path in &event.paths {
                if is_supported_image(path) {
                    pipeline.remove_deleted(path);
                }
            }
        }
        EventKind::Create(_) | EventKind::Modify(_) => {
            if !store.bool_setting(settings::AUTO_INDEX, true) {
                return;
            }
            let now = Instant::now();
            for path in &event.paths {
                if path.is_dir() {
                    // A directory appeared (created or moved in). Recursion is
                    // covered by the recursive registration; files it brought
                    // along never produce their own events, so schedule them.
                    schedule_tree(path, pending, now);
                } else if is_supported_image(path) && path.exists() {
                    pending.insert(path.clone(), now);
                }
            }
        }
        _ => {}
    }
}

fn schedule_tree(root: &Path, pending: &mut HashMap<PathBuf, Instant>, now: Instant) {
    let walk = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .hidden(true)
        .follow_links(false)
        .build();
    for entry in walk.flatten() {
        let path = entry.path();
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) && is_supported_image(path) {
            pending.insert(path.to_path_buf(), now);
        }
    }
}

/// Drain every pending entry older than the debounce window. Later events on
/// the same path overwrite the timestamp, so a burst flushes as one item.
fn take_ready(
    pending: &mut HashMap<PathBuf, Instant>,
    now: Instant,
    debounce: Duration,
) -> Vec<PathBuf> {
    let ready: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, seen)| now.duration_since(**seen) >= debounce)
        .map(|(path, _)| path.clone())
        .collect();
    for path in &ready {
        pending.remove(path);
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_coalesces_to_one_flush() {
        let mut pending = HashMap::new();
        let start = Instant::now();
        let debounce = Duration::from_millis(1500);

        // Five rapid modify events on one path within the window.
        for i in 0..5 {
            pending.insert(PathBuf::from("/p.jpg"), start + Duration::from_millis(i * 100));
        }
        assert_eq!(pending.len(), 1);

        // Not yet quiet for the full window: nothing flushes.
        let early = take_ready(&mut pending, start + Duration::from_millis(1800), debounce);
        assert!(early.is_empty());

        // Quiet long enough: exactly one ingestion call.
        let ready = take_ready(&mut pending, start + Duration::from_millis(2000), debounce);
        assert_eq!(ready, vec![PathBuf::from("/p.jpg")]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_ready_leaves_fresh_entries() {
        let mut pending = HashMap::new();
        let start = Instant::now();
        let debounce = Duration::from_millis(1500);
        pending.insert(PathBuf::from("/old.jpg"), start);
        pending.insert(PathBuf::from("/new.jpg"), start + Duration::from_millis(1000));

        let ready = take_ready(&mut pending, start + Duration::from_millis(1600), debounce);
        assert_eq!(ready, vec![PathBuf::from("/old.jpg")]);
        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key(&PathBuf::from("/new.jpg")));
    }
}

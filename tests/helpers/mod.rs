//! Shared test harness: a real pipeline over a temp data directory and an
//! in-memory-sized SQLite store, with image fixtures generated on the fly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use photoscope::embedder::Embedder;
use photoscope::index::VectorIndex;
use photoscope::ingest::IngestPipeline;
use photoscope::store::Store;
use photoscope::thumbs::ThumbnailService;

pub struct TestHarness {
    pub store: Arc<Store>,
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<Embedder>,
    pub pipeline: Arc<IngestPipeline>,
    /// Root folder for image fixtures.
    pub root: PathBuf,
    _tmp: tempfile::TempDir,
}

impl TestHarness {
    /// Fresh harness with no models loaded (the common case for tests — the
    /// encoder weights are not available in CI).
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("photos");
        std::fs::create_dir_all(&root).expect("photos dir");

        let store = Arc::new(Store::open(&tmp.path().join("test.db")).expect("store"));
        let index = Arc::new(VectorIndex::new());
        let embedder = Arc::new(Embedder::new());
        let thumbs =
            ThumbnailService::new(tmp.path().join("thumbnails"), 64).expect("thumb service");
        let pipeline = IngestPipeline::new(
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&embedder),
            thumbs,
        );

        Self {
            store,
            index,
            embedder,
            pipeline: Arc::new(pipeline),
            root,
            _tmp: tmp,
        }
    }

    /// Write a small solid-color PNG fixture under the photos root.
    pub fn write_image(&self, name: &str, rgb: [u8; 3]) -> PathBuf {
        let path = self.root.join(name);
        write_png(&path, rgb);
        path
    }
}

pub fn write_png(path: &Path, rgb: [u8; 3]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("fixture dir");
    }
    image::RgbImage::from_pixel(32, 24, image::Rgb(rgb)).save(path).expect("fixture image");
}

/// Poll until `check` passes or the timeout elapses.
pub fn wait_until(timeout: std::time::Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(25));
    }
    check()
}

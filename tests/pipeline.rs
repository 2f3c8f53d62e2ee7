//! Integration tests for the ingestion pipeline against a real store,
//! thumbnail directory, and vector index (no encoder models — embedding is
//! exercised only through its absence, which must never block indexing).

mod helpers;

use helpers::{wait_until, TestHarness};
use photoscope::types::{IngestOutcome, RecordStatus};
use photoscope::vecmath;
use std::time::Duration;

#[test]
fn test_first_sight_creates_record_and_thumbnail() {
    let h = TestHarness::new();
    let path = h.write_image("sunset.png", [200, 120, 40]);

    let outcome = h.pipeline.process_file(&path);
    assert_eq!(outcome, IngestOutcome::Success);

    let record = h.store.find_by_path(&path.to_string_lossy()).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Indexed);
    assert_eq!(record.width, Some(32));
    assert_eq!(record.height, Some(24));
    assert!(record.size_bytes > 0);
    assert!(record.content_hash.is_some());
    assert!(record.indexed_at.is_some());
    // No models loaded: the record is saved without an embedding and the
    // file stays searchable by filename.
    assert!(record.embedding.is_none());

    let thumb = record.thumbnail_path.expect("thumbnail path");
    let thumb_meta = std::fs::metadata(&thumb).unwrap();
    assert!(thumb_meta.len() > 0);

    // EXIF pass ran (and found nothing in a bare PNG) and marked the blob.
    assert_eq!(record.meta["exif_parsed"], true);

    let audit = h.store.recent_audit(10).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].status, "success");
}

#[test]
fn test_unchanged_file_with_embedding_skips() {
    let h = TestHarness::new();
    let path = h.write_image("cat.png", [10, 10, 10]);

    assert_eq!(h.pipeline.process_file(&path), IngestOutcome::Success);

    // Simulate a completed embedding pass so nothing is left to do.
    let mut record = h.store.find_by_path(&path.to_string_lossy()).unwrap().unwrap();
    let mut vector = vec![0.6f32, 0.8];
    vecmath::l2_normalize(&mut vector);
    record.embedding = Some(vecmath::to_bytes(&vector));
    h.store.save(&mut record).unwrap();
    let indexed_at_before = record.indexed_at;

    assert_eq!(h.pipeline.process_file(&path), IngestOutcome::Skipped);

    let after = h.store.find_by_path(&path.to_string_lossy()).unwrap().unwrap();
    assert_eq!(after.indexed_at, indexed_at_before);

    let audit = h.store.recent_audit(10).unwrap();
    assert_eq!(audit[0].status, "skipped");
}

#[test]
fn test_content_change_reprocesses() {
    let h = TestHarness::new();
    let path = h.write_image("dog.png", [1, 2, 3]);
    assert_eq!(h.pipeline.process_file(&path), IngestOutcome::Success);
    let first = h.store.find_by_path(&path.to_string_lossy()).unwrap().unwrap();

    // Same path, new contents: the hash changes, so the file is reprocessed
    // even though EXIF was already parsed.
    helpers::write_png(&path, [200, 200, 200]);
    assert_eq!(h.pipeline.process_file(&path), IngestOutcome::Success);
    let second = h.store.find_by_path(&path.to_string_lossy()).unwrap().unwrap();
    assert_eq!(second.id, first.id, "same path keeps the same record id");
    assert_ne!(second.content_hash, first.content_hash);
}

#[test]
fn test_missing_file_is_error_outcome() {
    let h = TestHarness::new();
    let ghost = h.root.join("ghost.png");
    let outcome = h.pipeline.process_file(&ghost);
    assert!(matches!(outcome, IngestOutcome::Error(_)));

    let audit = h.store.recent_audit(10).unwrap();
    assert_eq!(audit[0].status, "error");
    assert!(audit[0].message.is_some());
    // Per-file errors never abort anything beyond that file.
    let ok = h.write_image("fine.png", [9, 9, 9]);
    assert_eq!(h.pipeline.process_file(&ok), IngestOutcome::Success);
}

#[test]
fn test_remove_deleted_clears_everything() {
    let h = TestHarness::new();
    let path = h.write_image("gone.png", [5, 5, 5]);
    assert_eq!(h.pipeline.process_file(&path), IngestOutcome::Success);

    let record = h.store.find_by_path(&path.to_string_lossy()).unwrap().unwrap();
    let thumb = record.thumbnail_path.clone().unwrap();
    // Put a vector entry in place to confirm it is removed too.
    h.index.upsert(record.id, vec![1.0, 0.0]);

    std::fs::remove_file(&path).unwrap();
    h.pipeline.remove_deleted(&path);

    assert!(h.store.find_by_path(&path.to_string_lossy()).unwrap().is_none());
    assert!(!std::path::Path::new(&thumb).exists());
    assert_eq!(h.index.len(), 0);
}

#[test]
fn test_worker_drains_queue() {
    let h = TestHarness::new();
    let _worker = h.pipeline.spawn_worker();

    for (name, color) in [("a.png", [1, 0, 0]), ("b.png", [0, 1, 0]), ("c.png", [0, 0, 1])] {
        let path = h.write_image(name, color);
        h.pipeline.enqueue(path);
    }

    assert!(
        wait_until(Duration::from_secs(10), || {
            h.store.count_indexed().map(|n| n == 3).unwrap_or(false)
        }),
        "worker should index all three files"
    );

    let status = h.pipeline.status().unwrap();
    assert_eq!(status.total_indexed, 3);
    assert_eq!(status.processed_count, 3);
    assert_eq!(status.error_count, 0);
    assert!(status.last_run_time.is_some());

    h.pipeline.shutdown();
}

#[test]
fn test_bulk_reindex_walks_tree_and_reloads_index() {
    let h = TestHarness::new();
    let _worker = h.pipeline.spawn_worker();

    h.write_image("top.png", [10, 20, 30]);
    h.write_image("album/nested.png", [40, 50, 60]);
    h.write_image("album/deep/leaf.png", [70, 80, 90]);
    // Unsupported files are walked over but never indexed.
    std::fs::write(h.root.join("notes.txt"), b"not an image").unwrap();

    h.pipeline.reindex_all(vec![h.root.clone()]);

    assert!(
        wait_until(Duration::from_secs(10), || {
            h.store.count_indexed().map(|n| n == 3).unwrap_or(false)
        }),
        "reindex should pick up all nested images"
    );
    assert!(h.store.find_by_path(&h.root.join("notes.txt").to_string_lossy()).unwrap().is_none());

    h.pipeline.shutdown();
}

#[test]
fn test_exif_toggle_off_skips_metadata_pass() {
    let h = TestHarness::new();
    h.store.set_setting("exif_enabled", "false").unwrap();
    let path = h.write_image("raw.png", [1, 1, 1]);
    assert_eq!(h.pipeline.process_file(&path), IngestOutcome::Success);

    let record = h.store.find_by_path(&path.to_string_lossy()).unwrap().unwrap();
    assert!(record.meta.get("exif_parsed").is_none());
}

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Raster formats accepted for indexing.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

/// Reserved tag that mirrors the favorite flag for tag search.
pub const FAVORITE_TAG: &str = "__sys_favorite__";

/// True iff the path carries one of the accepted raster extensions.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Image records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Indexed,
    Error,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Indexed => "indexed",
            RecordStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "indexed" => RecordStatus::Indexed,
            "error" => RecordStatus::Error,
            _ => RecordStatus::Pending,
        }
    }
}

/// One indexed image. Identity is the numeric id; the uniqueness key is the
/// normalized absolute path. Timestamps are unix seconds (UTC).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: i64,
    pub path: String,
    pub thumbnail_path: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: u64,
    pub content_hash: Option<String>,
    pub modified_at: Option<i64>,
    pub indexed_at: Option<i64>,
    /// Raw little-endian float32 bytes, length `D * 4`. Not serialized to
    /// HTTP responses.
    #[serde(skip)]
    pub embedding: Option<Vec<u8>>,
    /// Opaque JSON blob: user tags, parsed camera metadata, `exif_parsed`.
    pub meta: serde_json::Value,
    pub status: RecordStatus,
    pub favorite: bool,
    pub blurred: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl ImageRecord {
    /// Fresh record for a path seen for the first time.
    pub fn new(path: String) -> Self {
        Self {
            id: 0,
            path,
            thumbnail_path: None,
            width: None,
            height: None,
            size_bytes: 0,
            content_hash: None,
            modified_at: None,
            indexed_at: None,
            embedding: None,
            meta: serde_json::json!({}),
            status: RecordStatus::Pending,
            favorite: false,
            blurred: false,
            latitude: None,
            longitude: None,
        }
    }

    pub fn exif_parsed(&self) -> bool {
        self.meta
            .get("exif_parsed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Lowercased user tags from the opaque blob.
    pub fn tags_lower(&self) -> Vec<String> {
        self.meta
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t.as_str())
                    .map(|t| t.to_lowercase())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Watched folders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedFolder {
    pub id: i64,
    pub path: String,
    pub active: bool,
    pub added_at: i64,
}

// ---------------------------------------------------------------------------
// Ingestion outcomes and audit log
// ---------------------------------------------------------------------------

/// Result of one per-file ingestion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Success,
    Skipped,
    Error(String),
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Success => "success",
            IngestOutcome::Skipped => "skipped",
            IngestOutcome::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: i64,
    pub path: String,
    pub status: String,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub at: i64,
}

// ---------------------------------------------------------------------------
// Weights download progress (closed status set, serialized as strings at the
// HTTP boundary)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadStatus {
    Started,
    Downloading,
    Retrying,
    FileComplete,
    Loading,
    Ready,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub status: DownloadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub bytes_so_far: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    pub message: String,
}

impl ProgressEvent {
    pub fn status_only(status: DownloadStatus, message: impl Into<String>) -> Self {
        Self { status, file: None, bytes_so_far: 0, total_bytes: None, message: message.into() }
    }
}

// ---------------------------------------------------------------------------
// Search filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub min_score: Option<f32>,
    pub folder_path: Option<String>,
    /// Inclusive, `YYYY-MM-DD`.
    pub date_from: Option<chrono::NaiveDate>,
    pub date_to: Option<chrono::NaiveDate>,
    pub tags: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Settings keys (string key-value rows in the settings table)
// ---------------------------------------------------------------------------

pub mod settings {
    /// Vault-sealed HuggingFace credential.
    pub const HF_TOKEN: &str = "hf_token";
    /// Encoder repository override.
    pub const MODEL_REPO: &str = "model_repo";
    pub const EXIF_ENABLED: &str = "exif_enabled";
    pub const EXIF_VISIBLE: &str = "exif_visible";
    pub const MAP_VISIBLE: &str = "map_visible";
    pub const AUTO_INDEX: &str = "auto_index";
    /// Default similarity cutoff for text search, float in [0, 1].
    pub const SIMILARITY_CUTOFF: &str = "similarity_cutoff";
    /// Whether visual search applies the similarity cutoff too.
    pub const VISUAL_MIN_SCORE: &str = "visual_min_score";

    pub const DEFAULT_SIMILARITY_CUTOFF: f32 = 0.24;
}

// ---------------------------------------------------------------------------
// Application context — explicitly-owned long-lived services, passed by
// reference (no ambient singletons)
// ---------------------------------------------------------------------------

/// On-disk layout for one data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: std::path::PathBuf,
    pub models_dir: std::path::PathBuf,
    pub thumbs_dir: std::path::PathBuf,
    pub db_path: std::path::PathBuf,
}

impl AppPaths {
    pub fn new(data_dir: std::path::PathBuf) -> Self {
        let models_dir = data_dir.join("models");
        let thumbs_dir = data_dir.join("thumbnails");
        let db_path = data_dir.join("photoscope.db");
        Self { data_dir, models_dir, thumbs_dir, db_path }
    }
}

/// Axum application state tying the long-lived services together.
#[derive(Clone)]
pub struct AppContext {
    pub paths: Arc<AppPaths>,
    pub store: Arc<crate::store::Store>,
    pub index: Arc<crate::index::VectorIndex>,
    pub embedder: Arc<crate::embedder::Embedder>,
    pub fetcher: Arc<crate::fetcher::WeightsFetcher>,
    pub pipeline: Arc<crate::ingest::IngestPipeline>,
    pub watcher: Arc<crate::watch::WatcherHandle>,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Current unix time in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Normalize a path to absolute form with platform separators. Uses
/// `canonicalize` when the file exists, otherwise joins onto the current
/// directory and lexically removes `.`/`..` components.
pub fn normalize_path(path: &Path) -> std::path::PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    let mut normalized = std::path::PathBuf::new();
    for comp in absolute.components() {
        match comp {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

//! HTTP API handlers.
//!
//! JSON over HTTP; error bodies always carry `{error: <string>}` with the
//! status mapping from [`crate::error::Error`]. Routes are mounted by
//! `main.rs`.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::info;

use crate::error::{Error, Result};
use crate::query::QueryEngine;
use crate::types::{normalize_path, now_ts, settings, AppContext, SearchFilters, FAVORITE_TAG};
use crate::vault;

/// Idle cutoff for progress-stream subscribers.
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 500;

fn engine(ctx: &AppContext) -> QueryEngine {
    QueryEngine::new(ctx.store.clone(), ctx.index.clone(), ctx.embedder.clone())
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "modelsReady": ctx.embedder.is_ready(),
        "indexedVectors": ctx.index.len(),
    }))
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
    pub filters: Option<SearchFilters>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn search(
    State(ctx): State<AppContext>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>> {
    let limit = clamp_limit(body.limit);
    let offset = body.offset.unwrap_or(0);
    let outcome = engine(&ctx).search_text(&body.query, body.filters, limit, offset)?;
    let count = outcome.results.len();
    Ok(Json(json!({
        "results": outcome.results,
        "count": count,
        "totalCount": outcome.total_count,
        "query": outcome.clean_query,
    })))
}

pub async fn search_image(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let mut file_bytes: Option<axum::body::Bytes> = None;
    let mut limit = DEFAULT_LIMIT;
    let mut filters: Option<SearchFilters> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidInput(e.to_string()))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                file_bytes =
                    Some(field.bytes().await.map_err(|e| Error::InvalidInput(e.to_string()))?);
            }
            Some("limit") => {
                if let Ok(text) = field.text().await {
                    if let Ok(parsed) = text.parse() {
                        limit = parsed;
                    }
                }
            }
            Some("filters") => {
                if let Ok(text) = field.text().await {
                    filters = serde_json::from_str(&text).ok();
                }
            }
            _ => {}
        }
    }

    let bytes =
        file_bytes.ok_or_else(|| Error::InvalidInput("missing multipart field 'file'".into()))?;
    let results = engine(&ctx).search_image(&bytes, filters, limit.min(MAX_LIMIT))?;
    let count = results.len();
    Ok(Json(json!({ "results": results, "count": count })))
}

#[derive(Deserialize)]
pub struct TagQuery {
    pub tag: String,
    pub limit: Option<usize>,
}

pub async fn search_tags(
    State(ctx): State<AppContext>,
    Query(q): Query<TagQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = clamp_limit(q.limit);
    let results = engine(&ctx).search_tags(&q.tag, limit)?;
    let count = results.len();
    Ok(Json(json!({ "results": results, "count": count, "tag": q.tag })))
}

#[derive(Deserialize)]
pub struct BrowseQuery {
    pub folder: String,
    pub limit: Option<usize>,
}

pub async fn browse_folder(
    State(ctx): State<AppContext>,
    Query(q): Query<BrowseQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = clamp_limit(q.limit);
    let results = engine(&ctx).browse_folder(&q.folder, limit)?;
    let count = results.len();
    Ok(Json(json!({ "results": results, "count": count, "folder": q.folder })))
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

fn find_image(ctx: &AppContext, id: i64) -> Result<crate::types::ImageRecord> {
    ctx.store.find_by_id(id)?.ok_or_else(|| Error::NotFound(format!("image {id}")))
}

pub async fn get_image(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> Result<Json<crate::types::ImageRecord>> {
    Ok(Json(find_image(&ctx, id)?))
}

fn mime_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("tiff") | Some("tif") => "image/tiff",
        _ => "application/octet-stream",
    }
}

/// Thumbnail bytes, falling back to the original file when the thumbnail is
/// missing.
pub async fn image_thumb(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let record = find_image(&ctx, id)?;
    if let Some(thumb) = &record.thumbnail_path {
        if let Ok(bytes) = std::fs::read(thumb) {
            if !bytes.is_empty() {
                return Ok(([(header::CONTENT_TYPE, "image/jpeg")], bytes));
            }
        }
    }
    let bytes = std::fs::read(&record.path)
        .map_err(|_| Error::NotFound(format!("image file for {id}")))?;
    Ok(([(header::CONTENT_TYPE, mime_for(&record.path))], bytes))
}

pub async fn image_full(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let record = find_image(&ctx, id)?;
    let bytes = std::fs::read(&record.path)
        .map_err(|_| Error::NotFound(format!("image file for {id}")))?;
    Ok(([(header::CONTENT_TYPE, mime_for(&record.path))], bytes))
}

/// Merge the posted blob into the record's opaque JSON. A posted `tags`
/// array recomputes the favorite flag from the reserved tag (the boolean
/// column stays authoritative; the tag is its denormalized mirror).
pub async fn patch_tags(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    let mut record = find_image(&ctx, id)?;
    if let Some(patch) = body.as_object() {
        if let Some(meta) = record.meta.as_object_mut() {
            for (key, value) in patch {
                meta.insert(key.clone(), value.clone());
            }
        } else {
            record.meta = serde_json::Value::Object(patch.clone());
        }
    } else {
        record.meta = body;
    }
    if let Some(tags) = record.meta.get("tags").and_then(|t| t.as_array()) {
        record.favorite = tags.iter().any(|t| t.as_str() == Some(FAVORITE_TAG));
    }
    ctx.store.save(&mut record)?;
    Ok(Json(json!({ "status": "updated" })))
}

#[derive(Deserialize)]
pub struct BlurQuery {
    pub blurred: bool,
}

pub async fn patch_blur(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
    Query(q): Query<BlurQuery>,
) -> Result<Json<serde_json::Value>> {
    let mut record = find_image(&ctx, id)?;
    record.blurred = q.blurred;
    ctx.store.save(&mut record)?;
    Ok(Json(json!({ "status": "updated", "blurred": q.blurred })))
}

/// Remove the record, its thumbnail, and its vector entry — never the
/// source file.
pub async fn delete_image(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let record = find_image(&ctx, id)?;
    ctx.pipeline.remove_record(&record);
    Ok(Json(json!({ "status": "deleted" })))
}

// ---------------------------------------------------------------------------
// Indexing
// ---------------------------------------------------------------------------

pub async fn reindex(State(ctx): State<AppContext>) -> Result<impl IntoResponse> {
    let mut roots: Vec<std::path::PathBuf> = ctx
        .store
        .list_folders(true)?
        .into_iter()
        .map(|f| std::path::PathBuf::from(f.path))
        .collect();
    if let Some(pictures) = dirs::picture_dir() {
        if pictures.is_dir() && !roots.contains(&pictures) {
            roots.push(pictures);
        }
    }
    info!(roots = roots.len(), "bulk reindex requested");
    ctx.pipeline.reindex_all(roots);
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "reindexing" }))))
}

pub async fn index_status(State(ctx): State<AppContext>) -> Result<Json<crate::ingest::IndexStatus>> {
    Ok(Json(ctx.pipeline.status()?))
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct DownloadRequest {
    pub repo: Option<String>,
}

pub async fn models_download(
    State(ctx): State<AppContext>,
    body: Option<Json<DownloadRequest>>,
) -> Result<impl IntoResponse> {
    let repo = body.and_then(|Json(b)| b.repo);
    ctx.fetcher.start(repo)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))))
}

pub async fn models_status(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>> {
    let status = ctx.fetcher.overall_status();
    let files = ctx.fetcher.file_statuses();
    let message = match status {
        "ready" => "encoder models loaded",
        "downloading" => "download in progress",
        "present" => "model files on disk, not loaded",
        _ => "model files missing",
    };
    Ok(Json(json!({ "status": status, "message": message, "files": files })))
}

/// Server-sent stream of download progress events. Subscribers that see no
/// event for ten minutes are disconnected; lagged subscribers skip ahead.
pub async fn models_progress(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let rx = ctx.fetcher.subscribe();
    let stream = BroadcastStream::new(rx)
        .timeout(SSE_IDLE_TIMEOUT)
        .take_while(|tick| tick.is_ok())
        .filter_map(|tick| match tick {
            Ok(Ok(event)) => SseEvent::default().json_data(&event).ok().map(Ok),
            // Lagged receiver: drop the missed events, stay subscribed.
            _ => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ---------------------------------------------------------------------------
// Settings: watched folders
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct FolderRequest {
    pub path: String,
}

pub async fn list_folders(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>> {
    let folders = ctx.store.list_folders(false)?;
    Ok(Json(json!({ "folders": folders })))
}

pub async fn add_folder(
    State(ctx): State<AppContext>,
    Json(body): Json<FolderRequest>,
) -> Result<Json<serde_json::Value>> {
    if body.path.trim().is_empty() {
        return Err(Error::InvalidInput("folder path must not be empty".into()));
    }
    let normalized = normalize_path(std::path::Path::new(body.path.trim()));
    if !normalized.is_dir() {
        return Err(Error::InvalidInput(format!("{} is not a directory", normalized.display())));
    }
    let folder = ctx.store.add_folder(&normalized.to_string_lossy(), now_ts())?;
    ctx.watcher.watch_folder(normalized.clone());
    // Pick up everything already in the tree.
    ctx.pipeline.reindex_all(vec![normalized]);
    Ok(Json(json!({ "folder": folder })))
}

pub async fn remove_folder(
    State(ctx): State<AppContext>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let folder = ctx
        .store
        .find_folder_by_id(id)?
        .ok_or_else(|| Error::NotFound(format!("folder {id}")))?;
    ctx.store.deactivate_folder(id)?;
    ctx.watcher.unwatch_folder(std::path::PathBuf::from(&folder.path));
    Ok(Json(json!({ "status": "removed", "folder": folder })))
}

// ---------------------------------------------------------------------------
// Settings: token vault
// ---------------------------------------------------------------------------

pub async fn token_status(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>> {
    let present = ctx.store.get_setting(settings::HF_TOKEN)?.is_some();
    Ok(Json(json!({ "present": present })))
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

pub async fn save_token(
    State(ctx): State<AppContext>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<serde_json::Value>> {
    let sealed = vault::encrypt(body.token.trim())?;
    ctx.store.set_setting(settings::HF_TOKEN, &sealed)?;
    Ok(Json(json!({ "status": "saved" })))
}

pub async fn clear_token(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>> {
    ctx.store.delete_setting(settings::HF_TOKEN)?;
    Ok(Json(json!({ "status": "cleared" })))
}

// ---------------------------------------------------------------------------
// Settings: advanced toggles
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedSettings {
    pub exif_enabled: Option<bool>,
    pub exif_visible: Option<bool>,
    pub map_visible: Option<bool>,
    pub auto_index: Option<bool>,
    pub similarity_cutoff: Option<f32>,
    pub visual_min_score: Option<bool>,
}

pub async fn get_advanced(State(ctx): State<AppContext>) -> Result<Json<serde_json::Value>> {
    let store = &ctx.store;
    Ok(Json(json!({
        "exifEnabled": store.bool_setting(settings::EXIF_ENABLED, true),
        "exifVisible": store.bool_setting(settings::EXIF_VISIBLE, true),
        "mapVisible": store.bool_setting(settings::MAP_VISIBLE, true),
        "autoIndex": store.bool_setting(settings::AUTO_INDEX, true),
        "similarityCutoff": store.float_setting(
            settings::SIMILARITY_CUTOFF,
            settings::DEFAULT_SIMILARITY_CUTOFF,
        ),
        "visualMinScore": store.bool_setting(settings::VISUAL_MIN_SCORE, false),
    })))
}

pub async fn set_advanced(
    State(ctx): State<AppContext>,
    Json(body): Json<AdvancedSettings>,
) -> Result<Json<serde_json::Value>> {
    let store = &ctx.store;
    let bools = [
        (settings::EXIF_ENABLED, body.exif_enabled),
        (settings::EXIF_VISIBLE, body.exif_visible),
        (settings::MAP_VISIBLE, body.map_visible),
        (settings::AUTO_INDEX, body.auto_index),
        (settings::VISUAL_MIN_SCORE, body.visual_min_score),
    ];
    for (key, value) in bools {
        if let Some(value) = value {
            store.set_setting(key, if value { "true" } else { "false" })?;
        }
    }
    if let Some(cutoff) = body.similarity_cutoff {
        if !(0.0..=1.0).contains(&cutoff) {
            return Err(Error::InvalidInput("similarityCutoff must be in [0, 1]".into()));
        }
        store.set_setting(settings::SIMILARITY_CUTOFF, &cutoff.to_string())?;
    }
    get_advanced(State(ctx)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_mapping() {
        assert_eq!(mime_for("/a/b.JPG"), "image/jpeg");
        assert_eq!(mime_for("/a/b.webp"), "image/webp");
        assert_eq!(mime_for("/a/b.tif"), "image/tiff");
        assert_eq!(mime_for("/a/b"), "application/octet-stream");
    }

    #[test]
    fn test_limit_clamp() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(50)), 50);
        assert_eq!(clamp_limit(Some(9999)), MAX_LIMIT);
    }
}

//! Encoder-weights acquisition: authenticated, verifying, skipping download
//! of the three model artifacts, with progress fan-out.
//!
//! Runs on a dedicated thread (plain blocking I/O — no async runtime needed
//! for a single serial download session). Progress events go out over a
//! broadcast channel; slow subscribers lag and drop, they never stall the
//! download.

use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{settings, DownloadStatus, ProgressEvent};
use crate::vault;

/// One encoder artifact: local filename and path inside the remote repo.
pub struct ModelFile {
    pub local_name: &'static str,
    pub remote_path: &'static str,
}

/// The three artifacts C5 needs: two encoder sessions and the tokenizer spec.
pub const MODEL_FILES: [ModelFile; 3] = [
    ModelFile { local_name: "visual.onnx", remote_path: "onnx/vision_model.onnx" },
    ModelFile { local_name: "textual.onnx", remote_path: "onnx/text_model.onnx" },
    ModelFile { local_name: "tokenizer.json", remote_path: "tokenizer.json" },
];

pub const DEFAULT_REPO: &str = "Xenova/clip-vit-base-patch32";

const HUB_BASE: &str = "https://huggingface.co";
const CHUNK_SIZE: usize = 512 * 1024;
const PROGRESS_EVERY_BYTES: u64 = 5 * 1024 * 1024;
const MAX_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Local paths of the three artifacts under the models directory, in
/// (visual, text, tokenizer) order.
pub fn local_paths(models_dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    (
        models_dir.join(MODEL_FILES[0].local_name),
        models_dir.join(MODEL_FILES[1].local_name),
        models_dir.join(MODEL_FILES[2].local_name),
    )
}

fn backoff_secs(attempt: u32) -> u64 {
    (2u64 << (attempt - 1)).min(30)
}

fn is_non_retryable(err: &Error) -> bool {
    matches!(err, Error::AuthFailed | Error::MissingRemoteFile(_) | Error::DecryptFailed)
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFileStatus {
    pub name: String,
    pub exists: bool,
    pub size_bytes: u64,
    pub path: String,
}

pub struct WeightsFetcher {
    running: AtomicBool,
    events: broadcast::Sender<ProgressEvent>,
    store: Arc<Store>,
    embedder: Arc<Embedder>,
    models_dir: PathBuf,
}

impl WeightsFetcher {
    pub fn new(store: Arc<Store>, embedder: Arc<Embedder>, models_dir: PathBuf) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { running: AtomicBool::new(false), events, store, embedder, models_dir }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Effective repository: explicit override, then the stored setting,
    /// then the built-in default.
    pub fn resolve_repo(&self, override_repo: Option<&str>) -> String {
        if let Some(repo) = override_repo {
            if !repo.trim().is_empty() {
                return repo.trim().to_string();
            }
        }
        match self.store.get_setting(settings::MODEL_REPO) {
            Ok(Some(repo)) if !repo.trim().is_empty() => repo,
            _ => DEFAULT_REPO.to_string(),
        }
    }

    /// Kick off a download session on a dedicated thread. Non-reentrant: a
    /// second call while one is in flight fails with [`Error::Conflict`].
    pub fn start(self: &Arc<Self>, repo_override: Option<String>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Conflict);
        }

        let repo = self.resolve_repo(repo_override.as_deref());
        let fetcher = Arc::clone(self);
        std::thread::Builder::new()
            .name("weights-fetcher".into())
            .spawn(move || {
                fetcher.run_session(&repo);
                fetcher.running.store(false, Ordering::SeqCst);
            })
            .map_err(Error::Io)?;
        Ok(())
    }

    fn emit(&self, event: ProgressEvent) {
        tracing::debug!(status = ?event.status, message = %event.message, "weights progress");
        let _ = self.events.send(event);
    }

    fn emit_error(&self, message: String) {
        warn!(error = %message, "weights download failed");
        self.emit(ProgressEvent::status_only(DownloadStatus::Error, message));
    }

    fn run_session(&self, repo: &str) {
        self.emit(ProgressEvent::status_only(
            DownloadStatus::Started,
            format!("downloading encoder weights from {repo}"),
        ));

        let token = match self.store.get_setting(settings::HF_TOKEN) {
            Ok(Some(sealed)) => match vault::decrypt(&sealed) {
                Ok(token) => Some(token),
                Err(e) => {
                    self.emit_error(e.to_string());
                    return;
                }
            },
            Ok(None) => None,
            Err(e) => {
                self.emit_error(e.to_string());
                return;
            }
        };

        let client = match reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                self.emit_error(e.to_string());
                return;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&self.models_dir) {
            self.emit_error(e.to_string());
            return;
        }

        for file in &MODEL_FILES {
            let final_path = self.models_dir.join(file.local_name);
            let existing_size =
                std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
            if existing_size > 0 {
                self.emit(ProgressEvent {
                    status: DownloadStatus::Skipped,
                    file: Some(file.local_name.to_string()),
                    bytes_so_far: existing_size,
                    total_bytes: Some(existing_size),
                    message: format!("{} already present, skipping", file.local_name),
                });
                continue;
            }

            let mut attempt = 1;
            loop {
                match self.download_file(&client, repo, file, token.as_deref(), &final_path) {
                    Ok(digest) => {
                        let size =
                            std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
                        self.emit(ProgressEvent {
                            status: DownloadStatus::FileComplete,
                            file: Some(file.local_name.to_string()),
                            bytes_so_far: size,
                            total_bytes: Some(size),
                            message: format!("{} complete (sha256 {digest})", file.local_name),
                        });
                        break;
                    }
                    Err(e) if is_non_retryable(&e) => {
                        self.emit_error(e.to_string());
                        return;
                    }
                    Err(e) if attempt < MAX_ATTEMPTS => {
                        let delay = backoff_secs(attempt);
                        self.emit(ProgressEvent {
                            status: DownloadStatus::Retrying,
                            file: Some(file.local_name.to_string()),
                            bytes_so_far: 0,
                            total_bytes: None,
                            message: format!(
                                "{} attempt {attempt} failed ({e}), retrying in {delay}s",
                                file.local_name
                            ),
                        });
                        std::thread::sleep(Duration::from_secs(delay));
                        attempt += 1;
                    }
                    Err(e) => {
                        self.emit_error(format!(
                            "{} failed after {MAX_ATTEMPTS} attempts: {e}",
                            file.local_name
                        ));
                        return;
                    }
                }
            }
        }

        self.emit(ProgressEvent::status_only(DownloadStatus::Loading, "loading encoder models"));
        let (visual, text, tokenizer) = local_paths(&self.models_dir);
        match self.embedder.load_models(&visual, &text, &tokenizer) {
            Ok(()) => {
                info!(repo, "encoder weights ready");
                self.emit(ProgressEvent::status_only(DownloadStatus::Ready, "models ready"));
            }
            Err(e) => self.emit_error(e.to_string()),
        }
    }

    /// Stream one artifact to a temp sibling, verifying byte count against
    /// the advertised content length, then atomically rename into place.
    /// Returns the hex SHA-256 of the payload.
    fn download_file(
        &self,
        client: &reqwest::blocking::Client,
        repo: &str,
        file: &ModelFile,
        token: Option<&str>,
        final_path: &Path,
    ) -> Result<String> {
        let url = format!("{HUB_BASE}/{repo}/resolve/main/{}", file.remote_path);
        let mut request = client.get(&url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let mut response = request.send()?;
        match response.status().as_u16() {
            200..=299 => {}
            401 => return Err(Error::AuthFailed),
            404 => return Err(Error::MissingRemoteFile(file.remote_path.to_string())),
            code => {
                return Err(Error::Io(std::io::Error::other(format!(
                    "unexpected status {code} from {url}"
                ))))
            }
        }
        let total = response.content_length();

        let tmp_path = self.models_dir.join(format!("{}.part", file.local_name));
        let mut out = std::io::BufWriter::new(std::fs::File::create(&tmp_path)?);
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut bytes_so_far = 0u64;
        let mut last_reported = 0u64;

        loop {
            let n = match response.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(out);
                    let _ = std::fs::remove_file(&tmp_path);
                    return Err(Error::Io(e));
                }
            };
            if let Err(e) = out.write_all(&buf[..n]) {
                drop(out);
                let _ = std::fs::remove_file(&tmp_path);
                return Err(Error::Io(e));
            }
            hasher.update(&buf[..n]);
            bytes_so_far += n as u64;

            if bytes_so_far - last_reported >= PROGRESS_EVERY_BYTES {
                last_reported = bytes_so_far;
                self.emit(ProgressEvent {
                    status: DownloadStatus::Downloading,
                    file: Some(file.local_name.to_string()),
                    bytes_so_far,
                    total_bytes: total,
                    message: format!("{} {bytes_so_far} bytes", file.local_name),
                });
            }
        }
        out.flush()?;
        drop(out);

        if let Some(expected) = total {
            if bytes_so_far != expected {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(Error::Io(std::io::Error::other(format!(
                    "truncated download: got {bytes_so_far} of {expected} bytes"
                ))));
            }
        }

        std::fs::rename(&tmp_path, final_path)?;
        Ok(hex::encode(hasher.finalize()))
    }

    // -----------------------------------------------------------------------
    // Status reporting for /models/status and /models/verify
    // -----------------------------------------------------------------------

    pub fn file_statuses(&self) -> Vec<ModelFileStatus> {
        MODEL_FILES
            .iter()
            .map(|file| {
                let path = self.models_dir.join(file.local_name);
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                ModelFileStatus {
                    name: file.local_name.to_string(),
                    exists: size > 0,
                    size_bytes: size,
                    path: path.display().to_string(),
                }
            })
            .collect()
    }

    pub fn overall_status(&self) -> &'static str {
        if self.is_running() {
            "downloading"
        } else if self.embedder.is_ready() {
            "ready"
        } else if self.file_statuses().iter().all(|f| f.exists) {
            "present"
        } else {
            "missing"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harness(dir: &Path) -> Arc<WeightsFetcher> {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let embedder = Arc::new(Embedder::new());
        Arc::new(WeightsFetcher::new(store, embedder, dir.to_path_buf()))
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(3), 8);
        assert_eq!(backoff_secs(6), 30);
    }

    #[test]
    fn test_non_retryable_classification() {
        assert!(is_non_retryable(&Error::AuthFailed));
        assert!(is_non_retryable(&Error::MissingRemoteFile("x".into())));
        assert!(is_non_retryable(&Error::DecryptFailed));
        assert!(!is_non_retryable(&Error::Io(std::io::Error::other("net"))));
    }

    #[test]
    fn test_local_paths_order() {
        let (v, t, tok) = local_paths(Path::new("/models"));
        assert!(v.ends_with("visual.onnx"));
        assert!(t.ends_with("textual.onnx"));
        assert!(tok.ends_with("tokenizer.json"));
    }

    #[test]
    fn test_repo_resolution() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = harness(tmp.path());
        assert_eq!(fetcher.resolve_repo(None), DEFAULT_REPO);
        assert_eq!(fetcher.resolve_repo(Some("my/repo")), "my/repo");
        assert_eq!(fetcher.resolve_repo(Some("  ")), DEFAULT_REPO);
        fetcher.store.set_setting(settings::MODEL_REPO, "stored/repo").unwrap();
        assert_eq!(fetcher.resolve_repo(None), "stored/repo");
        assert_eq!(fetcher.resolve_repo(Some("my/repo")), "my/repo");
    }

    #[test]
    fn test_file_statuses_reflect_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = harness(tmp.path());
        assert_eq!(fetcher.overall_status(), "missing");
        let statuses = fetcher.file_statuses();
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|s| !s.exists && s.size_bytes == 0));

        for file in &MODEL_FILES {
            std::fs::write(tmp.path().join(file.local_name), b"weights").unwrap();
        }
        assert!(fetcher.file_statuses().iter().all(|s| s.exists));
        // Files exist but the embedder has not loaded them.
        assert_eq!(fetcher.overall_status(), "present");
    }

    #[test]
    fn test_empty_file_not_treated_as_present() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = harness(tmp.path());
        std::fs::write(tmp.path().join("visual.onnx"), b"").unwrap();
        assert!(!fetcher.file_statuses()[0].exists);
    }
}

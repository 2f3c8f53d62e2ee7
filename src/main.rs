//! Photoscope binary — thin CLI shell over the [`photoscope`] library crate.

use axum::routing::{delete, get, patch, post};
use axum::Router;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use photoscope::embedder::Embedder;
use photoscope::fetcher::{self, WeightsFetcher};
use photoscope::index::VectorIndex;
use photoscope::ingest::IngestPipeline;
use photoscope::store::Store;
use photoscope::thumbs::{ThumbnailService, THUMB_SIDE};
use photoscope::types::{normalize_path, now_ts, AppContext, AppPaths};
use photoscope::{api, watch};

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Offline semantic photo search — index local photo folders with CLIP
/// embeddings and search them by text, image, tags, or dates.
#[derive(Parser)]
#[command(name = "photoscope", version, about, long_about = None)]
struct Cli {
    /// Data directory for the database, thumbnails, and model files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Watch this folder from startup (repeatable, persisted)
    #[arg(long = "root", value_name = "PATH")]
    roots: Vec<PathBuf>,

    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost)
    #[arg(long)]
    bind_all: bool,
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("photoscope=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let paths = AppPaths::new(cli.data_dir.unwrap_or_else(photoscope::default_data_dir));
    for dir in [&paths.data_dir, &paths.models_dir, &paths.thumbs_dir] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            error!(dir = %dir.display(), error = %e, "could not create data directory");
            std::process::exit(1);
        }
    }

    let store = Arc::new(Store::open(&paths.db_path).unwrap_or_else(|e| {
        error!(path = %paths.db_path.display(), error = %e, "could not open database");
        std::process::exit(1);
    }));

    // Rebuild the vector index from the durable store — the store is the
    // single source of truth across restarts.
    let index = Arc::new(VectorIndex::new());
    match store.find_all_embeddings() {
        Ok(rows) => {
            let n = rows.len();
            index.load_all(rows);
            info!(vectors = n, "vector index loaded");
        }
        Err(e) => warn!(error = %e, "could not load embeddings from store"),
    }

    // Load encoder models if a previous download left them on disk.
    let embedder = Arc::new(Embedder::new());
    let (visual, text, tokenizer) = fetcher::local_paths(&paths.models_dir);
    if [&visual, &text, &tokenizer]
        .iter()
        .all(|p| std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false))
    {
        match embedder.load_models(&visual, &text, &tokenizer) {
            Ok(()) => info!("encoder models loaded from disk"),
            Err(e) => warn!(error = %e, "encoder models present but failed to load"),
        }
    } else {
        info!("encoder models not downloaded yet — text search will fall back to filenames");
    }

    let thumbs = ThumbnailService::new(paths.thumbs_dir.clone(), THUMB_SIDE).unwrap_or_else(|e| {
        error!(error = %e, "could not create thumbnail directory");
        std::process::exit(1);
    });

    let pipeline = Arc::new(IngestPipeline::new(
        Arc::clone(&store),
        Arc::clone(&index),
        Arc::clone(&embedder),
        thumbs,
    ));
    let worker = pipeline.spawn_worker();

    let fetcher = Arc::new(WeightsFetcher::new(
        Arc::clone(&store),
        Arc::clone(&embedder),
        paths.models_dir.clone(),
    ));

    // Persist --root flags, then watch every active folder.
    for root in &cli.roots {
        let normalized = normalize_path(root);
        if !normalized.is_dir() {
            error!(root = %normalized.display(), "not a directory");
            std::process::exit(1);
        }
        if let Err(e) = store.add_folder(&normalized.to_string_lossy(), now_ts()) {
            error!(root = %normalized.display(), error = %e, "could not persist watched folder");
            std::process::exit(1);
        }
    }
    let roots: Vec<PathBuf> = match store.list_folders(true) {
        Ok(folders) => folders.into_iter().map(|f| PathBuf::from(f.path)).collect(),
        Err(e) => {
            error!(error = %e, "could not list watched folders");
            std::process::exit(1);
        }
    };
    info!(folders = roots.len(), "starting folder watcher");
    let (watcher, watcher_thread) =
        watch::start_watcher(Arc::clone(&pipeline), Arc::clone(&store), roots.clone());

    // Catch up on anything that changed while we were down.
    if !roots.is_empty() {
        pipeline.reindex_all(roots);
    }

    let ctx = AppContext {
        paths: Arc::new(paths),
        store,
        index,
        embedder,
        fetcher,
        pipeline: Arc::clone(&pipeline),
        watcher: Arc::clone(&watcher),
    };

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/search", post(api::search))
        .route("/search/image", post(api::search_image))
        .route("/search/tags", get(api::search_tags))
        .route("/search/browse", get(api::browse_folder))
        .route("/images/{id}", get(api::get_image).delete(api::delete_image))
        .route("/images/{id}/thumb", get(api::image_thumb))
        .route("/images/{id}/full", get(api::image_full))
        .route("/images/{id}/tags", patch(api::patch_tags))
        .route("/images/{id}/blur", patch(api::patch_blur))
        .route("/index/reindex", post(api::reindex))
        .route("/index/status", get(api::index_status))
        .route("/models/download", post(api::models_download))
        .route("/models/status", get(api::models_status))
        .route("/models/verify", post(api::models_status))
        .route("/models/progress", get(api::models_progress))
        .route("/settings/folders", get(api::list_folders).post(api::add_folder))
        .route("/settings/folders/{id}", delete(api::remove_folder))
        .route("/settings/token/status", get(api::token_status))
        .route("/settings/token", post(api::save_token).delete(api::clear_token))
        .route("/settings/advanced", get(api::get_advanced).post(api::set_advanced))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    // Bind address: 127.0.0.1 by default, --bind-all for 0.0.0.0.
    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let explicit_port: Option<u16> = std::env::var("PORT").ok().and_then(|p| p.parse().ok());

    let listener = if let Some(port) = explicit_port {
        tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await.unwrap_or_else(|e| {
            error!(port = port, error = %e, "could not bind to port");
            eprintln!("  PORT={port} was set explicitly. Choose a different port.");
            std::process::exit(1);
        })
    } else {
        // Auto-scan: try 8484..=8493.
        const BASE: u16 = 8484;
        const RANGE: u16 = 10;
        let mut found = None;
        for port in BASE..BASE + RANGE {
            match tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
                Ok(listener) => {
                    found = Some(listener);
                    break;
                }
                Err(_) => continue,
            }
        }
        found.unwrap_or_else(|| {
            error!(range_start = BASE, range_end = BASE + RANGE - 1, "no free port found");
            eprintln!("  Try: PORT=<port> photoscope");
            std::process::exit(1);
        })
    };

    let port = listener.local_addr().unwrap().port();
    info!(port = port, "http://localhost:{port}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();

    // Stop the watcher and drain the worker before exiting.
    watcher.stop();
    pipeline.shutdown();
    let _ = watcher_thread.join();
    let _ = worker.join();
}

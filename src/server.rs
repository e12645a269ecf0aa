//! HTTP surface.
//!
//! - `GET  /health` — liveness.
//! - `GET  /cache/{role}/{name}` — serve a cached artifact, range-capable,
//!   with an immutable cache policy (artifacts are content-addressed).
//! - `GET  /stream/{item_type}/{item_id}` — resolve an item's source and
//!   stream it with range support.
//! - `POST /preprocess/{item_type}` — start a preprocessing job
//!   (fire-and-forget, returns the queue total, 409 while one is running).
//! - `GET  /preprocess/{item_type}/progress` — live job snapshot.

use crate::proxy;
use axum::Router;
use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use shelf_cache::{ArtifactRole, ArtifactStore};
use shelf_preprocess::error::ErrorKind as PreprocessErrorKind;
use shelf_preprocess::{Catalog, ItemType, Scheduler};
use shelf_storage::StoreHandle;
use std::path::PathBuf;
use std::sync::Arc;

pub struct AppState {
    pub catalog: Arc<dyn Catalog>,
    pub scheduler: Scheduler,
    pub store: Option<StoreHandle>,
    pub library_root: PathBuf,
    magazine_cache: ArtifactStore,
    ebook_cache: ArtifactStore,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        scheduler: Scheduler,
        store: Option<StoreHandle>,
        library_root: PathBuf,
        magazine_cache: ArtifactStore,
        ebook_cache: ArtifactStore,
    ) -> Self {
        Self { catalog, scheduler, store, library_root, magazine_cache, ebook_cache }
    }

    /// Page artifacts belong to magazines, covers to ebooks.
    fn cache_for_role(&self, role: ArtifactRole) -> &ArtifactStore {
        match role {
            ArtifactRole::Page => &self.magazine_cache,
            ArtifactRole::Cover => &self.ebook_cache,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cache/{role}/{name}", get(serve_cached))
        .route("/stream/{item_type}/{item_id}", get(stream_item))
        .route("/preprocess/{item_type}", post(start_preprocess))
        .route("/preprocess/{item_type}/progress", get(preprocess_progress))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|value| value.to_str().ok())
}

/// Artifact names are single path segments produced by the cache itself;
/// anything that could navigate out of the cache directory is rejected.
fn valid_artifact_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.') || is_cjk_filename_char(ch))
}

fn is_cjk_filename_char(ch: char) -> bool {
    // Cache keys keep CJK title characters, so artifact names carry them.
    matches!(ch, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

async fn serve_cached(
    State(state): State<Arc<AppState>>,
    Path((role, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Ok(role) = role.parse::<ArtifactRole>() else {
        return proxy::reason(StatusCode::NOT_FOUND, "unknown artifact role");
    };
    if !valid_artifact_name(&name) {
        return proxy::reason(StatusCode::NOT_FOUND, "object not found");
    }
    let path = state.cache_for_role(role).root_dir().join(&name);
    proxy::serve_local(&path, range_header(&headers), proxy::content_type_for(&name), true).await
}

async fn stream_item(
    State(state): State<Arc<AppState>>,
    Path((item_type, item_id)): Path<(String, i64)>,
    headers: HeaderMap,
) -> Response {
    let Ok(item_type) = item_type.parse::<ItemType>() else {
        return proxy::reason(StatusCode::NOT_FOUND, "unknown item type");
    };
    let items = match state.catalog.list_items_needing_artifacts(item_type, true).await {
        Ok(items) => items,
        Err(err) => {
            tracing::warn!(%item_type, error = %err, "catalog listing failed");
            return proxy::reason(StatusCode::INTERNAL_SERVER_ERROR, "catalog error");
        },
    };
    let Some(item) = items.into_iter().find(|item| item.id == item_id) else {
        return proxy::reason(StatusCode::NOT_FOUND, "object not found");
    };

    let content_type = proxy::content_type_for(&item.source_path);
    let range = range_header(&headers);
    // The object store is preferred when it holds the source; the local
    // library is the fallback.
    if let Some(store) = &state.store {
        if store.exists(&item.source_path).await {
            return proxy::serve_remote(&**store, &item.source_path, range, content_type).await;
        }
    }
    let local = state.library_root.join(&item.source_path);
    proxy::serve_local(&local, range, content_type, false).await
}

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    #[serde(default)]
    force: bool,
}

async fn start_preprocess(
    State(state): State<Arc<AppState>>,
    Path(item_type): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let Ok(item_type) = item_type.parse::<ItemType>() else {
        return proxy::reason(StatusCode::NOT_FOUND, "unknown item type");
    };
    // An empty body means default options; a present body must parse.
    let force = if body.is_empty() {
        false
    } else {
        match serde_json::from_slice::<StartRequest>(&body) {
            Ok(request) => request.force,
            Err(_) => return proxy::reason(StatusCode::BAD_REQUEST, "invalid request body"),
        }
    };
    match state.scheduler.start(item_type, force).await {
        Ok(total) => (StatusCode::ACCEPTED, Json(json!({ "total": total }))).into_response(),
        Err(err) if matches!(&*err, PreprocessErrorKind::AlreadyRunning) => {
            proxy::reason(StatusCode::CONFLICT, "preprocessing already running")
        },
        Err(err) => {
            tracing::warn!(%item_type, error = %err, "could not start preprocessing");
            proxy::reason(StatusCode::INTERNAL_SERVER_ERROR, "catalog error")
        },
    }
}

async fn preprocess_progress(State(state): State<Arc<AppState>>, Path(item_type): Path<String>) -> Response {
    let Ok(item_type) = item_type.parse::<ItemType>() else {
        return proxy::reason(StatusCode::NOT_FOUND, "unknown item type");
    };
    match state.scheduler.status(item_type).await {
        Some(progress) => Json(progress).into_response(),
        None => proxy::reason(StatusCode::NOT_FOUND, "no preprocessing job has run"),
    }
}

//! Static asset fallback for non-relay HTTP paths.
//!
//! Serves files from the configured `staticDir` (`/` maps to `index.html`).
//! Strictly an external collaborator of the relay: it never reads or writes
//! session state. When no directory is configured, every path is a 404.

use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use std::path::{Component, Path};

use crate::relay::server::RelayState;

const NOT_FOUND_BODY: &str = "404 - File Not Found";

/// Extension to MIME type for the assets a paired client actually loads.
fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") => "image/jpg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("woff") => "application/font-woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "application/font-ttf",
        Some("eot") => "application/vnd.ms-fontobject",
        Some("otf") => "application/font-otf",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// True when the request path only walks downward from the static root.
fn is_clean(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Fallback handler: resolve the request path under the static root and
/// serve the file.
pub(crate) async fn serve(State(state): State<RelayState>, uri: Uri) -> Response {
    let Some(root) = state.static_dir.as_ref() else {
        return (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response();
    };

    let mut rel = uri.path().trim_start_matches('/').to_string();
    if rel.is_empty() {
        rel = "index.html".to_string();
    }
    let rel = Path::new(&rel);
    if !is_clean(rel) {
        return (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response();
    }

    let full = root.join(rel);
    match tokio::fs::read(&full).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type(rel))],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, NOT_FOUND_BODY).into_response()
        }
        Err(e) => {
            log::warn!("reading {} failed: {}", full.display(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("error reading file: {}", e.kind()),
            )
                .into_response()
        }
    }
}

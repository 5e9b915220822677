//! `/dav/*` routing glue
//!
//! All methods funnel through one entry point; the WebDAV dispatcher
//! owns method semantics. Request bodies pass through as streams.

use crate::state::{AppState, DAV_PREFIX};
use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use davit_auth::AuthResult;
use std::sync::Arc;

pub async fn entry(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    let auth = request
        .extensions()
        .get::<AuthResult>()
        .cloned()
        .unwrap_or_else(AuthResult::anonymous);
    let method = request.method().clone();
    // Keep the raw (still percent-encoded) path; the dispatcher decodes.
    let raw_path = request
        .uri()
        .path()
        .strip_prefix(DAV_PREFIX)
        .unwrap_or("/")
        .to_string();
    let headers = request.headers().clone();
    let body = request.into_body();
    state
        .dav
        .dispatch(&method, &raw_path, &headers, body, &auth)
        .await
}

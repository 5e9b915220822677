//! Authentication middleware
//!
//! Resolves the `Authorization` header into an `AuthResult` and stores
//! it in request extensions for handlers. Requests with no credentials
//! continue as anonymous; each operation decides what it requires.
//! Wrong credentials are refused here, with a Basic challenge on the
//! WebDAV surface so interactive clients prompt.

use crate::envelope::ApiError;
use crate::state::{AppState, DAV_PREFIX};
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::debug;

pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // Health stays open
    if path == "/health" {
        return next.run(request).await;
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    match state.auth.resolve(header_value.as_deref()) {
        Ok(auth) => {
            debug!(auth_type = ?auth.auth_type, path, "resolved principal");
            request.extensions_mut().insert(auth);
            next.run(request).await
        }
        Err(e) => {
            if path.starts_with(DAV_PREFIX) {
                return Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .header(header::WWW_AUTHENTICATE, "Basic realm=\"davit\"")
                    .body(Body::from("authentication required"))
                    .unwrap_or_default();
            }
            ApiError(e).into_response()
        }
    }
}

//! The uniform JSON response envelope
//!
//! Every `/api/*` response is `{code, message, data, success, errorId?}`.
//! Internal failures never leak detail: the client gets an opaque error
//! id that correlates with a full server-side log line.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use davit_common::Error;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_id: Option<String>,
}

impl Envelope {
    /// A 200 success with a payload.
    pub fn ok<T: Serialize>(data: T) -> Response {
        Self::with_status(StatusCode::OK, data)
    }

    /// A success with an explicit status (e.g. 201 for mkdir).
    pub fn with_status<T: Serialize>(status: StatusCode, data: T) -> Response {
        let body = Envelope {
            code: status.as_u16(),
            message: "ok".to_string(),
            data: serde_json::to_value(data).ok(),
            success: true,
            error_id: None,
        };
        (status, Json(body)).into_response()
    }

    /// A success with no payload.
    pub fn empty(status: StatusCode) -> Response {
        let body = Envelope {
            code: status.as_u16(),
            message: "ok".to_string(),
            data: None,
            success: true,
            error_id: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Error wrapper giving every handler `?` on `davit_common::Error`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let (message, error_id) = if self.0.message_is_public() {
            (self.0.to_string(), None)
        } else {
            let error_id = Error::new_error_id();
            error!(error_id, "request failed: {}", self.0);
            ("internal error".to_string(), Some(error_id))
        };
        let body = Envelope {
            code: status.as_u16(),
            message: format!("{}: {message}", self.0.wire_code()),
            data: None,
            success: false,
            error_id,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult = std::result::Result<Response, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success_shape() {
        let body = Envelope {
            code: 200,
            message: "ok".into(),
            data: Some(serde_json::json!({"a": 1})),
            success: true,
            error_id: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], 200);
        assert_eq!(json["success"], true);
        assert!(json.get("errorId").is_none());
    }

    #[test]
    fn test_public_error_keeps_message() {
        let e = ApiError(Error::PathForbidden("/team-b/".into()));
        assert!(e.0.message_is_public());
        assert_eq!(e.0.http_status_code(), 403);
    }

    #[test]
    fn test_internal_error_is_opaque() {
        let e = ApiError(Error::internal("sdk said something sensitive"));
        assert!(!e.0.message_is_public());
    }
}

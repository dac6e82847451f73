//! Request-level errors and their JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Everything the HTTP surface can reject a request for. The `Display`
/// strings are the wire-level `error` bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("No data points provided")]
    NoDataPoints,
    #[error("No spectra provided in batch")]
    EmptyBatch,
    #[error("Frequency and impedance data length mismatch")]
    LengthMismatch,
    #[error("Batch iterations must uniquely cover 0..N")]
    InvalidIterations,
    #[error("Method not allowed")]
    MethodNotAllowed,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::MethodNotAllowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(ApiError::InvalidJson.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::LengthMismatch.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn wire_messages() {
        assert_eq!(ApiError::InvalidJson.to_string(), "Invalid JSON format");
        assert_eq!(ApiError::NoDataPoints.to_string(), "No data points provided");
        assert_eq!(ApiError::MethodNotAllowed.to_string(), "Method not allowed");
    }
}

//! HTTP surface.
//!
//! Endpoints:
//! - POST /eis-data       - single spectrum, 202 + request id
//! - POST /eis-data/batch - batch, 202 + batch id
//! - GET  /health         - health check
//!
//! Every response carries permissive CORS headers and a JSON content
//! type; OPTIONS always answers 200. Validation failures are 4xx with a
//! JSON `error` body and enqueue nothing. Accepted work is handed to a
//! blocking task immediately so the accept path never waits on a fit.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::batch;
use crate::config::FitConfig;
use crate::error::ApiError;
use crate::id::generate_id;
use crate::models::{ImpedanceBatch, ImpedanceData};
use crate::pool::WorkerPool;
use crate::timing::TimingSink;

/// Everything the handlers need, passed explicitly; tests build their own.
#[derive(Clone)]
pub struct ServiceState {
    pub fit: Arc<FitConfig>,
    pub pool: Arc<WorkerPool>,
    pub timing: Arc<TimingSink>,
}

/// Build the router with all endpoints and the CORS layer.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/eis-data", any(eis_data))
        .route("/eis-data/batch", any(eis_batch))
        .route("/health", any(health))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

async fn cors(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

async fn eis_data(State(state): State<ServiceState>, method: Method, body: Bytes) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if method != Method::POST {
        return ApiError::MethodNotAllowed.into_response();
    }

    let Ok(data) = serde_json::from_slice::<ImpedanceData>(&body) else {
        return ApiError::InvalidJson.into_response();
    };
    if let Err(err) = validate_spectrum(&data) {
        return err.into_response();
    }

    let request_id = generate_id();
    info!(request = %request_id, points = data.frequencies.len(), "spectrum received");

    let task_state = state.clone();
    let task_id = request_id.clone();
    tokio::task::spawn_blocking(move || batch::run_single(&task_state, task_id, data));

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "request_id": request_id,
            "message": "Processing started",
        })),
    )
        .into_response()
}

async fn eis_batch(State(state): State<ServiceState>, method: Method, body: Bytes) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if method != Method::POST {
        return ApiError::MethodNotAllowed.into_response();
    }

    let Ok(batch) = serde_json::from_slice::<ImpedanceBatch>(&body) else {
        return ApiError::InvalidJson.into_response();
    };
    if let Err(err) = validate_batch(&batch) {
        return err.into_response();
    }

    let batch_id = batch.batch_id.clone();
    let spectra = batch.spectra.len();
    info!(batch = %batch_id, spectra, "batch received");

    let task_state = state.clone();
    tokio::task::spawn_blocking(move || batch::run_batch(&task_state, batch));

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "batch_id": batch_id,
            "spectra": spectra,
            "message": "Batch processing started with worker pool",
        })),
    )
        .into_response()
}

async fn health(method: Method) -> Response {
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    if method != Method::GET {
        return ApiError::MethodNotAllowed.into_response();
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

fn validate_spectrum(data: &ImpedanceData) -> Result<(), ApiError> {
    if data.frequencies.is_empty() {
        return Err(ApiError::NoDataPoints);
    }
    if data.frequencies.len() != data.impedance.len() {
        return Err(ApiError::LengthMismatch);
    }
    Ok(())
}

/// A batch must be non-empty, each spectrum well formed, and the
/// iteration numbers exactly the set `0..N`: results are placed by
/// iteration index, so duplicates would mis-attribute spectra.
fn validate_batch(batch: &ImpedanceBatch) -> Result<(), ApiError> {
    if batch.spectra.is_empty() {
        return Err(ApiError::EmptyBatch);
    }
    for item in &batch.spectra {
        validate_spectrum(&item.impedance_data)?;
    }
    let mut seen = vec![false; batch.spectra.len()];
    for item in &batch.spectra {
        match seen.get_mut(item.iteration) {
            Some(slot) if !*slot => *slot = true,
            _ => return Err(ApiError::InvalidIterations),
        }
    }
    Ok(())
}

//! HTTP surface for document QA.
//!
//! - `GET /health` – Liveness check returning `{"status": "ok"}`.
//! - `POST /v1/qa` – Multipart upload of `questions_file` (JSON array of strings) and
//!   `document_file` (`.pdf` or `.json`). Returns `{"results": [{"question", "answer"}]}` in
//!   question order.
//! - `GET /metrics` – Counters for processed documents, written partitions and answers.
//!
//! Errors are returned as `{"detail": "..."}`. Every response carries an `x-request-id` header,
//! either echoed from the request or freshly minted.

use crate::metrics::MetricsSnapshot;
use crate::processing::{
    DocumentRequest, IngestionError, ProcessingError, QaApi, QaResult, questions::parse_questions,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Request, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Multipart field holding the questions list.
pub const QUESTIONS_FIELD: &str = "questions_file";
/// Multipart field holding the document.
pub const DOCUMENT_FIELD: &str = "document_file";

/// Slack added to the body limit for multipart framing and headers.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

struct AppState<S> {
    service: Arc<S>,
    max_file_size_bytes: usize,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            max_file_size_bytes: self.max_file_size_bytes,
        }
    }
}

/// Build the HTTP router. Uploaded files larger than `max_file_size_bytes` are rejected.
pub fn create_router<S>(service: Arc<S>, max_file_size_bytes: usize) -> Router
where
    S: QaApi + 'static,
{
    let body_limit = max_file_size_bytes
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health))
        .route("/v1/qa", post(answer_questions::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_id))
        .with_state(AppState {
            service,
            max_file_size_bytes,
        })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Response body for `POST /v1/qa`.
#[derive(Serialize)]
struct QaResponse {
    results: Vec<QaResult>,
}

/// Answer every uploaded question against the uploaded document.
async fn answer_questions<S>(
    State(state): State<AppState<S>>,
    mut multipart: Multipart,
) -> Result<Json<QaResponse>, AppError>
where
    S: QaApi,
{
    let mut questions_bytes = None;
    let mut document = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(QUESTIONS_FIELD) => {
                questions_bytes = Some(field.bytes().await?);
            }
            Some(DOCUMENT_FIELD) => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                document = Some((file_name, field.bytes().await?));
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unexpected multipart field");
            }
        }
    }

    let questions_bytes = questions_bytes.ok_or_else(|| missing_field(QUESTIONS_FIELD))?;
    let (file_name, document_bytes) = document.ok_or_else(|| missing_field(DOCUMENT_FIELD))?;

    check_size(QUESTIONS_FIELD, questions_bytes.len(), state.max_file_size_bytes)?;
    check_size(DOCUMENT_FIELD, document_bytes.len(), state.max_file_size_bytes)?;

    let questions = parse_questions(&questions_bytes)
        .map_err(|error| AppError::BadRequest(error.to_string()))?;

    let results = state
        .service
        .answer_document(DocumentRequest {
            file_name,
            bytes: document_bytes.to_vec(),
            questions,
        })
        .await?;

    tracing::info!(results = results.len(), "QA request completed");
    Ok(Json(QaResponse { results }))
}

fn missing_field(name: &str) -> AppError {
    AppError::BadRequest(format!("{name} is required"))
}

fn check_size(name: &str, len: usize, max: usize) -> Result<(), AppError> {
    if len > max {
        return Err(AppError::PayloadTooLarge(format!(
            "{name} exceeds max size {max} bytes"
        )));
    }
    Ok(())
}

/// Return the current counters snapshot.
async fn get_metrics<S>(State(state): State<AppState<S>>) -> Json<MetricsSnapshot>
where
    S: QaApi,
{
    Json(state.service.metrics_snapshot())
}

/// Honour or mint `x-request-id`, run the request inside a span and log its completion.
async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = tracing::info_span!("request", request_id = %id, %method, %path);
    let started = Instant::now();

    let mut response = next.run(request).instrument(span.clone()).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    span.in_scope(|| {
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Request complete"
        );
    });
    response
}

enum AppError {
    BadRequest(String),
    PayloadTooLarge(String),
    Multipart(MultipartError),
    Processing(ProcessingError),
}

fn processing_status(error: &ProcessingError) -> StatusCode {
    match error {
        ProcessingError::Questions(_)
        | ProcessingError::Extraction(_)
        | ProcessingError::EmptyExtraction => StatusCode::BAD_REQUEST,
        ProcessingError::Ingestion(IngestionError::EmptyExtraction) => StatusCode::BAD_REQUEST,
        ProcessingError::Ingestion(
            IngestionError::IndexUnavailable { .. } | IngestionError::LockUnavailable(_),
        ) => StatusCode::SERVICE_UNAVAILABLE,
        ProcessingError::Ingestion(IngestionError::Embedding(_)) => StatusCode::BAD_GATEWAY,
        ProcessingError::Chunking(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::PayloadTooLarge(detail) => (StatusCode::PAYLOAD_TOO_LARGE, detail),
            Self::Multipart(error) => (error.status(), error.body_text()),
            Self::Processing(error) => (processing_status(&error), error.to_string()),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), detail = %detail, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), detail = %detail, "Request rejected");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<ProcessingError> for AppError {
    fn from(inner: ProcessingError) -> Self {
        Self::Processing(inner)
    }
}

impl From<MultipartError> for AppError {
    fn from(inner: MultipartError) -> Self {
        Self::Multipart(inner)
    }
}

//! HTTP server for the cleansing API.
//!
//! Provides REST endpoints for upload, analysis, background preprocessing
//! and download, plus an SSE stream of job events.
//!
//! # API Endpoints
//!
//! | Method | Path                             | Description                      |
//! |--------|----------------------------------|----------------------------------|
//! | GET    | `/api/health`                    | Health check                     |
//! | POST   | `/api/csv/upload`                | Upload CSV (multipart `file`)    |
//! | GET    | `/api/csv/analyze/{file_id}`     | Quality report of a stored file  |
//! | POST   | `/api/csv/preprocess`            | Start a preprocessing job        |
//! | GET    | `/api/csv/task-status/{task_id}` | Poll a job                       |
//! | GET    | `/api/csv/download/{file_id}`    | Download a stored file           |
//! | GET    | `/api/csv/events`                | SSE stream of job events         |

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, io::Read, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::types::{attachment_header, ApiError, PreprocessRequest};
use crate::config::Settings;
use crate::error::ValidationError;
use crate::service::{Cleanser, Submission, TaskStatus, UploadOutcome};
use crate::store::FsArtifactStore;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Start the HTTP server with a filesystem store and background workers.
pub async fn start_server(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = FsArtifactStore::open_dir(&settings.data_dir)?;
    let (service, _workers) = Cleanser::start(Arc::new(store), settings.limits(), settings.worker_count());

    let app = router(service, settings.cors_origin.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!(
        %addr,
        data_dir = %settings.data_dir.display(),
        workers = settings.worker_count(),
        max_upload_mb = settings.max_upload_mb,
        "cleanser server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router.
pub fn router(service: Cleanser, cors_origin: Option<&str>) -> Router {
    let body_limit = service.limits().max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/", get(health))
        .route("/api/health", get(health))
        .route("/api/csv/upload", post(upload_csv))
        .route("/api/csv/analyze/{file_id}", get(analyze_csv))
        .route("/api/csv/preprocess", post(preprocess_csv))
        .route("/api/csv/task-status/{task_id}", get(task_status))
        .route("/api/csv/download/{file_id}", get(download_csv))
        .route("/api/csv/events", get(sse_events))
        .layer(DefaultBodyLimit::max(usize::try_from(body_limit).unwrap_or(usize::MAX)))
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(e)) => {
            warn!(error = %e, "invalid CORS origin, allowing any origin");
            AllowOrigin::from(Any)
        }
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION])
}

/// Run blocking service work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("Task failed: {e}")))?
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "cleanser",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "upload": "POST /api/csv/upload",
            "analyze": "GET /api/csv/analyze/{file_id}",
            "preprocess": "POST /api/csv/preprocess",
            "status": "GET /api/csv/task-status/{task_id}",
            "download": "GET /api/csv/download/{file_id}",
            "events": "GET /api/csv/events (SSE)"
        }
    }))
}

/// Upload CSV endpoint
async fn upload_csv(
    State(service): State<Cleanser>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, ApiError> {
    // reject on the declared length before reading the body
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(length) = declared {
        let max = service.limits().max_upload_bytes;
        if length > max + MULTIPART_OVERHEAD {
            return Err(ApiError::Service(ValidationError::FileTooLarge { size: length, max }.into()));
        }
    }

    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            file_name = field.file_name().map(str::to_string);
            service.validate_upload(0, file_name.as_deref())?;
            file_data = Some(field.bytes().await.map_err(multipart_error)?.to_vec());
        }
    }

    let bytes = file_data.ok_or_else(|| ApiError::Service(ValidationError::EmptyUpload.into()))?;
    let size = bytes.len() as u64;
    info!(name = file_name.as_deref().unwrap_or("unknown"), bytes = size, "upload received");

    let outcome = blocking(move || Ok(service.upload(&bytes, size, file_name.as_deref())?)).await?;
    Ok(Json(outcome))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("Multipart error: {}", err.body_text()))
    }
}

/// Quality report of a stored file
async fn analyze_csv(
    State(service): State<Cleanser>,
    Path(file_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let report = blocking(move || Ok(service.analyze(&file_id)?)).await?;
    let mut body = json!({ "quality_report": report });
    if let Some(columns) = body["quality_report"]["columns"].as_object() {
        let names: Vec<Value> = columns.keys().cloned().map(Value::String).collect();
        body["columns"] = Value::Array(names);
    }
    Ok(Json(body))
}

/// Start a preprocessing job
async fn preprocess_csv(
    State(service): State<Cleanser>,
    Json(request): Json<PreprocessRequest>,
) -> Result<(StatusCode, Json<Submission>), ApiError> {
    if request.file_id.is_empty() {
        return Err(ApiError::BadRequest("File ID is required".to_string()));
    }
    let submission = service.submit_preprocess(&request.file_id, request.options)?;
    Ok((StatusCode::ACCEPTED, Json(submission)))
}

/// Poll a job
async fn task_status(
    State(service): State<Cleanser>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>, ApiError> {
    Ok(Json(service.get_task_status(&task_id)?))
}

/// Download a stored file as a CSV attachment
async fn download_csv(
    State(service): State<Cleanser>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let (name, bytes) = blocking(move || {
        let mut download = service.open_download(&file_id)?;
        let mut bytes = Vec::with_capacity(download.file.byte_size as usize);
        download
            .reader
            .read_to_end(&mut bytes)
            .map_err(|e| ApiError::Internal(format!("Read error: {e}")))?;
        Ok((download.file.download_name(), bytes))
    })
    .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, attachment_header(&name)),
        ],
        bytes,
    )
        .into_response())
}

/// SSE endpoint for real-time job events
async fn sse_events(State(service): State<Cleanser>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = service.events().subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => {
            let json = serde_json::to_string(&event).ok()?;
            Some(Ok(Event::default().event("job").data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

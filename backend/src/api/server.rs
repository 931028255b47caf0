//! HTTP server for the fieldshift engine.
//!
//! One [`Session`] is shared by every request. Runs are single-flight: a run
//! arriving while another is in progress gets `409 Conflict`.
//!
//! # API Endpoints
//!
//! | Method | Path                   | Description                              |
//! |--------|------------------------|------------------------------------------|
//! | GET    | `/health`              | Health check and backend readiness       |
//! | GET    | `/api/mappings`        | Catalog with applicability               |
//! | GET    | `/api/mappings/{key}`  | One mapping with its JSON Schemas        |
//! | POST   | `/api/select`          | Select a mapping                         |
//! | POST   | `/api/run`             | Run code for the selected mapping        |
//! | POST   | `/api/undo`            | Undo the last commit                     |
//! | POST   | `/api/reset`           | Reset to the original data               |
//! | GET    | `/api/dataset`         | Current rows, columns and undo flag      |
//! | GET    | `/api/export`          | Download as `?format=csv` or `json`      |
//! | GET    | `/api/events`          | SSE: dataset changes and activity log    |
//! | GET    | `/api/logs`            | SSE: activity log only                   |

use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::logs::LOG_BROADCASTER;
use super::types::{
    error_response, ExportQuery, MappingDetail, MappingSummary, RunRequest, RunResponse,
    SelectRequest, UndoResponse,
};
use crate::error::{CatalogError, EngineError, SandboxError, ServerError};
use crate::export::{export, ExportFormat};
use crate::sandbox::Backend;
use crate::session::{Selection, Session, SessionSnapshot, UndoOutcome};
use crate::transform::{assess, is_applicable};

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the router over `session`.
pub fn router(session: Session) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/mappings", get(list_mappings))
        .route("/api/mappings/{key}", get(get_mapping))
        .route("/api/select", post(select_mapping))
        .route("/api/run", post(run_transform))
        .route("/api/undo", post(undo))
        .route("/api/reset", post(reset))
        .route("/api/dataset", get(dataset))
        .route("/api/export", get(export_dataset))
        .route("/api/events", get(sse_events))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .with_state(session)
}

/// Start the HTTP server. The embedded backend bootstraps in the background.
pub async fn start_server(session: Session, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    session.executor().spawn_embedded_bootstrap();

    let app = router(session);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "fieldshift server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// Error mapping
// =============================================================================

fn status_for(err: &ServerError) -> StatusCode {
    match err {
        ServerError::BadRequest(_) | ServerError::Dataset(_) => StatusCode::BAD_REQUEST,
        ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ServerError::Engine(engine) => match engine {
            EngineError::Catalog(CatalogError::NotFound(_)) => StatusCode::NOT_FOUND,
            EngineError::Catalog(_) | EngineError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            EngineError::Sandbox(SandboxError::Compilation(_))
            | EngineError::InvalidResult(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Sandbox(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Busy => StatusCode::CONFLICT,
            EngineError::NoMappingSelected | EngineError::EmptyDataset => {
                StatusCode::BAD_REQUEST
            }
        },
    }
}

fn kind_for(err: &ServerError) -> &'static str {
    match err {
        ServerError::BadRequest(_) => "bad_request",
        ServerError::Dataset(_) => "dataset",
        ServerError::Internal(_) => "internal",
        ServerError::Engine(engine) => match engine {
            EngineError::Catalog(_) => "catalog",
            EngineError::Sandbox(SandboxError::Compilation(_)) => "compilation",
            EngineError::Sandbox(SandboxError::BackendNotReady(_)) => "backend_not_ready",
            EngineError::Sandbox(SandboxError::Bootstrap(_)) => "backend_failed",
            EngineError::InvalidResult(_) => "invalid_result",
            EngineError::Busy => "busy",
            EngineError::NoMappingSelected => "no_mapping_selected",
            EngineError::EmptyDataset => "empty_dataset",
            EngineError::Worker(_) => "worker",
        },
    }
}

fn reject(err: impl Into<ServerError>) -> ApiError {
    let err = err.into();
    let status = status_for(&err);
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    // Compilation diagnostics go out verbatim
    let message = match &err {
        ServerError::Engine(engine) => engine.to_string(),
        other => other.to_string(),
    };
    (status, Json(error_response(kind_for(&err), &message)))
}

// =============================================================================
// Handlers
// =============================================================================

async fn health(State(session): State<Session>) -> Json<Value> {
    let executor = session.executor();
    Json(json!({
        "status": "ok",
        "service": "fieldshift",
        "version": env!("CARGO_PKG_VERSION"),
        "defaultBackend": session.default_backend(),
        "backends": {
            "native": executor.is_ready(Backend::Native),
            "embedded": executor.is_ready(Backend::Embedded),
        },
        "embeddedVersion": executor.embedded_version(),
        "running": session.is_running(),
    }))
}

async fn list_mappings(State(session): State<Session>) -> Json<Vec<MappingSummary>> {
    let current = session.current_data();
    let summaries = session
        .catalog()
        .iter()
        .map(|mapping| MappingSummary::new(mapping, is_applicable(mapping, &current)))
        .collect();
    Json(summaries)
}

async fn get_mapping(
    State(session): State<Session>,
    Path(key): Path<String>,
) -> ApiResult<MappingDetail> {
    let mapping = session
        .catalog()
        .get_mapping(&key)
        .map_err(|e| reject(EngineError::from(e)))?;
    let applicability = assess(mapping, &session.current_data());
    Ok(Json(MappingDetail::new(mapping, applicability)))
}

async fn select_mapping(
    State(session): State<Session>,
    Json(request): Json<SelectRequest>,
) -> ApiResult<Selection> {
    session
        .select_mapping(&request.key)
        .map(Json)
        .map_err(reject)
}

async fn run_transform(
    State(session): State<Session>,
    Json(request): Json<RunRequest>,
) -> ApiResult<RunResponse> {
    if request.code.trim().is_empty() {
        return Err(reject(ServerError::BadRequest("code is empty".into())));
    }
    let backend = request.backend.unwrap_or(session.default_backend());

    let outcome = session
        .run_transform_with(&request.code, backend)
        .await
        .map_err(reject)?;

    Ok(Json(RunResponse::new(
        outcome,
        backend,
        session.undo_available(),
    )))
}

async fn undo(State(session): State<Session>) -> ApiResult<UndoResponse> {
    let outcome = session.undo().map_err(reject)?;
    let (undone, message) = match outcome {
        UndoOutcome::Undone => (true, "restored the previous version"),
        UndoOutcome::NothingToUndo => (false, "nothing to undo"),
    };
    Ok(Json(UndoResponse {
        undone,
        message: message.to_string(),
        undo_available: session.undo_available(),
    }))
}

async fn reset(State(session): State<Session>) -> ApiResult<SessionSnapshot> {
    session.reset_to_original().map_err(reject)?;
    Ok(Json(session.snapshot()))
}

async fn dataset(State(session): State<Session>) -> Json<SessionSnapshot> {
    Json(session.snapshot())
}

async fn export_dataset(
    State(session): State<Session>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        Some(name) => name.parse::<ExportFormat>().map_err(reject)?,
        None => ExportFormat::default(),
    };
    let body = export(&session.current_data(), format).map_err(reject)?;

    let headers = [
        (header::CONTENT_TYPE, format.content_type().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"dataset.{}\"", format.extension()),
        ),
    ];
    Ok((headers, body).into_response())
}

/// SSE stream of `dataset` events (every change of the current data) and
/// `log` events (activity log).
async fn sse_events(
    State(session): State<Session>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let changes = BroadcastStream::new(session.subscribe()).filter_map(|result| {
        let change = result.ok()?;
        let json = serde_json::to_string(&change).ok()?;
        Some(Ok::<_, Infallible>(Event::default().event("dataset").data(json)))
    });
    let logs = BroadcastStream::new(LOG_BROADCASTER.subscribe()).filter_map(|result| {
        let entry = result.ok()?;
        let json = serde_json::to_string(&entry).ok()?;
        Some(Ok::<_, Infallible>(Event::default().event("log").data(json)))
    });

    Sse::new(changes.merge(logs)).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok::<_, Infallible>(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

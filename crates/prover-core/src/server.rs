//! HTTP front end for the shared checker session.
//!
//! Endpoints:
//! - `GET /status` - session snapshot
//! - `POST /verify` - submit one program to the checker
//! - `POST /reinitialize` - restart the checker process
//! - `POST /save_file` - store a JSON document under the upload directory

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lean_repl::{CheckerError, SessionState, VerificationBridge};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::uploads;

/// Default per-request check timeout in seconds.
const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 20;

/// Server state shared across all requests.
pub struct ServerState {
    pub bridge: Arc<VerificationBridge>,
    pub upload_dir: PathBuf,
}

/// Request body for `/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub theorem: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Request body for `/save_file`.
#[derive(Debug, Deserialize)]
pub struct SaveFileRequest {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
}

/// Create the router over an explicitly owned checker session.
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/verify", post(handle_verify))
        .route("/reinitialize", post(handle_reinitialize))
        .route("/save_file", post(handle_save_file))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize the checker, serve until Ctrl-C, then tear the session down.
///
/// A failed first start is logged and the server still comes up, so
/// clients can call `/reinitialize`.
pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    match state.bridge.init().await {
        Ok(status) => tracing::info!(pid = ?status.pid, "Checker session ready"),
        Err(e) => tracing::error!(error = %e, "Failed to initialize checker session"),
    }

    let router = create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("Checker server listening on http://0.0.0.0:{port}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    state.bridge.teardown().await;
    Ok(())
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    let message: String = message.into();
    (status, Json(json!({"status": "error", "message": message}))).into_response()
}

/// Handle GET /status
async fn handle_status(State(state): State<Arc<ServerState>>) -> Response {
    let status = state.bridge.status();
    if status.state == SessionState::Uninitialized {
        return Json(json!({"status": "not_initialized", "ready": false})).into_response();
    }
    Json(status).into_response()
}

/// Handle POST /verify
async fn handle_verify(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<VerifyRequest>,
) -> Response {
    let status = state.bridge.status();
    if status.state == SessionState::Uninitialized {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "REPL not initialized");
    }
    if !status.ready {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "REPL not ready");
    }

    let theorem = match request.theorem.as_deref() {
        Some(t) if !t.is_empty() => t,
        _ => return error_body(StatusCode::BAD_REQUEST, "No theorem provided"),
    };
    let timeout =
        Duration::from_secs(request.timeout.unwrap_or(DEFAULT_VERIFY_TIMEOUT_SECS).max(1));

    match state.bridge.verify(theorem, timeout).await {
        Ok(response) => Json(response).into_response(),
        Err(e @ (CheckerError::NotInitialized | CheckerError::NotReady)) => {
            error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) if e.is_session_fatal() => {
            tracing::warn!(error = %e, "Check left the session failed");
            Json(json!({
                "error": e.to_string(),
                "status": "error",
                "repl_ready": false,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Error in verify");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Handle POST /reinitialize
async fn handle_reinitialize(State(state): State<Arc<ServerState>>) -> Response {
    match state.bridge.reinitialize().await {
        Ok(_) => Json(json!({
            "status": "success",
            "message": "REPL initialized successfully",
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to reinitialize checker");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to initialize REPL: {e}"),
            )
        }
    }
}

/// Handle POST /save_file
async fn handle_save_file(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<SaveFileRequest>,
) -> Response {
    let (filename, content) = match (request.filename, request.content) {
        (Some(f), Some(c)) if !f.is_empty() && !c.is_null() => (f, c),
        _ => {
            return error_body(
                StatusCode::BAD_REQUEST,
                "Filename and content are required",
            )
        }
    };

    let safe = uploads::sanitize_filename(&filename);
    if safe.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Invalid filename");
    }

    let dir = state.upload_dir.clone();
    let saved = tokio::task::spawn_blocking(move || uploads::save_json(&dir, &safe, &content)).await;
    match saved {
        Ok(Ok(name)) => Json(json!({
            "status": "success",
            "message": format!("File saved as {name}"),
        }))
        .into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Error in save_file");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

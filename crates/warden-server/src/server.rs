//! `WardenServer`: axum router over the turn service.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use warden_core::ids::{ThreadId, TurnId};
use warden_runtime::{TurnRequest, TurnService};
use warden_store::Thread;

use crate::config::ServerConfig;
use crate::errors::ApiError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::sse::sse_stream;

/// Response header carrying the turn's thread id.
pub const THREAD_ID_HEADER: &str = "x-thread-id";
/// Response header carrying the turn id, for abort.
pub const TURN_ID_HEADER: &str = "x-turn-id";

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Turn service.
    pub service: Arc<TurnService>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

/// The HTTP server.
pub struct WardenServer {
    config: Arc<ServerConfig>,
    service: Arc<TurnService>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl WardenServer {
    /// Create a server over `service`.
    pub fn new(config: ServerConfig, service: Arc<TurnService>) -> Self {
        Self {
            config: Arc::new(config),
            service,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            service: self.service.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            config: self.config.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/v1/turns", post(start_turn))
            .route("/v1/turns/{turn_id}/abort", post(abort_turn))
            .route("/v1/threads/{thread_id}", get(get_thread))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve on `listener` until the shutdown token fires.
    ///
    /// Shutdown cancels every live turn so open streams close, then waits
    /// for in-flight connections.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "warden server listening");

        let token = self.shutdown.token();
        let service = self.service.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                token.cancelled().await;
                service.shutdown();
            })
            .await?;

        info!("warden server stopped");
        Ok(())
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The turn service.
    pub fn service(&self) -> &Arc<TurnService> {
        &self.service
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.service.active_turns(),
        state.shutdown.is_shutting_down(),
    ))
}

/// POST /v1/turns
async fn start_turn(
    State(state): State<AppState>,
    payload: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    if state.shutdown.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }
    let Json(request) = payload?;
    let stream = state.service.start_turn(request).await?;

    let thread_id = stream.thread_id().to_string();
    let turn_id = stream.turn_id().to_string();
    info!(%thread_id, %turn_id, "streaming turn");

    let sse = Sse::new(sse_stream(stream)).keep_alive(KeepAlive::new().interval(state.config.keep_alive()));
    Ok(([(THREAD_ID_HEADER, thread_id), (TURN_ID_HEADER, turn_id)], sse).into_response())
}

/// POST /v1/turns/{turn_id}/abort
async fn abort_turn(
    State(state): State<AppState>,
    Path(turn_id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let turn_id = TurnId::from_string(turn_id);
    if !state.service.abort(&turn_id) {
        return Err(ApiError::NotFound {
            code: "turn_not_found",
            message: format!("turn not found: {turn_id}"),
        });
    }
    info!(%turn_id, "turn aborted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "turnId": turn_id, "aborted": true })),
    ))
}

/// GET /v1/threads/{thread_id}
async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Thread>, ApiError> {
    let thread = state
        .service
        .thread(&ThreadId::from_string(thread_id))
        .await?;
    Ok(Json(thread))
}

//! Local HTTP API used by the dashboard shell

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::{OrderError, RegistryError};
use crate::models::{EnqueueRequest, OfflineSyncItem, SyncHistoryEntry};
use crate::order::{ModuleOrderEngine, OrderCommand, OrderedModule};
use crate::orchestrator::{SyncOrchestrator, SyncStatus};
use crate::queue::DrainOutcome;
use crate::registry::Role;

/// Application state shared across handlers
pub struct AppState {
    pub modules: ModuleOrderEngine,
    pub sync: SyncOrchestrator,
}

impl AppState {
    pub fn new(modules: ModuleOrderEngine, sync: SyncOrchestrator) -> Arc<Self> {
        Arc::new(Self { modules, sync })
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/roles/{role}/modules", get(list_modules))
        .route("/api/v1/roles/{role}/modules/commands", post(apply_command))
        .route("/api/v1/sync/status", get(sync_status))
        .route("/api/v1/sync/queue", get(list_queue).post(enqueue))
        .route("/api/v1/sync/force", post(force_sync))
        .route("/api/v1/sync/history", get(list_history).delete(clear_history))
        .route("/api/v1/connectivity", put(set_connectivity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "opsdeck",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_modules(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
) -> Result<Json<Vec<OrderedModule>>, ApiError> {
    let role: Role = role.parse()?;
    Ok(Json(state.modules.ordered_modules(role)))
}

async fn apply_command(
    State(state): State<Arc<AppState>>,
    Path(role): Path<String>,
    Json(command): Json<OrderCommand>,
) -> Result<Json<Vec<OrderedModule>>, ApiError> {
    let role: Role = role.parse()?;
    state.modules.apply(role, &command)?;
    Ok(Json(state.modules.ordered_modules(role)))
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Json<SyncStatus> {
    Json(state.sync.status())
}

async fn list_queue(State(state): State<Arc<AppState>>) -> Json<Vec<OfflineSyncItem>> {
    Json(state.sync.queue().pending_items())
}

async fn enqueue(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnqueueRequest>,
) -> (StatusCode, Json<OfflineSyncItem>) {
    let item = state
        .sync
        .submit(request.module, request.action, request.data);
    (StatusCode::ACCEPTED, Json(item))
}

async fn force_sync(State(state): State<Arc<AppState>>) -> Result<Json<DrainOutcome>, ApiError> {
    tracing::info!("Manual sync requested");
    Ok(Json(state.sync.force_sync_now().await?))
}

async fn list_history(State(state): State<Arc<AppState>>) -> Json<Vec<SyncHistoryEntry>> {
    Json(state.sync.queue().history())
}

async fn clear_history(State(state): State<Arc<AppState>>) -> StatusCode {
    state.sync.clear_history();
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ConnectivityUpdate {
    online: bool,
}

async fn set_connectivity(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConnectivityUpdate>,
) -> Json<SyncStatus> {
    state.sync.connectivity().set_online(update.online);
    Json(state.sync.status())
}

/// API error type
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(status = %self.status, error = %self.message, "Request rejected");
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        Self::bad_request(err.to_string())
    }
}

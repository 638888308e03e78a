//! API version 1 endpoints.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::getwork::{ConnectionRegistry, WorkerSession};
use crate::tracing::prelude::*;

/// Shared application state for API endpoints.
#[derive(Clone)]
pub struct AppState {
    /// Live getwork sessions
    pub registry: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Status of every live getwork session.
    pub fn get_worker_list(&self) -> WorkerListResponse {
        let sessions = self.registry.sessions();
        debug!(session_count = sessions.len(), "Getting worker list");

        let mut workers: Vec<WorkerStatus> = sessions
            .iter()
            .map(|session| WorkerStatus::from(session.as_ref()))
            .collect();
        workers.sort_by(|a, b| a.address.cmp(&b.address));

        WorkerListResponse {
            total_workers: workers.len(),
            workers,
        }
    }
}

/// Status of one getwork session.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct WorkerStatus {
    /// Session name, as used in logs
    pub name: String,
    /// Client address the session is keyed by
    pub address: String,
    /// Pool the session is bound to
    pub pool: Option<String>,
    /// Usernames authorized through this session
    pub authorized_usernames: Vec<String>,
    /// Long-poll requests currently parked
    pub pending_long_polls: usize,
    /// Whether the backend has delivered work yet
    pub has_work: bool,
    /// Seconds since the session was created
    pub age_secs: u64,
}

impl From<&WorkerSession> for WorkerStatus {
    fn from(session: &WorkerSession) -> Self {
        Self {
            name: session.connection_name(),
            address: session.identity().to_string(),
            pool: session.pool().map(|p| p.name),
            authorized_usernames: session.authorized_usernames(),
            pending_long_polls: session.waiter_count(),
            has_work: session.work().is_some(),
            age_secs: session.age().as_secs(),
        }
    }
}

/// Worker list response.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct WorkerListResponse {
    pub total_workers: usize,
    pub workers: Vec<WorkerStatus>,
}

/// Health check endpoint handler.
///
/// Returns a simple OK status to verify the API is running.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses((status = 200, description = "API is running", body = String))
)]
pub async fn health() -> &'static str {
    "OK"
}

/// List workers endpoint handler.
///
/// # Example
/// ```bash
/// curl http://localhost:7785/api/v1/workers
/// ```
#[utoipa::path(
    get,
    path = "/api/v1/workers",
    responses((status = 200, description = "Live getwork sessions", body = WorkerListResponse))
)]
pub async fn list_workers(State(state): State<AppState>) -> Json<WorkerListResponse> {
    Json(state.get_worker_list())
}

/// Build the v1 API routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/workers", get(list_workers))
        .with_state(state)
}

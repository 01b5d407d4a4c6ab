// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP handlers.
//!
//! Queue management, session ingestion, search and context, plus health
//! and the processing status feed. Bodies are camelCase JSON; errors are
//! `{error}` with a matching status code.

pub mod context;
pub mod queue;
pub mod search;
pub mod sessions;
pub mod status;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use recall_storage::{Database, ObservationStore, PendingStore, SessionStore, StorageError};
use recall_worker::{
    AgentRunner, ContextCompiler, SearchOrchestrator, SessionManager, StatusFeed,
    VectorStoreClient, WorkerError,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ServerConfig;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(e: WorkerError) -> Self {
        match e {
            WorkerError::SessionNotFound(id) => ApiError::NotFound(format!("session {id}")),
            WorkerError::Storage(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Parse a numeric path segment.
pub(crate) fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid id: {raw}")))
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pending: PendingStore,
    pub sessions: SessionStore,
    pub observations: ObservationStore,
    pub manager: Arc<SessionManager>,
    pub search: Arc<SearchOrchestrator>,
    pub context: Arc<ContextCompiler>,
    pub vector: Option<Arc<dyn VectorStoreClient>>,
    /// Age after which a `processing` row is reported as stuck.
    pub stuck_threshold_ms: i64,
    pub vector_timeout: Duration,
}

impl AppState {
    /// Wire stores, the session manager and the read side over one database.
    pub fn new(
        db: Database,
        runner: Arc<dyn AgentRunner>,
        vector: Option<Arc<dyn VectorStoreClient>>,
        config: &ServerConfig,
    ) -> Self {
        let pending = PendingStore::new(db.clone()).with_max_retries(config.watchdog.max_retries);
        let sessions = SessionStore::new(db.clone());
        let observations = ObservationStore::new(db);

        let manager = Arc::new(
            SessionManager::new(
                runner,
                pending.clone(),
                sessions.clone(),
                StatusFeed::default(),
            )
            .with_restart_grace(config.agent.restart_grace()),
        );
        let search = Arc::new(SearchOrchestrator::new(
            observations.clone(),
            vector.clone(),
            config.search.clone(),
        ));
        let context = Arc::new(ContextCompiler::new(
            observations.clone(),
            recall_core::AncestryResolver::with_git_binary(Default::default()),
            config.context.clone(),
        ));

        Self {
            pending,
            sessions,
            observations,
            manager,
            search,
            context,
            vector,
            stuck_threshold_ms: config.watchdog.stuck_threshold_ms,
            vector_timeout: config.search.vector_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert!(matches!(parse_id("abc"), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_id("1.5"), Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::BadRequest("Invalid id: x".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "Invalid id: x");
    }

    #[test]
    fn test_worker_errors_map_to_status() {
        assert!(matches!(
            ApiError::from(WorkerError::SessionNotFound(7)),
            ApiError::NotFound(_)
        ));
        assert!(matches!(
            ApiError::from(WorkerError::Storage(StorageError::NotFound("x".into()))),
            ApiError::NotFound(_)
        ));
    }
}

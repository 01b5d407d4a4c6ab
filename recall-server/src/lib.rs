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

//! Recall Server
//!
//! HTTP surface of the memory worker. Startup opens the store, requeues
//! work left by a previous process, starts the watchdog and serves the
//! queue, ingestion, search and context routes until Ctrl-C.

pub mod api;
pub mod config;
pub mod llm;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use recall_core::AncestryResolver;
use recall_storage::{Database, ObservationStore, PendingStore};
use recall_worker::{
    AgentRunner, CompressionAgent, HttpVectorStoreClient, VectorStoreClient, Watchdog,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use config::{LoggingConfig, ServerConfig};
use llm::AnthropicCompressionClient;

const DEFAULT_LOG_FILTER: &str =
    "recall_server=info,recall_worker=info,recall_storage=info,tower_http=info";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = if logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

/// All routes over `state`. The event stream is exempt from the request timeout.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let api = Router::new()
        .route("/health", get(api::status::health_check))
        .route("/api/processing-status", get(api::status::processing_status))
        // Queue management
        .route("/api/queue", get(api::queue::get_queue))
        .route("/api/queue/retry-all-stuck", post(api::queue::retry_all_stuck))
        .route("/api/queue/clear-failed", post(api::queue::clear_failed))
        .route("/api/queue/clear-all", post(api::queue::clear_all))
        .route("/api/queue/:id/retry", post(api::queue::retry_message))
        .route("/api/queue/:id/abort", post(api::queue::abort_message))
        .route(
            "/api/queue/session/:id/restart",
            post(api::queue::restart_session),
        )
        .route(
            "/api/queue/session/:id/recover",
            post(api::queue::recover_session),
        )
        // Ingestion
        .route("/api/sessions/init", post(api::sessions::init_session))
        .route(
            "/api/sessions/:id/observations",
            post(api::sessions::queue_observation),
        )
        .route(
            "/api/sessions/:id/summarize",
            post(api::sessions::queue_summary),
        )
        // Retrieval
        .route("/api/search", get(api::search::search))
        .route("/api/context", get(api::context::get_context))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs.max(1),
        )));

    let app = Router::new()
        .route("/api/events", get(api::status::events))
        .merge(api)
        .with_state(state);

    let app = if config.server.enable_cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    };

    app.layer(TraceLayer::new_for_http())
}

fn vector_client(config: &ServerConfig) -> Result<Option<Arc<dyn VectorStoreClient>>> {
    if !config.vector.enabled {
        tracing::info!("Vector search disabled, using keyword search only");
        return Ok(None);
    }
    let client = HttpVectorStoreClient::new(&config.vector.base_url, &config.vector.collection)
        .with_timeout(config.search.vector_timeout())?;
    tracing::info!(
        base_url = %config.vector.base_url,
        collection = %config.vector.collection,
        "Vector store configured"
    );
    Ok(Some(Arc::new(client)))
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    init_tracing(&config.logging);
    tracing::info!("Starting Recall Server");

    config.validate()?;

    let db_path = config.storage.db_path();
    tracing::info!("Opening database at: {:?}", db_path);
    let db = Database::open(&db_path)?;

    let vector = vector_client(&config)?;

    let llm = AnthropicCompressionClient::new(config.agent.clone())?;
    if !llm.has_api_key() {
        tracing::warn!("ANTHROPIC_API_KEY not set, queued messages will fail until it is");
    }
    tracing::info!(model = %config.agent.model, "Compression model configured");

    let mut agent = CompressionAgent::new(
        Arc::new(llm),
        PendingStore::new(db.clone()).with_max_retries(config.watchdog.max_retries),
        ObservationStore::new(db.clone()),
    )
    .with_git(AncestryResolver::with_git_binary(Default::default()))
    .with_request_timeout(config.agent.request_timeout());
    if let Some(vector) = &vector {
        agent = agent.with_vector_store(vector.clone());
    }
    let runner: Arc<dyn AgentRunner> = Arc::new(agent);

    let state = AppState::new(db, runner, vector, &config);
    let manager = state.manager.clone();

    let watchdog = Arc::new(Watchdog::new(
        manager.clone(),
        state.pending.clone(),
        config.watchdog.clone(),
    ));
    let recovery = watchdog.recover_pending_messages().await?;
    tracing::info!(
        reset = recovery.reset,
        sessions = recovery.sessions,
        "Recovered pending work"
    );
    watchdog.start();

    let app = build_router(state, &config);
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    watchdog.stop().await;
    manager.shutdown_all().await;
    tracing::info!("Recall Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_vector_client_follows_config() {
        let mut config = ServerConfig::default();
        assert!(vector_client(&config).unwrap().is_none());
        config.vector.enabled = true;
        assert!(vector_client(&config).unwrap().is_some());
    }
}

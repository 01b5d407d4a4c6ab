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

//! Route tests against an in-memory store, driven through the router.

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use recall_core::{now_epoch_ms, NewPendingMessage};
use recall_server::{api::AppState, build_router, config::ServerConfig};
use recall_storage::Database;
use recall_worker::{AgentRunner, RunSummary, SessionContext, WorkerResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// Holds its session until cancelled.
struct BlockingRunner;

#[async_trait]
impl AgentRunner for BlockingRunner {
    async fn run_session(
        &self,
        _session: SessionContext,
        cancel: CancellationToken,
    ) -> WorkerResult<RunSummary> {
        cancel.cancelled().await;
        Ok(RunSummary {
            cancelled: true,
            ..Default::default()
        })
    }
}

struct TestApp {
    state: AppState,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let config = ServerConfig::default();
        let state = AppState::new(
            Database::open_in_memory().unwrap(),
            Arc::new(BlockingRunner),
            None,
            &config,
        );
        let router = build_router(state.clone(), &config);
        Self { state, router }
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn session(&self, content_id: &str) -> i64 {
        self.state
            .sessions
            .init_session(content_id, "recall", None)
            .unwrap()
            .id
    }

    fn enqueue(&self, session_db_id: i64) -> i64 {
        self.state
            .pending
            .enqueue(&NewPendingMessage::observation(
                session_db_id,
                "content-a",
                "Read",
                json!({"file_path": "src/lib.rs"}),
                json!({"lines": 10}),
            ))
            .unwrap()
    }
}

#[tokio::test]
async fn test_empty_queue() {
    let app = TestApp::new();
    let (status, body) = app.call("GET", "/api/queue", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"], json!([]));
    assert_eq!(body["recentlyProcessed"], json!([]));
    assert_eq!(body["stuckCount"], 0);
    assert_eq!(body["stuckThresholdMs"], 150_000);
    assert_eq!(body["sessionStatus"], json!({}));
}

#[tokio::test]
async fn test_non_integer_ids_are_rejected() {
    let app = TestApp::new();
    for uri in [
        "/api/queue/abc/retry",
        "/api/queue/abc/abort",
        "/api/queue/session/xyz/restart",
        "/api/queue/session/1.5/recover",
    ] {
        let (status, body) = app.call("POST", uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].as_str().unwrap().contains("Invalid id"));
    }
}

#[tokio::test]
async fn test_retry_and_abort_report_success_once() {
    let app = TestApp::new();
    let session = app.session("content-a");
    let first = app.enqueue(session);
    let second = app.enqueue(session);
    app.state.pending.claim_next(session).unwrap();
    assert!(!app.state.manager.has_active_generator(session));

    let (_, body) = app
        .call("POST", &format!("/api/queue/{first}/retry"), None)
        .await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Message queued for retry");
    assert!(app.state.manager.has_active_generator(session));

    let (_, body) = app
        .call("POST", &format!("/api/queue/{first}/retry"), None)
        .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Message not found or not retryable");

    let (_, body) = app
        .call("POST", &format!("/api/queue/{second}/abort"), None)
        .await;
    assert_eq!(body, json!({"success": true}));
    let (_, body) = app
        .call("POST", &format!("/api/queue/{second}/abort"), None)
        .await;
    assert_eq!(body, json!({"success": false}));
}

#[tokio::test]
async fn test_stuck_rows_are_flagged_and_reset() {
    let app = TestApp::new();
    let session = app.session("content-a");
    let id = app.enqueue(session);
    app.state
        .pending
        .claim_next_at(session, now_epoch_ms() - 200_000)
        .unwrap();

    let (_, body) = app.call("GET", "/api/queue", None).await;
    assert_eq!(body["stuckCount"], 1);
    let message = &body["messages"][0];
    assert_eq!(message["id"], id);
    assert_eq!(message["status"], "processing");
    assert_eq!(message["isStuck"], true);
    assert_eq!(message["hasActiveAgent"], false);

    let (status, body) = app.call("POST", "/api/queue/retry-all-stuck", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "count": 1}));

    let (_, body) = app.call("GET", "/api/queue", None).await;
    assert_eq!(body["messages"][0]["status"], "pending");
    assert_eq!(body["messages"][0]["hasActiveAgent"], true);
    assert_eq!(body["stuckCount"], 0);
}

#[tokio::test]
async fn test_recover_and_restart_session() {
    let app = TestApp::new();
    let session = app.session("content-a");
    app.enqueue(session);
    app.state.pending.claim_next(session).unwrap();

    let (status, body) = app
        .call("POST", &format!("/api/queue/session/{session}/recover"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["pendingCount"], 1);
    assert_eq!(body["messagesReset"], 1);
    assert!(app.state.manager.has_active_generator(session));

    let (_, body) = app.call("GET", "/api/queue", None).await;
    assert_eq!(
        body["sessionStatus"][session.to_string()]["hasActiveAgent"],
        true
    );

    let (status, body) = app
        .call("POST", &format!("/api/queue/session/{session}/restart"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["messagesReset"], 0);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with(&format!("Session {session} restarted")));

    app.state.manager.shutdown_all().await;
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = TestApp::new();
    let (status, body) = app.call("POST", "/api/queue/session/999/restart", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = app
        .call(
            "POST",
            "/api/sessions/999/observations",
            Some(json!({"toolName": "Read"})),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_recover_without_work_reports_failure() {
    let app = TestApp::new();
    let session = app.session("content-a");
    let (_, body) = app
        .call("POST", &format!("/api/queue/session/{session}/recover"), None)
        .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["pendingCount"], 0);
    assert!(!app.state.manager.has_active_generator(session));
}

#[tokio::test]
async fn test_ingestion_flow_starts_one_agent() {
    let app = TestApp::new();
    let (status, body) = app
        .call(
            "POST",
            "/api/sessions/init",
            Some(json!({
                "contentSessionId": "content-a",
                "project": "recall",
                "prompt": "Fix the flaky login test"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["promptNumber"], 1);
    let session = body["sessionDbId"].as_i64().unwrap();

    for _ in 0..2 {
        let (status, body) = app
            .call(
                "POST",
                &format!("/api/sessions/{session}/observations"),
                Some(json!({
                    "toolName": "Edit",
                    "toolInput": {"file_path": "src/login.rs"},
                    "toolResponse": {"ok": true},
                    "cwd": "/work/recall",
                    "promptNumber": 1
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
        assert!(body["messageId"].as_i64().is_some());
    }

    let (_, body) = app
        .call("POST", &format!("/api/sessions/{session}/summarize"), None)
        .await;
    assert_eq!(body["status"], "queued");

    let (_, status) = app.call("GET", "/api/processing-status", None).await;
    assert_eq!(status["isProcessing"], true);
    assert_eq!(status["queueDepth"], 3);
    assert_eq!(status["activeSessions"], 1);

    let (_, queue) = app.call("GET", "/api/queue", None).await;
    assert_eq!(queue["messages"].as_array().unwrap().len(), 3);
    assert_eq!(queue["messages"][0]["project"], "recall");

    app.state.manager.shutdown_all().await;
}

#[tokio::test]
async fn test_clear_routes() {
    let app = TestApp::new();
    let session = app.session("content-a");
    app.enqueue(session);
    app.enqueue(session);

    let (_, body) = app.call("POST", "/api/queue/clear-failed", None).await;
    assert_eq!(body, json!({"success": true, "count": 0}));
    let (_, body) = app.call("POST", "/api/queue/clear-all", None).await;
    assert_eq!(body, json!({"success": true, "count": 2}));
}

#[tokio::test]
async fn test_health_search_and_context() {
    let app = TestApp::new();

    let (status, body) = app.call("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.call("GET", "/api/search?query=login&type=all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["strategy"], "bm25");
    assert_eq!(body["usedVector"], false);
    assert_eq!(body["fellBack"], false);

    let (status, _) = app.call("GET", "/api/search?type=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.call("GET", "/api/context", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "project is required");

    let (status, body) = app.call("GET", "/api/context?project=recall", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["observationCount"], 0);
    assert_eq!(body["visibility"], "all");
}

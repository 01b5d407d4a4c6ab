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

//! Queue API - inspect and repair the pending message queue
//!
//! Operator routes for retrying, aborting and bulk-resetting rows, and for
//! restarting or recovering a session's agent.

use axum::{
    extract::{Path, State},
    Json,
};
use recall_core::{now_epoch_ms, PendingMessage};
use recall_worker::SessionDiagnostics;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::api::{parse_id, ApiError, AppState};

/// Recently processed rows shown alongside the live queue.
const RECENT_LIMIT: usize = 10;
const RECENT_WINDOW_MINUTES: i64 = 30;

/// A queue row plus computed flags
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessageView {
    #[serde(flatten)]
    pub message: PendingMessage,
    pub is_stuck: bool,
    pub has_active_agent: bool,
}

/// Response for GET /api/queue
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueResponse {
    pub messages: Vec<QueueMessageView>,
    pub recently_processed: Vec<QueueMessageView>,
    pub stuck_count: usize,
    pub stuck_threshold_ms: i64,
    pub session_status: BTreeMap<i64, SessionDiagnostics>,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartResponse {
    pub success: bool,
    pub messages_reset: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverResponse {
    pub success: bool,
    pub pending_count: usize,
    pub messages_reset: usize,
    pub message: String,
}

/// GET /api/queue - Unfinished messages with session diagnostics
pub async fn get_queue(State(state): State<AppState>) -> Result<Json<QueueResponse>, ApiError> {
    let messages = state.pending.queue_messages()?;
    let stuck_count = state.pending.stuck_count(state.stuck_threshold_ms)?;
    let recent = state
        .pending
        .recently_processed(RECENT_LIMIT, RECENT_WINDOW_MINUTES)?;
    let session_status = state.manager.session_diagnostics();

    let now = now_epoch_ms();
    let messages = messages
        .into_iter()
        .map(|message| QueueMessageView {
            is_stuck: message.is_stuck(now, state.stuck_threshold_ms),
            has_active_agent: session_status
                .get(&message.session_db_id)
                .map(|d| d.has_active_agent)
                .unwrap_or(false),
            message,
        })
        .collect();
    let recently_processed = recent
        .into_iter()
        .map(|message| QueueMessageView {
            message,
            is_stuck: false,
            has_active_agent: false,
        })
        .collect();

    Ok(Json(QueueResponse {
        messages,
        recently_processed,
        stuck_count,
        stuck_threshold_ms: state.stuck_threshold_ms,
        session_status,
    }))
}

/// POST /api/queue/:id/retry
pub async fn retry_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let id = parse_id(&id)?;
    let success = state.pending.retry_message(id)?;
    if success {
        info!(message_id = id, "Message queued for retry");
        if let Some((session_db_id, _)) = state.pending.session_info_for_message(id)? {
            wake_session(&state, session_db_id);
        }
        state.manager.publish_status();
    }

    Ok(Json(RetryResponse {
        success,
        message: if success {
            "Message queued for retry".to_string()
        } else {
            "Message not found or not retryable".to_string()
        },
    }))
}

/// POST /api/queue/:id/abort
pub async fn abort_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AbortResponse>, ApiError> {
    let id = parse_id(&id)?;
    let success = state.pending.abort_message(id)?;
    if success {
        info!(message_id = id, "Message aborted");
        state.manager.publish_status();
    }
    Ok(Json(AbortResponse { success }))
}

/// POST /api/queue/retry-all-stuck
pub async fn retry_all_stuck(
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.pending.retry_all_stuck(state.stuck_threshold_ms)?;
    if count > 0 {
        info!(count, "Reset stuck messages on request");
        for session_db_id in state.pending.sessions_with_pending_messages()? {
            wake_session(&state, session_db_id);
        }
        state.manager.publish_status();
    }
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

/// POST /api/queue/session/:id/restart - Cancel the agent and requeue its work
pub async fn restart_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RestartResponse>, ApiError> {
    let session_db_id = parse_id(&id)?;
    let outcome = state.manager.force_restart_session(session_db_id).await?;
    state.manager.publish_status();

    Ok(Json(RestartResponse {
        success: outcome.success,
        messages_reset: outcome.messages_reset,
        message: format!(
            "Session {session_db_id} restarted, {} messages reset to pending",
            outcome.messages_reset
        ),
    }))
}

/// POST /api/queue/session/:id/recover - Bring an orphaned session back under an agent
pub async fn recover_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecoverResponse>, ApiError> {
    let session_db_id = parse_id(&id)?;
    let outcome = state.manager.recover_orphaned_session(session_db_id)?;
    state.manager.publish_status();

    let message = if outcome.success {
        format!(
            "Session {session_db_id} recovered: {} reset, {} pending",
            outcome.messages_reset, outcome.pending_count
        )
    } else {
        format!("Session {session_db_id} has no pending messages to recover")
    };

    Ok(Json(RecoverResponse {
        success: outcome.success,
        pending_count: outcome.pending_count,
        messages_reset: outcome.messages_reset,
        message,
    }))
}

/// Start an agent for the session unless one is already live.
fn wake_session(state: &AppState, session_db_id: i64) {
    let started = state
        .manager
        .initialize_session(session_db_id)
        .and_then(|_| state.manager.start_generator(session_db_id));
    match started {
        Ok(started) => debug!(session_db_id, started, "Woke session after retry"),
        Err(e) => warn!(session_db_id, error = %e, "Failed to wake session after retry"),
    }
}

/// POST /api/queue/clear-failed
pub async fn clear_failed(State(state): State<AppState>) -> Result<Json<CountResponse>, ApiError> {
    let count = state.pending.clear_failed()?;
    debug!(count, "Cleared failed messages");
    if count > 0 {
        state.manager.publish_status();
    }
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

/// POST /api/queue/clear-all - Drop every unfinished row
pub async fn clear_all(State(state): State<AppState>) -> Result<Json<CountResponse>, ApiError> {
    let count = state.pending.clear_all()?;
    info!(count, "Cleared queue");
    if count > 0 {
        state.manager.publish_status();
    }
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

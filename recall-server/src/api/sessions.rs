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

//! Sessions API - session start, tool observations and summary requests
//!
//! Observations and summaries are queued and picked up by the session's
//! agent; the handlers only persist and wake it.

use axum::{
    extract::{Path, State},
    Json,
};
use recall_core::{Degradation, NewPendingMessage, NewUserPrompt, SearchOptions};
use recall_worker::vector::prompt_document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{parse_id, ApiError, AppState};

/// Body for POST /api/sessions/init
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSessionRequest {
    pub content_session_id: String,
    #[serde(default)]
    pub project: String,
    pub prompt: Option<String>,
    pub prompt_number: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSessionResponse {
    pub session_db_id: i64,
    pub prompt_number: i64,
}

/// Body for POST /api/sessions/:id/observations
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRequest {
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_response: Value,
    pub cwd: Option<String>,
    pub prompt_number: Option<i64>,
}

/// Body for POST /api/sessions/:id/summarize
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizeRequest {
    pub last_assistant_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedResponse {
    pub status: &'static str,
    pub message_id: i64,
}

/// POST /api/sessions/init - Create or resume a session and record its prompt
pub async fn init_session(
    State(state): State<AppState>,
    Json(req): Json<InitSessionRequest>,
) -> Result<Json<InitSessionResponse>, ApiError> {
    if req.content_session_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "contentSessionId must not be empty".to_string(),
        ));
    }

    let prompt = req.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let record = state
        .sessions
        .init_session(&req.content_session_id, &req.project, prompt)?;

    let Some(prompt_text) = prompt else {
        return Ok(Json(InitSessionResponse {
            session_db_id: record.id,
            prompt_number: record.prompt_counter,
        }));
    };

    let prompt_number = match req.prompt_number {
        Some(n) => n,
        None => state.sessions.next_prompt_number(record.id)?,
    };
    let prompt_id = state.observations.insert_user_prompt(&NewUserPrompt {
        content_session_id: record.content_session_id.clone(),
        project: record.project.clone(),
        prompt_number,
        prompt_text: prompt_text.to_string(),
    })?;
    info!(
        session_db_id = record.id,
        prompt_number, "Session initialized"
    );

    if let Some(vector) = &state.vector {
        let stored = state
            .observations
            .prompts_by_ids(&[prompt_id], &SearchOptions::default())?;
        let docs: Vec<_> = stored.iter().map(prompt_document).collect();
        match tokio::time::timeout(state.vector_timeout, vector.upsert(docs)).await {
            Ok(Ok(())) => debug!(prompt_id, "Indexed user prompt"),
            Ok(Err(e)) => warn!(
                prompt_id,
                error = %e,
                degradation = %Degradation::StrategyUnavailable,
                "Prompt upsert failed"
            ),
            Err(_) => warn!(
                prompt_id,
                degradation = %Degradation::StrategyUnavailable,
                "Prompt upsert timed out"
            ),
        }
    }

    Ok(Json(InitSessionResponse {
        session_db_id: record.id,
        prompt_number,
    }))
}

/// POST /api/sessions/:id/observations - Queue a tool use for compression
pub async fn queue_observation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ObservationRequest>,
) -> Result<Json<QueuedResponse>, ApiError> {
    let session_db_id = parse_id(&id)?;
    if req.tool_name.trim().is_empty() {
        return Err(ApiError::BadRequest("toolName must not be empty".to_string()));
    }
    let session = state.manager.initialize_session(session_db_id)?;

    let mut message = NewPendingMessage::observation(
        session_db_id,
        session.content_session_id,
        req.tool_name,
        req.tool_input,
        req.tool_response,
    );
    if let Some(cwd) = req.cwd {
        message = message.with_cwd(cwd);
    }
    if let Some(n) = req.prompt_number {
        message = message.with_prompt_number(n);
    }

    enqueue_and_wake(&state, session_db_id, &message)
}

/// POST /api/sessions/:id/summarize - Queue a session summary
pub async fn queue_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<SummarizeRequest>>,
) -> Result<Json<QueuedResponse>, ApiError> {
    let session_db_id = parse_id(&id)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let session = state.manager.initialize_session(session_db_id)?;

    let message = NewPendingMessage::summarize(
        session_db_id,
        session.content_session_id,
        req.last_assistant_message,
    );
    enqueue_and_wake(&state, session_db_id, &message)
}

fn enqueue_and_wake(
    state: &AppState,
    session_db_id: i64,
    message: &NewPendingMessage,
) -> Result<Json<QueuedResponse>, ApiError> {
    let message_id = state.pending.enqueue(message)?;
    let started = state.manager.start_generator(session_db_id)?;
    debug!(
        session_db_id,
        message_id,
        message_type = %message.message_type,
        started,
        "Message queued"
    );
    if !started {
        state.manager.publish_status();
    }

    Ok(Json(QueuedResponse {
        status: "queued",
        message_id,
    }))
}

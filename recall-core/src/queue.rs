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

//! Pending message queue types.
//!
//! A pending message is one captured event (a tool use or an end-of-turn
//! summary request) waiting for the compression agent. Rows move through
//! `pending -> processing -> processed`, with `failed` as the terminal state
//! once retries are exhausted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Failed,
    Processed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Failed => "failed",
            MessageStatus::Processed => "processed",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "processing" => Ok(MessageStatus::Processing),
            "failed" => Ok(MessageStatus::Failed),
            "processed" => Ok(MessageStatus::Processed),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

/// What the agent should do with a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Compress one tool use into an observation.
    Observation,
    /// Summarize the session so far.
    Summarize,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Observation => "observation",
            MessageType::Summarize => "summarize",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(MessageType::Observation),
            "summarize" => Ok(MessageType::Summarize),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

/// A persisted queue row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: i64,
    pub session_db_id: i64,
    pub content_session_id: String,
    pub message_type: MessageType,
    pub tool_name: Option<String>,
    /// JSON text of the tool input.
    pub tool_input: Option<String>,
    /// JSON text of the tool response.
    pub tool_response: Option<String>,
    pub cwd: Option<String>,
    pub last_assistant_message: Option<String>,
    pub prompt_number: Option<i64>,
    pub status: MessageStatus,
    pub retry_count: u32,
    pub created_at_epoch: i64,
    pub started_processing_at_epoch: Option<i64>,
    pub completed_at_epoch: Option<i64>,
    pub failed_at_epoch: Option<i64>,
    /// Project of the owning session, filled in by listing queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

impl PendingMessage {
    /// Whether the row has been `processing` for longer than `threshold_ms`.
    pub fn is_stuck(&self, now_ms: i64, threshold_ms: i64) -> bool {
        self.status == MessageStatus::Processing
            && self
                .started_processing_at_epoch
                .map(|started| now_ms - started > threshold_ms)
                .unwrap_or(false)
    }

    /// Parsed tool input, if present and valid JSON.
    pub fn tool_input_json(&self) -> Option<serde_json::Value> {
        self.tool_input
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Parsed tool response, if present and valid JSON.
    pub fn tool_response_json(&self) -> Option<serde_json::Value> {
        self.tool_response
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// A message about to be enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPendingMessage {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub message_type: MessageType,
    pub tool_name: Option<String>,
    pub tool_input: Option<serde_json::Value>,
    pub tool_response: Option<serde_json::Value>,
    pub cwd: Option<String>,
    pub last_assistant_message: Option<String>,
    pub prompt_number: Option<i64>,
}

impl NewPendingMessage {
    /// A tool-use observation request.
    pub fn observation(
        session_db_id: i64,
        content_session_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: serde_json::Value,
        tool_response: serde_json::Value,
    ) -> Self {
        Self {
            session_db_id,
            content_session_id: content_session_id.into(),
            message_type: MessageType::Observation,
            tool_name: Some(tool_name.into()),
            tool_input: Some(tool_input),
            tool_response: Some(tool_response),
            cwd: None,
            last_assistant_message: None,
            prompt_number: None,
        }
    }

    /// A session summary request.
    pub fn summarize(
        session_db_id: i64,
        content_session_id: impl Into<String>,
        last_assistant_message: Option<String>,
    ) -> Self {
        Self {
            session_db_id,
            content_session_id: content_session_id.into(),
            message_type: MessageType::Summarize,
            tool_name: None,
            tool_input: None,
            tool_response: None,
            cwd: None,
            last_assistant_message,
            prompt_number: None,
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_prompt_number(mut self, prompt_number: i64) -> Self {
        self.prompt_number = Some(prompt_number);
        self
    }
}

/// Result of reporting a processing failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailOutcome {
    /// Returned to `pending` for another attempt.
    Requeued { retry_count: u32 },
    /// Retries exhausted; the row is terminally `failed`.
    Exhausted { retry_count: u32 },
    /// No row with that id.
    NotFound,
}

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

//! Worker error types

use recall_storage::StorageError;
use thiserror::Error;

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors surfaced by the session manager, search and context compiler.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("Vector store error: {0}")]
    Vector(#[from] VectorStoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors from the vector store sidecar.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Vector store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl From<reqwest::Error> for VectorStoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            VectorStoreError::Decode(e.to_string())
        } else {
            VectorStoreError::Transport(e.to_string())
        }
    }
}

/// Errors from one compression attempt.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM client error: {0}")]
    Llm(String),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Parse(e.to_string())
    }
}

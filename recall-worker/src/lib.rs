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

//! Recall Worker
//!
//! The background half of the memory system:
//!
//! - [`session::SessionManager`] keeps at most one agent task per session
//! - [`agent::CompressionAgent`] drains a session's queue through an LLM
//! - [`watchdog::Watchdog`] resets stuck rows and revives orphaned sessions
//! - [`search`] answers keyword, vector and blended queries
//! - [`context::ContextCompiler`] renders branch-consistent context

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod search;
pub mod session;
pub mod vector;
pub mod watchdog;

pub use agent::{
    AgentRunner, CompressedObservation, CompressedSummary, CompressionAgent, CompressionClient,
    CompressionOutput, MockCompressionClient, RunSummary, SessionContext,
};
pub use config::{AgentConfig, ContextConfig, SearchConfig, VectorConfig, WatchdogConfig};
pub use context::{CompiledContext, ContextCompiler};
pub use error::{AgentError, VectorStoreError, WorkerError, WorkerResult};
pub use events::{ProcessingStatus, StatusFeed};
pub use search::{
    blend, sanitize_query, BlendWeights, Bm25Strategy, HybridBlendStrategy, SearchOrchestrator,
    SearchStrategy, VectorStrategy,
};
pub use session::{
    RecoverOutcome, RestartOutcome, SessionDiagnostics, SessionManager, SessionSnapshot,
};
pub use vector::{
    DocType, HttpVectorStoreClient, VectorDocument, VectorMetadata, VectorQueryResult,
    VectorStoreClient,
};
pub use watchdog::{RecoveryReport, TickReport, Watchdog};

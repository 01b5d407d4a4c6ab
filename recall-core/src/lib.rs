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

//! Recall Core
//!
//! Shared domain types for the recall memory worker: queue rows, stored
//! memories, search options and results, the degradation taxonomy, and the
//! git ancestry resolver used to keep context consistent with the current
//! branch.

pub mod error;
pub mod git;
pub mod memory;
pub mod observation_types;
pub mod queue;
pub mod search;

pub use error::Degradation;
pub use git::{
    AncestryConfig, AncestryResolver, CommandGitRunner, GitError, GitOutput, GitRunner,
};
pub use memory::{
    CommitVisibility, NewObservation, NewSessionSummary, NewUserPrompt, ObservationRecord,
    SessionRecord, SessionSummaryRecord, UserPromptRecord,
};
pub use observation_types::ObservationType;
pub use queue::{FailOutcome, MessageStatus, MessageType, NewPendingMessage, PendingMessage};
pub use search::{
    DateRange, OrderBy, Ranked, SearchOptions, SearchResults, SearchType, StrategyKind,
    StrategyResult,
};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

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

//! Degradation taxonomy.
//!
//! None of these conditions is returned to a caller. Each one is recovered or
//! degraded inside the component that detects it and recorded as the
//! `degradation` field of a tracing event, so operators can filter on it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recoverable conditions that are logged rather than propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// A queue row stayed in `processing` past the stuck threshold.
    StuckMessage,
    /// A queue row used up its retries and is now terminally `failed`.
    ExhaustedRetries,
    /// A session has pending work but no task owns its queue.
    OrphanedSession,
    /// A search backend failed and the result was degraded.
    StrategyUnavailable,
    /// A commit could not be resolved against the working tree.
    AncestryUnresolvable,
}

impl Degradation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Degradation::StuckMessage => "stuck_message",
            Degradation::ExhaustedRetries => "exhausted_retries",
            Degradation::OrphanedSession => "orphaned_session",
            Degradation::StrategyUnavailable => "strategy_unavailable",
            Degradation::AncestryUnresolvable => "ancestry_unresolvable",
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

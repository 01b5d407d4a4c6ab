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

//! Stored memory records.
//!
//! Sessions, compressed observations, session summaries and user prompts as
//! they live in the system of record. `New*` types are what the agent
//! produces; `*Record` types are what queries return.

use crate::observation_types::ObservationType;
use serde::{Deserialize, Serialize};

/// A coding session known to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub content_session_id: String,
    pub project: String,
    pub user_prompt: Option<String>,
    pub started_at_epoch: i64,
    pub status: String,
    /// Number of user prompts recorded for this session.
    pub prompt_counter: i64,
}

/// A compressed observation produced by the agent, ready to persist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewObservation {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub project: String,
    #[serde(rename = "type", default)]
    pub obs_type: ObservationType,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub prompt_number: Option<i64>,
    pub commit_sha: Option<String>,
    pub branch: Option<String>,
}

/// An observation as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub id: i64,
    pub session_db_id: i64,
    pub content_session_id: String,
    pub project: String,
    #[serde(rename = "type")]
    pub obs_type: ObservationType,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub text: Option<String>,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub prompt_number: Option<i64>,
    pub commit_sha: Option<String>,
    pub branch: Option<String>,
    pub created_at_epoch: i64,
    /// Relevance assigned by the strategy that produced this row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl ObservationRecord {
    /// Title, falling back to the subtitle, then to a placeholder.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.subtitle.as_deref())
            .unwrap_or("(untitled)")
    }
}

/// A session summary produced by the agent, ready to persist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSessionSummary {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub project: String,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
    pub prompt_number: Option<i64>,
}

/// A session summary as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummaryRecord {
    pub id: i64,
    pub session_db_id: i64,
    pub content_session_id: String,
    pub project: String,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
    pub prompt_number: Option<i64>,
    pub created_at_epoch: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A user prompt to record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUserPrompt {
    pub content_session_id: String,
    pub project: String,
    pub prompt_number: i64,
    pub prompt_text: String,
}

/// A user prompt as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPromptRecord {
    pub id: i64,
    pub content_session_id: String,
    pub project: String,
    pub prompt_number: i64,
    pub prompt_text: String,
    pub created_at_epoch: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Which observations are visible given the branch ancestry of the working tree.
///
/// Observations recorded outside any repository carry no commit and are
/// always visible.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "commits", rename_all = "kebab-case")]
pub enum CommitVisibility {
    /// No commit filtering.
    #[default]
    All,
    /// Inside a repository but nothing recorded is an ancestor of HEAD.
    UnversionedOnly,
    /// Ancestors of HEAD, plus unversioned observations.
    Visible(Vec<String>),
}

impl CommitVisibility {
    /// Map the resolver contract onto a filter: `None` means the directory is
    /// not a repository, an empty list means no candidate is reachable.
    pub fn from_resolved(resolved: Option<Vec<String>>) -> Self {
        match resolved {
            None => CommitVisibility::All,
            Some(shas) if shas.is_empty() => CommitVisibility::UnversionedOnly,
            Some(shas) => CommitVisibility::Visible(shas),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CommitVisibility::All => "all",
            CommitVisibility::UnversionedOnly => "unversioned-only",
            CommitVisibility::Visible(_) => "filtered",
        }
    }

    /// Whether an observation recorded at `commit_sha` passes this filter.
    pub fn admits(&self, commit_sha: Option<&str>) -> bool {
        match (self, commit_sha) {
            (CommitVisibility::All, _) => true,
            (_, None) => true,
            (CommitVisibility::UnversionedOnly, Some(_)) => false,
            (CommitVisibility::Visible(shas), Some(sha)) => shas.iter().any(|s| s == sha),
        }
    }
}

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

//! Search options and results shared by every retrieval strategy.

use crate::memory::{ObservationRecord, SessionSummaryRecord, UserPromptRecord};
use crate::observation_types::ObservationType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of results per list.
pub const DEFAULT_LIMIT: usize = 20;

/// Which record kinds a search returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Observations,
    Sessions,
    Prompts,
    #[default]
    All,
}

impl SearchType {
    pub fn includes_observations(&self) -> bool {
        matches!(self, SearchType::Observations | SearchType::All)
    }

    pub fn includes_sessions(&self) -> bool {
        matches!(self, SearchType::Sessions | SearchType::All)
    }

    pub fn includes_prompts(&self) -> bool {
        matches!(self, SearchType::Prompts | SearchType::All)
    }
}

impl FromStr for SearchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observations" => Ok(SearchType::Observations),
            "sessions" => Ok(SearchType::Sessions),
            "prompts" => Ok(SearchType::Prompts),
            "all" | "" => Ok(SearchType::All),
            other => Err(format!("unknown search type: {other}")),
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    /// Backend rank order.
    #[default]
    Relevance,
    DateDesc,
    DateAsc,
}

impl FromStr for OrderBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relevance" | "" => Ok(OrderBy::Relevance),
            "date_desc" => Ok(OrderBy::DateDesc),
            "date_asc" => Ok(OrderBy::DateAsc),
            other => Err(format!("unknown order: {other}")),
        }
    }
}

/// Inclusive creation-time bounds in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    pub fn contains(&self, epoch_ms: i64) -> bool {
        self.start.map_or(true, |start| epoch_ms >= start)
            && self.end.map_or(true, |end| epoch_ms <= end)
    }
}

/// Options accepted by every strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: Option<String>,
    #[serde(default)]
    pub search_type: SearchType,
    pub project: Option<String>,
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub obs_types: Vec<ObservationType>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub order_by: OrderBy,
    /// Commit visibility, with the same meaning as the ancestry resolver
    /// output: `None` disables filtering.
    pub visible_commits: Option<Vec<String>>,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: None,
            search_type: SearchType::All,
            project: None,
            date_range: None,
            concepts: Vec::new(),
            files: Vec::new(),
            obs_types: Vec::new(),
            limit: DEFAULT_LIMIT,
            order_by: OrderBy::Relevance,
            visible_commits: None,
        }
    }
}

impl SearchOptions {
    pub fn with_query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Default::default()
        }
    }

    /// The query text, if it contains anything besides whitespace.
    pub fn query_text(&self) -> Option<&str> {
        self.query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    pub fn has_query(&self) -> bool {
        self.query_text().is_some()
    }

    /// `limit` clamped to `1..=max`.
    pub fn effective_limit(&self, max: usize) -> usize {
        self.limit.clamp(1, max.max(1))
    }
}

/// Results grouped by record kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub observations: Vec<ObservationRecord>,
    pub sessions: Vec<SessionSummaryRecord>,
    pub prompts: Vec<UserPromptRecord>,
}

impl SearchResults {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty() && self.sessions.is_empty() && self.prompts.is_empty()
    }

    pub fn total(&self) -> usize {
        self.observations.len() + self.sessions.len() + self.prompts.len()
    }
}

/// Which strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "bm25")]
    Bm25,
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "hybrid-blend")]
    HybridBlend,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Bm25 => "bm25",
            StrategyKind::Vector => "vector",
            StrategyKind::HybridBlend => "hybrid-blend",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strategy's results plus the audit flags describing how they were produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyResult {
    pub results: SearchResults,
    pub used_vector: bool,
    pub fell_back: bool,
    pub strategy: StrategyKind,
}

impl StrategyResult {
    /// No results, no vector use, no fallback.
    pub fn empty(strategy: StrategyKind) -> Self {
        Self {
            results: SearchResults::default(),
            used_vector: false,
            fell_back: false,
            strategy,
        }
    }
}

/// A result row that can take part in rank blending.
pub trait Ranked {
    /// Join key, stable across backends.
    fn rank_id(&self) -> i64;

    fn set_score(&mut self, score: f64);
}

impl Ranked for ObservationRecord {
    fn rank_id(&self) -> i64 {
        self.id
    }

    fn set_score(&mut self, score: f64) {
        self.score = Some(score);
    }
}

impl Ranked for SessionSummaryRecord {
    fn rank_id(&self) -> i64 {
        self.id
    }

    fn set_score(&mut self, score: f64) {
        self.score = Some(score);
    }
}

impl Ranked for UserPromptRecord {
    fn rank_id(&self) -> i64 {
        self.id
    }

    fn set_score(&mut self, score: f64) {
        self.score = Some(score);
    }
}

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

//! Worker configuration sections.
//!
//! Each struct deserializes from one table of the server's TOML file and
//! falls back to its defaults field by field.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `[watchdog]`: stuck detection, orphan recovery and retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Interval between ticks.
    #[serde(default = "default_check_interval")]
    pub check_interval_ms: u64,

    /// A `processing` row older than this is considered stuck.
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_ms: i64,

    /// Failures tolerated before a row becomes terminally `failed`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// How long `processed` rows are kept.
    #[serde(default = "default_retention")]
    pub retention_ms: i64,

    /// Upper bound on a single tick.
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_ms: u64,
}

fn default_check_interval() -> u64 {
    30_000
}

fn default_stuck_threshold() -> i64 {
    150_000 // 2.5 minutes
}

fn default_max_retries() -> u32 {
    3
}

fn default_retention() -> i64 {
    24 * 60 * 60 * 1000
}

fn default_tick_timeout() -> u64 {
    20_000
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval(),
            stuck_threshold_ms: default_stuck_threshold(),
            max_retries: default_max_retries(),
            retention_ms: default_retention(),
            tick_timeout_ms: default_tick_timeout(),
        }
    }
}

impl WatchdogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }

    /// Set the tick interval.
    pub fn with_check_interval_ms(mut self, ms: u64) -> Self {
        self.check_interval_ms = ms;
        self
    }
}

/// `[search]`: limits, recency window and blend weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Neighbours requested from the vector store per query.
    #[serde(default = "default_vector_batch_size")]
    pub vector_batch_size: usize,

    /// Vector hits older than this are dropped unless a date range is given.
    #[serde(default = "default_recency_window_days")]
    pub recency_window_days: i64,

    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,

    #[serde(default = "default_vector_timeout")]
    pub vector_timeout_ms: u64,
}

fn default_limit() -> usize {
    20
}

fn default_max_limit() -> usize {
    100
}

fn default_vector_batch_size() -> usize {
    100
}

fn default_recency_window_days() -> i64 {
    90
}

fn default_vector_weight() -> f64 {
    0.6
}

fn default_keyword_weight() -> f64 {
    0.4
}

fn default_vector_timeout() -> u64 {
    5_000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            vector_batch_size: default_vector_batch_size(),
            recency_window_days: default_recency_window_days(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            vector_timeout_ms: default_vector_timeout(),
        }
    }
}

impl SearchConfig {
    pub fn vector_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_timeout_ms)
    }

    pub fn recency_window_ms(&self) -> i64 {
        self.recency_window_days * 24 * 60 * 60 * 1000
    }
}

/// `[vector]`: the optional vector store sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_vector_url")]
    pub base_url: String,

    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_vector_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_collection() -> String {
    "recall".to_string()
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_vector_url(),
            collection: default_collection(),
        }
    }
}

/// `[agent]`: the compression model and its call budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model used to compress observations (e.g., "claude-3-5-haiku-latest").
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for LLM generation (lower = more deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-message request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long a restart waits for the old task before aborting it.
    #[serde(default = "default_restart_grace")]
    pub restart_grace_ms: u64,

    /// Read from `ANTHROPIC_API_KEY` when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub base_url: String,
}

fn default_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.3
}

fn default_request_timeout() -> u64 {
    60
}

fn default_restart_grace() -> u64 {
    5_000
}

fn default_api_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            restart_grace_ms: default_restart_grace(),
            api_key: None,
            base_url: default_api_base_url(),
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }
}

/// `[context]`: how much memory goes into compiled context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_observation_count")]
    pub observation_count: usize,

    #[serde(default = "default_summary_count")]
    pub summary_count: usize,

    /// Observations rendered with their full narrative.
    #[serde(default = "default_full_observation_count")]
    pub full_observation_count: usize,
}

fn default_observation_count() -> usize {
    50
}

fn default_summary_count() -> usize {
    10
}

fn default_full_observation_count() -> usize {
    5
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            observation_count: default_observation_count(),
            summary_count: default_summary_count(),
            full_observation_count: default_full_observation_count(),
        }
    }
}

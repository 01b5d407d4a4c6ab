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

//! Context compiler.
//!
//! Renders a project's recent memory as markdown for injection into a new
//! session. Observations recorded at commits that are not ancestors of the
//! working tree's HEAD are left out, so switching branches never surfaces
//! work from a sibling branch.

use crate::config::ContextConfig;
use crate::error::WorkerResult;
use chrono::{TimeZone, Utc};
use recall_core::{AncestryResolver, CommitVisibility, ObservationRecord, SessionSummaryRecord};
use recall_storage::ObservationStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Rendered context plus what went into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledContext {
    pub text: String,
    pub observation_count: usize,
    pub summary_count: usize,
    /// `all`, `unversioned-only` or `filtered`.
    pub visibility: String,
}

#[derive(Debug, Clone)]
pub struct ContextCompiler {
    store: ObservationStore,
    resolver: AncestryResolver,
    config: ContextConfig,
}

impl ContextCompiler {
    pub fn new(store: ObservationStore, resolver: AncestryResolver, config: ContextConfig) -> Self {
        Self {
            store,
            resolver,
            config,
        }
    }

    /// Which observations `cwd` may see. Without a directory nothing is
    /// filtered.
    pub async fn visibility(&self, project: &str, cwd: Option<&Path>) -> WorkerResult<CommitVisibility> {
        let Some(cwd) = cwd else {
            return Ok(CommitVisibility::All);
        };

        let store = self.store.clone();
        let owned_project = project.to_string();
        let candidates = tokio::task::spawn_blocking(move || {
            store.unique_commit_shas_for_project(&owned_project)
        })
        .await??;

        let resolved = self
            .resolver
            .resolve_visible_commit_shas(&candidates, cwd)
            .await;
        let visibility = CommitVisibility::from_resolved(resolved);
        debug!(
            project = %project,
            candidates = candidates.len(),
            visibility = visibility.label(),
            "Resolved commit visibility"
        );
        Ok(visibility)
    }

    pub async fn compile(&self, project: &str, cwd: Option<&Path>) -> WorkerResult<CompiledContext> {
        let visibility = self.visibility(project, cwd).await?;

        let store = self.store.clone();
        let owned_project = project.to_string();
        let filter = visibility.clone();
        let observation_count = self.config.observation_count;
        let summary_count = self.config.summary_count;
        let (observations, summaries) = tokio::task::spawn_blocking(move || {
            let observations =
                store.recent_observations(&owned_project, &filter, observation_count)?;
            let summaries = store.recent_summaries(&owned_project, summary_count)?;
            Ok::<_, recall_storage::StorageError>((observations, summaries))
        })
        .await??;

        Ok(CompiledContext {
            text: self.render(project, &observations, &summaries),
            observation_count: observations.len(),
            summary_count: summaries.len(),
            visibility: visibility.label().to_string(),
        })
    }

    /// `observations` and `summaries` are newest first.
    fn render(
        &self,
        project: &str,
        observations: &[ObservationRecord],
        summaries: &[SessionSummaryRecord],
    ) -> String {
        let mut sections = vec![format!(
            "# {project} recent context\n\n\
             Memory carried over from previous sessions in this project."
        )];

        if observations.is_empty() && summaries.is_empty() {
            sections.push("*No previous sessions recorded for this project.*".to_string());
            return sections.join("\n\n");
        }

        if !observations.is_empty() {
            sections.push(render_timeline(observations));

            let detailed: Vec<String> = observations
                .iter()
                .take(self.config.full_observation_count)
                .filter(|obs| obs.narrative.is_some())
                .map(format_observation_full)
                .collect();
            if !detailed.is_empty() {
                sections.push(format!("## Details\n\n{}", detailed.join("\n\n")));
            }
        }

        if let Some(latest) = summaries.first() {
            sections.push(format_summary(latest));
        }

        sections.join("\n\n")
    }
}

fn day_of(epoch_ms: i64) -> String {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .map(|t| t.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown date".to_string())
}

fn time_of(epoch_ms: i64) -> String {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_default()
}

/// Oldest first, one heading per day.
fn render_timeline(observations: &[ObservationRecord]) -> String {
    let mut section = String::from("## Timeline");
    let mut current_day = None;

    for obs in observations.iter().rev() {
        let day = day_of(obs.created_at_epoch);
        if current_day.as_ref() != Some(&day) {
            section.push_str(&format!("\n\n### {day}\n"));
            current_day = Some(day);
        }
        section.push_str(&format!(
            "\n- {} #{} [{}] {}",
            time_of(obs.created_at_epoch),
            obs.id,
            obs.obs_type,
            obs.display_title()
        ));
    }
    section
}

fn format_observation_full(obs: &ObservationRecord) -> String {
    let mut parts = vec![format!("### {} [{}]", obs.display_title(), obs.obs_type)];
    if let Some(subtitle) = &obs.subtitle {
        parts.push(format!("*{subtitle}*"));
    }
    if let Some(narrative) = &obs.narrative {
        parts.push(narrative.clone());
    }
    if !obs.files_modified.is_empty() {
        parts.push(format!("*Modified: {}*", obs.files_modified.join(", ")));
    }
    if let Some(branch) = &obs.branch {
        parts.push(format!("*Branch: {branch}*"));
    }
    parts.join("\n")
}

fn format_summary(summary: &SessionSummaryRecord) -> String {
    let mut parts = vec!["## Last Session".to_string()];
    let fields = [
        ("Request", &summary.request),
        ("Investigated", &summary.investigated),
        ("Learned", &summary.learned),
        ("Completed", &summary.completed),
        ("Next Steps", &summary.next_steps),
        ("Notes", &summary.notes),
    ];
    for (label, value) in fields {
        if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
            parts.push(format!("**{label}:** {value}"));
        }
    }
    parts.join("\n")
}

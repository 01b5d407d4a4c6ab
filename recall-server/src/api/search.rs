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

//! Search API - keyword, vector and blended memory search

use axum::{
    extract::{Query, State},
    Json,
};
use recall_core::{DateRange, ObservationType, OrderBy, SearchOptions, SearchType, StrategyResult};
use serde::Deserialize;
use std::str::FromStr;
use tracing::debug;

use crate::api::{ApiError, AppState};

/// Query parameters for GET /api/search
///
/// List parameters accept comma-separated values.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: Option<String>,
    #[serde(rename = "type")]
    pub search_type: Option<String>,
    pub project: Option<String>,
    pub limit: Option<usize>,
    /// Epoch milliseconds, inclusive
    pub date_start: Option<i64>,
    /// Epoch milliseconds, inclusive
    pub date_end: Option<i64>,
    pub concepts: Option<String>,
    pub files: Option<String>,
    pub obs_type: Option<String>,
    pub order_by: Option<String>,
    /// Commits whose observations are visible
    pub commit_sha: Option<String>,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

impl SearchParams {
    pub fn into_options(self, default_limit: usize) -> Result<SearchOptions, ApiError> {
        let search_type = match self.search_type.as_deref() {
            Some(raw) => SearchType::from_str(raw).map_err(ApiError::BadRequest)?,
            None => SearchType::All,
        };
        let order_by = match self.order_by.as_deref() {
            Some(raw) => OrderBy::from_str(raw).map_err(ApiError::BadRequest)?,
            None => OrderBy::Relevance,
        };
        let obs_types = split_list(self.obs_type.as_deref())
            .iter()
            .map(|t| ObservationType::from_str(t).map_err(ApiError::BadRequest))
            .collect::<Result<Vec<_>, _>>()?;

        if let (Some(start), Some(end)) = (self.date_start, self.date_end) {
            if start > end {
                return Err(ApiError::BadRequest(
                    "dateStart must not be after dateEnd".to_string(),
                ));
            }
        }
        let date_range = (self.date_start.is_some() || self.date_end.is_some()).then_some(
            DateRange {
                start: self.date_start,
                end: self.date_end,
            },
        );

        let commits = split_list(self.commit_sha.as_deref());

        Ok(SearchOptions {
            query: self.query,
            search_type,
            project: self.project.filter(|p| !p.trim().is_empty()),
            date_range,
            concepts: split_list(self.concepts.as_deref()),
            files: split_list(self.files.as_deref()),
            obs_types,
            limit: self.limit.unwrap_or(default_limit),
            order_by,
            visible_commits: (!commits.is_empty()).then_some(commits),
        })
    }
}

/// GET /api/search
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<StrategyResult>, ApiError> {
    let options = params.into_options(state.search.config().default_limit)?;
    let result = state.search.search(options).await;
    debug!(
        strategy = %result.strategy,
        used_vector = result.used_vector,
        fell_back = result.fell_back,
        total = result.results.total(),
        "Search complete"
    );
    Ok(Json(result))
}

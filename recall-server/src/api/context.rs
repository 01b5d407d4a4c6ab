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

use axum::{
    extract::{Query, State},
    Json,
};
use recall_worker::CompiledContext;
use serde::Deserialize;
use std::path::Path;

use crate::api::{ApiError, AppState};

/// Query parameters for GET /api/context
#[derive(Debug, Deserialize)]
pub struct ContextParams {
    pub project: Option<String>,
    /// Working directory whose branch decides which observations are visible
    pub cwd: Option<String>,
}

/// GET /api/context - Recent memory for a project, filtered to the current branch
pub async fn get_context(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<CompiledContext>, ApiError> {
    let project = params
        .project
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("project is required".to_string()))?;
    let cwd = params.cwd.filter(|c| !c.trim().is_empty());

    let compiled = state
        .context
        .compile(&project, cwd.as_deref().map(Path::new))
        .await?;
    Ok(Json(compiled))
}

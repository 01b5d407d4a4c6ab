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

//! Keyword search over the FTS5 tables.

use crate::error::WorkerResult;
use recall_core::{Degradation, SearchOptions, SearchResults, StrategyKind, StrategyResult};
use recall_storage::ObservationStore;
use tracing::warn;

/// Characters with meaning in FTS5 query syntax.
const FTS_OPERATORS: [char; 7] = ['\'', '"', '(', ')', '*', '+', '-'];

/// Turn free text into an FTS5 query: every token is quoted, so the result
/// is an implicit AND of literal terms.
pub fn sanitize_query(query: &str) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if FTS_OPERATORS.contains(&c) { ' ' } else { c })
        .collect();

    cleaned
        .split_whitespace()
        .map(|token| format!("\"{token}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct Bm25Strategy {
    store: ObservationStore,
}

impl Bm25Strategy {
    pub fn new(store: ObservationStore) -> Self {
        Self { store }
    }

    pub fn can_handle(&self, options: &SearchOptions) -> bool {
        options.has_query()
    }

    /// Run the keyword query on the blocking pool. Storage errors are
    /// returned so a blending caller can tell a failure from no hits.
    pub async fn try_search(&self, options: &SearchOptions) -> WorkerResult<SearchResults> {
        let fts_query = match options.query_text() {
            Some(text) => sanitize_query(text),
            None => return Ok(SearchResults::default()),
        };
        if fts_query.is_empty() {
            return Ok(SearchResults::default());
        }

        let store = self.store.clone();
        let options = options.clone();
        let limit = options.limit.max(1);

        let results = tokio::task::spawn_blocking(move || -> WorkerResult<SearchResults> {
            let mut results = SearchResults::default();
            if options.search_type.includes_observations() {
                results.observations = store.search_observations(&fts_query, &options, limit)?;
            }
            if options.search_type.includes_sessions() {
                results.sessions = store.search_summaries(&fts_query, &options, limit)?;
            }
            if options.search_type.includes_prompts() {
                results.prompts = store.search_prompts(&fts_query, &options, limit)?;
            }
            Ok(results)
        })
        .await??;

        Ok(results)
    }

    pub async fn search(&self, options: &SearchOptions) -> StrategyResult {
        match self.try_search(options).await {
            Ok(results) => StrategyResult {
                results,
                used_vector: false,
                fell_back: false,
                strategy: StrategyKind::Bm25,
            },
            Err(e) => {
                warn!(
                    error = %e,
                    degradation = %Degradation::StrategyUnavailable,
                    "Keyword search failed"
                );
                StrategyResult::empty(StrategyKind::Bm25)
            }
        }
    }
}

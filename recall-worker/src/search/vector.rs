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

//! Semantic search through the vector store.
//!
//! The vector store only knows document ids and metadata; hits are mapped
//! back to their source rows and hydrated from the system of record.

use crate::config::SearchConfig;
use crate::error::{VectorStoreError, WorkerResult};
use crate::vector::{DocType, VectorStoreClient};
use recall_core::{
    now_epoch_ms, DateRange, Degradation, SearchOptions, SearchResults, SearchType, StrategyKind,
    StrategyResult,
};
use recall_storage::ObservationStore;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct VectorStrategy {
    client: Arc<dyn VectorStoreClient>,
    store: ObservationStore,
    config: SearchConfig,
}

/// Row ids per record kind, in rank order.
#[derive(Debug, Default, PartialEq)]
struct Buckets {
    observations: Vec<i64>,
    summaries: Vec<i64>,
    prompts: Vec<i64>,
}

impl VectorStrategy {
    pub fn new(client: Arc<dyn VectorStoreClient>, store: ObservationStore, config: SearchConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn can_handle(&self, options: &SearchOptions) -> bool {
        options.has_query()
    }

    fn where_filter(search_type: SearchType) -> Option<Value> {
        let doc_type = match search_type {
            SearchType::Observations => DocType::Observation,
            SearchType::Sessions => DocType::SessionSummary,
            SearchType::Prompts => DocType::UserPrompt,
            SearchType::All => return None,
        };
        Some(json!({ "doc_type": doc_type.as_str() }))
    }

    pub async fn try_search(&self, options: &SearchOptions) -> WorkerResult<SearchResults> {
        let Some(text) = options.query_text() else {
            return Ok(SearchResults::default());
        };

        let timeout = self.config.vector_timeout();
        let query = self.client.query(
            text,
            self.config.vector_batch_size,
            Self::where_filter(options.search_type),
            options.project.as_deref(),
        );
        let hits = tokio::time::timeout(timeout, query)
            .await
            .map_err(|_| VectorStoreError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })??;

        if hits.is_empty() {
            return Ok(SearchResults::default());
        }

        let window = options.date_range.unwrap_or(DateRange {
            start: Some(now_epoch_ms() - self.config.recency_window_ms()),
            end: None,
        });
        let buckets = self.bucket(&hits.parsed_metadata(), window, options.search_type);
        debug!(
            hits = hits.ids.len(),
            observations = buckets.observations.len(),
            summaries = buckets.summaries.len(),
            prompts = buckets.prompts.len(),
            "Vector hits bucketed"
        );

        let store = self.store.clone();
        let options = options.clone();
        let limit = options.limit.max(1);

        let results = tokio::task::spawn_blocking(move || -> WorkerResult<SearchResults> {
            let mut results = SearchResults {
                observations: store.observations_by_ids(&buckets.observations, &options)?,
                sessions: store.summaries_by_ids(&buckets.summaries, &options)?,
                prompts: store.prompts_by_ids(&buckets.prompts, &options)?,
            };
            results.observations.truncate(limit);
            results.sessions.truncate(limit);
            results.prompts.truncate(limit);
            Ok(results)
        })
        .await??;

        Ok(results)
    }

    fn bucket(
        &self,
        metadata: &[crate::vector::VectorMetadata],
        window: DateRange,
        search_type: SearchType,
    ) -> Buckets {
        let mut buckets = Buckets::default();
        let mut seen: HashSet<(DocType, i64)> = HashSet::new();

        for meta in metadata {
            // Hits without a timestamp cannot be placed in the window.
            let Some(created) = meta.created_at_epoch else {
                continue;
            };
            if !window.contains(created) || !seen.insert((meta.doc_type, meta.sqlite_id)) {
                continue;
            }
            match meta.doc_type {
                DocType::Observation if search_type.includes_observations() => {
                    buckets.observations.push(meta.sqlite_id)
                }
                DocType::SessionSummary if search_type.includes_sessions() => {
                    buckets.summaries.push(meta.sqlite_id)
                }
                DocType::UserPrompt if search_type.includes_prompts() => {
                    buckets.prompts.push(meta.sqlite_id)
                }
                _ => {}
            }
        }
        buckets
    }

    pub async fn search(&self, options: &SearchOptions) -> StrategyResult {
        match self.try_search(options).await {
            Ok(results) => StrategyResult {
                results,
                used_vector: true,
                fell_back: false,
                strategy: StrategyKind::Vector,
            },
            Err(e) => {
                warn!(
                    error = %e,
                    degradation = %Degradation::StrategyUnavailable,
                    "Vector search failed"
                );
                StrategyResult::empty(StrategyKind::Vector)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::test_support::{hit, seeded_store, ScriptedVectorClient};

    fn strategy(client: ScriptedVectorClient) -> VectorStrategy {
        let (store, _) = seeded_store();
        VectorStrategy::new(Arc::new(client), store, SearchConfig::default())
    }

    #[test]
    fn test_bucket_dedupes_and_applies_window() {
        let strategy = strategy(ScriptedVectorClient::hits(vec![]));
        let now = now_epoch_ms();
        let metadata: Vec<_> = [
            hit("obs_1_narrative", DocType::Observation, 1, now),
            hit("obs_1_fact_0", DocType::Observation, 1, now),
            hit("summary_4_request", DocType::SessionSummary, 4, now),
            hit("obs_2_text", DocType::Observation, 2, now - 200 * 24 * 60 * 60 * 1000),
            hit("prompt_9", DocType::UserPrompt, 9, now),
        ]
        .iter()
        .map(|(_, meta)| serde_json::from_value(meta.clone()).unwrap())
        .collect();

        let window = DateRange {
            start: Some(now - SearchConfig::default().recency_window_ms()),
            end: None,
        };
        let buckets = strategy.bucket(&metadata, window, SearchType::All);
        assert_eq!(
            buckets,
            Buckets {
                observations: vec![1],
                summaries: vec![4],
                prompts: vec![9],
            }
        );

        let only_prompts = strategy.bucket(&metadata, window, SearchType::Prompts);
        assert!(only_prompts.observations.is_empty());
        assert_eq!(only_prompts.prompts, vec![9]);
    }

    #[tokio::test]
    async fn test_hits_are_hydrated_in_rank_order() {
        let (store, ids) = seeded_store();
        let now = now_epoch_ms();
        let client = ScriptedVectorClient::hits(vec![
            hit("obs_b", DocType::Observation, ids[2], now),
            hit("obs_a", DocType::Observation, ids[0], now),
        ]);
        let strategy = VectorStrategy::new(Arc::new(client), store, SearchConfig::default());

        let result = strategy.search(&SearchOptions::with_query("cache")).await;
        assert!(result.used_vector);
        assert_eq!(result.strategy, StrategyKind::Vector);
        let found: Vec<i64> = result.results.observations.iter().map(|o| o.id).collect();
        assert_eq!(found, vec![ids[2], ids[0]]);
    }

    #[tokio::test]
    async fn test_zero_hits_still_counts_as_vector_use() {
        let strategy = strategy(ScriptedVectorClient::hits(vec![]));
        let result = strategy.search(&SearchOptions::with_query("anything")).await;
        assert!(result.used_vector);
        assert!(!result.fell_back);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn test_failure_reports_no_vector_use() {
        let strategy = strategy(ScriptedVectorClient::failing());
        let result = strategy.search(&SearchOptions::with_query("anything")).await;
        assert!(!result.used_vector);
        assert!(result.results.is_empty());
    }

    #[test]
    fn test_where_filter_by_type() {
        assert_eq!(VectorStrategy::where_filter(SearchType::All), None);
        assert_eq!(
            VectorStrategy::where_filter(SearchType::Sessions),
            Some(json!({"doc_type": "session_summary"}))
        );
    }
}

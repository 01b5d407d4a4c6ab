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

//! Search strategies.
//!
//! - [`Bm25Strategy`]: FTS5 keyword ranking
//! - [`VectorStrategy`]: semantic neighbours from the vector store
//! - [`HybridBlendStrategy`]: both, merged by position
//!
//! [`SearchOrchestrator`] picks the first strategy that can handle a request
//! and falls back to a filter-only listing when there is no query text.

mod blend;
mod bm25;
mod vector;

pub use blend::{blend, BlendWeights, HybridBlendStrategy};
pub use bm25::{sanitize_query, Bm25Strategy};
pub use vector::VectorStrategy;

use crate::config::SearchConfig;
use crate::error::WorkerResult;
use crate::vector::VectorStoreClient;
use recall_core::{
    Degradation, SearchOptions, SearchResults, StrategyKind, StrategyResult,
};
use recall_storage::ObservationStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// The closed set of search strategies.
#[derive(Clone)]
pub enum SearchStrategy {
    Bm25(Bm25Strategy),
    Vector(VectorStrategy),
    HybridBlend(HybridBlendStrategy),
}

impl SearchStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            SearchStrategy::Bm25(_) => StrategyKind::Bm25,
            SearchStrategy::Vector(_) => StrategyKind::Vector,
            SearchStrategy::HybridBlend(_) => StrategyKind::HybridBlend,
        }
    }

    pub fn can_handle(&self, options: &SearchOptions) -> bool {
        match self {
            SearchStrategy::Bm25(s) => s.can_handle(options),
            SearchStrategy::Vector(s) => s.can_handle(options),
            SearchStrategy::HybridBlend(s) => s.can_handle(options),
        }
    }

    pub async fn search(&self, options: &SearchOptions) -> StrategyResult {
        match self {
            SearchStrategy::Bm25(s) => s.search(options).await,
            SearchStrategy::Vector(s) => s.search(options).await,
            SearchStrategy::HybridBlend(s) => s.search(options).await,
        }
    }
}

/// Routes a request to a strategy.
#[derive(Clone)]
pub struct SearchOrchestrator {
    store: ObservationStore,
    strategies: Vec<SearchStrategy>,
    config: SearchConfig,
}

impl SearchOrchestrator {
    /// Hybrid blending when a vector store is configured, keyword search
    /// otherwise.
    pub fn new(
        store: ObservationStore,
        vector: Option<Arc<dyn VectorStoreClient>>,
        config: SearchConfig,
    ) -> Self {
        let keyword = Bm25Strategy::new(store.clone());
        let mut strategies = Vec::with_capacity(2);
        if let Some(client) = vector {
            let vector = VectorStrategy::new(client, store.clone(), config.clone());
            strategies.push(SearchStrategy::HybridBlend(HybridBlendStrategy::new(
                vector,
                keyword.clone(),
                BlendWeights::from(&config),
            )));
        }
        strategies.push(SearchStrategy::Bm25(keyword));

        Self {
            store,
            strategies,
            config,
        }
    }

    /// Strategy kinds in priority order.
    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(SearchStrategy::kind).collect()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub async fn search(&self, mut options: SearchOptions) -> StrategyResult {
        options.limit = options.effective_limit(self.config.max_limit);

        if let Some(strategy) = self.strategies.iter().find(|s| s.can_handle(&options)) {
            debug!(
                strategy = %strategy.kind(),
                limit = options.limit,
                "Dispatching search"
            );
            return strategy.search(&options).await;
        }

        match self.list(options).await {
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
                    "Filter listing failed"
                );
                StrategyResult::empty(StrategyKind::Bm25)
            }
        }
    }

    /// Recent rows matching the filters, without ranking.
    async fn list(&self, options: SearchOptions) -> WorkerResult<SearchResults> {
        let store = self.store.clone();
        let limit = options.limit;
        tokio::task::spawn_blocking(move || -> WorkerResult<SearchResults> {
            let mut results = SearchResults::default();
            if options.search_type.includes_observations() {
                results.observations = store.list_observations(&options, limit)?;
            }
            if options.search_type.includes_sessions() {
                results.sessions = store.list_summaries(&options, limit)?;
            }
            if options.search_type.includes_prompts() {
                results.prompts = store.list_prompts(&options, limit)?;
            }
            Ok(results)
        })
        .await?
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{seeded_store, ScriptedVectorClient};
    use super::*;

    #[test]
    fn test_strategy_priority() {
        let (store, _) = seeded_store();
        let keyword_only = SearchOrchestrator::new(store.clone(), None, SearchConfig::default());
        assert_eq!(keyword_only.strategy_kinds(), vec![StrategyKind::Bm25]);

        let hybrid = SearchOrchestrator::new(
            store,
            Some(Arc::new(ScriptedVectorClient::hits(vec![]))),
            SearchConfig::default(),
        );
        assert_eq!(
            hybrid.strategy_kinds(),
            vec![StrategyKind::HybridBlend, StrategyKind::Bm25]
        );
    }

    #[tokio::test]
    async fn test_no_query_lists_recent_rows() {
        let (store, ids) = seeded_store();
        let orchestrator = SearchOrchestrator::new(store, None, SearchConfig::default());

        let result = orchestrator
            .search(SearchOptions {
                search_type: recall_core::SearchType::Observations,
                limit: 2,
                ..Default::default()
            })
            .await;

        assert_eq!(result.strategy, StrategyKind::Bm25);
        assert!(!result.fell_back);
        assert_eq!(result.results.observations.len(), 2);
        assert!(result.results.sessions.is_empty());
        assert!(result
            .results
            .observations
            .iter()
            .all(|o| ids.contains(&o.id)));
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let (store, _) = seeded_store();
        let orchestrator = SearchOrchestrator::new(store, None, SearchConfig::default());
        let result = orchestrator
            .search(SearchOptions {
                limit: 0,
                ..SearchOptions::with_query("token")
            })
            .await;
        assert_eq!(result.results.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_type_filter_narrows_keyword_results() {
        let (store, _) = seeded_store();
        let orchestrator = SearchOrchestrator::new(store, None, SearchConfig::default());
        let result = orchestrator
            .search(SearchOptions {
                obs_types: vec![recall_core::ObservationType::Refactor],
                search_type: recall_core::SearchType::Observations,
                ..SearchOptions::with_query("token")
            })
            .await;
        let titles: Vec<_> = result
            .results
            .observations
            .iter()
            .map(|o| o.display_title().to_string())
            .collect();
        assert_eq!(titles, vec!["Move session cache"]);
    }
}

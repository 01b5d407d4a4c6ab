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

//! Hybrid search: vector and keyword results merged by position.

use super::bm25::Bm25Strategy;
use super::vector::VectorStrategy;
use crate::config::SearchConfig;
use recall_core::{
    Degradation, Ranked, SearchOptions, SearchResults, StrategyKind, StrategyResult,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendWeights {
    pub vector: f64,
    pub keyword: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            keyword: 0.4,
        }
    }
}

impl From<&SearchConfig> for BlendWeights {
    fn from(config: &SearchConfig) -> Self {
        Self {
            vector: config.vector_weight,
            keyword: config.keyword_weight,
        }
    }
}

/// Merge two ranked lists.
///
/// An item at index `i` of a list of `n` scores `(n - i) / n` there; its
/// blended score is the weighted sum over both lists. Display fields come
/// from the first occurrence, vector results first. Ties keep merge order.
pub fn blend<T: Ranked + Clone>(
    vector: &[T],
    keyword: &[T],
    weights: BlendWeights,
    limit: usize,
) -> Vec<T> {
    let mut merged: Vec<(T, f64)> = Vec::with_capacity(vector.len() + keyword.len());
    let mut positions: HashMap<i64, usize> = HashMap::new();

    for (items, weight) in [(vector, weights.vector), (keyword, weights.keyword)] {
        let n = items.len() as f64;
        for (i, item) in items.iter().enumerate() {
            let score = weight * (n - i as f64) / n;
            match positions.get(&item.rank_id()) {
                Some(&pos) => merged[pos].1 += score,
                None => {
                    positions.insert(item.rank_id(), merged.len());
                    merged.push((item.clone(), score));
                }
            }
        }
    }

    merged.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    merged
        .into_iter()
        .take(limit)
        .map(|(mut item, score)| {
            item.set_score(score);
            item
        })
        .collect()
}

fn blend_results(
    vector: SearchResults,
    keyword: SearchResults,
    weights: BlendWeights,
    limit: usize,
) -> SearchResults {
    SearchResults {
        observations: blend(&vector.observations, &keyword.observations, weights, limit),
        sessions: blend(&vector.sessions, &keyword.sessions, weights, limit),
        prompts: blend(&vector.prompts, &keyword.prompts, weights, limit),
    }
}

#[derive(Clone)]
pub struct HybridBlendStrategy {
    vector: VectorStrategy,
    keyword: Bm25Strategy,
    weights: BlendWeights,
}

impl HybridBlendStrategy {
    pub fn new(vector: VectorStrategy, keyword: Bm25Strategy, weights: BlendWeights) -> Self {
        Self {
            vector,
            keyword,
            weights,
        }
    }

    pub fn can_handle(&self, options: &SearchOptions) -> bool {
        options.has_query()
    }

    /// Both sides run concurrently. A failed side is reported through the
    /// audit flags, never as an error.
    pub async fn search(&self, options: &SearchOptions) -> StrategyResult {
        let (vector, keyword) = tokio::join!(
            self.vector.try_search(options),
            self.keyword.try_search(options)
        );

        match (vector, keyword) {
            (Ok(vector), Ok(keyword)) => {
                debug!(
                    vector_hits = vector.total(),
                    keyword_hits = keyword.total(),
                    "Blending search results"
                );
                StrategyResult {
                    results: blend_results(vector, keyword, self.weights, options.limit.max(1)),
                    used_vector: true,
                    fell_back: false,
                    strategy: StrategyKind::HybridBlend,
                }
            }
            (Err(e), Ok(keyword)) => {
                warn!(
                    error = %e,
                    degradation = %Degradation::StrategyUnavailable,
                    "Vector side failed, using keyword results"
                );
                StrategyResult {
                    results: keyword,
                    used_vector: false,
                    fell_back: true,
                    strategy: StrategyKind::Bm25,
                }
            }
            (Ok(vector), Err(e)) => {
                warn!(
                    error = %e,
                    degradation = %Degradation::StrategyUnavailable,
                    "Keyword side failed, using vector results"
                );
                StrategyResult {
                    results: vector,
                    used_vector: true,
                    fell_back: true,
                    strategy: StrategyKind::Vector,
                }
            }
            (Err(vector_error), Err(keyword_error)) => {
                warn!(
                    vector_error = %vector_error,
                    keyword_error = %keyword_error,
                    degradation = %Degradation::StrategyUnavailable,
                    "Both search backends failed"
                );
                StrategyResult {
                    fell_back: true,
                    ..StrategyResult::empty(StrategyKind::HybridBlend)
                }
            }
        }
    }
}

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

//! Processing status feed.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Snapshot of queue activity, published on every generator start and
/// release and after queue mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub is_processing: bool,
    pub queue_depth: usize,
    pub active_sessions: usize,
}

/// Broadcast channel of [`ProcessingStatus`] snapshots. Slow subscribers
/// miss intermediate snapshots rather than blocking publishers.
#[derive(Debug, Clone)]
pub struct StatusFeed {
    tx: broadcast::Sender<ProcessingStatus>,
}

impl StatusFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, status: ProcessingStatus) {
        // No subscribers is fine.
        let _ = self.tx.send(status);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessingStatus> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new(64)
    }
}

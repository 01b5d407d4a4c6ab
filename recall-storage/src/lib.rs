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

//! Recall Storage
//!
//! SQLite system of record for the memory worker. One connection in WAL
//! mode, serialized behind a mutex, holds:
//!
//! - `sessions`: one row per coding session
//! - `observations`, `session_summaries`, `user_prompts`: compressed memory,
//!   each with an external-content FTS5 index kept in sync by triggers
//! - `pending_messages`: the durable work queue drained by the agent

pub mod database;
pub mod error;
pub mod observations;
pub mod pending;
mod schema;
pub mod sessions;

pub use database::Database;
pub use error::{StorageError, StorageResult};
pub use observations::ObservationStore;
pub use pending::{PendingStore, DEFAULT_MAX_RETRIES, DEFAULT_RETENTION_MS};
pub use sessions::SessionStore;

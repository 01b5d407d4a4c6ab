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

//! Session registry and agent lifecycle.
//!
//! The registry is an in-memory cache over the session table. Its one hard
//! rule is that a session never has more than one live agent task: the
//! check and the handle insert happen under the same write lock, and a task
//! can only clear the handle it was started with.

use crate::agent::{AgentRunner, SessionContext};
use crate::error::{WorkerError, WorkerResult};
use crate::events::{ProcessingStatus, StatusFeed};
use parking_lot::RwLock;
use recall_storage::{PendingStore, SessionStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct GeneratorHandle {
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl GeneratorHandle {
    /// A task that panicked or was aborted no longer owns the session.
    fn is_live(&self) -> bool {
        !self.join.is_finished()
    }
}

struct ActiveSession {
    context: SessionContext,
    generator: Option<GeneratorHandle>,
}

impl ActiveSession {
    fn has_live_generator(&self) -> bool {
        self.generator.as_ref().map_or(false, GeneratorHandle::is_live)
    }
}

/// Point-in-time view of a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub project: String,
    pub has_active_agent: bool,
    pub generation: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDiagnostics {
    pub has_active_agent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartOutcome {
    pub success: bool,
    pub messages_reset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverOutcome {
    pub success: bool,
    pub pending_count: usize,
    pub messages_reset: usize,
}

/// Owns the session registry and every agent task.
pub struct SessionManager {
    sessions: RwLock<HashMap<i64, ActiveSession>>,
    pending: PendingStore,
    session_store: SessionStore,
    runner: Arc<dyn AgentRunner>,
    feed: StatusFeed,
    next_generation: AtomicU64,
    restart_grace: Duration,
}

impl SessionManager {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        pending: PendingStore,
        session_store: SessionStore,
        feed: StatusFeed,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pending,
            session_store,
            runner,
            feed,
            next_generation: AtomicU64::new(0),
            restart_grace: Duration::from_secs(5),
        }
    }

    /// How long a cancelled agent may take to exit before it is aborted.
    pub fn with_restart_grace(mut self, grace: Duration) -> Self {
        self.restart_grace = grace;
        self
    }

    pub fn feed(&self) -> &StatusFeed {
        &self.feed
    }

    /// Register a session, loading it from the store.
    ///
    /// A session with queued work but no stored row is rebuilt from its
    /// queue rows with an empty project.
    pub fn initialize_session(&self, session_db_id: i64) -> WorkerResult<SessionSnapshot> {
        let context = match self.session_store.get(session_db_id)? {
            Some(record) => SessionContext {
                session_db_id,
                content_session_id: record.content_session_id,
                project: record.project,
            },
            None => {
                if let Some(snapshot) = self.get_session(session_db_id) {
                    return Ok(snapshot);
                }
                let content_session_id = self
                    .pending
                    .content_session_id_for_session(session_db_id)?
                    .ok_or(WorkerError::SessionNotFound(session_db_id))?;
                debug!(
                    session_db_id,
                    content_session_id = %content_session_id,
                    "Rebuilding session from queue rows"
                );
                SessionContext {
                    session_db_id,
                    content_session_id,
                    project: String::new(),
                }
            }
        };

        let mut sessions = self.sessions.write();
        let active = sessions
            .entry(session_db_id)
            .or_insert_with(|| ActiveSession {
                context: context.clone(),
                generator: None,
            });
        active.context.project = context.project;
        Ok(snapshot_of(active))
    }

    /// Spawn an agent for the session unless one is already live.
    ///
    /// Returns `false` when a live agent exists.
    pub fn start_generator(self: &Arc<Self>, session_db_id: i64) -> WorkerResult<bool> {
        let started = {
            let mut sessions = self.sessions.write();
            let active = sessions
                .get_mut(&session_db_id)
                .ok_or(WorkerError::SessionNotFound(session_db_id))?;

            if active.has_live_generator() {
                false
            } else {
                if let Some(dead) = active.generator.take() {
                    warn!(
                        session_db_id,
                        generation = dead.generation,
                        "Dropping handle of a finished agent"
                    );
                }
                let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
                let cancel = CancellationToken::new();
                let join = tokio::spawn(drive(
                    Arc::downgrade(self),
                    self.runner.clone(),
                    active.context.clone(),
                    cancel.clone(),
                    generation,
                ));
                active.generator = Some(GeneratorHandle {
                    generation,
                    cancel,
                    join,
                });
                debug!(session_db_id, generation, "Agent started");
                true
            }
        };

        if started {
            self.publish_status();
        }
        Ok(started)
    }

    /// Clear the handle if it still belongs to `generation`.
    fn release_generator(&self, session_db_id: i64, generation: u64) -> bool {
        let released = {
            let mut sessions = self.sessions.write();
            match sessions.get_mut(&session_db_id) {
                Some(active)
                    if active.generator.as_ref().map(|g| g.generation) == Some(generation) =>
                {
                    active.generator = None;
                    true
                }
                _ => false,
            }
        };

        if released {
            debug!(session_db_id, generation, "Agent released");
            self.publish_status();
        }
        released
    }

    pub fn has_active_generator(&self, session_db_id: i64) -> bool {
        self.sessions
            .read()
            .get(&session_db_id)
            .map_or(false, ActiveSession::has_live_generator)
    }

    pub fn is_registered(&self, session_db_id: i64) -> bool {
        self.sessions.read().contains_key(&session_db_id)
    }

    pub fn get_session(&self, session_db_id: i64) -> Option<SessionSnapshot> {
        self.sessions.read().get(&session_db_id).map(snapshot_of)
    }

    pub fn session_diagnostics(&self) -> BTreeMap<i64, SessionDiagnostics> {
        self.sessions
            .read()
            .iter()
            .map(|(id, s)| {
                (
                    *id,
                    SessionDiagnostics {
                        has_active_agent: s.has_live_generator(),
                    },
                )
            })
            .collect()
    }

    /// Cancel the live agent, requeue its in-flight rows and start over.
    pub async fn force_restart_session(
        self: &Arc<Self>,
        session_db_id: i64,
    ) -> WorkerResult<RestartOutcome> {
        self.initialize_session(session_db_id)?;

        let handle = self
            .sessions
            .write()
            .get_mut(&session_db_id)
            .and_then(|s| s.generator.take());
        if let Some(handle) = handle {
            handle.cancel.cancel();
            self.await_exit(session_db_id, handle).await;
            self.publish_status();
        }

        let messages_reset = self.pending.reset_processing_to_pending(session_db_id)?;
        if self.pending.pending_count(session_db_id)? > 0 {
            self.start_generator(session_db_id)?;
        }

        info!(session_db_id, messages_reset, "Session restarted");
        Ok(RestartOutcome {
            success: true,
            messages_reset,
        })
    }

    /// Bring a session with queued work back under an agent.
    pub fn recover_orphaned_session(
        self: &Arc<Self>,
        session_db_id: i64,
    ) -> WorkerResult<RecoverOutcome> {
        self.initialize_session(session_db_id)?;

        // A live agent owns its processing rows.
        let messages_reset = if self.has_active_generator(session_db_id) {
            0
        } else {
            self.pending.reset_processing_to_pending(session_db_id)?
        };

        let pending_count = self.pending.pending_count(session_db_id)?;
        if pending_count > 0 {
            self.start_generator(session_db_id)?;
        }

        info!(
            session_db_id,
            pending_count, messages_reset, "Session recovered"
        );
        Ok(RecoverOutcome {
            success: pending_count > 0,
            pending_count,
            messages_reset,
        })
    }

    /// Stop the session's agent and drop it from the registry.
    pub async fn delete_session(&self, session_db_id: i64) -> bool {
        let removed = self.sessions.write().remove(&session_db_id);
        let Some(mut active) = removed else {
            return false;
        };
        if let Some(handle) = active.generator.take() {
            handle.cancel.cancel();
            self.await_exit(session_db_id, handle).await;
        }
        self.publish_status();
        true
    }

    pub async fn shutdown_all(&self) {
        let ids: Vec<i64> = self.sessions.read().keys().copied().collect();
        for id in &ids {
            self.delete_session(*id).await;
        }
        info!(sessions = ids.len(), "All sessions shut down");
    }

    async fn await_exit(&self, session_db_id: i64, handle: GeneratorHandle) {
        let GeneratorHandle {
            generation,
            mut join,
            ..
        } = handle;
        if tokio::time::timeout(self.restart_grace, &mut join)
            .await
            .is_err()
        {
            warn!(
                session_db_id,
                generation,
                grace_ms = self.restart_grace.as_millis() as u64,
                "Agent ignored cancellation, aborting"
            );
            join.abort();
            let _ = join.await;
        }
    }

    /// Sessions with a live agent.
    pub fn active_session_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.has_live_generator())
            .count()
    }

    pub fn is_any_session_processing(&self) -> bool {
        self.sessions.read().values().any(ActiveSession::has_live_generator)
    }

    pub fn processing_status(&self) -> ProcessingStatus {
        let active_sessions = self.active_session_count();
        let queue_depth = self.pending.total_active_work().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read queue depth");
            0
        });
        ProcessingStatus {
            is_processing: active_sessions > 0 || queue_depth > 0,
            queue_depth,
            active_sessions,
        }
    }

    /// Must not be called with the registry lock held.
    pub fn publish_status(&self) {
        self.feed.publish(self.processing_status());
    }
}

fn snapshot_of(active: &ActiveSession) -> SessionSnapshot {
    SessionSnapshot {
        session_db_id: active.context.session_db_id,
        content_session_id: active.context.content_session_id.clone(),
        project: active.context.project.clone(),
        has_active_agent: active.has_live_generator(),
        generation: active.generator.as_ref().map(|g| g.generation),
    }
}

/// Clears the task's handle when `drive` never reaches its own release,
/// which happens when the runner panics or the task is aborted.
struct ReleaseOnDrop {
    manager: Weak<SessionManager>,
    session_db_id: i64,
    generation: u64,
    armed: bool,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            if manager.release_generator(self.session_db_id, self.generation) {
                warn!(
                    session_db_id = self.session_db_id,
                    generation = self.generation,
                    "Agent task ended abnormally"
                );
            }
        }
    }
}

/// Body of an agent task.
async fn drive(
    manager: Weak<SessionManager>,
    runner: Arc<dyn AgentRunner>,
    context: SessionContext,
    cancel: CancellationToken,
    generation: u64,
) {
    let session_db_id = context.session_db_id;
    let mut guard = ReleaseOnDrop {
        manager: manager.clone(),
        session_db_id,
        generation,
        armed: true,
    };
    let result = runner.run_session(context, cancel.clone()).await;
    guard.armed = false;

    let Some(manager) = manager.upgrade() else {
        return;
    };

    let finished_cleanly = match result {
        Ok(summary) => !summary.cancelled && !cancel.is_cancelled(),
        Err(e) => {
            warn!(session_db_id, generation, error = %e, "Agent run failed");
            false
        }
    };

    if !manager.release_generator(session_db_id, generation) || !finished_cleanly {
        return;
    }

    // Work enqueued while the run was winding down.
    match manager.pending.claimable_count(session_db_id) {
        Ok(0) => {}
        Ok(_) => {
            if let Err(e) = manager.start_generator(session_db_id) {
                warn!(session_db_id, error = %e, "Failed to restart agent");
            }
        }
        Err(e) => warn!(session_db_id, error = %e, "Failed to check for new work"),
    }
}

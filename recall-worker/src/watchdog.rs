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

//! Queue watchdog.
//!
//! A periodic task that keeps the queue moving: stuck `processing` rows go
//! back to `pending`, sessions with work but no live agent get one, and old
//! processed rows are deleted. It never cancels a live agent.

use crate::config::WatchdogConfig;
use crate::error::WorkerResult;
use crate::session::SessionManager;
use parking_lot::Mutex;
use recall_core::Degradation;
use recall_storage::PendingStore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Stuck rows returned to `pending`.
    pub reset: usize,
    /// Known sessions that got a new agent.
    pub restarted: usize,
    /// Orphaned sessions that were rebuilt and started.
    pub recovered: usize,
    /// Processed rows deleted by retention.
    pub cleaned: usize,
    /// The previous tick was still running.
    pub skipped: bool,
}

impl TickReport {
    pub fn has_activity(&self) -> bool {
        self.reset + self.restarted + self.recovered + self.cleaned > 0
    }
}

/// Result of startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub reset: usize,
    pub sessions: usize,
}

pub struct Watchdog {
    sessions: Arc<SessionManager>,
    pending: PendingStore,
    config: WatchdogConfig,
    ticking: AtomicBool,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Clears the re-entrancy flag even if the tick is dropped mid-way.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Watchdog {
    pub fn new(sessions: Arc<SessionManager>, pending: PendingStore, config: WatchdogConfig) -> Self {
        Self {
            sessions,
            pending,
            config,
            ticking: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Spawn the periodic task. Returns `false` if it is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        let cancel = CancellationToken::new();
        let period = self.config.check_interval();
        let watchdog = Arc::clone(self);
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = watchdog.tick().await;
                        if report.has_activity() {
                            info!(
                                reset = report.reset,
                                restarted = report.restarted,
                                recovered = report.recovered,
                                cleaned = report.cleaned,
                                "Watchdog tick"
                            );
                        }
                    }
                }
            }
            debug!("Watchdog stopped");
        });

        *task = Some((cancel, join));
        info!(
            interval_ms = self.config.check_interval_ms,
            stuck_threshold_ms = self.config.stuck_threshold_ms,
            "Watchdog started"
        );
        true
    }

    /// Cancel the periodic task and wait for it.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some((cancel, join)) = task {
            cancel.cancel();
            if let Err(e) = join.await {
                warn!(error = %e, "Watchdog task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Run one pass, unless the previous one is still going.
    pub async fn tick(&self) -> TickReport {
        if self.ticking.swap(true, Ordering::SeqCst) {
            debug!("Previous watchdog tick still running, skipping");
            return TickReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = TickGuard(&self.ticking);

        let timeout = self.config.tick_timeout();
        match tokio::time::timeout(timeout, self.run_tick()).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(error = %e, "Watchdog tick failed");
                TickReport::default()
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Watchdog tick timed out"
                );
                TickReport::default()
            }
        }
    }

    async fn run_tick(&self) -> WorkerResult<TickReport> {
        let mut report = TickReport::default();

        report.reset = self
            .pending
            .reset_stuck_messages(self.config.stuck_threshold_ms)?;
        if report.reset > 0 {
            warn!(
                count = report.reset,
                threshold_ms = self.config.stuck_threshold_ms,
                degradation = %Degradation::StuckMessage,
                "Reset stuck messages"
            );
        }

        for session_db_id in self.pending.sessions_with_pending_messages()? {
            if self.sessions.has_active_generator(session_db_id) {
                continue;
            }

            if self.sessions.is_registered(session_db_id) {
                match self.sessions.start_generator(session_db_id) {
                    Ok(true) => report.restarted += 1,
                    Ok(false) => {}
                    Err(e) => warn!(session_db_id, error = %e, "Failed to restart agent"),
                }
            } else {
                warn!(
                    session_db_id,
                    degradation = %Degradation::OrphanedSession,
                    "Session has pending work but no registry entry"
                );
                let started = self
                    .sessions
                    .initialize_session(session_db_id)
                    .and_then(|_| self.sessions.start_generator(session_db_id));
                match started {
                    Ok(true) => report.recovered += 1,
                    Ok(false) => {}
                    Err(e) => warn!(session_db_id, error = %e, "Failed to recover session"),
                }
            }

            tokio::task::yield_now().await;
        }

        report.cleaned = self.pending.cleanup_processed(self.config.retention_ms)?;
        if report.cleaned > 0 {
            debug!(count = report.cleaned, "Deleted old processed messages");
        }

        Ok(report)
    }

    /// Startup recovery: every `processing` row left by a previous process
    /// is requeued and every session with work gets an agent.
    pub async fn recover_pending_messages(&self) -> WorkerResult<RecoveryReport> {
        let reset = self.pending.reset_stuck_messages(0)?;
        if reset > 0 {
            warn!(
                count = reset,
                degradation = %Degradation::StuckMessage,
                "Requeued messages left in processing"
            );
        }

        let mut sessions = 0;
        for session_db_id in self.pending.sessions_with_pending_messages()? {
            let started = self
                .sessions
                .initialize_session(session_db_id)
                .and_then(|_| self.sessions.start_generator(session_db_id));
            match started {
                Ok(true) => sessions += 1,
                Ok(false) => {}
                Err(e) => warn!(session_db_id, error = %e, "Failed to resume session"),
            }
            tokio::task::yield_now().await;
        }

        info!(reset, sessions, "Startup recovery complete");
        Ok(RecoveryReport { reset, sessions })
    }
}

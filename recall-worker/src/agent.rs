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

//! Compression agent.
//!
//! One agent task drains one session's queue. Each claimed message is sent
//! to a [`CompressionClient`], the output is persisted and indexed, and the
//! row is completed or failed. Cancellation leaves the in-flight row in
//! `processing` for a restart or the watchdog to reset.

use crate::error::{AgentError, WorkerResult};
use crate::vector::{self, VectorStoreClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use recall_core::{
    AncestryResolver, Degradation, FailOutcome, MessageType, NewObservation, NewSessionSummary,
    ObservationType, PendingMessage, SearchOptions,
};
use recall_storage::{ObservationStore, PendingStore};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The session an agent task works for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub project: String,
}

/// Outcome counts of one agent run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The run stopped because its token was cancelled.
    pub cancelled: bool,
}

/// Drains a session's pending messages.
///
/// Implementations must only claim rows of the session they were started
/// for, and must stop promptly once `cancel` fires.
#[async_trait]
pub trait AgentRunner: Send + Sync + 'static {
    async fn run_session(
        &self,
        session: SessionContext,
        cancel: CancellationToken,
    ) -> WorkerResult<RunSummary>;
}

/// Observation fields returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressedObservation {
    #[serde(rename = "type", default)]
    pub obs_type: ObservationType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
}

impl CompressedObservation {
    fn into_new(self, session: &SessionContext, message: &PendingMessage) -> NewObservation {
        let obs_type = self.obs_type;
        NewObservation {
            session_db_id: session.session_db_id,
            content_session_id: session.content_session_id.clone(),
            project: session.project.clone(),
            obs_type,
            title: self.title,
            subtitle: self.subtitle,
            narrative: self.narrative,
            text: None,
            facts: self.facts,
            // Types and concepts are separate dimensions.
            concepts: self
                .concepts
                .into_iter()
                .filter(|c| c != obs_type.as_str())
                .collect(),
            files_read: self.files_read,
            files_modified: self.files_modified,
            prompt_number: message.prompt_number,
            commit_sha: None,
            branch: None,
        }
    }
}

/// Summary fields returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressedSummary {
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub investigated: Option<String>,
    #[serde(default)]
    pub learned: Option<String>,
    #[serde(default)]
    pub completed: Option<String>,
    #[serde(default)]
    pub next_steps: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CompressedSummary {
    fn into_new(self, session: &SessionContext, message: &PendingMessage) -> NewSessionSummary {
        NewSessionSummary {
            session_db_id: session.session_db_id,
            content_session_id: session.content_session_id.clone(),
            project: session.project.clone(),
            request: self.request,
            investigated: self.investigated,
            learned: self.learned,
            completed: self.completed,
            next_steps: self.next_steps,
            notes: self.notes,
            prompt_number: message.prompt_number,
        }
    }
}

/// What the model made of one queued message.
#[derive(Debug, Clone, PartialEq)]
pub enum CompressionOutput {
    Observation(CompressedObservation),
    Summary(CompressedSummary),
    /// Nothing worth remembering.
    Skip,
}

/// LLM backend used by [`CompressionAgent`].
#[async_trait]
pub trait CompressionClient: Send + Sync + 'static {
    async fn compress(
        &self,
        session: &SessionContext,
        message: &PendingMessage,
    ) -> Result<CompressionOutput, AgentError>;

    fn model_name(&self) -> &str;
}

/// Production [`AgentRunner`].
pub struct CompressionAgent<C: CompressionClient> {
    client: Arc<C>,
    pending: PendingStore,
    observations: ObservationStore,
    vector: Option<Arc<dyn VectorStoreClient>>,
    git: Option<AncestryResolver>,
    request_timeout: Duration,
}

impl<C: CompressionClient> CompressionAgent<C> {
    pub fn new(client: Arc<C>, pending: PendingStore, observations: ObservationStore) -> Self {
        Self {
            client,
            pending,
            observations,
            vector: None,
            git: None,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// Index persisted records into a vector store.
    pub fn with_vector_store(mut self, vector: Arc<dyn VectorStoreClient>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Stamp observations with the commit and branch of the message's `cwd`.
    pub fn with_git(mut self, resolver: AncestryResolver) -> Self {
        self.git = Some(resolver);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Compress and persist one message. Returns `false` for a skip.
    async fn handle(
        &self,
        session: &SessionContext,
        message: &PendingMessage,
        output: CompressionOutput,
    ) -> Result<bool, AgentError> {
        match output {
            CompressionOutput::Skip => Ok(false),
            CompressionOutput::Observation(compressed) => {
                let mut obs = compressed.into_new(session, message);
                if let (Some(git), Some(cwd)) = (&self.git, message.cwd.as_deref()) {
                    let dir = Path::new(cwd);
                    obs.commit_sha = git.get_current_head(dir).await;
                    if obs.commit_sha.is_some() {
                        obs.branch = git.get_current_branch(dir).await;
                    }
                }
                let id = self.observations.insert_observation(&obs)?;
                debug!(
                    session_db_id = session.session_db_id,
                    observation_id = id,
                    obs_type = %obs.obs_type,
                    "Stored observation"
                );
                if self.vector.is_some() {
                    let records = self
                        .observations
                        .observations_by_ids(&[id], &SearchOptions::default())?;
                    let docs = records.iter().flat_map(vector::observation_documents).collect();
                    self.index(docs).await;
                }
                Ok(true)
            }
            CompressionOutput::Summary(compressed) => {
                let summary = compressed.into_new(session, message);
                let id = self.observations.insert_summary(&summary)?;
                info!(
                    session_db_id = session.session_db_id,
                    summary_id = id,
                    "Stored session summary"
                );
                if self.vector.is_some() {
                    let records = self
                        .observations
                        .summaries_by_ids(&[id], &SearchOptions::default())?;
                    let docs = records.iter().flat_map(vector::summary_documents).collect();
                    self.index(docs).await;
                }
                Ok(true)
            }
        }
    }

    /// The store is the system of record; indexing failures only cost recall.
    async fn index(&self, docs: Vec<vector::VectorDocument>) {
        let Some(client) = &self.vector else {
            return;
        };
        let count = docs.len();
        match tokio::time::timeout(self.request_timeout, client.upsert(docs)).await {
            Ok(Ok(())) => debug!(documents = count, "Indexed vector documents"),
            Ok(Err(e)) => warn!(
                error = %e,
                degradation = %Degradation::StrategyUnavailable,
                "Vector upsert failed"
            ),
            Err(_) => warn!(
                timeout_ms = self.request_timeout.as_millis() as u64,
                degradation = %Degradation::StrategyUnavailable,
                "Vector upsert timed out"
            ),
        }
    }
}

#[async_trait]
impl<C: CompressionClient> AgentRunner for CompressionAgent<C> {
    async fn run_session(
        &self,
        session: SessionContext,
        cancel: CancellationToken,
    ) -> WorkerResult<RunSummary> {
        let mut summary = RunSummary::default();
        debug!(
            session_db_id = session.session_db_id,
            model = %self.client.model_name(),
            "Agent run started"
        );

        loop {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let Some(message) = self.pending.claim_next(session.session_db_id)? else {
                break;
            };

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(
                        session_db_id = session.session_db_id,
                        message_id = message.id,
                        "Agent cancelled mid-message, row left in processing"
                    );
                    summary.cancelled = true;
                    break;
                }
                result = tokio::time::timeout(
                    self.request_timeout,
                    self.client.compress(&session, &message),
                ) => result,
            };

            let result = match attempt {
                Ok(Ok(output)) => self.handle(&session, &message, output).await,
                Ok(Err(e)) => Err(e),
                Err(_) => Err(AgentError::Timeout {
                    timeout_ms: self.request_timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(stored) => {
                    self.pending.complete(message.id)?;
                    if stored {
                        summary.processed += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    match self.pending.fail(message.id)? {
                        FailOutcome::Exhausted { retry_count } => warn!(
                            session_db_id = session.session_db_id,
                            message_id = message.id,
                            retry_count,
                            error = %e,
                            degradation = %Degradation::ExhaustedRetries,
                            "Message failed permanently"
                        ),
                        FailOutcome::Requeued { retry_count } => warn!(
                            session_db_id = session.session_db_id,
                            message_id = message.id,
                            retry_count,
                            error = %e,
                            "Compression failed, message requeued"
                        ),
                        FailOutcome::NotFound => debug!(
                            message_id = message.id,
                            "Failed message no longer in the queue"
                        ),
                    }
                }
            }
        }

        info!(
            session_db_id = session.session_db_id,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "Agent run finished"
        );
        Ok(summary)
    }
}

/// Scripted [`CompressionClient`] for tests and offline runs.
///
/// Replies are taken from the script in order. Once it is empty, tool uses
/// become a discovery titled after the tool and summarize requests echo the
/// last assistant message.
#[derive(Default)]
pub struct MockCompressionClient {
    script: Mutex<VecDeque<Result<CompressionOutput, String>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockCompressionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: Vec<Result<CompressionOutput, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    /// Sleep before every reply.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompressionClient for MockCompressionClient {
    async fn compress(
        &self,
        _session: &SessionContext,
        message: &PendingMessage,
    ) -> Result<CompressionOutput, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(Ok(output)) => Ok(output),
            Some(Err(e)) => Err(AgentError::Llm(e)),
            None => Ok(match message.message_type {
                MessageType::Observation => CompressionOutput::Observation(CompressedObservation {
                    title: Some(format!(
                        "Used {}",
                        message.tool_name.as_deref().unwrap_or("tool")
                    )),
                    ..Default::default()
                }),
                MessageType::Summarize => CompressionOutput::Summary(CompressedSummary {
                    request: message.last_assistant_message.clone(),
                    ..Default::default()
                }),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::{MessageStatus, NewPendingMessage};
    use recall_storage::{Database, SessionStore};
    use serde_json::json;

    struct Fixture {
        pending: PendingStore,
        observations: ObservationStore,
        session: SessionContext,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let record = SessionStore::new(db.clone())
            .init_session("content-1", "recall", None)
            .unwrap();
        Fixture {
            pending: PendingStore::new(db.clone()),
            observations: ObservationStore::new(db),
            session: SessionContext {
                session_db_id: record.id,
                content_session_id: record.content_session_id,
                project: record.project,
            },
        }
    }

    fn enqueue_tool(f: &Fixture, tool: &str) -> i64 {
        f.pending
            .enqueue(&NewPendingMessage::observation(
                f.session.session_db_id,
                &f.session.content_session_id,
                tool,
                json!({"path": "src/lib.rs"}),
                json!("ok"),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_drains_queue_in_order() {
        let f = fixture();
        let first = enqueue_tool(&f, "Read");
        let second = enqueue_tool(&f, "Edit");

        let agent = CompressionAgent::new(
            Arc::new(MockCompressionClient::new()),
            f.pending.clone(),
            f.observations.clone(),
        );
        let summary = agent
            .run_session(f.session.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        assert!(!summary.cancelled);
        for id in [first, second] {
            assert_eq!(
                f.pending.get(id).unwrap().unwrap().status,
                MessageStatus::Processed
            );
        }

        let stored = f
            .observations
            .recent_observations("recall", &recall_core::CommitVisibility::All, 10)
            .unwrap();
        let mut titles: Vec<_> = stored.iter().map(|o| o.display_title().to_string()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Used Edit", "Used Read"]);
    }

    #[tokio::test]
    async fn test_skip_completes_without_storing() {
        let f = fixture();
        let id = enqueue_tool(&f, "Glob");
        let agent = CompressionAgent::new(
            Arc::new(MockCompressionClient::with_script(vec![Ok(CompressionOutput::Skip)])),
            f.pending.clone(),
            f.observations.clone(),
        );
        let summary = agent
            .run_session(f.session.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(
            f.pending.get(id).unwrap().unwrap().status,
            MessageStatus::Processed
        );
        assert!(f
            .observations
            .recent_observations("recall", &recall_core::CommitVisibility::All, 10)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_repeated_failures_exhaust_retries() {
        let f = fixture();
        let id = enqueue_tool(&f, "Bash");
        let errors = (0..4).map(|i| Err(format!("boom {i}"))).collect();
        let client = Arc::new(MockCompressionClient::with_script(errors));
        let agent = CompressionAgent::new(client.clone(), f.pending.clone(), f.observations.clone());

        let summary = agent
            .run_session(f.session.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.failed, 4);
        assert_eq!(client.calls(), 4);
        let row = f.pending.get(id).unwrap().unwrap();
        assert_eq!(row.status, MessageStatus::Failed);
        assert_eq!(row.retry_count, 4);
    }

    #[tokio::test]
    async fn test_cancel_leaves_row_processing() {
        let f = fixture();
        let id = enqueue_tool(&f, "Read");
        let agent = Arc::new(CompressionAgent::new(
            Arc::new(MockCompressionClient::new().with_delay(Duration::from_secs(30))),
            f.pending.clone(),
            f.observations.clone(),
        ));

        let cancel = CancellationToken::new();
        let task = {
            let agent = agent.clone();
            let session = f.session.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { agent.run_session(session, cancel).await })
        };

        // Wait until the row has been claimed.
        for _ in 0..100 {
            if f.pending.get(id).unwrap().unwrap().status == MessageStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        let summary = task.await.unwrap().unwrap();
        assert!(summary.cancelled);
        assert_eq!(
            f.pending.get(id).unwrap().unwrap().status,
            MessageStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_summary_is_persisted() {
        let f = fixture();
        f.pending
            .enqueue(&NewPendingMessage::summarize(
                f.session.session_db_id,
                &f.session.content_session_id,
                Some("Implemented login".to_string()),
            ))
            .unwrap();
        let agent = CompressionAgent::new(
            Arc::new(MockCompressionClient::new()),
            f.pending.clone(),
            f.observations.clone(),
        );
        agent
            .run_session(f.session.clone(), CancellationToken::new())
            .await
            .unwrap();

        let summaries = f.observations.recent_summaries("recall", 5).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].request.as_deref(), Some("Implemented login"));
    }

    #[test]
    fn test_type_is_removed_from_concepts() {
        let compressed: CompressedObservation = serde_json::from_value(json!({
            "type": "bugfix",
            "title": "Fix race",
            "concepts": ["bugfix", "concurrency"]
        }))
        .unwrap();
        let message = PendingMessage {
            id: 1,
            session_db_id: 1,
            content_session_id: "c".into(),
            message_type: MessageType::Observation,
            tool_name: None,
            tool_input: None,
            tool_response: None,
            cwd: None,
            last_assistant_message: None,
            prompt_number: Some(3),
            status: MessageStatus::Processing,
            retry_count: 0,
            created_at_epoch: 0,
            started_processing_at_epoch: None,
            completed_at_epoch: None,
            failed_at_epoch: None,
            project: None,
        };
        let session = SessionContext {
            session_db_id: 1,
            content_session_id: "c".into(),
            project: "p".into(),
        };
        let obs = compressed.into_new(&session, &message);
        assert_eq!(obs.concepts, vec!["concurrency"]);
        assert_eq!(obs.prompt_number, Some(3));
    }
}

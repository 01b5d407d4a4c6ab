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

//! Vector store client
//!
//! Talks to an external Chroma-compatible sidecar over HTTP. Each stored
//! record is split into one document per semantic field so that a query can
//! match a single fact without the rest of the observation diluting it.
//! Every document carries the row id of its source record in `sqlite_id`.

use crate::error::VectorStoreError;
use async_trait::async_trait;
use recall_core::{ObservationRecord, SessionSummaryRecord, UserPromptRecord};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Record kind a vector document was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Observation,
    SessionSummary,
    UserPrompt,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Observation => "observation",
            DocType::SessionSummary => "session_summary",
            DocType::UserPrompt => "user_prompt",
        }
    }
}

/// The subset of document metadata needed to hydrate a hit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VectorMetadata {
    pub sqlite_id: i64,
    pub doc_type: DocType,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub created_at_epoch: Option<i64>,
}

/// Hits for one query, closest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorQueryResult {
    pub ids: Vec<String>,
    pub metadatas: Vec<Value>,
}

impl VectorQueryResult {
    /// Typed metadata in rank order. Entries without a usable `sqlite_id`
    /// or `doc_type` are dropped.
    pub fn parsed_metadata(&self) -> Vec<VectorMetadata> {
        self.metadatas
            .iter()
            .filter_map(|meta| serde_json::from_value(meta.clone()).ok())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One document to embed and store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorDocument {
    pub id: String,
    pub document: String,
    pub metadata: Value,
}

#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    /// Nearest `k` documents to `text`.
    ///
    /// `where_filter` restricts by metadata (for example by `doc_type`);
    /// `project` is combined with it when present.
    async fn query(
        &self,
        text: &str,
        k: usize,
        where_filter: Option<Value>,
        project: Option<&str>,
    ) -> Result<VectorQueryResult, VectorStoreError>;

    async fn upsert(&self, documents: Vec<VectorDocument>) -> Result<(), VectorStoreError>;
}

/// Build the metadata `where` clause for a query.
pub fn combine_where(where_filter: Option<Value>, project: Option<&str>) -> Option<Value> {
    let project = project.map(|p| json!({ "project": p }));
    match (where_filter, project) {
        (Some(filter), Some(project)) => Some(json!({ "$and": [filter, project] })),
        (Some(filter), None) => Some(filter),
        (None, Some(project)) => Some(project),
        (None, None) => None,
    }
}

/// Split an observation into narrative, text and per-fact documents.
pub fn observation_documents(obs: &ObservationRecord) -> Vec<VectorDocument> {
    let mut base = json!({
        "sqlite_id": obs.id,
        "doc_type": DocType::Observation.as_str(),
        "content_session_id": obs.content_session_id,
        "project": obs.project,
        "created_at_epoch": obs.created_at_epoch,
        "type": obs.obs_type.as_str(),
        "title": obs.title.as_deref().unwrap_or("Untitled"),
    });
    if let Some(map) = base.as_object_mut() {
        if let Some(subtitle) = &obs.subtitle {
            map.insert("subtitle".into(), json!(subtitle));
        }
        if !obs.concepts.is_empty() {
            map.insert("concepts".into(), json!(obs.concepts.join(",")));
        }
        if !obs.files_read.is_empty() {
            map.insert("files_read".into(), json!(obs.files_read.join(",")));
        }
        if !obs.files_modified.is_empty() {
            map.insert("files_modified".into(), json!(obs.files_modified.join(",")));
        }
        if let Some(sha) = &obs.commit_sha {
            map.insert("commit_sha".into(), json!(sha));
        }
    }

    let mut docs = Vec::new();
    if let Some(narrative) = non_empty(obs.narrative.as_deref()) {
        docs.push(field_doc(
            format!("obs_{}_narrative", obs.id),
            narrative,
            &base,
            "narrative",
        ));
    }
    if let Some(text) = non_empty(obs.text.as_deref()) {
        docs.push(field_doc(format!("obs_{}_text", obs.id), text, &base, "text"));
    }
    for (index, fact) in obs.facts.iter().enumerate() {
        if fact.trim().is_empty() {
            continue;
        }
        let mut doc = field_doc(format!("obs_{}_fact_{index}", obs.id), fact, &base, "fact");
        if let Some(map) = doc.metadata.as_object_mut() {
            map.insert("fact_index".into(), json!(index));
        }
        docs.push(doc);
    }
    docs
}

/// One document per non-empty summary field.
pub fn summary_documents(summary: &SessionSummaryRecord) -> Vec<VectorDocument> {
    let base = json!({
        "sqlite_id": summary.id,
        "doc_type": DocType::SessionSummary.as_str(),
        "content_session_id": summary.content_session_id,
        "project": summary.project,
        "created_at_epoch": summary.created_at_epoch,
        "prompt_number": summary.prompt_number.unwrap_or(0),
    });

    [
        ("request", &summary.request),
        ("investigated", &summary.investigated),
        ("learned", &summary.learned),
        ("completed", &summary.completed),
        ("next_steps", &summary.next_steps),
        ("notes", &summary.notes),
    ]
    .into_iter()
    .filter_map(|(field, value)| {
        non_empty(value.as_deref()).map(|text| {
            field_doc(format!("summary_{}_{field}", summary.id), text, &base, field)
        })
    })
    .collect()
}

pub fn prompt_document(prompt: &UserPromptRecord) -> VectorDocument {
    VectorDocument {
        id: format!("prompt_{}", prompt.id),
        document: prompt.prompt_text.clone(),
        metadata: json!({
            "sqlite_id": prompt.id,
            "doc_type": DocType::UserPrompt.as_str(),
            "content_session_id": prompt.content_session_id,
            "project": prompt.project,
            "created_at_epoch": prompt.created_at_epoch,
            "prompt_number": prompt.prompt_number,
        }),
    }
}

fn field_doc(id: String, text: &str, base: &Value, field_type: &str) -> VectorDocument {
    let mut metadata = base.clone();
    if let Some(map) = metadata.as_object_mut() {
        map.insert("field_type".into(), json!(field_type));
    }
    VectorDocument {
        id,
        document: text.to_string(),
        metadata,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// [`VectorStoreClient`] for a Chroma-style REST API.
pub struct HttpVectorStoreClient {
    base_url: String,
    collection: String,
    client: reqwest::Client,
}

impl HttpVectorStoreClient {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Per-request timeout applied by the HTTP client.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, VectorStoreError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn collection_url(&self, action: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{}",
            self.base_url, self.collection, action
        )
    }

    async fn post(&self, action: &str, body: &Value) -> Result<Value, VectorStoreError> {
        let response = self
            .client
            .post(self.collection_url(action))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // Upsert may answer with an empty body.
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| VectorStoreError::Decode(e.to_string()))
    }
}

/// Chroma nests results one level per query text.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    metadatas: Vec<Vec<Value>>,
}

#[async_trait]
impl VectorStoreClient for HttpVectorStoreClient {
    async fn query(
        &self,
        text: &str,
        k: usize,
        where_filter: Option<Value>,
        project: Option<&str>,
    ) -> Result<VectorQueryResult, VectorStoreError> {
        let mut body = json!({
            "query_texts": [text],
            "n_results": k,
            "include": ["metadatas"],
        });
        if let (Some(clause), Some(map)) = (combine_where(where_filter, project), body.as_object_mut())
        {
            map.insert("where".into(), clause);
        }

        let raw = self.post("query", &body).await?;
        let parsed: QueryResponse =
            serde_json::from_value(raw).map_err(|e| VectorStoreError::Decode(e.to_string()))?;

        Ok(VectorQueryResult {
            ids: parsed.ids.into_iter().next().unwrap_or_default(),
            metadatas: parsed.metadatas.into_iter().next().unwrap_or_default(),
        })
    }

    async fn upsert(&self, documents: Vec<VectorDocument>) -> Result<(), VectorStoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        let mut ids = Vec::with_capacity(documents.len());
        let mut texts = Vec::with_capacity(documents.len());
        let mut metadatas = Vec::with_capacity(documents.len());
        for doc in documents {
            ids.push(doc.id);
            texts.push(doc.document);
            metadatas.push(doc.metadata);
        }
        self.post(
            "upsert",
            &json!({ "ids": ids, "documents": texts, "metadatas": metadatas }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::ObservationType;

    fn observation() -> ObservationRecord {
        ObservationRecord {
            id: 7,
            session_db_id: 1,
            content_session_id: "c-1".to_string(),
            project: "recall".to_string(),
            obs_type: ObservationType::Bugfix,
            title: Some("Fix token refresh".to_string()),
            subtitle: None,
            narrative: Some("Refresh raced the expiry check".to_string()),
            text: None,
            facts: vec!["expiry is checked twice".to_string(), " ".to_string()],
            concepts: vec!["auth".to_string()],
            files_read: vec![],
            files_modified: vec!["src/auth.rs".to_string()],
            prompt_number: Some(2),
            commit_sha: Some("abc123".to_string()),
            branch: Some("main".to_string()),
            created_at_epoch: 1_700_000_000_000,
            score: None,
        }
    }

    #[test]
    fn test_observation_is_split_per_field() {
        let docs = observation_documents(&observation());
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["obs_7_narrative", "obs_7_fact_0"]);
        assert_eq!(docs[1].metadata["sqlite_id"], 7);
        assert_eq!(docs[1].metadata["doc_type"], "observation");
        assert_eq!(docs[1].metadata["field_type"], "fact");
        assert_eq!(docs[0].metadata["files_modified"], "src/auth.rs");
    }

    #[test]
    fn test_summary_skips_empty_fields() {
        let summary = SessionSummaryRecord {
            id: 3,
            session_db_id: 1,
            content_session_id: "c-1".to_string(),
            project: "recall".to_string(),
            request: Some("Add login".to_string()),
            investigated: None,
            learned: Some(String::new()),
            completed: Some("Login form".to_string()),
            next_steps: None,
            notes: None,
            prompt_number: None,
            created_at_epoch: 0,
            score: None,
        };
        let ids: Vec<String> = summary_documents(&summary).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["summary_3_request", "summary_3_completed"]);
    }

    #[test]
    fn test_combine_where_with_project() {
        let clause = combine_where(Some(json!({"doc_type": "observation"})), Some("recall"));
        assert_eq!(
            clause,
            Some(json!({"$and": [{"doc_type": "observation"}, {"project": "recall"}]}))
        );
        assert_eq!(combine_where(None, None), None);
    }

    #[test]
    fn test_unparseable_metadata_is_dropped() {
        let result = VectorQueryResult {
            ids: vec!["a".into(), "b".into(), "c".into()],
            metadatas: vec![
                json!({"sqlite_id": 1, "doc_type": "observation"}),
                json!({"doc_type": "observation"}),
                json!({"sqlite_id": 2, "doc_type": "user_prompt", "project": "x"}),
            ],
        };
        let parsed = result.parsed_metadata();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].doc_type, DocType::UserPrompt);
        assert_eq!(parsed[1].project.as_deref(), Some("x"));
    }
}

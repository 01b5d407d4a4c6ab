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

//! Observations, session summaries and user prompts.
//!
//! Full-text queries expect an already sanitized FTS5 expression. Filters
//! from [`SearchOptions`] are translated to SQL here so that every
//! retrieval path (keyword search, listing, and hydration of vector hits)
//! applies them identically.

use crate::database::Database;
use crate::error::StorageResult;
use recall_core::{
    now_epoch_ms, CommitVisibility, NewObservation, NewSessionSummary, NewUserPrompt,
    ObservationRecord, ObservationType, OrderBy, SearchOptions, SessionSummaryRecord,
    UserPromptRecord,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, ToSql};
use std::collections::HashMap;
use tracing::warn;

const OBSERVATION_COLUMNS: &str = "o.id, o.session_db_id, o.content_session_id, o.project, \
     o.type, o.title, o.subtitle, o.narrative, o.text, o.facts, o.concepts, o.files_read, \
     o.files_modified, o.prompt_number, o.commit_sha, o.branch, o.created_at_epoch";

const SUMMARY_COLUMNS: &str = "s.id, s.session_db_id, s.content_session_id, s.project, \
     s.request, s.investigated, s.learned, s.completed, s.next_steps, s.notes, \
     s.prompt_number, s.created_at_epoch";

const PROMPT_COLUMNS: &str =
    "p.id, p.content_session_id, p.project, p.prompt_number, p.prompt_text, p.created_at_epoch";

fn parse_json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
    }
}

fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<ObservationRecord> {
    let raw_type: String = row.get(4)?;
    let obs_type: ObservationType = raw_type
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;
    Ok(ObservationRecord {
        id: row.get(0)?,
        session_db_id: row.get(1)?,
        content_session_id: row.get(2)?,
        project: row.get(3)?,
        obs_type,
        title: row.get(5)?,
        subtitle: row.get(6)?,
        narrative: row.get(7)?,
        text: row.get(8)?,
        facts: parse_json_list(row, 9)?,
        concepts: parse_json_list(row, 10)?,
        files_read: parse_json_list(row, 11)?,
        files_modified: parse_json_list(row, 12)?,
        prompt_number: row.get(13)?,
        commit_sha: row.get(14)?,
        branch: row.get(15)?,
        created_at_epoch: row.get(16)?,
        score: row.get(17)?,
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<SessionSummaryRecord> {
    Ok(SessionSummaryRecord {
        id: row.get(0)?,
        session_db_id: row.get(1)?,
        content_session_id: row.get(2)?,
        project: row.get(3)?,
        request: row.get(4)?,
        investigated: row.get(5)?,
        learned: row.get(6)?,
        completed: row.get(7)?,
        next_steps: row.get(8)?,
        notes: row.get(9)?,
        prompt_number: row.get(10)?,
        created_at_epoch: row.get(11)?,
        score: row.get(12)?,
    })
}

fn row_to_prompt(row: &Row<'_>) -> rusqlite::Result<UserPromptRecord> {
    Ok(UserPromptRecord {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        project: row.get(2)?,
        prompt_number: row.get(3)?,
        prompt_text: row.get(4)?,
        created_at_epoch: row.get(5)?,
        score: row.get(6)?,
    })
}

fn log_row_error<T>(result: rusqlite::Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "Skipping unreadable memory row");
            None
        }
    }
}

fn escape_like_pattern(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn boxed<T: ToSql + 'static>(value: T) -> Box<dyn ToSql> {
    Box::new(value)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// WHERE clauses and their positional parameters, in order.
#[derive(Default)]
struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<Box<dyn ToSql>>,
}

impl SqlFilter {
    fn push(&mut self, clause: impl Into<String>, params: Vec<Box<dyn ToSql>>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    fn project(&mut self, alias: &str, options: &SearchOptions) {
        if let Some(project) = options.project.as_deref().filter(|p| !p.is_empty()) {
            self.push(
                format!("{alias}.project = ?"),
                vec![boxed(project.to_string())],
            );
        }
    }

    fn date_range(&mut self, alias: &str, options: &SearchOptions) {
        if let Some(range) = options.date_range {
            if let Some(start) = range.start {
                self.push(format!("{alias}.created_at_epoch >= ?"), vec![boxed(start)]);
            }
            if let Some(end) = range.end {
                self.push(format!("{alias}.created_at_epoch <= ?"), vec![boxed(end)]);
            }
        }
    }

    /// Observation-only filters: type, concept, file and commit visibility.
    fn observation_fields(&mut self, options: &SearchOptions) {
        if !options.obs_types.is_empty() {
            self.push(
                format!("o.type IN ({})", placeholders(options.obs_types.len())),
                options
                    .obs_types
                    .iter()
                    .map(|t| boxed(t.as_str()))
                    .collect(),
            );
        }

        if !options.concepts.is_empty() {
            self.push(
                format!(
                    "EXISTS (SELECT 1 FROM json_each(o.concepts) WHERE json_each.value IN ({}))",
                    placeholders(options.concepts.len())
                ),
                options
                    .concepts
                    .iter()
                    .map(|c| boxed(c.clone()))
                    .collect(),
            );
        }

        if !options.files.is_empty() {
            let mut clauses = Vec::with_capacity(options.files.len());
            let mut params: Vec<Box<dyn ToSql>> = Vec::with_capacity(options.files.len() * 2);
            for file in &options.files {
                let pattern = format!("%{}%", escape_like_pattern(file));
                clauses.push(
                    "(o.files_read LIKE ? ESCAPE '\\' OR o.files_modified LIKE ? ESCAPE '\\')",
                );
                params.push(boxed(pattern.clone()));
                params.push(boxed(pattern));
            }
            self.push(format!("({})", clauses.join(" OR ")), params);
        }

        self.commit_visibility(&CommitVisibility::from_resolved(
            options.visible_commits.clone(),
        ));
    }

    fn commit_visibility(&mut self, visibility: &CommitVisibility) {
        match visibility {
            CommitVisibility::All => {}
            CommitVisibility::UnversionedOnly => self.push("o.commit_sha IS NULL", Vec::new()),
            CommitVisibility::Visible(shas) => self.push(
                format!(
                    "(o.commit_sha IS NULL OR o.commit_sha IN ({}))",
                    placeholders(shas.len())
                ),
                shas.iter()
                    .map(|sha| boxed(sha.clone()))
                    .collect(),
            ),
        }
    }

    fn and_clause(&self) -> String {
        self.clauses
            .iter()
            .map(|c| format!(" AND {c}"))
            .collect::<String>()
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn date_order(alias: &str, order_by: OrderBy) -> String {
    match order_by {
        OrderBy::DateAsc => format!("{alias}.created_at_epoch ASC, {alias}.id ASC"),
        _ => format!("{alias}.created_at_epoch DESC, {alias}.id DESC"),
    }
}

fn rank_order(alias: &str, order_by: OrderBy) -> String {
    match order_by {
        OrderBy::Relevance => format!("score ASC, {alias}.id DESC"),
        other => date_order(alias, other),
    }
}

/// Run `sql` with a leading optional MATCH parameter, the filter parameters
/// and a trailing LIMIT.
fn query_rows<T>(
    conn: &Connection,
    sql: &str,
    fts_query: Option<&str>,
    filter: &SqlFilter,
    limit: usize,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> StorageResult<Vec<T>> {
    let limit = limit as i64;
    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(filter.params.len() + 2);
    if let Some(query) = &fts_query {
        params.push(query);
    }
    params.extend(filter.params.iter().map(|p| p.as_ref()));
    params.push(&limit);

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params.as_slice(), map)?
        .filter_map(log_row_error)
        .collect();
    Ok(rows)
}

/// Put rows back into the order of `ids`, dropping ids with no row.
fn in_id_order<T>(ids: &[i64], rows: Vec<T>, id_of: fn(&T) -> i64) -> Vec<T> {
    let mut by_id: HashMap<i64, T> = rows.into_iter().map(|r| (id_of(&r), r)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

/// Reads and writes of compressed memory.
#[derive(Debug, Clone)]
pub struct ObservationStore {
    db: Database,
}

impl ObservationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn insert_observation(&self, obs: &NewObservation) -> StorageResult<i64> {
        self.insert_observation_at(obs, now_epoch_ms())
    }

    pub fn insert_observation_at(&self, obs: &NewObservation, now_ms: i64) -> StorageResult<i64> {
        let facts = serde_json::to_string(&obs.facts)?;
        let concepts = serde_json::to_string(&obs.concepts)?;
        let files_read = serde_json::to_string(&obs.files_read)?;
        let files_modified = serde_json::to_string(&obs.files_modified)?;

        let conn = self.db.lock();
        conn.execute(
            r#"INSERT INTO observations
               (session_db_id, content_session_id, project, type, title, subtitle, narrative,
                text, facts, concepts, files_read, files_modified, prompt_number, commit_sha,
                branch, created_at_epoch)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
            params![
                obs.session_db_id,
                obs.content_session_id,
                obs.project,
                obs.obs_type.as_str(),
                obs.title,
                obs.subtitle,
                obs.narrative,
                obs.text,
                facts,
                concepts,
                files_read,
                files_modified,
                obs.prompt_number,
                obs.commit_sha,
                obs.branch,
                now_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_summary(&self, summary: &NewSessionSummary) -> StorageResult<i64> {
        self.insert_summary_at(summary, now_epoch_ms())
    }

    pub fn insert_summary_at(&self, summary: &NewSessionSummary, now_ms: i64) -> StorageResult<i64> {
        let conn = self.db.lock();
        conn.execute(
            r#"INSERT INTO session_summaries
               (session_db_id, content_session_id, project, request, investigated, learned,
                completed, next_steps, notes, prompt_number, created_at_epoch)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                summary.session_db_id,
                summary.content_session_id,
                summary.project,
                summary.request,
                summary.investigated,
                summary.learned,
                summary.completed,
                summary.next_steps,
                summary.notes,
                summary.prompt_number,
                now_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_user_prompt(&self, prompt: &NewUserPrompt) -> StorageResult<i64> {
        self.insert_user_prompt_at(prompt, now_epoch_ms())
    }

    pub fn insert_user_prompt_at(&self, prompt: &NewUserPrompt, now_ms: i64) -> StorageResult<i64> {
        let conn = self.db.lock();
        conn.execute(
            r#"INSERT INTO user_prompts
               (content_session_id, project, prompt_number, prompt_text, created_at_epoch)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                prompt.content_session_id,
                prompt.project,
                prompt.prompt_number,
                prompt.prompt_text,
                now_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Keyword search over observations, best match first unless a date
    /// order is requested.
    pub fn search_observations(
        &self,
        fts_query: &str,
        options: &SearchOptions,
        limit: usize,
    ) -> StorageResult<Vec<ObservationRecord>> {
        let mut filter = SqlFilter::default();
        filter.project("o", options);
        filter.date_range("o", options);
        filter.observation_fields(options);

        let sql = format!(
            r#"SELECT {OBSERVATION_COLUMNS},
                      bm25(observations_fts, 10.0, 5.0, 3.0, 2.0, 1.0, 1.0) AS score
               FROM observations_fts
               JOIN observations o ON o.id = observations_fts.rowid
               WHERE observations_fts MATCH ?{}
               ORDER BY {}
               LIMIT ?"#,
            filter.and_clause(),
            rank_order("o", options.order_by),
        );

        let conn = self.db.lock();
        query_rows(&conn, &sql, Some(fts_query), &filter, limit, row_to_observation)
    }

    pub fn search_summaries(
        &self,
        fts_query: &str,
        options: &SearchOptions,
        limit: usize,
    ) -> StorageResult<Vec<SessionSummaryRecord>> {
        let mut filter = SqlFilter::default();
        filter.project("s", options);
        filter.date_range("s", options);

        let sql = format!(
            r#"SELECT {SUMMARY_COLUMNS},
                      bm25(session_summaries_fts, 5.0, 3.0, 3.0, 3.0, 2.0, 1.0) AS score
               FROM session_summaries_fts
               JOIN session_summaries s ON s.id = session_summaries_fts.rowid
               WHERE session_summaries_fts MATCH ?{}
               ORDER BY {}
               LIMIT ?"#,
            filter.and_clause(),
            rank_order("s", options.order_by),
        );

        let conn = self.db.lock();
        query_rows(&conn, &sql, Some(fts_query), &filter, limit, row_to_summary)
    }

    pub fn search_prompts(
        &self,
        fts_query: &str,
        options: &SearchOptions,
        limit: usize,
    ) -> StorageResult<Vec<UserPromptRecord>> {
        let mut filter = SqlFilter::default();
        filter.project("p", options);
        filter.date_range("p", options);

        let sql = format!(
            r#"SELECT {PROMPT_COLUMNS}, bm25(user_prompts_fts) AS score
               FROM user_prompts_fts
               JOIN user_prompts p ON p.id = user_prompts_fts.rowid
               WHERE user_prompts_fts MATCH ?{}
               ORDER BY {}
               LIMIT ?"#,
            filter.and_clause(),
            rank_order("p", options.order_by),
        );

        let conn = self.db.lock();
        query_rows(&conn, &sql, Some(fts_query), &filter, limit, row_to_prompt)
    }

    /// Filter-only listing, newest first unless `DateAsc` is requested.
    pub fn list_observations(
        &self,
        options: &SearchOptions,
        limit: usize,
    ) -> StorageResult<Vec<ObservationRecord>> {
        let mut filter = SqlFilter::default();
        filter.project("o", options);
        filter.date_range("o", options);
        filter.observation_fields(options);

        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS}, NULL AS score FROM observations o {} ORDER BY {} LIMIT ?",
            filter.where_clause(),
            date_order("o", options.order_by),
        );

        let conn = self.db.lock();
        query_rows(&conn, &sql, None, &filter, limit, row_to_observation)
    }

    pub fn list_summaries(
        &self,
        options: &SearchOptions,
        limit: usize,
    ) -> StorageResult<Vec<SessionSummaryRecord>> {
        let mut filter = SqlFilter::default();
        filter.project("s", options);
        filter.date_range("s", options);

        let sql = format!(
            "SELECT {SUMMARY_COLUMNS}, NULL AS score FROM session_summaries s {} ORDER BY {} LIMIT ?",
            filter.where_clause(),
            date_order("s", options.order_by),
        );

        let conn = self.db.lock();
        query_rows(&conn, &sql, None, &filter, limit, row_to_summary)
    }

    pub fn list_prompts(
        &self,
        options: &SearchOptions,
        limit: usize,
    ) -> StorageResult<Vec<UserPromptRecord>> {
        let mut filter = SqlFilter::default();
        filter.project("p", options);
        filter.date_range("p", options);

        let sql = format!(
            "SELECT {PROMPT_COLUMNS}, NULL AS score FROM user_prompts p {} ORDER BY {} LIMIT ?",
            filter.where_clause(),
            date_order("p", options.order_by),
        );

        let conn = self.db.lock();
        query_rows(&conn, &sql, None, &filter, limit, row_to_prompt)
    }

    /// Load observations by id, applying the option filters. With
    /// `Relevance` ordering the order of `ids` is kept.
    pub fn observations_by_ids(
        &self,
        ids: &[i64],
        options: &SearchOptions,
    ) -> StorageResult<Vec<ObservationRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut filter = SqlFilter::default();
        filter.push(
            format!("o.id IN ({})", placeholders(ids.len())),
            ids.iter().map(|id| boxed(*id)).collect(),
        );
        filter.project("o", options);
        filter.date_range("o", options);
        filter.observation_fields(options);

        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS}, NULL AS score FROM observations o {} ORDER BY {} LIMIT ?",
            filter.where_clause(),
            date_order("o", options.order_by),
        );

        let rows = {
            let conn = self.db.lock();
            query_rows(&conn, &sql, None, &filter, ids.len(), row_to_observation)?
        };
        Ok(match options.order_by {
            OrderBy::Relevance => in_id_order(ids, rows, |r| r.id),
            _ => rows,
        })
    }

    pub fn summaries_by_ids(
        &self,
        ids: &[i64],
        options: &SearchOptions,
    ) -> StorageResult<Vec<SessionSummaryRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut filter = SqlFilter::default();
        filter.push(
            format!("s.id IN ({})", placeholders(ids.len())),
            ids.iter().map(|id| boxed(*id)).collect(),
        );
        filter.project("s", options);
        filter.date_range("s", options);

        let sql = format!(
            "SELECT {SUMMARY_COLUMNS}, NULL AS score FROM session_summaries s {} ORDER BY {} LIMIT ?",
            filter.where_clause(),
            date_order("s", options.order_by),
        );

        let rows = {
            let conn = self.db.lock();
            query_rows(&conn, &sql, None, &filter, ids.len(), row_to_summary)?
        };
        Ok(match options.order_by {
            OrderBy::Relevance => in_id_order(ids, rows, |r| r.id),
            _ => rows,
        })
    }

    pub fn prompts_by_ids(
        &self,
        ids: &[i64],
        options: &SearchOptions,
    ) -> StorageResult<Vec<UserPromptRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut filter = SqlFilter::default();
        filter.push(
            format!("p.id IN ({})", placeholders(ids.len())),
            ids.iter().map(|id| boxed(*id)).collect(),
        );
        filter.project("p", options);
        filter.date_range("p", options);

        let sql = format!(
            "SELECT {PROMPT_COLUMNS}, NULL AS score FROM user_prompts p {} ORDER BY {} LIMIT ?",
            filter.where_clause(),
            date_order("p", options.order_by),
        );

        let rows = {
            let conn = self.db.lock();
            query_rows(&conn, &sql, None, &filter, ids.len(), row_to_prompt)?
        };
        Ok(match options.order_by {
            OrderBy::Relevance => in_id_order(ids, rows, |r| r.id),
            _ => rows,
        })
    }

    /// Most recent observations of a project visible under `visibility`.
    pub fn recent_observations(
        &self,
        project: &str,
        visibility: &CommitVisibility,
        limit: usize,
    ) -> StorageResult<Vec<ObservationRecord>> {
        let mut filter = SqlFilter::default();
        filter.push("o.project = ?", vec![boxed(project.to_string())]);
        filter.commit_visibility(visibility);

        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS}, NULL AS score FROM observations o {} ORDER BY {} LIMIT ?",
            filter.where_clause(),
            date_order("o", OrderBy::DateDesc),
        );

        let conn = self.db.lock();
        query_rows(&conn, &sql, None, &filter, limit, row_to_observation)
    }

    pub fn recent_summaries(
        &self,
        project: &str,
        limit: usize,
    ) -> StorageResult<Vec<SessionSummaryRecord>> {
        let options = SearchOptions {
            project: Some(project.to_string()),
            order_by: OrderBy::DateDesc,
            ..Default::default()
        };
        self.list_summaries(&options, limit)
    }

    /// Distinct commits that the project's observations were recorded at.
    pub fn unique_commit_shas_for_project(&self, project: &str) -> StorageResult<Vec<String>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            r#"SELECT DISTINCT commit_sha FROM observations
               WHERE project = ?1 AND commit_sha IS NOT NULL
               ORDER BY commit_sha"#,
        )?;
        let shas = stmt
            .query_map(params![project], |row| row.get(0))?
            .filter_map(log_row_error)
            .collect();
        Ok(shas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::DateRange;

    fn store() -> ObservationStore {
        ObservationStore::new(Database::open_in_memory().unwrap())
    }

    fn observation(title: &str, narrative: &str) -> NewObservation {
        NewObservation {
            session_db_id: 1,
            content_session_id: "content-1".to_string(),
            project: "demo".to_string(),
            obs_type: ObservationType::Discovery,
            title: Some(title.to_string()),
            narrative: Some(narrative.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_title_matches_outrank_narrative_matches() {
        let store = store();
        let in_narrative = store
            .insert_observation_at(
                &observation("Session cleanup", "the token cache expires early"),
                1,
            )
            .unwrap();
        let in_title = store
            .insert_observation_at(&observation("Token cache", "cleanup of stale entries"), 2)
            .unwrap();

        let found = store
            .search_observations("\"token\" \"cache\"", &SearchOptions::default(), 10)
            .unwrap();
        let ids: Vec<i64> = found.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![in_title, in_narrative]);
        assert!(found.iter().all(|o| o.score.is_some()));
    }

    #[test]
    fn test_list_fields_round_trip_through_json_columns() {
        let store = store();
        let mut obs = observation("Parser", "rewrote the tokenizer");
        obs.obs_type = ObservationType::Refactor;
        obs.facts = vec!["tokenizer is now streaming".to_string()];
        obs.concepts = vec!["parsing".to_string()];
        obs.files_modified = vec!["src/lexer.rs".to_string()];
        let id = store.insert_observation_at(&obs, 5).unwrap();

        let rows = store
            .observations_by_ids(&[id], &SearchOptions::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].obs_type, ObservationType::Refactor);
        assert_eq!(rows[0].facts, obs.facts);
        assert_eq!(rows[0].files_modified, obs.files_modified);
        assert_eq!(rows[0].created_at_epoch, 5);
        assert_eq!(rows[0].score, None);
    }

    #[test]
    fn test_filters_apply_to_listing() {
        let store = store();
        let mut a = observation("A", "first");
        a.concepts = vec!["auth".to_string()];
        a.files_read = vec!["src/auth_%mod.rs".to_string()];
        let a = store.insert_observation_at(&a, 100).unwrap();

        let mut b = observation("B", "second");
        b.obs_type = ObservationType::Bugfix;
        b.concepts = vec!["storage".to_string()];
        let b = store.insert_observation_at(&b, 200).unwrap();

        let mut other = observation("C", "third");
        other.project = "elsewhere".to_string();
        store.insert_observation_at(&other, 300).unwrap();

        let by_project = SearchOptions {
            project: Some("demo".to_string()),
            ..Default::default()
        };
        let ids: Vec<i64> = store
            .list_observations(&by_project, 10)
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![b, a]);

        let by_concept = SearchOptions {
            concepts: vec!["auth".to_string()],
            ..Default::default()
        };
        assert_eq!(store.list_observations(&by_concept, 10).unwrap()[0].id, a);

        let by_file = SearchOptions {
            files: vec!["auth_%mod".to_string()],
            ..Default::default()
        };
        let found = store.list_observations(&by_file, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, a);

        let by_type = SearchOptions {
            obs_types: vec![ObservationType::Bugfix],
            ..Default::default()
        };
        assert_eq!(store.list_observations(&by_type, 10).unwrap()[0].id, b);

        let by_date = SearchOptions {
            date_range: Some(DateRange {
                start: Some(150),
                end: Some(250),
            }),
            ..Default::default()
        };
        let found = store.list_observations(&by_date, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b);
    }

    #[test]
    fn test_commit_visibility() {
        let store = store();
        let unversioned = store
            .insert_observation_at(&observation("Notes", "no repo"), 1)
            .unwrap();
        let mut on_main = observation("Main", "on main");
        on_main.commit_sha = Some("abc123".to_string());
        let on_main = store.insert_observation_at(&on_main, 2).unwrap();
        let mut on_branch = observation("Branch", "on feature");
        on_branch.commit_sha = Some("def456".to_string());
        let on_branch = store.insert_observation_at(&on_branch, 3).unwrap();

        let ids = |visibility: CommitVisibility| -> Vec<i64> {
            let mut ids: Vec<i64> = store
                .recent_observations("demo", &visibility, 10)
                .unwrap()
                .iter()
                .map(|o| o.id)
                .collect();
            ids.sort();
            ids
        };

        assert_eq!(ids(CommitVisibility::All), vec![unversioned, on_main, on_branch]);
        assert_eq!(ids(CommitVisibility::UnversionedOnly), vec![unversioned]);
        assert_eq!(
            ids(CommitVisibility::Visible(vec!["abc123".to_string()])),
            vec![unversioned, on_main]
        );

        assert_eq!(
            store.unique_commit_shas_for_project("demo").unwrap(),
            vec!["abc123".to_string(), "def456".to_string()]
        );
    }

    #[test]
    fn test_hydration_preserves_rank_order() {
        let store = store();
        let first = store.insert_observation_at(&observation("One", "x"), 1).unwrap();
        let second = store.insert_observation_at(&observation("Two", "y"), 2).unwrap();
        let third = store.insert_observation_at(&observation("Three", "z"), 3).unwrap();

        let ranked = [second, 9999, third, first];
        let ids: Vec<i64> = store
            .observations_by_ids(&ranked, &SearchOptions::default())
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![second, third, first]);

        let by_date = SearchOptions {
            order_by: OrderBy::DateAsc,
            ..Default::default()
        };
        let ids: Vec<i64> = store
            .observations_by_ids(&ranked, &by_date)
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![first, second, third]);
    }

    #[test]
    fn test_summaries_and_prompts_are_searchable() {
        let store = store();
        store
            .insert_summary_at(
                &NewSessionSummary {
                    session_db_id: 1,
                    content_session_id: "content-1".to_string(),
                    project: "demo".to_string(),
                    request: Some("Migrate the billing service".to_string()),
                    learned: Some("webhooks retry on 500".to_string()),
                    ..Default::default()
                },
                10,
            )
            .unwrap();
        store
            .insert_user_prompt_at(
                &NewUserPrompt {
                    content_session_id: "content-1".to_string(),
                    project: "demo".to_string(),
                    prompt_number: 1,
                    prompt_text: "why does billing retry webhooks".to_string(),
                },
                11,
            )
            .unwrap();

        let options = SearchOptions::default();
        assert_eq!(
            store
                .search_summaries("\"billing\"", &options, 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            store
                .search_prompts("\"webhooks\"", &options, 10)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.recent_summaries("demo", 5).unwrap().len(), 1);
        assert!(store.recent_summaries("other", 5).unwrap().is_empty());
    }
}

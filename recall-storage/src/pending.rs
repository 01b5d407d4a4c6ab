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

//! Durable pending message queue.
//!
//! Rows are claimed one at a time per session, oldest first. Only the
//! session's own agent task claims; the watchdog and the queue routes reset,
//! retry and delete.

use crate::database::Database;
use crate::error::StorageResult;
use recall_core::{
    now_epoch_ms, FailOutcome, MessageStatus, MessageType, NewPendingMessage, PendingMessage,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

/// Failures tolerated before a row becomes terminally `failed`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How long `processed` rows are kept before cleanup.
pub const DEFAULT_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

const MESSAGE_COLUMNS: &str = "m.id, m.session_db_id, m.content_session_id, m.message_type, \
     m.tool_name, m.tool_input, m.tool_response, m.cwd, m.last_assistant_message, \
     m.prompt_number, m.status, m.retry_count, m.created_at_epoch, \
     m.started_processing_at_epoch, m.completed_at_epoch, m.failed_at_epoch";

fn parse_enum<T: std::str::FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<PendingMessage> {
    let message_type: MessageType = parse_enum(row, 3)?;
    let status: MessageStatus = parse_enum(row, 10)?;
    Ok(PendingMessage {
        id: row.get(0)?,
        session_db_id: row.get(1)?,
        content_session_id: row.get(2)?,
        message_type,
        tool_name: row.get(4)?,
        tool_input: row.get(5)?,
        tool_response: row.get(6)?,
        cwd: row.get(7)?,
        last_assistant_message: row.get(8)?,
        prompt_number: row.get(9)?,
        status,
        retry_count: row.get(11)?,
        created_at_epoch: row.get(12)?,
        started_processing_at_epoch: row.get(13)?,
        completed_at_epoch: row.get(14)?,
        failed_at_epoch: row.get(15)?,
        project: None,
    })
}

fn row_to_message_with_project(row: &Row<'_>) -> rusqlite::Result<PendingMessage> {
    let mut message = row_to_message(row)?;
    message.project = row.get(16)?;
    Ok(message)
}

fn log_row_error<T>(result: rusqlite::Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "Skipping unreadable queue row");
            None
        }
    }
}

fn to_json_text(value: &Option<serde_json::Value>) -> StorageResult<Option<String>> {
    Ok(value.as_ref().map(serde_json::to_string).transpose()?)
}

/// Queue operations over the `pending_messages` table.
#[derive(Debug, Clone)]
pub struct PendingStore {
    db: Database,
    max_retries: u32,
}

impl PendingStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Append a `pending` row and return its id.
    pub fn enqueue(&self, message: &NewPendingMessage) -> StorageResult<i64> {
        self.enqueue_at(message, now_epoch_ms())
    }

    pub fn enqueue_at(&self, message: &NewPendingMessage, now_ms: i64) -> StorageResult<i64> {
        let tool_input = to_json_text(&message.tool_input)?;
        let tool_response = to_json_text(&message.tool_response)?;

        let conn = self.db.lock();
        conn.execute(
            r#"INSERT INTO pending_messages
               (session_db_id, content_session_id, message_type, tool_name, tool_input,
                tool_response, cwd, last_assistant_message, prompt_number, status,
                retry_count, created_at_epoch)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', 0, ?10)"#,
            params![
                message.session_db_id,
                message.content_session_id,
                message.message_type.as_str(),
                message.tool_name,
                tool_input,
                tool_response,
                message.cwd,
                message.last_assistant_message,
                message.prompt_number,
                now_ms,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(
            message_id = id,
            session_db_id = message.session_db_id,
            message_type = %message.message_type,
            "Enqueued message"
        );
        Ok(id)
    }

    pub fn get(&self, id: i64) -> StorageResult<Option<PendingMessage>> {
        let conn = self.db.lock();
        Ok(fetch_message(&conn, id)?)
    }

    /// Move the session's oldest `pending` row to `processing` and return it.
    pub fn claim_next(&self, session_db_id: i64) -> StorageResult<Option<PendingMessage>> {
        self.claim_next_at(session_db_id, now_epoch_ms())
    }

    pub fn claim_next_at(
        &self,
        session_db_id: i64,
        now_ms: i64,
    ) -> StorageResult<Option<PendingMessage>> {
        self.db.with_transaction(|tx| {
            let next: Option<i64> = tx
                .query_row(
                    r#"SELECT id FROM pending_messages
                       WHERE session_db_id = ?1 AND status = 'pending'
                       ORDER BY id ASC LIMIT 1"#,
                    params![session_db_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = next else {
                return Ok(None);
            };

            tx.execute(
                r#"UPDATE pending_messages
                   SET status = 'processing', started_processing_at_epoch = ?1
                   WHERE id = ?2"#,
                params![now_ms, id],
            )?;

            Ok(fetch_message(tx, id)?)
        })
    }

    /// Mark a `processing` row as `processed`.
    pub fn complete(&self, id: i64) -> StorageResult<bool> {
        self.complete_at(id, now_epoch_ms())
    }

    pub fn complete_at(&self, id: i64, now_ms: i64) -> StorageResult<bool> {
        let conn = self.db.lock();
        let updated = conn.execute(
            r#"UPDATE pending_messages
               SET status = 'processed', completed_at_epoch = ?1
               WHERE id = ?2 AND status = 'processing'"#,
            params![now_ms, id],
        )?;
        Ok(updated > 0)
    }

    /// Record a failed attempt. The row returns to `pending` until the retry
    /// count exceeds the limit, then becomes terminally `failed`.
    pub fn fail(&self, id: i64) -> StorageResult<FailOutcome> {
        self.fail_at(id, now_epoch_ms())
    }

    pub fn fail_at(&self, id: i64, now_ms: i64) -> StorageResult<FailOutcome> {
        let max_retries = self.max_retries;
        self.db.with_transaction(|tx| {
            let current: Option<u32> = tx
                .query_row(
                    "SELECT retry_count FROM pending_messages WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(current) = current else {
                return Ok(FailOutcome::NotFound);
            };

            let retry_count = current + 1;
            if retry_count > max_retries {
                tx.execute(
                    r#"UPDATE pending_messages
                       SET status = 'failed', retry_count = ?1,
                           failed_at_epoch = ?2, completed_at_epoch = ?2
                       WHERE id = ?3"#,
                    params![retry_count, now_ms, id],
                )?;
                Ok(FailOutcome::Exhausted { retry_count })
            } else {
                tx.execute(
                    r#"UPDATE pending_messages
                       SET status = 'pending', retry_count = ?1,
                           started_processing_at_epoch = NULL
                       WHERE id = ?2"#,
                    params![retry_count, id],
                )?;
                Ok(FailOutcome::Requeued { retry_count })
            }
        })
    }

    /// Return a `processing` or `failed` row to `pending` with a fresh retry
    /// budget. `false` when there is nothing to retry.
    pub fn retry_message(&self, id: i64) -> StorageResult<bool> {
        let conn = self.db.lock();
        let updated = conn.execute(
            r#"UPDATE pending_messages
               SET status = 'pending', retry_count = 0,
                   started_processing_at_epoch = NULL,
                   completed_at_epoch = NULL, failed_at_epoch = NULL
               WHERE id = ?1 AND status IN ('processing', 'failed')"#,
            params![id],
        )?;
        Ok(updated > 0)
    }

    /// Delete the row regardless of state.
    pub fn abort_message(&self, id: i64) -> StorageResult<bool> {
        let conn = self.db.lock();
        let deleted = conn.execute("DELETE FROM pending_messages WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Reset `processing` rows older than `threshold_ms` to `pending`.
    /// A zero threshold resets every `processing` row.
    pub fn reset_stuck_messages(&self, threshold_ms: i64) -> StorageResult<usize> {
        self.reset_stuck_messages_at(threshold_ms, now_epoch_ms())
    }

    pub fn reset_stuck_messages_at(&self, threshold_ms: i64, now_ms: i64) -> StorageResult<usize> {
        let conn = self.db.lock();
        let reset = if threshold_ms == 0 {
            conn.execute(
                r#"UPDATE pending_messages
                   SET status = 'pending', started_processing_at_epoch = NULL
                   WHERE status = 'processing'"#,
                [],
            )?
        } else {
            conn.execute(
                r#"UPDATE pending_messages
                   SET status = 'pending', started_processing_at_epoch = NULL
                   WHERE status = 'processing'
                     AND started_processing_at_epoch IS NOT NULL
                     AND ?1 - started_processing_at_epoch > ?2"#,
                params![now_ms, threshold_ms],
            )?
        };
        Ok(reset)
    }

    /// Operator bulk reset of stuck rows.
    pub fn retry_all_stuck(&self, threshold_ms: i64) -> StorageResult<usize> {
        self.reset_stuck_messages(threshold_ms)
    }

    /// Delete `processed` rows completed more than `retention_ms` ago.
    pub fn cleanup_processed(&self, retention_ms: i64) -> StorageResult<usize> {
        self.cleanup_processed_at(retention_ms, now_epoch_ms())
    }

    pub fn cleanup_processed_at(&self, retention_ms: i64, now_ms: i64) -> StorageResult<usize> {
        let conn = self.db.lock();
        let deleted = conn.execute(
            r#"DELETE FROM pending_messages
               WHERE status = 'processed' AND completed_at_epoch < ?1"#,
            params![now_ms - retention_ms],
        )?;
        Ok(deleted)
    }

    /// Unfinished rows with their session's project, failed first, then
    /// processing, then pending; oldest first within each group.
    pub fn queue_messages(&self) -> StorageResult<Vec<PendingMessage>> {
        let conn = self.db.lock();
        let sql = format!(
            r#"SELECT {MESSAGE_COLUMNS}, s.project
               FROM pending_messages m
               LEFT JOIN sessions s ON s.id = m.session_db_id
               WHERE m.status IN ('pending', 'processing', 'failed')
               ORDER BY CASE m.status
                            WHEN 'failed' THEN 0
                            WHEN 'processing' THEN 1
                            ELSE 2
                        END,
                        m.created_at_epoch ASC, m.id ASC"#
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map([], row_to_message_with_project)?
            .filter_map(log_row_error)
            .collect();
        Ok(messages)
    }

    /// Rows processed within the last `within_minutes`, newest first.
    pub fn recently_processed(
        &self,
        limit: usize,
        within_minutes: i64,
    ) -> StorageResult<Vec<PendingMessage>> {
        self.recently_processed_at(limit, within_minutes, now_epoch_ms())
    }

    pub fn recently_processed_at(
        &self,
        limit: usize,
        within_minutes: i64,
        now_ms: i64,
    ) -> StorageResult<Vec<PendingMessage>> {
        let conn = self.db.lock();
        let sql = format!(
            r#"SELECT {MESSAGE_COLUMNS}, s.project
               FROM pending_messages m
               LEFT JOIN sessions s ON s.id = m.session_db_id
               WHERE m.status = 'processed' AND m.completed_at_epoch >= ?1
               ORDER BY m.completed_at_epoch DESC, m.id DESC
               LIMIT ?2"#
        );
        let mut stmt = conn.prepare(&sql)?;
        let since = now_ms - within_minutes * 60 * 1000;
        let messages = stmt
            .query_map(params![since, limit as i64], row_to_message_with_project)?
            .filter_map(log_row_error)
            .collect();
        Ok(messages)
    }

    pub fn stuck_count(&self, threshold_ms: i64) -> StorageResult<usize> {
        self.stuck_count_at(threshold_ms, now_epoch_ms())
    }

    pub fn stuck_count_at(&self, threshold_ms: i64, now_ms: i64) -> StorageResult<usize> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row(
            r#"SELECT COUNT(*) FROM pending_messages
               WHERE status = 'processing'
                 AND started_processing_at_epoch IS NOT NULL
                 AND ?1 - started_processing_at_epoch > ?2"#,
            params![now_ms, threshold_ms],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// `pending` plus `processing` rows of one session.
    pub fn pending_count(&self, session_db_id: i64) -> StorageResult<usize> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row(
            r#"SELECT COUNT(*) FROM pending_messages
               WHERE session_db_id = ?1 AND status IN ('pending', 'processing')"#,
            params![session_db_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Rows of one session that `claim_next` could hand out now.
    pub fn claimable_count(&self, session_db_id: i64) -> StorageResult<usize> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row(
            r#"SELECT COUNT(*) FROM pending_messages
               WHERE session_db_id = ?1 AND status = 'pending'"#,
            params![session_db_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Sessions with unfinished work, ascending.
    pub fn sessions_with_pending_messages(&self) -> StorageResult<Vec<i64>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            r#"SELECT DISTINCT session_db_id FROM pending_messages
               WHERE status IN ('pending', 'processing')
               ORDER BY session_db_id ASC"#,
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(log_row_error)
            .collect();
        Ok(ids)
    }

    /// Reset one session's `processing` rows, regardless of age.
    pub fn reset_processing_to_pending(&self, session_db_id: i64) -> StorageResult<usize> {
        let conn = self.db.lock();
        let reset = conn.execute(
            r#"UPDATE pending_messages
               SET status = 'pending', started_processing_at_epoch = NULL
               WHERE session_db_id = ?1 AND status = 'processing'"#,
            params![session_db_id],
        )?;
        Ok(reset)
    }

    /// `pending` plus `processing` rows across all sessions.
    pub fn total_active_work(&self) -> StorageResult<usize> {
        let conn = self.db.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_messages WHERE status IN ('pending', 'processing')",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn clear_failed(&self) -> StorageResult<usize> {
        let conn = self.db.lock();
        Ok(conn.execute("DELETE FROM pending_messages WHERE status = 'failed'", [])?)
    }

    /// Delete every unfinished row. Processed rows are kept for retention.
    pub fn clear_all(&self) -> StorageResult<usize> {
        let conn = self.db.lock();
        Ok(conn.execute(
            "DELETE FROM pending_messages WHERE status IN ('pending', 'processing', 'failed')",
            [],
        )?)
    }

    /// `(session_db_id, content_session_id)` of the row's owner.
    pub fn session_info_for_message(&self, id: i64) -> StorageResult<Option<(i64, String)>> {
        let conn = self.db.lock();
        Ok(conn
            .query_row(
                "SELECT session_db_id, content_session_id FROM pending_messages WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    /// Content session id recorded on any queue row of the session.
    pub fn content_session_id_for_session(
        &self,
        session_db_id: i64,
    ) -> StorageResult<Option<String>> {
        let conn = self.db.lock();
        Ok(conn
            .query_row(
                r#"SELECT content_session_id FROM pending_messages
                   WHERE session_db_id = ?1 ORDER BY id ASC LIMIT 1"#,
                params![session_db_id],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn fetch_message(conn: &Connection, id: i64) -> rusqlite::Result<Option<PendingMessage>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM pending_messages m WHERE m.id = ?1");
    conn.query_row(&sql, params![id], row_to_message).optional()
}

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

//! Session rows.

use crate::database::Database;
use crate::error::{StorageError, StorageResult};
use recall_core::{now_epoch_ms, SessionRecord};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SESSION_COLUMNS: &str =
    "id, content_session_id, project, user_prompt, started_at_epoch, status, prompt_counter";

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        content_session_id: row.get(1)?,
        project: row.get(2)?,
        user_prompt: row.get(3)?,
        started_at_epoch: row.get(4)?,
        status: row.get(5)?,
        prompt_counter: row.get(6)?,
    })
}

fn fetch_by_content_id(
    conn: &Connection,
    content_session_id: &str,
) -> rusqlite::Result<Option<SessionRecord>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE content_session_id = ?1"),
        params![content_session_id],
        row_to_session,
    )
    .optional()
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the session row for `content_session_id`, or return the
    /// existing one. An existing row with an empty project adopts `project`.
    pub fn init_session(
        &self,
        content_session_id: &str,
        project: &str,
        user_prompt: Option<&str>,
    ) -> StorageResult<SessionRecord> {
        self.db.with_transaction(|tx| {
            tx.execute(
                r#"INSERT INTO sessions (content_session_id, project, user_prompt, started_at_epoch)
                   VALUES (?1, ?2, ?3, ?4)
                   ON CONFLICT(content_session_id) DO UPDATE SET
                       project = CASE WHEN sessions.project = '' THEN excluded.project
                                      ELSE sessions.project END,
                       user_prompt = COALESCE(sessions.user_prompt, excluded.user_prompt)"#,
                params![content_session_id, project, user_prompt, now_epoch_ms()],
            )?;

            fetch_by_content_id(tx, content_session_id)?.ok_or_else(|| {
                StorageError::NotFound(format!("session {content_session_id}"))
            })
        })
    }

    pub fn get(&self, id: i64) -> StorageResult<Option<SessionRecord>> {
        let conn = self.db.lock();
        Ok(conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                row_to_session,
            )
            .optional()?)
    }

    pub fn get_by_content_id(&self, content_session_id: &str) -> StorageResult<Option<SessionRecord>> {
        let conn = self.db.lock();
        Ok(fetch_by_content_id(&conn, content_session_id)?)
    }

    /// Bump the prompt counter and return the new value.
    pub fn next_prompt_number(&self, id: i64) -> StorageResult<i64> {
        let conn = self.db.lock();
        conn.query_row(
            r#"UPDATE sessions SET prompt_counter = prompt_counter + 1
               WHERE id = ?1 RETURNING prompt_counter"#,
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("session {id}")))
    }

    pub fn set_status(&self, id: i64, status: &str) -> StorageResult<bool> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE sessions SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_init_session_is_idempotent() {
        let store = store();
        let first = store
            .init_session("content-a", "demo", Some("fix the login bug"))
            .unwrap();
        let again = store.init_session("content-a", "other", None).unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.project, "demo");
        assert_eq!(again.user_prompt.as_deref(), Some("fix the login bug"));
        assert_eq!(again.status, "active");
    }

    #[test]
    fn test_empty_project_is_adopted() {
        let store = store();
        store.init_session("content-b", "", None).unwrap();
        let session = store.init_session("content-b", "demo", None).unwrap();
        assert_eq!(session.project, "demo");
    }

    #[test]
    fn test_prompt_numbers_increase() {
        let store = store();
        let session = store.init_session("content-c", "demo", None).unwrap();
        assert_eq!(store.next_prompt_number(session.id).unwrap(), 1);
        assert_eq!(store.next_prompt_number(session.id).unwrap(), 2);
        assert!(matches!(
            store.next_prompt_number(session.id + 100),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_lookup_by_id_and_content_id() {
        let store = store();
        let session = store.init_session("content-d", "demo", None).unwrap();
        assert_eq!(store.get(session.id).unwrap(), Some(session.clone()));
        assert_eq!(
            store.get_by_content_id("content-d").unwrap().map(|s| s.id),
            Some(session.id)
        );
        assert!(store.set_status(session.id, "completed").unwrap());
        assert_eq!(store.get(session.id).unwrap().unwrap().status, "completed");
    }
}

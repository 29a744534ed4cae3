//! libSQL backend, the async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are written
//! as RFC 3339 text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::nudge::model::{NudgeRecord, NudgeStatus};
use crate::progress::model::{Question, QuestionProgress, UserAccount};
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL store backend.
///
/// Holds a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    // Try SQLite datetime() output
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Map a libsql Row to a UserAccount.
///
/// Column order matches USER_COLUMNS:
/// 0:id, 1:name, 2:is_active, 3:current_question, 4:last_activity,
/// 5:created_at, 6:updated_at
fn row_to_user(row: &libsql::Row) -> Result<UserAccount, libsql::Error> {
    let last_activity: String = row.get(4)?;
    let created: String = row.get(5)?;
    let updated: String = row.get(6)?;

    Ok(UserAccount {
        id: row.get(0)?,
        name: row.get(1)?,
        is_active: row.get::<i64>(2)? != 0,
        current_question: row.get(3)?,
        last_activity: parse_datetime(&last_activity),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

/// Map a libsql Row to a Question.
///
/// Column order matches QUESTION_COLUMNS:
/// 0:question_id, 1:text, 2:kind, 3:options, 4:position, 5:is_active
fn row_to_question(row: &libsql::Row) -> Result<Question, libsql::Error> {
    let kind_str: String = row.get(2)?;
    let options_str: String = row.get(3)?;

    Ok(Question {
        question_id: row.get(0)?,
        text: row.get(1)?,
        kind: kind_str.parse().unwrap_or_default(),
        options: serde_json::from_str(&options_str).unwrap_or_default(),
        position: row.get(4)?,
        is_active: row.get::<i64>(5)? != 0,
    })
}

/// Map a libsql Row to a QuestionProgress.
///
/// Column order matches PROGRESS_COLUMNS:
/// 0:question_id, 1:answered, 2:answer, 3:answered_at, 4:nudge_count,
/// 5:last_nudge_sent
fn row_to_progress(row: &libsql::Row) -> Result<QuestionProgress, libsql::Error> {
    let answered_at: Option<String> = row.get(3).ok();
    let last_nudge: Option<String> = row.get(5).ok();

    Ok(QuestionProgress {
        question_id: row.get(0)?,
        answered: row.get::<i64>(1)? != 0,
        answer: row.get(2).ok(),
        answered_at: parse_optional_datetime(&answered_at),
        nudge_count: row.get::<i64>(4)? as u32,
        last_nudge_sent: parse_optional_datetime(&last_nudge),
    })
}

/// Map a libsql Row to a NudgeRecord.
///
/// Column order matches NUDGE_COLUMNS:
/// 0:user_id, 1:question_id, 2:nudge_count, 3:status, 4:scheduled_for,
/// 5:sent_at, 6:delay_minutes, 7:message, 8:external_handle, 9:created_at,
/// 10:updated_at
fn row_to_nudge(row: &libsql::Row) -> Result<NudgeRecord, StoreError> {
    let col = |e: libsql::Error| StoreError::Query(format!("nudge row parse: {e}"));

    let status_str: String = row.get(3).map_err(col)?;
    let status: NudgeStatus = status_str.parse().map_err(StoreError::Query)?;
    let scheduled_str: String = row.get(4).map_err(col)?;
    let sent_str: Option<String> = row.get(5).ok();
    let created_str: String = row.get(9).map_err(col)?;
    let updated_str: String = row.get(10).map_err(col)?;

    Ok(NudgeRecord {
        user_id: row.get(0).map_err(col)?,
        question_id: row.get(1).map_err(col)?,
        nudge_count: row.get::<i64>(2).map_err(col)? as u32,
        status,
        scheduled_for: parse_datetime(&scheduled_str),
        sent_at: parse_optional_datetime(&sent_str),
        delay_minutes: row.get::<i64>(6).map_err(col)? as u32,
        message: row.get(7).map_err(col)?,
        external_handle: row.get(8).map_err(col)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Nudge ledger identity, used in transition errors.
fn nudge_id(user_id: &str, question_id: i64, nudge_count: u32) -> String {
    format!("{user_id}/q{question_id}#{nudge_count}")
}

// ── Trait implementation ────────────────────────────────────────────

const USER_COLUMNS: &str = "id, name, is_active, current_question, last_activity, created_at, updated_at";

const QUESTION_COLUMNS: &str = "question_id, text, kind, options, position, is_active";

const PROGRESS_COLUMNS: &str =
    "p.question_id, p.answered, p.answer, p.answered_at, p.nudge_count, p.last_nudge_sent";

const NUDGE_COLUMNS: &str = "user_id, question_id, nudge_count, status, scheduled_for, sent_at, delay_minutes, message, external_handle, created_at, updated_at";

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn create_user(&self, name: &str) -> Result<UserAccount, StoreError> {
        let user = UserAccount::new(name);
        let conn = self.conn();

        conn.execute(
            "INSERT INTO users (id, name, is_active, current_question, last_activity, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id.clone(),
                user.name.clone(),
                user.is_active as i64,
                user.current_question,
                user.last_activity.to_rfc3339(),
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("create_user: {e}")))?;

        // One progress row per active question, so the user's sequence
        // position is queryable from the start.
        let questions = self.list_questions().await?;
        for question in &questions {
            conn.execute(
                "INSERT INTO question_progress (user_id, question_id) VALUES (?1, ?2)",
                params![user.id.clone(), question.question_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_user progress init: {e}")))?;
        }

        debug!(user_id = %user.id, questions = questions.len(), "User created");
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let user = row_to_user(&row)
                    .map_err(|e| StoreError::Query(format!("get_user row parse: {e}")))?;
                Ok(Some(user))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_user: {e}"))),
        }
    }

    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<(), StoreError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let count = conn
            .execute(
                "UPDATE users SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![user_id, active as i64, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("set_user_active: {e}")))?;

        if count == 0 {
            return Err(StoreError::NotFound {
                entity: "user".to_string(),
                id: user_id.to_string(),
            });
        }

        debug!(user_id, active, "User active flag updated");
        Ok(())
    }

    // ── Questions ───────────────────────────────────────────────────

    async fn seed_questions(&self, questions: &[Question]) -> Result<usize, StoreError> {
        let conn = self.conn();
        let mut inserted = 0usize;

        for question in questions {
            let options = serde_json::to_string(&question.options)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let count = conn
                .execute(
                    "INSERT OR IGNORE INTO questions (question_id, text, kind, options, position, is_active) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        question.question_id,
                        question.text.clone(),
                        question.kind.to_string(),
                        options,
                        question.position,
                        question.is_active as i64,
                    ],
                )
                .await
                .map_err(|e| StoreError::Query(format!("seed_questions: {e}")))?;
            inserted += count as usize;
        }

        if inserted > 0 {
            info!(inserted, "Seeded questions");
        }
        Ok(inserted)
    }

    async fn list_questions(&self) -> Result<Vec<Question>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {QUESTION_COLUMNS} FROM questions WHERE is_active = 1 ORDER BY position ASC"
                ),
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_questions: {e}")))?;

        let mut questions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_question(&row) {
                Ok(question) => questions.push(question),
                Err(e) => {
                    tracing::warn!("Skipping question row: {e}");
                }
            }
        }
        Ok(questions)
    }

    async fn get_question(&self, question_id: i64) -> Result<Option<Question>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {QUESTION_COLUMNS} FROM questions WHERE question_id = ?1 AND is_active = 1"
                ),
                params![question_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_question: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let question = row_to_question(&row)
                    .map_err(|e| StoreError::Query(format!("get_question row parse: {e}")))?;
                Ok(Some(question))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_question: {e}"))),
        }
    }

    // ── Question progress ───────────────────────────────────────────

    async fn next_unanswered_question(&self, user_id: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT p.question_id FROM question_progress p
                 JOIN questions q ON q.question_id = p.question_id
                 WHERE p.user_id = ?1 AND p.answered = 0 AND q.is_active = 1
                 ORDER BY q.position ASC LIMIT 1",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("next_unanswered_question: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let question_id: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("next_unanswered_question: {e}")))?;
                Ok(Some(question_id))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("next_unanswered_question: {e}"))),
        }
    }

    async fn question_progress(
        &self,
        user_id: &str,
        question_id: i64,
    ) -> Result<Option<QuestionProgress>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM question_progress p WHERE p.user_id = ?1 AND p.question_id = ?2"
                ),
                params![user_id, question_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("question_progress: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let progress = row_to_progress(&row)
                    .map_err(|e| StoreError::Query(format!("question_progress row parse: {e}")))?;
                Ok(Some(progress))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("question_progress: {e}"))),
        }
    }

    async fn user_progress(&self, user_id: &str) -> Result<Vec<QuestionProgress>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM question_progress p
                     JOIN questions q ON q.question_id = p.question_id
                     WHERE p.user_id = ?1 ORDER BY q.position ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("user_progress: {e}")))?;

        let mut progress = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_progress(&row) {
                Ok(p) => progress.push(p),
                Err(e) => {
                    tracing::warn!("Skipping progress row: {e}");
                }
            }
        }
        Ok(progress)
    }

    async fn increment_nudge_count(
        &self,
        user_id: &str,
        question_id: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let count = conn
            .execute(
                "UPDATE question_progress SET nudge_count = nudge_count + 1, last_nudge_sent = ?3 WHERE user_id = ?1 AND question_id = ?2",
                params![user_id, question_id, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("increment_nudge_count: {e}")))?;

        if count == 0 {
            return Err(StoreError::NotFound {
                entity: "question_progress".to_string(),
                id: format!("{user_id}/q{question_id}"),
            });
        }

        debug!(user_id, question_id, "Nudge count incremented");
        Ok(())
    }

    async fn answer_question(
        &self,
        user_id: &str,
        question_id: i64,
        answer: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        // Conditional on answered = 0 so a concurrent duplicate answer loses.
        let count = conn
            .execute(
                "UPDATE question_progress SET answered = 1, answer = ?3, answered_at = ?4
                 WHERE user_id = ?1 AND question_id = ?2 AND answered = 0",
                params![user_id, question_id, answer, now.clone()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("answer_question: {e}")))?;

        if count == 0 {
            return Err(StoreError::InvalidTransition {
                entity: "question_progress",
                id: format!("{user_id}/q{question_id}"),
                expected: "unanswered",
            });
        }

        // Advance the user's cursor and stamp activity.
        conn.execute(
            "UPDATE users SET current_question = ?2, last_activity = ?3, updated_at = ?3 WHERE id = ?1",
            params![user_id, question_id + 1, now],
        )
        .await
        .map_err(|e| StoreError::Query(format!("answer_question user update: {e}")))?;

        debug!(user_id, question_id, "Answer recorded");
        Ok(())
    }

    // ── Nudge ledger ────────────────────────────────────────────────

    async fn create_nudge(&self, record: &NudgeRecord) -> Result<(), StoreError> {
        let conn = self.conn();
        let sent_at: libsql::Value = match record.sent_at {
            Some(dt) => libsql::Value::Text(dt.to_rfc3339()),
            None => libsql::Value::Null,
        };

        conn.execute(
            "INSERT INTO nudges (user_id, question_id, nudge_count, status, scheduled_for, sent_at, delay_minutes, message, external_handle, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.user_id.clone(),
                record.question_id,
                record.nudge_count as i64,
                record.status.to_string(),
                record.scheduled_for.to_rfc3339(),
                sent_at,
                record.delay_minutes as i64,
                record.message.clone(),
                record.external_handle.clone(),
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE constraint failed") {
                StoreError::DuplicateKey {
                    user_id: record.user_id.clone(),
                    question_id: record.question_id,
                    nudge_count: record.nudge_count,
                }
            } else {
                StoreError::Query(format!("create_nudge: {msg}"))
            }
        })?;

        debug!(
            user_id = %record.user_id,
            question_id = record.question_id,
            nudge_count = record.nudge_count,
            "Nudge record appended"
        );
        Ok(())
    }

    async fn find_nudge(
        &self,
        user_id: &str,
        question_id: i64,
        nudge_count: u32,
    ) -> Result<Option<NudgeRecord>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {NUDGE_COLUMNS} FROM nudges WHERE user_id = ?1 AND question_id = ?2 AND nudge_count = ?3"
                ),
                params![user_id, question_id, nudge_count as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("find_nudge: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_nudge(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("find_nudge: {e}"))),
        }
    }

    async fn pending_nudges(
        &self,
        user_id: &str,
        question_id: i64,
    ) -> Result<Vec<NudgeRecord>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {NUDGE_COLUMNS} FROM nudges WHERE user_id = ?1 AND question_id = ?2 AND status = 'scheduled' ORDER BY nudge_count ASC"
                ),
                params![user_id, question_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("pending_nudges: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_nudge(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping nudge row: {e}");
                }
            }
        }
        Ok(records)
    }

    async fn mark_nudge_sent(
        &self,
        user_id: &str,
        question_id: i64,
        nudge_count: u32,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let count = conn
            .execute(
                "UPDATE nudges SET status = 'sent', sent_at = ?4, updated_at = ?4
                 WHERE user_id = ?1 AND question_id = ?2 AND nudge_count = ?3 AND status = 'scheduled'",
                params![user_id, question_id, nudge_count as i64, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_nudge_sent: {e}")))?;

        if count == 0 {
            return Err(StoreError::InvalidTransition {
                entity: "nudge",
                id: nudge_id(user_id, question_id, nudge_count),
                expected: "scheduled",
            });
        }

        debug!(user_id, question_id, nudge_count, "Nudge marked sent");
        Ok(())
    }

    async fn mark_nudge_cancelled(
        &self,
        user_id: &str,
        question_id: i64,
        nudge_count: u32,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let count = conn
            .execute(
                "UPDATE nudges SET status = 'cancelled', updated_at = ?4
                 WHERE user_id = ?1 AND question_id = ?2 AND nudge_count = ?3 AND status = 'scheduled'",
                params![user_id, question_id, nudge_count as i64, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_nudge_cancelled: {e}")))?;

        if count == 0 {
            return Err(StoreError::InvalidTransition {
                entity: "nudge",
                id: nudge_id(user_id, question_id, nudge_count),
                expected: "scheduled",
            });
        }

        debug!(user_id, question_id, nudge_count, "Nudge marked cancelled");
        Ok(())
    }

    async fn nudge_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NudgeRecord>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {NUDGE_COLUMNS} FROM nudges WHERE user_id = ?1 ORDER BY created_at DESC, nudge_count DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| StoreError::Query(format!("nudge_history: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_nudge(&row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping nudge row: {e}");
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> LibSqlStore {
        let store = LibSqlStore::new_memory().await.unwrap();
        let questions = vec![
            Question::text_question(1, "First?", 1),
            Question::text_question(2, "Second?", 2),
            Question::text_question(3, "Third?", 3),
        ];
        store.seed_questions(&questions).await.unwrap();
        store
    }

    fn record(user_id: &str, question_id: i64, nudge_count: u32) -> NudgeRecord {
        NudgeRecord::scheduled(
            user_id,
            question_id,
            nudge_count,
            5,
            Utc::now() + chrono::Duration::minutes(5),
            "keep going",
            format!("job-{question_id}-{nudge_count}"),
        )
    }

    #[tokio::test]
    async fn new_local_creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("nudges.db");
        let store = LibSqlStore::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(store);
    }

    #[tokio::test]
    async fn create_user_initializes_progress() {
        let store = seeded_store().await;
        let user = store.create_user("Alice").await.unwrap();

        let progress = store.user_progress(&user.id).await.unwrap();
        assert_eq!(progress.len(), 3);
        assert!(progress.iter().all(|p| !p.answered && p.nudge_count == 0));

        let next = store.next_unanswered_question(&user.id).await.unwrap();
        assert_eq!(next, Some(1));
    }

    #[tokio::test]
    async fn get_user_roundtrips_fields() {
        let store = seeded_store().await;
        let created = store.create_user("Bob").await.unwrap();

        let fetched = store.get_user(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.name, "Bob");
        assert!(fetched.is_active);
        assert_eq!(fetched.current_question, 0);

        assert!(store.get_user("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn seeding_is_idempotent() {
        let store = seeded_store().await;
        let again = store
            .seed_questions(&[Question::text_question(1, "First?", 1)])
            .await
            .unwrap();
        assert_eq!(again, 0);

        let added = store
            .seed_questions(&[Question::text_question(4, "Fourth?", 4)])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(store.list_questions().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn answering_advances_the_sequence() {
        let store = seeded_store().await;
        let user = store.create_user("Carol").await.unwrap();

        store.answer_question(&user.id, 1, "blue").await.unwrap();

        let next = store.next_unanswered_question(&user.id).await.unwrap();
        assert_eq!(next, Some(2));

        let updated = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(updated.current_question, 2);

        let progress = store.question_progress(&user.id, 1).await.unwrap().unwrap();
        assert!(progress.answered);
        assert_eq!(progress.answer.as_deref(), Some("blue"));
        assert!(progress.answered_at.is_some());
    }

    #[tokio::test]
    async fn double_answer_is_rejected() {
        let store = seeded_store().await;
        let user = store.create_user("Dave").await.unwrap();

        store.answer_question(&user.id, 1, "first").await.unwrap();
        let err = store
            .answer_question(&user.id, 1, "second")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        // Original answer untouched
        let progress = store.question_progress(&user.id, 1).await.unwrap().unwrap();
        assert_eq!(progress.answer.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn all_answered_means_no_next_question() {
        let store = seeded_store().await;
        let user = store.create_user("Erin").await.unwrap();

        for question_id in 1..=3 {
            store
                .answer_question(&user.id, question_id, "done")
                .await
                .unwrap();
        }
        assert_eq!(store.next_unanswered_question(&user.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn increment_tracks_count_and_timestamp() {
        let store = seeded_store().await;
        let user = store.create_user("Frank").await.unwrap();

        store.increment_nudge_count(&user.id, 1).await.unwrap();
        store.increment_nudge_count(&user.id, 1).await.unwrap();

        let progress = store.question_progress(&user.id, 1).await.unwrap().unwrap();
        assert_eq!(progress.nudge_count, 2);
        assert!(progress.last_nudge_sent.is_some());

        let err = store
            .increment_nudge_count("missing", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn duplicate_ledger_identity_is_rejected() {
        let store = seeded_store().await;
        let user = store.create_user("Grace").await.unwrap();

        store.create_nudge(&record(&user.id, 1, 1)).await.unwrap();
        let err = store
            .create_nudge(&record(&user.id, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateKey {
                question_id: 1,
                nudge_count: 1,
                ..
            }
        ));

        // Next ordinal is accepted
        store.create_nudge(&record(&user.id, 1, 2)).await.unwrap();
    }

    #[tokio::test]
    async fn sent_transition_is_conditional_on_scheduled() {
        let store = seeded_store().await;
        let user = store.create_user("Heidi").await.unwrap();
        store.create_nudge(&record(&user.id, 1, 1)).await.unwrap();

        store.mark_nudge_sent(&user.id, 1, 1).await.unwrap();
        let sent = store.find_nudge(&user.id, 1, 1).await.unwrap().unwrap();
        assert_eq!(sent.status, NudgeStatus::Sent);
        assert!(sent.sent_at.is_some());

        // Second send loses the compare-and-set
        let err = store.mark_nudge_sent(&user.id, 1, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        // And a cancel after send is refused too
        let err = store.mark_nudge_cancelled(&user.id, 1, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn pending_excludes_resolved_records() {
        let store = seeded_store().await;
        let user = store.create_user("Ivan").await.unwrap();

        store.create_nudge(&record(&user.id, 1, 1)).await.unwrap();
        store.create_nudge(&record(&user.id, 1, 2)).await.unwrap();
        store.create_nudge(&record(&user.id, 1, 3)).await.unwrap();
        store.mark_nudge_sent(&user.id, 1, 1).await.unwrap();
        store.mark_nudge_cancelled(&user.id, 1, 2).await.unwrap();

        let pending = store.pending_nudges(&user.id, 1).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].nudge_count, 3);
    }

    #[tokio::test]
    async fn history_is_most_recent_first_and_limited() {
        let store = seeded_store().await;
        let user = store.create_user("Judy").await.unwrap();

        for ordinal in 1..=5 {
            store
                .create_nudge(&record(&user.id, 1, ordinal))
                .await
                .unwrap();
        }

        let history = store.nudge_history(&user.id, 3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].nudge_count, 5);
        assert_eq!(history[2].nudge_count, 3);

        // Other users' ledgers are not visible
        let other = store.create_user("Karl").await.unwrap();
        assert!(store.nudge_history(&other.id, 10).await.unwrap().is_empty());
    }
}

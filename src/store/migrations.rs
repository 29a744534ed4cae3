//! Schema migrations for the libSQL backend.
//!
//! Applied versions are tracked in a `_migrations` table so a restart only
//! runs what is new. Migrations are append-only; editing a shipped version
//! is not supported.

use libsql::Connection;

use crate::error::StoreError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered migration list. New versions go at the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                current_question INTEGER NOT NULL DEFAULT 0,
                last_activity TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_active ON users(is_active);

            CREATE TABLE IF NOT EXISTS questions (
                question_id INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'text',
                options TEXT NOT NULL DEFAULT '[]',
                position INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_questions_position ON questions(position);

            CREATE TABLE IF NOT EXISTS question_progress (
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                question_id INTEGER NOT NULL,
                answered INTEGER NOT NULL DEFAULT 0,
                answer TEXT,
                answered_at TEXT,
                nudge_count INTEGER NOT NULL DEFAULT 0,
                last_nudge_sent TEXT,
                PRIMARY KEY (user_id, question_id)
            );
            CREATE INDEX IF NOT EXISTS idx_progress_unanswered
                ON question_progress(user_id, answered);

            CREATE TABLE IF NOT EXISTS nudges (
                user_id TEXT NOT NULL,
                question_id INTEGER NOT NULL,
                nudge_count INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                scheduled_for TEXT NOT NULL,
                sent_at TEXT,
                delay_minutes INTEGER NOT NULL,
                message TEXT NOT NULL,
                external_handle TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, question_id, nudge_count)
            );
            CREATE INDEX IF NOT EXISTS idx_nudges_pending
                ON nudges(user_id, question_id, status);
            CREATE INDEX IF NOT EXISTS idx_nudges_user_created
                ON nudges(user_id, created_at);
        "#,
}];

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("migration table setup: {e}")))?;

    let applied = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        conn.execute_batch(migration.sql).await.map_err(|e| {
            StoreError::Migration(format!(
                "V{} ({}): {e}",
                migration.version, migration.name
            ))
        })?;
        record_version(conn, migration.version, migration.name).await?;
    }

    let version = current_version(conn).await?;
    tracing::info!(version, "Schema is up to date");
    Ok(())
}

/// Highest applied version, 0 for a fresh database.
async fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("version lookup: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get(0)
            .map_err(|e| StoreError::Migration(format!("version parse: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(StoreError::Migration(format!("version lookup: {e}"))),
    }
}

async fn record_version(conn: &Connection, version: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| StoreError::Migration(format!("recording V{version}: {e}")))?;
    Ok(())
}

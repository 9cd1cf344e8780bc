//! Database migration system for Parley Server
//!
//! Migrations are embedded SQL strings, applied in version order and
//! recorded in a `_migrations` table so each runs exactly once.

use super::Database;
use super::DatabaseError;
use tracing::{debug, info, instrument};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number (must be unique and incrementing)
    pub version: i64,
    /// Description of what this migration does
    pub description: String,
    /// SQL to execute for the migration
    pub sql: &'static str,
}

/// Identity and message log schema.
pub mod schema {
    use super::Migration;

    /// Users and their credentials
    pub const V0001_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,                              -- Display name
    username TEXT NOT NULL UNIQUE,          -- Routing key
    password_hash TEXT NOT NULL,            -- Argon2id PHC string
    device_id TEXT,                         -- Client-reported device
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

    /// Append-only message log
    pub const V0002_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id INTEGER NOT NULL,
    receiver_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    FOREIGN KEY (sender_id) REFERENCES users(id),
    FOREIGN KEY (receiver_id) REFERENCES users(id)
);

-- Conversation history lookups, newest first
CREATE INDEX IF NOT EXISTS idx_messages_pair_created
    ON messages(sender_id, receiver_id, created_at DESC);
"#;

    /// Get all migrations in order
    pub fn all() -> Vec<Migration> {
        vec![
            Migration {
                version: 1,
                description: "Users table".to_string(),
                sql: V0001_USERS,
            },
            Migration {
                version: 2,
                description: "Message log".to_string(),
                sql: V0002_MESSAGES,
            },
        ]
    }
}

/// Migration runner for applying migrations to a database
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Create a new migration runner with the given migrations
    pub fn new(migrations: Vec<Migration>) -> Self {
        let mut sorted = migrations;
        sorted.sort_by_key(|m| m.version);
        Self { migrations: sorted }
    }

    /// Create a runner for the Parley schema
    pub fn parley() -> Self {
        Self::new(schema::all())
    }

    /// Apply every migration not yet recorded in `_migrations`.
    ///
    /// Returns the versions applied by this call, in order.
    #[instrument(skip_all, fields(db_name = %db.name()))]
    pub async fn run(&self, db: &Database) -> Result<Vec<i64>, DatabaseError> {
        let guard = db.connection().await?;
        let conn = guard.as_ref();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            (),
        )
        .await
        .map_err(|e| migration_err("create migrations table", e))?;

        let applied = applied_versions(conn).await?;
        let pending: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect();

        if pending.is_empty() {
            debug!(applied = applied.len(), "Schema up to date");
            return Ok(Vec::new());
        }

        let mut newly_applied = Vec::with_capacity(pending.len());
        for migration in pending {
            info!(
                version = migration.version,
                description = %migration.description,
                "Applying migration"
            );
            apply(conn, migration).await?;
            newly_applied.push(migration.version);
        }

        info!(count = newly_applied.len(), "Migrations applied");
        Ok(newly_applied)
    }

    /// Get the current schema version
    #[instrument(skip_all, fields(db_name = %db.name()))]
    pub async fn current_version(&self, db: &Database) -> Result<Option<i64>, DatabaseError> {
        let guard = db.connection().await?;
        let conn = guard.as_ref();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='_migrations'",
                (),
            )
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows
            .next()
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .is_none()
        {
            return Ok(None);
        }

        let mut rows = conn
            .query("SELECT MAX(version) FROM _migrations", ())
            .await
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        match rows.next().await.map_err(|e| {
            DatabaseError::QueryFailed(format!("Failed to read max version: {}", e))
        })? {
            Some(row) => {
                let version: Option<i64> = row.get(0).ok();
                Ok(version)
            }
            None => Ok(None),
        }
    }
}

/// Run one migration and record it in a single transaction.
async fn apply(conn: &libsql::Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let tx = conn
        .transaction()
        .await
        .map_err(|e| migration_err("begin transaction", e))?;

    tx.execute_batch(migration.sql)
        .await
        .map_err(|e| migration_err(&format!("v{}", migration.version), e))?;

    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?, ?)",
        (migration.version, migration.description.as_str()),
    )
    .await
    .map_err(|e| migration_err(&format!("record v{}", migration.version), e))?;

    tx.commit()
        .await
        .map_err(|e| migration_err(&format!("commit v{}", migration.version), e))
}

async fn applied_versions(conn: &libsql::Connection) -> Result<Vec<i64>, DatabaseError> {
    let mut rows = conn
        .query("SELECT version FROM _migrations ORDER BY version", ())
        .await
        .map_err(|e| migration_err("query migrations", e))?;

    let mut applied = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| migration_err("read migration row", e))?
    {
        applied.push(row.get::<i64>(0).map_err(|e| migration_err("read version", e))?);
    }
    Ok(applied)
}

fn migration_err(step: &str, e: libsql::Error) -> DatabaseError {
    DatabaseError::MigrationFailed(format!("{}: {}", step, e))
}

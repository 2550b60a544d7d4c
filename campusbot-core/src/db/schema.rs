//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: portal accounts, chat log, knowledge base
    r#"
    -- ============================================
    -- Portal accounts (one row per user)
    -- ============================================

    CREATE TABLE IF NOT EXISTS portal_accounts (
        user_id            INTEGER PRIMARY KEY,
        username           TEXT,
        password_encrypted TEXT,
        cookies            JSON,
        updated_at         DATETIME NOT NULL
    );

    -- ============================================
    -- Chat
    -- ============================================

    CREATE TABLE IF NOT EXISTS chat_sessions (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id          INTEGER NOT NULL,
        title            TEXT,
        started_at       DATETIME NOT NULL,
        last_activity_at DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_chat_sessions_user ON chat_sessions(user_id, last_activity_at);

    CREATE TABLE IF NOT EXISTS messages (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id  INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
        sender      TEXT NOT NULL CHECK (sender IN ('user', 'bot')),
        text        TEXT NOT NULL,
        created_at  DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);

    -- ============================================
    -- Knowledge base
    -- ============================================

    CREATE TABLE IF NOT EXISTS faqs (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        question    TEXT NOT NULL,
        answer      TEXT NOT NULL,
        created_at  DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS registration_events (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        title       TEXT NOT NULL,
        description TEXT,
        start_at    DATETIME NOT NULL,
        end_at      DATETIME NOT NULL,
        location    TEXT
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

//! Database repository layer
//!
//! [`Database`] owns a single SQLite connection and implements every store
//! trait the pipelines depend on.

use crate::error::{Error, Result};
use crate::store::{CredentialStore, KnowledgeBase, NewRegistrationEvent, SessionStore};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        super::schema::run_migrations(&conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<ChatSession> {
        let started_at: String = row.get("started_at")?;
        let last_activity_at: String = row.get("last_activity_at")?;
        Ok(ChatSession {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            started_at: parse_timestamp(&started_at),
            last_activity_at: parse_timestamp(&last_activity_at),
        })
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<ChatMessage> {
        let sender: String = row.get("sender")?;
        let created_at: String = row.get("created_at")?;
        Ok(ChatMessage {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            sender: sender.parse().unwrap_or(Sender::Bot),
            text: row.get("text")?,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_faq(row: &Row) -> rusqlite::Result<Faq> {
        let created_at: String = row.get("created_at")?;
        Ok(Faq {
            id: row.get("id")?,
            question: row.get("question")?,
            answer: row.get("answer")?,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<RegistrationEvent> {
        let start_at: String = row.get("start_at")?;
        let end_at: String = row.get("end_at")?;
        Ok(RegistrationEvent {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            start_at: parse_timestamp(&start_at),
            end_at: parse_timestamp(&end_at),
            location: row.get("location")?,
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// `%text%` with LIKE wildcards escaped (ESCAPE '\').
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

// ============================================
// Portal accounts
// ============================================

impl CredentialStore for Database {
    fn persist_credentials(
        &self,
        user_id: i64,
        username: &str,
        password_encrypted: &str,
        session: &PortalSession,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO portal_accounts (user_id, username, password_encrypted, cookies, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id) DO UPDATE SET
                username = excluded.username,
                password_encrypted = excluded.password_encrypted,
                cookies = excluded.cookies,
                updated_at = excluded.updated_at
            "#,
            params![
                user_id,
                username,
                password_encrypted,
                session.to_blob(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_credentials(&self, user_id: i64) -> Result<Option<StoredCredentials>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT username, password_encrypted, cookies FROM portal_accounts WHERE user_id = ?",
            [user_id],
            |row| {
                let cookies: Option<String> = row.get("cookies")?;
                Ok(StoredCredentials {
                    user_id,
                    username: row.get("username")?,
                    password_encrypted: row.get("password_encrypted")?,
                    session: cookies.as_deref().and_then(PortalSession::from_blob),
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_cookies(&self, user_id: i64, session: &PortalSession) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO portal_accounts (user_id, cookies, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                cookies = excluded.cookies,
                updated_at = excluded.updated_at
            "#,
            params![user_id, session.to_blob(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn clear_credentials(&self, user_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM portal_accounts WHERE user_id = ?", [user_id])?;
        Ok(deleted > 0)
    }
}

// ============================================
// Chat sessions and messages
// ============================================

impl SessionStore for Database {
    fn get_or_create_session(&self, user_id: i64, existing: Option<i64>) -> Result<i64> {
        let conn = self.conn()?;
        if let Some(id) = existing {
            let owned = conn
                .query_row(
                    "SELECT id FROM chat_sessions WHERE id = ? AND user_id = ?",
                    params![id, user_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            if let Some(id) = owned {
                return Ok(id);
            }
            tracing::debug!(user_id, session_id = id, "Session not owned by user, starting a new one");
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chat_sessions (user_id, started_at, last_activity_at) VALUES (?1, ?2, ?2)",
            params![user_id, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_session(&self, session_id: i64) -> Result<Option<ChatSession>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM chat_sessions WHERE id = ?",
            [session_id],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    fn append_message(&self, session_id: i64, sender: Sender, text: &str) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (session_id, sender, text, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, sender.as_str(), text, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn touch_session(&self, session_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE chat_sessions SET last_activity_at = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), session_id],
        )?;
        if updated == 0 {
            return Err(Error::SessionNotFound(session_id));
        }
        Ok(())
    }

    fn set_title_if_unset(&self, session_id: i64, title: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE chat_sessions SET title = ? WHERE id = ? AND title IS NULL",
            params![title, session_id],
        )?;
        Ok(updated > 0)
    }

    fn count_messages(&self, session_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn recent_messages(&self, session_id: i64, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?",
        )?;
        let mut messages = stmt
            .query_map(params![session_id, limit as i64], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM chat_sessions WHERE user_id = ? ORDER BY last_activity_at DESC, id DESC",
        )?;
        let sessions = stmt
            .query_map([user_id], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    fn session_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM messages WHERE session_id = ? ORDER BY id")?;
        let messages = stmt
            .query_map([session_id], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn delete_session(&self, user_id: i64, session_id: i64) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE session_id IN (SELECT id FROM chat_sessions WHERE id = ?1 AND user_id = ?2)",
            params![session_id, user_id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM chat_sessions WHERE id = ? AND user_id = ?",
            params![session_id, user_id],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

// ============================================
// FAQs and registration events
// ============================================

impl KnowledgeBase for Database {
    fn find_faq(&self, text: &str) -> Result<Option<Faq>> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT * FROM faqs
            WHERE question LIKE ?1 ESCAPE '\' OR answer LIKE ?1 ESCAPE '\'
            ORDER BY id
            LIMIT 1
            "#,
            [like_pattern(text.trim())],
            Self::row_to_faq,
        )
        .optional()
        .map_err(Error::from)
    }

    fn recent_faqs(&self, limit: usize) -> Result<Vec<Faq>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT * FROM faqs ORDER BY created_at DESC, id DESC LIMIT ?")?;
        let faqs = stmt
            .query_map([limit as i64], Self::row_to_faq)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(faqs)
    }

    fn find_registration_event(&self, text: &str) -> Result<Option<RegistrationEvent>> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT * FROM registration_events
            WHERE title LIKE ?1 ESCAPE '\' OR coalesce(description, '') LIKE ?1 ESCAPE '\'
            ORDER BY start_at DESC
            LIMIT 1
            "#,
            [like_pattern(text.trim())],
            Self::row_to_event,
        )
        .optional()
        .map_err(Error::from)
    }

    fn insert_faq(&self, question: &str, answer: &str) -> Result<Faq> {
        let conn = self.conn()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO faqs (question, answer, created_at) VALUES (?1, ?2, ?3)",
            params![question, answer, created_at.to_rfc3339()],
        )?;
        Ok(Faq {
            id: conn.last_insert_rowid(),
            question: question.to_string(),
            answer: answer.to_string(),
            created_at,
        })
    }

    fn insert_registration_event(&self, event: &NewRegistrationEvent) -> Result<RegistrationEvent> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO registration_events (title, description, start_at, end_at, location)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                event.title,
                event.description,
                event.start_at.to_rfc3339(),
                event.end_at.to_rfc3339(),
                event.location,
            ],
        )?;
        Ok(RegistrationEvent {
            id: conn.last_insert_rowid(),
            title: event.title.clone(),
            description: event.description.clone(),
            start_at: event.start_at,
            end_at: event.end_at,
            location: event.location.clone(),
        })
    }
}

//! Persistence interfaces used by the chat and grade pipelines
//!
//! [`crate::db::Database`] implements all three traits over SQLite. The
//! pipelines only see these traits, so tests can use an in-memory database
//! without touching the filesystem.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    ChatMessage, ChatSession, Faq, PortalSession, RegistrationEvent, Sender, StoredCredentials,
};

/// Per-user portal account: username, vault-encrypted password, cookies.
///
/// Writes are last-write-wins by user id.
pub trait CredentialStore: Send + Sync {
    /// Save everything from a successful connect, replacing any previous row.
    fn persist_credentials(
        &self,
        user_id: i64,
        username: &str,
        password_encrypted: &str,
        session: &PortalSession,
    ) -> Result<()>;

    fn load_credentials(&self, user_id: i64) -> Result<Option<StoredCredentials>>;

    /// Replace only the cookies, after a re-login.
    fn update_cookies(&self, user_id: i64, session: &PortalSession) -> Result<()>;

    /// Forget the account. Returns false if there was nothing stored.
    fn clear_credentials(&self, user_id: i64) -> Result<bool>;
}

/// Chat sessions and their message log.
pub trait SessionStore: Send + Sync {
    /// Reuse `existing` when it belongs to `user_id`, otherwise start a new session.
    fn get_or_create_session(&self, user_id: i64, existing: Option<i64>) -> Result<i64>;

    fn get_session(&self, session_id: i64) -> Result<Option<ChatSession>>;

    fn append_message(&self, session_id: i64, sender: Sender, text: &str) -> Result<i64>;

    /// Bump the session's last-activity timestamp.
    fn touch_session(&self, session_id: i64) -> Result<()>;

    /// Set the title only if it is still NULL. Returns whether it was written.
    fn set_title_if_unset(&self, session_id: i64, title: &str) -> Result<bool>;

    fn count_messages(&self, session_id: i64) -> Result<i64>;

    /// The last `limit` messages, oldest first.
    fn recent_messages(&self, session_id: i64, limit: usize) -> Result<Vec<ChatMessage>>;

    /// A user's sessions, most recently active first.
    fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>>;

    fn session_messages(&self, session_id: i64) -> Result<Vec<ChatMessage>>;

    /// Delete a session and its messages if it belongs to `user_id`.
    fn delete_session(&self, user_id: i64, session_id: i64) -> Result<bool>;
}

/// Input for [`KnowledgeBase::insert_registration_event`].
#[derive(Debug, Clone)]
pub struct NewRegistrationEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub location: Option<String>,
}

/// FAQs and registration events.
///
/// Lookups are case-insensitive substring matches of the whole message
/// against the stored text.
pub trait KnowledgeBase: Send + Sync {
    fn find_faq(&self, text: &str) -> Result<Option<Faq>>;

    /// Newest first
    fn recent_faqs(&self, limit: usize) -> Result<Vec<Faq>>;

    /// The latest-starting event whose title or description matches.
    fn find_registration_event(&self, text: &str) -> Result<Option<RegistrationEvent>>;

    fn insert_faq(&self, question: &str, answer: &str) -> Result<Faq>;

    fn insert_registration_event(&self, event: &NewRegistrationEvent) -> Result<RegistrationEvent>;
}

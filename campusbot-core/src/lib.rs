//! # campusbot-core
//!
//! Core library for campusbot, a chat assistant for university students.
//!
//! This library provides:
//! - Intent routing for chat messages
//! - A student-portal client with session reuse and one-shot re-login
//! - Grade extraction with a JSON-then-HTML fallback ladder
//! - Model-assisted parameter extraction and session titles
//! - SQLite storage for sessions, messages, FAQs, events and portal accounts
//! - Configuration and logging
//!
//! ## Example
//!
//! ```rust,no_run
//! use campusbot_core::chat::{ChatDeps, ChatService};
//! use campusbot_core::portal::{GradeExtractor, PortalClient};
//! use campusbot_core::vault::AesVault;
//! use campusbot_core::{Config, Database};
//!
//! # async fn demo() -> campusbot_core::Result<()> {
//! let config = Config::load()?;
//! let db = Database::open(&Config::database_path())?;
//! db.migrate()?;
//!
//! let vault = AesVault::new(&config.vault.resolve_secret()?)?;
//! let portal = PortalClient::new(&config.portal)?;
//! let extractor = GradeExtractor::new(&config.portal)?;
//! let deps = ChatDeps {
//!     vault: &vault,
//!     portal: &portal,
//!     extractor: &extractor,
//!     completion: None,
//! };
//! let chat = ChatService::new(&db, deps, config.chat.clone())?;
//! let reply = chat.handle(1, None, "what is my cgpa").await?;
//! println!("{}", reply.reply);
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use chat::{ChatReply, ChatService, ReplySource};
pub use config::Config;
pub use db::Database;
pub use error::{Error, ErrorKind, PortalError, Result};
pub use intent::Intent;
pub use types::*;

// Public modules
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod format;
pub mod intent;
pub mod llm;
pub mod logging;
pub mod portal;
pub mod store;
pub mod types;
pub mod vault;

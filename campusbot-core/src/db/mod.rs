//! Database layer for campusbot
//!
//! SQLite storage with:
//! - Schema migrations
//! - [`Database`], which implements the [`crate::store`] traits

pub mod repo;
pub mod schema;

pub use repo::Database;

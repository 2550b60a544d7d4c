//! Student portal integration
//!
//! The portal has no documented API. This module logs in through the HTML
//! form, walks a chain of internal JSON endpoints to find the student's
//! registrations, and falls back to scraping HTML when the course-detail
//! endpoints do not answer.
//!
//! ## Layers
//!
//! - [`PortalClient`]: login handshake and raw authenticated GETs
//! - [`GradeExtractor`]: endpoint discovery and normalization of grade data
//! - [`GradeFlow`]: single re-login retry when a stored session has expired
//!
//! Endpoint paths and scraping patterns come from
//! [`crate::config::PortalConfig`] so they can be changed without a rebuild
//! when the portal moves things around.

mod client;
pub mod endpoints;
mod grades;
mod reauth;
pub mod records;
pub mod scrape;

pub use client::PortalClient;
pub use grades::{select_records, GradeExtractor};
pub use reauth::{Access, GradeFlow, GradeFlowOutcome, PortalAccess};
pub use scrape::{ScrapeStrategy, Scraper};

use async_trait::async_trait;

use crate::error::PortalError;
use crate::types::{PortalCredentials, PortalSession};

/// Decoded body of a portal response.
#[derive(Debug, Clone, PartialEq)]
pub enum PortalPayload {
    Json(serde_json::Value),
    Html(String),
}

impl PortalPayload {
    /// Rows of a `{"data": [...]}` envelope; `None` for HTML or other shapes.
    pub fn rows(&self) -> Option<&Vec<serde_json::Value>> {
        match self {
            PortalPayload::Json(value) => records::data_rows(value),
            PortalPayload::Html(_) => None,
        }
    }
}

/// Operations the grade pipeline needs from the portal.
///
/// [`PortalClient`] is the HTTP implementation; tests substitute scripted
/// fakes.
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// Perform the login handshake.
    async fn login(&self, credentials: &PortalCredentials)
        -> Result<PortalSession, PortalError>;

    /// Authenticated GET of an endpoint relative to the portal origin.
    async fn fetch(&self, session: &PortalSession, endpoint: &str)
        -> Result<PortalPayload, PortalError>;
}

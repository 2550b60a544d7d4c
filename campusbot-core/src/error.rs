//! Error types for campusbot-core

use thiserror::Error;

/// Main error type for the campusbot-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Student portal error
    #[error("portal error: {0}")]
    Portal(#[from] PortalError),

    /// Text-completion backend error
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    /// Credential vault error
    #[error("vault error: {0}")]
    Vault(String),

    /// Chat session not found
    #[error("chat session not found: {0}")]
    SessionNotFound(i64),

    /// The database connection mutex was poisoned by a panicking thread
    #[error("database connection lock poisoned")]
    LockPoisoned,

    /// A chat message with no text
    #[error("message must not be empty")]
    EmptyMessage,
}

/// Result type alias for campusbot-core
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure classes used to decide retries and user-facing replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad portal credentials, or the login handshake could not be completed
    AuthenticationFailed,
    /// A fetch failed while cookies existed
    SessionExpired,
    /// Network failure, timeout, or non-2xx from an upstream
    UpstreamUnavailable,
    /// Valid auth, but an empty result set
    NoMatchingData,
    /// Payload did not have the expected structure
    MalformedUpstreamPayload,
    /// The completion backend failed entirely
    ExtractionUnavailable,
}

/// Failures from the student portal.
///
/// Every portal operation returns one of these instead of panicking; callers
/// decide whether to retry through [`ErrorKind`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortalError {
    /// The login page did not contain the anti-forgery token
    #[error("could not extract verification token from the login page")]
    TokenNotFound,

    /// The login POST returned no session cookies
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The request did not complete within the configured timeout
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },

    /// The portal answered with a non-success status
    #[error("portal returned {status} for {endpoint}")]
    Status { status: u16, endpoint: String },

    /// Connection-level failure
    #[error("request to {endpoint} failed: {message}")]
    Network { endpoint: String, message: String },

    /// The body could not be read or decoded
    #[error("could not decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    /// Curriculum info returned no rows
    #[error("no curriculum found for this student")]
    CurriculumNotFound,

    /// Student basic info returned no rows
    #[error("no student record found for this curriculum")]
    StudentInfoNotFound,

    /// Registration history was missing or not a list
    #[error("registration history unavailable")]
    RegistrationUnavailable,

    /// A year/semester filter matched nothing
    #[error("could not find grades for Year {}, Semester {}", display_or_any(.year), display_or_any(.semester))]
    NoMatchingTerm {
        year: Option<i64>,
        semester: Option<u8>,
    },
}

fn display_or_any<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "Any".to_string())
}

impl PortalError {
    /// Map the failure to its retry class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PortalError::TokenNotFound | PortalError::InvalidCredentials => {
                ErrorKind::AuthenticationFailed
            }
            PortalError::Timeout { .. } | PortalError::Network { .. } => {
                ErrorKind::UpstreamUnavailable
            }
            // The portal answers expired sessions with redirects or error pages
            PortalError::Status { status, .. } => match status {
                300..=399 | 401 | 403 | 440 => ErrorKind::SessionExpired,
                _ => ErrorKind::UpstreamUnavailable,
            },
            PortalError::Decode { .. } => ErrorKind::MalformedUpstreamPayload,
            PortalError::CurriculumNotFound
            | PortalError::StudentInfoNotFound
            | PortalError::RegistrationUnavailable
            | PortalError::NoMatchingTerm { .. } => ErrorKind::NoMatchingData,
        }
    }

    /// True when a fresh login could plausibly fix the failure.
    ///
    /// A term filter that matched nothing proves the session was accepted, so
    /// re-authenticating cannot change the answer.
    pub fn may_be_expired_session(&self) -> bool {
        !matches!(self, PortalError::NoMatchingTerm { .. })
    }
}

/// Failures from a text-completion backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// The backend does not know this model
    #[error("model {model} not found")]
    NotFound { model: String },

    /// Rate limited or temporarily overloaded
    #[error("model {model} is overloaded")]
    Overloaded { model: String },

    /// The request timed out
    #[error("request to model {model} timed out")]
    Timeout { model: String },

    /// Anything else
    #[error("model {model} failed: {message}")]
    Other { model: String, message: String },
}

impl CompletionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExtractionUnavailable
    }
}

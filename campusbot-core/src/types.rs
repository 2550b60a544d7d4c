//! Core domain types for campusbot
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Portal** | The third-party student-information web portal |
//! | **PortalSession** | Cookies from one successful portal login |
//! | **Registration** | One academic term the student registered for |
//! | **Batch** | The academic year of a registration (1, 2, 3, ...) |
//! | **CGPA / SGPA** | Cumulative and semester grade point averages |
//! | **ChatSession** | A conversation between a user and the bot |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Portal credentials and session
// ============================================

/// Username and plaintext password for the portal.
///
/// Only ever held transiently; the stored form is encrypted by a
/// [`crate::vault::CredentialVault`].
#[derive(Clone, PartialEq, Eq)]
pub struct PortalCredentials {
    pub username: String,
    pub password: String,
}

impl PortalCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// An authenticated portal session.
///
/// Opaque outside the portal client: it holds the `Set-Cookie` values from
/// the login response, in order. Persisted as a JSON blob.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortalSession {
    cookies: Vec<String>,
}

impl PortalSession {
    pub fn new(cookies: Vec<String>) -> Self {
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Number of cookies held
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// Serialize for storage
    pub fn to_blob(&self) -> String {
        serde_json::Value::from(self.cookies.clone()).to_string()
    }

    /// Restore from storage; `None` for blobs that are not a list of strings
    pub fn from_blob(blob: &str) -> Option<Self> {
        serde_json::from_str::<Vec<String>>(blob).ok().map(Self::new)
    }

    /// `Cookie` header value: the `name=value` part of every cookie, joined with `"; "`
    pub(crate) fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .filter_map(|c| c.split(';').next())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl std::fmt::Debug for PortalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PortalSession({} cookies)", self.cookies.len())
    }
}

/// Per-user portal account row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub user_id: i64,
    pub username: Option<String>,
    /// Opaque vault output
    pub password_encrypted: Option<String>,
    pub session: Option<PortalSession>,
}

impl StoredCredentials {
    /// True when a re-login is possible without asking the user
    pub fn can_reauthenticate(&self) -> bool {
        self.username.is_some() && self.password_encrypted.is_some()
    }
}

// ============================================
// Grades
// ============================================

/// One course line from a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseGrade {
    pub code: String,
    pub title: String,
    /// Letter grade, or `"-"` when the portal did not report one
    pub letter_grade: String,
}

/// Sentinel for a missing letter grade
pub const NO_GRADE: &str = "-";

/// Sentinel for a missing GPA or status
pub const NOT_AVAILABLE: &str = "N/A";

/// One academic term the student registered for, as returned by the portal.
///
/// Built fresh per request; never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationRecord {
    pub batch_year: Option<i64>,
    /// Portal spelling, usually Roman ("I", "II", "III")
    pub semester: Option<String>,
    pub cgpa: Option<String>,
    pub semester_gpa: Option<String>,
    pub status: Option<String>,
    pub registration_code: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
    /// Courses embedded in the registration row, if any
    pub courses: Vec<CourseGrade>,
    pub raw: serde_json::Value,
}

impl RegistrationRecord {
    /// True when the portal has published a CGPA or SGPA for this term
    pub fn has_grades(&self) -> bool {
        self.cgpa.is_some() || self.semester_gpa.is_some()
    }
}

/// Map a semester spelling to its number: "I"/"1" → 1, "II"/"2" → 2, "III"/"3" → 3.
pub fn semester_number(semester: &str) -> Option<u8> {
    match semester.trim().to_ascii_uppercase().as_str() {
        "I" | "1" => Some(1),
        "II" | "2" => Some(2),
        "III" | "3" => Some(3),
        _ => None,
    }
}

/// How much grade detail the user asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    #[default]
    Summary,
    Detailed,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Summary => "summary",
            DetailLevel::Detailed => "detailed",
        }
    }
}

impl std::str::FromStr for DetailLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" => Ok(DetailLevel::Summary),
            "detailed" | "detail" => Ok(DetailLevel::Detailed),
            _ => Err(format!("unknown detail level: {}", s)),
        }
    }
}

/// Filters for a grade request.
///
/// Advisory: every field may be absent, and absence means "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionParams {
    pub year: Option<i64>,
    pub semester: Option<u8>,
    pub detail_level: DetailLevel,
    pub course_filter: Option<String>,
}

impl ExtractionParams {
    /// Apply the invariants every consumer relies on: a blank course filter
    /// is no filter, and a course filter always needs course-level detail.
    pub fn normalized(mut self) -> Self {
        self.course_filter = self
            .course_filter
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if self.course_filter.is_some() {
            self.detail_level = DetailLevel::Detailed;
        }
        self
    }

    pub fn has_term_filter(&self) -> bool {
        self.year.is_some() || self.semester.is_some()
    }
}

/// A term's grades, ready for formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGrade {
    pub cgpa: String,
    pub semester_gpa: String,
    pub status: String,
    pub batch_year: Option<i64>,
    pub semester: Option<String>,
    pub courses: Vec<CourseGrade>,
    pub raw: serde_json::Value,
}

impl NormalizedGrade {
    /// Placeholder returned when the student has no registrations at all
    pub fn not_available() -> Self {
        Self {
            cgpa: NOT_AVAILABLE.to_string(),
            semester_gpa: NOT_AVAILABLE.to_string(),
            status: NOT_AVAILABLE.to_string(),
            batch_year: None,
            semester: None,
            courses: Vec::new(),
            raw: serde_json::Value::Null,
        }
    }
}

// ============================================
// Chat
// ============================================

/// Who wrote a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }
}

impl std::str::FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "bot" => Ok(Sender::Bot),
            _ => Err(format!("unknown sender: {}", s)),
        }
    }
}

/// A conversation. The title is set once, from the first message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Faq {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationEvent {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub location: Option<String>,
}

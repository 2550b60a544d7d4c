//! Message intent classification
//!
//! Rules are checked in a fixed order and the first match wins:
//!
//! 1. `login <username> <password...>`
//! 2. registration keywords
//! 3. grade keywords
//! 4. anything else
//!
//! Registration is checked before grades, so "when is registration for
//! second semester" is a registration question.

/// What a chat message is asking for.
#[derive(Clone, PartialEq, Eq)]
pub enum Intent {
    Login { username: String, password: String },
    RegistrationQuery,
    GradesQuery,
    Unclassified,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Login { .. } => "login",
            Intent::RegistrationQuery => "registration",
            Intent::GradesQuery => "grades",
            Intent::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Debug for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::Login { username, .. } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"********")
                .finish(),
            other => f.write_str(other.as_str()),
        }
    }
}

const LOGIN_PREFIX: &str = "login ";

const REGISTRATION_KEYWORDS: &[&str] = &[
    "register",
    "registration",
    "enroll",
    "enrol",
    "when is registration",
    "registration date",
    "how do i register",
];

// "garde" is a common typo
const GRADE_KEYWORDS: &[&str] = &[
    "grade",
    "cgpa",
    "gpa",
    "result",
    "mark",
    "score",
    "garde",
    "status",
    "breakdown",
    "courses",
    "subjects",
    "semester",
];

/// Classify a raw message.
///
/// Matching is case-insensitive, but login tokens come from the unmodified
/// text so the password keeps its case.
pub fn classify(message: &str) -> Intent {
    let lower = message.to_lowercase();

    if lower.starts_with(LOGIN_PREFIX) {
        let tokens: Vec<&str> = message.split_whitespace().collect();
        if tokens.len() >= 3 {
            return Intent::Login {
                username: tokens[1].to_string(),
                password: tokens[2..].join(" "),
            };
        }
    }

    if REGISTRATION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return Intent::RegistrationQuery;
    }

    if is_grades_query(&lower) {
        return Intent::GradesQuery;
    }

    Intent::Unclassified
}

fn is_grades_query(lower: &str) -> bool {
    GRADE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Handlers to try for a message, in order.
///
/// A registration question with no matching event falls through to grades
/// (if it also mentions them) and then to general answering. Login and
/// grade requests always produce their own reply.
pub fn candidates(message: &str) -> Vec<Intent> {
    match classify(message) {
        Intent::RegistrationQuery => {
            let mut chain = vec![Intent::RegistrationQuery];
            if is_grades_query(&message.to_lowercase()) {
                chain.push(Intent::GradesQuery);
            }
            chain.push(Intent::Unclassified);
            chain
        }
        intent => vec![intent],
    }
}

/// Replace the password of a login command, for storage and logs.
pub fn mask_login(message: &str) -> String {
    match classify(message) {
        Intent::Login { username, .. } => {
            let command = message.split_whitespace().next().unwrap_or("login");
            format!("{} {} ********", command, username)
        }
        _ => message.to_string(),
    }
}

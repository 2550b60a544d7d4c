//! PII redaction for text leaving the process

use regex::Regex;

use crate::error::{Error, Result};

pub const REDACTED_EMAIL: &str = "[REDACTED_EMAIL]";
pub const REDACTED_ID: &str = "[REDACTED_ID]";

/// Masks email addresses and long digit runs (student ids, phone numbers).
#[derive(Debug, Clone)]
pub struct Redactor {
    email: Regex,
    long_number: Regex,
}

impl Redactor {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("invalid redaction pattern: {e}")))
        };
        Ok(Self {
            email: compile(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}")?,
            long_number: compile(r"\b\d{5,}\b")?,
        })
    }

    pub fn redact(&self, text: &str) -> String {
        let text = self.email.replace_all(text, REDACTED_EMAIL);
        self.long_number.replace_all(&text, REDACTED_ID).into_owned()
    }
}

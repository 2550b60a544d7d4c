//! Grade-request parameter extraction
//!
//! Turns a free-text question ("what did I get in OOP in third year?") into
//! [`ExtractionParams`] by asking a completion backend for JSON. Extraction is
//! best-effort: any failure yields default parameters, which the grade
//! pipeline reads as "latest term, summary".

use serde_json::Value;

use crate::llm::{extract_json_object, CompletionBackend, CompletionRequest};
use crate::types::{semester_number, ChatMessage, DetailLevel, ExtractionParams};

const SYSTEM_PROMPT: &str = r#"You turn a university student's question about their grades into a JSON request for the grade lookup service.

Course requests:
- If the student names a course (for example "english" or "Object Oriented Programming"), put that name in course_filter.
- A named course is searched across every year and semester, so do not set year or semester unless the student asked for a specific term.
- Whenever course_filter is set, detail_level MUST be "detailed".

Follow-ups:
- If the student answers an earlier clarifying question with "yes", "correct" or similar, repeat the pending request from the conversation history.

Year and semester:
- "Year 3", "3rd year", "third year" mean year 3.
- "sem 2", "semester II", "second semester" mean semester 2. Convert Roman numerals (I=1, II=2, III=3).
- Set a field to null when it is not mentioned.

Detail level:
- "breakdown", "courses", "subjects", "marks", "details" or a course name mean "detailed".
- Questions only about GPA, CGPA, status or a summary mean "summary".
- When unsure, use "detailed".

Reply with a single JSON object and nothing else:
{"request_type": "get_grade", "year": <number or null>, "semester": <number or null>, "detail_level": "summary" | "detailed", "course_filter": <string or null>}"#;

/// Extracts grade filters from chat messages.
pub struct ParamExtractor<'a> {
    backend: Option<&'a CompletionBackend>,
}

impl<'a> ParamExtractor<'a> {
    /// `None` disables extraction; every request then uses defaults.
    pub fn new(backend: Option<&'a CompletionBackend>) -> Self {
        Self { backend }
    }

    /// Never fails. `history` is the preceding messages, oldest first.
    pub async fn extract(&self, message: &str, history: &[ChatMessage]) -> ExtractionParams {
        let Some(backend) = self.backend else {
            tracing::debug!("No completion backend configured, using default grade filters");
            return ExtractionParams::default();
        };

        let request = CompletionRequest::new(SYSTEM_PROMPT, build_user_prompt(message, history))
            .json()
            .max_tokens(150);

        let raw = match backend.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, kind = ?e.kind(), "Parameter extraction unavailable");
                return ExtractionParams::default();
            }
        };

        match parse_params(&raw) {
            Some(params) => {
                tracing::info!(
                    year = ?params.year,
                    semester = ?params.semester,
                    detail_level = params.detail_level.as_str(),
                    course_filter = ?params.course_filter,
                    "Extracted grade filters"
                );
                params
            }
            None => {
                tracing::warn!(raw = %raw, "Could not parse extraction output");
                ExtractionParams::default()
            }
        }
    }
}

fn build_user_prompt(message: &str, history: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str("Conversation history:\n");
        for turn in history {
            prompt.push_str(&format!("{}: {}\n", turn.sender.as_str(), turn.text));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("Current student question: \"{}\"\n\nJSON:", message));
    prompt
}

/// Parse a model reply into params. Tolerates prose around the JSON and
/// loosely typed fields ("3", "III", "third").
pub fn parse_params(raw: &str) -> Option<ExtractionParams> {
    let object = extract_json_object(raw)?;
    let value: Value = serde_json::from_str(object).ok()?;
    if !value.is_object() {
        return None;
    }

    let detail_level = value
        .get("detail_level")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DetailLevel::Summary);

    let course_filter = value
        .get("course_filter")
        .and_then(Value::as_str)
        .filter(|s| !matches!(s.trim().to_ascii_lowercase().as_str(), "null" | "none"))
        .map(str::to_string);

    Some(
        ExtractionParams {
            year: value.get("year").and_then(coerce_year),
            semester: value.get("semester").and_then(coerce_semester),
            detail_level,
            course_filter,
        }
        .normalized(),
    )
}

fn ordinal(word: &str) -> Option<i64> {
    let n = match word {
        "first" | "1st" => 1,
        "second" | "2nd" => 2,
        "third" | "3rd" => 3,
        "fourth" | "4th" => 4,
        "fifth" | "5th" => 5,
        "sixth" | "6th" => 6,
        "seventh" | "7th" => 7,
        _ => return None,
    };
    Some(n)
}

/// A positive number from a JSON number or from text like "3", "3rd year",
/// "third", "Year 3".
fn loose_number(value: &Value) -> Option<i64> {
    let number = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let lower = s.trim().to_ascii_lowercase();
            lower.split_whitespace().find_map(|word| {
                ordinal(word).or_else(|| {
                    let digits: String = word.chars().take_while(char::is_ascii_digit).collect();
                    digits.parse().ok()
                })
            })
        }
        _ => None,
    };
    number.filter(|n| *n > 0)
}

fn coerce_year(value: &Value) -> Option<i64> {
    loose_number(value)
}

fn coerce_semester(value: &Value) -> Option<u8> {
    if let Value::String(s) = value {
        if let Some(n) = s.split_whitespace().find_map(semester_number) {
            return Some(n);
        }
    }
    loose_number(value)
        .and_then(|n| u8::try_from(n).ok())
        .filter(|n| (1..=3).contains(n))
}

//! Session titles

use crate::llm::{CompletionBackend, CompletionRequest};

pub const UNTITLED: &str = "Untitled conversation";

const TITLE_WORDS: usize = 6;

const TITLE_SYSTEM_PROMPT: &str = "You write concise 3-5 word titles that summarize a student's question. Reply with the title only, as plain text, without punctuation or commentary.";

/// Title from the first words of a message.
pub fn local_title(text: &str, max_chars: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().take(TITLE_WORDS).collect();
    finish_title(&truncate(&words.join(" "), max_chars)).unwrap_or_else(|| UNTITLED.to_string())
}

/// Clean a model-written title: strip quotes, fold lines, truncate and
/// capitalize. `None` when nothing is left.
pub fn clean_model_title(raw: &str, max_chars: usize) -> Option<String> {
    let folded = raw.replace('\n', " ");
    let stripped = folded
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'))
        .trim();
    finish_title(&truncate(stripped, max_chars))
}

/// Ask the backend for a title, falling back to [`local_title`].
///
/// `text` must already be redacted.
pub async fn generate_title(
    backend: Option<&CompletionBackend>,
    text: &str,
    max_chars: usize,
) -> String {
    if let Some(backend) = backend {
        let excerpt: String = text.chars().take(500).collect();
        let request = CompletionRequest::new(
            TITLE_SYSTEM_PROMPT,
            format!(
                "Create a very short (3-5 words) title for this student question. Keep it informal and clear.\n\nQuestion: \"{}\"\n\nTitle:",
                excerpt
            ),
        )
        .max_tokens(20);

        match backend.complete(&request).await {
            Ok(raw) => {
                if let Some(title) = clean_model_title(&raw, max_chars) {
                    return title;
                }
                tracing::warn!("Model returned an empty title");
            }
            Err(e) => tracing::warn!(error = %e, "Title generation failed, using local title"),
        }
    }
    local_title(text, max_chars)
}

fn finish_title(text: &str) -> Option<String> {
    let mut chars = text.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

/// Cut to `max_chars` characters, ending in "..." when shortened.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", head.trim_end())
}

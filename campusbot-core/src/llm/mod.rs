//! Text-completion backends
//!
//! The bot uses a generative model for three things: pulling grade filters
//! out of a message, titling new chat sessions, and answering questions no
//! FAQ covers. All of them go through [`TextCompletion`], one call per model,
//! and [`complete_text`], which walks a list of candidate models.

mod http;

pub use http::HttpCompletionClient;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::{CompletionError, Result};

/// One prompt for a completion backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Ask the backend to constrain output to JSON, where supported
    pub json_mode: bool,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_mode: false,
            max_tokens: 1024,
            temperature: 0.2,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self.temperature = 0.0;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A backend that can run a request against a named model.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> std::result::Result<String, CompletionError>;
}

/// Try each candidate model in order, pausing `delay` between attempts.
///
/// Returns the first success, or the last failure once every model has been
/// tried. Any error moves on to the next model.
pub async fn complete_text(
    client: &dyn TextCompletion,
    request: &CompletionRequest,
    candidates: &[String],
    delay: Duration,
) -> std::result::Result<String, CompletionError> {
    let mut last_error = None;
    for (attempt, model) in candidates.iter().enumerate() {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
        }
        match client.complete(model, request).await {
            Ok(text) => {
                tracing::debug!(model = %model, attempt, "Completion succeeded");
                return Ok(text);
            }
            Err(e) => {
                tracing::warn!(model = %model, error = %e, "Completion failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| CompletionError::Other {
        model: String::new(),
        message: "no models configured".to_string(),
    }))
}

/// A client bundled with its model list and retry delay.
pub struct CompletionBackend {
    client: Box<dyn TextCompletion>,
    candidates: Vec<String>,
    retry_delay: Duration,
}

impl CompletionBackend {
    pub fn new(client: Box<dyn TextCompletion>, candidates: Vec<String>, retry_delay: Duration) -> Self {
        Self {
            client,
            candidates,
            retry_delay,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        Ok(Self::new(
            Box::new(HttpCompletionClient::new(config)?),
            config.model_candidates(),
            Duration::from_millis(config.retry_delay_ms),
        ))
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<String, CompletionError> {
        complete_text(self.client.as_ref(), request, &self.candidates, self.retry_delay).await
    }
}

/// The slice from the first `{` to the last `}`, for models that wrap JSON
/// in prose or code fences.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

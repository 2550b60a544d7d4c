//! HTTP completion client for Ollama, Claude, OpenAI and Gemini

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{CompletionError, Error, Result};

use super::{CompletionRequest, TextCompletion};

type CompletionResult<T> = std::result::Result<T, CompletionError>;

pub struct HttpCompletionClient {
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());
        let api_key = config.api_key.clone().or_else(|| {
            config
                .provider
                .api_key_env()
                .and_then(|var| std::env::var(var).ok())
        });

        if config.provider.api_key_env().is_some() && api_key.is_none() {
            return Err(Error::Config(
                "llm.api_key (or provider env var) is required".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            provider: config.provider,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    /// URL, extra headers and JSON body for one call.
    fn build(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> CompletionResult<(String, HeaderMap, Value)> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let header_error = |e: reqwest::header::InvalidHeaderValue| CompletionError::Other {
            model: model.to_string(),
            message: format!("invalid api key header: {e}"),
        };

        let built = match self.provider {
            LlmProvider::Ollama => {
                let mut body = json!({
                    "model": model,
                    "system": request.system,
                    "prompt": request.user,
                    "stream": false,
                    "options": { "temperature": request.temperature, "num_predict": request.max_tokens },
                });
                if request.json_mode {
                    body["format"] = json!("json");
                }
                (format!("{}/api/generate", self.endpoint), headers, body)
            }
            LlmProvider::Claude => {
                headers.insert("x-api-key", HeaderValue::from_str(self.key()).map_err(header_error)?);
                headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
                let body = json!({
                    "model": model,
                    "max_tokens": request.max_tokens,
                    "temperature": request.temperature,
                    "system": request.system,
                    "messages": [{ "role": "user", "content": request.user }],
                });
                (format!("{}/v1/messages", self.endpoint), headers, body)
            }
            LlmProvider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", self.key())).map_err(header_error)?,
                );
                let mut body = json!({
                    "model": model,
                    "max_tokens": request.max_tokens,
                    "temperature": request.temperature,
                    "messages": [
                        { "role": "system", "content": request.system },
                        { "role": "user", "content": request.user }
                    ]
                });
                if request.json_mode {
                    body["response_format"] = json!({ "type": "json_object" });
                }
                (format!("{}/v1/chat/completions", self.endpoint), headers, body)
            }
            LlmProvider::Gemini => {
                let mut generation = json!({
                    "maxOutputTokens": request.max_tokens,
                    "temperature": request.temperature,
                });
                if request.json_mode {
                    generation["responseMimeType"] = json!("application/json");
                }
                let body = json!({
                    "systemInstruction": { "parts": [{ "text": request.system }] },
                    "contents": [{ "role": "user", "parts": [{ "text": request.user }] }],
                    "generationConfig": generation,
                });
                let url = format!(
                    "{}/v1beta/models/{}:generateContent?key={}",
                    self.endpoint,
                    urlencoding::encode(model),
                    urlencoding::encode(self.key())
                );
                (url, headers, body)
            }
        };
        Ok(built)
    }
}

/// Pull the generated text out of a provider response.
fn response_text(provider: LlmProvider, json: &Value) -> Option<String> {
    let text = match provider {
        LlmProvider::Ollama => json.get("response"),
        LlmProvider::Claude => json.pointer("/content/0/text"),
        LlmProvider::OpenAI => json.pointer("/choices/0/message/content"),
        LlmProvider::Gemini => json.pointer("/candidates/0/content/parts/0/text"),
    };
    text.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Map a non-success status to the error the fallback loop understands.
fn status_error(model: &str, status: StatusCode) -> CompletionError {
    let model = model.to_string();
    match status.as_u16() {
        404 => CompletionError::NotFound { model },
        429 | 503 | 529 => CompletionError::Overloaded { model },
        code => CompletionError::Other {
            model,
            message: format!("backend returned {code}"),
        },
    }
}

#[async_trait]
impl TextCompletion for HttpCompletionClient {
    async fn complete(&self, model: &str, request: &CompletionRequest) -> CompletionResult<String> {
        let (url, headers, body) = self.build(model, request)?;

        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout {
                        model: model.to_string(),
                    }
                } else {
                    CompletionError::Other {
                        model: model.to_string(),
                        message: format!("request failed: {e}"),
                    }
                }
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| CompletionError::Other {
            model: model.to_string(),
            message: format!("read body failed: {e}"),
        })?;

        if !status.is_success() {
            tracing::debug!(model, status = status.as_u16(), body = %text, "Completion backend error");
            return Err(status_error(model, status));
        }

        let json: Value = serde_json::from_str(&text).map_err(|e| CompletionError::Other {
            model: model.to_string(),
            message: format!("invalid JSON response: {e}"),
        })?;
        response_text(self.provider, &json).ok_or_else(|| CompletionError::Other {
            model: model.to_string(),
            message: "response contained no text".to_string(),
        })
    }
}

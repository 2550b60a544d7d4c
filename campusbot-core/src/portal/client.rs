//! HTTP client for the student portal
//!
//! The portal is a cookie-authenticated web app, not an API. Login replays
//! the browser form flow; every later call is a GET carrying the session
//! cookies. No call here retries: that policy belongs to
//! [`super::reauth::GradeFlow`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};

use crate::config::PortalConfig;
use crate::error::{Error, PortalError, Result};
use crate::types::{PortalCredentials, PortalSession};

use super::scrape::Scraper;
use super::{PortalApi, PortalPayload};

/// HTTP client for one portal deployment
pub struct PortalClient {
    http_client: reqwest::Client,
    base_url: String,
    login_path: String,
    scraper: Scraper,
}

impl PortalClient {
    /// Create a new portal client from configuration
    pub fn new(config: &PortalConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| Error::Config(format!("invalid portal.user_agent: {}", e)))?,
        );

        // Login success is signalled by the redirect itself, so never follow it
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            login_path: config.endpoints.login.clone(),
            scraper: Scraper::new(&config.scrape)?,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Log in with the browser form flow and return the new session.
    ///
    /// 1. GET the login page for its cookies and anti-forgery token.
    /// 2. POST the form with those cookies, redirects disabled.
    /// 3. Succeed only if the response sets new cookies; the portal does not
    ///    use 401/403 for bad passwords, so status codes are not trusted.
    pub async fn login_to_portal(
        &self,
        credentials: &PortalCredentials,
    ) -> std::result::Result<PortalSession, PortalError> {
        let endpoint = self.login_path.as_str();
        let url = self.url(endpoint);

        let page = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;
        if !page.status().is_success() {
            return Err(PortalError::Status {
                status: page.status().as_u16(),
                endpoint: endpoint.to_string(),
            });
        }
        let initial = PortalSession::new(set_cookies(page.headers()));
        let html = page
            .text()
            .await
            .map_err(|e| decode_error(endpoint, e.to_string()))?;

        let token = self.scraper.form_token(&html).ok_or_else(|| {
            tracing::warn!(endpoint, "Login page has no verification token");
            PortalError::TokenNotFound
        })?;

        let form = [
            (self.scraper.token_field(), token.as_str()),
            ("Username", credentials.username.as_str()),
            ("Password", credentials.password.as_str()),
        ];

        let mut request = self.http_client.post(&url).form(&form);
        if !initial.is_empty() {
            request = request.header(COOKIE, initial.cookie_header());
        }
        let response = request
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;

        let status = response.status();
        let cookies = set_cookies(response.headers());
        if cookies.is_empty() {
            tracing::info!(
                status = status.as_u16(),
                username = %credentials.username,
                "Portal login rejected (no session cookies)"
            );
            return Err(PortalError::InvalidCredentials);
        }

        tracing::info!(
            status = status.as_u16(),
            cookie_count = cookies.len(),
            username = %credentials.username,
            "Portal login succeeded"
        );
        Ok(PortalSession::new(cookies))
    }

    /// Authenticated GET. The body is decoded as JSON when the portal says so
    /// (or when it looks like JSON), and returned as HTML text otherwise.
    pub async fn fetch_portal_data(
        &self,
        session: &PortalSession,
        endpoint: &str,
    ) -> std::result::Result<PortalPayload, PortalError> {
        let response = self
            .http_client
            .get(self.url(endpoint))
            .header(COOKIE, session.cookie_header())
            .send()
            .await
            .map_err(|e| request_error(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(endpoint, status = status.as_u16(), "Portal fetch failed");
            return Err(PortalError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));

        let body = response
            .text()
            .await
            .map_err(|e| request_error(endpoint, e))?;

        decode_body(endpoint, &body, is_json)
    }
}

/// Turn a body into a payload. Declared JSON must parse; undeclared bodies
/// are tried as JSON only when they look like it.
fn decode_body(
    endpoint: &str,
    body: &str,
    declared_json: bool,
) -> std::result::Result<PortalPayload, PortalError> {
    let trimmed = body.trim_start();
    let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');

    if declared_json || looks_like_json {
        match serde_json::from_str(body) {
            Ok(value) => return Ok(PortalPayload::Json(value)),
            Err(e) if declared_json => return Err(decode_error(endpoint, e.to_string())),
            Err(_) => {}
        }
    }
    Ok(PortalPayload::Html(body.to_string()))
}

fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}

fn request_error(endpoint: &str, error: reqwest::Error) -> PortalError {
    if error.is_timeout() {
        PortalError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else if let Some(status) = error.status() {
        PortalError::Status {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        }
    } else if error.is_decode() || error.is_body() {
        decode_error(endpoint, error.to_string())
    } else {
        PortalError::Network {
            endpoint: endpoint.to_string(),
            message: error.to_string(),
        }
    }
}

fn decode_error(endpoint: &str, message: String) -> PortalError {
    PortalError::Decode {
        endpoint: endpoint.to_string(),
        message,
    }
}

#[async_trait]
impl PortalApi for PortalClient {
    async fn login(
        &self,
        credentials: &PortalCredentials,
    ) -> std::result::Result<PortalSession, PortalError> {
        self.login_to_portal(credentials).await
    }

    async fn fetch(
        &self,
        session: &PortalSession,
        endpoint: &str,
    ) -> std::result::Result<PortalPayload, PortalError> {
        self.fetch_portal_data(session, endpoint).await
    }
}

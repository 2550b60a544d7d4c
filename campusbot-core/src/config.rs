//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/campusbot/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/campusbot/` (~/.config/campusbot/)
//! - Data: `$XDG_DATA_HOME/campusbot/` (~/.local/share/campusbot/)
//! - State/Logs: `$XDG_STATE_HOME/campusbot/` (~/.local/state/campusbot/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable consulted when `vault.secret` is not set
pub const VAULT_KEY_ENV: &str = "CAMPUSBOT_VAULT_KEY";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Student portal connection and endpoint layout
    #[serde(default)]
    pub portal: PortalConfig,

    /// Text-completion backend (optional)
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// Chat pipeline behavior
    #[serde(default)]
    pub chat: ChatConfig,

    /// Credential vault
    #[serde(default)]
    pub vault: VaultConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Student portal configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    /// Portal origin, without a trailing slash
    #[serde(default = "default_portal_base_url")]
    pub base_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_portal_timeout")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Endpoint paths, relative to `base_url`
    #[serde(default)]
    pub endpoints: PortalEndpoints,

    /// Scraping patterns for HTML pages
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: default_portal_base_url(),
            timeout_secs: default_portal_timeout(),
            user_agent: default_user_agent(),
            endpoints: PortalEndpoints::default(),
            scrape: ScrapeConfig::default(),
        }
    }
}

fn default_portal_base_url() -> String {
    "https://studentportal.bdu.edu.et".to_string()
}

fn default_portal_timeout() -> u64 {
    20
}

fn default_user_agent() -> String {
    concat!("campusbot/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Portal endpoint templates.
///
/// The portal has no documented API; these paths were observed on one
/// deployment and are expected to drift. Placeholders in braces are replaced
/// with URL-encoded values at request time:
/// `{curriculum_code}`, `{student_curriculum_code}`, `{batch}`, `{semester}`,
/// `{registration_code}`.
#[derive(Debug, Deserialize, Clone)]
pub struct PortalEndpoints {
    #[serde(default = "default_login_path")]
    pub login: String,

    #[serde(default = "default_curriculum_info")]
    pub curriculum_info: String,

    #[serde(default = "default_student_basic_info")]
    pub student_basic_info: String,

    #[serde(default = "default_registration_history")]
    pub registration_history: String,

    /// Per-term course detail endpoints, tried in order
    #[serde(default = "default_detail_patterns")]
    pub detail_patterns: Vec<String>,

    #[serde(default = "default_registered_courses")]
    pub registered_courses: String,

    /// HTML page whose scripts embed the course grid
    #[serde(default = "default_academic_summary")]
    pub academic_summary: String,
}

impl Default for PortalEndpoints {
    fn default() -> Self {
        Self {
            login: default_login_path(),
            curriculum_info: default_curriculum_info(),
            student_basic_info: default_student_basic_info(),
            registration_history: default_registration_history(),
            detail_patterns: default_detail_patterns(),
            registered_courses: default_registered_courses(),
            academic_summary: default_academic_summary(),
        }
    }
}

fn default_login_path() -> String {
    "Account/Login".to_string()
}

fn default_curriculum_info() -> String {
    "RegistrationSummary/GetCurriculumInfo".to_string()
}

fn default_student_basic_info() -> String {
    "RegistrationSummary/GetStudentBasicInfo?curriculumCode={curriculum_code}".to_string()
}

fn default_registration_history() -> String {
    "RegistrationSummary/GetStudentRegistration?studentCurriculumCode={student_curriculum_code}"
        .to_string()
}

fn default_detail_patterns() -> Vec<String> {
    [
        "RegistrationSummary/GetStudentGradeBySemester?studentCurriculumCode={student_curriculum_code}&academicYear={batch}&semester={semester}",
        "RegistrationSummary/GetSemesterResult?studentCurriculumCode={student_curriculum_code}&year={batch}&semester={semester}",
        "RegistrationSummary/GetStudentSemesterGrade?studentCurriculumCode={student_curriculum_code}&batch={batch}&semester={semester}",
        "RegistrationSummary/GetDetailRegistration?studentCurriculumCode={student_curriculum_code}&batch={batch}&semester={semester}",
        "RegistrationSummary/GetCourses?studentCurriculumCode={student_curriculum_code}&batch={batch}&semester={semester}",
        "RegistrationSummary/GetStudentGrade?studentCurriculumCode={student_curriculum_code}&academicYear={batch}&semester={semester}",
        "RegistrationSummary/GetGradeReport?studentCurriculumCode={student_curriculum_code}&academicYear={batch}&semester={semester}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_registered_courses() -> String {
    "RegistrationSummary/GetRegisteredCourses?registrationCode={registration_code}".to_string()
}

fn default_academic_summary() -> String {
    // Sic: the portal route is misspelled
    "Report/StudentLevel/AcademicSumamry".to_string()
}

/// Patterns used when scraping portal HTML
#[derive(Debug, Deserialize, Clone)]
pub struct ScrapeConfig {
    /// Name of the hidden anti-forgery input on the login form
    #[serde(default = "default_token_field")]
    pub token_field: String,

    /// A script is only inspected if it contains one of these substrings
    #[serde(default = "default_script_markers")]
    pub script_markers: Vec<String>,

    /// Regex locating the start of the grid's data array; the array literal
    /// must follow the match immediately (after optional whitespace)
    #[serde(default = "default_data_source_pattern")]
    pub data_source_pattern: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            token_field: default_token_field(),
            script_markers: default_script_markers(),
            data_source_pattern: default_data_source_pattern(),
        }
    }
}

fn default_token_field() -> String {
    "__RequestVerificationToken".to_string()
}

fn default_script_markers() -> Vec<String> {
    vec!["Detail Registration".to_string(), "dataSource".to_string()]
}

fn default_data_source_pattern() -> String {
    r#"["']?dataSource["']?\s*[:=]\s*"#.to_string()
}

/// Text-completion provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider type
    pub provider: LlmProvider,
    /// Preferred model
    pub model: String,
    /// Models tried, in order, when the preferred one fails
    #[serde(default)]
    pub fallback_models: Vec<String>,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    /// HTTP request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Pause between model fallback attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl LlmConfig {
    /// Preferred model followed by fallbacks, without duplicates
    pub fn model_candidates(&self) -> Vec<String> {
        let mut candidates = vec![self.model.clone()];
        for model in &self.fallback_models {
            if !candidates.contains(model) {
                candidates.push(model.clone());
            }
        }
        candidates
    }
}

fn default_llm_timeout() -> u64 {
    30
}

fn default_retry_delay_ms() -> u64 {
    500
}

/// Supported completion providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    OpenAI,
    Gemini,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    /// Environment variable holding the API key, if the provider needs one
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Ollama => None,
            LlmProvider::Claude => Some("ANTHROPIC_API_KEY"),
            LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
            LlmProvider::Gemini => Some("GEMINI_API_KEY"),
        }
    }
}

/// Chat pipeline configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Ask the completion backend for session titles instead of using the
    /// first words of the message
    #[serde(default)]
    pub llm_titles: bool,

    /// Prior messages passed to the parameter extractor as context
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Longest title stored for a session
    #[serde(default = "default_max_title_chars")]
    pub max_title_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            llm_titles: false,
            history_turns: default_history_turns(),
            max_title_chars: default_max_title_chars(),
        }
    }
}

fn default_history_turns() -> usize {
    3
}

fn default_max_title_chars() -> usize {
    60
}

/// Credential vault configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct VaultConfig {
    /// Secret the encryption key is derived from
    pub secret: Option<String>,
}

impl VaultConfig {
    /// The configured secret, or the `CAMPUSBOT_VAULT_KEY` env var
    pub fn resolve_secret(&self) -> Result<String> {
        self.secret
            .clone()
            .or_else(|| std::env::var(VAULT_KEY_ENV).ok())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::Config(format!(
                    "vault.secret (or {VAULT_KEY_ENV}) is required to store portal passwords"
                ))
            })
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning an error message if invalid
    pub fn validate(&self) -> Result<()> {
        let base = self.portal.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(Error::Config(
                "portal.base_url must start with http:// or https://".to_string(),
            ));
        }
        if self.portal.timeout_secs == 0 {
            return Err(Error::Config(
                "portal.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.portal.endpoints.detail_patterns.is_empty() {
            tracing::warn!("portal.endpoints.detail_patterns is empty; course detail will rely on scraping");
        }
        regex::Regex::new(&self.portal.scrape.data_source_pattern).map_err(|e| {
            Error::Config(format!("portal.scrape.data_source_pattern is invalid: {e}"))
        })?;
        if let Some(llm) = &self.llm {
            if llm.model.trim().is_empty() {
                return Err(Error::Config("llm.model must not be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/campusbot/config.toml` (~/.config/campusbot/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("campusbot").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/campusbot/` (~/.local/share/campusbot/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("campusbot")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/campusbot/` (~/.local/state/campusbot/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("campusbot")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/campusbot/campusbot.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("campusbot.db")
    }
}

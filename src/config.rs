//! Configuration management for taskgrade.
//!
//! Configuration is read from environment variables:
//! - `HOST` - Optional. Evaluator host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Evaluator port. Defaults to `5001`.
//! - `STUDENT_PORT` - Optional. Deploy-request server port. Defaults to `5000`.
//! - `DATABASE_PATH` - Optional. SQLite file. Defaults to `taskgrade.db`.
//! - `STORE_BACKEND` - Optional. `sqlite` (default) or `memory`.
//! - `EVALUATION_API_BASE_URL` - Optional. Defaults to `http://localhost:5001`.
//! - `LLM_API_KEY` - Required by anything that talks to the language model.
//! - `LLM_API_BASE_URL` - Optional. OpenAI-compatible base. Defaults to OpenRouter.
//! - `LLM_MODEL` - Optional. Defaults to `openai/gpt-4o-mini`.
//! - `GITHUB_TOKEN` / `GITHUB_USERNAME` - Repository host credentials.
//! - `STUDENT_SECRET` / `STUDENT_EMAIL` - Deploy-request verification.
//! - `REQUEST_TIMEOUT`, `DISPATCH_TIMEOUT`, `PAGE_LOAD_TIMEOUT` - Seconds.
//! - `MAX_RETRIES` - Optional. Notify attempts. Defaults to `5`.
//! - `SETTLE_DELAY_MS` - Optional. Wait after page load. Defaults to `2000`.
//! - `CODE_CHAR_BUDGET` - Optional. `index.html` prompt budget. Defaults to `3000`.
//! - `BROWSER_CDP_URL` - Optional. Connect to a running Chrome instead of launching one.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::store::StoreBackend;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Language model settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// OpenAI-compatible API base (without `/chat/completions`)
    pub api_base_url: String,
    pub model: String,
}

impl LlmConfig {
    /// The API key, or an error naming the variable that is missing.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("LLM_API_KEY".to_string()))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
        }
    }
}

/// Timeouts and grading knobs.
#[derive(Debug, Clone)]
pub struct GradingConfig {
    /// Timeout for LLM and repository host calls
    pub request_timeout: Duration,
    /// Timeout for a single task dispatch POST
    pub dispatch_timeout: Duration,
    /// Notify attempts before giving up
    pub max_retries: u32,
    pub page_load_timeout: Duration,
    pub settle_delay: Duration,
    /// Characters of `index.html` sent to the grader
    pub code_char_budget: usize,
    pub browser_cdp_url: Option<String>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(600),
            dispatch_timeout: Duration::from_secs(30),
            max_retries: 5,
            page_load_timeout: Duration::from_secs(15),
            settle_delay: Duration::from_millis(2000),
            code_char_budget: 3000,
            browser_cdp_url: None,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub student_port: u16,
    pub database_path: PathBuf,
    pub store_backend: StoreBackend,
    pub evaluation_base_url: String,
    pub llm: LlmConfig,
    pub github_token: Option<String>,
    pub github_username: Option<String>,
    pub student_secret: Option<String>,
    pub student_email: Option<String>,
    pub grading: GradingConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = GradingConfig::default();
        let llm_defaults = LlmConfig::default();

        let grading = GradingConfig {
            request_timeout: Duration::from_secs(env_parse(
                "REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs(),
            )?),
            dispatch_timeout: Duration::from_secs(env_parse(
                "DISPATCH_TIMEOUT",
                defaults.dispatch_timeout.as_secs(),
            )?),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries)?,
            page_load_timeout: Duration::from_secs(env_parse(
                "PAGE_LOAD_TIMEOUT",
                defaults.page_load_timeout.as_secs(),
            )?),
            settle_delay: Duration::from_millis(env_parse(
                "SETTLE_DELAY_MS",
                defaults.settle_delay.as_millis() as u64,
            )?),
            code_char_budget: env_parse("CODE_CHAR_BUDGET", defaults.code_char_budget)?,
            browser_cdp_url: std::env::var("BROWSER_CDP_URL").ok(),
        };

        let store_backend = StoreBackend::from_str(&env_or("STORE_BACKEND", "sqlite"))
            .map_err(|e| ConfigError::InvalidValue("STORE_BACKEND".to_string(), e))?;

        Ok(Self {
            host: env_or("HOST", "127.0.0.1"),
            port: env_parse("PORT", 5001)?,
            student_port: env_parse("STUDENT_PORT", 5000)?,
            database_path: PathBuf::from(env_or("DATABASE_PATH", "taskgrade.db")),
            store_backend,
            evaluation_base_url: env_or("EVALUATION_API_BASE_URL", "http://localhost:5001")
                .trim_end_matches('/')
                .to_string(),
            llm: LlmConfig {
                api_key: std::env::var("LLM_API_KEY").ok(),
                api_base_url: env_or("LLM_API_BASE_URL", &llm_defaults.api_base_url),
                model: env_or("LLM_MODEL", &llm_defaults.model),
            },
            github_token: std::env::var("GITHUB_TOKEN").ok(),
            github_username: std::env::var("GITHUB_USERNAME").ok(),
            student_secret: std::env::var("STUDENT_SECRET").ok(),
            student_email: std::env::var("STUDENT_EMAIL").ok(),
            grading,
        })
    }

    /// Create a config with in-memory storage (useful for testing).
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            student_port: 5000,
            database_path,
            store_backend: StoreBackend::Memory,
            evaluation_base_url: "http://localhost:5001".to_string(),
            llm: LlmConfig::default(),
            github_token: None,
            github_username: None,
            student_secret: None,
            student_email: None,
            grading: GradingConfig::default(),
        }
    }

    /// Where submitters must report deployments.
    pub fn notify_url(&self) -> String {
        format!("{}/api/notify", self.evaluation_base_url)
    }

    pub fn require_github(&self) -> Result<(&str, &str), ConfigError> {
        let token = self
            .github_token
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("GITHUB_TOKEN".to_string()))?;
        let username = self
            .github_username
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("GITHUB_USERNAME".to_string()))?;
        Ok((token, username))
    }
}

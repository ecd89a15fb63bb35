//! Client configuration loaded from `.env` / process environment.
//!
//! Callers run `dotenvy::dotenv()` first, then [`ClientConfig::from_env`].
//! Unset or unparsable values fall back to the defaults below.

use std::time::Duration;

use crate::error::{ChatError, ChatResult};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Credentials for the backend's optional HTTP basic auth gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Backend client configuration.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | FOUNDRY_CHAT_API_URL | http://127.0.0.1:8000 | Base URL of the chat backend. |
/// | FOUNDRY_CHAT_UPLOAD_CONCURRENCY | 4 | Max uploads in flight per batch (1 = strictly sequential). |
/// | FOUNDRY_CHAT_TIMEOUT_SECS | 120 | Per-request timeout, including streamed bodies. |
/// | WEB_APP_USERNAME / WEB_APP_PASSWORD | unset | Basic auth; only sent when both are set. |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub upload_concurrency: usize,
    pub request_timeout_secs: u64,
    pub basic_auth: Option<BasicAuth>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            basic_auth: None,
        }
    }
}

impl ClientConfig {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = env_opt_string(&lookup, "FOUNDRY_CHAT_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let upload_concurrency = env_parse(&lookup, "FOUNDRY_CHAT_UPLOAD_CONCURRENCY")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY);
        let request_timeout_secs = env_parse(&lookup, "FOUNDRY_CHAT_TIMEOUT_SECS")
            .filter(|n: &u64| *n > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let basic_auth = match (
            env_opt_string(&lookup, "WEB_APP_USERNAME"),
            env_opt_string(&lookup, "WEB_APP_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Some(BasicAuth { username, password }),
            _ => None,
        };
        Self {
            api_base_url,
            upload_concurrency,
            request_timeout_secs,
            basic_auth,
        }
    }

    /// Override the base URL (e.g. from a CLI flag).
    pub fn with_api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = url.trim().to_string();
        self
    }

    /// Absolute URL for a backend route such as `/upload`.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Shared reqwest client with the configured timeout.
    pub fn http_client(&self) -> ChatResult<reqwest::Client> {
        if self.api_base_url.trim().is_empty() {
            return Err(ChatError::Config("API base URL is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()?;
        Ok(client)
    }
}

fn env_opt_string<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = env_opt_string(lookup, name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(
                target: "foundry_chat::config",
                "Ignoring invalid {}={:?}; using default.",
                name,
                raw
            );
            None
        }
    }
}

//! Configuration loaded from the environment (and `.env` via dotenvy).
//!
//! Credentials are resolved lazily: a missing key only fails the operation
//! that needs it, with a message naming the variable.

use crate::error::{AppError, Result};
use regex::Regex;
use reqwest::Url;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

pub const ANALYSIS_ENDPOINT: &str = "AZURE_CONTENT_UNDERSTANDING_ENDPOINT";
pub const ANALYSIS_KEY: &str = "AZURE_CONTENT_UNDERSTANDING_KEY";

const CHAT_ENDPOINT_VARS: &[&str] = &[
    "AZURE_OPENAI_ENDPOINT",
    "REACT_APP_AZURE_OPENAI_CHAT_ENDPOINT",
    "REACT_APP_AZURE_OPENAI_ENDPOINT",
];
const CHAT_KEY_VARS: &[&str] = &[
    "AZURE_OPENAI_API_KEY",
    "AZURE_OPENAI_KEY",
    "REACT_APP_AZURE_OPENAI_CHAT_KEY",
    "REACT_APP_AZURE_OPENAI_KEY",
];
const CHAT_DEPLOYMENT_VARS: &[&str] = &[
    "AZURE_OPENAI_DEPLOYMENT",
    "REACT_APP_AZURE_OPENAI_DEPLOYMENT",
    "REACT_APP_AZURE_OPENAI_DEPLOYMENT_NAME",
];
const CHAT_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
const UPLOADS_DIR: &str = "UPLOADS_DIR";

const DEFAULT_API_VERSION: &str = "2024-02-15-preview";
const DEFAULT_UPLOADS_DIR: &str = "uploads";

/// Bounded exponential backoff: `base * 2^retry + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let backoff = self.base_delay.saturating_mul(2u32.saturating_pow(retry));
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            self.max_jitter.mul_f64(rand::random::<f64>())
        };
        backoff + jitter
    }
}

/// Fixed-interval polling of a long-running operation.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisCredentials {
    /// Base URL, always ending in `/`.
    pub endpoint: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct ChatCredentials {
    /// Base URL, always ending in `/`.
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    values: HashMap<String, String>,
    pub uploads_dir: PathBuf,
    pub request_timeout: Duration,
    pub analysis_retry: RetryPolicy,
    pub analysis_poll: PollPolicy,
    /// Attempts per question before falling back to the sentinel answer.
    pub answer_attempts: u32,
    /// Context longer than this is cut to head + tail.
    pub context_max_chars: usize,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^your_|_here$").expect("placeholder regex"))
}

/// Empty values and template values such as `your_key` or `endpoint_here`.
pub fn is_placeholder(value: &str) -> bool {
    value.is_empty() || placeholder_re().is_match(value)
}

/// Validate an `http(s)://` base URL and make sure it ends with `/`.
pub fn normalize_base_url(raw: &str, name_for_errors: &str) -> Result<String> {
    let invalid = || {
        AppError::config(
            name_for_errors,
            format!(
                "Invalid {}. Expected a full URL like https://<your-resource>/",
                name_for_errors
            ),
        )
    };
    let url = Url::parse(raw).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    let mut normalized = raw.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}

fn all_known_vars() -> impl Iterator<Item = &'static str> {
    [ANALYSIS_ENDPOINT, ANALYSIS_KEY, CHAT_API_VERSION, UPLOADS_DIR]
        .into_iter()
        .chain(CHAT_ENDPOINT_VARS.iter().copied())
        .chain(CHAT_KEY_VARS.iter().copied())
        .chain(CHAT_DEPLOYMENT_VARS.iter().copied())
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any name → value lookup. Values are trimmed.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let values: HashMap<String, String> = all_known_vars()
            .filter_map(|name| lookup(name).map(|v| (name.to_string(), v.trim().to_string())))
            .collect();
        let uploads_dir = values
            .get(UPLOADS_DIR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR));
        Self {
            values,
            uploads_dir,
            request_timeout: Duration::from_secs(90),
            analysis_retry: RetryPolicy::default(),
            analysis_poll: PollPolicy::default(),
            answer_attempts: 3,
            context_max_chars: 16_000,
        }
    }

    fn get(&self, name: &str) -> &str {
        self.values.get(name).map(String::as_str).unwrap_or("")
    }

    fn require(&self, name: &str) -> Result<String> {
        let value = self.get(name);
        if is_placeholder(value) {
            return Err(AppError::config(
                name,
                format!("Missing or placeholder {}. Update your .env file.", name),
            ));
        }
        Ok(value.to_string())
    }

    /// First non-placeholder value among `names`; errors name the canonical (first) variable.
    fn require_any(&self, names: &[&str]) -> Result<String> {
        if let Some(value) = names
            .iter()
            .map(|n| self.get(n))
            .find(|v| !is_placeholder(v))
        {
            return Ok(value.to_string());
        }
        let canonical = names.first().copied().unwrap_or("ENV_VAR");
        Err(AppError::config(
            canonical,
            format!("Missing or placeholder {}. Update your .env file.", canonical),
        ))
    }

    pub fn analysis_credentials(&self) -> Result<AnalysisCredentials> {
        let endpoint = normalize_base_url(&self.require(ANALYSIS_ENDPOINT)?, ANALYSIS_ENDPOINT)?;
        let key = self.require(ANALYSIS_KEY)?;
        Ok(AnalysisCredentials { endpoint, key })
    }

    pub fn chat_credentials(&self) -> Result<ChatCredentials> {
        let canonical_endpoint = CHAT_ENDPOINT_VARS[0];
        let endpoint =
            normalize_base_url(&self.require_any(CHAT_ENDPOINT_VARS)?, canonical_endpoint)?;
        let api_key = self.require_any(CHAT_KEY_VARS)?;
        let deployment = self.require_any(CHAT_DEPLOYMENT_VARS)?;
        let api_version = match self.get(CHAT_API_VERSION) {
            "" => DEFAULT_API_VERSION.to_string(),
            v => v.to_string(),
        };
        Ok(ChatCredentials {
            endpoint,
            api_key,
            deployment,
            api_version,
        })
    }

    /// Presence report for the credentials, never exposing the values themselves.
    pub fn status(&self) -> ConfigStatus {
        let vars: Vec<VarStatus> = [
            ANALYSIS_ENDPOINT,
            ANALYSIS_KEY,
            CHAT_ENDPOINT_VARS[0],
            CHAT_KEY_VARS[0],
            CHAT_DEPLOYMENT_VARS[0],
        ]
        .iter()
        .map(|name| VarStatus::of(name, self.get(name)))
        .chain(std::iter::once(VarStatus {
            name: CHAT_API_VERSION.to_string(),
            set: !self.get(CHAT_API_VERSION).is_empty(),
            placeholder: false,
            length: self.get(CHAT_API_VERSION).chars().count(),
        }))
        .collect();
        let analysis_ready = vars
            .iter()
            .filter(|v| v.name == ANALYSIS_ENDPOINT || v.name == ANALYSIS_KEY)
            .all(|v| v.set && !v.placeholder);
        ConfigStatus {
            ok: analysis_ready,
            dotenv_present: std::path::Path::new(".env").exists(),
            variables: vars,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VarStatus {
    pub name: String,
    pub set: bool,
    pub placeholder: bool,
    pub length: usize,
}

impl VarStatus {
    fn of(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            set: !value.is_empty(),
            placeholder: is_placeholder(value),
            length: value.chars().count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigStatus {
    /// Analysis credentials are usable.
    pub ok: bool,
    pub dotenv_present: bool,
    pub variables: Vec<VarStatus>,
}

//! Configuration loader and validator for the backup tool.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::source::{RetryPolicy, MAX_PAGE_SIZE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root settings struct mirroring the YAML schema. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub backup: Backup,
    pub retry: Retry,
    pub tumblr: Tumblr,
}

/// Paging and batching sizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Backup {
    pub page_size: u32,
    pub batch_size: usize,
}

impl Default for Backup {
    fn default() -> Self {
        Self {
            page_size: 20,
            batch_size: 20,
        }
    }
}

/// Retry budget for page fetches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Retry {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tumblr {
    pub api_base: String,
}

impl Default for Tumblr {
    fn default() -> Self {
        Self {
            api_base: crate::tumblr::TUMBLR_API_BASE.to_string(),
        }
    }
}

impl Settings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn api_base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.tumblr.api_base)
            .map_err(|_| ConfigError::Invalid("tumblr.api_base must be a valid URL"))
    }
}

/// Load settings from a YAML file and validate them.
/// - If `path` is None, the built-in defaults are used.
pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let settings = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => Settings::default(),
    };
    validate(&settings)?;
    Ok(settings)
}

/// Validate a settings instance.
fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.backup.page_size == 0 || settings.backup.page_size > MAX_PAGE_SIZE {
        return Err(ConfigError::Invalid("backup.page_size must be between 1 and 20"));
    }
    if settings.backup.batch_size == 0 {
        return Err(ConfigError::Invalid("backup.batch_size must be > 0"));
    }
    if settings.retry.max_attempts == 0 {
        return Err(ConfigError::Invalid("retry.max_attempts must be > 0"));
    }
    if settings.retry.max_delay_ms < settings.retry.base_delay_ms {
        return Err(ConfigError::Invalid(
            "retry.max_delay_ms must be >= retry.base_delay_ms",
        ));
    }
    settings.api_base()?;
    Ok(())
}

/// The four API secrets, in key-file order.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub oauth_token: String,
    pub oauth_token_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read a key file holding exactly four lines: consumer key, consumer
    /// secret, OAuth token, OAuth token secret.
    pub fn from_key_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let lines: Vec<&str> = content.trim_end().lines().map(str::trim).collect();
        match lines.as_slice() {
            [ck, cs, tok, ts] if lines.iter().all(|l| !l.is_empty()) => Ok(Self {
                consumer_key: ck.to_string(),
                consumer_secret: cs.to_string(),
                oauth_token: tok.to_string(),
                oauth_token_secret: ts.to_string(),
            }),
            _ => Err(ConfigError::Invalid(
                "key file must contain exactly four non-empty lines",
            )),
        }
    }
}

/// Example YAML with every setting at its default.
pub fn example() -> &'static str {
    r#"backup:
  page_size: 20
  batch_size: 20

retry:
  max_attempts: 3
  base_delay_ms: 500
  max_delay_ms: 10000

tumblr:
  api_base: "https://api.tumblr.com/"
"#
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::secrets::{expand_home, KeySources};

pub const SUPPORTED_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    pub version: String,
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_file: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    pub report_directory: String,
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_resume_limit")]
    pub resume_limit: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_user_id() -> String {
    "local".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_resume_limit() -> u64 {
    50
}

impl ResearchConfig {
    /// Resolves the API key (direct value, key file, or env var). `None`
    /// when no source is configured.
    pub fn api_key(&self) -> Result<Option<SecretString>, ConfigError> {
        let sources = KeySources {
            inline: self.api_key.as_deref(),
            file: self.api_key_file.as_deref(),
            env_var: self.api_key_env_var.as_deref(),
        };
        Ok(sources.resolve()?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn report_directory(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.report_directory))
    }

    /// Configured database path, or `~/.deepresearch/data/deepresearch.db`.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match self.database_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Ok(PathBuf::from(expand_home(path))),
            None => crate::db::default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "No home directory found; set database_path explicitly".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

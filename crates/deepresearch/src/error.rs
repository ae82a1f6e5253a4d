use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Research API error: {0}")]
    Api(#[from] crate::api::ApiError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Invalid research request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to resolve API key: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No free file name for report: {0}")]
    FileExists(PathBuf),

    #[error("Report writer task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, ResearchError>;

//! Research service client errors.

use thiserror::Error;

use crate::sanitize::truncate_chars;

/// Longest response body embedded in an error message.
pub const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid research service URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Connection, TLS or timeout failure.
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-2xx status.
    #[error("Research service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Invalid response from research service: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn status(status: u16, body: &str) -> Self {
        ApiError::Status {
            status,
            body: truncate_body(body),
        }
    }
}

/// Cuts a response body down for inclusion in errors and logs.
pub fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        format!("{}... (truncated)", truncate_chars(body, MAX_ERROR_BODY_LENGTH))
    } else {
        body.to_string()
    }
}

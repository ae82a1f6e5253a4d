//! HTTP client for the research service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::ApiError;
use super::types::{StatusResponse, SubmitRequest, SubmitResponse};
use crate::config::ResearchConfig;
use crate::error::ResearchError;
use crate::sanitize::redact_url;

const SUBMIT_PATH: &[&str] = &["api", "research", "enhanced-submit"];
const STATUS_PATH: &[&str] = &["api", "research", "status"];

/// Operations the lifecycle manager needs from the research service.
#[async_trait]
pub trait ResearchApi: Send + Sync {
    /// Submits a new research job.
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, ApiError>;

    /// Fetches the current status of a job.
    async fn fetch_status(&self, job_id: &str) -> Result<StatusResponse, ApiError>;
}

/// `reqwest`-backed [`ResearchApi`].
pub struct HttpResearchClient {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl HttpResearchClient {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(base_url.trim()).map_err(|_| ApiError::InvalidBaseUrl(redact_url(base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(redact_url(base_url.as_str())));
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(ApiError::ClientBuild)?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn from_config(config: &ResearchConfig) -> Result<Self, ResearchError> {
        let api_key = config.api_key()?;
        Ok(Self::new(
            &config.api_base_url,
            api_key,
            config.connect_timeout(),
            config.request_timeout(),
        )?)
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(redact_url(self.base_url.as_str())))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.text().await.map_err(|e| ApiError::Transport {
            url: redact_url(url.as_str()),
            source: e,
        })?;

        if !status.is_success() {
            return Err(ApiError::status(status.as_u16(), &body));
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Decode {
            url: redact_url(url.as_str()),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ResearchApi for HttpResearchClient {
    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, ApiError> {
        let url = self.endpoint(SUBMIT_PATH)?;
        debug!(url = %redact_url(url.as_str()), documents = request.tagged_documents.len(), "Submitting research job");

        let response = self
            .authorize(self.client.post(url.clone()).json(request))
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                url: redact_url(url.as_str()),
                source: e,
            })?;

        let submitted: SubmitResponse = Self::decode(&url, response).await?;
        if submitted.job_id.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "submit response has no job_id".to_string(),
            ));
        }
        Ok(submitted)
    }

    async fn fetch_status(&self, job_id: &str) -> Result<StatusResponse, ApiError> {
        let mut segments = STATUS_PATH.to_vec();
        segments.push(job_id);
        let url = self.endpoint(&segments)?;

        let response = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| ApiError::Transport {
                url: redact_url(url.as_str()),
                source: e,
            })?;

        Self::decode(&url, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpResearchClient {
        HttpResearchClient::new(base, None, Duration::from_millis(500), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_endpoints() {
        let c = client("https://research.example.com");
        assert_eq!(
            c.endpoint(SUBMIT_PATH).unwrap().as_str(),
            "https://research.example.com/api/research/enhanced-submit"
        );

        let c = client("https://research.example.com/prefix/");
        let mut segments = STATUS_PATH.to_vec();
        segments.push("job 1/2");
        assert_eq!(
            c.endpoint(&segments).unwrap().as_str(),
            "https://research.example.com/prefix/api/research/status/job%201%2F2"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpResearchClient::new("mailto:someone", None, Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(result, Err(ApiError::InvalidBaseUrl(_))));
        let result = HttpResearchClient::new("::", None, Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(result, Err(ApiError::InvalidBaseUrl(_))));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let c = client("http://127.0.0.1:9");
        let result = c.fetch_status("j1").await;
        assert!(matches!(result, Err(ApiError::Transport { .. })));
    }
}

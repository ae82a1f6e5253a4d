//! Wire types for the research service.
//!
//! Responses are decoded leniently: every field is optional and loosely
//! typed fields stay as JSON values until the manager probes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::probe;

/// A tagged document sent along with the instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPayload {
    pub title: String,
    pub path: String,
    pub content: String,
}

/// Body of `POST /api/research/enhanced-submit`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitRequest {
    pub instructions: String,
    pub tagged_documents: Vec<DocumentPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enhancement_config: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitResponse {
    pub success: Option<bool>,
    pub job_id: String,
    pub status: Option<String>,
    pub priority: Option<Value>,
    pub message: Option<String>,
    pub created_at: Option<String>,
    pub estimated_duration: Option<Value>,
}

impl SubmitResponse {
    pub fn priority_label(&self) -> Option<String> {
        self.priority.as_ref().and_then(probe::label)
    }
}

/// Body of `GET /api/research/status/{job_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusResponse {
    pub success: Option<bool>,
    pub job_id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<Value>,
    pub priority: Option<Value>,
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<Value>,
    pub results: Option<Value>,
    pub retry_count: Option<Value>,
    pub max_retries: Option<Value>,
    pub exa_task_id: Option<Value>,
    pub enhanced: Option<bool>,
}

impl StatusResponse {
    /// Remote error rendered as text; objects are serialized.
    pub fn error_text(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("message")
                .and_then(probe::text)
                .or_else(|| Some(Value::Object(map.clone()).to_string())),
            other => Some(other.to_string()),
        }
    }

    pub fn priority_label(&self) -> Option<String> {
        self.priority.as_ref().and_then(probe::label)
    }

    pub fn exa_task_id(&self) -> Option<String> {
        self.exa_task_id.as_ref().and_then(probe::label)
    }
}

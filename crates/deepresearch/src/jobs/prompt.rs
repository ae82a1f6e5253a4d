//! Submission input: the prompt, its optional rewrite, and tagged documents.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::api::{DocumentPayload, SubmitRequest};
use crate::sanitize::truncate_chars;
use crate::secrets::expand_home;

/// Longest document body sent with a job, in characters.
pub const MAX_DOCUMENT_CHARS: usize = 200_000;

/// A local document the user tagged in the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedDocument {
    pub path: String,
    #[serde(default)]
    pub title: String,
    /// Already loaded content. Read from `path` when absent.
    #[serde(default)]
    pub content: Option<String>,
}

impl TaggedDocument {
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: String::new(),
            content: None,
        }
    }

    fn display_title(&self) -> String {
        if !self.title.trim().is_empty() {
            return self.title.trim().to_string();
        }
        Path::new(&self.path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone())
    }
}

/// Optional request settings passed through to the service.
#[derive(Debug, Clone, Default)]
pub struct SubmitMeta {
    /// Overrides the manager's default user.
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub schema: Option<Value>,
    pub priority: Option<String>,
    pub max_retries: Option<u32>,
    pub enhancement_config: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitJob {
    /// What the user typed; stored as the original query.
    pub prompt: String,
    /// Rewritten prompt; sent instead of `prompt` when present.
    pub optimized_prompt: Option<String>,
    pub meta: SubmitMeta,
    pub tagged_documents: Vec<TaggedDocument>,
}

impl SubmitJob {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn instructions(&self) -> &str {
        self.optimized_prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.prompt.trim())
    }

    /// Builds the wire request, loading tagged documents as needed.
    pub async fn to_request(&self) -> SubmitRequest {
        SubmitRequest {
            instructions: self.instructions().to_string(),
            tagged_documents: resolve_documents(&self.tagged_documents).await,
            model: self.meta.model.clone(),
            schema: self.meta.schema.clone(),
            priority: self.meta.priority.clone(),
            max_retries: self.meta.max_retries,
            enhancement_config: self.meta.enhancement_config.clone(),
        }
    }
}

/// Loads document contents. Unreadable documents are skipped with a
/// warning; they never fail the submission.
pub async fn resolve_documents(documents: &[TaggedDocument]) -> Vec<DocumentPayload> {
    let mut resolved = Vec::with_capacity(documents.len());
    for document in documents {
        let content = match &document.content {
            Some(content) => content.clone(),
            None => match tokio::fs::read_to_string(expand_home(&document.path)).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %document.path, error = %e, "Skipping unreadable tagged document");
                    continue;
                }
            },
        };
        resolved.push(DocumentPayload {
            title: document.display_title(),
            path: document.path.clone(),
            content: truncate_chars(&content, MAX_DOCUMENT_CHARS),
        });
    }
    resolved
}

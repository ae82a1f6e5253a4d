//! User-visible notifications about research jobs.
//!
//! Front-ends subscribe and show these as transient messages. Nothing is
//! persisted; a notice sent with no subscriber is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoticeLevel::Info => write!(f, "info"),
            NoticeLevel::Warning => write!(f, "warning"),
            NoticeLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobNotice {
    pub job_id: String,
    pub level: NoticeLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobNotice {
    pub fn new(job_id: &str, level: NoticeLevel, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            level,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct NoticeBroadcaster {
    sender: broadcast::Sender<JobNotice>,
}

impl NoticeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, notice: JobNotice) {
        // no receivers is fine
        let _ = self.sender.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobNotice> {
        self.sender.subscribe()
    }

    pub fn info(&self, job_id: &str, message: &str) {
        self.send(JobNotice::new(job_id, NoticeLevel::Info, message));
    }

    pub fn warn(&self, job_id: &str, message: &str) {
        self.send(JobNotice::new(job_id, NoticeLevel::Warning, message));
    }

    pub fn error(&self, job_id: &str, message: &str) {
        self.send(JobNotice::new(job_id, NoticeLevel::Error, message));
    }
}

impl Default for NoticeBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

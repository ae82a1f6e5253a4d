pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod jobs;
pub mod logging;
pub mod notices;
pub mod probe;
pub mod report;
pub mod sanitize;
pub mod secrets;

pub use api::{ApiError, HttpResearchClient, ResearchApi};
pub use config::{load_config, ResearchConfig};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ReportError, ResearchError, Result};
pub use jobs::{JobManager, JobStatus, ManagerSettings, SubmitJob, TaggedDocument};
pub use notices::{JobNotice, NoticeBroadcaster, NoticeLevel};
pub use report::{MarkdownReportWriter, ReportWriter};
pub use secrets::{KeySources, SecretError};

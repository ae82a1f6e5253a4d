//! Remote job status.

use std::fmt;

/// Status reported by the research service.
///
/// The service sends an open string; unknown values are kept verbatim in
/// [`JobStatus::Other`] and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl JobStatus {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" | "canceled" => JobStatus::Cancelled,
            _ => JobStatus::Other(trimmed.to_string()),
        }
    }

    /// Storage form: lowercase for known statuses, verbatim otherwise.
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for JobStatus {
    fn from(raw: &str) -> Self {
        JobStatus::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::TERMINAL_STATUSES;

    #[test]
    fn test_parse_known_and_unknown() {
        assert_eq!(JobStatus::parse(" Running "), JobStatus::Running);
        assert_eq!(JobStatus::parse("CANCELED"), JobStatus::Cancelled);
        assert_eq!(JobStatus::parse("queued"), JobStatus::Other("queued".to_string()));
        assert_eq!(JobStatus::parse("queued").as_str(), "queued");
    }

    #[test]
    fn test_terminal_statuses_agree_with_storage() {
        for status in ["pending", "running", "completed", "failed", "cancelled", "paused"] {
            assert_eq!(
                JobStatus::parse(status).is_terminal(),
                TERMINAL_STATUSES.contains(&status),
                "{}",
                status
            );
        }
    }
}

//! Events the manager writes itself, as opposed to sub-events ingested
//! from the remote payload.

use serde_json::Value;

use super::ingest::MAX_MESSAGE_CHARS;
use crate::db::EventRow;
use crate::sanitize::truncate_chars;

pub const JOB_SUBMITTED: &str = "job_submitted";
pub const JOB_PROGRESS: &str = "job_progress";
pub const STATUS_ERROR: &str = "status_error";
pub const REPORT_WRITTEN: &str = "report_written";

fn lifecycle_event(
    id: String,
    job_id: &str,
    user_id: &str,
    event_type: &str,
    phase: &str,
    message: String,
    created_at: &str,
) -> EventRow {
    EventRow {
        id,
        job_id: job_id.to_string(),
        user_id: user_id.to_string(),
        event_type: event_type.to_string(),
        phase: phase.to_string(),
        step: None,
        message: truncate_chars(&message, MAX_MESSAGE_CHARS),
        details: None,
        progress: None,
        section_id: None,
        section_title: None,
        section_index: None,
        total_sections: None,
        created_at: created_at.to_string(),
    }
}

/// The one event written when the remote service accepts a job. Its id is
/// derived from the job id so a repeated write is a no-op.
pub fn submitted(job_id: &str, user_id: &str, status: &str, details: Option<&Value>, created_at: &str) -> EventRow {
    EventRow {
        step: Some(status.to_string()),
        details: details.map(Value::to_string),
        progress: Some(0),
        ..lifecycle_event(
            format!("{}:submitted", job_id),
            job_id,
            user_id,
            JOB_SUBMITTED,
            "submit",
            format!("Research job submitted ({})", status),
            created_at,
        )
    }
}

/// Status or progress changed between two polls.
pub fn progress_changed(job_id: &str, user_id: &str, status: &str, progress: Option<i64>, created_at: &str) -> EventRow {
    let message = match progress {
        Some(p) => format!("Status: {} ({}%)", status, p),
        None => format!("Status: {}", status),
    };
    EventRow {
        step: Some(status.to_string()),
        progress,
        ..lifecycle_event(
            uuid::Uuid::new_v4().to_string(),
            job_id,
            user_id,
            JOB_PROGRESS,
            "status",
            message,
            created_at,
        )
    }
}

/// A status fetch failed; the job row was left untouched.
pub fn status_error(job_id: &str, user_id: &str, error: &str, created_at: &str) -> EventRow {
    lifecycle_event(
        uuid::Uuid::new_v4().to_string(),
        job_id,
        user_id,
        STATUS_ERROR,
        "poll",
        format!("Status check failed: {}", error),
        created_at,
    )
}

/// The report note was materialized.
pub fn report_written(job_id: &str, user_id: &str, path: &str, created_at: &str) -> EventRow {
    EventRow {
        details: Some(serde_json::json!({ "path": path }).to_string()),
        progress: Some(100),
        ..lifecycle_event(
            format!("{}:report_written", job_id),
            job_id,
            user_id,
            REPORT_WRITTEN,
            "report",
            "Report note written".to_string(),
            created_at,
        )
    }
}

//! Event repository: append-only log in the `research_events` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A persisted job event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub id: String,
    pub job_id: String,
    pub user_id: String,
    pub event_type: String,
    pub phase: String,
    pub step: Option<String>,
    pub message: String,
    pub details: Option<String>,
    pub progress: Option<i64>,
    pub section_id: Option<String>,
    pub section_title: Option<String>,
    pub section_index: Option<i64>,
    pub total_sections: Option<i64>,
    pub created_at: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            user_id: row.get("user_id")?,
            event_type: row.get("event_type")?,
            phase: row.get("phase")?,
            step: row.get("step")?,
            message: row.get("message")?,
            details: row.get("details")?,
            progress: row.get("progress")?,
            section_id: row.get("section_id")?,
            section_title: row.get("section_title")?,
            section_index: row.get("section_index")?,
            total_sections: row.get("total_sections")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts an event unless one with the same id already exists.
///
/// Returns `true` if a row was written.
pub fn insert_if_absent(db: &Database, event: &EventRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO research_events (id, job_id, user_id, event_type, phase,
             step, message, details, progress, section_id, section_title, section_index,
             total_sections, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                event.id,
                event.job_id,
                event.user_id,
                event.event_type,
                event.phase,
                event.step,
                event.message,
                event.details,
                event.progress,
                event.section_id,
                event.section_title,
                event.section_index,
                event.total_sections,
                event.created_at,
            ],
        )?;
        Ok(inserted == 1)
    })
}

/// Lists a job's events in insertion order.
pub fn list_by_job(db: &Database, job_id: &str) -> Result<Vec<EventRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM research_events WHERE job_id = ?1 ORDER BY seq ASC")?;
        let rows = stmt
            .query_map(params![job_id], EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Counts all events recorded for a job.
pub fn count_by_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM research_events WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Counts a job's events of one type.
pub fn count_by_type(db: &Database, job_id: &str, event_type: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM research_events WHERE job_id = ?1 AND event_type = ?2",
            params![job_id, event_type],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_event(id: &str, job_id: &str, event_type: &str) -> EventRow {
        EventRow {
            id: id.to_string(),
            job_id: job_id.to_string(),
            user_id: "user-1".to_string(),
            event_type: event_type.to_string(),
            phase: "exa".to_string(),
            step: Some("plan-operation".to_string()),
            message: "Search: rust async (runtimes)".to_string(),
            details: None,
            progress: Some(25),
            section_id: None,
            section_title: None,
            section_index: None,
            total_sections: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_insert_if_absent_ignores_duplicates() {
        let db = test_db();
        let event = sample_event("e1", "job-1", "exa_event");

        assert!(insert_if_absent(&db, &event).unwrap());
        assert!(!insert_if_absent(&db, &event).unwrap());

        let mut changed = event.clone();
        changed.message = "different".to_string();
        assert!(!insert_if_absent(&db, &changed).unwrap());

        let rows = list_by_job(&db, "job-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "Search: rust async (runtimes)");
    }

    #[test]
    fn test_list_by_job_keeps_insertion_order() {
        let db = test_db();
        for id in ["z", "a", "m"] {
            insert_if_absent(&db, &sample_event(id, "job-1", "exa_event")).unwrap();
        }
        insert_if_absent(&db, &sample_event("other", "job-2", "exa_event")).unwrap();

        let ids: Vec<String> = list_by_job(&db, "job-1")
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_counts() {
        let db = test_db();
        insert_if_absent(&db, &sample_event("1", "job-1", "job_submitted")).unwrap();
        insert_if_absent(&db, &sample_event("2", "job-1", "job_progress")).unwrap();
        insert_if_absent(&db, &sample_event("3", "job-1", "job_progress")).unwrap();

        assert_eq!(count_by_job(&db, "job-1").unwrap(), 3);
        assert_eq!(count_by_type(&db, "job-1", "job_progress").unwrap(), 2);
        assert_eq!(count_by_type(&db, "job-1", "status_error").unwrap(), 0);
    }
}

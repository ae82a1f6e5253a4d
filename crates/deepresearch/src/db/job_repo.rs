//! Job repository: merge-upsert and queries for the `research_jobs` table.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// Statuses after which the remote service no longer changes a job.
pub const TERMINAL_STATUSES: &[&str] = &["completed", "failed", "cancelled"];

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub user_id: String,
    pub instructions: String,
    pub original_query: Option<String>,
    pub status: String,
    pub progress: Option<i64>,
    pub results: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub processed_markdown: Option<String>,
    pub citation_count: Option<i64>,
    pub sections: Option<String>,
    pub enhanced_content: Option<String>,
    pub current_section_index: Option<i64>,
    pub total_sections: Option<i64>,
    pub exa_research_id: Option<String>,
    pub error: Option<String>,
    pub priority: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub report_note_path: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            instructions: row.get("instructions")?,
            original_query: row.get("original_query")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            results: row.get("results")?,
            title: row.get("title")?,
            summary: row.get("summary")?,
            processed_markdown: row.get("processed_markdown")?,
            citation_count: row.get("citation_count")?,
            sections: row.get("sections")?,
            enhanced_content: row.get("enhanced_content")?,
            current_section_index: row.get("current_section_index")?,
            total_sections: row.get("total_sections")?,
            exa_research_id: row.get("exa_research_id")?,
            error: row.get("error")?,
            priority: row.get("priority")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            report_note_path: row.get("report_note_path")?,
        })
    }

    /// Returns true once the job reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATUSES.contains(&self.status.as_str())
    }
}

/// A partial job write. `None` means "not provided": the existing value is
/// kept, and a fresh row falls back to a type-appropriate default.
#[derive(Debug, Default, Clone)]
pub struct JobUpsert {
    pub id: String,
    pub user_id: Option<String>,
    pub instructions: Option<String>,
    pub original_query: Option<String>,
    pub status: Option<String>,
    pub progress: Option<i64>,
    pub results: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub processed_markdown: Option<String>,
    pub citation_count: Option<i64>,
    pub sections: Option<String>,
    pub enhanced_content: Option<String>,
    pub current_section_index: Option<i64>,
    pub total_sections: Option<i64>,
    pub exa_research_id: Option<String>,
    pub error: Option<String>,
    pub priority: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub report_note_path: Option<String>,
}

impl JobUpsert {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Folds this patch over an existing row (or defaults when there is none).
    pub fn merge(self, existing: Option<JobRow>, now: &str) -> JobRow {
        let base = existing.unwrap_or_else(|| JobRow {
            id: self.id.clone(),
            user_id: String::new(),
            instructions: String::new(),
            original_query: None,
            status: "pending".to_string(),
            progress: None,
            results: None,
            title: None,
            summary: None,
            processed_markdown: None,
            citation_count: None,
            sections: None,
            enhanced_content: None,
            current_section_index: None,
            total_sections: None,
            exa_research_id: None,
            error: None,
            priority: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
            started_at: None,
            completed_at: None,
            report_note_path: None,
        });

        JobRow {
            id: self.id,
            user_id: self.user_id.unwrap_or(base.user_id),
            instructions: self.instructions.unwrap_or(base.instructions),
            original_query: self.original_query.or(base.original_query),
            status: self.status.unwrap_or(base.status),
            progress: self.progress.or(base.progress),
            results: self.results.or(base.results),
            title: self.title.or(base.title),
            summary: self.summary.or(base.summary),
            processed_markdown: self.processed_markdown.or(base.processed_markdown),
            citation_count: self.citation_count.or(base.citation_count),
            sections: self.sections.or(base.sections),
            enhanced_content: self.enhanced_content.or(base.enhanced_content),
            current_section_index: self.current_section_index.or(base.current_section_index),
            total_sections: self.total_sections.or(base.total_sections),
            exa_research_id: self.exa_research_id.or(base.exa_research_id),
            error: self.error.or(base.error),
            priority: self.priority.or(base.priority),
            created_at: self.created_at.unwrap_or(base.created_at),
            updated_at: self.updated_at.unwrap_or_else(|| now.to_string()),
            started_at: self.started_at.or(base.started_at),
            completed_at: self.completed_at.or(base.completed_at),
            report_note_path: self.report_note_path.or(base.report_note_path),
        }
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub user_id: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM research_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Merges `patch` over the stored row and writes the result back.
///
/// The read and the write happen under one connection lock.
pub fn upsert(db: &Database, patch: JobUpsert, now: &str) -> Result<JobRow, DatabaseError> {
    db.with_conn(|conn| {
        let existing = find_in(conn, &patch.id)?;
        let job = patch.merge(existing, now);
        conn.execute(
            "INSERT INTO research_jobs (id, user_id, instructions, original_query, status,
             progress, results, title, summary, processed_markdown, citation_count, sections,
             enhanced_content, current_section_index, total_sections, exa_research_id, error,
             priority, created_at, updated_at, started_at, completed_at, report_note_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19, ?20, ?21, ?22, ?23)
             ON CONFLICT(id) DO UPDATE SET
             user_id=excluded.user_id, instructions=excluded.instructions,
             original_query=excluded.original_query, status=excluded.status,
             progress=excluded.progress, results=excluded.results, title=excluded.title,
             summary=excluded.summary, processed_markdown=excluded.processed_markdown,
             citation_count=excluded.citation_count, sections=excluded.sections,
             enhanced_content=excluded.enhanced_content,
             current_section_index=excluded.current_section_index,
             total_sections=excluded.total_sections, exa_research_id=excluded.exa_research_id,
             error=excluded.error, priority=excluded.priority, created_at=excluded.created_at,
             updated_at=excluded.updated_at, started_at=excluded.started_at,
             completed_at=excluded.completed_at, report_note_path=excluded.report_note_path",
            params![
                job.id,
                job.user_id,
                job.instructions,
                job.original_query,
                job.status,
                job.progress,
                job.results,
                job.title,
                job.summary,
                job.processed_markdown,
                job.citation_count,
                job.sections,
                job.enhanced_content,
                job.current_section_index,
                job.total_sections,
                job.exa_research_id,
                job.error,
                job.priority,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.completed_at,
                job.report_note_path,
            ],
        )?;
        Ok(job)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

/// Default page size for [`query`].
pub const DEFAULT_PAGE_SIZE: u64 = 100;

impl JobFilter {
    /// `WHERE` clause and its positional values.
    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let columns = [
            ("status = ", &self.status),
            ("user_id = ", &self.user_id),
            ("created_at >= ", &self.from_date),
            ("created_at <= ", &self.to_date),
        ];
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        for (predicate, value) in columns {
            if let Some(value) = value {
                values.push(SqlValue::Text(value.clone()));
                clauses.push(format!("{}?{}", predicate, values.len()));
            }
        }
        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// One page of jobs, newest first, plus the unpaginated match count.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    let (where_sql, mut values) = filter.where_clause();
    db.with_conn(|conn| {
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM research_jobs {}", where_sql),
            params_from_iter(values.iter()),
            |r| r.get(0),
        )?;

        values.push(SqlValue::Integer(filter.limit.unwrap_or(DEFAULT_PAGE_SIZE) as i64));
        values.push(SqlValue::Integer(filter.offset.unwrap_or(0) as i64));
        let page_sql = format!(
            "SELECT * FROM research_jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_sql,
            values.len() - 1,
            values.len()
        );
        let mut stmt = conn.prepare(&page_sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    })
}

/// Lists jobs that have not reached a terminal status, most recently
/// updated first.
pub fn list_incomplete(db: &Database, limit: u64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM research_jobs
             WHERE status NOT IN ('completed', 'failed', 'cancelled')
             ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Records the materialized report path, but only if none is set yet.
///
/// Returns `true` when this call set the path.
pub fn set_report_note_path(
    db: &Database,
    id: &str,
    path: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE research_jobs SET report_note_path = ?2, updated_at = ?3
             WHERE id = ?1 AND report_note_path IS NULL",
            params![id, path, updated_at],
        )?;
        Ok(changed == 1)
    })
}

//! Materializes completed research reports as markdown notes.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::JobRow;
use crate::error::ReportError;
use crate::sanitize::sanitize_filename;

/// Title used when neither the job nor the markdown provides one.
pub const FALLBACK_TITLE: &str = "Research report";

/// Maximum numbered variants tried before giving up on a file name.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Everything needed to render one report note.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    pub job_id: String,
    pub title: String,
    pub query: Option<String>,
    pub summary: Option<String>,
    pub created_at: String,
    pub citation_count: Option<i64>,
    pub section_count: Option<usize>,
    pub markdown: String,
}

impl ReportDocument {
    /// Builds a document from a stored job. Returns `None` when the job has
    /// no markdown body.
    pub fn from_job(job: &JobRow) -> Option<Self> {
        let markdown = job
            .processed_markdown
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())?
            .to_string();

        let title = job
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| first_heading(&markdown))
            .unwrap_or_else(|| FALLBACK_TITLE.to_string());

        let section_count = job
            .sections
            .as_deref()
            .and_then(|s| serde_json::from_str::<Vec<serde_json::Value>>(s).ok())
            .map(|sections| sections.len());

        Some(Self {
            job_id: job.id.clone(),
            title,
            query: job
                .original_query
                .clone()
                .or_else(|| Some(job.instructions.clone()))
                .filter(|q| !q.trim().is_empty()),
            summary: job.summary.clone(),
            created_at: job.created_at.clone(),
            citation_count: job.citation_count,
            section_count,
            markdown,
        })
    }

    /// File stem: `<YYYY-MM-DD> <title>`.
    pub fn file_stem(&self) -> String {
        let date = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
            .format("%Y-%m-%d")
            .to_string();
        let title = sanitize_filename(&self.title).unwrap_or_else(|| FALLBACK_TITLE.to_string());
        format!("{} {}", date, title)
    }

    /// Renders the note: front-matter followed by the markdown body.
    pub fn render(&self) -> String {
        let mut out = String::from("---\n");
        out.push_str(&format!("title: {}\n", yaml_quote(&self.title)));
        out.push_str(&format!("research_job: {}\n", yaml_quote(&self.job_id)));
        if let Some(query) = &self.query {
            out.push_str(&format!("query: {}\n", yaml_quote(query)));
        }
        out.push_str(&format!("created: {}\n", yaml_quote(&self.created_at)));
        if let Some(count) = self.citation_count {
            out.push_str(&format!("citations: {}\n", count));
        }
        if let Some(count) = self.section_count {
            out.push_str(&format!("sections: {}\n", count));
        }
        out.push_str("tags:\n  - research\n---\n\n");

        if first_heading(&self.markdown).is_none() {
            out.push_str(&format!("# {}\n\n", self.title));
        }
        if let Some(summary) = self.summary.as_deref().filter(|s| !s.trim().is_empty()) {
            out.push_str(&format!("> {}\n\n", summary.trim().replace('\n', "\n> ")));
        }
        out.push_str(&self.markdown);
        out.push('\n');
        out
    }
}

fn first_heading(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}

fn yaml_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', " "))
}

/// Destination for materialized reports.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    /// Persists the document and returns where it was written.
    async fn write(&self, document: &ReportDocument) -> Result<PathBuf, ReportError>;
}

/// Writes reports as `.md` files into one directory.
pub struct MarkdownReportWriter {
    output_directory: PathBuf,
}

impl MarkdownReportWriter {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }
}

#[async_trait]
impl ReportWriter for MarkdownReportWriter {
    async fn write(&self, document: &ReportDocument) -> Result<PathBuf, ReportError> {
        let dir = self.output_directory.clone();
        let stem = document.file_stem();
        let content = document.render();

        tokio::task::spawn_blocking(move || store_exclusive(&dir, &stem, "md", content.as_bytes()))
            .await
            .map_err(|e| ReportError::TaskFailed(e.to_string()))?
    }
}

/// Creates `<stem>.<ext>` in `dir`, or `<stem>_2.<ext>`, `<stem>_3.<ext>`, …
/// if taken. Uses `create_new` so an existing note is never overwritten.
fn store_exclusive(
    dir: &Path,
    stem: &str,
    extension: &str,
    content: &[u8],
) -> Result<PathBuf, ReportError> {
    std::fs::create_dir_all(dir).map_err(|e| ReportError::CreateDirectory {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for counter in 1..=MAX_NAME_ATTEMPTS {
        let filename = if counter == 1 {
            format!("{}.{}", stem, extension)
        } else {
            format!("{}_{}.{}", stem, counter, extension)
        };
        let path = dir.join(&filename);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                file.write_all(content)
                    .map_err(|e| ReportError::WriteFile {
                        path: path.clone(),
                        source: e,
                    })?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ReportError::WriteFile { path, source: e }),
        }
    }

    Err(ReportError::FileExists(dir.join(format!("{}.{}", stem, extension))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::JobUpsert;

    fn completed_job(markdown: Option<&str>, title: Option<&str>) -> JobRow {
        JobUpsert {
            user_id: Some("u".to_string()),
            instructions: Some("Survey battery chemistries".to_string()),
            status: Some("completed".to_string()),
            title: title.map(str::to_string),
            processed_markdown: markdown.map(str::to_string),
            citation_count: Some(3),
            sections: Some(r#"[{"title":"a"},{"title":"b"}]"#.to_string()),
            created_at: Some("2026-03-04T10:00:00Z".to_string()),
            ..JobUpsert::new("job-9")
        }
        .merge(None, "2026-03-04T10:00:00Z")
    }

    #[test]
    fn test_from_job_requires_markdown() {
        assert!(ReportDocument::from_job(&completed_job(None, Some("T"))).is_none());
        assert!(ReportDocument::from_job(&completed_job(Some("  \n"), Some("T"))).is_none());
    }

    #[test]
    fn test_title_falls_back_to_heading() {
        let doc = ReportDocument::from_job(&completed_job(Some("intro\n# Sodium Ion\nbody"), None)).unwrap();
        assert_eq!(doc.title, "Sodium Ion");

        let doc = ReportDocument::from_job(&completed_job(Some("no heading"), None)).unwrap();
        assert_eq!(doc.title, FALLBACK_TITLE);
    }

    #[test]
    fn test_file_stem_uses_created_date() {
        let doc = ReportDocument::from_job(&completed_job(Some("# R"), Some("Cells: an overview"))).unwrap();
        assert_eq!(doc.file_stem(), "2026-03-04 Cells an overview");
    }

    #[test]
    fn test_render_front_matter() {
        let doc = ReportDocument::from_job(&completed_job(Some("body text"), Some("Say \"hi\""))).unwrap();
        let rendered = doc.render();
        assert!(rendered.starts_with("---\ntitle: \"Say \\\"hi\\\"\"\n"));
        assert!(rendered.contains("research_job: \"job-9\""));
        assert!(rendered.contains("query: \"Survey battery chemistries\""));
        assert!(rendered.contains("citations: 3"));
        assert!(rendered.contains("sections: 2"));
        assert!(rendered.contains("# Say \"hi\"\n\nbody text\n"));
    }

    #[tokio::test]
    async fn test_markdown_writer_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MarkdownReportWriter::new(dir.path().join("notes"));
        let doc = ReportDocument::from_job(&completed_job(Some("# R\nbody"), Some("Report"))).unwrap();

        let first = writer.write(&doc).await.unwrap();
        let second = writer.write(&doc).await.unwrap();

        assert_ne!(first, second);
        assert!(first.ends_with("2026-03-04 Report.md"));
        assert!(second.ends_with("2026-03-04 Report_2.md"));
        let content = std::fs::read_to_string(&first).unwrap();
        assert!(content.contains("# R\nbody"));
    }
}

//! Report extraction and materialization.

pub mod extract;
pub mod writer;

pub use extract::{extract_from_normalized, extract_report, ExtractedReportData};
pub use writer::{MarkdownReportWriter, ReportDocument, ReportWriter};

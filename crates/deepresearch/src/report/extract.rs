//! Canonical report extraction from a job's `results` payload.
//!
//! Extraction never fails: malformed or unexpected payloads degrade to
//! `None` fields.

use serde::Serialize;
use serde_json::Value;

use crate::probe::{self, first};

/// Keys that may hold the report object, in probe order. The payload root
/// is used when none of them holds an object.
pub const REPORT_CONTAINER_KEYS: &[&str] = &["final_report", "finalReport", "report", "final", "result"];

pub const TITLE_KEYS: &[&str] = &["title", "report_title", "reportTitle"];
pub const SUMMARY_KEYS: &[&str] = &["summary", "executive_summary", "executiveSummary", "abstract"];
pub const MARKDOWN_KEYS: &[&str] = &["processed_markdown", "processedMarkdown", "markdown", "content", "report"];
pub const CITATION_COUNT_KEYS: &[&str] = &["citation_count", "citationCount", "citations_count"];
pub const CITATIONS_KEYS: &[&str] = &["citations"];
pub const SECTIONS_KEYS: &[&str] = &["sections"];
pub const ENHANCED_CONTENT_KEYS: &[&str] = &["enhanced_content", "enhancedContent"];
pub const CURRENT_SECTION_KEYS: &[&str] = &["current_section_index", "currentSectionIndex"];
pub const TOTAL_SECTIONS_KEYS: &[&str] = &["total_sections", "totalSections"];
pub const RESEARCH_ID_KEYS: &[&str] = &["exa_research_id", "exaResearchId", "research_id", "researchId"];

/// Report fields pulled out of a `results` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedReportData {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub processed_markdown: Option<String>,
    pub citation_count: Option<i64>,
    pub sections: Option<Vec<Value>>,
    pub enhanced_content: Option<String>,
    pub current_section_index: Option<i64>,
    pub total_sections: Option<i64>,
    pub research_id: Option<String>,
}

impl ExtractedReportData {
    /// Sections serialized for storage.
    pub fn sections_json(&self) -> Option<String> {
        self.sections
            .as_ref()
            .and_then(|sections| serde_json::to_string(sections).ok())
    }

    /// Markdown body with surrounding whitespace removed, if any remains.
    pub fn markdown(&self) -> Option<&str> {
        self.processed_markdown
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

/// Locates the report object inside a normalized payload.
pub fn locate_report(root: &Value) -> &Value {
    first(root, REPORT_CONTAINER_KEYS, probe::object).unwrap_or(root)
}

/// Extracts the canonical report from a raw `results` value (string,
/// object, or absent).
pub fn extract_report(raw: Option<&Value>) -> ExtractedReportData {
    match probe::normalize_results(raw) {
        Some(root) => extract_from_normalized(&root),
        None => ExtractedReportData::default(),
    }
}

/// Extracts the canonical report from an already normalized payload.
///
/// Each field is probed on the report object first, then on the payload
/// root.
pub fn extract_from_normalized(root: &Value) -> ExtractedReportData {
    let report = locate_report(root);
    let both = [report, root];
    let scopes: &[&Value] = if std::ptr::eq(report, root) {
        &both[..1]
    } else {
        &both
    };

    let lookup = |keys: &[&str], accessor: fn(&Value) -> Option<String>| {
        scopes.iter().find_map(|scope| first(scope, keys, accessor))
    };
    let lookup_int = |keys: &[&str]| scopes.iter().find_map(|scope| first(scope, keys, probe::integer));

    let citation_count = lookup_int(CITATION_COUNT_KEYS).or_else(|| {
        scopes
            .iter()
            .find_map(|scope| first(scope, CITATIONS_KEYS, probe::array))
            .map(|citations| citations.len() as i64)
    });

    let sections = scopes
        .iter()
        .find_map(|scope| first(scope, SECTIONS_KEYS, probe::array))
        .cloned();

    ExtractedReportData {
        title: lookup(TITLE_KEYS, probe::text),
        summary: lookup(SUMMARY_KEYS, probe::text),
        processed_markdown: lookup(MARKDOWN_KEYS, probe::text),
        citation_count,
        sections,
        enhanced_content: lookup(ENHANCED_CONTENT_KEYS, probe::text),
        current_section_index: lookup_int(CURRENT_SECTION_KEYS),
        total_sections: lookup_int(TOTAL_SECTIONS_KEYS),
        research_id: lookup(RESEARCH_ID_KEYS, probe::label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_never_panics_on_odd_inputs() {
        let inputs = [
            None,
            Some(Value::Null),
            Some(json!("{not json")),
            Some(json!([1, 2, 3])),
            Some(json!(42)),
            Some(json!({"report": {"report": {"report": {"final": [null]}}}})),
            Some(json!({"final_report": null, "markdown": 7})),
        ];
        for input in inputs {
            let _ = extract_report(input.as_ref());
        }
    }

    #[test]
    fn test_absent_results_yield_empty_report() {
        assert_eq!(extract_report(None), ExtractedReportData::default());
        assert_eq!(extract_report(Some(&json!([1, 2]))), ExtractedReportData::default());
    }

    #[test]
    fn test_invalid_json_string_becomes_markdown() {
        let data = extract_report(Some(&json!("# Findings\nplain text")));
        assert_eq!(data.processed_markdown.as_deref(), Some("# Findings\nplain text"));
        assert_eq!(data.title, None);
    }

    #[test]
    fn test_json_string_is_parsed() {
        let raw = json!(r##"{"final_report":{"title":"Encoded","markdown":"# Body"}}"##);
        let data = extract_report(Some(&raw));
        assert_eq!(data.title.as_deref(), Some("Encoded"));
        assert_eq!(data.processed_markdown.as_deref(), Some("# Body"));
    }

    #[test]
    fn test_container_probe_order() {
        let raw = json!({
            "result": {"title": "from result"},
            "finalReport": {"title": "from finalReport"},
            "final_report": null,
        });
        let data = extract_report(Some(&raw));
        assert_eq!(data.title.as_deref(), Some("from finalReport"));
    }

    #[test]
    fn test_report_string_at_root_is_markdown() {
        let raw = json!({"report": "# Inline report", "title": "Root title"});
        let data = extract_report(Some(&raw));
        assert_eq!(data.processed_markdown.as_deref(), Some("# Inline report"));
        assert_eq!(data.title.as_deref(), Some("Root title"));
    }

    #[test]
    fn test_markdown_synonyms_in_order() {
        let raw = json!({"report": {"content": "c", "processedMarkdown": "pm", "markdown": "m"}});
        let data = extract_report(Some(&raw));
        assert_eq!(data.processed_markdown.as_deref(), Some("pm"));
    }

    #[test]
    fn test_fields_fall_back_to_root() {
        let raw = json!({
            "report": {"markdown": "# Body", "title": "T"},
            "summary": "Short summary",
            "citations": [{"url": "a"}, {"url": "b"}],
            "total_sections": 4,
        });
        let data = extract_report(Some(&raw));
        assert_eq!(data.title.as_deref(), Some("T"));
        assert_eq!(data.summary.as_deref(), Some("Short summary"));
        assert_eq!(data.citation_count, Some(2));
        assert_eq!(data.total_sections, Some(4));
    }

    #[test]
    fn test_explicit_citation_count_beats_array_length() {
        let raw = json!({"citationCount": 9, "citations": [1, 2]});
        assert_eq!(extract_report(Some(&raw)).citation_count, Some(9));
        assert_eq!(extract_report(Some(&json!({"citations": "x"}))).citation_count, None);
    }

    #[test]
    fn test_wrong_types_resolve_to_none() {
        let raw = json!({"title": 12, "summary": ["a"], "sections": {"a": 1}, "total_sections": "many"});
        let data = extract_report(Some(&raw));
        assert_eq!(data.title, None);
        assert_eq!(data.summary, None);
        assert_eq!(data.sections, None);
        assert_eq!(data.total_sections, None);
    }

    #[test]
    fn test_sections_and_research_id() {
        let raw = json!({
            "final": {
                "sections": [{"title": "Intro"}, {"title": "Market"}],
                "currentSectionIndex": 1,
                "researchId": 991,
                "enhancedContent": "extra"
            }
        });
        let data = extract_report(Some(&raw));
        assert_eq!(data.sections.as_ref().map(Vec::len), Some(2));
        assert_eq!(data.sections_json().unwrap(), r#"[{"title":"Intro"},{"title":"Market"}]"#);
        assert_eq!(data.current_section_index, Some(1));
        assert_eq!(data.research_id.as_deref(), Some("991"));
        assert_eq!(data.enhanced_content.as_deref(), Some("extra"));
    }

    #[test]
    fn test_markdown_accessor_trims() {
        let data = ExtractedReportData {
            processed_markdown: Some("  \n ".to_string()),
            ..Default::default()
        };
        assert_eq!(data.markdown(), None);
    }
}

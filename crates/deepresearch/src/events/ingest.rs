//! Turns the raw sub-event array of a status payload into event rows.
//!
//! Ingestion is cursor based: the caller passes how many raw events it
//! already processed for the job and gets back the new cursor. Rows without
//! a server id get a content-derived id, so reprocessing the same array
//! yields the same ids and the store drops the duplicates.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::legacy::{self, LegacyEvent};
use crate::db::{event_repo, Database, DatabaseError, EventRow};
use crate::probe::{self, first};
use crate::sanitize::truncate_chars;

/// Event messages are cut to this many characters.
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Containers probed (in order) for a nested `events` array when the
/// payload has none at the top level.
pub const EVENT_CONTAINER_KEYS: &[&str] = &[
    "data",
    "result",
    "results",
    "payload",
    "final_report",
    "finalReport",
    "final",
    "report",
    "value",
];

pub const LEGACY_EVENT_TYPE: &str = "exa_event";
pub const LEGACY_PHASE: &str = "exa";

const ID_KEYS: &[&str] = &["id", "event_id", "eventId"];
const SECTION_ID_KEYS: &[&str] = &["section_id", "sectionId"];
const SECTION_TITLE_KEYS: &[&str] = &["section_title", "sectionTitle"];
const SECTION_INDEX_KEYS: &[&str] = &["section_index", "sectionIndex"];
const TOTAL_SECTIONS_KEYS: &[&str] = &["total_sections", "totalSections"];
const TIMESTAMP_KEYS: &[&str] = &["created_at", "createdAt", "timestamp", "time"];

/// Epoch values at or above this are milliseconds, below it seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

/// Identifies the job a batch of raw events belongs to.
#[derive(Debug, Clone, Copy)]
pub struct IngestContext<'a> {
    pub job_id: &'a str,
    pub user_id: &'a str,
    /// Timestamp of the poll, used for events that carry none.
    pub polled_at: &'a str,
}

/// Result of one ingestion pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Length of the candidate array; the cursor for the next poll.
    pub candidates: usize,
    /// Raw events examined in this pass.
    pub processed: usize,
    /// Rows actually written.
    pub inserted: usize,
}

impl IngestOutcome {
    pub fn next_cursor(&self) -> usize {
        self.candidates
    }
}

fn events_array(container: &Value) -> Option<Vec<Value>> {
    match container.get("events")? {
        Value::Array(events) => Some(events.clone()),
        Value::String(text) => serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.as_array().cloned()),
        _ => None,
    }
}

/// Finds the raw event array in a normalized payload. Returns an empty list
/// when there is none.
pub fn extract_event_candidates(root: &Value) -> Vec<Value> {
    if let Some(events) = events_array(root) {
        return events;
    }
    EVENT_CONTAINER_KEYS
        .iter()
        .filter_map(|key| root.get(*key))
        .find_map(|container| match container {
            Value::String(text) => serde_json::from_str::<Value>(text)
                .ok()
                .and_then(|decoded| events_array(&decoded)),
            other => events_array(other),
        })
        .unwrap_or_default()
}

/// Index of the first raw event to process. An absent or out-of-range
/// cursor restarts from the beginning.
pub fn cursor_start(cursor: Option<usize>, len: usize) -> usize {
    match cursor {
        Some(c) if c < len => c,
        _ => 0,
    }
}

/// Normalizes an ISO-8601 string or a numeric epoch (seconds or
/// milliseconds) into an ISO-8601 string.
pub fn normalize_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if DateTime::parse_from_rfc3339(trimmed).is_ok()
                || NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            {
                Some(trimmed.to_string())
            } else {
                trimmed.parse::<f64>().ok().and_then(epoch_to_iso)
            }
        }
        Value::Number(n) => n.as_f64().and_then(epoch_to_iso),
        _ => None,
    }
}

fn epoch_to_iso(value: f64) -> Option<String> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = if value >= MILLIS_THRESHOLD {
        value
    } else {
        value * 1000.0
    };
    DateTime::<Utc>::from_timestamp_millis(millis.round() as i64)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn source_timestamp(raw: &Value) -> Option<String> {
    first(raw, TIMESTAMP_KEYS, normalize_timestamp)
}

fn details_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn raw_str(raw: &Value, key: &str) -> String {
    raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn is_normalized_shape(raw: &Value) -> bool {
    ["type", "phase", "message"]
        .iter()
        .all(|key| raw.get(*key).is_some_and(Value::is_string))
}

/// Stable id for an event without a server id.
///
/// Covers the normalized fields, the source timestamp (never the poll
/// fallback) and the position in the raw array.
pub fn derive_event_id(event: &EventRow, source_timestamp: Option<&str>, index: usize) -> String {
    let details_hash = hex::encode(Sha256::digest(event.details.as_deref().unwrap_or("").as_bytes()));
    let index = index.to_string();
    let fields = [
        event.job_id.as_str(),
        event.event_type.as_str(),
        event.phase.as_str(),
        event.step.as_deref().unwrap_or(""),
        event.message.as_str(),
        source_timestamp.unwrap_or(""),
        details_hash.as_str(),
        index.as_str(),
    ];

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update([0x1f_u8]);
    }
    let digest = hex::encode(hasher.finalize());
    format!("evt_{}", &digest[..32])
}

/// Converts one raw event into a row. Returns `None` for non-objects and
/// for events whose message is blank.
pub fn normalize_event(raw: &Value, index: usize, ctx: &IngestContext<'_>) -> Option<EventRow> {
    raw.as_object()?;

    let explicit_progress = probe::clamp_progress(raw.get("progress"));
    let (event_type, phase, step, message, details, progress) = if is_normalized_shape(raw) {
        (
            raw_str(raw, "type"),
            raw_str(raw, "phase"),
            first(raw, &["step"], probe::label),
            raw_str(raw, "message"),
            details_text(raw.get("details")),
            explicit_progress,
        )
    } else {
        let interpretation = LegacyEvent::from_raw(raw).interpret();
        (
            LEGACY_EVENT_TYPE.to_string(),
            LEGACY_PHASE.to_string(),
            Some(legacy::event_type_of(raw)),
            interpretation.message,
            Some(raw.to_string()),
            explicit_progress.or(interpretation.progress),
        )
    };

    if message.trim().is_empty() {
        return None;
    }

    let source_ts = source_timestamp(raw);
    let mut event = EventRow {
        id: String::new(),
        job_id: ctx.job_id.to_string(),
        user_id: ctx.user_id.to_string(),
        event_type,
        phase,
        step,
        message: truncate_chars(&message, MAX_MESSAGE_CHARS),
        details,
        progress,
        section_id: first(raw, SECTION_ID_KEYS, probe::label),
        section_title: first(raw, SECTION_TITLE_KEYS, probe::text),
        section_index: first(raw, SECTION_INDEX_KEYS, probe::integer),
        total_sections: first(raw, TOTAL_SECTIONS_KEYS, probe::integer),
        created_at: source_ts.clone().unwrap_or_else(|| ctx.polled_at.to_string()),
    };

    event.id = match first(raw, ID_KEYS, probe::label) {
        Some(id) => id.trim().to_string(),
        None => derive_event_id(&event, source_ts.as_deref(), index),
    };
    Some(event)
}

/// Normalizes the raw events from the cursor onward.
pub fn prepare_events(candidates: &[Value], cursor: Option<usize>, ctx: &IngestContext<'_>) -> Vec<EventRow> {
    let start = cursor_start(cursor, candidates.len());
    candidates
        .iter()
        .enumerate()
        .skip(start)
        .filter_map(|(index, raw)| normalize_event(raw, index, ctx))
        .collect()
}

/// Ingests the sub-events of a normalized payload for one job.
pub fn ingest_events(
    db: &Database,
    root: Option<&Value>,
    cursor: Option<usize>,
    ctx: &IngestContext<'_>,
) -> Result<IngestOutcome, DatabaseError> {
    let candidates = root.map(extract_event_candidates).unwrap_or_default();
    let start = cursor_start(cursor, candidates.len());
    let events = prepare_events(&candidates, cursor, ctx);

    let mut inserted = 0;
    for event in &events {
        if event_repo::insert_if_absent(db, event)? {
            inserted += 1;
        }
    }

    let outcome = IngestOutcome {
        candidates: candidates.len(),
        processed: candidates.len() - start,
        inserted,
    };
    if outcome.processed > 0 {
        debug!(
            job_id = ctx.job_id,
            start,
            processed = outcome.processed,
            inserted,
            "Ingested research events"
        );
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CTX: IngestContext<'static> = IngestContext {
        job_id: "job-1",
        user_id: "user-1",
        polled_at: "2026-02-01T12:00:00.000Z",
    };

    #[test]
    fn test_candidates_top_level_first() {
        let root = json!({"events": [1], "data": {"events": [1, 2]}});
        assert_eq!(extract_event_candidates(&root).len(), 1);
    }

    #[test]
    fn test_candidates_nested_and_encoded() {
        let root = json!({"payload": {"events": [{"a": 1}, {"b": 2}]}});
        assert_eq!(extract_event_candidates(&root).len(), 2);

        let root = json!({"value": "{\"events\":[{\"a\":1}]}"});
        assert_eq!(extract_event_candidates(&root).len(), 1);

        let root = json!({"data": {"events": "nope"}, "report": {"events": [{}]}});
        assert_eq!(extract_event_candidates(&root).len(), 1);
    }

    #[test]
    fn test_candidates_missing() {
        assert!(extract_event_candidates(&json!({"markdown": "x"})).is_empty());
        assert!(extract_event_candidates(&json!([{"events": []}])).is_empty());
        assert!(extract_event_candidates(&json!("events")).is_empty());
    }

    #[test]
    fn test_cursor_start() {
        assert_eq!(cursor_start(None, 5), 0);
        assert_eq!(cursor_start(Some(3), 5), 3);
        assert_eq!(cursor_start(Some(5), 5), 0);
        assert_eq!(cursor_start(Some(9), 5), 0);
        assert_eq!(cursor_start(Some(0), 0), 0);
    }

    #[test]
    fn test_normalize_timestamp() {
        assert_eq!(
            normalize_timestamp(&json!("2024-01-01T00:00:00Z")).as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(
            normalize_timestamp(&json!(1_704_067_200)).as_deref(),
            Some("2024-01-01T00:00:00.000Z")
        );
        assert_eq!(
            normalize_timestamp(&json!(1_704_067_200_500_i64)).as_deref(),
            Some("2024-01-01T00:00:00.500Z")
        );
        assert_eq!(
            normalize_timestamp(&json!("1704067200")).as_deref(),
            Some("2024-01-01T00:00:00.000Z")
        );
        assert_eq!(normalize_timestamp(&json!("yesterday")), None);
        assert_eq!(normalize_timestamp(&json!(-1)), None);
        assert_eq!(normalize_timestamp(&Value::Null), None);
    }

    #[test]
    fn test_normalized_shape_passes_through() {
        let raw = json!({
            "type": "section_update",
            "phase": "writing",
            "step": 2,
            "message": "  Drafting market section  ",
            "details": {"words": 120},
            "progress": 150,
            "sectionId": "s2",
            "section_title": "Market",
            "sectionIndex": "1",
            "totalSections": 4,
            "timestamp": 1_704_067_200_000_i64
        });
        let event = normalize_event(&raw, 0, &CTX).unwrap();
        assert_eq!(event.event_type, "section_update");
        assert_eq!(event.phase, "writing");
        assert_eq!(event.step.as_deref(), Some("2"));
        assert_eq!(event.message, "  Drafting market section  ");
        assert_eq!(event.details.as_deref(), Some(r#"{"words":120}"#));
        assert_eq!(event.progress, Some(100));
        assert_eq!(event.section_id.as_deref(), Some("s2"));
        assert_eq!(event.section_title.as_deref(), Some("Market"));
        assert_eq!(event.section_index, Some(1));
        assert_eq!(event.total_sections, Some(4));
        assert_eq!(event.created_at, "2024-01-01T00:00:00.000Z");
        assert!(event.id.starts_with("evt_"));
    }

    #[test]
    fn test_blank_type_and_phase_kept() {
        let raw = json!({"type": "note", "phase": "", "message": "Outline ready"});
        let event = normalize_event(&raw, 0, &CTX).unwrap();
        assert_eq!(event.event_type, "note");
        assert_eq!(event.phase, "");
        assert_eq!(event.message, "Outline ready");

        let raw = json!({"type": " ", "phase": "planning", "message": "Plan drafted"});
        let event = normalize_event(&raw, 0, &CTX).unwrap();
        assert_eq!(event.event_type, " ");
        assert_eq!(event.phase, "planning");
    }

    #[test]
    fn test_message_truncated() {
        let raw = json!({"type": "t", "phase": "p", "message": "x".repeat(800)});
        let event = normalize_event(&raw, 0, &CTX).unwrap();
        assert_eq!(event.message.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_blank_message_dropped() {
        let raw = json!({"type": "t", "phase": "p", "message": "   "});
        assert!(normalize_event(&raw, 0, &CTX).is_none());
        assert!(normalize_event(&json!("loose string"), 0, &CTX).is_none());
    }

    #[test]
    fn test_legacy_shape() {
        let raw = json!({"eventType": "plan-operation", "data": {"type": "search", "query": "foo", "goal": "bar"}});
        let event = normalize_event(&raw, 0, &CTX).unwrap();
        assert_eq!(event.event_type, LEGACY_EVENT_TYPE);
        assert_eq!(event.phase, LEGACY_PHASE);
        assert_eq!(event.step.as_deref(), Some("plan-operation"));
        assert!(event.message.contains("Search: foo (bar)"));
        assert_eq!(event.progress, Some(25));
        assert_eq!(event.created_at, CTX.polled_at);
        assert!(event.details.unwrap().contains("\"goal\":\"bar\""));
    }

    #[test]
    fn test_explicit_progress_overrides_heuristic() {
        let raw = json!({"eventType": "task-output", "progress": "33"});
        assert_eq!(normalize_event(&raw, 0, &CTX).unwrap().progress, Some(33));
    }

    #[test]
    fn test_server_id_wins() {
        let raw = json!({"id": 77, "type": "t", "phase": "p", "message": "m"});
        assert_eq!(normalize_event(&raw, 0, &CTX).unwrap().id, "77");
    }

    #[test]
    fn test_derived_ids_are_stable_and_positional() {
        let raw = json!({"type": "t", "phase": "p", "message": "same"});
        let a = normalize_event(&raw, 0, &CTX).unwrap();
        let b = normalize_event(&raw, 0, &CTX).unwrap();
        let c = normalize_event(&raw, 1, &CTX).unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);

        let other_poll = IngestContext {
            polled_at: "2026-02-01T12:05:00.000Z",
            ..CTX
        };
        assert_eq!(normalize_event(&raw, 0, &other_poll).unwrap().id, a.id);
    }

    #[test]
    fn test_prepare_events_from_cursor() {
        let candidates: Vec<Value> = (0..5)
            .map(|i| json!({"type": "t", "phase": "p", "message": format!("event {}", i)}))
            .collect();
        let messages: Vec<String> = prepare_events(&candidates, Some(3), &CTX)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["event 3", "event 4"]);

        assert_eq!(prepare_events(&candidates, Some(5), &CTX).len(), 5);
        assert_eq!(prepare_events(&candidates, None, &CTX).len(), 5);
    }

    #[test]
    fn test_ingest_events_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let root = json!({"events": [
            {"type": "t", "phase": "p", "message": "one"},
            {"eventType": "plan-definition"},
            {"type": "t", "phase": "p", "message": ""}
        ]});

        let first_pass = ingest_events(&db, Some(&root), None, &CTX).unwrap();
        assert_eq!(first_pass.candidates, 3);
        assert_eq!(first_pass.inserted, 2);
        assert_eq!(first_pass.next_cursor(), 3);

        let second_pass = ingest_events(&db, Some(&root), None, &CTX).unwrap();
        assert_eq!(second_pass.inserted, 0);
        assert_eq!(event_repo::count_by_job(&db, "job-1").unwrap(), 2);
    }

    #[test]
    fn test_ingest_without_payload() {
        let db = Database::open_in_memory().unwrap();
        let outcome = ingest_events(&db, None, Some(4), &CTX).unwrap();
        assert_eq!(outcome, IngestOutcome::default());
    }
}

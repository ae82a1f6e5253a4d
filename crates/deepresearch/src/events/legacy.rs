//! Heuristic interpretation of legacy research-service events.
//!
//! Older service versions emit `{eventType, data}` objects with no message
//! or phase. Each known subtype maps to a message template and a progress
//! milestone; anything else falls back to a generic message.

use serde_json::Value;

use crate::probe::{self, first};

pub const EVENT_TYPE_KEYS: &[&str] = &["eventType", "event_type", "type"];
pub const PAYLOAD_KEYS: &[&str] = &["data", "payload"];
const THOUGHT_KEYS: &[&str] = &["thought", "thinking", "text", "content"];
const QUERY_KEYS: &[&str] = &["query", "q"];
const GOAL_KEYS: &[&str] = &["goal", "purpose"];
const URL_KEYS: &[&str] = &["url", "link"];
const OUTPUT_KEYS: &[&str] = &["summary", "text", "content", "output"];
const INSTRUCTION_KEYS: &[&str] = &["instructions", "title", "description"];

/// An operation embedded in a plan or task event.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Think { thought: Option<String> },
    Search { query: Option<String>, goal: Option<String> },
    Crawl { url: Option<String> },
    Other { kind: Option<String> },
}

impl Operation {
    fn from_payload(payload: Option<&Value>) -> Self {
        let Some(payload) = payload else {
            return Operation::Other { kind: None };
        };
        let kind = first(payload, &["type", "operation"], probe::text);
        match kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("think") | Some("thinking") | Some("thought") => Operation::Think {
                thought: first(payload, THOUGHT_KEYS, probe::text),
            },
            Some("search") => Operation::Search {
                query: first(payload, QUERY_KEYS, probe::text),
                goal: first(payload, GOAL_KEYS, probe::text),
            },
            Some("crawl") | Some("fetch") => Operation::Crawl {
                url: first(payload, URL_KEYS, probe::text).or_else(|| {
                    first(payload, &["result"], probe::object)
                        .and_then(|result| first(result, URL_KEYS, probe::text))
                }),
            },
            _ => Operation::Other { kind },
        }
    }

    fn describe(&self) -> String {
        match self {
            Operation::Think { thought: Some(t) } => format!("Thinking: {}", t.trim()),
            Operation::Think { thought: None } => "Thinking".to_string(),
            Operation::Search { query: Some(q), goal: Some(g) } => {
                format!("Search: {} ({})", q.trim(), g.trim())
            }
            Operation::Search { query: Some(q), goal: None } => format!("Search: {}", q.trim()),
            Operation::Search { query: None, .. } => "Searching".to_string(),
            Operation::Crawl { url: Some(u) } => format!("Crawl: {}", u.trim()),
            Operation::Crawl { url: None } => "Crawling".to_string(),
            Operation::Other { kind: Some(k) } => format!("Operation: {}", k),
            Operation::Other { kind: None } => "Working".to_string(),
        }
    }
}

/// Known legacy event subtypes.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyEvent {
    PlanDefinition,
    PlanOperation(Operation),
    PlanOutput { summary: Option<String> },
    TaskDefinition { instructions: Option<String> },
    TaskOperation(Operation),
    TaskOutput { summary: Option<String> },
    Unknown { event_type: String },
}

/// Message and progress estimate for one legacy event.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub message: String,
    pub progress: Option<i64>,
}

/// Subtype label of a raw legacy event (`"unknown"` when absent).
pub fn event_type_of(raw: &Value) -> String {
    first(raw, EVENT_TYPE_KEYS, probe::text).unwrap_or_else(|| "unknown".to_string())
}

impl LegacyEvent {
    pub fn from_raw(raw: &Value) -> Self {
        let event_type = event_type_of(raw);
        let payload = first(raw, PAYLOAD_KEYS, probe::object);
        let payload_text = |keys: &[&str]| payload.and_then(|p| first(p, keys, probe::text));

        match event_type.to_ascii_lowercase().replace('_', "-").as_str() {
            "plan-definition" => LegacyEvent::PlanDefinition,
            "plan-operation" => LegacyEvent::PlanOperation(Operation::from_payload(payload)),
            "plan-output" => LegacyEvent::PlanOutput {
                summary: payload_text(OUTPUT_KEYS),
            },
            "task-definition" => LegacyEvent::TaskDefinition {
                instructions: payload_text(INSTRUCTION_KEYS),
            },
            "task-operation" => LegacyEvent::TaskOperation(Operation::from_payload(payload)),
            "task-output" => LegacyEvent::TaskOutput {
                summary: payload_text(OUTPUT_KEYS),
            },
            _ => LegacyEvent::Unknown { event_type },
        }
    }

    /// Message template and progress milestone for this event.
    pub fn interpret(&self) -> Interpretation {
        let (message, progress) = match self {
            LegacyEvent::PlanDefinition => ("Planning research".to_string(), Some(10)),
            LegacyEvent::PlanOperation(op) => {
                let progress = match op {
                    Operation::Think { .. } => 15,
                    Operation::Search { .. } => 25,
                    Operation::Crawl { .. } => 55,
                    Operation::Other { .. } => 20,
                };
                (op.describe(), Some(progress))
            }
            LegacyEvent::PlanOutput { summary } => (
                with_detail("Research plan ready", summary.as_deref()),
                Some(40),
            ),
            LegacyEvent::TaskDefinition { instructions } => {
                (with_detail("Task defined", instructions.as_deref()), Some(60))
            }
            LegacyEvent::TaskOperation(op) => {
                let progress = match op {
                    Operation::Think { .. } => 20,
                    Operation::Search { .. } => 65,
                    Operation::Crawl { .. } => 80,
                    Operation::Other { .. } => 70,
                };
                (op.describe(), Some(progress))
            }
            LegacyEvent::TaskOutput { summary } => {
                (with_detail("Task completed", summary.as_deref()), Some(90))
            }
            LegacyEvent::Unknown { event_type } => (format!("Research event: {}", event_type), None),
        };
        Interpretation { message, progress }
    }
}

fn with_detail(prefix: &str, detail: Option<&str>) -> String {
    match detail.map(str::trim).filter(|d| !d.is_empty()) {
        Some(detail) => format!("{}: {}", prefix, detail),
        None => prefix.to_string(),
    }
}

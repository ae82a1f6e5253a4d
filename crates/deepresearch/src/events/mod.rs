//! Event ingestion: raw sub-events from status payloads plus the
//! manager's own lifecycle events.

pub mod ingest;
pub mod legacy;
pub mod lifecycle;

pub use ingest::{
    extract_event_candidates, ingest_events, normalize_event, normalize_timestamp, IngestContext,
    IngestOutcome,
};
pub use legacy::{LegacyEvent, Operation};

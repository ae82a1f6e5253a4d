//! Research job lifecycle: submission, polling, and report materialization.

pub mod manager;
pub mod prompt;
pub mod state_cache;
pub mod status;

pub use manager::{backoff_delay, JobManager, ManagerSettings, TickOutcome, MIN_POLL_INTERVAL};
pub use prompt::{SubmitJob, SubmitMeta, TaggedDocument};
pub use state_cache::{JobSnapshot, JobStateCache};
pub use status::JobStatus;

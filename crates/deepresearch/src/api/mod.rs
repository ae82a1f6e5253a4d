//! Remote research service interface.

pub mod client;
pub mod error;
pub mod types;

pub use client::{HttpResearchClient, ResearchApi};
pub use error::ApiError;
pub use types::{DocumentPayload, StatusResponse, SubmitRequest, SubmitResponse};

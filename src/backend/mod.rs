// Scrape backend - job-start and job-status endpoints
//
// The backend scraping engine is a remote service; this module only knows how
// to launch a job and ask how it is going.

pub mod client;
pub mod errors;
pub mod types;

use async_trait::async_trait;

use crate::jobs::types::{JobKind, StartAck, StatusReport};

pub use client::HttpScrapeBackend;
pub use errors::BackendError;
pub use types::{StartRequest, StatusQuery};

/// Job-start and job-status endpoints, one pair per job kind
#[async_trait]
pub trait ScrapeBackend: Send + Sync {
    /// Returns as soon as the backend acknowledges; does not wait for completion
    async fn start_job(&self, kind: JobKind, request: &StartRequest) -> Result<StartAck, BackendError>;

    async fn job_status(&self, kind: JobKind, query: &StatusQuery) -> Result<StatusReport, BackendError>;
}

// Scrape Orchestrator Library - client-side tracking of long-running scrape jobs
// This exposes the core components for testing and integration

pub mod backend;
pub mod config;
pub mod jobs;
pub mod markers;
pub mod poller;
pub mod shutdown;
pub mod telemetry;

// Re-export key types for easy access
pub use backend::{BackendError, HttpScrapeBackend, ScrapeBackend, StartRequest, StatusQuery};
pub use config::{OrchestratorConfig, BackendConfig, ObservabilityConfig};
pub use jobs::{
    context_from_config, BatchSelectionCoordinator, ConcurrencyGuard, DataRefresh, JobContext, JobError,
    JobKind, JobParams, JobSession, JobSettings, JobStateMachine, JobView, LifecycleState, LogRefresh,
    NoopRefresh, Notice, NoticeLevel, PendingStart, PollPeriods, ProgressSnapshot, StatusReport,
    WorkOrderJobs,
};
pub use markers::{FileStore, KeyValueStore, MemoryStore, SessionMarker, SessionMarkers, StorageError, UnavailableStore};
pub use poller::{PollControl, ProgressPoller};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_job_span, generate_correlation_id, init_telemetry};

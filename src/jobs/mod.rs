// Scrape job orchestration - lifecycle, mutual exclusion and batch selection

pub mod errors;
pub mod guard;
pub mod lifecycle;
pub mod orchestrator;
pub mod refresh;
pub mod selection;
pub mod state_machine;
pub mod types;

#[cfg(test)]
pub mod mocks;

pub use errors::JobError;
pub use guard::{ConcurrencyGuard, PendingStart};
pub use lifecycle::{LifecycleEvent, LifecycleMachine};
pub use orchestrator::{context_from_config, WorkOrderJobs};
pub use refresh::{DataRefresh, LogRefresh, NoopRefresh};
pub use selection::BatchSelectionCoordinator;
pub use state_machine::{JobContext, JobSettings, JobStateMachine, PollPeriods};
pub use types::{
    JobKind, JobParams, JobSession, JobView, LifecycleState, Notice, NoticeLevel, ProgressSnapshot,
    ProgressTotals, StartAck, StartOutcome, StatusReport,
};

use thiserror::Error;

use super::types::{JobKind, LifecycleState};

/// Rejections raised before any job state changes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Another operation is in progress ({active}); wait for it to finish")]
    AnotherJobActive { owner_id: String, active: JobKind },

    #[error("No work orders selected")]
    EmptySelection,

    #[error("{kind} requires a work order id")]
    MissingTarget { kind: JobKind },

    #[error("No {kind} job is tracked for user {owner_id}")]
    UnknownJob { owner_id: String, kind: JobKind },

    #[error("{kind} cannot start while {state}")]
    NotIdle { kind: JobKind, state: LifecycleState },
}

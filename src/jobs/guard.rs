// Concurrency guard - at most one active job per owner across all kinds
//
// The backend drives a single external session per account, so two jobs
// running at once for the same owner would corrupt it. Starts are rejected,
// never queued.

use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

use super::errors::JobError;
use super::state_machine::JobStateMachine;
use super::types::{JobKind, JobParams, JobSession, LifecycleState};

/// A start that passed the guard and is already `Initializing`. The start
/// request goes out on `launch`.
#[derive(Debug)]
#[must_use = "the backend is only contacted on launch()"]
pub struct PendingStart {
    machine: JobStateMachine,
    session: JobSession,
}

impl PendingStart {
    pub fn session(&self) -> &JobSession {
        &self.session
    }

    pub fn kind(&self) -> JobKind {
        self.machine.kind()
    }

    pub async fn launch(self) -> LifecycleState {
        self.machine.launch(&self.session).await
    }
}

#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    machines: Vec<JobStateMachine>,
    start_lock: Mutex<()>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a machine, replacing any previous one for the same owner
    /// and kind
    pub fn track(&mut self, machine: JobStateMachine) {
        self.machines
            .retain(|m| !(m.owner_id() == machine.owner_id() && m.kind() == machine.kind()));
        self.machines.push(machine);
    }

    pub fn machine(&self, owner_id: &str, kind: JobKind) -> Option<&JobStateMachine> {
        self.machines
            .iter()
            .find(|m| m.owner_id() == owner_id && m.kind() == kind)
    }

    pub fn machines_for<'a>(&'a self, owner_id: &'a str) -> impl Iterator<Item = &'a JobStateMachine> + 'a {
        self.machines.iter().filter(move |m| m.owner_id() == owner_id)
    }

    /// True iff no tracked machine of the owner is `Initializing` or
    /// `InProgress`
    pub fn can_start(&self, owner_id: &str) -> bool {
        self.active_job(owner_id).is_none()
    }

    pub fn active_job(&self, owner_id: &str) -> Option<JobKind> {
        self.machines_for(owner_id)
            .find(|m| m.is_active())
            .map(|m| m.kind())
    }

    /// Checks the guard and moves the machine into `Initializing` as one
    /// atomic step. A rejection changes nothing.
    pub fn reserve(&self, owner_id: &str, kind: JobKind, params: JobParams) -> Result<PendingStart, JobError> {
        validate(kind, &params)?;

        let _serialized = self.start_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let machine = self.machine(owner_id, kind).ok_or_else(|| JobError::UnknownJob {
            owner_id: owner_id.to_string(),
            kind,
        })?;

        if let Some(active) = self.active_job(owner_id) {
            warn!(owner_id, requested = %kind, active = %active, "Start rejected, another job is active");
            return Err(JobError::AnotherJobActive {
                owner_id: owner_id.to_string(),
                active,
            });
        }

        let session = machine.enter_initializing(&params)?;
        info!(owner_id, kind = %kind, session_id = %session.session_id, "Start accepted");
        Ok(PendingStart {
            machine: machine.clone(),
            session,
        })
    }

    /// `reserve` followed by `launch`
    pub async fn start(&self, owner_id: &str, kind: JobKind, params: JobParams) -> Result<LifecycleState, JobError> {
        let pending = self.reserve(owner_id, kind, params)?;
        Ok(pending.launch().await)
    }

    /// Mount-time check for every machine of the owner
    pub fn mount_all(&self, owner_id: &str) -> Vec<(JobKind, LifecycleState)> {
        self.machines_for(owner_id)
            .map(|m| (m.kind(), m.mount()))
            .collect()
    }

    pub fn unmount_all(&self, owner_id: &str) {
        for machine in self.machines_for(owner_id) {
            machine.unmount();
        }
    }
}

fn validate(kind: JobKind, params: &JobParams) -> Result<(), JobError> {
    match kind {
        JobKind::SingleDispenserScrape => {
            let has_target = params
                .target_id
                .as_deref()
                .is_some_and(|id| !id.trim().is_empty());
            if !has_target {
                return Err(JobError::MissingTarget { kind });
            }
        }
        JobKind::BatchDispenserScrape => {
            if params.selected_ids.as_ref().is_some_and(|ids| ids.is_empty()) {
                return Err(JobError::EmptySelection);
            }
        }
        JobKind::WorkOrderScrape => {}
    }
    Ok(())
}

// Per-owner entry point wiring the three job kinds behind one guard

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::errors::JobError;
use super::guard::ConcurrencyGuard;
use super::refresh::DataRefresh;
use super::selection::BatchSelectionCoordinator;
use super::state_machine::{JobContext, JobStateMachine};
use super::types::{JobKind, JobParams, JobView, LifecycleState};
use crate::backend::HttpScrapeBackend;
use crate::config::OrchestratorConfig;
use crate::markers::{FileStore, KeyValueStore, SessionMarkers, UnavailableStore};

/// Builds the shared job context from configuration. A marker directory that
/// cannot be created degrades to storage-unavailable mode.
pub fn context_from_config(config: &OrchestratorConfig, refresh: Arc<dyn DataRefresh>) -> Result<JobContext> {
    let backend = HttpScrapeBackend::new(&config.backend)?;

    let store: Arc<dyn KeyValueStore> = if config.markers.enabled {
        match FileStore::new(&config.markers.directory) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(
                    directory = %config.markers.directory.display(),
                    error = %e,
                    "Marker storage unavailable, jobs will not resume after restart"
                );
                Arc::new(UnavailableStore)
            }
        }
    } else {
        info!("Marker storage disabled by configuration");
        Arc::new(UnavailableStore)
    };

    Ok(JobContext {
        backend: Arc::new(backend),
        markers: SessionMarkers::with_max_age(store, config.marker_max_age()),
        refresh,
        settings: config.job_settings(),
    })
}

/// All scrape jobs of one owner: one state machine per kind, the guard that
/// keeps them mutually exclusive, and the batch selection.
#[derive(Debug)]
pub struct WorkOrderJobs {
    owner_id: String,
    guard: ConcurrencyGuard,
    selection: BatchSelectionCoordinator,
}

impl WorkOrderJobs {
    pub fn new(owner_id: impl Into<String>, context: JobContext) -> Self {
        let owner_id = owner_id.into();
        let mut guard = ConcurrencyGuard::new();
        for kind in JobKind::ALL {
            guard.track(JobStateMachine::new(owner_id.clone(), kind, context.clone()));
        }
        Self {
            owner_id,
            guard,
            selection: BatchSelectionCoordinator::new(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    pub fn machine(&self, kind: JobKind) -> Option<&JobStateMachine> {
        self.guard.machine(&self.owner_id, kind)
    }

    pub fn selection(&self) -> &BatchSelectionCoordinator {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut BatchSelectionCoordinator {
        &mut self.selection
    }

    pub fn active_job(&self) -> Option<JobKind> {
        self.guard.active_job(&self.owner_id)
    }

    /// Resumes any job with a fresh marker. Returns the kinds now in progress.
    ///
    /// Every start runs this first, so a job left running by an earlier
    /// process blocks the start instead of being launched over.
    pub fn mount(&self) -> Vec<JobKind> {
        self.guard
            .mount_all(&self.owner_id)
            .into_iter()
            .filter(|(_, state)| *state == LifecycleState::InProgress)
            .map(|(kind, _)| kind)
            .collect()
    }

    /// Stops observing every job; backend jobs and their markers are left alone
    pub fn unmount(&self) {
        self.guard.unmount_all(&self.owner_id);
    }

    pub async fn scrape_work_orders(&self, force_refresh: bool) -> Result<LifecycleState, JobError> {
        self.mount();
        self.guard
            .start(&self.owner_id, JobKind::WorkOrderScrape, JobParams::work_orders(force_refresh))
            .await
    }

    /// Batch dispenser scrape over every eligible work order
    pub async fn scrape_all_dispensers(&self, force_refresh: bool) -> Result<LifecycleState, JobError> {
        self.mount();
        self.guard
            .start(
                &self.owner_id,
                JobKind::BatchDispenserScrape,
                JobParams::all_dispensers(force_refresh),
            )
            .await
    }

    pub async fn scrape_dispensers_for(
        &self,
        work_order_id: &str,
        force_refresh: bool,
    ) -> Result<LifecycleState, JobError> {
        self.mount();
        self.guard
            .start(
                &self.owner_id,
                JobKind::SingleDispenserScrape,
                JobParams::single_dispenser(work_order_id, force_refresh),
            )
            .await
    }

    /// Batch dispenser scrape scoped to the current selection
    pub async fn dispatch_selection(&mut self, force_refresh: bool) -> Result<LifecycleState, JobError> {
        self.mount();
        self.selection
            .dispatch(&self.guard, &self.owner_id, force_refresh)
            .await
    }

    pub fn views(&self) -> Vec<JobView> {
        self.guard.machines_for(&self.owner_id).map(|m| m.view()).collect()
    }

    pub fn subscribe(&self, kind: JobKind) -> Option<watch::Receiver<JobView>> {
        self.machine(kind).map(|m| m.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::mocks::{context, ScriptedBackend};
    use crate::jobs::refresh::NoopRefresh;
    use crate::markers::MemoryStore;

    fn jobs_over(backend: &Arc<ScriptedBackend>, markers: &SessionMarkers) -> WorkOrderJobs {
        WorkOrderJobs::new("user-1", context(backend.clone(), markers.clone(), Arc::new(NoopRefresh)))
    }

    fn jobs() -> (Arc<ScriptedBackend>, WorkOrderJobs) {
        let backend = Arc::new(ScriptedBackend::new());
        let markers = SessionMarkers::new(Arc::new(MemoryStore::new()));
        let jobs = jobs_over(&backend, &markers);
        (backend, jobs)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_machine_per_kind() {
        let (_, jobs) = jobs();
        for kind in JobKind::ALL {
            assert_eq!(jobs.machine(kind).unwrap().kind(), kind);
        }
        assert_eq!(jobs.views().len(), 3);
        assert!(jobs.mount().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unscoped_batch_omits_ids() {
        let (backend, jobs) = jobs();
        jobs.scrape_all_dispensers(false).await.unwrap();

        let requests = backend.start_requests();
        assert_eq!(requests[0].1.work_order_ids, None);
        assert_eq!(jobs.active_job(), Some(JobKind::BatchDispenserScrape));
        jobs.unmount();
        assert_eq!(jobs.active_job(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_dispenser_carries_work_order() {
        let (backend, jobs) = jobs();
        jobs.scrape_dispensers_for("WO-42", true).await.unwrap();

        let (kind, request) = &backend.start_requests()[0];
        assert_eq!(*kind, JobKind::SingleDispenserScrape);
        assert_eq!(request.work_order_id.as_deref(), Some("WO-42"));
        assert!(request.force_refresh);
        jobs.unmount();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_after_restart_respects_running_job() {
        let backend = Arc::new(ScriptedBackend::new());
        let markers = SessionMarkers::new(Arc::new(MemoryStore::new()));
        let first = jobs_over(&backend, &markers);
        first.scrape_work_orders(false).await.unwrap();
        first.unmount();

        // Fresh instance over the same store, as after a restart
        let second = jobs_over(&backend, &markers);
        assert!(matches!(
            second.scrape_dispensers_for("WO-1", false).await,
            Err(JobError::AnotherJobActive { active: JobKind::WorkOrderScrape, .. })
        ));
        assert_eq!(backend.start_requests().len(), 1);
        assert_eq!(
            second.machine(JobKind::WorkOrderScrape).unwrap().state(),
            LifecycleState::InProgress
        );
        assert_eq!(
            second.machine(JobKind::SingleDispenserScrape).unwrap().state(),
            LifecycleState::Idle
        );
        second.unmount();
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_kind_after_restart_is_not_started_twice() {
        let backend = Arc::new(ScriptedBackend::new());
        let markers = SessionMarkers::new(Arc::new(MemoryStore::new()));
        let mut first = jobs_over(&backend, &markers);
        first.selection_mut().select_all(["WO-1", "WO-2"]);
        first.dispatch_selection(false).await.unwrap();
        first.unmount();

        let mut second = jobs_over(&backend, &markers);
        second.selection_mut().select_all(["WO-3"]);
        assert!(matches!(
            second.dispatch_selection(false).await,
            Err(JobError::AnotherJobActive { active: JobKind::BatchDispenserScrape, .. })
        ));
        assert_eq!(backend.start_requests().len(), 1);
        // The rejected dispatch keeps its selection
        assert!(second.selection().contains("WO-3"));
        let session = second.machine(JobKind::BatchDispenserScrape).unwrap().session().unwrap();
        assert_eq!(session.selected_ids.unwrap().len(), 2);
        second.unmount();
    }

    #[test]
    fn test_disabled_markers_use_unavailable_store() {
        let mut config = OrchestratorConfig::default();
        config.markers.enabled = false;
        let ctx = context_from_config(&config, Arc::new(NoopRefresh)).unwrap();
        ctx.markers.write("user-1", JobKind::WorkOrderScrape, chrono::Utc::now(), Default::default());
        assert!(ctx.markers.read("user-1", JobKind::WorkOrderScrape).is_none());
    }
}

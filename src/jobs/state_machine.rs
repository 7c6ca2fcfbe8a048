// Job state machine - one instance per (owner, job kind)
//
// Interprets status payloads into lifecycle transitions and runs the side
// effects attached to them: session markers, polling, data refresh, and the
// timed revert to Idle after a result has been shown.

use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::errors::JobError;
use super::lifecycle::{LifecycleEvent, LifecycleMachine};
use super::refresh::DataRefresh;
use super::types::{
    JobKind, JobParams, JobSession, JobView, LifecycleState, Notice, ProgressSnapshot, StartAck,
    StartOutcome, StatusReport,
};
use crate::backend::{BackendError, ScrapeBackend, StartRequest, StatusQuery};
use crate::markers::{MarkerExtra, SessionMarkers};
use crate::poller::{PollControl, ProgressPoller};

const GENERIC_FAILURE: &str = "Scrape failed. Please try again.";
const HISTORY_LIMIT: usize = 32;

/// Poll cadence per job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPeriods {
    pub work_orders: Duration,
    pub batch_dispensers: Duration,
    pub single_dispenser: Duration,
}

impl PollPeriods {
    pub fn uniform(period: Duration) -> Self {
        Self {
            work_orders: period,
            batch_dispensers: period,
            single_dispenser: period,
        }
    }

    pub fn for_kind(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::WorkOrderScrape => self.work_orders,
            JobKind::BatchDispenserScrape => self.batch_dispensers,
            JobKind::SingleDispenserScrape => self.single_dispenser,
        }
    }
}

impl Default for PollPeriods {
    fn default() -> Self {
        Self {
            work_orders: Duration::from_millis(2000),
            batch_dispensers: Duration::from_millis(2000),
            single_dispenser: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSettings {
    pub poll_periods: PollPeriods,
    /// How long a final result stays visible before reverting to Idle
    pub display_hold: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            poll_periods: PollPeriods::default(),
            display_hold: Duration::from_secs(5),
        }
    }
}

/// Collaborators shared by the state machines of one owner
#[derive(Clone)]
pub struct JobContext {
    pub backend: Arc<dyn ScrapeBackend>,
    pub markers: SessionMarkers,
    pub refresh: Arc<dyn DataRefresh>,
    pub settings: JobSettings,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("markers", &self.markers)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct MachineInner {
    lifecycle: LifecycleMachine,
    session: Option<JobSession>,
    snapshot: Option<ProgressSnapshot>,
    notice: Option<Notice>,
    /// Identifies the result currently held on display
    display_token: Option<Uuid>,
    history: Vec<LifecycleState>,
}

impl MachineInner {
    fn state(&self) -> LifecycleState {
        self.lifecycle.current()
    }

    fn apply(&mut self, event: LifecycleEvent) -> LifecycleState {
        let before = self.lifecycle.current();
        let after = self.lifecycle.handle(event);
        if before != after {
            if self.history.len() == HISTORY_LIMIT {
                self.history.remove(0);
            }
            self.history.push(after);
        }
        if let Some(session) = self.session.as_mut() {
            session.lifecycle_state = after;
        }
        after
    }

    fn is_current(&self, session_id: Uuid) -> bool {
        self.session.as_ref().map(|s| s.session_id) == Some(session_id)
    }

    fn clear_display(&mut self) {
        self.session = None;
        self.snapshot = None;
        self.notice = None;
        self.display_token = None;
    }
}

/// Lifecycle of one job kind for one owner. Cloning yields another handle to
/// the same machine.
#[derive(Clone)]
pub struct JobStateMachine {
    kind: JobKind,
    owner_id: String,
    inner: Arc<Mutex<MachineInner>>,
    poller: ProgressPoller,
    /// Held while a poller is started or stopped for a session
    polling: Arc<Mutex<()>>,
    /// Keeps marker writes and clears in transition order once the state
    /// lock is released
    marker_io: Arc<Mutex<()>>,
    context: JobContext,
    view: Arc<watch::Sender<JobView>>,
}

impl JobStateMachine {
    pub fn new(owner_id: impl Into<String>, kind: JobKind, context: JobContext) -> Self {
        let owner_id = owner_id.into();
        let (view, _) = watch::channel(JobView::idle(&owner_id, kind));
        Self {
            kind,
            poller: ProgressPoller::new(format!("{}:{}", owner_id, kind.slug())),
            owner_id,
            inner: Arc::new(Mutex::new(MachineInner {
                lifecycle: LifecycleMachine::new(kind),
                session: None,
                snapshot: None,
                notice: None,
                display_token: None,
                history: Vec::new(),
            })),
            polling: Arc::new(Mutex::new(())),
            marker_io: Arc::new(Mutex::new(())),
            context,
            view: Arc::new(view),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MachineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the state lock, then runs marker I/O against the store
    fn after_unlock(&self, inner: MutexGuard<'_, MachineInner>, io: impl FnOnce(&SessionMarkers)) {
        let _ordered = self.marker_io.lock().unwrap_or_else(PoisonError::into_inner);
        drop(inner);
        io(&self.context.markers);
    }

    fn publish(&self, inner: &MachineInner) {
        self.view.send_replace(JobView {
            kind: self.kind,
            owner_id: self.owner_id.clone(),
            state: inner.state(),
            snapshot: inner.snapshot.clone(),
            notice: inner.notice.clone(),
            session: inner.session.clone(),
        });
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        self.lock().snapshot.clone()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.lock().notice.clone()
    }

    pub fn session(&self) -> Option<JobSession> {
        self.lock().session.clone()
    }

    /// States entered so far, oldest first (bounded)
    pub fn history(&self) -> Vec<LifecycleState> {
        self.lock().history.clone()
    }

    pub fn view(&self) -> JobView {
        self.view.borrow().clone()
    }

    /// Receives every published view change
    pub fn subscribe(&self) -> watch::Receiver<JobView> {
        self.view.subscribe()
    }

    pub fn poller(&self) -> &ProgressPoller {
        &self.poller
    }

    /// Mount-time check: resumes polling from a fresh session marker without
    /// re-issuing the start request. Stale markers are cleared.
    pub fn mount(&self) -> LifecycleState {
        let current = self.state();
        if current != LifecycleState::Idle {
            return current;
        }

        let Some(marker) = self
            .context
            .markers
            .read_fresh(&self.owner_id, self.kind, Utc::now())
        else {
            return LifecycleState::Idle;
        };

        if self.kind == JobKind::SingleDispenserScrape && marker.extra.target_id.is_none() {
            warn!(owner_id = %self.owner_id, kind = %self.kind, "Marker without work order id, discarding");
            self.context.markers.clear(&self.owner_id, self.kind);
            return LifecycleState::Idle;
        }

        let session = JobSession {
            session_id: Uuid::new_v4(),
            kind: self.kind,
            owner_id: self.owner_id.clone(),
            target_id: marker.extra.target_id,
            selected_ids: marker.extra.selected_ids,
            started_at: marker.started_at,
            force_refresh: marker.extra.force_refresh,
            lifecycle_state: LifecycleState::InProgress,
        };

        let _polling = self.polling.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut inner = self.lock();
            if inner.state() != LifecycleState::Idle {
                return inner.state();
            }
            inner.session = Some(session.clone());
            inner.snapshot = None;
            inner.notice = None;
            inner.display_token = None;
            inner.apply(LifecycleEvent::Resume);
            self.publish(&inner);
        }

        info!(
            owner_id = %self.owner_id,
            kind = %self.kind,
            session_id = %session.session_id,
            started_at = %session.started_at,
            "Resuming job from session marker"
        );
        self.start_polling(&session);
        LifecycleState::InProgress
    }

    /// Stops observing the job. The backend job keeps running and its marker
    /// is kept so a later mount can resume it.
    pub fn unmount(&self) {
        let _polling = self.polling.lock().unwrap_or_else(PoisonError::into_inner);
        self.poller.stop();
        let mut inner = self.lock();
        let previous = inner.state();
        if previous != LifecycleState::Idle {
            inner.apply(LifecycleEvent::Reset);
        }
        inner.clear_display();
        self.publish(&inner);
        debug!(owner_id = %self.owner_id, kind = %self.kind, previous = %previous, "Job unmounted");
    }

    /// `Idle -> Initializing`: writes the marker and shows a zero-progress
    /// snapshot before the backend answers. Callers must hold the
    /// concurrency guard.
    pub(crate) fn enter_initializing(&self, params: &JobParams) -> Result<JobSession, JobError> {
        let mut inner = self.lock();
        let state = inner.state();
        if state.is_active() {
            return Err(JobError::NotIdle { kind: self.kind, state });
        }
        if state.is_terminal() {
            // A new start dismisses the result still on display
            inner.apply(LifecycleEvent::Reset);
        }
        inner.clear_display();

        let session = JobSession {
            session_id: Uuid::new_v4(),
            kind: self.kind,
            owner_id: self.owner_id.clone(),
            target_id: params.target_id.clone(),
            selected_ids: params.selected_ids.clone(),
            started_at: Utc::now(),
            force_refresh: params.force_refresh,
            lifecycle_state: LifecycleState::Idle,
        };
        inner.session = Some(session.clone());
        inner.apply(LifecycleEvent::Start);
        inner.snapshot = Some(ProgressSnapshot::initializing(self.kind));
        self.publish(&inner);
        let session = inner.session.clone().unwrap_or(session);

        self.after_unlock(inner, |markers| {
            markers.write(
                &self.owner_id,
                self.kind,
                session.started_at,
                MarkerExtra {
                    target_id: session.target_id.clone(),
                    selected_ids: session.selected_ids.clone(),
                    force_refresh: session.force_refresh,
                },
            )
        });

        info!(
            owner_id = %self.owner_id,
            kind = %self.kind,
            session_id = %session.session_id,
            force_refresh = session.force_refresh,
            selected = session.selected_ids.as_ref().map(|ids| ids.len()),
            "Job initializing"
        );
        Ok(session)
    }

    /// Sends the start request for a session created by `enter_initializing`
    /// and starts polling once the backend accepts it.
    pub(crate) async fn launch(&self, session: &JobSession) -> LifecycleState {
        let request = StartRequest {
            user_id: self.owner_id.clone(),
            work_order_id: session.target_id.clone(),
            work_order_ids: session.selected_ids.clone(),
            force_refresh: session.force_refresh,
        };

        match self.context.backend.start_job(self.kind, &request).await {
            Ok(ack) if ack.outcome.is_benign() => self.finish_benign(session.session_id, ack),
            Ok(_) => {
                let _polling = self.polling.lock().unwrap_or_else(PoisonError::into_inner);
                if !self.lock().is_current(session.session_id) {
                    debug!(
                        kind = %self.kind,
                        session_id = %session.session_id,
                        "Session replaced before the start was acknowledged"
                    );
                    return self.state();
                }
                info!(owner_id = %self.owner_id, kind = %self.kind, "Backend accepted job");
                self.start_polling(session);
            }
            Err(e) => {
                error!(owner_id = %self.owner_id, kind = %self.kind, error = %e, "Start request failed");
                self.fail(self.lock(), session.session_id, e.user_message());
            }
        }
        self.state()
    }

    /// Callers hold `polling`
    fn start_polling(&self, session: &JobSession) {
        let backend = Arc::clone(&self.context.backend);
        let kind = self.kind;
        let query = StatusQuery {
            owner_id: self.owner_id.clone(),
            target_id: session.target_id.clone(),
        };
        let machine = self.clone();
        let session_id = session.session_id;

        let started = self.poller.start(
            move || {
                let backend = Arc::clone(&backend);
                let query = query.clone();
                async move { backend.job_status(kind, &query).await }
            },
            self.context.settings.poll_periods.for_kind(kind),
            move |result| machine.handle_status(session_id, result),
        );
        if !started {
            warn!(owner_id = %self.owner_id, kind = %self.kind, "Poller was already running");
        }
    }

    /// Poller subscriber. Runs with the poller's delivery lock held and must
    /// not call back into the poller.
    fn handle_status(&self, session_id: Uuid, result: Result<StatusReport, BackendError>) -> PollControl {
        let mut inner = self.lock();
        if !inner.is_current(session_id) || !inner.state().is_active() {
            return PollControl::Stop;
        }

        match result {
            Ok(StatusReport::Progress(snapshot)) => {
                let shown = snapshot.clamped_after(inner.snapshot.as_ref());
                debug!(
                    kind = %self.kind,
                    percentage = shown.percentage,
                    phase = %shown.phase,
                    "Progress snapshot"
                );
                inner.apply(LifecycleEvent::Progress);
                inner.snapshot = Some(shown);
                self.publish(&inner);
                PollControl::Continue
            }
            Ok(StatusReport::Completed(snapshot)) => {
                let shown = snapshot.clamped_after(inner.snapshot.as_ref());
                let message = completion_message(self.kind, &shown);
                inner.apply(LifecycleEvent::Complete);
                inner.snapshot = Some(shown);
                inner.notice = Some(Notice::success(message));
                inner.display_token = Some(session_id);
                self.publish(&inner);
                self.after_unlock(inner, |markers| markers.clear(&self.owner_id, self.kind));

                info!(owner_id = %self.owner_id, kind = %self.kind, %session_id, "Job completed");
                self.context.refresh.refresh_work_orders(self.kind, &self.owner_id);
                self.schedule_display_expiry(session_id);
                PollControl::Stop
            }
            Ok(StatusReport::Failed { error }) => {
                let message = error.unwrap_or_else(|| GENERIC_FAILURE.to_string());
                self.fail(inner, session_id, message);
                PollControl::Stop
            }
            Ok(report @ (StatusReport::NotFound | StatusReport::Idle)) => {
                inner.apply(LifecycleEvent::Lost);
                inner.apply(LifecycleEvent::Reset);
                inner.clear_display();
                inner.notice = Some(Notice::info("No scrape in progress"));
                inner.display_token = Some(session_id);
                self.publish(&inner);
                self.after_unlock(inner, |markers| markers.clear(&self.owner_id, self.kind));

                info!(
                    owner_id = %self.owner_id,
                    kind = %self.kind,
                    report = ?report,
                    "Backend has no record of the session, reverting to idle"
                );
                self.schedule_display_expiry(session_id);
                PollControl::Stop
            }
            Err(e) if e.is_definitive() => {
                self.fail(inner, session_id, e.user_message());
                PollControl::Stop
            }
            Err(e) => {
                warn!(kind = %self.kind, error = %e, "Transient status error, still polling");
                PollControl::Continue
            }
        }
    }

    fn fail(&self, mut inner: MutexGuard<'_, MachineInner>, session_id: Uuid, message: String) {
        if !inner.is_current(session_id) {
            return;
        }
        inner.apply(LifecycleEvent::Fail);
        inner.notice = Some(Notice::error(message.clone()));
        inner.display_token = Some(session_id);
        self.publish(&inner);
        self.after_unlock(inner, |markers| markers.clear(&self.owner_id, self.kind));
        error!(owner_id = %self.owner_id, kind = %self.kind, %session_id, message = %message, "Job failed");
        self.schedule_display_expiry(session_id);
    }

    fn finish_benign(&self, session_id: Uuid, ack: StartAck) {
        let mut inner = self.lock();
        if !inner.is_current(session_id) {
            return;
        }
        inner.apply(LifecycleEvent::Skip);
        inner.clear_display();
        let message = ack
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| benign_message(ack.outcome).to_string());
        inner.notice = Some(Notice::info(message));
        inner.display_token = Some(session_id);
        self.publish(&inner);
        self.after_unlock(inner, |markers| markers.clear(&self.owner_id, self.kind));

        info!(owner_id = %self.owner_id, kind = %self.kind, outcome = ?ack.outcome, "Nothing to scrape");
        self.schedule_display_expiry(session_id);
    }

    fn schedule_display_expiry(&self, token: Uuid) {
        let machine = self.clone();
        let hold = self.context.settings.display_hold;
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            machine.expire_display(token);
        });
    }

    fn expire_display(&self, token: Uuid) {
        let mut inner = self.lock();
        if inner.display_token != Some(token) {
            return;
        }
        if inner.state().is_terminal() {
            inner.apply(LifecycleEvent::Reset);
        }
        inner.clear_display();
        self.publish(&inner);
        debug!(owner_id = %self.owner_id, kind = %self.kind, "Display hold expired");
    }

    /// Drives the lifecycle straight into `state` without side effects
    #[cfg(test)]
    pub(crate) fn force_state(&self, state: LifecycleState) {
        let events: &[LifecycleEvent] = match state {
            LifecycleState::Idle => &[],
            LifecycleState::Initializing => &[LifecycleEvent::Start],
            LifecycleState::InProgress => &[LifecycleEvent::Resume],
            LifecycleState::Completed => &[LifecycleEvent::Resume, LifecycleEvent::Complete],
            LifecycleState::Failed => &[LifecycleEvent::Resume, LifecycleEvent::Fail],
            LifecycleState::NotFound => &[LifecycleEvent::Resume, LifecycleEvent::Lost],
        };
        let mut inner = self.lock();
        if inner.state() != LifecycleState::Idle {
            inner.apply(LifecycleEvent::Reset);
        }
        for event in events {
            inner.apply(*event);
        }
        self.publish(&inner);
    }
}

impl std::fmt::Debug for JobStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStateMachine")
            .field("kind", &self.kind)
            .field("owner_id", &self.owner_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn completion_message(kind: JobKind, snapshot: &ProgressSnapshot) -> String {
    let totals = snapshot.totals;
    if totals.total > 0 {
        format!(
            "{} completed: {} of {} succeeded",
            kind.label(),
            totals.successful,
            totals.total
        )
    } else if !snapshot.message.trim().is_empty() {
        snapshot.message.clone()
    } else {
        format!("{} completed", kind.label())
    }
}

fn benign_message(outcome: StartOutcome) -> &'static str {
    match outcome {
        StartOutcome::Skipped => "Already up to date, nothing was scraped",
        StartOutcome::AllSkipped => "All selected work orders already have dispenser data",
        StartOutcome::NoWorkOrders => "No work orders to scrape",
        StartOutcome::ScrapingStarted => "Scrape started",
    }
}

// Scripted backend for job tests - no network access

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::refresh::DataRefresh;
use super::state_machine::{JobContext, JobSettings, PollPeriods};
use super::types::{JobKind, ProgressSnapshot, StartAck, StartOutcome, StatusReport};
use crate::backend::{BackendError, ScrapeBackend, StartRequest, StatusQuery};
use crate::markers::SessionMarkers;

type StatusResult = Result<StatusReport, BackendError>;

/// Replays queued responses. The last queued status for a kind repeats once
/// the queue is down to one entry; start requests default to
/// `scraping_started`.
#[derive(Default)]
pub struct ScriptedBackend {
    starts: Mutex<VecDeque<Result<StartAck, BackendError>>>,
    statuses: Mutex<HashMap<JobKind, VecDeque<StatusResult>>>,
    start_latency: Mutex<Duration>,
    status_latency: Mutex<Duration>,
    start_requests: Mutex<Vec<(JobKind, StartRequest)>>,
    status_calls: Mutex<HashMap<JobKind, usize>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_start(&self, result: Result<StartAck, BackendError>) {
        self.starts.lock().unwrap().push_back(result);
    }

    pub fn push_status(&self, kind: JobKind, result: StatusResult) {
        self.statuses.lock().unwrap().entry(kind).or_default().push_back(result);
    }

    pub fn set_start_latency(&self, latency: Duration) {
        *self.start_latency.lock().unwrap() = latency;
    }

    pub fn set_status_latency(&self, latency: Duration) {
        *self.status_latency.lock().unwrap() = latency;
    }

    pub fn start_requests(&self) -> Vec<(JobKind, StartRequest)> {
        self.start_requests.lock().unwrap().clone()
    }

    pub fn status_calls(&self, kind: JobKind) -> usize {
        self.status_calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ScrapeBackend for ScriptedBackend {
    async fn start_job(&self, kind: JobKind, request: &StartRequest) -> Result<StartAck, BackendError> {
        self.start_requests.lock().unwrap().push((kind, request.clone()));
        let latency = *self.start_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.starts.lock().unwrap().pop_front().unwrap_or(Ok(StartAck {
            outcome: StartOutcome::ScrapingStarted,
            message: None,
        }))
    }

    async fn job_status(&self, kind: JobKind, _query: &StatusQuery) -> StatusResult {
        *self.status_calls.lock().unwrap().entry(kind).or_default() += 1;
        let latency = *self.status_latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut statuses = self.statuses.lock().unwrap();
        let queue = statuses.entry(kind).or_default();
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_else(|| Ok(progress(0.0)))
        } else {
            queue.front().cloned().unwrap_or_else(|| Ok(progress(0.0)))
        }
    }
}

pub fn progress(percentage: f64) -> StatusReport {
    StatusReport::Progress(ProgressSnapshot {
        percentage,
        phase: "scraping".to_string(),
        ..Default::default()
    })
}

/// Context with a 100ms poll period and a 5s display hold
pub fn context(
    backend: Arc<dyn ScrapeBackend>,
    markers: SessionMarkers,
    refresh: Arc<dyn DataRefresh>,
) -> JobContext {
    JobContext {
        backend,
        markers,
        refresh,
        settings: JobSettings {
            poll_periods: PollPeriods::uniform(Duration::from_millis(100)),
            display_hold: Duration::from_secs(5),
        },
    }
}

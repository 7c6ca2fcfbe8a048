// Core types for scrape job tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// The three long-running scrape operations tracked on the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Full refresh of the user's work-order list
    WorkOrderScrape,
    /// Dispenser refresh across many work orders (optionally scoped)
    BatchDispenserScrape,
    /// Dispenser refresh for exactly one work order
    SingleDispenserScrape,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::WorkOrderScrape,
        JobKind::BatchDispenserScrape,
        JobKind::SingleDispenserScrape,
    ];

    /// Stable identifier used in storage keys and logs
    pub fn slug(&self) -> &'static str {
        match self {
            JobKind::WorkOrderScrape => "work_orders",
            JobKind::BatchDispenserScrape => "dispensers_batch",
            JobKind::SingleDispenserScrape => "dispensers_single",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobKind::WorkOrderScrape => "Work order scrape",
            JobKind::BatchDispenserScrape => "Batch dispenser scrape",
            JobKind::SingleDispenserScrape => "Dispenser scrape",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Lifecycle states of a job session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Initializing,
    InProgress,
    Completed,
    Failed,
    NotFound,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 6] = [
        LifecycleState::Idle,
        LifecycleState::Initializing,
        LifecycleState::InProgress,
        LifecycleState::Completed,
        LifecycleState::Failed,
        LifecycleState::NotFound,
    ];

    /// Active states block any other start for the same owner
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Initializing | LifecycleState::InProgress)
    }

    /// Polling stops on entry to any of these
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Completed | LifecycleState::Failed | LifecycleState::NotFound
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Initializing => "initializing",
            LifecycleState::InProgress => "in_progress",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
            LifecycleState::NotFound => "not_found",
        };
        f.write_str(name)
    }
}

/// Parameters supplied with a start request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobParams {
    /// Work order id, only for single dispenser scrapes
    pub target_id: Option<String>,
    /// Scope of a batch dispenser scrape; `None` means all eligible work orders
    pub selected_ids: Option<BTreeSet<String>>,
    pub force_refresh: bool,
}

impl JobParams {
    pub fn work_orders(force_refresh: bool) -> Self {
        Self {
            force_refresh,
            ..Default::default()
        }
    }

    pub fn single_dispenser(work_order_id: impl Into<String>, force_refresh: bool) -> Self {
        Self {
            target_id: Some(work_order_id.into()),
            force_refresh,
            ..Default::default()
        }
    }

    pub fn scoped_batch<I, S>(ids: I, force_refresh: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selected_ids: Some(ids.into_iter().map(Into::into).collect()),
            force_refresh,
            ..Default::default()
        }
    }

    pub fn all_dispensers(force_refresh: bool) -> Self {
        Self::work_orders(force_refresh)
    }
}

/// One attempt to run a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSession {
    pub session_id: Uuid,
    pub kind: JobKind,
    pub owner_id: String,
    pub target_id: Option<String>,
    pub selected_ids: Option<BTreeSet<String>>,
    pub started_at: DateTime<Utc>,
    pub force_refresh: bool,
    pub lifecycle_state: LifecycleState,
}

/// Processing counters reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressTotals {
    pub processed: u32,
    pub successful: u32,
    pub failed: u32,
    pub total: u32,
}

/// Last progress payload observed from a status endpoint
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percentage: f64,
    pub phase: String,
    pub message: String,
    pub totals: ProgressTotals,
}

impl ProgressSnapshot {
    /// Synthetic snapshot shown before the backend has answered
    pub fn initializing(kind: JobKind) -> Self {
        Self {
            percentage: 0.0,
            phase: "initializing".to_string(),
            message: format!("Starting {}...", kind.label().to_lowercase()),
            totals: ProgressTotals::default(),
        }
    }

    /// Returns a copy safe for display: within `0..=100` and never below
    /// the previously displayed percentage.
    pub fn clamped_after(&self, previous: Option<&ProgressSnapshot>) -> ProgressSnapshot {
        let floor = previous.map(|p| p.percentage).unwrap_or(0.0);
        let raw = if self.percentage.is_finite() {
            self.percentage
        } else {
            floor
        };
        let mut clamped = self.clone();
        clamped.percentage = raw.clamp(0.0, 100.0).max(floor.clamp(0.0, 100.0));
        clamped
    }
}

/// Interpreted answer of a status endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReport {
    Progress(ProgressSnapshot),
    Completed(ProgressSnapshot),
    Failed { error: Option<String> },
    /// Backend has no memory of the session
    NotFound,
    /// Backend reports nothing running
    Idle,
}

/// Acknowledgement returned by a start endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    ScrapingStarted,
    Skipped,
    NoWorkOrders,
    AllSkipped,
}

impl StartOutcome {
    /// Benign outcomes mean there is nothing to track
    pub fn is_benign(&self) -> bool {
        !matches!(self, StartOutcome::ScrapingStarted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAck {
    pub outcome: StartOutcome,
    pub message: Option<String>,
}

/// Severity of a message shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }
}

/// Read-only view of one job kind, published to renderers
#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    pub kind: JobKind,
    pub owner_id: String,
    pub state: LifecycleState,
    pub snapshot: Option<ProgressSnapshot>,
    pub notice: Option<Notice>,
    pub session: Option<JobSession>,
}

impl JobView {
    pub fn idle(owner_id: &str, kind: JobKind) -> Self {
        Self {
            kind,
            owner_id: owner_id.to_string(),
            state: LifecycleState::Idle,
            snapshot: None,
            notice: None,
            session: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(percentage: f64) -> ProgressSnapshot {
        ProgressSnapshot {
            percentage,
            ..Default::default()
        }
    }

    #[test]
    fn test_clamp_tolerates_regression() {
        let previous = snapshot(40.0);
        let shown = snapshot(25.0).clamped_after(Some(&previous));
        assert_eq!(shown.percentage, 40.0);
    }

    #[test]
    fn test_clamp_bounds_out_of_range_values() {
        assert_eq!(snapshot(140.0).clamped_after(None).percentage, 100.0);
        assert_eq!(snapshot(-3.0).clamped_after(None).percentage, 0.0);
        assert_eq!(snapshot(f64::NAN).clamped_after(Some(&snapshot(12.0))).percentage, 12.0);
    }

    #[test]
    fn test_active_and_terminal_states_are_disjoint() {
        for state in LifecycleState::ALL {
            assert!(!(state.is_active() && state.is_terminal()), "{state}");
        }
        assert!(LifecycleState::Initializing.is_active());
        assert!(LifecycleState::InProgress.is_active());
        assert!(!LifecycleState::Idle.is_terminal());
    }

    #[test]
    fn test_only_scraping_started_is_not_benign() {
        assert!(!StartOutcome::ScrapingStarted.is_benign());
        assert!(StartOutcome::Skipped.is_benign());
        assert!(StartOutcome::AllSkipped.is_benign());
        assert!(StartOutcome::NoWorkOrders.is_benign());
    }

    #[test]
    fn test_kind_slugs_are_unique() {
        let slugs: BTreeSet<_> = JobKind::ALL.iter().map(|k| k.slug()).collect();
        assert_eq!(slugs.len(), 3);
    }
}

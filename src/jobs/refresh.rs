// Data-refresh collaborator invoked when a scrape completes

use tracing::info;

use super::types::JobKind;

/// Invalidates / refetches the work-order list after new data was scraped.
/// Fire-and-forget: implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait DataRefresh: Send + Sync {
    fn refresh_work_orders(&self, kind: JobKind, owner_id: &str);
}

/// Does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRefresh;

impl DataRefresh for NoopRefresh {
    fn refresh_work_orders(&self, _kind: JobKind, _owner_id: &str) {}
}

/// Announces the refresh through the log; used by the CLI, which has no
/// cached list of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRefresh;

impl DataRefresh for LogRefresh {
    fn refresh_work_orders(&self, kind: JobKind, owner_id: &str) {
        info!(kind = %kind, owner_id, "Work order data refreshed");
    }
}

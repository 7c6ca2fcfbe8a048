// Batch selection - user-picked subset of work orders for a scoped batch

use std::collections::BTreeSet;
use tracing::debug;

use super::errors::JobError;
use super::guard::ConcurrencyGuard;
use super::types::{JobKind, JobParams, LifecycleState};

/// Client-only selection set, never persisted
#[derive(Debug, Default, Clone)]
pub struct BatchSelectionCoordinator {
    selected: BTreeSet<String>,
}

impl BatchSelectionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the id if absent, removes it otherwise. Returns whether the id is
    /// selected afterwards.
    pub fn toggle(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.selected.remove(&id) {
            false
        } else {
            self.selected.insert(id);
            true
        }
    }

    pub fn select_all<I, S>(&mut self, known_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected.extend(known_ids.into_iter().map(Into::into));
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn selected(&self) -> &BTreeSet<String> {
        &self.selected
    }

    /// Starts a batch dispenser scrape scoped to the current selection.
    ///
    /// The selection is consumed once the guard accepts, before the start
    /// request is sent, whatever the eventual outcome. An empty selection or a
    /// guard rejection leaves it untouched and contacts no one.
    pub async fn dispatch(
        &mut self,
        guard: &ConcurrencyGuard,
        owner_id: &str,
        force_refresh: bool,
    ) -> Result<LifecycleState, JobError> {
        if self.selected.is_empty() {
            return Err(JobError::EmptySelection);
        }

        let params = JobParams {
            selected_ids: Some(self.selected.clone()),
            force_refresh,
            ..Default::default()
        };
        let pending = guard.reserve(owner_id, JobKind::BatchDispenserScrape, params)?;

        debug!(owner_id, count = self.selected.len(), "Selection consumed by batch dispatch");
        self.selected.clear();
        Ok(pending.launch().await)
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::store::KeyValueStore;
use crate::jobs::types::JobKind;

const KEY_PREFIX: &str = "scrape_session";

/// Marker age after which a session is treated as abandoned
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 10;

/// Optional parameters stored alongside a marker so polling can resume
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarkerExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_ids: Option<BTreeSet<String>>,
    #[serde(default)]
    pub force_refresh: bool,
}

/// Durable record of an in-flight job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub owner_id: String,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: MarkerExtra,
}

impl SessionMarker {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.started_at
    }
}

/// True when the marker is older than `max_age`
pub fn is_stale(marker: &SessionMarker, now: DateTime<Utc>, max_age: Duration) -> bool {
    now - marker.started_at > max_age
}

/// Resumable-session markers keyed by `(owner_id, kind)`.
///
/// Storage failures never escape: they are logged and the call degrades to a
/// no-op, so a broken store only costs resumption after restart.
#[derive(Clone)]
pub struct SessionMarkers {
    store: Arc<dyn KeyValueStore>,
    max_age: Duration,
}

impl SessionMarkers {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_max_age(store, Duration::minutes(DEFAULT_MAX_AGE_MINUTES))
    }

    pub fn with_max_age(store: Arc<dyn KeyValueStore>, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn key(owner_id: &str, kind: JobKind) -> String {
        format!("{KEY_PREFIX}:{owner_id}:{}", kind.slug())
    }

    pub fn write(&self, owner_id: &str, kind: JobKind, started_at: DateTime<Utc>, extra: MarkerExtra) {
        let marker = SessionMarker {
            owner_id: owner_id.to_string(),
            kind,
            started_at,
            extra,
        };
        let value = match serde_json::to_string(&marker) {
            Ok(value) => value,
            Err(e) => {
                warn!(owner_id, kind = %kind, error = %e, "Failed to encode session marker");
                return;
            }
        };
        match self.store.set(&Self::key(owner_id, kind), &value) {
            Ok(()) => debug!(owner_id, kind = %kind, "Session marker written"),
            Err(e) => warn!(owner_id, kind = %kind, error = %e, "Session marker not written, resume disabled"),
        }
    }

    pub fn read(&self, owner_id: &str, kind: JobKind) -> Option<SessionMarker> {
        let key = Self::key(owner_id, kind);
        let raw = match self.store.get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(owner_id, kind = %kind, error = %e, "Session marker unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(owner_id, kind = %kind, error = %e, "Discarding corrupt session marker");
                self.clear(owner_id, kind);
                None
            }
        }
    }

    pub fn clear(&self, owner_id: &str, kind: JobKind) {
        match self.store.remove(&Self::key(owner_id, kind)) {
            Ok(()) => debug!(owner_id, kind = %kind, "Session marker cleared"),
            Err(e) => warn!(owner_id, kind = %kind, error = %e, "Session marker not cleared"),
        }
    }

    pub fn is_stale(&self, marker: &SessionMarker, now: DateTime<Utc>) -> bool {
        is_stale(marker, now, self.max_age)
    }

    /// Reads a marker usable for resumption. Stale markers are cleared and
    /// reported as absent.
    pub fn read_fresh(&self, owner_id: &str, kind: JobKind, now: DateTime<Utc>) -> Option<SessionMarker> {
        let marker = self.read(owner_id, kind)?;
        if self.is_stale(&marker, now) {
            debug!(
                owner_id,
                kind = %kind,
                age_seconds = marker.age(now).num_seconds(),
                "Clearing stale session marker"
            );
            self.clear(owner_id, kind);
            return None;
        }
        Some(marker)
    }

    /// All markers stored for an owner, stale ones included
    pub fn list(&self, owner_id: &str) -> Vec<SessionMarker> {
        JobKind::ALL
            .iter()
            .filter_map(|kind| self.read(owner_id, *kind))
            .collect()
    }
}

impl std::fmt::Debug for SessionMarkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMarkers")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::store::{MemoryStore, UnavailableStore};

    fn markers() -> SessionMarkers {
        SessionMarkers::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let markers = markers();
        let started_at = Utc::now();
        let extra = MarkerExtra {
            target_id: Some("WO-77".to_string()),
            selected_ids: None,
            force_refresh: true,
        };
        markers.write("user-1", JobKind::SingleDispenserScrape, started_at, extra.clone());

        let read = markers.read("user-1", JobKind::SingleDispenserScrape).unwrap();
        assert_eq!(read.owner_id, "user-1");
        assert_eq!(read.kind, JobKind::SingleDispenserScrape);
        assert_eq!(read.started_at, started_at);
        assert_eq!(read.extra, extra);
    }

    #[test]
    fn test_clear_then_read_is_absent() {
        let markers = markers();
        markers.write("user-1", JobKind::WorkOrderScrape, Utc::now(), MarkerExtra::default());
        markers.clear("user-1", JobKind::WorkOrderScrape);
        assert!(markers.read("user-1", JobKind::WorkOrderScrape).is_none());
    }

    #[test]
    fn test_markers_are_keyed_by_owner_and_kind() {
        let markers = markers();
        markers.write("user-1", JobKind::WorkOrderScrape, Utc::now(), MarkerExtra::default());
        assert!(markers.read("user-2", JobKind::WorkOrderScrape).is_none());
        assert!(markers.read("user-1", JobKind::BatchDispenserScrape).is_none());
        assert_eq!(markers.list("user-1").len(), 1);
    }

    #[test]
    fn test_ten_minute_staleness_boundary() {
        let now = Utc::now();
        let max_age = Duration::minutes(10);
        let marker = |minutes: i64| SessionMarker {
            owner_id: "user-1".to_string(),
            kind: JobKind::WorkOrderScrape,
            started_at: now - Duration::minutes(minutes),
            extra: MarkerExtra::default(),
        };
        assert!(is_stale(&marker(11), now, max_age));
        assert!(!is_stale(&marker(9), now, max_age));
    }

    #[test]
    fn test_read_fresh_clears_stale_marker() {
        let markers = markers();
        let now = Utc::now();
        markers.write("user-1", JobKind::WorkOrderScrape, now - Duration::minutes(11), MarkerExtra::default());

        assert!(markers.read_fresh("user-1", JobKind::WorkOrderScrape, now).is_none());
        assert!(markers.read("user-1", JobKind::WorkOrderScrape).is_none());
    }

    #[test]
    fn test_read_fresh_keeps_recent_marker() {
        let markers = markers();
        let now = Utc::now();
        markers.write("user-1", JobKind::WorkOrderScrape, now - Duration::minutes(2), MarkerExtra::default());
        assert!(markers.read_fresh("user-1", JobKind::WorkOrderScrape, now).is_some());
    }

    #[test]
    fn test_corrupt_marker_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store.set("scrape_session:user-1:work_orders", "{not json").unwrap();
        let markers = SessionMarkers::new(store.clone());

        assert!(markers.read("user-1", JobKind::WorkOrderScrape).is_none());
        assert_eq!(store.get("scrape_session:user-1:work_orders").unwrap(), None);
    }

    #[test]
    fn test_unavailable_storage_degrades_to_noop() {
        let markers = SessionMarkers::new(Arc::new(UnavailableStore));
        markers.write("user-1", JobKind::WorkOrderScrape, Utc::now(), MarkerExtra::default());
        assert!(markers.read("user-1", JobKind::WorkOrderScrape).is_none());
        markers.clear("user-1", JobKind::WorkOrderScrape);
        assert!(markers.list("user-1").is_empty());
    }
}

// Persistent session markers - resume in-flight jobs after a restart

pub mod marker;
pub mod store;

pub use marker::{is_stale, MarkerExtra, SessionMarker, SessionMarkers, DEFAULT_MAX_AGE_MINUTES};
pub use store::{FileStore, KeyValueStore, MemoryStore, StorageError, UnavailableStore};

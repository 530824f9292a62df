//! # Local Storage Layer
//!
//! Every local read and write in stitchkeep goes through the [`KeyValueStore`]
//! trait: a flat string-to-string medium with prefix enumeration. Nothing above
//! this module touches files or browser storage directly, so the medium can be
//! swapped (or faked) without changing business logic.
//!
//! ## Implementations
//!
//! - [`mem_backend::MemStore`]: shared in-memory medium. Several handles ("tabs")
//!   can be opened on the same medium; writes from one handle are announced to
//!   the others as [`StorageEvent`]s. Supports an optional byte quota.
//! - [`fs_backend::FsStore`]: one file per key in a directory, written atomically.
//!   Offers no change notifications, so other processes are only noticed through
//!   the heartbeat poll of the [`CrossTabSynchronizer`](crate::sync::CrossTabSynchronizer).
//!
//! ## Key Layout
//!
//! ```text
//! embroidery_<collection>      full JSON array of one collection
//! lastDataSave                 epoch ms of the most recent successful save (sync signal)
//! backup_<epoch-ms>            one BackupSnapshot
//! backup_info                  snapshot index (JSON array)
//! embroidery_saved_searches    saved searches
//! embroidery_search_history    search history (50 newest)
//! change_history               change log (1000 newest)
//! ```

use crate::error::Result;
use crate::model::COLLECTION_KEY_PREFIX;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod fs_backend;
pub mod mem_backend;

pub mod keys {
    pub const LAST_DATA_SAVE: &str = "lastDataSave";
    pub const BACKUP_PREFIX: &str = "backup_";
    pub const BACKUP_INDEX: &str = "backup_info";
    pub const SAVED_SEARCHES: &str = "embroidery_saved_searches";
    pub const SEARCH_HISTORY: &str = "embroidery_search_history";
    pub const CHANGE_HISTORY: &str = "change_history";
}

/// A write (or removal) observed on a shared medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// Handle that performed the write
    pub origin: Uuid,
}

/// Abstract interface for the local persistent medium.
///
/// All methods take `&self`; implementations handle their own interior
/// mutability so one medium can be shared by several components.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`. Fails with `QuotaExceeded` when the medium is full.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Change notifications from other handles on the same medium, if the
    /// medium supports them.
    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        None
    }

    /// Identity of this handle, stamped on the events it produces.
    fn origin(&self) -> Uuid;
}

/// Whether `key` belongs to stitchkeep (as opposed to some other app sharing the medium).
pub fn in_namespace(key: &str) -> bool {
    key == keys::LAST_DATA_SAVE
        || key == keys::CHANGE_HISTORY
        || key.starts_with(keys::BACKUP_PREFIX)
        || key.starts_with(COLLECTION_KEY_PREFIX)
}

pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_covers_system_keys_only() {
        assert!(in_namespace("lastDataSave"));
        assert!(in_namespace("embroidery_sales"));
        assert!(in_namespace("backup_1700000000000"));
        assert!(in_namespace("backup_info"));
        assert!(!in_namespace("theme"));
    }

    #[test]
    fn json_helpers_roundtrip() {
        let store = mem_backend::MemStore::new();
        write_json(&store, "nums", &vec![1, 2, 3]).unwrap();
        let back: Option<Vec<i32>> = read_json(&store, "nums").unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
        let missing: Option<Vec<i32>> = read_json(&store, "nope").unwrap();
        assert!(missing.is_none());
    }
}

use super::{KeyValueStore, StorageEvent};
use crate::error::{Result, VaultError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct Medium {
    entries: BTreeMap<String, String>,
    quota: Option<usize>,
}

impl Medium {
    fn usage(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

/// In-memory key/value medium.
///
/// Cloning a `MemStore` yields another handle for the *same* tab (same origin).
/// [`MemStore::open_tab`] yields a handle for a different tab on the same
/// medium, which is how tests simulate several browser tabs of one origin.
#[derive(Clone)]
pub struct MemStore {
    medium: Arc<Mutex<Medium>>,
    events: broadcast::Sender<StorageEvent>,
    origin: Uuid,
}

impl Default for MemStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            medium: Arc::new(Mutex::new(Medium::default())),
            events,
            origin: Uuid::new_v4(),
        }
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new handle on the same medium with its own origin.
    pub fn open_tab(&self) -> Self {
        Self {
            medium: Arc::clone(&self.medium),
            events: self.events.clone(),
            origin: Uuid::new_v4(),
        }
    }

    /// Limit the medium to `bytes` (sum of key and value lengths).
    pub fn set_quota(&self, bytes: Option<usize>) {
        self.medium.lock().quota = bytes;
    }

    /// Bytes currently stored.
    pub fn usage(&self) -> usize {
        self.medium.lock().usage()
    }

    fn announce(&self, key: &str) {
        // No receivers is fine: nobody is listening yet
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            origin: self.origin,
        });
    }
}

impl KeyValueStore for MemStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.medium.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        {
            let mut medium = self.medium.lock();
            if let Some(quota) = medium.quota {
                let current = medium.entries.get(key).map_or(0, |old| key.len() + old.len());
                let projected = medium.usage() - current + key.len() + value.len();
                if projected > quota {
                    return Err(VaultError::QuotaExceeded {
                        key: key.to_string(),
                    });
                }
            }
            medium.entries.insert(key.to_string(), value.to_string());
        }
        self.announce(key);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let removed = self.medium.lock().entries.remove(key).is_some();
        if removed {
            self.announce(key);
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .medium
            .lock()
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        Some(self.events.subscribe())
    }

    fn origin(&self) -> Uuid {
        self.origin
    }
}

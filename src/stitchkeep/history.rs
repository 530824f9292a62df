//! Append-only change log kept beside the working set.
//!
//! Lives under `change_history`, holds the newest [`MAX_CHANGE_HISTORY`]
//! entries, and is never snapshotted or validated.

use crate::error::Result;
use crate::model::Collection;
use crate::store::{keys, read_json, write_json, KeyValueStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_CHANGE_HISTORY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    Restore,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub timestamp: DateTime<Utc>,
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<Collection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub summary: String,
}

impl ChangeEntry {
    pub fn new(action: ChangeAction, summary: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            collection: None,
            record_id: None,
            summary: summary.into(),
        }
    }

    pub fn on_record(mut self, collection: Collection, record_id: Option<String>) -> Self {
        self.collection = Some(collection);
        self.record_id = record_id;
        self
    }
}

pub struct ChangeHistory<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> ChangeHistory<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn record(&self, entry: ChangeEntry) -> Result<()> {
        let mut entries = self.entries()?;
        entries.push(entry);
        if entries.len() > MAX_CHANGE_HISTORY {
            let excess = entries.len() - MAX_CHANGE_HISTORY;
            entries.drain(..excess);
        }
        write_json(&self.store, keys::CHANGE_HISTORY, &entries)
    }

    /// Oldest first.
    pub fn entries(&self) -> Result<Vec<ChangeEntry>> {
        Ok(read_json(&self.store, keys::CHANGE_HISTORY)?.unwrap_or_default())
    }

    /// At most `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ChangeEntry>> {
        Ok(self.entries()?.into_iter().rev().take(limit).collect())
    }
}

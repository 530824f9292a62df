use super::criteria::SearchCriteria;
use crate::error::{Result, VaultError};
use crate::model::Collection;
use crate::store::{keys, read_json, write_json, KeyValueStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entries kept in the search history.
pub const MAX_SEARCH_HISTORY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSearch {
    pub id: String,
    pub name: String,
    pub collection: Collection,
    pub criteria: SearchCriteria,
    pub created_at: DateTime<Utc>,
}

impl SavedSearch {
    pub fn new(name: &str, collection: Collection, criteria: SearchCriteria) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            collection,
            criteria,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistoryEntry {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<Collection>,
    pub searched_at: DateTime<Utc>,
}

pub fn load_saved(store: &dyn KeyValueStore) -> Result<Vec<SavedSearch>> {
    Ok(read_json(store, keys::SAVED_SEARCHES)?.unwrap_or_default())
}

pub fn add_saved(store: &dyn KeyValueStore, search: SavedSearch) -> Result<()> {
    let mut all = load_saved(store)?;
    all.push(search);
    write_json(store, keys::SAVED_SEARCHES, &all)
}

pub fn find_saved(store: &dyn KeyValueStore, id: &str) -> Result<SavedSearch> {
    load_saved(store)?
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| VaultError::SavedSearchNotFound(id.to_string()))
}

pub fn remove_saved(store: &dyn KeyValueStore, id: &str) -> Result<()> {
    let mut all = load_saved(store)?;
    let before = all.len();
    all.retain(|s| s.id != id);
    if all.len() == before {
        return Err(VaultError::SavedSearchNotFound(id.to_string()));
    }
    write_json(store, keys::SAVED_SEARCHES, &all)
}

/// Oldest first.
pub fn load_history(store: &dyn KeyValueStore) -> Result<Vec<SearchHistoryEntry>> {
    Ok(read_json(store, keys::SEARCH_HISTORY)?.unwrap_or_default())
}

pub fn push_history(store: &dyn KeyValueStore, entry: SearchHistoryEntry) -> Result<()> {
    let mut history = load_history(store)?;
    history.push(entry);
    if history.len() > MAX_SEARCH_HISTORY {
        let excess = history.len() - MAX_SEARCH_HISTORY;
        history.drain(..excess);
    }
    write_json(store, keys::SEARCH_HISTORY, &history)
}

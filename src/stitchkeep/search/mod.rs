//! # Search
//!
//! Two ways to narrow a collection:
//!
//! - **Free-text search** ([`SearchManager::search`]): debounced. Calls arriving
//!   within the quiet period coalesce and only the trailing one runs. Returns
//!   matching records plus up to ten suggestions.
//! - **Advanced filter** ([`SearchCriteria`]): structured, applied immediately.
//!
//! Saved searches and search history live in the local store under their own
//! keys. They are not part of the working set, so they are neither validated
//! nor snapshotted.

use crate::error::Result;
use crate::model::{Collection, Record, WorkingSet};
use crate::store::KeyValueStore;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

pub mod criteria;
pub mod saved;

pub use criteria::SearchCriteria;
pub use saved::{SavedSearch, SearchHistoryEntry};

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const MIN_SUGGESTION_QUERY: usize = 2;
pub const MAX_SUGGESTIONS: usize = 10;

const SUGGESTION_FIELDS: [&str; 4] = ["description", "customer", "notes", "tags"];

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    pub query: String,
    pub matches: Vec<Record>,
    pub suggestions: Vec<String>,
}

pub struct SearchManager<S: KeyValueStore> {
    store: S,
    debounce: Duration,
    generation: AtomicU64,
}

impl<S: KeyValueStore> SearchManager<S> {
    pub fn new(store: S, debounce: Duration) -> Self {
        Self {
            store,
            debounce,
            generation: AtomicU64::new(0),
        }
    }

    /// Debounced free-text search.
    ///
    /// Resolves to `None` when a later call started during the quiet period;
    /// that later call carries the result.
    pub async fn search(
        &self,
        collection: Collection,
        records: &[Record],
        text: &str,
    ) -> Result<Option<SearchResults>> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.debounce).await;
        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!(query = text, "search superseded");
            return Ok(None);
        }
        self.search_now(collection, records, text).map(Some)
    }

    /// Undebounced search. Records the query in the history.
    pub fn search_now(
        &self,
        collection: Collection,
        records: &[Record],
        text: &str,
    ) -> Result<SearchResults> {
        let query = text.trim();
        let matches = if query.is_empty() {
            records.to_vec()
        } else {
            records
                .iter()
                .filter(|r| criteria::text_matches(r, query))
                .cloned()
                .collect()
        };

        if !query.is_empty() {
            saved::push_history(
                &self.store,
                SearchHistoryEntry {
                    query: query.to_string(),
                    collection: Some(collection),
                    searched_at: Utc::now(),
                },
            )?;
        }

        Ok(SearchResults {
            query: query.to_string(),
            suggestions: suggestions(records, query),
            matches,
        })
    }

    pub fn filter(&self, records: &[Record], criteria: &SearchCriteria) -> Vec<Record> {
        criteria.filter(records)
    }

    pub fn save_search(
        &self,
        name: &str,
        collection: Collection,
        criteria: SearchCriteria,
    ) -> Result<SavedSearch> {
        let search = SavedSearch::new(name, collection, criteria);
        saved::add_saved(&self.store, search.clone())?;
        Ok(search)
    }

    pub fn list_saved(&self) -> Result<Vec<SavedSearch>> {
        saved::load_saved(&self.store)
    }

    pub fn get_saved(&self, id: &str) -> Result<SavedSearch> {
        saved::find_saved(&self.store, id)
    }

    /// Run a saved search against its collection in `ws`.
    pub fn apply_saved(&self, id: &str, ws: &WorkingSet) -> Result<Vec<Record>> {
        let search = self.get_saved(id)?;
        Ok(search.criteria.filter(ws.collection(search.collection)))
    }

    pub fn delete_saved(&self, id: &str) -> Result<()> {
        saved::remove_saved(&self.store, id)
    }

    /// Newest first.
    pub fn history(&self) -> Result<Vec<SearchHistoryEntry>> {
        let mut history = saved::load_history(&self.store)?;
        history.reverse();
        Ok(history)
    }
}

/// Distinct field values containing `query`, at most [`MAX_SUGGESTIONS`].
pub fn suggestions(records: &[Record], query: &str) -> Vec<String> {
    let query = query.trim().to_lowercase();
    if query.chars().count() < MIN_SUGGESTION_QUERY {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for record in records {
        for candidate in suggestion_values(record) {
            let lower = candidate.to_lowercase();
            if lower.contains(&query) && seen.insert(lower) {
                out.push(candidate);
                if out.len() == MAX_SUGGESTIONS {
                    return out;
                }
            }
        }
    }
    out
}

fn suggestion_values(record: &Record) -> Vec<String> {
    let mut values = Vec::new();
    for field in SUGGESTION_FIELDS {
        match (field, record.get(field)) {
            ("tags", Some(_)) => values.extend(criteria::record_tags(record)),
            (_, Some(Value::String(s))) if !s.trim().is_empty() => {
                values.push(s.trim().to_string())
            }
            _ => {}
        }
    }
    values
}

//! Short-lived memoization of derived views plus pagination arithmetic.
//!
//! Entries expire a fixed TTL after insertion. Expiry is checked lazily when an
//! entry is read; there is no background sweeper.

use crate::model::Record;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_TTL_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub data: Vec<Record>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CacheManager {
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS))
    }
}

impl CacheManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&mut self, key: &str) -> Option<&[Record]> {
        self.get_at(key, Utc::now())
    }

    /// Lookup as of `now`. An expired entry is dropped and reported absent.
    pub fn get_at(&mut self, key: &str, now: DateTime<Utc>) -> Option<&[Record]> {
        let expired = match self.entries.get(key) {
            Some(entry) => now - entry.captured_at > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.data.as_slice())
    }

    pub fn set(&mut self, key: &str, data: Vec<Record>) {
        self.set_at(key, data, Utc::now());
    }

    pub fn set_at(&mut self, key: &str, data: Vec<Record>, now: DateTime<Utc>) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                data,
                captured_at: now,
            },
        );
    }

    pub fn invalidate(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    pub data: Vec<T>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

/// Slice `data` into page `page` (1-based) of `page_size` items.
///
/// A zero page size is treated as one. Pages past the end come back empty;
/// keeping `page` in range is the caller's job (see [`Pager`]).
pub fn paginate<T: Clone>(data: &[T], page: usize, page_size: usize) -> PageResult<T> {
    let page_size = page_size.max(1);
    let page = page.max(1);
    let total_items = data.len();
    let total_pages = total_items.div_ceil(page_size);

    let start = (page - 1).saturating_mul(page_size).min(total_items);
    let end = start.saturating_add(page_size).min(total_items);

    PageResult {
        data: data[start..end].to_vec(),
        current_page: page,
        total_pages,
        total_items,
        has_next_page: page < total_pages,
        has_prev_page: page > 1,
    }
}

/// Current page position for one list view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pager {
    page: usize,
    page_size: usize,
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Changing the page size always goes back to the first page.
    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size.max(1);
        self.page = 1;
    }

    /// Jump to `page`, clamped to `[1, total_pages]`.
    pub fn go_to(&mut self, page: usize, total_items: usize) {
        let last = total_items.div_ceil(self.page_size).max(1);
        self.page = page.clamp(1, last);
    }

    pub fn next(&mut self, total_items: usize) {
        self.go_to(self.page + 1, total_items);
    }

    pub fn prev(&mut self, total_items: usize) {
        self.go_to(self.page.saturating_sub(1), total_items);
    }

    pub fn view<T: Clone>(&mut self, data: &[T]) -> PageResult<T> {
        // Data may have shrunk since the page was chosen
        self.go_to(self.page, data.len());
        paginate(data, self.page, self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new().with("n", i)).collect()
    }

    #[test]
    fn entry_expires_after_ttl() {
        let mut cache = CacheManager::new(Duration::seconds(300));
        let t = Utc::now();
        cache.set_at("inventory:all", records(2), t);

        assert!(cache.get_at("inventory:all", t + Duration::seconds(300)).is_some());
        assert!(cache
            .get_at("inventory:all", t + Duration::seconds(301))
            .is_none());
        // Lazily evicted on that read
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidation() {
        let mut cache = CacheManager::default();
        cache.set("a", records(1));
        cache.set("b", records(1));
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        cache.invalidate_all();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn pages_reconstruct_the_data() {
        for n in [0usize, 1, 9, 10, 11, 37] {
            for p in [1usize, 3, 10] {
                let data: Vec<usize> = (0..n).collect();
                let first = paginate(&data, 1, p);
                assert_eq!(first.total_pages, n.div_ceil(p));

                let mut rebuilt = Vec::new();
                for page in 1..=first.total_pages {
                    rebuilt.extend(paginate(&data, page, p).data);
                }
                assert_eq!(rebuilt, data, "n={} p={}", n, p);
            }
        }
    }

    #[test]
    fn page_flags() {
        let data: Vec<u8> = (0..25).collect();
        let middle = paginate(&data, 2, 10);
        assert_eq!(middle.data.len(), 10);
        assert!(middle.has_next_page && middle.has_prev_page);

        let last = paginate(&data, 3, 10);
        assert_eq!(last.data, vec![20, 21, 22, 23, 24]);
        assert!(!last.has_next_page);
        assert_eq!(last.total_items, 25);
    }

    #[test]
    fn pager_resets_on_page_size_change_and_clamps() {
        let mut pager = Pager::new(10);
        pager.next(25);
        pager.next(25);
        pager.next(25);
        assert_eq!(pager.page(), 3);

        pager.set_page_size(5);
        assert_eq!(pager.page(), 1);

        pager.prev(25);
        assert_eq!(pager.page(), 1);

        pager.go_to(99, 25);
        assert_eq!(pager.page(), 5);

        let view = pager.view(&(0..12).collect::<Vec<u8>>());
        assert_eq!(view.current_page, 3);
        assert_eq!(view.data, vec![10, 11]);
    }
}

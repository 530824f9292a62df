//! # Persistence Gateway
//!
//! Orchestrates the two backends a working set lives in:
//!
//! - the remote [`CollectionApi`] (authoritative when reachable), and
//! - the local [`KeyValueStore`] (always written, read only as a fallback).
//!
//! ## Save
//!
//! 1. Validate. Structural violations abort before anything is written.
//! 2. Replace all six remote collections concurrently. Failures are logged and
//!    collected, never returned: the tool has to keep working offline.
//! 3. Write all six collections and the sync signal (`lastDataSave`) to the
//!    local store. If the medium is full, run one cleanup pass and retry once;
//!    a second failure rolls those keys back to their previous values and is
//!    returned.
//!
//! ## Load
//!
//! All six remote reads run concurrently. If **any** of them fails the whole
//! load is served from the local store, so fresh and stale collections are
//! never mixed. A remote load does not overwrite the local copy; the next save
//! does.

use crate::error::{Result, VaultError};
use crate::integrity::{working_set_from_value, IntegrityReport, IntegrityValidator};
use crate::model::{Collection, Record, WorkingSet};
use crate::remote::{CollectionApi, HealthStatus, RemoteError, RemoteResult};
use crate::store::{keys, write_json, KeyValueStore};
use chrono::Utc;
use futures_util::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Keys the quota cleanup is allowed to drop.
static DISPOSABLE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(temp|old|backup)").expect("static regex"));

const IMAGE_FIELDS: [&str; 2] = ["imageUrl", "imageData"];

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Upper bound for any single remote call.
    pub remote_timeout: Duration,
    /// Image payloads longer than this are stripped when the local store is full.
    pub image_strip_threshold: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(5),
            image_strip_threshold: 500_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Remote,
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub stripped_images: usize,
    pub removed_keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SaveReport {
    /// Collections whose remote write failed, with the reason.
    pub remote_failures: Vec<(Collection, String)>,
    pub integrity: IntegrityReport,
    /// Value written to `lastDataSave`
    pub signal: i64,
    /// Present when the local write needed a quota cleanup.
    pub cleanup: Option<CleanupReport>,
}

impl SaveReport {
    pub fn remote_synced(&self) -> bool {
        self.remote_failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub working_set: WorkingSet,
    pub source: DataSource,
    pub integrity: IntegrityReport,
    /// Why the remote read was abandoned, for local loads.
    pub remote_error: Option<String>,
}

pub struct PersistenceGateway<S: KeyValueStore, A: CollectionApi> {
    store: S,
    api: A,
    validator: IntegrityValidator,
    options: GatewayOptions,
}

impl<S: KeyValueStore, A: CollectionApi> PersistenceGateway<S, A> {
    pub fn new(store: S, api: A, options: GatewayOptions) -> Self {
        Self {
            store,
            api,
            validator: IntegrityValidator::new(),
            options,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn save(&self, ws: &mut WorkingSet) -> Result<SaveReport> {
        let integrity = self.validator.validate(ws)?;

        let remote_failures = self.push_remote(ws).await;
        if remote_failures.is_empty() {
            debug!("remote save complete");
        } else {
            for (collection, reason) in &remote_failures {
                warn!(
                    collection = %collection,
                    error = %reason,
                    "remote save failed, keeping local copy"
                );
            }
        }

        let signal = Utc::now().timestamp_millis();
        let cleanup = self.write_local_with_recovery(ws, signal)?;

        Ok(SaveReport {
            remote_failures,
            integrity,
            signal,
            cleanup,
        })
    }

    pub async fn load(&self) -> Result<LoadReport> {
        match self.load_remote().await {
            Ok(mut working_set) => {
                let integrity = self.validator.repair(&mut working_set);
                info!(items = working_set.total_items(), "loaded from remote");
                Ok(LoadReport {
                    working_set,
                    source: DataSource::Remote,
                    integrity,
                    remote_error: None,
                })
            }
            Err(err) => {
                warn!(error = %err, "remote load failed, reading local store");
                let mut working_set = self.load_local()?;
                let integrity = self.validator.repair(&mut working_set);
                Ok(LoadReport {
                    working_set,
                    source: DataSource::Local,
                    integrity,
                    remote_error: Some(err.to_string()),
                })
            }
        }
    }

    /// All six collections from the server, or the first failure.
    pub async fn load_remote(&self) -> RemoteResult<WorkingSet> {
        let fetches = Collection::ALL.map(|collection| async move {
            let result = self.with_timeout(self.api.fetch(collection)).await;
            (collection, result)
        });

        let mut ws = WorkingSet::new();
        for (collection, result) in join_all(fetches).await {
            *ws.collection_mut(collection) = result?;
        }
        Ok(ws)
    }

    /// The local copy. Missing keys read as empty collections.
    pub fn load_local(&self) -> Result<WorkingSet> {
        let mut root = Map::new();
        for collection in Collection::ALL {
            let value = match self.store.get(&collection.storage_key())? {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Value::Array(Vec::new()),
            };
            root.insert(collection.as_str().to_string(), value);
        }
        working_set_from_value(Value::Object(root)).map_err(VaultError::Validation)
    }

    pub async fn update_remote(
        &self,
        collection: Collection,
        id: &str,
        patch: &Record,
    ) -> Result<()> {
        self.with_timeout(self.api.update(collection, id, patch))
            .await
            .map_err(VaultError::from)
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.with_timeout(self.api.health())
            .await
            .map_err(VaultError::from)
    }

    /// Epoch ms of the last successful save by any tab, if any.
    pub fn read_signal(&self) -> Result<Option<i64>> {
        Ok(self
            .store
            .get(keys::LAST_DATA_SAVE)?
            .and_then(|raw| raw.trim().parse().ok()))
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = RemoteResult<T>>,
    ) -> RemoteResult<T> {
        match tokio::time::timeout(self.options.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    async fn push_remote(&self, ws: &WorkingSet) -> Vec<(Collection, String)> {
        let writes = Collection::ALL.map(|collection| async move {
            let records = ws.collection(collection);
            let result = self.with_timeout(self.api.replace(collection, records)).await;
            (collection, result)
        });

        join_all(writes)
            .await
            .into_iter()
            .filter_map(|(collection, result)| result.err().map(|e| (collection, e.to_string())))
            .collect()
    }

    /// The six collections plus the sync signal, the unit a local save replaces.
    fn local_keys() -> Vec<String> {
        Collection::ALL
            .iter()
            .map(Collection::storage_key)
            .chain(std::iter::once(keys::LAST_DATA_SAVE.to_string()))
            .collect()
    }

    fn write_local(&self, ws: &WorkingSet, signal: i64) -> Result<()> {
        for collection in Collection::ALL {
            write_json(&self.store, &collection.storage_key(), ws.collection(collection))?;
        }
        self.store.set(keys::LAST_DATA_SAVE, &signal.to_string())
    }

    /// Write the local copy, with one cleanup and retry when the medium is full.
    ///
    /// If the retry fails too, every key of the unit is put back to its
    /// previous value so the local copy never mixes two saves.
    fn write_local_with_recovery(
        &self,
        ws: &mut WorkingSet,
        signal: i64,
    ) -> Result<Option<CleanupReport>> {
        let previous = self.read_unit()?;
        match self.write_local(ws, signal) {
            Ok(()) => Ok(None),
            Err(VaultError::QuotaExceeded { key }) => {
                warn!(key = %key, "local store full, running cleanup before retry");
                let report = self.cleanup(ws)?;
                match self.write_local(ws, signal) {
                    Ok(()) => {
                        info!(
                            stripped = report.stripped_images,
                            removed = report.removed_keys.len(),
                            "local save succeeded after cleanup"
                        );
                        Ok(Some(report))
                    }
                    Err(err) => {
                        error!(error = %err, "local save failed after cleanup, rolling back");
                        self.restore_unit(&previous);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                self.restore_unit(&previous);
                Err(err)
            }
        }
    }

    fn read_unit(&self) -> Result<Vec<(String, Option<String>)>> {
        Self::local_keys()
            .into_iter()
            .map(|key| {
                let value = self.store.get(&key)?;
                Ok((key, value))
            })
            .collect()
    }

    fn restore_unit(&self, previous: &[(String, Option<String>)]) {
        // Free everything first; the old values fitted before this save began
        for (key, _) in previous {
            if let Err(err) = self.store.remove(key) {
                error!(key = %key, error = %err, "rollback could not remove key");
            }
        }
        for (key, value) in previous {
            if let Some(value) = value {
                if let Err(err) = self.store.set(key, value) {
                    error!(key = %key, error = %err, "rollback could not restore key");
                }
            }
        }
    }

    /// Free space: drop oversized image payloads and disposable keys.
    fn cleanup(&self, ws: &mut WorkingSet) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let threshold = self.options.image_strip_threshold;

        for collection in Collection::ALL {
            for record in ws.collection_mut(collection).iter_mut() {
                report.stripped_images += strip_large_images(record, threshold);
            }
        }

        for key in self.store.keys_with_prefix("")? {
            if DISPOSABLE_KEY.is_match(&key) {
                self.store.remove(&key)?;
                report.removed_keys.push(key);
            }
        }
        Ok(report)
    }
}

fn strip_large_images(record: &mut Record, threshold: usize) -> usize {
    let too_big = |v: Option<&Value>| matches!(v, Some(Value::String(s)) if s.len() > threshold);

    let mut stripped = 0;
    for field in IMAGE_FIELDS {
        if too_big(record.get(field)) {
            record.remove(field);
            stripped += 1;
        }
    }
    if let Some(Value::Object(photo)) = record.get_mut("photo") {
        if too_big(photo.get("dataUrl")) {
            photo.remove("dataUrl");
            stripped += 1;
        }
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mem::MemCollectionApi;
    use crate::store::mem_backend::MemStore;
    use async_trait::async_trait;

    fn gateway() -> (MemStore, MemCollectionApi, PersistenceGateway<MemStore, MemCollectionApi>) {
        let store = MemStore::new();
        let api = MemCollectionApi::new();
        let gw = PersistenceGateway::new(store.clone(), api.clone(), GatewayOptions::default());
        (store, api, gw)
    }

    fn sample() -> WorkingSet {
        let mut ws = WorkingSet::new();
        ws.inventory
            .push(Record::new().with("name", "Hoop A").with("status", "pending"));
        ws.customers.push(Record::new().with("name", "Ada"));
        ws
    }

    #[tokio::test]
    async fn save_writes_remote_local_and_signal() {
        let (store, api, gw) = gateway();
        let mut ws = sample();

        let report = gw.save(&mut ws).await.unwrap();

        assert!(report.remote_synced());
        assert_eq!(api.replace_calls(), 6);
        assert_eq!(api.records(Collection::Customers).len(), 1);
        assert!(store.get("embroidery_inventory").unwrap().is_some());
        assert_eq!(gw.read_signal().unwrap(), Some(report.signal));
    }

    #[tokio::test]
    async fn remote_failure_is_reported_not_returned() {
        let (_store, api, gw) = gateway();
        api.fail_collection(Collection::Customers, 500);
        let mut ws = sample();

        let report = gw.save(&mut ws).await.unwrap();
        assert_eq!(report.remote_failures.len(), 1);
        assert_eq!(report.remote_failures[0].0, Collection::Customers);

        let local = gw.load_local().unwrap();
        assert_eq!(local.customers, ws.customers);
    }

    #[tokio::test]
    async fn partial_remote_load_falls_back_entirely() {
        let (_store, api, gw) = gateway();
        let mut ws = sample();
        gw.save(&mut ws).await.unwrap();

        // Server now has different inventory, but sales is broken
        api.seed(Collection::Inventory, vec![Record::new().with("name", "Server only")]);
        api.fail_collection(Collection::Sales, 503);

        let report = gw.load().await.unwrap();
        assert_eq!(report.source, DataSource::Local);
        assert!(report.remote_error.is_some());
        assert_eq!(report.working_set.inventory[0].name(), Some("Hoop A"));
    }

    #[tokio::test]
    async fn remote_load_does_not_touch_local_copy() {
        let (store, api, gw) = gateway();
        api.seed(Collection::Ideas, vec![Record::new().with("name", "Pansy")]);

        let report = gw.load().await.unwrap();
        assert_eq!(report.source, DataSource::Remote);
        assert_eq!(report.working_set.ideas.len(), 1);
        assert!(store.get("embroidery_ideas").unwrap().is_none());
    }

    #[tokio::test]
    async fn local_load_heals_corrupt_images() {
        let (store, api, gw) = gateway();
        api.set_offline(true);
        store
            .set(
                "embroidery_gallery",
                r#"[{"name":"Tulip","imageData":"\u0000\u0001binary"}]"#,
            )
            .unwrap();

        let report = gw.load().await.unwrap();
        assert_eq!(report.integrity.healed.len(), 1);
        assert_eq!(
            report.working_set.gallery[0],
            Record::new().with("name", "Tulip")
        );
    }

    #[tokio::test]
    async fn malformed_local_collection_is_a_validation_error() {
        let (store, api, gw) = gateway();
        api.set_offline(true);
        store.set("embroidery_sales", r#"{"not":"an array"}"#).unwrap();

        let err = gw.load().await.unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn quota_cleanup_then_retry() {
        let (store, _api, gw) = gateway();
        let big_image = format!("data:image/png;base64,{}", "A".repeat(600_000));
        let mut ws = sample();
        ws.gallery.push(Record::new().with("name", "Big").with("imageData", big_image));

        store.set("temp_upload", &"x".repeat(1000)).unwrap();
        store.set_quota(Some(10_000));

        let report = gw.save(&mut ws).await.unwrap();
        let cleanup = report.cleanup.unwrap();
        assert_eq!(cleanup.stripped_images, 1);
        assert_eq!(cleanup.removed_keys, vec!["temp_upload".to_string()]);
        assert!(!ws.gallery[0].contains_key("imageData"));
    }

    #[tokio::test]
    async fn quota_failure_after_cleanup_is_fatal() {
        let (store, _api, gw) = gateway();
        store.set_quota(Some(10));
        let mut ws = sample();

        let err = gw.save(&mut ws).await.unwrap_err();
        assert!(matches!(err, VaultError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn failed_local_save_leaves_previous_copy_intact() {
        let (store, api, gw) = gateway();
        api.set_offline(true);
        let mut first = WorkingSet::new();
        first.inventory.push(Record::new().with("name", "old"));
        let saved = gw.save(&mut first).await.unwrap();

        let mut second = WorkingSet::new();
        second.inventory.push(Record::new().with("name", "new"));
        second
            .invoices
            .push(Record::new().with("notes", "x".repeat(5_000)));
        store.set_quota(Some(store.usage() + 100));

        let err = gw.save(&mut second).await.unwrap_err();
        assert!(matches!(err, VaultError::QuotaExceeded { .. }));
        assert_eq!(gw.load_local().unwrap(), first);
        assert_eq!(gw.read_signal().unwrap(), Some(saved.signal));
    }

    #[tokio::test]
    async fn full_store_on_signal_write_gets_cleanup_too() {
        let (store, _api, gw) = gateway();
        let mut ws = sample();
        let collections: usize = Collection::ALL
            .iter()
            .map(|c| {
                let raw = serde_json::to_string(ws.collection(*c)).unwrap();
                c.storage_key().len() + raw.len()
            })
            .sum();
        store.set("temp_upload", &"x".repeat(1000)).unwrap();
        // Room for the collections, none for lastDataSave
        store.set_quota(Some(store.usage() + collections));

        let report = gw.save(&mut ws).await.unwrap();
        assert_eq!(
            report.cleanup.unwrap().removed_keys,
            vec!["temp_upload".to_string()]
        );
        assert_eq!(gw.read_signal().unwrap(), Some(report.signal));
    }

    /// A server that accepts connections and never answers.
    struct HangingApi;

    #[async_trait]
    impl CollectionApi for HangingApi {
        async fn fetch(&self, _collection: Collection) -> RemoteResult<Vec<Record>> {
            std::future::pending().await
        }

        async fn replace(&self, _collection: Collection, _records: &[Record]) -> RemoteResult<()> {
            std::future::pending().await
        }

        async fn update(&self, _c: Collection, _id: &str, _patch: &Record) -> RemoteResult<()> {
            std::future::pending().await
        }

        async fn health(&self) -> RemoteResult<HealthStatus> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_remote_times_out_and_falls_back() {
        let options = GatewayOptions {
            remote_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let gw = PersistenceGateway::new(MemStore::new(), HangingApi, options);
        let started = tokio::time::Instant::now();

        let mut ws = sample();
        let saved = gw.save(&mut ws).await.unwrap();
        assert_eq!(saved.remote_failures.len(), 6);
        let timeout = RemoteError::Timeout.to_string();
        assert!(saved.remote_failures.iter().all(|(_, reason)| *reason == timeout));

        let loaded = gw.load().await.unwrap();
        assert_eq!(loaded.source, DataSource::Local);
        assert_eq!(loaded.working_set, ws);
        // Remote calls run concurrently: one timeout per save and per load
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert!(matches!(gw.health().await, Err(VaultError::RemoteUnavailable(_))));
    }
}

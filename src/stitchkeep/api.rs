//! # Vault Facade
//!
//! [`Vault`] is the single entry point for hosts (the CLI, a UI adapter, tests).
//! It owns the [`WorkingSet`] and wires every component around it:
//!
//! ```text
//! mutation -> WorkingSet -> PersistenceGateway (validate, remote, local, signal)
//!                        -> CacheManager invalidation
//!                        -> ChangeHistory
//! storage events / heartbeat / focus -> CrossTabSynchronizer -> reload
//! ```
//!
//! Like the rest of the library it performs no terminal I/O and returns
//! structured values. Components never keep their own copy of the working set:
//! they get borrowed views, or a deep copy when snapshotting.
//!
//! ## Driving the Vault
//!
//! Cross-tab sync and auto-backup need a clock. Hosts either call
//! [`Vault::tick`] from their own loop, or hand control to [`Vault::run`], which
//! multiplexes the heartbeat, storage events, the debounce deadline and
//! [`HostSignal`]s until shutdown.
//!
//! ## Generic Over Backends
//!
//! `Vault<S, A>` is generic over the local medium and the remote API:
//! - Production: `Vault<FsStore, HttpCollectionApi>`
//! - Testing: `Vault<MemStore, MemCollectionApi>`

use crate::backup::{BackupManager, BackupSchedule, SnapshotIndexEntry, SnapshotType};
use crate::cache::{CacheManager, PageResult, Pager};
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::gateway::{DataSource, LoadReport, PersistenceGateway, SaveReport};
use crate::history::{ChangeAction, ChangeEntry, ChangeHistory};
use crate::model::{Collection, Record, WorkingSet};
use crate::remote::{CollectionApi, HealthStatus};
use crate::search::{SavedSearch, SearchCriteria, SearchHistoryEntry, SearchManager, SearchResults};
use crate::store::{KeyValueStore, StorageEvent};
use crate::sync::{CrossTabSynchronizer, ReconcileReason, SyncAction};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Events a host forwards to [`Vault::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    FocusRegained,
    Shutdown,
}

/// What one [`Vault::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub reconciled: Option<ReconcileReason>,
    pub auto_backup: Option<SnapshotIndexEntry>,
}

pub struct Vault<S: KeyValueStore + Clone, A: CollectionApi> {
    working_set: WorkingSet,
    gateway: PersistenceGateway<S, A>,
    cache: CacheManager,
    search: SearchManager<S>,
    backups: BackupManager<S>,
    sync: CrossTabSynchronizer,
    history: ChangeHistory<S>,
    pager: Pager,
    events: Option<broadcast::Receiver<StorageEvent>>,
    last_source: Option<DataSource>,
}

impl<S: KeyValueStore + Clone, A: CollectionApi> Vault<S, A> {
    /// A vault with an empty working set. Call [`Vault::reload`] (or use
    /// [`Vault::open`]) to populate it.
    pub fn new(store: S, api: A, config: &VaultConfig) -> Self {
        let events = store.subscribe();
        let mut backups = BackupManager::new(store.clone(), config.max_backups);
        if config.auto_backup {
            backups.enable_auto(config.auto_backup_interval(), Utc::now());
        }

        Self {
            working_set: WorkingSet::new(),
            sync: CrossTabSynchronizer::new(store.origin(), config.sync_timings()),
            cache: CacheManager::new(config.cache_ttl()),
            search: SearchManager::new(store.clone(), config.search_debounce()),
            history: ChangeHistory::new(store.clone()),
            pager: Pager::new(config.page_size),
            gateway: PersistenceGateway::new(store, api, config.gateway_options()),
            backups,
            events,
            last_source: None,
        }
    }

    pub async fn open(store: S, api: A, config: &VaultConfig) -> Result<Self> {
        let mut vault = Self::new(store, api, config);
        vault.reload().await?;
        Ok(vault)
    }

    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    pub fn records(&self, collection: Collection) -> &[Record] {
        self.working_set.collection(collection)
    }

    /// Where the current working set came from, once loaded.
    pub fn last_source(&self) -> Option<DataSource> {
        self.last_source
    }

    pub fn gateway(&self) -> &PersistenceGateway<S, A> {
        &self.gateway
    }

    // --- Load / save ---

    /// Discard the working set and load it again through the gateway.
    pub async fn reload(&mut self) -> Result<LoadReport> {
        let report = self.gateway.load().await?;
        self.working_set = report.working_set.clone();
        self.cache.invalidate_all();
        self.discard_queued_events();
        self.sync.note_reconciled(self.gateway.read_signal()?);
        self.last_source = Some(report.source);
        Ok(report)
    }

    pub async fn save(&mut self) -> Result<SaveReport> {
        let result = self.gateway.save(&mut self.working_set).await;
        // The working set may have changed even when the save failed
        self.cache.invalidate_all();
        let report = result?;
        self.sync.note_own_save(report.signal);
        Ok(report)
    }

    // --- Records ---

    /// Append a record. Records without an id get a local `name-millis` id.
    pub async fn add_record(
        &mut self,
        collection: Collection,
        mut record: Record,
    ) -> Result<Record> {
        if record.id().is_none() {
            let name = record.name().unwrap_or("item").to_string();
            if let Some(id) = Record::new_local(&name).get("id").cloned() {
                record.insert("id", id);
            }
        }
        if !record.contains_key("dateAdded") {
            record.insert("dateAdded", Utc::now().to_rfc3339());
        }

        self.working_set.collection_mut(collection).push(record.clone());
        self.log_change(
            ChangeEntry::new(ChangeAction::Create, describe(&record))
                .on_record(collection, record.id()),
        );
        self.save().await?;
        Ok(record)
    }

    /// Merge `patch` into the record with `id`.
    ///
    /// Records the server already knows are also patched remotely; a failed
    /// patch is covered by the full save that follows.
    pub async fn update_record(
        &mut self,
        collection: Collection,
        id: &str,
        patch: Record,
    ) -> Result<Record> {
        let record = self
            .working_set
            .find_mut(collection, id)
            .ok_or_else(|| not_found(collection, id))?;
        record.merge(&patch);
        let updated = record.clone();

        if let Some(server_id) = updated.server_id() {
            if let Err(err) = self.gateway.update_remote(collection, &server_id, &patch).await {
                warn!(
                    collection = %collection,
                    id = %server_id,
                    error = %err,
                    "remote patch failed"
                );
            }
        }

        self.log_change(
            ChangeEntry::new(ChangeAction::Update, describe(&updated))
                .on_record(collection, Some(id.to_string())),
        );
        self.save().await?;
        Ok(updated)
    }

    pub async fn delete_record(&mut self, collection: Collection, id: &str) -> Result<Record> {
        let records = self.working_set.collection_mut(collection);
        let pos = records
            .iter()
            .position(|r| r.id().as_deref() == Some(id))
            .ok_or_else(|| not_found(collection, id))?;
        let removed = records.remove(pos);

        self.log_change(
            ChangeEntry::new(ChangeAction::Delete, describe(&removed))
                .on_record(collection, Some(id.to_string())),
        );
        self.save().await?;
        Ok(removed)
    }

    // --- Views ---

    /// Debounced free-text search over one collection.
    pub async fn search(
        &self,
        collection: Collection,
        text: &str,
    ) -> Result<Option<SearchResults>> {
        self.search
            .search(collection, self.working_set.collection(collection), text)
            .await
    }

    pub fn search_now(&self, collection: Collection, text: &str) -> Result<SearchResults> {
        self.search
            .search_now(collection, self.working_set.collection(collection), text)
    }

    /// Filtered, paginated view at the pager's current page. Filter results are cached.
    pub fn filter_view(
        &mut self,
        collection: Collection,
        criteria: &SearchCriteria,
    ) -> PageResult<Record> {
        let key = format!(
            "{}:{}",
            collection,
            serde_json::to_string(criteria).unwrap_or_default()
        );

        let cached = self.cache.get(&key).map(|hit| hit.to_vec());
        let filtered = match cached {
            Some(hit) => {
                debug!(key = %key, "filter cache hit");
                hit
            }
            None => {
                let fresh = self
                    .search
                    .filter(self.working_set.collection(collection), criteria);
                self.cache.set(&key, fresh.clone());
                fresh
            }
        };
        self.pager.view(&filtered)
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    pub fn save_search(
        &self,
        name: &str,
        collection: Collection,
        criteria: SearchCriteria,
    ) -> Result<SavedSearch> {
        self.search.save_search(name, collection, criteria)
    }

    pub fn list_saved_searches(&self) -> Result<Vec<SavedSearch>> {
        self.search.list_saved()
    }

    pub fn apply_saved_search(&self, id: &str) -> Result<Vec<Record>> {
        self.search.apply_saved(id, &self.working_set)
    }

    pub fn delete_saved_search(&self, id: &str) -> Result<()> {
        self.search.delete_saved(id)
    }

    pub fn search_history(&self) -> Result<Vec<SearchHistoryEntry>> {
        self.search.history()
    }

    pub fn recent_changes(&self, limit: usize) -> Result<Vec<ChangeEntry>> {
        self.history.recent(limit)
    }

    // --- Backups ---

    pub fn create_snapshot(&self, kind: SnapshotType) -> Result<SnapshotIndexEntry> {
        self.backups.create_snapshot(&self.working_set, kind)
    }

    pub fn list_snapshots(&self) -> Result<Vec<SnapshotIndexEntry>> {
        self.backups.list_snapshots()
    }

    pub fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.backups.delete_snapshot(id)
    }

    /// Replace the working set with a snapshot.
    ///
    /// The snapshot is validated first; a malformed one leaves everything
    /// untouched. Otherwise the current state is kept as a `pre-restore`
    /// snapshot before the swap, then the restored set is persisted.
    pub async fn restore_snapshot(&mut self, id: &str) -> Result<SaveReport> {
        let snapshot = self.backups.load_snapshot(id)?;
        self.backups
            .create_snapshot(&self.working_set, SnapshotType::PreRestore)?;

        self.working_set = snapshot.data;
        info!(id, items = self.working_set.total_items(), "snapshot restored");
        self.log_change(ChangeEntry::new(
            ChangeAction::Restore,
            format!("restored snapshot {}", id),
        ));
        self.save().await
    }

    pub fn export(&self, compress: bool) -> Result<Vec<u8>> {
        self.backups.export_all(&self.working_set, compress)
    }

    /// Import an exported bundle (or bare working set), replacing everything.
    pub async fn import(&mut self, bytes: &[u8]) -> Result<SaveReport> {
        let incoming = self.backups.parse_import(bytes)?;
        self.backups
            .create_snapshot(&self.working_set, SnapshotType::PreImport)?;

        self.working_set = incoming;
        let items = self.working_set.total_items();
        info!(items, "data imported");
        self.log_change(ChangeEntry::new(
            ChangeAction::Import,
            format!("imported {} items", items),
        ));
        self.save().await
    }

    pub fn enable_auto_backup(&mut self, interval: chrono::Duration) {
        self.backups.enable_auto(interval, Utc::now());
    }

    pub fn disable_auto_backup(&mut self) {
        self.backups.disable_auto();
    }

    pub fn backup_schedule(&self) -> &BackupSchedule {
        self.backups.schedule()
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.gateway.health().await
    }

    // --- Host driver ---

    /// The host regained focus. Best effort: failures are logged, never returned.
    pub async fn handle_focus(&mut self) -> bool {
        match self.sync.on_focus() {
            SyncAction::Reconcile(reason) => self.reconcile(reason).await,
            SyncAction::Idle => false,
        }
    }

    /// One cooperative pass of sync and scheduling work.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        self.drain_events(now);

        let signal = self.gateway.read_signal()?;
        let reconciled = match self.sync.poll(now, signal) {
            SyncAction::Reconcile(reason) => self.reconcile(reason).await.then_some(reason),
            SyncAction::Idle => None,
        };
        let auto_backup = self.backups.run_scheduled(&self.working_set, now)?;

        Ok(TickOutcome {
            reconciled,
            auto_backup,
        })
    }

    /// Drive the vault until [`HostSignal::Shutdown`] (or the sender is dropped).
    pub async fn run(&mut self, mut signals: mpsc::Receiver<HostSignal>) -> Result<()> {
        let period = self
            .sync
            .timings()
            .heartbeat
            .to_std()
            .unwrap_or(Duration::from_secs(5));
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut events = self.events.take();
        info!("vault driver started");

        loop {
            let debounce = self
                .sync
                .debounce_deadline()
                .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or_default());

            let reconciled = tokio::select! {
                _ = heartbeat.tick() => self.tick_logged().await,
                _ = sleep_for(debounce) => self.tick_logged().await,
                event = next_event(&mut events) => match event {
                    Ok(event) => {
                        self.sync.on_storage_event(&event, Utc::now());
                        false
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "storage notifications dropped");
                        self.sync.on_missed_events(Utc::now());
                        false
                    }
                    Err(RecvError::Closed) => {
                        events = None;
                        false
                    }
                },
                signal = signals.recv() => match signal {
                    Some(HostSignal::FocusRegained) => self.handle_focus().await,
                    Some(HostSignal::Shutdown) | None => break,
                },
            };
            if reconciled {
                discard_pending(&mut events);
            }
        }

        self.events = events;
        info!("vault driver stopped");
        Ok(())
    }

    /// Returns whether the tick reconciled.
    async fn tick_logged(&mut self) -> bool {
        match self.tick(Utc::now()).await {
            Ok(outcome) => outcome.reconciled.is_some(),
            Err(err) => {
                warn!(error = %err, "driver tick failed");
                false
            }
        }
    }

    async fn reconcile(&mut self, reason: ReconcileReason) -> bool {
        info!(?reason, "reconciling with storage");
        match self.reload().await {
            Ok(report) => {
                debug!(source = ?report.source, "reconciled");
                true
            }
            Err(err) => {
                warn!(?reason, error = %err, "reconcile failed, keeping current working set");
                false
            }
        }
    }

    fn drain_events(&mut self, now: DateTime<Utc>) {
        let Some(rx) = self.events.as_mut() else {
            return;
        };
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    self.sync.on_storage_event(&event, now);
                }
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "storage notifications dropped");
                    self.sync.on_missed_events(now);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn discard_queued_events(&mut self) {
        discard_pending(&mut self.events);
    }

    fn log_change(&self, entry: ChangeEntry) {
        if let Err(err) = self.history.record(entry) {
            warn!(error = %err, "could not record change history");
        }
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

/// Events queued before a reload are already reflected in it.
fn discard_pending(events: &mut Option<broadcast::Receiver<StorageEvent>>) {
    if let Some(rx) = events.as_mut() {
        while !matches!(
            rx.try_recv(),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed)
        ) {}
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<StorageEvent>>,
) -> std::result::Result<StorageEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn describe(record: &Record) -> String {
    record
        .name()
        .map(str::to_string)
        .or_else(|| record.id())
        .unwrap_or_else(|| "unnamed record".to_string())
}

fn not_found(collection: Collection, id: &str) -> VaultError {
    VaultError::RecordNotFound {
        collection,
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mem::MemCollectionApi;
    use crate::store::mem_backend::MemStore;

    fn config() -> VaultConfig {
        VaultConfig {
            auto_backup: false,
            ..Default::default()
        }
    }

    async fn vault() -> (MemCollectionApi, Vault<MemStore, MemCollectionApi>) {
        let api = MemCollectionApi::new();
        let vault = Vault::open(MemStore::new(), api.clone(), &config())
            .await
            .unwrap();
        (api, vault)
    }

    #[tokio::test]
    async fn add_assigns_local_identity_and_persists() {
        let (api, mut vault) = vault().await;
        let added = vault
            .add_record(Collection::Inventory, Record::new().with("name", "Hoop A"))
            .await
            .unwrap();

        assert!(added.id().unwrap().starts_with("hoop-a-"));
        assert!(added.contains_key("dateAdded"));
        assert_eq!(api.records(Collection::Inventory).len(), 1);
        assert_eq!(vault.recent_changes(1).unwrap()[0].action, ChangeAction::Create);
    }

    #[tokio::test]
    async fn update_patches_server_copy() {
        let (api, mut vault) = vault().await;
        api.seed(
            Collection::Sales,
            vec![Record::new().with("_id", 5).with("status", "pending")],
        );
        vault.reload().await.unwrap();

        let updated = vault
            .update_record(Collection::Sales, "5", Record::new().with("status", "sold"))
            .await
            .unwrap();
        assert_eq!(updated.get_str("status"), Some("sold"));
        assert_eq!(api.records(Collection::Sales)[0].get_str("status"), Some("sold"));
    }

    #[tokio::test]
    async fn missing_record_is_an_error() {
        let (_api, mut vault) = vault().await;
        let err = vault
            .delete_record(Collection::Ideas, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn filter_view_is_cached_until_a_save() {
        let (_api, mut vault) = vault().await;
        vault
            .add_record(
                Collection::Sales,
                Record::new().with("name", "A").with("status", "pending"),
            )
            .await
            .unwrap();
        let criteria = SearchCriteria {
            status: vec!["pending".into()],
            ..Default::default()
        };

        assert_eq!(vault.filter_view(Collection::Sales, &criteria).total_items, 1);
        assert_eq!(vault.cache.len(), 1);

        vault
            .add_record(
                Collection::Sales,
                Record::new().with("name", "B").with("status", "pending"),
            )
            .await
            .unwrap();
        assert!(vault.cache.is_empty());
        assert_eq!(vault.filter_view(Collection::Sales, &criteria).total_items, 2);
    }

    #[tokio::test]
    async fn failed_save_still_drops_cached_views() {
        let (_api, mut vault) = vault().await;
        let criteria = SearchCriteria {
            status: vec!["pending".into()],
            ..Default::default()
        };
        assert_eq!(vault.filter_view(Collection::Sales, &criteria).total_items, 0);

        let store = vault.gateway().store();
        store.set_quota(Some(store.usage()));
        let pending = Record::new().with("name", "A").with("status", "pending");
        assert!(vault.add_record(Collection::Sales, pending).await.is_err());

        assert!(vault.cache.is_empty());
        assert_eq!(vault.filter_view(Collection::Sales, &criteria).total_items, 1);
    }

    #[tokio::test]
    async fn tick_fires_due_auto_backup() {
        let (_api, mut vault) = vault().await;
        let now = Utc::now();
        vault.backups.enable_auto(chrono::Duration::hours(1), now);

        let quiet = vault.tick(now).await.unwrap();
        assert!(quiet.auto_backup.is_none());

        let later = vault.tick(now + chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(later.auto_backup.unwrap().kind, SnapshotType::Auto);
    }
}

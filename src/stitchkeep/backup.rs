//! # Backups
//!
//! Point-in-time copies of the whole working set, kept in the local store.
//!
//! Each snapshot is one key (`backup_<epoch-ms>`) holding a [`BackupSnapshot`].
//! A separate lightweight index (`backup_info`) lists them so enumeration never
//! has to parse full snapshots. The snapshot id is its epoch-ms timestamp; two
//! snapshots taken in the same millisecond get consecutive ids.
//!
//! Retention keeps the newest `max_backups` snapshots (30 by default) and
//! deletes the oldest beyond that.
//!
//! Restoring is split across two layers: this module loads and validates the
//! snapshot (a malformed one yields [`VaultError::RestoreValidation`] and
//! nothing changes), while the [`Vault`](crate::api::Vault) takes the
//! `pre-restore` snapshot, swaps the working set and persists it.
//!
//! Exports are [`ExportBundle`] JSON documents, optionally gzip-compressed.

use crate::error::{Result, VaultError, Violation, ViolationList};
use crate::integrity::{check_structure, working_set_from_value};
use crate::model::{Collection, WorkingSet};
use crate::store::{keys, read_json, write_json, KeyValueStore};
use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use tracing::{debug, info};

pub const DEFAULT_MAX_BACKUPS: usize = 30;
pub const DEFAULT_AUTO_INTERVAL_HOURS: i64 = 24;

/// Format version written into snapshots and export bundles.
pub const FORMAT_VERSION: u32 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotType {
    Auto,
    Manual,
    PreRestore,
    PreImport,
}

impl fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SnapshotType::Auto => "auto",
            SnapshotType::Manual => "manual",
            SnapshotType::PreRestore => "pre-restore",
            SnapshotType::PreImport => "pre-import",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub total_items: usize,
    pub last_modified: DateTime<Utc>,
    pub app_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// Epoch ms; doubles as the snapshot id.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: SnapshotType,
    pub version: u32,
    pub data: WorkingSet,
    pub metadata: SnapshotMetadata,
}

impl BackupSnapshot {
    pub fn id(&self) -> String {
        self.timestamp.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIndexEntry {
    pub id: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: SnapshotType,
    pub total_items: usize,
}

impl SnapshotIndexEntry {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub total_items: usize,
    pub collections: BTreeMap<Collection, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub app_version: String,
    pub data: WorkingSet,
    pub metadata: ExportMetadata,
}

/// Fixed-interval auto-backup timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSchedule {
    enabled: bool,
    interval: Duration,
    next_due: Option<DateTime<Utc>>,
}

impl Default for BackupSchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::hours(DEFAULT_AUTO_INTERVAL_HOURS),
            next_due: None,
        }
    }
}

impl BackupSchedule {
    /// Enable (or re-enable) with `interval`, first firing one interval after `now`.
    pub fn enable(&mut self, interval: Duration, now: DateTime<Utc>) {
        self.enabled = true;
        self.interval = interval;
        self.next_due = Some(now + interval);
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.next_due = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    fn mark_fired(&mut self, now: DateTime<Utc>) {
        if self.enabled {
            self.next_due = Some(now + self.interval);
        }
    }
}

pub struct BackupManager<S: KeyValueStore> {
    store: S,
    max_backups: usize,
    schedule: BackupSchedule,
}

impl<S: KeyValueStore> BackupManager<S> {
    pub fn new(store: S, max_backups: usize) -> Self {
        Self {
            store,
            max_backups: max_backups.max(1),
            schedule: BackupSchedule::default(),
        }
    }

    pub fn schedule(&self) -> &BackupSchedule {
        &self.schedule
    }

    pub fn enable_auto(&mut self, interval: Duration, now: DateTime<Utc>) {
        self.schedule.enable(interval, now);
        info!(hours = interval.num_hours(), "auto-backup enabled");
    }

    pub fn disable_auto(&mut self) {
        self.schedule.disable();
        info!("auto-backup disabled");
    }

    /// Take the scheduled snapshot if it is due.
    pub fn run_scheduled(
        &mut self,
        ws: &WorkingSet,
        now: DateTime<Utc>,
    ) -> Result<Option<SnapshotIndexEntry>> {
        if !self.schedule.is_due(now) {
            return Ok(None);
        }
        let entry = self.create_snapshot_at(ws, SnapshotType::Auto, now)?;
        self.schedule.mark_fired(now);
        Ok(Some(entry))
    }

    pub fn create_snapshot(
        &self,
        ws: &WorkingSet,
        kind: SnapshotType,
    ) -> Result<SnapshotIndexEntry> {
        self.create_snapshot_at(ws, kind, Utc::now())
    }

    pub fn create_snapshot_at(
        &self,
        ws: &WorkingSet,
        kind: SnapshotType,
        now: DateTime<Utc>,
    ) -> Result<SnapshotIndexEntry> {
        let mut index = self.index()?;

        let mut timestamp = now.timestamp_millis();
        while index.iter().any(|e| e.timestamp == timestamp)
            || self.store.get(&snapshot_key(timestamp))?.is_some()
        {
            timestamp += 1;
        }

        let snapshot = BackupSnapshot {
            timestamp,
            kind,
            version: FORMAT_VERSION,
            data: ws.clone(),
            metadata: SnapshotMetadata {
                total_items: ws.total_items(),
                last_modified: now,
                app_version: crate::app_version(),
            },
        };
        write_json(&self.store, &snapshot_key(timestamp), &snapshot)?;

        let entry = SnapshotIndexEntry {
            id: snapshot.id(),
            timestamp,
            kind,
            total_items: snapshot.metadata.total_items,
        };
        index.push(entry.clone());
        self.enforce_retention(&mut index)?;
        write_json(&self.store, keys::BACKUP_INDEX, &index)?;

        info!(id = %entry.id, kind = %kind, items = entry.total_items, "snapshot created");
        Ok(entry)
    }

    /// Newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotIndexEntry>> {
        let mut index = self.index()?;
        index.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(index)
    }

    /// Load and validate a snapshot. Malformed data is a `RestoreValidation` error.
    pub fn load_snapshot(&self, id: &str) -> Result<BackupSnapshot> {
        let timestamp = parse_id(id)?;
        let raw = self
            .store
            .get(&snapshot_key(timestamp))?
            .ok_or_else(|| VaultError::SnapshotNotFound(id.to_string()))?;

        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| restore_violation("$", format!("unreadable snapshot: {}", e)))?;
        let data = value
            .get("data")
            .ok_or_else(|| restore_violation("data", "snapshot has no data"))?;
        check_structure(data).map_err(VaultError::RestoreValidation)?;

        serde_json::from_value(value)
            .map_err(|e| restore_violation("$", format!("unreadable snapshot: {}", e)))
    }

    pub fn delete_snapshot(&self, id: &str) -> Result<()> {
        let timestamp = parse_id(id)?;
        let key = snapshot_key(timestamp);
        let mut index = self.index()?;
        let before = index.len();
        index.retain(|e| e.timestamp != timestamp);

        if index.len() == before && self.store.get(&key)?.is_none() {
            return Err(VaultError::SnapshotNotFound(id.to_string()));
        }
        self.store.remove(&key)?;
        write_json(&self.store, keys::BACKUP_INDEX, &index)?;
        info!(id, "snapshot deleted");
        Ok(())
    }

    pub fn export_all(&self, ws: &WorkingSet, compress: bool) -> Result<Vec<u8>> {
        let bundle = ExportBundle {
            version: FORMAT_VERSION,
            exported_at: Utc::now(),
            app_version: crate::app_version(),
            data: ws.clone(),
            metadata: ExportMetadata {
                total_items: ws.total_items(),
                collections: ws.iter().map(|(c, records)| (c, records.len())).collect(),
            },
        };
        let json = serde_json::to_vec_pretty(&bundle)?;
        if !compress {
            return Ok(json);
        }
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&json)?;
        Ok(enc.finish()?)
    }

    /// Parse exported bytes (gzip or plain JSON, bundle or bare working set).
    pub fn parse_import(&self, bytes: &[u8]) -> Result<WorkingSet> {
        parse_import(bytes)
    }

    fn index(&self) -> Result<Vec<SnapshotIndexEntry>> {
        Ok(read_json(&self.store, keys::BACKUP_INDEX)?.unwrap_or_default())
    }

    fn enforce_retention(&self, index: &mut Vec<SnapshotIndexEntry>) -> Result<()> {
        index.sort_by_key(|e| e.timestamp);
        while index.len() > self.max_backups {
            let oldest = index.remove(0);
            self.store.remove(&snapshot_key(oldest.timestamp))?;
            debug!(id = %oldest.id, "rotated out old snapshot");
        }
        Ok(())
    }
}

pub fn parse_import(bytes: &[u8]) -> Result<WorkingSet> {
    let text = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = String::new();
        GzDecoder::new(bytes)
            .read_to_string(&mut out)
            .map_err(|e| restore_violation("$", format!("unreadable gzip data: {}", e)))?;
        out
    } else {
        String::from_utf8(bytes.to_vec())
            .map_err(|_| restore_violation("$", "import is not UTF-8 text"))?
    };

    let mut value: Value = serde_json::from_str(&text)
        .map_err(|e| restore_violation("$", format!("import is not JSON: {}", e)))?;

    // A bundle wraps the set in `data`; a bare set has the collections at the top
    let is_bundle = value.get("data").is_some_and(Value::is_object);
    let data = if is_bundle {
        value.get_mut("data").map(Value::take).unwrap_or(Value::Null)
    } else {
        value
    };
    working_set_from_value(data).map_err(VaultError::RestoreValidation)
}

fn snapshot_key(timestamp: i64) -> String {
    format!("{}{}", keys::BACKUP_PREFIX, timestamp)
}

fn parse_id(id: &str) -> Result<i64> {
    id.trim()
        .trim_start_matches(keys::BACKUP_PREFIX)
        .parse()
        .map_err(|_| VaultError::SnapshotNotFound(id.to_string()))
}

fn restore_violation(path: &str, message: impl Into<String>) -> VaultError {
    VaultError::RestoreValidation(ViolationList(vec![Violation::new(path, message)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;
    use crate::store::mem_backend::MemStore;

    fn sample() -> WorkingSet {
        let mut ws = WorkingSet::new();
        ws.inventory
            .push(Record::new().with("name", "Hoop A").with("status", "pending"));
        ws
    }

    #[test]
    fn snapshot_roundtrip_and_index() {
        let m = BackupManager::new(MemStore::new(), DEFAULT_MAX_BACKUPS);
        let entry = m.create_snapshot(&sample(), SnapshotType::Manual).unwrap();

        let listed = m.list_snapshots().unwrap();
        assert_eq!(listed, vec![entry.clone()]);

        let snapshot = m.load_snapshot(&entry.id).unwrap();
        assert_eq!(snapshot.data, sample());
        assert_eq!(snapshot.kind, SnapshotType::Manual);
        assert_eq!(snapshot.metadata.total_items, 1);
    }

    #[test]
    fn same_millisecond_snapshots_get_distinct_ids() {
        let m = BackupManager::new(MemStore::new(), DEFAULT_MAX_BACKUPS);
        let now = Utc::now();
        let a = m.create_snapshot_at(&sample(), SnapshotType::Manual, now).unwrap();
        let b = m.create_snapshot_at(&sample(), SnapshotType::PreRestore, now).unwrap();
        assert_eq!(b.timestamp, a.timestamp + 1);
        assert_eq!(m.list_snapshots().unwrap()[0].kind, SnapshotType::PreRestore);
    }

    #[test]
    fn retention_drops_the_oldest() {
        let store = MemStore::new();
        let m = BackupManager::new(store.clone(), 3);
        let t0 = Utc::now();
        let first = m.create_snapshot_at(&sample(), SnapshotType::Auto, t0).unwrap();
        for i in 1..5 {
            m.create_snapshot_at(&sample(), SnapshotType::Auto, t0 + Duration::minutes(i))
                .unwrap();
        }

        let listed = m.list_snapshots().unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[2].timestamp, (t0 + Duration::minutes(2)).timestamp_millis());
        assert!(matches!(
            m.load_snapshot(&first.id),
            Err(VaultError::SnapshotNotFound(_))
        ));
        // 3 snapshots plus the index
        assert_eq!(store.keys_with_prefix("backup_").unwrap().len(), 4);
    }

    #[test]
    fn malformed_snapshot_fails_validation() {
        let store = MemStore::new();
        let m = BackupManager::new(store.clone(), DEFAULT_MAX_BACKUPS);
        store
            .set(
                "backup_1700000000000",
                r#"{"timestamp":1700000000000,"type":"manual","version":1,
                    "data":{"inventory":null},"metadata":{}}"#,
            )
            .unwrap();

        let err = m.load_snapshot("1700000000000").unwrap_err();
        match err {
            VaultError::RestoreValidation(violations) => {
                assert_eq!(violations.iter().next().unwrap().path, "inventory")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn delete_unknown_snapshot() {
        let m = BackupManager::new(MemStore::new(), DEFAULT_MAX_BACKUPS);
        assert!(matches!(
            m.delete_snapshot("42"),
            Err(VaultError::SnapshotNotFound(_))
        ));
        assert!(matches!(
            m.delete_snapshot("not-a-number"),
            Err(VaultError::SnapshotNotFound(_))
        ));

        let entry = m.create_snapshot(&sample(), SnapshotType::Manual).unwrap();
        m.delete_snapshot(&entry.id).unwrap();
        assert!(m.list_snapshots().unwrap().is_empty());
    }

    #[test]
    fn export_import_plain_and_gzip() {
        let m = BackupManager::new(MemStore::new(), DEFAULT_MAX_BACKUPS);
        let plain = m.export_all(&sample(), false).unwrap();
        let gz = m.export_all(&sample(), true).unwrap();
        assert!(gz.starts_with(&GZIP_MAGIC));

        assert_eq!(m.parse_import(&plain).unwrap(), sample());
        assert_eq!(m.parse_import(&gz).unwrap(), sample());
    }

    #[test]
    fn import_accepts_bare_working_set() {
        let bare = serde_json::to_vec(&sample()).unwrap();
        assert_eq!(parse_import(&bare).unwrap(), sample());
    }

    #[test]
    fn import_rejects_garbage() {
        assert!(matches!(
            parse_import(b"\x1f\x8bnot really gzip"),
            Err(VaultError::RestoreValidation(_))
        ));
        assert!(matches!(
            parse_import(br#"{"data":{"inventory":"oops"}}"#),
            Err(VaultError::RestoreValidation(_))
        ));
    }

    #[test]
    fn schedule_fires_and_rearms() {
        let mut m = BackupManager::new(MemStore::new(), DEFAULT_MAX_BACKUPS);
        let t0 = Utc::now();
        assert!(m.run_scheduled(&sample(), t0).unwrap().is_none());

        m.enable_auto(Duration::hours(24), t0);
        m.enable_auto(Duration::hours(12), t0);
        assert_eq!(m.schedule().next_due(), Some(t0 + Duration::hours(12)));

        assert!(m.run_scheduled(&sample(), t0 + Duration::hours(11)).unwrap().is_none());
        let fired = m
            .run_scheduled(&sample(), t0 + Duration::hours(12))
            .unwrap()
            .unwrap();
        assert_eq!(fired.kind, SnapshotType::Auto);
        assert_eq!(m.schedule().next_due(), Some(t0 + Duration::hours(24)));

        m.disable_auto();
        assert!(!m.schedule().is_due(t0 + Duration::days(30)));
    }
}

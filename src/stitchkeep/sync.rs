//! Cross-tab change detection.
//!
//! Several handles (browser tabs, or processes sharing a data directory) may
//! work on the same local medium. This state machine decides *when* the owning
//! [`Vault`](crate::api::Vault) should throw its working set away and reload.
//! It performs no I/O itself: the host feeds it events and the current sync
//! signal, and acts on the [`SyncAction`] it returns.
//!
//! Triggers, all converging on a reconcile:
//!
//! - **Storage event** from another handle on a key in our namespace. Events are
//!   debounced (trailing) so a six-collection save causes one reload.
//! - **Focus regained**: reconcile immediately, best effort.
//! - **Heartbeat**: every few seconds, look at `lastDataSave`. A value that is
//!   recent, not written by us and not seen before means someone else saved.
//!   This is the only detector on media without change notifications.

use crate::store::{in_namespace, StorageEvent};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_STORAGE_DEBOUNCE_MS: i64 = 250;
pub const DEFAULT_HEARTBEAT_SECS: i64 = 5;
pub const DEFAULT_SIGNAL_WINDOW_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    ExternalChange,
    FocusRegained,
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Idle,
    Reconcile(ReconcileReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTimings {
    pub debounce: Duration,
    pub heartbeat: Duration,
    /// How old a foreign signal may be and still trigger a heartbeat reconcile.
    pub window: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            debounce: Duration::milliseconds(DEFAULT_STORAGE_DEBOUNCE_MS),
            heartbeat: Duration::seconds(DEFAULT_HEARTBEAT_SECS),
            window: Duration::milliseconds(DEFAULT_SIGNAL_WINDOW_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrossTabSynchronizer {
    origin: Uuid,
    timings: SyncTimings,
    pending_since: Option<DateTime<Utc>>,
    own_signal: Option<i64>,
    last_seen_signal: Option<i64>,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl CrossTabSynchronizer {
    pub fn new(origin: Uuid, timings: SyncTimings) -> Self {
        Self {
            origin,
            timings,
            pending_since: None,
            own_signal: None,
            last_seen_signal: None,
            last_heartbeat: None,
        }
    }

    pub fn timings(&self) -> &SyncTimings {
        &self.timings
    }

    /// Returns whether the event scheduled a reconcile.
    pub fn on_storage_event(&mut self, event: &StorageEvent, now: DateTime<Utc>) -> bool {
        if event.origin == self.origin || !in_namespace(&event.key) {
            return false;
        }
        debug!(key = %event.key, "external storage change");
        self.pending_since = Some(now);
        true
    }

    /// The notification channel overflowed; assume something changed.
    pub fn on_missed_events(&mut self, now: DateTime<Utc>) {
        self.pending_since = Some(now);
    }

    pub fn on_focus(&mut self) -> SyncAction {
        self.pending_since = None;
        SyncAction::Reconcile(ReconcileReason::FocusRegained)
    }

    /// Remember the signal we just wrote so the heartbeat ignores it.
    pub fn note_own_save(&mut self, signal: i64) {
        self.own_signal = Some(signal);
        self.last_seen_signal = Some(signal);
    }

    /// The working set now reflects storage as of `signal`.
    pub fn note_reconciled(&mut self, signal: Option<i64>) {
        self.pending_since = None;
        if signal.is_some() {
            self.last_seen_signal = signal;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    pub fn debounce_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending_since.map(|t| t + self.timings.debounce)
    }

    pub fn poll(&mut self, now: DateTime<Utc>, signal: Option<i64>) -> SyncAction {
        if self.debounce_deadline().is_some_and(|deadline| now >= deadline) {
            self.pending_since = None;
            return SyncAction::Reconcile(ReconcileReason::ExternalChange);
        }

        let heartbeat_due = self
            .last_heartbeat
            .map_or(true, |last| now - last >= self.timings.heartbeat);
        if !heartbeat_due {
            return SyncAction::Idle;
        }
        self.last_heartbeat = Some(now);

        match signal {
            Some(signal) if self.is_foreign_and_recent(signal, now) => {
                self.last_seen_signal = Some(signal);
                SyncAction::Reconcile(ReconcileReason::Heartbeat)
            }
            _ => SyncAction::Idle,
        }
    }

    fn is_foreign_and_recent(&self, signal: i64, now: DateTime<Utc>) -> bool {
        let age = now.timestamp_millis() - signal;
        Some(signal) != self.own_signal
            && Some(signal) != self.last_seen_signal
            && age <= self.timings.window.num_milliseconds()
    }
}

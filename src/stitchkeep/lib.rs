//! # Stitchkeep Architecture
//!
//! Stitchkeep is the **persistence and sync core** of a small-shop inventory
//! tool (inventory, customers, sales, gallery, ideas, invoices). It is a library
//! that happens to have a CLI client, not the other way round.
//!
//! The core keeps one in-memory working set consistent with two backends:
//! a remote Collection API reachable only on a best-effort basis, and a local
//! key/value medium that is always written and read when the remote fails.
//! Several handles ("tabs") may share that local medium and mutate the same
//! data; they notice each other through storage events and a heartbeat.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI (args.rs, main.rs)                                     │
//! │  - Parses arguments, formats output, handles terminal I/O   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Vault facade (api.rs)                                      │
//! │  - Owns the WorkingSet, wires components, host driver       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Components                                                 │
//! │  gateway, integrity, cache, search, backup, sync, history   │
//! └─────────────────────────────────────────────────────────────┘
//!                  │                             │
//!                  ▼                             ▼
//! ┌───────────────────────────────┐ ┌───────────────────────────┐
//! │  store/ (KeyValueStore)       │ │  remote/ (CollectionApi)  │
//! │  FsStore, MemStore            │ │  HttpCollectionApi, Mem.. │
//! └───────────────────────────────┘ └───────────────────────────┘
//! ```
//!
//! ## Reliability Trade-off
//!
//! Availability wins over consistency. Remote failures are logged and
//! compensated by the local copy; they never fail a save or a load. What *is*
//! surfaced: structural validation failures, a local store that stays full
//! after cleanup, and malformed snapshots or imports. Corrupt image payloads are
//! repaired silently (and logged).
//!
//! Reconciliation between handles is last-writer-wins. There is no merging.
//!
//! ## Module Overview
//!
//! - [`api`]: the [`Vault`](api::Vault) facade and host driver
//! - [`gateway`]: dual-backend save/load, quota recovery, sync signal
//! - [`integrity`]: structural checks, image healing, duplicate ids
//! - [`cache`]: TTL cache for derived views, pagination
//! - [`search`]: debounced search, advanced filter, saved searches, history
//! - [`backup`]: snapshots, retention, restore validation, export/import
//! - [`sync`]: cross-tab change detection state machine
//! - [`history`]: change log
//! - [`store`]: local key/value media
//! - [`remote`]: Collection API clients
//! - [`model`]: `Collection`, `Record`, `WorkingSet`
//! - [`config`]: configuration file
//! - [`error`]: error types

pub mod api;
pub mod backup;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history;
pub mod integrity;
pub mod model;
pub mod remote;
pub mod search;
pub mod store;
pub mod sync;

/// Version string recorded in snapshots and exports, e.g. `0.3.2 (1a2b3c4)`.
pub fn app_version() -> String {
    let hash = env!("STITCHKEEP_GIT_HASH");
    if hash.is_empty() {
        env!("CARGO_PKG_VERSION").to_string()
    } else {
        format!("{} ({})", env!("CARGO_PKG_VERSION"), hash)
    }
}

//! # Collection API
//!
//! The remote document store is reached only through [`CollectionApi`]. Calls are
//! best effort: the [`PersistenceGateway`](crate::gateway::PersistenceGateway)
//! treats any [`RemoteError`] as "remote unavailable" and compensates with the
//! local store.
//!
//! Server contract:
//!
//! ```text
//! GET  /api/{collection}       -> JSON array of records
//! POST /api/{collection}       body: JSON array, replaces the whole collection
//! PUT  /api/{collection}/{id}  partial update; 404 unknown id, 400 invalid
//! GET  /health                 -> {"status": ..., "database": ...}
//! ```

use crate::model::{Collection, Record};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod mem;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("record not found")]
    NotFound,

    #[error("invalid response: {0}")]
    Decode(String),
}

impl From<RemoteError> for crate::error::VaultError {
    fn from(err: RemoteError) -> Self {
        crate::error::VaultError::RemoteUnavailable(err.to_string())
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub database: String,
}

/// Access to the remote collections.
#[async_trait]
pub trait CollectionApi: Send + Sync {
    /// Fetch every record of a collection.
    async fn fetch(&self, collection: Collection) -> RemoteResult<Vec<Record>>;

    /// Replace the whole collection (delete-all then insert-all on the server).
    async fn replace(&self, collection: Collection, records: &[Record]) -> RemoteResult<()>;

    /// Partially update one record by server id.
    async fn update(&self, collection: Collection, id: &str, patch: &Record) -> RemoteResult<()>;

    async fn health(&self) -> RemoteResult<HealthStatus>;
}

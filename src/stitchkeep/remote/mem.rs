use super::{CollectionApi, HealthStatus, RemoteError, RemoteResult};
use crate::model::{Collection, Record};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct ServerState {
    collections: HashMap<Collection, Vec<Record>>,
    next_id: u64,
    offline: bool,
    failing: HashMap<Collection, u16>,
    fetch_calls: usize,
    replace_calls: usize,
}

impl ServerState {
    fn check(&self, collection: Collection) -> RemoteResult<()> {
        if self.offline {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }
        if let Some(status) = self.failing.get(&collection) {
            return Err(RemoteError::Status {
                status: *status,
                message: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory stand-in for the Collection API server.
///
/// Clones share the same server state, so several vaults ("tabs" or devices)
/// can talk to one fake server. Server ids (`_id`) are assigned on replace to
/// records that do not carry one yet, like the real document store does.
#[derive(Clone, Default)]
pub struct MemCollectionApi {
    state: Arc<Mutex<ServerState>>,
}

impl MemCollectionApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put records on the server without going through `replace`.
    pub fn seed(&self, collection: Collection, records: Vec<Record>) {
        self.state.lock().collections.insert(collection, records);
    }

    pub fn records(&self, collection: Collection) -> Vec<Record> {
        self.state
            .lock()
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Every call fails with a transport error while offline.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Calls touching `collection` answer with HTTP `status`.
    pub fn fail_collection(&self, collection: Collection, status: u16) {
        self.state.lock().failing.insert(collection, status);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing.clear();
        state.offline = false;
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().fetch_calls
    }

    pub fn replace_calls(&self) -> usize {
        self.state.lock().replace_calls
    }
}

#[async_trait]
impl CollectionApi for MemCollectionApi {
    async fn fetch(&self, collection: Collection) -> RemoteResult<Vec<Record>> {
        let mut state = self.state.lock();
        state.fetch_calls += 1;
        state.check(collection)?;
        Ok(state
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace(&self, collection: Collection, records: &[Record]) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.replace_calls += 1;
        state.check(collection)?;

        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            let mut record = record.clone();
            if record.server_id().is_none() {
                state.next_id += 1;
                record.insert("_id", state.next_id);
            }
            stored.push(record);
        }
        state.collections.insert(collection, stored);
        Ok(())
    }

    async fn update(&self, collection: Collection, id: &str, patch: &Record) -> RemoteResult<()> {
        let mut state = self.state.lock();
        state.check(collection)?;
        let target = state
            .collections
            .get_mut(&collection)
            .and_then(|records| {
                records
                    .iter_mut()
                    .find(|r| r.server_id().as_deref() == Some(id))
            })
            .ok_or(RemoteError::NotFound)?;
        target.merge(patch);
        Ok(())
    }

    async fn health(&self) -> RemoteResult<HealthStatus> {
        if self.state.lock().offline {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }
        Ok(HealthStatus {
            status: "ok".to_string(),
            database: "connected".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replace_assigns_server_ids() {
        let api = MemCollectionApi::new();
        let records = vec![
            Record::new().with("name", "Hoop A"),
            Record::new().with("name", "Hoop B").with("_id", 99),
        ];
        api.replace(Collection::Inventory, &records).await.unwrap();

        let stored = api.fetch(Collection::Inventory).await.unwrap();
        assert_eq!(stored[0].server_id().as_deref(), Some("1"));
        assert_eq!(stored[1].server_id().as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn injected_failures() {
        let api = MemCollectionApi::new();
        api.fail_collection(Collection::Customers, 500);
        let err = api.replace(Collection::Customers, &[]).await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::Status {
                status: 500,
                message: "simulated failure".to_string()
            }
        );
        assert!(api.fetch(Collection::Sales).await.is_ok());

        api.set_offline(true);
        assert!(api.health().await.is_err());
        api.clear_failures();
        assert!(api.fetch(Collection::Customers).await.is_ok());
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let api = MemCollectionApi::new();
        let err = api
            .update(Collection::Sales, "7", &Record::new())
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
    }
}

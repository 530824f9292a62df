use crate::model::Collection;
use std::fmt;
use thiserror::Error;

/// A single structural problem found in a working set, snapshot or import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Where the problem is, e.g. `inventory` or `sales[3]`
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationList(pub Vec<Violation>);

impl ViolationList {
    pub fn push(&mut self, violation: Violation) {
        self.0.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }
}

impl fmt::Display for ViolationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Validation failed: {0}")]
    Validation(ViolationList),

    #[error("Remote collection API unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Local storage quota exceeded while writing '{key}'")]
    QuotaExceeded { key: String },

    #[error("Restore rejected: {0}")]
    RestoreValidation(ViolationList),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Saved search not found: {0}")]
    SavedSearchNotFound(String),

    #[error("Record not found in {collection}: {id}")]
    RecordNotFound { collection: Collection, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Prefix shared by every per-collection key in the local store.
pub const COLLECTION_KEY_PREFIX: &str = "embroidery_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Inventory,
    Customers,
    Sales,
    Gallery,
    Ideas,
    Invoices,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Inventory,
        Collection::Customers,
        Collection::Sales,
        Collection::Gallery,
        Collection::Ideas,
        Collection::Invoices,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Inventory => "inventory",
            Collection::Customers => "customers",
            Collection::Sales => "sales",
            Collection::Gallery => "gallery",
            Collection::Ideas => "ideas",
            Collection::Invoices => "invoices",
        }
    }

    /// Key holding this collection's full array in the local store.
    pub fn storage_key(&self) -> String {
        format!("{}{}", COLLECTION_KEY_PREFIX, self.as_str())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Collection::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| {
                format!(
                    "unknown collection '{}' (expected one of: {})",
                    s,
                    Collection::ALL.map(|c| c.as_str()).join(", ")
                )
            })
    }
}

/// A single item in one of the six collections.
///
/// Records are schemaless JSON objects; the typed accessors below cover the
/// handful of fields the persistence core itself cares about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record that has not been round-tripped through the Collection API yet.
    /// Its identity is the slugged name plus the creation time in epoch ms.
    pub fn new_local(name: &str) -> Self {
        let id = format!("{}-{}", slug(name), Utc::now().timestamp_millis());
        Self::new().with("name", name).with("id", id)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Numeric field, accepting numbers stored as strings ("12.50").
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.to_string(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// Identity: the server-assigned `_id` once persisted remotely, else the client `id`.
    pub fn id(&self) -> Option<String> {
        self.server_id().or_else(|| self.0.get("id").and_then(id_string))
    }

    pub fn server_id(&self) -> Option<String> {
        self.0.get("_id").and_then(id_string)
    }

    /// Shallow merge: every top-level field of `patch` overwrites ours.
    pub fn merge(&mut self, patch: &Record) {
        for (k, v) in &patch.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "item".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The six in-memory collections a tab works on.
///
/// Owned by the [`Vault`](crate::api::Vault); persistence layers only ever see
/// borrowed views or deep copies (`Clone`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingSet {
    pub inventory: Vec<Record>,
    pub customers: Vec<Record>,
    pub sales: Vec<Record>,
    pub gallery: Vec<Record>,
    pub ideas: Vec<Record>,
    pub invoices: Vec<Record>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, collection: Collection) -> &[Record] {
        match collection {
            Collection::Inventory => &self.inventory,
            Collection::Customers => &self.customers,
            Collection::Sales => &self.sales,
            Collection::Gallery => &self.gallery,
            Collection::Ideas => &self.ideas,
            Collection::Invoices => &self.invoices,
        }
    }

    pub fn collection_mut(&mut self, collection: Collection) -> &mut Vec<Record> {
        match collection {
            Collection::Inventory => &mut self.inventory,
            Collection::Customers => &mut self.customers,
            Collection::Sales => &mut self.sales,
            Collection::Gallery => &mut self.gallery,
            Collection::Ideas => &mut self.ideas,
            Collection::Invoices => &mut self.invoices,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Collection, &[Record])> {
        Collection::ALL.into_iter().map(|c| (c, self.collection(c)))
    }

    pub fn total_items(&self) -> usize {
        self.iter().map(|(_, records)| records.len()).sum()
    }

    pub fn find(&self, collection: Collection, id: &str) -> Option<&Record> {
        self.collection(collection)
            .iter()
            .find(|r| r.id().as_deref() == Some(id))
    }

    pub fn find_mut(&mut self, collection: Collection, id: &str) -> Option<&mut Record> {
        self.collection_mut(collection)
            .iter_mut()
            .find(|r| r.id().as_deref() == Some(id))
    }
}

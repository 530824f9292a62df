//! Data integrity checks run before anything is persisted or trusted.
//!
//! Three passes, with different severities:
//!
//! 1. **Structure** (fatal): every collection must be an array of record objects.
//!    Applied to untyped JSON wherever it enters the system (local store, snapshots,
//!    imports) and to the serialized working set before a save.
//! 2. **Image content** (self-healing): image fields that are not plausible
//!    `data:image/...` URIs are deleted from the record in place.
//! 3. **Duplicate ids** (informational): ids repeated anywhere across the six
//!    collections combined are logged as an integrity warning.

use crate::error::{Result, VaultError, Violation, ViolationList};
use crate::model::{Collection, Record, WorkingSet};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::warn;

/// Shortest string accepted as real image data.
pub const MIN_IMAGE_DATA_LEN: usize = 100;

static IMAGE_DATA_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/[A-Za-z0-9.+-]+[;,]").expect("static regex"));

/// One image field removed during healing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealedField {
    pub collection: Collection,
    pub index: usize,
    pub record_id: Option<String>,
    /// `imageUrl`, `imageData` or `photo.dataUrl`
    pub field: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub healed: Vec<HealedField>,
    pub duplicate_ids: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.healed.is_empty() && self.duplicate_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IntegrityValidator {
    min_image_len: usize,
}

impl Default for IntegrityValidator {
    fn default() -> Self {
        Self {
            min_image_len: MIN_IMAGE_DATA_LEN,
        }
    }
}

impl IntegrityValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full validation of a working set about to be saved.
    ///
    /// Structural violations abort with `VaultError::Validation`; corrupt images
    /// are repaired in place and reported.
    pub fn validate(&self, ws: &mut WorkingSet) -> Result<IntegrityReport> {
        let value = serde_json::to_value(&*ws)?;
        check_structure(&value).map_err(VaultError::Validation)?;
        Ok(self.repair(ws))
    }

    /// Content passes only (image healing and duplicate detection).
    pub fn repair(&self, ws: &mut WorkingSet) -> IntegrityReport {
        let healed = self.heal_images(ws);
        let duplicate_ids = find_duplicate_ids(ws);
        if !duplicate_ids.is_empty() {
            warn!(ids = ?duplicate_ids, "duplicate record ids across collections");
        }
        IntegrityReport {
            healed,
            duplicate_ids,
        }
    }

    pub fn is_valid_image(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => s.len() > self.min_image_len && IMAGE_DATA_URI.is_match(s),
            _ => false,
        }
    }

    pub fn heal_images(&self, ws: &mut WorkingSet) -> Vec<HealedField> {
        let mut healed = Vec::new();
        for collection in Collection::ALL {
            for (index, record) in ws.collection_mut(collection).iter_mut().enumerate() {
                for field in self.heal_record(record) {
                    warn!(
                        collection = %collection,
                        index,
                        field,
                        "removed corrupt image payload"
                    );
                    healed.push(HealedField {
                        collection,
                        index,
                        record_id: record.id(),
                        field,
                    });
                }
            }
        }
        healed
    }

    fn heal_record(&self, record: &mut Record) -> Vec<&'static str> {
        let mut removed = Vec::new();
        for field in ["imageUrl", "imageData"] {
            let corrupt = match record.get(field) {
                None | Some(Value::Null) => false,
                Some(v) => !self.is_valid_image(v),
            };
            if corrupt {
                record.remove(field);
                removed.push(field);
            }
        }

        if let Some(Value::Object(photo)) = record.get_mut("photo") {
            let corrupt = match photo.get("dataUrl") {
                None | Some(Value::Null) => false,
                Some(v) => !self.is_valid_image(v),
            };
            if corrupt {
                photo.remove("dataUrl");
                removed.push("photo.dataUrl");
            }
        }
        removed
    }
}

/// Structural check over untyped JSON shaped like a [`WorkingSet`].
pub fn check_structure(value: &Value) -> std::result::Result<(), ViolationList> {
    let mut violations = ViolationList::default();
    let Some(root) = value.as_object() else {
        violations.push(Violation::new(
            "$",
            format!("expected an object of collections, found {}", type_name(value)),
        ));
        return Err(violations);
    };

    for collection in Collection::ALL {
        let name = collection.as_str();
        match root.get(name) {
            None => violations.push(Violation::new(name, "collection is missing")),
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if !item.is_object() {
                        violations.push(Violation::new(
                            format!("{}[{}]", name, i),
                            format!("expected a record object, found {}", type_name(item)),
                        ));
                    }
                }
            }
            Some(other) => violations.push(Violation::new(
                name,
                format!("expected an array, found {}", type_name(other)),
            )),
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Check structure, then build the typed working set.
pub fn working_set_from_value(value: Value) -> std::result::Result<WorkingSet, ViolationList> {
    check_structure(&value)?;
    serde_json::from_value(value).map_err(|e| {
        ViolationList(vec![Violation::new("$", format!("unreadable data: {}", e))])
    })
}

/// Ids appearing more than once across all six collections combined.
pub fn find_duplicate_ids(ws: &WorkingSet) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dups = BTreeSet::new();
    for (_, records) in ws.iter() {
        for id in records.iter().filter_map(Record::id) {
            if !seen.insert(id.clone()) {
                dups.insert(id);
            }
        }
    }
    dups.into_iter().collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

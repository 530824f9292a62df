use crate::model::Record;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured filter over one collection.
///
/// Every field is optional. Set fields combine with AND; the values inside a
/// multi-valued field combine with OR. String comparisons ignore case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub priority: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub customer: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_max: Option<f64>,
    /// Comma-separated; a record matches if it carries any of them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

impl SearchCriteria {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.matches_text(record)
            && any_of(&self.status, record.get_str("status"))
            && any_of(&self.priority, record.get_str("priority"))
            && any_of(&self.customer, record.get_str("customer"))
            && any_of(&self.location, record.get_str("location"))
            && self.matches_dates(record)
            && self.matches_price(record)
            && self.matches_tags(record)
    }

    pub fn filter(&self, records: &[Record]) -> Vec<Record> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }

    fn matches_text(&self, record: &Record) -> bool {
        match self.text.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(text) => text_matches(record, text),
        }
    }

    fn matches_dates(&self, record: &Record) -> bool {
        if self.date_from.is_none() && self.date_to.is_none() {
            return true;
        }
        let Some(date) = record_date(record) else {
            return false;
        };
        self.date_from.map_or(true, |from| date >= from)
            && self.date_to.map_or(true, |to| date <= to)
    }

    fn matches_price(&self, record: &Record) -> bool {
        if self.price_min.is_none() && self.price_max.is_none() {
            return true;
        }
        let Some(price) = record.get_f64("price") else {
            return false;
        };
        self.price_min.map_or(true, |min| price >= min)
            && self.price_max.map_or(true, |max| price <= max)
    }

    fn matches_tags(&self, record: &Record) -> bool {
        let wanted = match self.tags.as_deref() {
            Some(raw) => split_tags(raw),
            None => return true,
        };
        if wanted.is_empty() {
            return true;
        }
        let have = record_tags(record);
        wanted.iter().any(|tag| have.contains(tag))
    }
}

fn any_of(wanted: &[String], actual: Option<&str>) -> bool {
    if wanted.is_empty() {
        return true;
    }
    match actual {
        Some(actual) => wanted.iter().any(|w| w.eq_ignore_ascii_case(actual.trim())),
        None => false,
    }
}

/// Case-insensitive substring match over the record's top-level text and number fields.
pub fn text_matches(record: &Record, text: &str) -> bool {
    let needle = text.to_lowercase();
    record.fields().iter().any(|(key, value)| {
        if key.starts_with("image") || key == "photo" {
            return false;
        }
        match value {
            Value::String(s) => s.to_lowercase().contains(&needle),
            Value::Number(n) => n.to_string().contains(&needle),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .any(|s| s.to_lowercase().contains(&needle)),
            _ => false,
        }
    })
}

/// `dateAdded`, falling back to `dueDate`. Accepts plain dates and RFC 3339 timestamps.
pub fn record_date(record: &Record) -> Option<NaiveDate> {
    ["dateAdded", "dueDate"]
        .iter()
        .filter_map(|field| record.get_str(field))
        .find_map(parse_date)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// A record's tags, stored either as a comma-separated string or an array.
pub fn record_tags(record: &Record) -> Vec<String> {
    match record.get("tags") {
        Some(Value::String(s)) => split_tags(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(split_tags)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(price: f64, status: &str) -> Record {
        Record::new().with("price", price).with("status", status)
    }

    #[test]
    fn status_or_and_price_range() {
        let records = vec![priced(5.0, "pending"), priced(20.0, "completed"), priced(40.0, "sold")];
        let criteria = SearchCriteria {
            status: vec!["pending".into(), "completed".into()],
            price_min: Some(10.0),
            price_max: Some(50.0),
            ..Default::default()
        };
        assert_eq!(criteria.filter(&records), vec![records[1].clone()]);
    }

    #[test]
    fn price_range_is_inclusive_and_requires_a_price() {
        let criteria = SearchCriteria {
            price_min: Some(10.0),
            price_max: Some(20.0),
            ..Default::default()
        };
        assert!(criteria.matches(&Record::new().with("price", 10)));
        assert!(criteria.matches(&Record::new().with("price", "20.00")));
        assert!(!criteria.matches(&Record::new().with("price", 20.01)));
        assert!(!criteria.matches(&Record::new().with("name", "no price")));
    }

    #[test]
    fn values_compare_case_insensitively() {
        let criteria = SearchCriteria {
            customer: vec!["ada lovelace".into()],
            ..Default::default()
        };
        assert!(criteria.matches(&Record::new().with("customer", "Ada Lovelace")));
        assert!(!criteria.matches(&Record::new().with("customer", "Grace")));
    }

    #[test]
    fn date_range_falls_back_to_due_date() {
        let criteria = SearchCriteria {
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            date_to: NaiveDate::from_ymd_opt(2024, 3, 31),
            ..Default::default()
        };
        assert!(criteria.matches(&Record::new().with("dateAdded", "2024-03-15T10:00:00Z")));
        assert!(criteria.matches(&Record::new().with("dueDate", "2024-03-31")));
        assert!(!criteria.matches(&Record::new().with("dateAdded", "2024-04-01")));
        assert!(!criteria.matches(&Record::new()));
    }

    #[test]
    fn any_query_tag_is_enough() {
        let criteria = SearchCriteria {
            tags: Some("floral, Gift".into()),
            ..Default::default()
        };
        assert!(criteria.matches(&Record::new().with("tags", "gift,wedding")));
        assert!(criteria.matches(&Record::new().with("tags", serde_json::json!(["Floral"]))));
        assert!(!criteria.matches(&Record::new().with("tags", "wedding")));
    }

    #[test]
    fn text_skips_image_payloads() {
        let r = Record::new()
            .with("name", "Rose patch")
            .with("imageData", "data:image/png;base64,rose");
        assert!(text_matches(&r, "ROSE"));
        assert!(!text_matches(&r, "base64"));
    }

    #[test]
    fn empty_criteria_match_everything() {
        let criteria = SearchCriteria::default();
        assert!(criteria.is_empty());
        assert!(criteria.matches(&Record::new()));
    }

    #[test]
    fn serializes_camel_case_without_unset_fields() {
        let criteria = SearchCriteria {
            price_min: Some(1.0),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&criteria).unwrap(), r#"{"priceMin":1.0}"#);
    }
}

//! Review records and the documents derived from them
//!
//! A [`RawRecord`] is one blank-line-delimited block of the source file,
//! still as strings. A [`NormalizedDocument`] is the typed body that gets
//! indexed, keyed by a deterministic [`document_id`] so that re-running
//! ingestion over the same input overwrites instead of duplicating.

use serde::Serialize;
use std::collections::HashMap;

/// Source field names recognized in the review dump
pub mod fields {
    pub const PRODUCT_ID: &str = "product/productId";
    pub const TITLE: &str = "product/title";
    pub const PRICE: &str = "product/price";
    pub const USER_ID: &str = "review/userId";
    pub const PROFILE_NAME: &str = "review/profileName";
    pub const HELPFULNESS: &str = "review/helpfulness";
    pub const SCORE: &str = "review/score";
    pub const TIME: &str = "review/time";
    pub const SUMMARY: &str = "review/summary";
    pub const TEXT: &str = "review/text";

    /// Every field the parser accepts
    pub const ALL: [&str; 10] = [
        PRODUCT_ID,
        TITLE,
        PRICE,
        USER_ID,
        PROFILE_NAME,
        HELPFULNESS,
        SCORE,
        TIME,
        SUMMARY,
        TEXT,
    ];

    /// Whether `name` is a recognized source field
    pub fn is_known(name: &str) -> bool {
        ALL.contains(&name)
    }
}

/// One review block as raw strings, keyed by source field name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number where the block starts
    pub line: usize,
    values: HashMap<String, String>,
}

impl RawRecord {
    /// Create an empty record starting at `line`
    pub fn new(line: usize) -> Self {
        Self {
            line,
            values: HashMap::new(),
        }
    }

    /// Set a field value, replacing any earlier occurrence in the block
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.values.insert(field.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    /// Raw value of a field
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Number of fields in the block
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the block has no fields
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Typed review document, serialized as the indexed `_source` body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedDocument {
    /// Bulk `_id`; not part of the body
    #[serde(skip)]
    pub document_id: String,
    pub product_id: String,
    pub user_id: String,
    pub score: f64,
    /// Helpful votes over total votes; absent when nobody voted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helpfulness_ratio: Option<f64>,
    /// Original `x/y` helpfulness string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helpfulness_raw: Option<String>,
    /// Epoch seconds
    pub timestamp: i64,
    /// `timestamp` as an RFC 3339 UTC string
    pub time_iso: String,
    pub summary_text: String,
    pub review_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
}

impl NormalizedDocument {
    /// Serialized `_source` body
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Deterministic identifier for a review.
///
/// The same product, user and timestamp always map to the same id, which
/// makes bulk indexing an upsert.
pub fn document_id(product_id: &str, user_id: &str, timestamp: i64) -> String {
    format!("{product_id}::{user_id}::{timestamp}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> NormalizedDocument {
        NormalizedDocument {
            document_id: document_id("B00002066I", "A1RSDE90N6RSZF", 939772800),
            product_id: "B00002066I".into(),
            user_id: "A1RSDE90N6RSZF".into(),
            score: 5.0,
            helpfulness_ratio: None,
            helpfulness_raw: Some("0/0".into()),
            timestamp: 939772800,
            time_iso: "1999-10-13T00:00:00Z".into(),
            summary_text: "Inspiring".into(),
            review_text: "I hope a lot of people hear this cd.".into(),
            title: None,
            price: None,
            profile_name: None,
        }
    }

    #[test]
    fn test_document_id_is_deterministic() {
        let a = document_id("P1", "U1", 42);
        let b = document_id("P1", "U1", 42);
        assert_eq!(a, b);
        assert_eq!(a, "P1::U1::42");
        assert_ne!(a, document_id("P1", "U1", 43));
    }

    #[test]
    fn test_body_omits_absent_ratio_and_id() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        let body = json.as_object().unwrap();
        assert!(!body.contains_key("helpfulnessRatio"));
        assert!(!body.contains_key("documentId"));
        assert!(!body.contains_key("price"));
        assert_eq!(body["productId"], "B00002066I");
        assert_eq!(body["summaryText"], "Inspiring");
    }

    #[test]
    fn test_body_includes_present_ratio() {
        let mut doc = sample();
        doc.helpfulness_ratio = Some(0.75);
        let json: serde_json::Value = serde_json::from_str(&doc.to_json().unwrap()).unwrap();
        assert_eq!(json["helpfulnessRatio"], 0.75);
    }

    #[test]
    fn test_raw_record_fields() {
        let record = RawRecord::new(7)
            .with(fields::PRODUCT_ID, "B1")
            .with(fields::SCORE, "4.0");
        assert_eq!(record.line, 7);
        assert_eq!(record.len(), 2);
        assert_eq!(record.get(fields::SCORE), Some("4.0"));
        assert_eq!(record.get(fields::TEXT), None);
        assert!(fields::is_known("review/text"));
        assert!(!fields::is_known("review/unknown"));
    }
}

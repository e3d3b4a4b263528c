//! Recipient records and the immutable batch a job is submitted with.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One recipient and the message content to send them
///
/// Records are loaded once per job and never mutated. A record with an empty
/// `recipient_address` is still a valid batch member; it fails validation at
/// send time and is recorded as a failed outcome, not rejected up front.
///
/// Field aliases (`email`, `name`, `company`) let batch files written for
/// earlier tooling load unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRecord {
    /// Destination address. Empty means validation failure for this record.
    #[serde(default, alias = "email")]
    pub recipient_address: String,

    /// Human-readable name used in reporting and the To header.
    #[serde(default, alias = "name", alias = "company")]
    pub display_name: String,

    /// Pre-rendered subject line.
    #[serde(default)]
    pub subject: String,

    /// Pre-rendered plain-text body.
    #[serde(default)]
    pub body: String,

    /// Original JSON text of this record, kept for audit. Populated by the
    /// batch loader, not by deserialization of the record itself.
    #[serde(default)]
    pub raw_payload: String,
}

impl RecipientRecord {
    /// Whether this record carries a deliverable address
    #[must_use]
    pub fn has_address(&self) -> bool {
        !self.recipient_address.trim().is_empty()
    }

    /// Label used in outcomes: the display name when present, else the address
    #[must_use]
    pub fn display_label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.recipient_address
        } else {
            &self.display_name
        }
    }
}

/// Immutable ordered sequence of recipient records for one job
///
/// Cheap to clone; the records are shared, never copied. Ordering is the
/// submission order and is what `last_processed_index` counts against.
#[derive(Debug, Clone)]
pub struct RecipientBatch {
    records: Arc<[RecipientRecord]>,
}

impl RecipientBatch {
    #[must_use]
    pub fn new(records: Vec<RecipientRecord>) -> Self {
        Self {
            records: records.into(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RecipientRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RecipientRecord> {
        self.records.iter()
    }
}

impl From<Vec<RecipientRecord>> for RecipientBatch {
    fn from(records: Vec<RecipientRecord>) -> Self {
        Self::new(records)
    }
}

impl<'a> IntoIterator for &'a RecipientBatch {
    type Item = &'a RecipientRecord;
    type IntoIter = std::slice::Iter<'a, RecipientRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_record_aliases_deserialize() {
        let record: RecipientRecord = ron::from_str(
            r#"(email: "ops@acme.example", company: "Acme", subject: "Hi", body: "Hello")"#,
        )
        .unwrap();

        assert_eq!(record.recipient_address, "ops@acme.example");
        assert_eq!(record.display_name, "Acme");
        assert!(record.has_address());
        assert_eq!(record.display_label(), "Acme");
    }

    #[test]
    fn test_missing_address_is_loadable() {
        let record: RecipientRecord = ron::from_str(r#"(name: "Globex")"#).unwrap();

        assert!(!record.has_address());
        assert_eq!(record.display_label(), "Globex");
    }

    #[test]
    fn test_display_label_falls_back_to_address() {
        let record = RecipientRecord {
            recipient_address: "ops@acme.example".into(),
            display_name: "  ".into(),
            subject: String::new(),
            body: String::new(),
            raw_payload: String::new(),
        };

        assert_eq!(record.display_label(), "ops@acme.example");
    }

    #[test]
    fn test_batch_preserves_order() {
        let batch = RecipientBatch::new(vec![
            RecipientRecord {
                recipient_address: "a@example.com".into(),
                display_name: "A".into(),
                subject: String::new(),
                body: String::new(),
                raw_payload: String::new(),
            },
            RecipientRecord {
                recipient_address: "b@example.com".into(),
                display_name: "B".into(),
                subject: String::new(),
                body: String::new(),
                raw_payload: String::new(),
            },
        ]);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(0).unwrap().display_name, "A");
        assert_eq!(batch.get(1).unwrap().display_name, "B");
        assert!(batch.get(2).is_none());

        let names: Vec<_> = batch.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}

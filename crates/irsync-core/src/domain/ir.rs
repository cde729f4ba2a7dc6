//! IR records
//!
//! An [`IrRecord`] is one immutable version of the intermediate
//! representation stored for an [`IrId`]. The store appends a new record
//! whenever an incoming conversion has a different fingerprint from the
//! latest one; records are never mutated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{Fingerprint, IrId};

/// Framework-agnostic tree produced by converters
pub type IrDocument = serde_json::Value;

/// One stored version of an IR document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrRecord {
    pub id: IrId,
    pub representation: IrDocument,
    /// Strictly increasing per id, starting at 1
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

impl IrRecord {
    /// Builds the record that follows `previous` (or the first one)
    pub fn next(
        id: IrId,
        representation: IrDocument,
        fingerprint: Fingerprint,
        previous: Option<&IrRecord>,
    ) -> Self {
        Self {
            id,
            representation,
            version: previous.map_or(1, |p| p.version + 1),
            timestamp: Utc::now(),
            fingerprint,
        }
    }
}

/// Result of offering a conversion to the IR store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    /// The fingerprint matched the latest version; nothing was written
    Unchanged(IrRecord),
    /// A new version was appended
    Appended(IrRecord),
}

impl StoreOutcome {
    /// The latest record after the operation
    pub fn record(&self) -> &IrRecord {
        match self {
            StoreOutcome::Unchanged(r) | StoreOutcome::Appended(r) => r,
        }
    }

    pub fn is_appended(&self) -> bool {
        matches!(self, StoreOutcome::Appended(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_next_version_increments() {
        let id = IrId::new("a/App".to_string()).unwrap();
        let doc = json!({"type": "component"});
        let first = IrRecord::next(id.clone(), doc.clone(), Fingerprint::of_value(&doc), None);
        assert_eq!(first.version, 1);

        let doc2 = json!({"type": "component", "children": []});
        let second = IrRecord::next(id, doc2.clone(), Fingerprint::of_value(&doc2), Some(&first));
        assert_eq!(second.version, 2);
    }

    #[test]
    fn test_store_outcome_accessors() {
        let id = IrId::new("b/app".to_string()).unwrap();
        let doc = json!(null);
        let record = IrRecord::next(id, doc.clone(), Fingerprint::of_value(&doc), None);
        let outcome = StoreOutcome::Unchanged(record.clone());
        assert!(!outcome.is_appended());
        assert_eq!(outcome.record(), &record);
    }
}

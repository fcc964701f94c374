//! Learning log: append-only audit trail of ingests and consolidations
//!
//! Entries copy the data they describe, so deleting or merging a record never
//! invalidates history. Rendering an entry resolves ids through the store's
//! tombstones and falls back to `Unknown (<id>)`.

use crate::consolidation::Edit;
use crate::record::Record;
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LearningEntry {
    /// Records extracted from one file, as they were at extraction time.
    Ingest {
        file: String,
        records: Vec<Record>,
        recorded_at: DateTime<Utc>,
    },
    /// One applied consolidation batch.
    Consolidation {
        edits: Vec<Edit>,
        recorded_at: DateTime<Utc>,
    },
}

impl LearningEntry {
    pub fn ingest(file: impl Into<String>, records: Vec<Record>) -> Self {
        LearningEntry::Ingest {
            file: file.into(),
            records,
            recorded_at: Utc::now(),
        }
    }

    pub fn consolidation(edits: Vec<Edit>) -> Self {
        LearningEntry::Consolidation {
            edits,
            recorded_at: Utc::now(),
        }
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            LearningEntry::Ingest { recorded_at, .. }
            | LearningEntry::Consolidation { recorded_at, .. } => *recorded_at,
        }
    }
}

/// Render-ready form of an edit: every referenced id paired with a label.
#[derive(Debug, Clone, PartialEq)]
pub struct EditView {
    pub kind: &'static str,
    pub reason: String,
    /// `(id, title or "Unknown (id)")`
    pub references: Vec<(String, String)>,
    /// Title of the record a merge produces.
    pub merged_title: Option<String>,
}

pub fn describe_edit(edit: &Edit, store: &RecordStore) -> EditView {
    EditView {
        kind: edit.kind(),
        reason: edit.reason().to_string(),
        references: edit
            .ids()
            .iter()
            .map(|id| (id.clone(), store.label(id)))
            .collect(),
        merged_title: match edit {
            Edit::Merge { title, .. } => Some(title.clone()),
            Edit::Delete { .. } => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Namespace, Priority};

    #[test]
    fn test_entry_wire_format_round_trips() {
        let entry = LearningEntry::consolidation(vec![Edit::Delete {
            ids: vec!["rule-0".into()],
            reason: "dup".into(),
        }]);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["kind"], "consolidation");
        assert_eq!(value["edits"][0]["edit"], "delete");
        let back: LearningEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_describe_edit_labels_retired_and_unknown() {
        let mut store = RecordStore::new();
        let id = store.next_id(Namespace::Rule);
        store.append([Record {
            id: id.clone(),
            title: "Encrypt at rest".into(),
            body: String::new(),
            kind: None,
            priority: Priority::High,
            rationale: None,
            sources: vec![],
        }]);
        store.remove(&[id]);

        let edit = Edit::Merge {
            ids: vec!["rule-0".into(), "rule-7".into()],
            reason: "overlap".into(),
            title: "Encryption".into(),
            body: String::new(),
            priority: Priority::High,
            rationale: None,
        };
        let view = describe_edit(&edit, &store);
        assert_eq!(view.kind, "merge");
        assert_eq!(
            view.references,
            vec![
                ("rule-0".to_string(), "Encrypt at rest".to_string()),
                ("rule-7".to_string(), "Unknown (rule-7)".to_string()),
            ]
        );
        assert_eq!(view.merged_title.as_deref(), Some("Encryption"));
    }
}

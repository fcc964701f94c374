//! Consolidation: applying a batch of delete/merge edits
//!
//! A batch is applied in three steps against the [`RecordStore`]:
//!
//! 1. Collect every id referenced by any edit (delete and merge alike).
//! 2. Snapshot the referenced records, then remove them all at once.
//! 3. For each merge, in batch order, allocate a fresh id and build the new
//!    record from the edit's fields plus the concatenated sources of the
//!    merged records, resolved against the snapshot from step 2.
//!
//! Unknown ids never fail a batch; they are skipped and reported. Ids shared
//! by several edits are reported too, and rejected when
//! [`ConsolidationConfig::reject_overlapping`] is set.

use crate::record::{Namespace, Priority, Record, RecordId};
use crate::store::RecordStore;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// Edits
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "edit", rename_all = "lowercase")]
pub enum Edit {
    Delete {
        ids: Vec<RecordId>,
        reason: String,
    },
    Merge {
        ids: Vec<RecordId>,
        reason: String,
        title: String,
        body: String,
        priority: Priority,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
}

impl Edit {
    pub fn ids(&self) -> &[RecordId] {
        match self {
            Edit::Delete { ids, .. } | Edit::Merge { ids, .. } => ids,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Edit::Delete { reason, .. } | Edit::Merge { reason, .. } => reason,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Edit::Delete { .. } => "delete",
            Edit::Merge { .. } => "merge",
        }
    }
}

/// An edit as streamed by the model, before its kind has been checked.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EditDraft {
    pub edit: Option<String>,
    pub ids: Vec<RecordId>,
    pub reason: String,
    pub title: String,
    pub body: String,
    pub priority: Option<String>,
    pub rationale: Option<String>,
}

impl EditDraft {
    /// Convert into a typed edit; `index` is only used in error messages.
    pub fn into_edit(self, index: usize) -> Result<Edit, ConsolidationError> {
        if self.ids.is_empty() {
            return Err(ConsolidationError::EmptyIds { index });
        }
        match self.edit.as_deref() {
            Some("delete") => Ok(Edit::Delete {
                ids: self.ids,
                reason: self.reason,
            }),
            Some("merge") => Ok(Edit::Merge {
                ids: self.ids,
                reason: self.reason,
                title: self.title,
                body: self.body,
                priority: self
                    .priority
                    .as_deref()
                    .and_then(Priority::parse)
                    .unwrap_or_default(),
                rationale: self.rationale.filter(|r| !r.is_empty()),
            }),
            other => Err(ConsolidationError::InvalidEditKind {
                index,
                kind: other.unwrap_or("<missing>").to_string(),
            }),
        }
    }
}

/// Decode a whole streamed batch. The first invalid edit rejects the batch.
pub fn decode_batch(drafts: Vec<EditDraft>) -> Result<Vec<Edit>, ConsolidationError> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, draft)| draft.into_edit(index))
        .collect()
}

/// Best-effort decode for progress display: drops edits that are not (yet)
/// valid instead of failing.
pub fn decode_preview(drafts: Vec<EditDraft>) -> Vec<Edit> {
    drafts
        .into_iter()
        .enumerate()
        .filter_map(|(index, draft)| draft.into_edit(index).ok())
        .collect()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsolidationError {
    #[error("Edit #{index} has unsupported kind '{kind}' (expected delete or merge)")]
    InvalidEditKind { index: usize, kind: String },
    #[error("Edit #{index} references no ids")]
    EmptyIds { index: usize },
    #[error("Ids referenced by more than one edit: {}", ids.join(", "))]
    OverlappingEdits { ids: Vec<RecordId> },
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Reject a batch in which two edits touch the same id. When false the
    /// batch is applied and the overlap only reported.
    pub reject_overlapping: bool,
}

/// What a batch did to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationOutcome {
    pub removed: Vec<Record>,
    pub created: Vec<Record>,
    /// Referenced ids that were not live when the batch was applied.
    pub unknown_ids: Vec<RecordId>,
    pub overlapping_ids: Vec<RecordId>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationEngine {
    namespace: Namespace,
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    pub fn new(namespace: Namespace, config: ConsolidationConfig) -> Self {
        Self { namespace, config }
    }

    /// Ids that appear in more than one edit, in first-seen order.
    pub fn overlapping_ids(edits: &[Edit]) -> Vec<RecordId> {
        let mut owners: HashMap<&str, usize> = HashMap::new();
        let mut overlapping = Vec::new();
        for (index, edit) in edits.iter().enumerate() {
            for id in edit.ids() {
                match owners.get(id.as_str()) {
                    None => {
                        owners.insert(id, index);
                    }
                    Some(&owner) if owner != index && !overlapping.contains(id) => {
                        overlapping.push(id.clone());
                    }
                    Some(_) => {}
                }
            }
        }
        overlapping
    }

    /// Apply a batch. Either the whole batch is applied or, on error, the
    /// store is left untouched.
    pub fn apply(
        &self,
        store: &mut RecordStore,
        edits: &[Edit],
    ) -> Result<ConsolidationOutcome, ConsolidationError> {
        if let Some(index) = edits.iter().position(|e| e.ids().is_empty()) {
            return Err(ConsolidationError::EmptyIds { index });
        }

        let overlapping_ids = Self::overlapping_ids(edits);
        if !overlapping_ids.is_empty() {
            if self.config.reject_overlapping {
                return Err(ConsolidationError::OverlappingEdits {
                    ids: overlapping_ids,
                });
            }
            tracing::warn!(ids = ?overlapping_ids, "edits overlap; last applied wins");
        }

        // Step 1: union of referenced ids, first-seen order.
        let mut seen = HashSet::new();
        let union: Vec<RecordId> = edits
            .iter()
            .flat_map(|e| e.ids().iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        // Step 2: pre-removal snapshot, then remove.
        let snapshot: HashMap<RecordId, Record> = union
            .iter()
            .filter_map(|id| store.lookup(id).map(|r| (id.clone(), r.clone())))
            .collect();
        let unknown_ids: Vec<RecordId> = union
            .iter()
            .filter(|id| !snapshot.contains_key(*id))
            .cloned()
            .collect();
        if !unknown_ids.is_empty() {
            tracing::warn!(ids = ?unknown_ids, "edits reference unknown ids");
        }
        let removed = store.remove(&union);

        // Step 3: synthesize merges in batch order.
        let mut created = Vec::new();
        for edit in edits {
            let Edit::Merge {
                ids,
                title,
                body,
                priority,
                rationale,
                ..
            } = edit
            else {
                continue;
            };

            let merged: Vec<&Record> = ids.iter().filter_map(|id| snapshot.get(id)).collect();
            let record = Record {
                id: store.next_id(self.namespace),
                title: title.clone(),
                body: body.clone(),
                kind: merged.iter().find_map(|r| r.kind),
                priority: *priority,
                rationale: rationale.clone(),
                sources: merged
                    .iter()
                    .flat_map(|r| r.sources.iter().cloned())
                    .collect(),
            };
            store.append([record.clone()]);
            created.push(record);
        }

        tracing::info!(
            edits = edits.len(),
            removed = removed.len(),
            created = created.len(),
            "applied consolidation batch"
        );

        Ok(ConsolidationOutcome {
            removed,
            created,
            unknown_ids,
            overlapping_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Source;
    use serde_json::json;

    fn seeded_store(n: usize) -> RecordStore {
        let mut store = RecordStore::new();
        for i in 0..n {
            let id = store.next_id(Namespace::Rule);
            store.append([Record {
                id,
                title: format!("R{i}"),
                body: String::new(),
                kind: None,
                priority: Priority::Low,
                rationale: None,
                sources: vec![
                    Source {
                        quote: format!("q{i}a"),
                        file: "a.txt".into(),
                    },
                    Source {
                        quote: format!("q{i}b"),
                        file: "b.txt".into(),
                    },
                ],
            }]);
        }
        store
    }

    fn merge(ids: &[&str], title: &str) -> Edit {
        Edit::Merge {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            reason: "dup".into(),
            title: title.into(),
            body: "merged body".into(),
            priority: Priority::High,
            rationale: Some("why".into()),
        }
    }

    fn delete(ids: &[&str]) -> Edit {
        Edit::Delete {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            reason: "obsolete".into(),
        }
    }

    #[test]
    fn test_edit_wire_format() {
        let edit: Edit = serde_json::from_value(json!({
            "edit": "merge", "ids": ["rule-0"], "reason": "r",
            "title": "T", "body": "B", "priority": "high", "rationale": "x"
        }))
        .unwrap();
        assert_eq!(edit.kind(), "merge");
        let back = serde_json::to_value(&edit).unwrap();
        assert_eq!(back["edit"], "merge");
        assert_eq!(back["priority"], "high");
    }

    #[test]
    fn test_draft_kind_checking() {
        let ok = EditDraft {
            edit: Some("delete".into()),
            ids: vec!["rule-0".into()],
            ..Default::default()
        };
        assert!(matches!(ok.into_edit(0), Ok(Edit::Delete { .. })));

        let bad = EditDraft {
            edit: Some("rename".into()),
            ids: vec!["rule-0".into()],
            ..Default::default()
        };
        assert_eq!(
            bad.into_edit(3),
            Err(ConsolidationError::InvalidEditKind {
                index: 3,
                kind: "rename".into()
            })
        );

        let empty = EditDraft {
            edit: Some("merge".into()),
            ..Default::default()
        };
        assert_eq!(
            empty.into_edit(1),
            Err(ConsolidationError::EmptyIds { index: 1 })
        );
    }

    #[test]
    fn test_decode_batch_rejects_whole_batch() {
        let drafts = vec![
            EditDraft {
                edit: Some("delete".into()),
                ids: vec!["rule-0".into()],
                ..Default::default()
            },
            EditDraft {
                edit: Some("split".into()),
                ids: vec!["rule-1".into()],
                ..Default::default()
            },
        ];
        assert!(decode_batch(drafts.clone()).is_err());
        assert_eq!(decode_preview(drafts).len(), 1);
    }

    #[test]
    fn test_merge_concatenates_sources_in_order() {
        let mut store = seeded_store(3);
        let engine = ConsolidationEngine::default();
        let outcome = engine
            .apply(&mut store, &[merge(&["rule-2", "rule-0"], "X")])
            .unwrap();

        assert_eq!(outcome.created.len(), 1);
        let merged = store.lookup("rule-3").unwrap();
        assert_eq!(merged.title, "X");
        assert_eq!(merged.priority, Priority::High);
        let quotes: Vec<&str> = merged.sources.iter().map(|s| s.quote.as_str()).collect();
        assert_eq!(quotes, vec!["q2a", "q2b", "q0a", "q0b"]);

        assert!(store.lookup("rule-0").is_none());
        assert!(store.lookup("rule-2").is_none());
        assert!(store.lookup("rule-1").is_some());
        let order: Vec<&str> = store.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["rule-1", "rule-3"]);
    }

    #[test]
    fn test_delete_and_merge_in_one_batch() {
        let mut store = seeded_store(4);
        let engine = ConsolidationEngine::default();
        let outcome = engine
            .apply(
                &mut store,
                &[
                    delete(&["rule-3"]),
                    merge(&["rule-0", "rule-1"], "A"),
                    merge(&["rule-2"], "B"),
                ],
            )
            .unwrap();

        assert_eq!(outcome.removed.len(), 4);
        let ids: Vec<&str> = outcome.created.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rule-4", "rule-5"]);
        assert_eq!(store.len(), 2);
        assert!(outcome.unknown_ids.is_empty());
    }

    #[test]
    fn test_unknown_ids_are_skipped_and_reported() {
        let mut store = seeded_store(1);
        let engine = ConsolidationEngine::default();
        let outcome = engine
            .apply(&mut store, &[merge(&["rule-0", "rule-9"], "X")])
            .unwrap();
        assert_eq!(outcome.unknown_ids, vec!["rule-9".to_string()]);
        assert_eq!(outcome.created[0].sources.len(), 2);
    }

    #[test]
    fn test_overlap_last_applied_wins_by_default() {
        let mut store = seeded_store(2);
        let engine = ConsolidationEngine::default();
        let outcome = engine
            .apply(
                &mut store,
                &[delete(&["rule-0"]), merge(&["rule-0", "rule-1"], "X")],
            )
            .unwrap();
        assert_eq!(outcome.overlapping_ids, vec!["rule-0".to_string()]);
        // The merge still sees rule-0 through the pre-removal snapshot.
        assert_eq!(outcome.created[0].sources.len(), 4);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_overlap_rejected_leaves_store_untouched() {
        let mut store = seeded_store(2);
        let engine = ConsolidationEngine::new(
            Namespace::Rule,
            ConsolidationConfig {
                reject_overlapping: true,
            },
        );
        let err = engine
            .apply(
                &mut store,
                &[delete(&["rule-1"]), merge(&["rule-0", "rule-1"], "X")],
            )
            .unwrap_err();
        assert_eq!(
            err,
            ConsolidationError::OverlappingEdits {
                ids: vec!["rule-1".into()]
            }
        );
        assert_eq!(store.len(), 2);
        assert_eq!(store.id_counter(), 2);
    }

    #[test]
    fn test_memory_merge_inherits_kind() {
        use crate::record::RecordKind;

        let mut store = RecordStore::new();
        for kind in [RecordKind::Code, RecordKind::Text] {
            let id = store.next_id(Namespace::Memory);
            store.append([Record {
                id,
                title: "m".into(),
                body: String::new(),
                kind: Some(kind),
                priority: Priority::Low,
                rationale: None,
                sources: vec![],
            }]);
        }
        let engine = ConsolidationEngine::new(Namespace::Memory, ConsolidationConfig::default());
        let outcome = engine
            .apply(&mut store, &[merge(&["mem-0", "mem-1"], "M")])
            .unwrap();
        assert_eq!(outcome.created[0].id, "mem-2");
        assert_eq!(outcome.created[0].kind, Some(RecordKind::Code));
    }
}

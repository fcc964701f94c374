//! RecordStore: the authoritative id → record mapping
//!
//! Holds live records in insertion order, an O(1) id index, a monotonic id
//! allocator, and tombstones for every id that has ever been removed. Ids are
//! never reused, so anything that copied an id (history, validation results)
//! resolves to either the live record, a retired snapshot, or nothing.

use crate::record::{id_number, Namespace, Record, RecordId, RecordPatch};
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(RecordId),
    #[error("Record id out of range: {0}")]
    IdOutOfRange(String),
    #[error("Only memories carry a type: {0}")]
    KindNotAllowed(RecordId),
}

/// Result of resolving an id that may no longer be live.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<'a> {
    Live(&'a Record),
    /// Removed; carries the last snapshot before removal.
    Retired(&'a Record),
    Unknown,
}

impl<'a> Resolved<'a> {
    pub fn record(self) -> Option<&'a Record> {
        match self {
            Resolved::Live(r) | Resolved::Retired(r) => Some(r),
            Resolved::Unknown => None,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Resolved::Live(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    index: HashMap<RecordId, usize>,
    retired: HashMap<RecordId, Record>,
    next_id: u64,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts.
    ///
    /// The counter is raised past any numeric suffix already in use so a
    /// hand-edited snapshot cannot make the allocator hand out a taken id.
    /// Ids or a counter at the top of the `u64` range leave no room to
    /// allocate and are rejected.
    pub fn from_parts(
        id_counter: u64,
        records: Vec<Record>,
        retired: Vec<Record>,
    ) -> Result<Self, StoreError> {
        if id_counter == u64::MAX {
            return Err(StoreError::IdOutOfRange(format!("idCounter {id_counter}")));
        }
        let mut next_id = id_counter;
        for record in records.iter().chain(retired.iter()) {
            let Some(n) = id_number(&record.id) else {
                continue;
            };
            match n.checked_add(1) {
                Some(after) if after < u64::MAX => next_id = next_id.max(after),
                _ => return Err(StoreError::IdOutOfRange(record.id.clone())),
            }
        }

        let mut store = Self {
            records: Vec::with_capacity(records.len()),
            index: HashMap::with_capacity(records.len()),
            retired: retired.into_iter().map(|r| (r.id.clone(), r)).collect(),
            next_id,
        };
        store.append(records);
        Ok(store)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The next number the allocator will hand out.
    pub fn id_counter(&self) -> u64 {
        self.next_id
    }

    /// Tombstones, sorted by id number for stable persistence.
    pub fn retired(&self) -> Vec<Record> {
        let mut retired: Vec<Record> = self.retired.values().cloned().collect();
        retired.sort_by_key(|r| (id_number(&r.id).unwrap_or(u64::MAX), r.id.clone()));
        retired
    }

    /// Reserve and return the next id.
    pub fn next_id(&mut self, namespace: Namespace) -> RecordId {
        let id = namespace.format_id(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Ids the next `n` calls to [`next_id`](Self::next_id) would return,
    /// without reserving them.
    pub fn peek_ids(&self, namespace: Namespace, n: usize) -> Vec<RecordId> {
        (0..n as u64)
            .map(|i| namespace.format_id(self.next_id.saturating_add(i)))
            .collect()
    }

    /// Append records whose ids were allocated with `next_id`.
    pub fn append(&mut self, records: impl IntoIterator<Item = Record>) {
        for record in records {
            if let Some(&pos) = self.index.get(&record.id) {
                tracing::warn!(id = %record.id, "append of an id that is already live; replacing");
                self.records[pos] = record;
                continue;
            }
            self.retired.remove(&record.id);
            self.index.insert(record.id.clone(), self.records.len());
            self.records.push(record);
        }
    }

    /// Remove every live record whose id is in `ids`. Unknown ids are ignored.
    /// Returns the removed records in store order.
    pub fn remove(&mut self, ids: &[RecordId]) -> Vec<Record> {
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        if !targets.iter().any(|id| self.index.contains_key(*id)) {
            return Vec::new();
        }

        let (removed, kept): (Vec<Record>, Vec<Record>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|r| targets.contains(r.id.as_str()));
        self.records = kept;
        self.reindex();

        for record in &removed {
            self.retired.insert(record.id.clone(), record.clone());
        }
        removed
    }

    pub fn update(&mut self, id: &str, patch: RecordPatch) -> Result<&Record, StoreError> {
        let pos = *self
            .index
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let record = &mut self.records[pos];
        patch.apply_to(record);
        Ok(record)
    }

    /// Remove a single record; unlike [`remove`](Self::remove) a missing id is
    /// an error.
    pub fn delete(&mut self, id: &str) -> Result<Record, StoreError> {
        if !self.index.contains_key(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.remove(&[id.to_string()])
            .pop()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Live records only.
    pub fn lookup(&self, id: &str) -> Option<&Record> {
        self.index.get(id).map(|&pos| &self.records[pos])
    }

    pub fn resolve(&self, id: &str) -> Resolved<'_> {
        if let Some(record) = self.lookup(id) {
            Resolved::Live(record)
        } else if let Some(record) = self.retired.get(id) {
            Resolved::Retired(record)
        } else {
            Resolved::Unknown
        }
    }

    /// Display label for an id referenced from history.
    pub fn label(&self, id: &str) -> String {
        match self.resolve(id).record() {
            Some(record) => record.title.clone(),
            None => format!("Unknown ({id})"),
        }
    }

    /// Drop everything, including the counter.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id.clone(), pos))
            .collect();
    }
}

//! Session: the whole knowledge-base state behind one owner
//!
//! Every method here is a single synchronous step, so a session shared as
//! `Arc<Mutex<Session>>` is never observed half-updated as long as the lock is
//! not held across an `.await`. Each step that changes what a view would show
//! emits the matching [`SessionEvent`].

use crate::consolidation::{ConsolidationEngine, ConsolidationError, ConsolidationOutcome, Edit};
use crate::learning::LearningEntry;
use crate::record::{Namespace, Record, RecordDraft, RecordPatch};
use crate::store::{RecordStore, Resolved, StoreError};
use crate::validation::{ValidationMatrix, ValidationMatrixAssembler, ValidationOutcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RestoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(
        "Snapshot holds {}, not {}; pass --namespace {} or use another state file",
        .stored.collection_key(),
        .requested.collection_key(),
        .stored.prefix()
    )]
    NamespaceMismatch {
        stored: Namespace,
        requested: Namespace,
    },
}

// ============================================================================
// Persisted state
// ============================================================================

/// Everything that survives a restart. In-flight validations are not part of
/// it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    /// Absent in snapshots written before it was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    pub id_counter: u64,
    pub records: Vec<Record>,
    pub learnings: Vec<LearningEntry>,
    pub validations: Vec<ValidationOutcome>,
    pub file_order: Vec<String>,
    /// Last snapshots of removed records, for resolving history.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired: Vec<Record>,
}

impl EngineState {
    /// Nothing was ever collected, so the namespace is still open.
    pub fn is_empty(&self) -> bool {
        self.id_counter == 0
            && self.records.is_empty()
            && self.learnings.is_empty()
            && self.validations.is_empty()
            && self.retired.is_empty()
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RecordsChanged {
        live: Vec<Record>,
        /// Provisional records from an extraction that is still streaming.
        just_arrived: Vec<Record>,
    },
    LearningsChanged {
        entries: Vec<LearningEntry>,
        /// Edits of a consolidation that is still streaming.
        in_progress: Vec<Edit>,
    },
    ValidationMatrixChanged(ValidationMatrix),
}

pub type SessionEventHandler = Box<dyn Fn(&SessionEvent) + Send + Sync>;

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    namespace: Namespace,
    store: RecordStore,
    learnings: Vec<LearningEntry>,
    validations: ValidationMatrixAssembler,
    handlers: Vec<SessionEventHandler>,
}

impl Session {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            store: RecordStore::new(),
            learnings: Vec::new(),
            validations: ValidationMatrixAssembler::new(),
            handlers: Vec::new(),
        }
    }

    /// Rebuild a session from a snapshot. A snapshot that already collected
    /// records of another namespace is refused.
    pub fn restore(namespace: Namespace, state: EngineState) -> Result<Self, RestoreError> {
        if let Some(stored) = state.namespace {
            if stored != namespace && !state.is_empty() {
                return Err(RestoreError::NamespaceMismatch {
                    stored,
                    requested: namespace,
                });
            }
        }
        Ok(Self {
            namespace,
            store: RecordStore::from_parts(state.id_counter, state.records, state.retired)?,
            learnings: state.learnings,
            validations: ValidationMatrixAssembler::from_parts(
                state.validations,
                state.file_order,
            ),
            handlers: Vec::new(),
        })
    }

    pub fn to_state(&self) -> EngineState {
        EngineState {
            namespace: Some(self.namespace),
            id_counter: self.store.id_counter(),
            records: self.store.records().to_vec(),
            learnings: self.learnings.clone(),
            validations: self.validations.outcomes().to_vec(),
            file_order: self.validations.file_order().as_slice().to_vec(),
            retired: self.store.retired(),
        }
    }

    /// Add an event handler
    pub fn on_event(&mut self, handler: SessionEventHandler) {
        self.handlers.push(handler);
    }

    fn emit(&self, event: SessionEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }

    fn emit_records(&self, just_arrived: Vec<Record>) {
        if self.handlers.is_empty() {
            return;
        }
        self.emit(SessionEvent::RecordsChanged {
            live: self.store.records().to_vec(),
            just_arrived,
        });
    }

    fn emit_learnings(&self, in_progress: Vec<Edit>) {
        if self.handlers.is_empty() {
            return;
        }
        self.emit(SessionEvent::LearningsChanged {
            entries: self.learnings.clone(),
            in_progress,
        });
    }

    fn emit_matrix(&self) {
        if self.handlers.is_empty() {
            return;
        }
        self.emit(SessionEvent::ValidationMatrixChanged(self.matrix()));
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn records(&self) -> &[Record] {
        self.store.records()
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn learnings(&self) -> &[LearningEntry] {
        &self.learnings
    }

    pub fn validations(&self) -> &ValidationMatrixAssembler {
        &self.validations
    }

    pub fn resolve(&self, id: &str) -> Resolved<'_> {
        self.store.resolve(id)
    }

    pub fn matrix(&self) -> ValidationMatrix {
        self.validations.matrix(self.store.records())
    }

    // ------------------------------------------------------------------------
    // Extraction
    // ------------------------------------------------------------------------

    /// Label streamed drafts with the ids they would get, without reserving
    /// them, and publish them as provisional.
    pub fn preview_extraction(&self, file: &str, drafts: Vec<RecordDraft>) -> Vec<Record> {
        let ids = self.store.peek_ids(self.namespace, drafts.len());
        let provisional: Vec<Record> = drafts
            .into_iter()
            .zip(ids)
            .map(|(draft, id)| draft.into_record(id, file, self.namespace))
            .collect();
        self.emit_records(provisional.clone());
        provisional
    }

    /// Commit a finished extraction: allocate ids, append, and log it.
    pub fn commit_extraction(&mut self, file: &str, drafts: Vec<RecordDraft>) -> Vec<Record> {
        let records: Vec<Record> = drafts
            .into_iter()
            .map(|draft| {
                let id = self.store.next_id(self.namespace);
                draft.into_record(id, file, self.namespace)
            })
            .collect();
        self.store.append(records.clone());
        self.learnings
            .push(LearningEntry::ingest(file, records.clone()));

        tracing::info!(file, records = records.len(), "extraction committed");
        self.emit_records(Vec::new());
        self.emit_learnings(Vec::new());
        self.emit_matrix();
        records
    }

    /// Withdraw provisional records of an extraction that failed.
    pub fn abandon_extraction(&self) {
        self.emit_records(Vec::new());
    }

    // ------------------------------------------------------------------------
    // Consolidation
    // ------------------------------------------------------------------------

    pub fn preview_consolidation(&self, edits: Vec<Edit>) {
        self.emit_learnings(edits);
    }

    /// Apply a complete batch atomically and log it.
    pub fn commit_consolidation(
        &mut self,
        engine: &ConsolidationEngine,
        edits: Vec<Edit>,
    ) -> Result<ConsolidationOutcome, ConsolidationError> {
        let outcome = match engine.apply(&mut self.store, &edits) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.emit_learnings(Vec::new());
                return Err(err);
            }
        };
        self.learnings.push(LearningEntry::consolidation(edits));

        self.emit_records(Vec::new());
        self.emit_learnings(Vec::new());
        self.emit_matrix();
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Direct edits
    // ------------------------------------------------------------------------

    pub fn update_record(&mut self, id: &str, patch: RecordPatch) -> Result<Record, StoreError> {
        if patch.kind.is_some() && self.namespace != Namespace::Memory {
            return Err(StoreError::KindNotAllowed(id.to_string()));
        }
        let record = self.store.update(id, patch)?.clone();
        self.emit_records(Vec::new());
        self.emit_matrix();
        Ok(record)
    }

    pub fn delete_record(&mut self, id: &str) -> Result<Record, StoreError> {
        let record = self.store.delete(id)?;
        self.emit_records(Vec::new());
        self.emit_matrix();
        Ok(record)
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    pub fn begin_validation(&mut self, file: &str) {
        self.validations.request(file);
        self.emit_matrix();
    }

    pub fn stream_validation(&mut self, file: &str, outcomes: Vec<ValidationOutcome>) {
        self.validations.ingest_partial(file, outcomes);
        self.emit_matrix();
    }

    pub fn complete_validation(&mut self, file: &str, outcomes: Vec<ValidationOutcome>) {
        self.validations.complete(file, outcomes);
        tracing::info!(file, "validation committed");
        self.emit_matrix();
    }

    pub fn fail_validation(&mut self, file: &str) {
        self.validations.fail(file);
        self.emit_matrix();
    }

    pub fn remove_validation(&mut self, file: &str) {
        self.validations.remove_file(file);
        self.emit_matrix();
    }

    /// Forget everything. Event handlers stay registered.
    pub fn clear(&mut self) {
        self.store.clear();
        self.learnings.clear();
        self.validations.clear();
        self.emit_records(Vec::new());
        self.emit_learnings(Vec::new());
        self.emit_matrix();
    }
}

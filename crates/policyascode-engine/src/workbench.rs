//! Workbench: drives oracle streams into the session
//!
//! The workbench owns the shared [`Session`], the oracle and an optional
//! snapshot store. Each public operation opens a [`StreamSession`], publishes
//! provisional state while the stream runs and commits once it completes:
//!
//! ```text
//!   ingest(doc) ─────► extraction stream ──► preview_extraction ... commit_extraction
//!   consolidate() ───► edits stream ───────► preview_consolidation ... commit_consolidation
//!   validate_all(docs) ─┬► validation stream ► stream_validation ... complete_validation
//!                       └► validation stream ► ...          (one tokio task per file)
//! ```
//!
//! The session lock is taken for single synchronous steps only and is never
//! held across an `.await`. Event handlers run under that lock and must not
//! call back into the workbench.

use crate::consolidation::{
    decode_batch, decode_preview, ConsolidationConfig, ConsolidationEngine, ConsolidationError,
    ConsolidationOutcome, Edit, EditDraft,
};
use crate::document::{Document, DocumentError};
use crate::learning::LearningEntry;
use crate::oracle::{InputPart, Oracle, OracleError, OracleRequest};
use crate::partial_json::items_under;
use crate::prompts;
use crate::record::{Namespace, Record, RecordDraft, RecordPatch};
use crate::session::{EngineState, RestoreError, Session, SessionEventHandler};
use crate::store::StoreError;
use crate::stream::StreamSession;
use crate::validation::{outcomes_from_drafts, OutcomeDraft, ValidationMatrix, ValidationOutcome};
use parking_lot::Mutex;
use policyascode_storage::{load_or_default, save_json, SnapshotStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinSet;

const EDITS_KEY: &str = "edits";
const VALIDATIONS_KEY: &str = "validations";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbenchConfig {
    pub namespace: Namespace,
    pub extraction_instructions: String,
    pub consolidation_instructions: String,
    pub validation_instructions: String,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

impl WorkbenchConfig {
    /// Default instructions for `namespace`.
    pub fn for_namespace(namespace: Namespace) -> Self {
        Self {
            namespace,
            extraction_instructions: prompts::default_extraction(namespace).to_string(),
            consolidation_instructions: prompts::CONSOLIDATION.to_string(),
            validation_instructions: prompts::VALIDATION.to_string(),
            consolidation: ConsolidationConfig::default(),
        }
    }
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self::for_namespace(Namespace::default())
    }
}

// ============================================================================
// Errors and reports
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WorkbenchError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Consolidation(#[from] ConsolidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("No {0} yet. Extract some first")]
    NoRecords(&'static str),
    #[error("Task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub file: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationReport {
    pub edits: Vec<Edit>,
    pub outcome: ConsolidationOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub file: String,
    pub outcomes: Vec<ValidationOutcome>,
}

// ============================================================================
// Workbench
// ============================================================================

/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Workbench {
    session: Arc<Mutex<Session>>,
    oracle: Arc<dyn Oracle>,
    store: Option<Arc<dyn SnapshotStore>>,
    /// Serializes snapshot writes so a stale state never overwrites a newer one.
    persist_lock: Arc<Mutex<()>>,
    config: Arc<WorkbenchConfig>,
    engine: ConsolidationEngine,
}

impl Workbench {
    /// In-memory workbench with an empty session.
    pub fn new(oracle: Arc<dyn Oracle>, config: WorkbenchConfig) -> Self {
        let session = Session::new(config.namespace);
        Self::assemble(oracle, config, session, None)
    }

    /// Restore from `store` (empty state if missing or unreadable) and save
    /// back to it after every committed change. A snapshot of another
    /// namespace or with unusable ids is refused rather than overwritten.
    pub fn with_store(
        oracle: Arc<dyn Oracle>,
        config: WorkbenchConfig,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, WorkbenchError> {
        let state: EngineState = load_or_default(store.as_ref());
        tracing::debug!(
            location = %store.location(),
            records = state.records.len(),
            learnings = state.learnings.len(),
            "restored session"
        );
        let session = Session::restore(config.namespace, state)?;
        Ok(Self::assemble(oracle, config, session, Some(store)))
    }

    fn assemble(
        oracle: Arc<dyn Oracle>,
        config: WorkbenchConfig,
        session: Session,
        store: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        let engine = ConsolidationEngine::new(config.namespace, config.consolidation.clone());
        Self {
            session: Arc::new(Mutex::new(session)),
            oracle,
            store,
            persist_lock: Arc::new(Mutex::new(())),
            config: Arc::new(config),
            engine,
        }
    }

    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    pub fn namespace(&self) -> Namespace {
        self.config.namespace
    }

    /// Register a handler for session events.
    pub fn on_event(&self, handler: SessionEventHandler) {
        self.session.lock().on_event(handler);
    }

    /// Run `f` against the current session state.
    pub fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.session.lock())
    }

    pub fn records(&self) -> Vec<Record> {
        self.read(|s| s.records().to_vec())
    }

    pub fn learnings(&self) -> Vec<LearningEntry> {
        self.read(|s| s.learnings().to_vec())
    }

    pub fn matrix(&self) -> ValidationMatrix {
        self.read(Session::matrix)
    }

    pub fn state(&self) -> EngineState {
        self.read(Session::to_state)
    }

    // ------------------------------------------------------------------------
    // Streaming
    // ------------------------------------------------------------------------

    /// Run one request to completion, handing every intermediate value to
    /// `on_partial`. Returns the final value.
    async fn drive<F>(&self, request: OracleRequest, mut on_partial: F) -> Result<Value, OracleError>
    where
        F: FnMut(&Value) + Send,
    {
        let mut stream = StreamSession::open(Arc::clone(&self.oracle), request);
        while let Some(item) = stream.next().await {
            let snapshot = item?;
            if snapshot.complete {
                return Ok(snapshot.value);
            }
            on_partial(&snapshot.value);
        }
        Err(OracleError::Stream(
            "stream ended before completion".to_string(),
        ))
    }

    // ------------------------------------------------------------------------
    // Extraction
    // ------------------------------------------------------------------------

    /// Extract records from one document. Records are committed only when
    /// the stream completes; on failure nothing is added.
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport, WorkbenchError> {
        let namespace = self.config.namespace;
        let key = namespace.collection_key();
        let file = document.name.as_str();
        let request = OracleRequest {
            instructions: self.config.extraction_instructions.clone(),
            input: document.input_parts(),
            schema: prompts::extraction_schema(namespace),
        };

        let result = self
            .drive(request, |value| {
                let drafts: Vec<RecordDraft> = items_under(value, key);
                self.session.lock().preview_extraction(file, drafts);
            })
            .await;
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(file, error = %err, "extraction failed");
                self.session.lock().abandon_extraction();
                return Err(err.into());
            }
        };

        let drafts: Vec<RecordDraft> = items_under(&value, key);
        let records = self.session.lock().commit_extraction(file, drafts);
        self.persist();
        Ok(IngestReport {
            file: file.to_string(),
            records,
        })
    }

    /// Ingest documents one after another. A failing document does not stop
    /// the rest; results come back in input order.
    pub async fn ingest_all(
        &self,
        documents: &[Document],
    ) -> Vec<Result<IngestReport, WorkbenchError>> {
        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(self.ingest(document).await);
        }
        results
    }

    // ------------------------------------------------------------------------
    // Consolidation
    // ------------------------------------------------------------------------

    /// Ask the oracle for edits over the live records and apply the batch.
    pub async fn consolidate(&self) -> Result<ConsolidationReport, WorkbenchError> {
        let key = self.config.namespace.collection_key();
        let records = self.records();
        if records.is_empty() {
            return Err(WorkbenchError::NoRecords(key));
        }

        let request = OracleRequest {
            instructions: self.config.consolidation_instructions.clone(),
            input: vec![InputPart::InputText {
                text: format!("{:#}", json!({ key: records })),
            }],
            schema: prompts::edits_schema(),
        };

        let result = self
            .drive(request, |value| {
                let edits = decode_preview(items_under::<EditDraft>(value, EDITS_KEY));
                self.session.lock().preview_consolidation(edits);
            })
            .await;
        let value = match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "consolidation stream failed");
                self.session.lock().preview_consolidation(Vec::new());
                return Err(err.into());
            }
        };

        let edits = match decode_batch(items_under(&value, EDITS_KEY)) {
            Ok(edits) => edits,
            Err(err) => {
                tracing::warn!(error = %err, "consolidation batch rejected");
                self.session.lock().preview_consolidation(Vec::new());
                return Err(err.into());
            }
        };
        if edits.is_empty() {
            tracing::info!("oracle proposed no edits");
            self.session.lock().preview_consolidation(Vec::new());
            return Ok(ConsolidationReport::default());
        }

        let outcome = self
            .session
            .lock()
            .commit_consolidation(&self.engine, edits.clone())?;
        tracing::info!(
            edits = edits.len(),
            removed = outcome.removed.len(),
            created = outcome.created.len(),
            "consolidation applied"
        );
        self.persist();
        Ok(ConsolidationReport { edits, outcome })
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    fn validation_request(&self, records: &[Record], document: &Document) -> OracleRequest {
        let key = self.config.namespace.collection_key();
        OracleRequest {
            instructions: format!(
                "{}\n\nValidate against these {}:\n{:#}",
                self.config.validation_instructions,
                key,
                json!({ key: records })
            ),
            input: document.input_parts(),
            schema: prompts::validations_schema(),
        }
    }

    /// Validate one document against the live records.
    pub async fn validate(&self, document: &Document) -> Result<ValidationReport, WorkbenchError> {
        let records = self.records();
        if records.is_empty() {
            return Err(WorkbenchError::NoRecords(
                self.config.namespace.collection_key(),
            ));
        }
        let request = self.validation_request(&records, document);
        self.session.lock().begin_validation(&document.name);
        self.run_validation(document.name.clone(), request).await
    }

    /// Validate documents concurrently. Columns are registered in input order
    /// before any stream starts, so completion order never reorders them.
    pub async fn validate_all(
        &self,
        documents: Vec<Document>,
    ) -> Vec<Result<ValidationReport, WorkbenchError>> {
        let key = self.config.namespace.collection_key();
        let records = self.records();
        if records.is_empty() {
            return documents
                .iter()
                .map(|_| Err(WorkbenchError::NoRecords(key)))
                .collect();
        }

        let files: Vec<String> = documents.iter().map(|d| d.name.clone()).collect();
        {
            let mut session = self.session.lock();
            for file in &files {
                session.begin_validation(file);
            }
        }

        let mut tasks = JoinSet::new();
        for (index, document) in documents.into_iter().enumerate() {
            let request = self.validation_request(&records, &document);
            let workbench = self.clone();
            tasks.spawn(async move {
                let result = workbench.run_validation(document.name, request).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<ValidationReport, WorkbenchError>>> =
            files.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => tracing::error!(error = %err, "validation task failed"),
            }
        }

        slots
            .into_iter()
            .zip(files)
            .map(|(slot, file)| {
                slot.unwrap_or_else(|| {
                    self.session.lock().fail_validation(&file);
                    Err(WorkbenchError::Task(format!("validation of {file} did not finish")))
                })
            })
            .collect()
    }

    async fn run_validation(
        &self,
        file: String,
        request: OracleRequest,
    ) -> Result<ValidationReport, WorkbenchError> {
        let result = self
            .drive(request, |value| {
                let drafts: Vec<OutcomeDraft> = items_under(value, VALIDATIONS_KEY);
                let outcomes = outcomes_from_drafts(&file, drafts);
                self.session.lock().stream_validation(&file, outcomes);
            })
            .await;

        match result {
            Ok(value) => {
                let outcomes = outcomes_from_drafts(&file, items_under(&value, VALIDATIONS_KEY));
                self.session
                    .lock()
                    .complete_validation(&file, outcomes.clone());
                self.persist();
                Ok(ValidationReport { file, outcomes })
            }
            Err(err) => {
                tracing::warn!(%file, error = %err, "validation failed");
                self.session.lock().fail_validation(&file);
                Err(err.into())
            }
        }
    }

    /// Drop a file's outcomes. Its column position is remembered.
    pub fn forget_validation(&self, file: &str) {
        self.session.lock().remove_validation(file);
        self.persist();
    }

    // ------------------------------------------------------------------------
    // Direct edits
    // ------------------------------------------------------------------------

    pub fn update_record(&self, id: &str, patch: RecordPatch) -> Result<Record, WorkbenchError> {
        let record = self.session.lock().update_record(id, patch)?;
        self.persist();
        Ok(record)
    }

    pub fn delete_record(&self, id: &str) -> Result<Record, WorkbenchError> {
        let record = self.session.lock().delete_record(id)?;
        self.persist();
        Ok(record)
    }

    /// Reset the session and remove the persisted snapshot.
    pub fn clear(&self) {
        self.session.lock().clear();
        if let Some(store) = &self.store {
            if let Err(err) = store.clear() {
                tracing::warn!(location = %store.location(), error = %err, "failed to clear snapshot");
            }
        }
    }

    /// Save the current state. Failures are logged, never returned.
    pub fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let _guard = self.persist_lock.lock();
        let state = self.state();
        match save_json(store.as_ref(), &state) {
            Ok(()) => tracing::debug!(location = %store.location(), "snapshot saved"),
            Err(err) => {
                tracing::warn!(location = %store.location(), error = %err, "failed to save snapshot")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{Script, ScriptedOracle};
    use crate::session::SessionEvent;
    use crate::store::Resolved;
    use crate::validation::{Cell, ValidationResult};
    use policyascode_storage::MemoryStore;
    use std::time::Duration;

    fn rules_script(titles: &[&str]) -> Script {
        let rules: Vec<Value> = titles
            .iter()
            .map(|t| {
                json!({
                    "title": t,
                    "body": format!("{t} body"),
                    "priority": "high",
                    "rationale": "r",
                    "sources": [{"quote": format!("quote for {t}")}]
                })
            })
            .collect();
        Script::json(&json!({ "rules": rules }), 7)
    }

    fn workbench(scripts: Vec<Script>) -> (Workbench, Arc<ScriptedOracle>) {
        let oracle = Arc::new(ScriptedOracle::new(scripts));
        let workbench = Workbench::new(oracle.clone(), WorkbenchConfig::default());
        (workbench, oracle)
    }

    #[tokio::test]
    async fn test_ingest_commits_on_completion() {
        let (workbench, _) = workbench(vec![rules_script(&["Encrypt", "Rotate"])]);
        let provisional = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&provisional);
        workbench.on_event(Box::new(move |event| {
            if let SessionEvent::RecordsChanged { just_arrived, .. } = event {
                let mut max = sink.lock();
                *max = (*max).max(just_arrived.len());
            }
        }));

        let report = workbench
            .ingest(&Document::text("a.txt", "policy"))
            .await
            .unwrap();
        let ids: Vec<&str> = report.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rule-0", "rule-1"]);
        assert_eq!(report.records[0].sources[0].file, "a.txt");
        assert_eq!(*provisional.lock(), 2);
        assert_eq!(workbench.learnings().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_ingest_adds_nothing() {
        let (workbench, _) = workbench(vec![
            rules_script(&["Encrypt"]).fail_after(3, "connection reset"),
        ]);
        let err = workbench
            .ingest(&Document::text("a.txt", "policy"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkbenchError::Oracle(OracleError::Stream(_))));
        assert!(workbench.records().is_empty());
        assert_eq!(workbench.state().id_counter, 0);
    }

    #[tokio::test]
    async fn test_ingest_all_isolates_failures() {
        let (workbench, _) = workbench(vec![
            rules_script(&["A"]).for_input("# one.txt"),
            Script::rejecting(OracleError::Api {
                status: 500,
                message: "boom".into(),
            })
            .for_input("# two.txt"),
            rules_script(&["C"]).for_input("# three.txt"),
        ]);
        let docs = vec![
            Document::text("one.txt", "1"),
            Document::text("two.txt", "2"),
            Document::text("three.txt", "3"),
        ];
        let results = workbench.ingest_all(&docs).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().records[0].id, "rule-1");
    }

    #[tokio::test]
    async fn test_consolidate_merges_and_reports() {
        let (workbench, oracle) = workbench(vec![rules_script(&["A", "B"])]);
        workbench.ingest(&Document::text("a.txt", "x")).await.unwrap();

        oracle.push(Script::json(
            &json!({"edits": [{
                "edit": "merge", "ids": ["rule-0", "rule-1", "rule-7"],
                "title": "X", "body": "merged", "priority": "low",
                "rationale": "dup", "reason": "same thing"
            }]}),
            5,
        ));
        let report = workbench.consolidate().await.unwrap();
        assert_eq!(report.outcome.unknown_ids, vec!["rule-7".to_string()]);

        let records = workbench.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "rule-2");
        assert_eq!(records[0].sources.len(), 2);
        workbench.read(|s| {
            assert!(matches!(s.resolve("rule-0"), Resolved::Retired(_)));
            assert!(matches!(s.resolve("rule-7"), Resolved::Unknown));
        });
        assert!(oracle.requests()[1].input[0].text().contains("\"rule-1\""));
    }

    #[tokio::test]
    async fn test_invalid_edit_kind_rejects_batch() {
        let (workbench, oracle) = workbench(vec![rules_script(&["A", "B"])]);
        workbench.ingest(&Document::text("a.txt", "x")).await.unwrap();
        oracle.push(Script::json(
            &json!({"edits": [
                {"edit": "delete", "ids": ["rule-0"], "reason": "dup"},
                {"edit": "rename", "ids": ["rule-1"], "reason": "?"}
            ]}),
            9,
        ));
        let err = workbench.consolidate().await.unwrap_err();
        assert!(matches!(
            err,
            WorkbenchError::Consolidation(ConsolidationError::InvalidEditKind { index: 1, .. })
        ));
        assert_eq!(workbench.records().len(), 2);
        assert_eq!(workbench.learnings().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_store_is_an_error() {
        let (workbench, oracle) = workbench(vec![]);
        assert!(matches!(
            workbench.consolidate().await,
            Err(WorkbenchError::NoRecords("rules"))
        ));
        assert!(matches!(
            workbench.validate(&Document::text("v.txt", "x")).await,
            Err(WorkbenchError::NoRecords(_))
        ));
        assert!(oracle.requests().is_empty());
    }

    #[tokio::test]
    async fn test_validate_all_keeps_input_order() {
        let outcome = |result: &str| {
            json!({"validations": [{"id": "rule-0", "result": result, "reason": "r"}]})
        };
        let (workbench, _) = workbench(vec![
            rules_script(&["A"]),
            Script::json(&outcome("pass"), 4)
                .with_delay(Duration::from_millis(10))
                .for_input("# vendor-a.md"),
            Script::json(&outcome("fail"), 64).for_input("# vendor-b.md"),
            Script::rejecting(OracleError::Network("down".into())).for_input("# vendor-c.md"),
        ]);
        workbench
            .ingest(&Document::text("policy.txt", "x"))
            .await
            .unwrap();

        let results = workbench
            .validate_all(vec![
                Document::text("vendor-a.md", "a"),
                Document::text("vendor-b.md", "b"),
                Document::text("vendor-c.md", "c"),
            ])
            .await;
        assert_eq!(results[0].as_ref().unwrap().file, "vendor-a.md");
        assert_eq!(
            results[1].as_ref().unwrap().outcomes[0].result,
            ValidationResult::Fail
        );
        assert!(results[2].is_err());

        // vendor-b finished first but stays in the second column
        let matrix = workbench.matrix();
        assert_eq!(matrix.files, vec!["vendor-a.md", "vendor-b.md"]);
        assert!(matrix.in_flight.is_empty());
        assert!(matches!(
            &matrix.rows[0].cells[0],
            Cell::Outcome {
                result: ValidationResult::Pass,
                live: false,
                ..
            }
        ));
        assert_eq!(
            workbench.state().file_order,
            vec!["vendor-a.md", "vendor-b.md", "vendor-c.md"]
        );
    }

    #[tokio::test]
    async fn test_persists_after_each_commit() {
        let oracle = Arc::new(ScriptedOracle::new([rules_script(&["A", "B"])]));
        let store = Arc::new(MemoryStore::new());
        let workbench =
            Workbench::with_store(oracle.clone(), WorkbenchConfig::default(), store.clone())
                .unwrap();
        workbench.ingest(&Document::text("a.txt", "x")).await.unwrap();
        workbench.delete_record("rule-0").unwrap();

        let reopened =
            Workbench::with_store(oracle.clone(), WorkbenchConfig::default(), store.clone())
                .unwrap();
        assert_eq!(reopened.state(), workbench.state());
        assert_eq!(reopened.records().len(), 1);

        // The rule snapshot is not reopened as memories
        let memories = Workbench::with_store(
            oracle,
            WorkbenchConfig::for_namespace(Namespace::Memory),
            store.clone(),
        );
        assert!(matches!(
            memories.err(),
            Some(WorkbenchError::Restore(RestoreError::NamespaceMismatch { .. }))
        ));

        reopened.clear();
        assert!(store.is_empty());
    }
}

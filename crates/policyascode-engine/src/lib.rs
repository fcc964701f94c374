//! Policy as Code Engine: incremental knowledge base over streaming model output
//!
//! Documents go in, a language model extracts rules (or memories) with
//! provenance, a second pass consolidates them, and further documents are
//! validated against what has been collected.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                       KNOWLEDGE-BASE PIPELINE                            │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────┐    ┌───────────────┐    ┌──────────────┐                   │
//! │  │ Document │───►│ StreamSession │───►│  Reconciler  │── snapshots ──┐   │
//! │  └──────────┘    │  (per request)│    │ (partial JSON)│              │   │
//! │                  └───────▲───────┘    └──────────────┘               │   │
//! │                          │ deltas                                    ▼   │
//! │                  ┌───────┴───────┐                        ┌────────────┐ │
//! │                  │    Oracle     │                        │  Session   │ │
//! │                  │ (OpenAI, test │                        │ ┌────────┐ │ │
//! │                  │   scripts)    │                        │ │ Record │ │ │
//! │                  └───────────────┘                        │ │ Store  │ │ │
//! │                                                           │ ├────────┤ │ │
//! │  ┌───────────────────┐   edits    ┌──────────────────┐    │ │Learning│ │ │
//! │  │ consolidate()     │───────────►│ Consolidation    │───►│ │  Log   │ │ │
//! │  └───────────────────┘            │ Engine           │    │ ├────────┤ │ │
//! │                                   └──────────────────┘    │ │ Matrix │ │ │
//! │  ┌───────────────────┐  outcomes  ┌──────────────────┐    │ │Assembl.│ │ │
//! │  │ validate_all()    │───────────►│ one task per file│───►│ └────────┘ │ │
//! │  └───────────────────┘            └──────────────────┘    └─────┬──────┘ │
//! │                                                                 │        │
//! │                                                    SnapshotStore ▼        │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! - Ids are `<prefix>-<n>` from one monotonic counter and are never reused
//! - Removed records leave a tombstone so history can still name them
//!
//! ## Streaming
//! - Every intermediate result is a best-effort parse of the text so far
//! - Nothing is committed until a stream completes

pub mod consolidation;
pub mod document;
pub mod learning;
pub mod oracle;
pub mod partial_json;
pub mod prompts;
pub mod record;
pub mod session;
pub mod store;
pub mod stream;
pub mod validation;
pub mod workbench;

pub use consolidation::{
    ConsolidationConfig, ConsolidationEngine, ConsolidationError, ConsolidationOutcome, Edit,
};
pub use document::{Document, DocumentContent, DocumentError};
pub use learning::{describe_edit, EditView, LearningEntry};
pub use oracle::{
    ConfigError, InputPart, Oracle, OracleConfig, OracleError, OracleRequest, OutputSchema,
    Script, ScriptedOracle,
};
#[cfg(feature = "openai")]
pub use oracle::OpenAiOracle;
pub use partial_json::Reconciler;
pub use record::{Namespace, Priority, Record, RecordId, RecordKind, RecordPatch, Source};
pub use session::{EngineState, RestoreError, Session, SessionEvent, SessionEventHandler};
pub use store::{RecordStore, Resolved, StoreError};
pub use stream::{Snapshot, SnapshotStream, StreamSession};
pub use validation::{
    Bucket, Cell, MatrixRow, Tally, ValidationMatrix, ValidationMatrixAssembler,
    ValidationOutcome, ValidationResult,
};
pub use workbench::{
    ConsolidationReport, IngestReport, ValidationReport, Workbench, WorkbenchConfig,
    WorkbenchError,
};

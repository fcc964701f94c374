//! Validation matrix assembly
//!
//! Per-file validation runs complete out of order and overlap with each
//! other. The assembler keeps three views of a file and merges them into one
//! matrix (rows = live records, columns = files):
//!
//! ```text
//!   requested ──► pending ──► streaming ──► persisted
//!                  (no output)  (live partial)  (replaces the file's outcomes)
//! ```
//!
//! Column order is the append-only [`FileOrder`]: a file keeps the slot it got
//! the first time it was requested, no matter how often it is re-validated or
//! in what order runs finish.

use crate::record::{Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

// ============================================================================
// Results
// ============================================================================

/// A verdict for one (record, file) pair. Anything the model returns beyond
/// the three known verdicts is kept verbatim as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ValidationResult {
    Pass,
    Fail,
    NotApplicable,
    Other(String),
}

impl ValidationResult {
    pub fn as_str(&self) -> &str {
        match self {
            ValidationResult::Pass => "pass",
            ValidationResult::Fail => "fail",
            ValidationResult::NotApplicable => "n/a",
            ValidationResult::Other(other) => other,
        }
    }

    pub fn bucket(&self) -> Bucket {
        match self {
            ValidationResult::Pass => Bucket::Pass,
            ValidationResult::Fail => Bucket::Fail,
            ValidationResult::NotApplicable => Bucket::NotApplicable,
            ValidationResult::Other(_) => Bucket::Other,
        }
    }
}

impl From<String> for ValidationResult {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pass" => ValidationResult::Pass,
            "fail" => ValidationResult::Fail,
            "n/a" => ValidationResult::NotApplicable,
            _ => ValidationResult::Other(s),
        }
    }
}

impl From<ValidationResult> for String {
    fn from(result: ValidationResult) -> Self {
        match result {
            ValidationResult::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display classification of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Pass,
    Fail,
    NotApplicable,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub id: RecordId,
    pub file: String,
    pub result: ValidationResult,
    #[serde(default)]
    pub reason: String,
}

/// An outcome as streamed by the model; the file is supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct OutcomeDraft {
    pub id: String,
    pub result: String,
    pub reason: String,
}

impl OutcomeDraft {
    /// `None` while the id has not been written yet.
    pub fn into_outcome(self, file: &str) -> Option<ValidationOutcome> {
        if self.id.is_empty() {
            return None;
        }
        Some(ValidationOutcome {
            id: self.id,
            file: file.to_string(),
            result: ValidationResult::from(self.result),
            reason: self.reason,
        })
    }
}

pub fn outcomes_from_drafts(file: &str, drafts: Vec<OutcomeDraft>) -> Vec<ValidationOutcome> {
    drafts
        .into_iter()
        .filter_map(|d| d.into_outcome(file))
        .collect()
}

// ============================================================================
// File order
// ============================================================================

/// Append-only list of filenames in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOrder(Vec<String>);

impl FileOrder {
    pub fn from_vec(files: Vec<String>) -> Self {
        let mut order = Self::default();
        for file in files {
            order.observe(&file);
        }
        order
    }

    /// Record `file` if unseen. Returns true when it was appended.
    pub fn observe(&mut self, file: &str) -> bool {
        if self.contains(file) {
            return false;
        }
        self.0.push(file.to_string());
        true
    }

    pub fn contains(&self, file: &str) -> bool {
        self.0.iter().any(|f| f == file)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

// ============================================================================
// Matrix
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// No outcome for this (record, file) yet.
    NoResult,
    Outcome {
        result: ValidationResult,
        reason: String,
        /// Comes from a run that is still streaming.
        live: bool,
    },
}

impl Cell {
    pub fn bucket(&self) -> Option<Bucket> {
        match self {
            Cell::NoResult => None,
            Cell::Outcome { result, .. } => Some(result.bucket()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub id: RecordId,
    pub title: String,
    pub cells: Vec<Cell>,
}

/// Per-column counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub pass: usize,
    pub fail: usize,
    pub not_applicable: usize,
    pub other: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationMatrix {
    pub files: Vec<String>,
    pub rows: Vec<MatrixRow>,
    /// Files with a run in flight.
    pub in_flight: Vec<String>,
}

impl ValidationMatrix {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn tally(&self, column: usize) -> Tally {
        let mut tally = Tally::default();
        for row in &self.rows {
            match row.cells.get(column).and_then(Cell::bucket) {
                Some(Bucket::Pass) => tally.pass += 1,
                Some(Bucket::Fail) => tally.fail += 1,
                Some(Bucket::NotApplicable) => tally.not_applicable += 1,
                Some(Bucket::Other) => tally.other += 1,
                None => tally.missing += 1,
            }
        }
        tally
    }
}

// ============================================================================
// Assembler
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ValidationMatrixAssembler {
    /// Persisted outcomes, at most one per (id, file).
    outcomes: Vec<ValidationOutcome>,
    order: FileOrder,
    /// Requested, nothing streamed yet.
    pending: BTreeSet<String>,
    /// Live partial outcomes per file.
    streaming: HashMap<String, Vec<ValidationOutcome>>,
}

impl ValidationMatrixAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(outcomes: Vec<ValidationOutcome>, file_order: Vec<String>) -> Self {
        let mut order = FileOrder::from_vec(file_order);
        for outcome in &outcomes {
            order.observe(&outcome.file);
        }
        Self {
            outcomes,
            order,
            ..Default::default()
        }
    }

    pub fn outcomes(&self) -> &[ValidationOutcome] {
        &self.outcomes
    }

    pub fn file_order(&self) -> &FileOrder {
        &self.order
    }

    /// A run for `file` has started.
    pub fn request(&mut self, file: &str) {
        self.order.observe(file);
        self.streaming.remove(file);
        self.pending.insert(file.to_string());
    }

    /// Replace the live partial outcomes of a running file.
    pub fn ingest_partial(&mut self, file: &str, outcomes: Vec<ValidationOutcome>) {
        self.order.observe(file);
        self.pending.remove(file);
        self.streaming.insert(file.to_string(), outcomes);
    }

    /// Finish a run: all stored outcomes for `file` are replaced by
    /// `outcomes`. A later outcome for the same id wins.
    pub fn complete(&mut self, file: &str, outcomes: Vec<ValidationOutcome>) {
        self.order.observe(file);
        self.pending.remove(file);
        self.streaming.remove(file);

        self.outcomes.retain(|o| o.file != file);
        let mut fresh: Vec<ValidationOutcome> = Vec::with_capacity(outcomes.len());
        for mut outcome in outcomes {
            outcome.file = file.to_string();
            match fresh.iter_mut().find(|o| o.id == outcome.id) {
                Some(existing) => *existing = outcome,
                None => fresh.push(outcome),
            }
        }
        self.outcomes.extend(fresh);
    }

    /// Abandon a run. Outcomes from earlier completed runs stay.
    pub fn fail(&mut self, file: &str) {
        self.pending.remove(file);
        self.streaming.remove(file);
    }

    /// Forget a file's outcomes. Its column slot is kept for when it returns.
    pub fn remove_file(&mut self, file: &str) {
        self.fail(file);
        self.outcomes.retain(|o| o.file != file);
    }

    pub fn is_in_flight(&self, file: &str) -> bool {
        self.pending.contains(file) || self.streaming.contains_key(file)
    }

    /// Files with a run in flight, in column order.
    pub fn in_flight(&self) -> Vec<String> {
        self.order
            .as_slice()
            .iter()
            .filter(|f| self.is_in_flight(f))
            .cloned()
            .collect()
    }

    /// Files that currently have something to show (persisted, pending or
    /// streaming), in column order.
    pub fn present_files(&self) -> Vec<String> {
        self.order
            .as_slice()
            .iter()
            .filter(|f| self.is_in_flight(f) || self.outcomes.iter().any(|o| &o.file == *f))
            .cloned()
            .collect()
    }

    /// Current outcome for a pair; a live outcome shadows the persisted one.
    pub fn outcome(&self, id: &str, file: &str) -> Option<(&ValidationOutcome, bool)> {
        if let Some(live) = self
            .streaming
            .get(file)
            .and_then(|outcomes| outcomes.iter().rev().find(|o| o.id == id))
        {
            return Some((live, true));
        }
        self.outcomes
            .iter()
            .find(|o| o.id == id && o.file == file)
            .map(|o| (o, false))
    }

    pub fn matrix(&self, records: &[Record]) -> ValidationMatrix {
        let files = self.present_files();
        let rows = records
            .iter()
            .map(|record| MatrixRow {
                id: record.id.clone(),
                title: record.title.clone(),
                cells: files
                    .iter()
                    .map(|file| match self.outcome(&record.id, file) {
                        Some((outcome, live)) => Cell::Outcome {
                            result: outcome.result.clone(),
                            reason: outcome.reason.clone(),
                            live,
                        },
                        None => Cell::NoResult,
                    })
                    .collect(),
            })
            .collect();
        ValidationMatrix {
            files,
            rows,
            in_flight: self.in_flight(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Priority;

    fn outcome(id: &str, file: &str, result: &str) -> ValidationOutcome {
        ValidationOutcome {
            id: id.into(),
            file: file.into(),
            result: ValidationResult::from(result.to_string()),
            reason: format!("{id} {result}"),
        }
    }

    fn rules(ids: &[&str]) -> Vec<Record> {
        ids.iter()
            .map(|id| Record {
                id: id.to_string(),
                title: format!("Title {id}"),
                body: String::new(),
                kind: None,
                priority: Priority::Medium,
                rationale: None,
                sources: vec![],
            })
            .collect()
    }

    #[test]
    fn test_result_classification() {
        let parse = |s: &str| ValidationResult::from(s.to_string());
        assert_eq!(parse("pass").bucket(), Bucket::Pass);
        assert_eq!(parse("fail").bucket(), Bucket::Fail);
        assert_eq!(parse("n/a").bucket(), Bucket::NotApplicable);
        assert_eq!(parse("unknown").bucket(), Bucket::Other);
        assert_eq!(parse("PASS").bucket(), Bucket::Other);
        assert_eq!(String::from(parse("unknown")), "unknown");
        assert_eq!(String::from(ValidationResult::NotApplicable), "n/a");
    }

    #[test]
    fn test_outcome_serializes_result_as_string() {
        let value = serde_json::to_value(outcome("rule-0", "a.txt", "n/a")).unwrap();
        assert_eq!(value["result"], "n/a");
        let back: ValidationOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back.result, ValidationResult::NotApplicable);
    }

    #[test]
    fn test_drafts_without_id_are_skipped() {
        let drafts = vec![
            OutcomeDraft {
                id: "rule-0".into(),
                result: "pa".into(),
                reason: String::new(),
            },
            OutcomeDraft::default(),
        ];
        let outcomes = outcomes_from_drafts("a.txt", drafts);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].file, "a.txt");
        assert_eq!(outcomes[0].result.bucket(), Bucket::Other);
    }

    #[test]
    fn test_file_order_is_append_only() {
        let mut order = FileOrder::default();
        assert!(order.observe("a"));
        assert!(order.observe("b"));
        assert!(!order.observe("a"));
        assert_eq!(order.as_slice(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_complete_replaces_not_merges() {
        let mut assembler = ValidationMatrixAssembler::new();
        assembler.complete(
            "a.txt",
            vec![outcome("rule-0", "a.txt", "pass"), outcome("rule-1", "a.txt", "fail")],
        );
        assembler.complete("a.txt", vec![outcome("rule-1", "a.txt", "pass")]);

        assert_eq!(assembler.outcomes().len(), 1);
        assert!(assembler.outcome("rule-0", "a.txt").is_none());
        let (current, live) = assembler.outcome("rule-1", "a.txt").unwrap();
        assert_eq!(current.result, ValidationResult::Pass);
        assert!(!live);
    }

    #[test]
    fn test_complete_keeps_one_outcome_per_pair() {
        let mut assembler = ValidationMatrixAssembler::new();
        assembler.complete(
            "a.txt",
            vec![outcome("rule-0", "a.txt", "pass"), outcome("rule-0", "x", "fail")],
        );
        assert_eq!(assembler.outcomes().len(), 1);
        assert_eq!(assembler.outcomes()[0].result, ValidationResult::Fail);
        assert_eq!(assembler.outcomes()[0].file, "a.txt");
    }

    #[test]
    fn test_column_order_survives_out_of_order_completion() {
        let mut assembler = ValidationMatrixAssembler::new();
        assembler.request("a.txt");
        assembler.request("b.txt");
        assembler.complete("b.txt", vec![outcome("rule-0", "b.txt", "pass")]);

        // a.txt is pending: present, no result
        let matrix = assembler.matrix(&rules(&["rule-0"]));
        assert_eq!(matrix.files, vec!["a.txt", "b.txt"]);
        assert_eq!(matrix.rows[0].cells[0], Cell::NoResult);
        assert_eq!(matrix.in_flight, vec!["a.txt"]);

        assembler.complete("a.txt", vec![outcome("rule-0", "a.txt", "fail")]);
        assembler.request("a.txt");
        let matrix = assembler.matrix(&rules(&["rule-0"]));
        assert_eq!(matrix.files, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_live_outcomes_shadow_persisted() {
        let mut assembler = ValidationMatrixAssembler::new();
        assembler.complete("a.txt", vec![outcome("rule-0", "a.txt", "fail")]);
        assembler.request("a.txt");
        assembler.ingest_partial("a.txt", vec![outcome("rule-0", "a.txt", "pass")]);

        let matrix = assembler.matrix(&rules(&["rule-0", "rule-1"]));
        assert!(matches!(
            &matrix.rows[0].cells[0],
            Cell::Outcome { result: ValidationResult::Pass, live: true, .. }
        ));
        assert_eq!(matrix.rows[1].cells[0], Cell::NoResult);

        // Failing the rerun falls back to the persisted verdict
        assembler.fail("a.txt");
        let matrix = assembler.matrix(&rules(&["rule-0"]));
        assert_eq!(matrix.rows[0].cells[0].bucket(), Some(Bucket::Fail));
        assert!(matrix.in_flight.is_empty());
    }

    #[test]
    fn test_failed_first_run_disappears_but_keeps_slot() {
        let mut assembler = ValidationMatrixAssembler::new();
        assembler.request("a.txt");
        assembler.request("b.txt");
        assembler.fail("a.txt");
        assert_eq!(assembler.present_files(), vec!["b.txt"]);

        assembler.complete("a.txt", vec![]);
        // completed with no outcomes: nothing to show
        assert_eq!(assembler.present_files(), vec!["b.txt"]);
        assembler.request("a.txt");
        assert_eq!(assembler.present_files(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_remove_file_keeps_order_slot() {
        let mut assembler = ValidationMatrixAssembler::new();
        assembler.complete("a.txt", vec![outcome("rule-0", "a.txt", "pass")]);
        assembler.complete("b.txt", vec![outcome("rule-0", "b.txt", "pass")]);
        assembler.remove_file("a.txt");
        assert_eq!(assembler.present_files(), vec!["b.txt"]);
        assembler.complete("a.txt", vec![outcome("rule-0", "a.txt", "n/a")]);
        assert_eq!(assembler.present_files(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_tally() {
        let mut assembler = ValidationMatrixAssembler::new();
        assembler.complete(
            "a.txt",
            vec![
                outcome("rule-0", "a.txt", "pass"),
                outcome("rule-1", "a.txt", "unknown"),
                outcome("rule-2", "a.txt", "n/a"),
            ],
        );
        let matrix = assembler.matrix(&rules(&["rule-0", "rule-1", "rule-2", "rule-3"]));
        let tally = matrix.tally(0);
        assert_eq!(
            tally,
            Tally {
                pass: 1,
                fail: 0,
                not_applicable: 1,
                other: 1,
                missing: 1
            }
        );
    }

    #[test]
    fn test_from_parts_recovers_order() {
        let assembler = ValidationMatrixAssembler::from_parts(
            vec![outcome("rule-0", "c.txt", "pass")],
            vec!["b.txt".into()],
        );
        assert_eq!(
            assembler.file_order().as_slice(),
            &["b.txt".to_string(), "c.txt".to_string()]
        );
        assert_eq!(assembler.present_files(), vec!["c.txt"]);
    }
}

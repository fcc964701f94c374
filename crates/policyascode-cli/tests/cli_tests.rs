//! End-to-end tests of the offline commands (no oracle involved).

use policyascode_engine::record::RecordDraft;
use policyascode_engine::{
    ConsolidationConfig, ConsolidationEngine, Edit, EngineState, Namespace, Priority, Session,
    ValidationOutcome, ValidationResult,
};
use serde_json::{json, Value};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn policyascode(state: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_policyascode"))
        .arg("--state")
        .arg(state)
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run policyascode")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn draft(title: &str) -> RecordDraft {
    serde_json::from_value(json!({
        "title": title,
        "body": format!("{title} body"),
        "priority": "high",
        "sources": [{"quote": format!("{title} quote")}]
    }))
    .unwrap()
}

/// Two rules from `a.txt`, then a merge of `rule-0` with an id that never existed.
fn seeded_state(dir: &TempDir) -> std::path::PathBuf {
    let session = seeded_session();
    write_state(dir, &session)
}

fn write_state(dir: &TempDir, session: &Session) -> std::path::PathBuf {
    let path = dir.path().join("state.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&session.to_state()).unwrap()).unwrap();
    path
}

/// `seeded_state` plus one validated document.
fn validated_state(dir: &TempDir) -> std::path::PathBuf {
    let mut session = seeded_session();
    let outcome = |id: &str, result: ValidationResult, reason: &str| ValidationOutcome {
        id: id.into(),
        file: "vendor.md".into(),
        result,
        reason: reason.into(),
    };
    session.complete_validation(
        "vendor.md",
        vec![
            outcome("rule-1", ValidationResult::Fail, "keys are never rotated"),
            outcome("rule-2", ValidationResult::Pass, "TLS 1.3 everywhere"),
        ],
    );
    write_state(dir, &session)
}

fn seeded_session() -> Session {
    let mut session = Session::new(Namespace::Rule);
    session.commit_extraction("a.txt", vec![draft("Encrypt"), draft("Rotate keys")]);
    let engine = ConsolidationEngine::new(Namespace::Rule, ConsolidationConfig::default());
    session
        .commit_consolidation(
            &engine,
            vec![Edit::Merge {
                ids: vec!["rule-0".into(), "rule-9".into()],
                reason: "same control".into(),
                title: "Encrypt everything".into(),
                body: "merged".into(),
                priority: Priority::High,
                rationale: None,
            }],
        )
        .unwrap();
    session
}

fn read_state(path: &Path) -> EngineState {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[test]
fn rules_on_missing_state() {
    let dir = TempDir::new().unwrap();
    let output = policyascode(&dir.path().join("none.json"), &["rules"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No rules yet."));
}

#[test]
fn rules_json_lists_live_records() {
    let dir = TempDir::new().unwrap();
    let state = seeded_state(&dir);
    let output = policyascode(&state, &["rules", "--json"]);
    assert!(output.status.success());

    let records: Value = serde_json::from_str(&stdout(&output)).unwrap();
    let ids: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["rule-1", "rule-2"]);
}

#[test]
fn history_labels_unknown_ids() {
    let dir = TempDir::new().unwrap();
    let state = seeded_state(&dir);
    let output = policyascode(&state, &["history"]);
    assert!(output.status.success());

    let text = stdout(&output);
    assert!(text.contains("a.txt"));
    // Retired ids keep their title, ids that never existed do not
    assert!(text.contains("rule-0 Encrypt"));
    assert!(text.contains("Unknown (rule-9)"));
    assert!(text.contains("Encrypt everything"));
}

#[test]
fn edit_then_export() {
    let dir = TempDir::new().unwrap();
    let state = seeded_state(&dir);

    let output = policyascode(&state, &["edit", "rule-1", "--priority", "low", "--title", "Rotate"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let out = dir.path().join("rules.json");
    let output = policyascode(&state, &["export", "--out", out.to_str().unwrap()]);
    assert!(output.status.success());

    let exported: Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(exported["rules"][0]["id"], "rule-1");
    assert_eq!(exported["rules"][0]["title"], "Rotate");
    assert_eq!(exported["rules"][0]["priority"], "low");
}

#[test]
fn edit_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let state = seeded_state(&dir);

    let output = policyascode(&state, &["edit", "rule-1", "--priority", "urgent"]);
    assert!(!output.status.success());

    let output = policyascode(&state, &["edit", "rule-0", "--title", "gone"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("rule-0"));
}

#[test]
fn delete_keeps_counter_and_history() {
    let dir = TempDir::new().unwrap();
    let state = seeded_state(&dir);
    let before = read_state(&state);

    let output = policyascode(&state, &["delete", "rule-1"]);
    assert!(output.status.success());

    let after = read_state(&state);
    assert_eq!(after.records.len(), 1);
    assert_eq!(after.id_counter, before.id_counter);
    assert_eq!(after.learnings, before.learnings);
}

#[test]
fn no_save_leaves_state_untouched() {
    let dir = TempDir::new().unwrap();
    let state = seeded_state(&dir);
    let before = std::fs::read(&state).unwrap();

    let output = policyascode(&state, &["--no-save", "delete", "rule-1"]);
    assert!(output.status.success());
    assert_eq!(std::fs::read(&state).unwrap(), before);
}

#[test]
fn clear_removes_state() {
    let dir = TempDir::new().unwrap();
    let state = seeded_state(&dir);
    let output = policyascode(&state, &["clear"]);
    assert!(output.status.success());
    assert!(!state.exists());
}

#[test]
fn matrix_reasons_are_shown() {
    let dir = TempDir::new().unwrap();
    let state = validated_state(&dir);

    let output = policyascode(&state, &["matrix"]);
    assert!(output.status.success());
    assert!(!stdout(&output).contains("keys are never rotated"));

    let output = policyascode(&state, &["matrix", "--reasons"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Result: fail"));
    assert!(text.contains("Reason: keys are never rotated"));
    assert!(text.contains("Reason: TLS 1.3 everywhere"));

    let output = policyascode(&state, &["matrix", "--file", "vendor.md"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("keys are never rotated"));

    let output = policyascode(&state, &["matrix", "--file", "other.md"]);
    assert!(!output.status.success());
}

#[test]
fn memory_state_keeps_its_namespace() {
    let dir = TempDir::new().unwrap();
    let mut session = Session::new(Namespace::Memory);
    session.commit_extraction("notes.md", vec![draft("Prefers tabs")]);
    let state = write_state(&dir, &session);

    let output = policyascode(&state, &["rules"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("mem-0"));
    assert!(text.contains("1 memories"));

    let output = policyascode(&state, &["--namespace", "rule", "rules"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("memories"));

    // Setting a type is fine on memories
    let output = policyascode(&state, &["edit", "mem-0", "--kind", "code"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(read_state(&state).namespace, Some(Namespace::Memory));
}

#[test]
fn edit_rejects_type_on_rules() {
    let dir = TempDir::new().unwrap();
    let state = seeded_state(&dir);
    let before = std::fs::read(&state).unwrap();

    let output = policyascode(&state, &["edit", "rule-1", "--kind", "code"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Only memories carry a type"));
    assert_eq!(std::fs::read(&state).unwrap(), before);
}

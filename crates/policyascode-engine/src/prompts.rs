//! Default instructions and output schemas
//!
//! Schemas are written for strict structured output: every property is
//! required and no extra properties are allowed.

use crate::oracle::OutputSchema;
use crate::record::Namespace;
use serde_json::{json, Value};

pub const RULE_EXTRACTION: &str = "Extract atomic, testable rules from ONE policy document.
Keep each rule minimal.
Write for an LLM to apply it unambiguously.
Always include concise rationale and quotes.";

pub const MEMORY_EXTRACTION: &str = "Extract durable, reusable memories from ONE document.
Each memory is either a short text insight or a code snippet (type \"code\").
Keep each memory self-contained and include concise rationale and quotes.";

pub const CONSOLIDATION: &str =
    "Suggest deletes and merges to remove duplicates and generalize rules where appropriate.";

pub const VALIDATION: &str = "Validate the provided document against each rule. For each rule, determine if the document passes, fails, or if it's unknown/unclear.

Return a validation result for each rule with:
- id: the rule identifier
- result: \"pass\" if compliant, \"fail\" if violates rule, \"unknown\" if unclear, \"n/a\" if not applicable
- reason: brief explanation citing specific parts of the document";

pub fn default_extraction(namespace: Namespace) -> &'static str {
    match namespace {
        Namespace::Rule => RULE_EXTRACTION,
        Namespace::Memory => MEMORY_EXTRACTION,
    }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn priority() -> Value {
    json!({"type": "string", "enum": ["low", "medium", "high"]})
}

pub fn extraction_schema(namespace: Namespace) -> OutputSchema {
    let sources = json!({
        "type": "array",
        "items": object(json!({"quote": {"type": "string"}}), &["quote"]),
    });
    let item = match namespace {
        Namespace::Rule => object(
            json!({
                "title": {"type": "string"},
                "body": {"type": "string"},
                "priority": priority(),
                "rationale": {"type": "string"},
                "sources": sources,
            }),
            &["title", "body", "priority", "rationale", "sources"],
        ),
        Namespace::Memory => object(
            json!({
                "title": {"type": "string"},
                "body": {"type": "string"},
                "type": {"type": "string", "enum": ["text", "code"]},
                "priority": priority(),
                "rationale": {"type": "string"},
                "sources": sources,
            }),
            &["title", "body", "type", "priority", "rationale", "sources"],
        ),
    };
    let key = namespace.collection_key();
    OutputSchema {
        name: key.to_string(),
        schema: object(
            json!({ key: {"type": "array", "items": item} }),
            &[key],
        ),
    }
}

pub fn edits_schema() -> OutputSchema {
    let ids = json!({"type": "array", "items": {"type": "string"}});
    let delete = object(
        json!({
            "edit": {"type": "string", "const": "delete"},
            "ids": ids,
            "reason": {"type": "string"},
        }),
        &["edit", "ids", "reason"],
    );
    let merge = object(
        json!({
            "edit": {"type": "string", "const": "merge"},
            "ids": ids,
            "title": {"type": "string"},
            "body": {"type": "string"},
            "priority": priority(),
            "rationale": {"type": "string"},
            "reason": {"type": "string"},
        }),
        &["edit", "ids", "title", "body", "priority", "rationale", "reason"],
    );
    OutputSchema {
        name: "edits".to_string(),
        schema: object(
            json!({"edits": {"type": "array", "items": {"anyOf": [delete, merge]}}}),
            &["edits"],
        ),
    }
}

pub fn validations_schema() -> OutputSchema {
    let item = object(
        json!({
            "id": {"type": "string"},
            "result": {"type": "string", "enum": ["pass", "fail", "n/a", "unknown"]},
            "reason": {"type": "string"},
        }),
        &["id", "result", "reason"],
    );
    OutputSchema {
        name: "validations".to_string(),
        schema: object(
            json!({"validations": {"type": "array", "items": item}}),
            &["validations"],
        ),
    }
}

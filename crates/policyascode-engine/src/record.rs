//! Records: rules and memories with provenance

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record identifier, `<prefix>-<n>`.
pub type RecordId = String;

/// Which kind of knowledge a session collects. Decides the id prefix and the
/// collection key the model fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    #[default]
    Rule,
    Memory,
}

impl Namespace {
    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Rule => "rule",
            Namespace::Memory => "mem",
        }
    }

    /// Top-level key of the extraction payload (`{"rules": [...]}`).
    pub fn collection_key(self) -> &'static str {
        match self {
            Namespace::Rule => "rules",
            Namespace::Memory => "memories",
        }
    }

    pub fn format_id(self, n: u64) -> RecordId {
        format!("{}-{}", self.prefix(), n)
    }
}

impl std::str::FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule" | "rules" => Ok(Namespace::Rule),
            "mem" | "memory" | "memories" => Ok(Namespace::Memory),
            other => Err(format!("unknown namespace '{other}' (expected rule or memory)")),
        }
    }
}

/// Numeric suffix of an id, if it has the `<prefix>-<n>` shape.
pub fn id_number(id: &str) -> Option<u64> {
    id.rsplit_once('-').and_then(|(_, n)| n.parse().ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body format of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    #[default]
    Text,
    Code,
}

impl RecordKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Some(RecordKind::Text),
            "code" => Some(RecordKind::Code),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Text => "text",
            RecordKind::Code => "code",
        }
    }
}

/// Provenance: a verbatim quote and the file it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub quote: String,
    #[serde(default)]
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub title: String,
    pub body: String,
    /// Only set for memories.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<RecordKind>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl Record {
    /// Distinct source files, in first-seen order.
    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for source in &self.sources {
            if !source.file.is_empty() && !files.contains(&source.file.as_str()) {
                files.push(&source.file);
            }
        }
        files
    }
}

// ============================================================================
// Streamed drafts
// ============================================================================

/// A record as the model is still writing it. Every field is optional so a
/// half-finished item still decodes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecordDraft {
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub priority: Option<String>,
    pub rationale: Option<String>,
    pub sources: Vec<SourceDraft>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceDraft {
    pub quote: String,
}

impl RecordDraft {
    /// Materialize with an assigned id; every source is attributed to `file`.
    pub fn into_record(self, id: RecordId, file: &str, namespace: Namespace) -> Record {
        let kind = match namespace {
            Namespace::Rule => None,
            Namespace::Memory => Some(
                self.kind
                    .as_deref()
                    .and_then(RecordKind::parse)
                    .unwrap_or_default(),
            ),
        };
        Record {
            id,
            title: self.title,
            body: self.body,
            kind,
            priority: self
                .priority
                .as_deref()
                .and_then(Priority::parse)
                .unwrap_or_default(),
            rationale: self.rationale.filter(|r| !r.is_empty()),
            sources: self
                .sources
                .into_iter()
                .map(|s| Source {
                    quote: s.quote,
                    file: file.to_string(),
                })
                .collect(),
        }
    }
}

/// In-place edit of a live record. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub rationale: Option<String>,
    pub priority: Option<Priority>,
    pub kind: Option<RecordKind>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        *self == RecordPatch::default()
    }

    pub fn apply_to(self, record: &mut Record) {
        if let Some(title) = self.title {
            record.title = title;
        }
        if let Some(body) = self.body {
            record.body = body;
        }
        if let Some(rationale) = self.rationale {
            record.rationale = if rationale.is_empty() {
                None
            } else {
                Some(rationale)
            };
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(kind) = self.kind {
            record.kind = Some(kind);
        }
    }
}

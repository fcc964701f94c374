//! Model oracle interface
//!
//! The engine treats the language model as an oracle: given instructions,
//! input parts and a JSON schema, it returns a stream of text deltas that,
//! concatenated, form a JSON document matching the schema. Deltas may stop
//! anywhere, and the document may be malformed.

mod config;
#[cfg(feature = "openai")]
mod openai;
mod scripted;
#[cfg(any(feature = "openai", test))]
pub(crate) mod responses;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use config::{ConfigError, OracleConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
#[cfg(feature = "openai")]
pub use openai::OpenAiOracle;
pub use scripted::{Script, ScriptedOracle};

// ============================================================================
// Requests
// ============================================================================

/// One content part of the user turn, in Responses API shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPart {
    InputText { text: String },
    /// A file embedded verbatim as a `data:` URL.
    InputFile { filename: String, file_data: String },
}

impl InputPart {
    /// Text the part carries, used for routing scripted responses.
    pub fn text(&self) -> &str {
        match self {
            InputPart::InputText { text } => text,
            InputPart::InputFile { filename, .. } => filename,
        }
    }
}

/// Named JSON schema the output must conform to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    pub instructions: String,
    pub input: Vec<InputPart>,
    pub schema: OutputSchema,
}

// ============================================================================
// Oracle
// ============================================================================

/// Terminal failure of one oracle invocation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Network error: {0}")]
    Network(String),
    /// The provider reported an error inside the stream.
    #[error("Stream error: {0}")]
    Stream(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Source of text deltas for one invocation. Dropping it releases the
/// underlying transport.
#[async_trait]
pub trait DeltaSource: Send {
    /// `None` once the stream has finished normally.
    async fn next_delta(&mut self) -> Option<Result<String, OracleError>>;
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn stream(&self, request: OracleRequest) -> Result<Box<dyn DeltaSource>, OracleError>;

    /// Short identifier for logs.
    fn name(&self) -> &str;
}

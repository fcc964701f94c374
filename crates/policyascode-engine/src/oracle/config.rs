//! Oracle configuration loaded from environment or config file

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
        }
    }
}

impl OracleConfig {
    /// Load from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().overlay_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields with `OPENAI_API_KEY`, `OPENAI_BASE_URL` and
    /// `OPENAI_MODEL` when they are set.
    pub fn overlay_env(mut self) -> Self {
        if let Some(key) = non_empty_env("OPENAI_API_KEY") {
            self.api_key = key;
        }
        if let Some(url) = non_empty_env("OPENAI_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = non_empty_env("OPENAI_MODEL") {
            self.model = model;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::NoApiKey);
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "base URL must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url.trim_end_matches('/'))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No API key configured. Set OPENAI_API_KEY or run `policyascode config --api-key`")]
    NoApiKey,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

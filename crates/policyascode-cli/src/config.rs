//! CLI configuration: `~/.policyascode.json` plus command-line overrides
//!
//! Precedence, highest first: flags, `OPENAI_*` environment variables, the
//! config file, built-in defaults.

use anyhow::{Context, Result};
use clap::Args;
use policyascode_engine::OracleConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = ".policyascode.json";

/// Contents of the config file. Absent fields fall through to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ConfigFile {
    pub fn path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("could not determine the home directory")?;
        Ok(home.join(CONFIG_FILE_NAME))
    }

    /// Missing file means empty config.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("invalid config in {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::path()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Set every field given in `update`, keep the rest.
    pub fn merge(&mut self, update: ConfigFile) {
        if update.api_key.is_some() {
            self.api_key = update.api_key;
        }
        if update.base_url.is_some() {
            self.base_url = update.base_url;
        }
        if update.model.is_some() {
            self.model = update.model;
        }
    }

    fn apply(&self, mut config: OracleConfig) -> OracleConfig {
        if let Some(key) = &self.api_key {
            config.api_key = key.clone();
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        config
    }
}

/// Per-invocation oracle overrides.
#[derive(Args, Debug, Clone, Default)]
pub struct OracleArgs {
    /// Model name (overrides OPENAI_MODEL and the config file)
    #[arg(long)]
    pub model: Option<String>,

    /// API base URL, e.g. for an OpenAI-compatible proxy
    #[arg(long)]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl OracleArgs {
    fn apply(&self, mut config: OracleConfig) -> OracleConfig {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        config
    }
}

pub fn resolve(file: &ConfigFile, args: &OracleArgs) -> OracleConfig {
    let config = file.apply(OracleConfig::default()).overlay_env();
    args.apply(config)
}

/// Show a key without revealing it.
pub fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

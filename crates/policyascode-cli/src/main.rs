//! Policy as Code CLI
//!
//! Command-line interface for:
//! - Extracting rules (or memories) from policy documents with an LLM
//! - Consolidating the collected records (merge/delete suggestions)
//! - Validating documents against the collected rules
//! - Inspecting and editing the persisted knowledge base

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use policyascode_engine::{
    Document, EngineState, Namespace, Oracle, Priority, RecordKind, RecordPatch, Session,
    Workbench, WorkbenchConfig,
};
use policyascode_storage::{
    load_json, load_or_default, open_store, save_json, JsonFileStore, MemoryStore, SnapshotStore,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod render;

use config::{ConfigFile, OracleArgs};

#[derive(Parser)]
#[command(name = "policyascode")]
#[command(
    author,
    version,
    about = "Policy as Code: extract, consolidate and validate rules with an LLM"
)]
struct Cli {
    /// Snapshot file holding the knowledge base
    #[arg(long, global = true, default_value = "policyascode-state.json")]
    state: PathBuf,

    /// Record namespace: rule or memory [default: the snapshot's, else rule]
    #[arg(long, global = true)]
    namespace: Option<Namespace>,

    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not write changes back to the snapshot file
    #[arg(long, global = true)]
    no_save: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save API settings to ~/.policyascode.json
    Config {
        /// OpenAI API key
        #[arg(long)]
        api_key: Option<String>,
        /// API base URL
        #[arg(long)]
        base_url: Option<String>,
        /// Default model
        #[arg(long)]
        model: Option<String>,
    },

    /// Extract records from documents (text or PDF)
    Extract {
        /// Documents to read
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Replace the default extraction instructions with this file's contents
        #[arg(long)]
        instructions: Option<PathBuf>,
        #[command(flatten)]
        oracle: OracleArgs,
    },

    /// Ask the model to merge and delete overlapping records
    Consolidate {
        /// Replace the default consolidation instructions with this file's contents
        #[arg(long)]
        instructions: Option<PathBuf>,
        /// Reject the batch if two edits touch the same record
        #[arg(long)]
        strict: bool,
        #[command(flatten)]
        oracle: OracleArgs,
    },

    /// Validate documents against the collected rules
    Validate {
        /// Documents to validate (run concurrently)
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Replace the default validation instructions with this file's contents
        #[arg(long)]
        instructions: Option<PathBuf>,
        #[command(flatten)]
        oracle: OracleArgs,
    },

    /// List live records
    Rules {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the learning log (ingests and consolidations)
    History,

    /// Show the validation matrix
    Matrix {
        /// Also print the result and reason of every outcome
        #[arg(long)]
        reasons: bool,
        /// Print results and reasons for this document only
        #[arg(long, value_name = "FILE")]
        file: Option<String>,
    },

    /// Edit a record in place
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
        /// Empty string clears it
        #[arg(long)]
        rationale: Option<String>,
        /// low, medium or high
        #[arg(long)]
        priority: Option<String>,
        /// text or code (memories only)
        #[arg(long)]
        kind: Option<String>,
    },

    /// Delete a record
    Delete { id: String },

    /// Write live records as `{"rules": [...]}` JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Forget everything: records, history, validations
    Clear,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = Globals::new(cli.state, cli.namespace, cli.no_save);

    match cli.command {
        Commands::Config {
            api_key,
            base_url,
            model,
        } => cmd_config(ConfigFile {
            api_key,
            base_url,
            model,
        }),
        Commands::Extract {
            files,
            instructions,
            oracle,
        } => cmd_extract(&ctx, &files, instructions.as_deref(), &oracle).await,
        Commands::Consolidate {
            instructions,
            strict,
            oracle,
        } => cmd_consolidate(&ctx, instructions.as_deref(), strict, &oracle).await,
        Commands::Validate {
            files,
            instructions,
            oracle,
        } => cmd_validate(&ctx, &files, instructions.as_deref(), &oracle).await,
        Commands::Rules { json } => cmd_rules(&ctx, json),
        Commands::History => cmd_history(&ctx),
        Commands::Matrix { reasons, file } => cmd_matrix(&ctx, reasons, file.as_deref()),
        Commands::Edit {
            id,
            title,
            body,
            rationale,
            priority,
            kind,
        } => {
            let patch = RecordPatch {
                title,
                body,
                rationale,
                priority: priority.as_deref().map(parse_priority).transpose()?,
                kind: kind.as_deref().map(parse_kind).transpose()?,
            };
            cmd_edit(&ctx, &id, patch)
        }
        Commands::Delete { id } => cmd_delete(&ctx, &id),
        Commands::Export { out } => cmd_export(&ctx, out.as_deref()),
        Commands::Clear => cmd_clear(&ctx),
    }
}

// ============================================================================
// Shared plumbing
// ============================================================================

/// Global options every command sees.
struct Globals {
    state: PathBuf,
    namespace: Namespace,
    no_save: bool,
}

/// The part of a snapshot needed before opening it.
#[derive(Deserialize)]
struct SnapshotHeader {
    #[serde(default)]
    namespace: Option<Namespace>,
}

impl Globals {
    /// Without `--namespace`, reopen the snapshot in the namespace it was
    /// written with.
    fn new(state: PathBuf, namespace: Option<Namespace>, no_save: bool) -> Self {
        let namespace = namespace.unwrap_or_else(|| {
            load_json::<SnapshotHeader>(&open_store(&state))
                .ok()
                .flatten()
                .and_then(|header| header.namespace)
                .unwrap_or_default()
        });
        Self {
            state,
            namespace,
            no_save,
        }
    }

    fn noun(&self) -> &'static str {
        self.namespace.collection_key()
    }

    fn store(&self) -> JsonFileStore {
        open_store(&self.state)
    }

    /// Offline access to the persisted session.
    fn load_session(&self) -> Result<Session> {
        let state: EngineState = load_or_default(&self.store());
        Session::restore(self.namespace, state)
            .with_context(|| format!("cannot open {}", self.state.display()))
    }

    fn save_session(&self, session: &Session) -> Result<()> {
        if self.no_save {
            return Ok(());
        }
        save_json(&self.store(), &session.to_state())
            .with_context(|| format!("failed to save {}", self.state.display()))
    }

    /// Workbench over the snapshot file. With `--no-save` it works on an
    /// in-memory copy instead.
    fn workbench(&self, config: WorkbenchConfig, args: &OracleArgs) -> Result<Workbench> {
        let oracle = build_oracle(args)?;
        let store: Arc<dyn SnapshotStore> = if self.no_save {
            match self.store().load() {
                Ok(Some(blob)) => Arc::new(MemoryStore::with_blob(blob)),
                Ok(None) => Arc::new(MemoryStore::new()),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read snapshot; starting empty");
                    Arc::new(MemoryStore::new())
                }
            }
        } else {
            Arc::new(self.store())
        };
        let workbench = Workbench::with_store(oracle, config, store)
            .with_context(|| format!("cannot open {}", self.state.display()))?;
        workbench.on_event(render::progress_handler(self.noun()));
        Ok(workbench)
    }
}

#[cfg(feature = "llm-openai")]
fn build_oracle(args: &OracleArgs) -> Result<Arc<dyn Oracle>> {
    let file = ConfigFile::load()?;
    let config = config::resolve(&file, args);
    config.validate()?;
    tracing::debug!(model = %config.model, base_url = %config.base_url, "using OpenAI oracle");
    Ok(Arc::new(policyascode_engine::OpenAiOracle::new(config)?))
}

#[cfg(not(feature = "llm-openai"))]
fn build_oracle(_args: &OracleArgs) -> Result<Arc<dyn Oracle>> {
    bail!("built without an LLM backend; rebuild with the `llm-openai` feature")
}

fn read_instructions(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read instructions from {}", path.display()))?;
    if text.trim().is_empty() {
        bail!("instructions file {} is empty", path.display());
    }
    Ok(text)
}

/// Read every path; unreadable ones are reported and skipped.
fn read_documents(files: &[PathBuf]) -> (Vec<Document>, usize) {
    let mut documents = Vec::new();
    let mut failed = 0;
    for path in files {
        match Document::from_path(path) {
            Ok(document) => documents.push(document),
            Err(err) => {
                eprintln!("{} {}", "Error:".red().bold(), err);
                failed += 1;
            }
        }
    }
    (documents, failed)
}

fn parse_priority(s: &str) -> Result<Priority> {
    Priority::parse(s).ok_or_else(|| anyhow!("invalid priority '{s}' (expected low, medium or high)"))
}

fn parse_kind(s: &str) -> Result<RecordKind> {
    RecordKind::parse(s).ok_or_else(|| anyhow!("invalid type '{s}' (expected text or code)"))
}

fn finish(failed: usize, total: usize) -> Result<()> {
    if failed > 0 {
        bail!("{failed} of {total} files failed");
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_config(update: ConfigFile) -> Result<()> {
    let mut file = ConfigFile::load()?;
    let changed = update != ConfigFile::default();
    file.merge(update);

    if changed {
        let path = file.save()?;
        println!("{} {}", "Saved".green().bold(), path.display());
    }

    let key = file
        .api_key
        .as_deref()
        .map(config::mask)
        .unwrap_or_else(|| "(not set)".to_string());
    println!("  API key:  {}", key);
    println!(
        "  Base URL: {}",
        file.base_url.as_deref().unwrap_or(policyascode_engine::oracle::DEFAULT_BASE_URL)
    );
    println!(
        "  Model:    {}",
        file.model.as_deref().unwrap_or(policyascode_engine::oracle::DEFAULT_MODEL)
    );
    Ok(())
}

async fn cmd_extract(
    ctx: &Globals,
    files: &[PathBuf],
    instructions: Option<&Path>,
    args: &OracleArgs,
) -> Result<()> {
    let mut config = WorkbenchConfig::for_namespace(ctx.namespace);
    if let Some(path) = instructions {
        config.extraction_instructions = read_instructions(path)?;
    }
    let workbench = ctx.workbench(config, args)?;
    let (documents, mut failed) = read_documents(files);

    for document in &documents {
        println!("{} {}", "Extracting".green().bold(), document.name);
        let result = workbench.ingest(document).await;
        render::clear_progress();
        match result {
            Ok(report) => {
                for record in &report.records {
                    println!("  {} {} {}", "+".green(), record.id.cyan(), record.title);
                }
                println!("  {} {} {}", "→".yellow(), report.records.len(), ctx.noun());
            }
            Err(err) => {
                eprintln!("  {} {}", "Error:".red().bold(), err);
                failed += 1;
            }
        }
    }
    finish(failed, files.len())
}

async fn cmd_consolidate(
    ctx: &Globals,
    instructions: Option<&Path>,
    strict: bool,
    args: &OracleArgs,
) -> Result<()> {
    let mut config = WorkbenchConfig::for_namespace(ctx.namespace);
    if let Some(path) = instructions {
        config.consolidation_instructions = read_instructions(path)?;
    }
    config.consolidation.reject_overlapping = strict;
    let workbench = ctx.workbench(config, args)?;

    println!(
        "{} {} {}",
        "Consolidating".green().bold(),
        workbench.records().len(),
        ctx.noun()
    );
    let result = workbench.consolidate().await;
    render::clear_progress();
    let report = result?;

    if report.edits.is_empty() {
        println!("  No edits suggested.");
        return Ok(());
    }
    for edit in &report.edits {
        println!("  {} {} ({})", edit.kind().yellow(), edit.ids().join(", "), edit.reason());
    }
    let outcome = &report.outcome;
    for record in &outcome.created {
        println!("  {} {} {}", "+".green(), record.id.cyan(), record.title);
    }
    println!(
        "  {} {} removed, {} created",
        "→".yellow(),
        outcome.removed.len(),
        outcome.created.len()
    );
    if !outcome.unknown_ids.is_empty() {
        println!(
            "  {} unknown ids skipped: {}",
            "!".yellow().bold(),
            outcome.unknown_ids.join(", ")
        );
    }
    if !outcome.overlapping_ids.is_empty() {
        println!(
            "  {} ids touched by several edits: {}",
            "!".yellow().bold(),
            outcome.overlapping_ids.join(", ")
        );
    }
    Ok(())
}

async fn cmd_validate(
    ctx: &Globals,
    files: &[PathBuf],
    instructions: Option<&Path>,
    args: &OracleArgs,
) -> Result<()> {
    let mut config = WorkbenchConfig::for_namespace(ctx.namespace);
    if let Some(path) = instructions {
        config.validation_instructions = read_instructions(path)?;
    }
    let workbench = ctx.workbench(config, args)?;
    let (documents, mut failed) = read_documents(files);

    println!(
        "{} {} documents against {} {}",
        "Validating".green().bold(),
        documents.len(),
        workbench.records().len(),
        ctx.noun()
    );
    let results = workbench.validate_all(documents).await;
    render::clear_progress();
    let mut validated = Vec::new();
    for result in results {
        match result {
            Ok(report) => validated.push(report.file),
            Err(err) => {
                eprintln!("  {} {}", "Error:".red().bold(), err);
                failed += 1;
            }
        }
    }

    let matrix = workbench.matrix();
    println!();
    render::print_matrix(&matrix);
    render::print_reasons(&matrix, &validated);
    finish(failed, files.len())
}

fn cmd_rules(ctx: &Globals, json: bool) -> Result<()> {
    let session = ctx.load_session()?;
    if json {
        println!("{}", serde_json::to_string_pretty(session.records())?);
    } else {
        render::print_records(session.records(), ctx.noun());
    }
    Ok(())
}

fn cmd_history(ctx: &Globals) -> Result<()> {
    let session = ctx.load_session()?;
    render::print_history(session.learnings(), session.store());
    Ok(())
}

fn cmd_matrix(ctx: &Globals, reasons: bool, file: Option<&str>) -> Result<()> {
    let session = ctx.load_session()?;
    let matrix = session.matrix();
    match file {
        Some(file) => {
            if !matrix.files.iter().any(|f| f == file) {
                bail!("no validation results for {file}");
            }
            render::print_reasons(&matrix, &[file.to_string()]);
        }
        None => {
            render::print_matrix(&matrix);
            if reasons {
                render::print_reasons(&matrix, &matrix.files);
            }
        }
    }
    Ok(())
}

fn cmd_edit(ctx: &Globals, id: &str, patch: RecordPatch) -> Result<()> {
    if patch.is_empty() {
        bail!("nothing to change; pass at least one of --title, --body, --rationale, --priority, --kind");
    }
    let mut session = ctx.load_session()?;
    let record = session.update_record(id, patch)?;
    ctx.save_session(&session)?;
    println!("{} {}", "Updated".green().bold(), record.id);
    render::print_record(&record);
    Ok(())
}

fn cmd_delete(ctx: &Globals, id: &str) -> Result<()> {
    let mut session = ctx.load_session()?;
    let record = session.delete_record(id)?;
    ctx.save_session(&session)?;
    println!("{} {} {}", "Deleted".red().bold(), record.id, record.title);
    Ok(())
}

fn cmd_export(ctx: &Globals, out: Option<&Path>) -> Result<()> {
    let session = ctx.load_session()?;
    let mut payload = serde_json::Map::new();
    payload.insert(
        ctx.noun().to_string(),
        serde_json::to_value(session.records())?,
    );
    let json = serde_json::to_string_pretty(&payload)?;

    match out {
        Some(path) => {
            fs::write(path, &json).with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{} {} {} to {}",
                "Exported".green().bold(),
                session.records().len(),
                ctx.noun(),
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn cmd_clear(ctx: &Globals) -> Result<()> {
    if ctx.no_save {
        println!("Nothing to do with --no-save.");
        return Ok(());
    }
    ctx.store()
        .clear()
        .with_context(|| format!("failed to clear {}", ctx.state.display()))?;
    println!("{} {}", "Cleared".green().bold(), ctx.state.display());
    Ok(())
}

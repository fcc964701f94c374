//! Terminal rendering for records, history and the validation matrix

use colored::Colorize;
use policyascode_engine::validation::Bucket;
use policyascode_engine::{
    describe_edit, Cell, LearningEntry, Priority, Record, RecordStore, SessionEvent,
    SessionEventHandler, ValidationMatrix,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

const TITLE_WIDTH: usize = 40;
const COLUMN_WIDTH: usize = 14;

pub fn truncate(text: &str, width: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return text.to_string();
    }
    let kept: String = chars[..width.saturating_sub(1)].iter().collect();
    format!("{kept}…")
}

fn pad(text: &str, width: usize) -> String {
    format!("{:<width$}", truncate(text, width), width = width)
}

fn priority_label(priority: Priority) -> colored::ColoredString {
    match priority {
        Priority::High => priority.as_str().red().bold(),
        Priority::Medium => priority.as_str().yellow(),
        Priority::Low => priority.as_str().dimmed(),
    }
}

// ============================================================================
// Records
// ============================================================================

pub fn print_record(record: &Record) {
    println!(
        "{} [{}] {}",
        record.id.cyan().bold(),
        priority_label(record.priority),
        record.title.bold()
    );
    if let Some(kind) = record.kind {
        println!("    {} {}", "type:".dimmed(), kind.as_str());
    }
    for line in record.body.lines() {
        println!("    {line}");
    }
    if let Some(rationale) = &record.rationale {
        println!("    {} {}", "why:".dimmed(), rationale.dimmed());
    }
    for source in &record.sources {
        println!(
            "    {} \"{}\" ({})",
            "↳".dimmed(),
            truncate(&source.quote, 80).italic(),
            source.file
        );
    }
}

pub fn print_records(records: &[Record], noun: &str) {
    if records.is_empty() {
        println!("{}", format!("No {noun} yet.").dimmed());
        return;
    }
    for record in records {
        print_record(record);
        println!();
    }
    println!("{} {}", records.len(), noun);
}

// ============================================================================
// History
// ============================================================================

pub fn print_history(entries: &[LearningEntry], store: &RecordStore) {
    if entries.is_empty() {
        println!("{}", "No history yet.".dimmed());
        return;
    }
    for entry in entries {
        let when = entry.recorded_at().format("%Y-%m-%d %H:%M:%S");
        match entry {
            LearningEntry::Ingest { file, records, .. } => {
                println!(
                    "{} {} {} ({} extracted)",
                    when.to_string().dimmed(),
                    "INGEST".green().bold(),
                    file,
                    records.len()
                );
                for record in records {
                    println!("    + {} {}", record.id.cyan(), record.title);
                }
            }
            LearningEntry::Consolidation { edits, .. } => {
                println!(
                    "{} {} ({} edits)",
                    when.to_string().dimmed(),
                    "CONSOLIDATE".magenta().bold(),
                    edits.len()
                );
                for edit in edits {
                    let view = describe_edit(edit, store);
                    let refs: Vec<String> = view
                        .references
                        .iter()
                        .map(|(id, label)| format!("{} {}", id.cyan(), label))
                        .collect();
                    match &view.merged_title {
                        Some(title) => println!(
                            "    {} {} → {}",
                            view.kind.yellow(),
                            refs.join(", "),
                            title.bold()
                        ),
                        None => println!("    {} {}", view.kind.red(), refs.join(", ")),
                    }
                    if !view.reason.is_empty() {
                        println!("      {}", view.reason.dimmed());
                    }
                }
            }
        }
    }
}

// ============================================================================
// Validation matrix
// ============================================================================

pub fn cell_symbol(cell: &Cell) -> &'static str {
    match cell.bucket() {
        None => "—",
        Some(Bucket::Pass) => "✅",
        Some(Bucket::Fail) => "❌",
        Some(Bucket::NotApplicable) => "⚪",
        Some(Bucket::Other) => "❓",
    }
}

pub fn print_matrix(matrix: &ValidationMatrix) {
    if matrix.is_empty() {
        println!("{}", "No validations yet.".dimmed());
        return;
    }

    let mut header = format!("{} {}", pad("ID", 10), pad("Title", TITLE_WIDTH));
    for file in &matrix.files {
        header.push(' ');
        header.push_str(&pad(file, COLUMN_WIDTH));
    }
    println!("{}", header.bold());

    for row in &matrix.rows {
        let mut line = format!("{} {}", pad(&row.id, 10).cyan(), pad(&row.title, TITLE_WIDTH));
        for cell in &row.cells {
            // Symbols render two columns wide
            line.push(' ');
            line.push_str(&pad(cell_symbol(cell), COLUMN_WIDTH - 1));
        }
        println!("{line}");
    }

    println!();
    for (column, file) in matrix.files.iter().enumerate() {
        let tally = matrix.tally(column);
        let running = if matrix.in_flight.contains(file) {
            " (running)".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "{}{}: {} pass, {} fail, {} n/a, {} other, {} no result",
            file.bold(),
            running,
            tally.pass.to_string().green(),
            tally.fail.to_string().red(),
            tally.not_applicable,
            tally.other.to_string().yellow(),
            tally.missing.to_string().dimmed()
        );
    }
}

/// Result and reason of every outcome in the given columns, file by file.
pub fn print_reasons(matrix: &ValidationMatrix, files: &[String]) {
    for file in files {
        let Some(column) = matrix.files.iter().position(|f| f == file) else {
            continue;
        };
        println!();
        println!("{}", file.bold().underline());
        for row in &matrix.rows {
            let Some(Cell::Outcome { result, reason, .. }) = row.cells.get(column) else {
                continue;
            };
            let cell = &row.cells[column];
            println!("  {} {} {}", cell_symbol(cell), row.id.cyan(), row.title);
            println!("      {} {}", "Result:".dimmed(), result.as_str());
            if !reason.is_empty() {
                println!("      {} {}", "Reason:".dimmed(), reason);
            }
        }
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Prints a one-line running count while a stream is in progress.
pub fn progress_handler(noun: &'static str) -> SessionEventHandler {
    let last = AtomicUsize::new(0);
    Box::new(move |event| {
        let (count, what) = match event {
            SessionEvent::RecordsChanged { just_arrived, .. } if !just_arrived.is_empty() => {
                (just_arrived.len(), noun)
            }
            SessionEvent::LearningsChanged { in_progress, .. } if !in_progress.is_empty() => {
                (in_progress.len(), "edits proposed")
            }
            SessionEvent::ValidationMatrixChanged(matrix) if !matrix.in_flight.is_empty() => {
                let live = matrix
                    .rows
                    .iter()
                    .flat_map(|row| row.cells.iter())
                    .filter(|cell| matches!(cell, Cell::Outcome { live: true, .. }))
                    .count();
                (live, "outcomes streaming")
            }
            _ => return,
        };
        if last.swap(count, Ordering::Relaxed) != count {
            eprint!("\r  {} {} {}", "…".dimmed(), count, what);
            let _ = std::io::stderr().flush();
        }
    })
}

pub fn clear_progress() {
    eprint!("\r\x1b[2K");
}

#[cfg(test)]
mod tests {
    use super::*;
    use policyascode_engine::ValidationResult;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer title", 6), "a lon…");
        assert_eq!(truncate("ünïcödé", 4), "ünï…");
    }

    #[test]
    fn test_cell_symbols() {
        let outcome = |result: ValidationResult| Cell::Outcome {
            result,
            reason: String::new(),
            live: false,
        };
        assert_eq!(cell_symbol(&Cell::NoResult), "—");
        assert_eq!(cell_symbol(&outcome(ValidationResult::Pass)), "✅");
        assert_eq!(cell_symbol(&outcome(ValidationResult::Fail)), "❌");
        assert_eq!(cell_symbol(&outcome(ValidationResult::NotApplicable)), "⚪");
        assert_eq!(
            cell_symbol(&outcome(ValidationResult::Other("unknown".into()))),
            "❓"
        );
    }
}

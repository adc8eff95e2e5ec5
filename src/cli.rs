//! Command-line front end.
//!
//! Loads the profile, runs the pipeline on a worker thread while the main
//! thread renders progress, and prints previews, execution summaries, undo
//! reports and journal history through [`OutputFormatter`].

use crate::config::Profile;
use crate::output::OutputFormatter;
use crate::pipeline::{Mode, Pipeline, PipelineRun, Progress};
use crate::placement::DecisionSource;
use crate::undo::UndoReport;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

/// Represents a CLI command to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizeCommand {
    /// Organize files in a directory.
    Organize {
        /// If true, only show what would happen.
        dry_run: bool,
        /// Run the semantic grouping stage.
        semantic: bool,
    },
    /// Revert the most recent organization batch.
    Undo,
    /// List the batches kept in the undo journal.
    History,
}

/// Runs the CLI application with the given command and directory path.
///
/// # Examples
///
/// ```no_run
/// use treetidy::cli::{run_cli, OrganizeCommand};
/// use std::path::Path;
///
/// let command = OrganizeCommand::Organize { dry_run: true, semantic: true };
/// if let Err(e) = run_cli(command, Path::new("/path/to/directory")) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(command: OrganizeCommand, dir_path: &Path) -> Result<(), String> {
    run_cli_with_config(command, dir_path, None)
}

/// Runs the CLI application with an optional profile file.
pub fn run_cli_with_config(
    command: OrganizeCommand,
    dir_path: &Path,
    config_path: Option<&Path>,
) -> Result<(), String> {
    let profile =
        Profile::load(config_path).map_err(|e| format!("Error loading configuration: {}", e))?;

    match command {
        OrganizeCommand::Organize { dry_run, semantic } => {
            organize_directory(dir_path, profile, dry_run, semantic)
        }
        OrganizeCommand::Undo => undo_organization(dir_path, profile),
        OrganizeCommand::History => show_history(dir_path, profile),
    }
}

fn organize_directory(
    dir_path: &Path,
    profile: Profile,
    dry_run: bool,
    semantic: bool,
) -> Result<(), String> {
    let mode = if dry_run { Mode::Preview } else { Mode::Execute };
    if dry_run {
        OutputFormatter::dry_run_notice(&format!("Analyzing contents of: {}", dir_path.display()));
    } else {
        OutputFormatter::info(&format!("Organizing contents of: {}", dir_path.display()));
    }

    let mut pipeline = Pipeline::new(profile);
    if semantic {
        pipeline = with_sentence_model(pipeline);
    } else {
        pipeline = pipeline.without_semantic();
    }

    let (tx, rx) = mpsc::channel::<Progress>();
    let root = dir_path.to_path_buf();
    let worker = thread::spawn(move || {
        pipeline.run(&root, mode, &mut |progress| {
            let _ = tx.send(progress.clone());
        })
    });

    let bar = (mode == Mode::Execute).then(|| OutputFormatter::create_progress_bar(0));
    for progress in rx {
        if let Some(bar) = &bar {
            bar.set_length(progress.total as u64);
            bar.set_position(progress.processed as u64);
            bar.set_message(progress.current);
        }
    }
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let run = worker
        .join()
        .map_err(|_| "Organizer thread panicked".to_string())?
        .map_err(|e| format!("Error: {}", e))?;

    print_diagnostics(&run);
    if run.cancelled {
        OutputFormatter::warning("Run was cancelled before completion.");
    }

    match mode {
        Mode::Preview => print_preview(&run),
        Mode::Execute => print_execution(&run, dir_path),
    }
    Ok(())
}

#[cfg(feature = "fastembed")]
fn with_sentence_model(pipeline: Pipeline) -> Pipeline {
    if !pipeline.profile().semantic.enabled {
        return pipeline;
    }
    match crate::embedding::FastEmbedder::new() {
        Ok(embedder) => pipeline.with_embedder(Box::new(embedder)),
        Err(e) => {
            tracing::warn!(error = %e, "sentence model unavailable, using hashing embedder");
            pipeline
        }
    }
}

#[cfg(not(feature = "fastembed"))]
fn with_sentence_model(pipeline: Pipeline) -> Pipeline {
    pipeline
}

fn print_diagnostics(run: &PipelineRun) {
    if !run.scan_diagnostics.is_empty() {
        OutputFormatter::warning(&format!(
            "{} entries could not be scanned:",
            run.scan_diagnostics.len()
        ));
        for diagnostic in &run.scan_diagnostics {
            OutputFormatter::plain(&format!("    - {}", diagnostic));
        }
    }

    for root in &run.protected_roots {
        OutputFormatter::info(&format!(
            "Protected {} root: {} ({})",
            root.kind.label(),
            root.path.display(),
            root.markers.join(", ")
        ));
    }
}

fn print_preview(run: &PipelineRun) {
    let moves: Vec<_> = run
        .decisions
        .iter()
        .filter(|d| d.decision_source != DecisionSource::ProtectedSkip && !d.is_noop(&run.root))
        .collect();

    if moves.is_empty() {
        OutputFormatter::plain("Nothing to organize.");
        return;
    }

    OutputFormatter::header("Files would be organized as follows:");
    for decision in &moves {
        OutputFormatter::decision_line(decision, &run.root);
    }

    if !run.groups.is_empty() {
        OutputFormatter::header("Semantic groups:");
        for group in &run.groups {
            OutputFormatter::plain(&format!(
                "  {} ({} files)",
                group.label,
                group.members.len()
            ));
        }
    }

    let stats = run.stats();
    OutputFormatter::summary_table(&stats.by_category, stats.will_move);
    OutputFormatter::plain(&format!(
        "{} to move, {} left in place, {} conflicts, {} unsafe",
        stats.will_move, stats.will_skip, stats.conflicts, stats.unsafe_moves
    ));
    OutputFormatter::dry_run_notice("No files were modified.");
    OutputFormatter::plain(&format!(
        "Run 'treetidy {}' (without --dry-run) to execute the organization.",
        run.root.display()
    ));
}

fn print_execution(run: &PipelineRun, dir_path: &Path) {
    if let Some(warning) = &run.journal_warning {
        OutputFormatter::warning(warning);
    }

    let Some(summary) = &run.execution else {
        OutputFormatter::plain("Nothing was moved.");
        return;
    };
    if summary.total == 0 {
        OutputFormatter::plain("Nothing to organize.");
        return;
    }

    OutputFormatter::success(&format!(
        "Moved {} of {} files",
        summary.succeeded.len(),
        summary.total
    ));
    if summary.renamed > 0 {
        OutputFormatter::info(&format!(
            "{} files were renamed to avoid overwriting existing ones",
            summary.renamed
        ));
    }

    if !summary.skipped.is_empty() {
        OutputFormatter::warning(&format!("Skipped: {}", summary.skipped.len()));
        for (path, reason) in &summary.skipped {
            OutputFormatter::plain(&format!("    - {}: {}", path.display(), reason));
        }
    }

    if !summary.failed.is_empty() {
        OutputFormatter::error(&format!("Failed: {}", summary.failed.len()));
        for (path, reason) in &summary.failed {
            OutputFormatter::error(&format!("    {}: {}", path.display(), reason));
        }
    }

    match (&summary.journal_error, summary.batch_id) {
        (Some(e), _) => {
            OutputFormatter::error(&format!("Could not save undo history: {}", e));
            OutputFormatter::warning(
                "Undo is not available for this run. Please verify the result manually.",
            );
        }
        (None, Some(id)) => OutputFormatter::plain(&format!(
            "History saved as batch {}. Use 'treetidy {} --undo' to revert changes.",
            id,
            dir_path.display()
        )),
        (None, None) => {}
    }
}

fn undo_organization(dir_path: &Path, profile: Profile) -> Result<(), String> {
    OutputFormatter::info("Undoing previous organization...");

    let report = Pipeline::new(profile)
        .without_semantic()
        .undo(dir_path)
        .map_err(|e| format!("Error: {}", e))?;
    print_undo_report(&report);
    Ok(())
}

fn print_undo_report(report: &UndoReport) {
    let batch = report
        .batch_id
        .map(|id| format!(" batch {}", id))
        .unwrap_or_default();
    OutputFormatter::success(&format!(
        "Undo{} complete: restored {} files",
        batch,
        report.restored.len()
    ));
    if report.removed_dirs > 0 {
        OutputFormatter::plain(&format!(
            "  Removed {} empty directories",
            report.removed_dirs
        ));
    }

    if !report.unresolved.is_empty() {
        OutputFormatter::warning(&format!("Unresolved: {}", report.unresolved.len()));
        for (path, reason) in &report.unresolved {
            OutputFormatter::plain(&format!("    - {}: {}", path.display(), reason));
        }
    }

    if !report.failed.is_empty() {
        OutputFormatter::error(&format!("Failed: {}", report.failed.len()));
        for (path, reason) in &report.failed {
            OutputFormatter::error(&format!("    {}: {}", path.display(), reason));
        }
        OutputFormatter::warning("Failed entries were kept in the history. Fix the issues and run --undo again.");
    }

    if let Some(e) = &report.journal_error {
        OutputFormatter::error(&format!("Could not update undo history: {}", e));
    }
}

fn show_history(dir_path: &Path, profile: Profile) -> Result<(), String> {
    let batches = Pipeline::new(profile)
        .without_semantic()
        .history(dir_path)
        .map_err(|e| format!("Error: {}", e))?;
    OutputFormatter::history_table(&batches);
    Ok(())
}

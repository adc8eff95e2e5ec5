//! Output formatting and styling module.
//!
//! All user-facing CLI output goes through [`OutputFormatter`] so colors,
//! symbols and table layout stay consistent. Diagnostics for developers go
//! through `tracing` instead.

use crate::placement::{DecisionSource, PlacementDecision};
use crate::undo::{Outcome, UndoBatch};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::Path;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Progress bars for operations
/// - Summary tables with statistics
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use treetidy::output::OutputFormatter;
    /// OutputFormatter::success("Directory organized");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Progress bar for the execute stage. The length is updated as
    /// progress messages arrive.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        pb
    }

    /// One preview line per decision that changes something, plus warnings
    /// for conflicts and unsafe moves.
    pub fn decision_line(decision: &PlacementDecision, root: &Path) {
        let source = decision
            .source
            .strip_prefix(root)
            .unwrap_or(&decision.source)
            .display()
            .to_string();
        let tag = match decision.decision_source {
            DecisionSource::Rule => "rule".normal(),
            DecisionSource::Semantic => "semantic".magenta(),
            DecisionSource::ProtectedSkip => "protected".yellow(),
            DecisionSource::FallbackUnclassified => "unclassified".dimmed(),
        };

        if !decision.safe && decision.decision_source != DecisionSource::ProtectedSkip {
            println!(
                " {} {} → {} [{}]",
                "✗".red(),
                source,
                decision.target.display(),
                tag
            );
            println!("   {}", decision.reason.dimmed());
            return;
        }

        println!(" - {} → {} [{}]", source, decision.target.display(), tag);
        if let Some(conflict) = &decision.conflict {
            println!("   {} conflict: {}", "⚠".yellow(), conflict);
        }
    }

    /// Prints a summary table with file statistics by category.
    ///
    /// ```no_run
    /// use treetidy::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("Documents".to_string(), 15);
    /// counts.insert("Images".to_string(), 8);
    /// OutputFormatter::summary_table(&counts, 23);
    /// ```
    pub fn summary_table(category_counts: &BTreeMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = category_counts
            .keys()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(8);

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 10));

        for (category, count) in category_counts {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count),
                width = width
            );
        }

        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files),
            width = width
        );
    }

    /// Retained journal batches, newest first.
    pub fn history_table(batches: &[UndoBatch]) {
        Self::header("HISTORY");
        if batches.is_empty() {
            println!("No organization batches recorded.");
            return;
        }

        println!(
            "{:<6} | {:<19} | {:>5} | {:>6} | {:>7}",
            "Batch".bold(),
            "Sealed".bold(),
            "Moved".bold(),
            "Failed".bold(),
            "Skipped".bold()
        );
        println!("{}", "-".repeat(56));
        for batch in batches.iter().rev() {
            let mut line = format!(
                "{:<6} | {:<19} | {:>5} | {:>6} | {:>7}",
                batch.id.to_string(),
                batch.sealed.format("%Y-%m-%d %H:%M:%S").to_string(),
                batch.count(Outcome::Success),
                batch.count(Outcome::Failed),
                batch.count(Outcome::Skipped)
            );
            if batch.cancelled {
                line.push_str(" (cancelled)");
            }
            println!("{line}");
        }
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

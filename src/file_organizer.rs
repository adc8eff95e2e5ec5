//! Move execution.
//!
//! The [`Executor`] carries out approved placement decisions one file at a
//! time. Every attempt is recorded in an open undo batch; a failing file is
//! logged and skipped so the rest of the batch still runs.

use crate::config::{ConflictPolicy, ExecutionPolicy};
use crate::pipeline::{CancelToken, Progress};
use crate::placement::PlacementDecision;
use crate::undo::{BatchId, OpenBatch, Outcome, UndoJournal};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of one execute run.
#[derive(Debug, Default)]
pub struct ExecutionSummary {
    /// `None` when nothing was attempted.
    pub batch_id: Option<BatchId>,
    /// Approved decisions handed to the executor.
    pub total: usize,
    /// `(source, destination)` of every completed move.
    pub succeeded: Vec<(PathBuf, PathBuf)>,
    pub failed: Vec<(PathBuf, String)>,
    pub skipped: Vec<(PathBuf, String)>,
    /// Files that were renamed with a numeric suffix.
    pub renamed: usize,
    pub cancelled: bool,
    /// Set when the batch could not be persisted; the moves stand but cannot
    /// be undone through the journal.
    pub journal_error: Option<String>,
}

impl ExecutionSummary {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled && self.journal_error.is_none()
    }
}

pub struct Executor<'a> {
    root: &'a Path,
    policy: &'a ExecutionPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(root: &'a Path, policy: &'a ExecutionPolicy) -> Self {
        Self { root, policy }
    }

    /// Carry out every approved decision and persist the batch.
    ///
    /// `progress` fires every `progress_interval` files and after the last
    /// one. Cancellation is checked between files and seals the batch early.
    pub fn execute(
        &self,
        decisions: &[PlacementDecision],
        journal: &mut UndoJournal,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(&Progress),
    ) -> ExecutionSummary {
        let approved: Vec<&PlacementDecision> = decisions
            .iter()
            .filter(|d| d.is_approved(self.root))
            .collect();

        let mut summary = ExecutionSummary {
            total: approved.len(),
            ..Default::default()
        };
        if approved.is_empty() {
            return summary;
        }

        let mut batch = journal.open_batch();
        let interval = self.policy.progress_interval.max(1);
        info!(batch = %batch.id(), files = approved.len(), "executing moves");

        for (index, decision) in approved.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(processed = index, "execution cancelled");
                summary.cancelled = true;
                break;
            }

            self.apply(decision, &mut batch, &mut summary);

            let processed = index + 1;
            if processed % interval == 0 || processed == approved.len() {
                progress(&Progress {
                    processed,
                    total: approved.len(),
                    current: decision
                        .source
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                });
            }
        }

        if !batch.is_empty() {
            summary.batch_id = Some(batch.id());
            journal.push(batch.seal(summary.cancelled));
            if let Err(e) = journal.save() {
                warn!(error = %e, "batch not persisted");
                summary.journal_error = Some(e.to_string());
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            cancelled = summary.cancelled,
            "execution finished"
        );
        summary
    }

    fn apply(
        &self,
        decision: &PlacementDecision,
        batch: &mut OpenBatch,
        summary: &mut ExecutionSummary,
    ) {
        let source = &decision.source;
        let mut destination = decision.target_path(self.root);

        if source.symlink_metadata().is_err() {
            let reason = "source no longer exists".to_string();
            warn!(path = %source.display(), %reason, "move failed");
            batch.record(source, &destination, Outcome::Failed, Some(reason.clone()));
            summary.failed.push((source.clone(), reason));
            return;
        }

        if destination.symlink_metadata().is_ok() {
            match self.policy.conflict {
                ConflictPolicy::Skip => {
                    let reason = format!("{} already exists", destination.display());
                    debug!(path = %source.display(), %reason, "skipped");
                    batch.record(source, &destination, Outcome::Skipped, Some(reason.clone()));
                    summary.skipped.push((source.clone(), reason));
                    return;
                }
                ConflictPolicy::Rename => {
                    destination = unique_destination(&destination);
                    summary.renamed += 1;
                }
            }
        }

        let result = destination
            .parent()
            .map_or(Ok(()), |parent| create_missing_dirs(parent, batch))
            .and_then(|()| move_file(source, &destination));

        match result {
            Ok(()) => {
                debug!(from = %source.display(), to = %destination.display(), "moved");
                batch.record(source, &destination, Outcome::Success, None);
                summary.succeeded.push((source.clone(), destination));
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(path = %source.display(), %reason, "move failed");
                batch.record(source, &destination, Outcome::Failed, Some(reason.clone()));
                summary.failed.push((source.clone(), reason));
            }
        }
    }
}

/// Create `dir` and any missing ancestors, recording each one created.
fn create_missing_dirs(dir: &Path, batch: &mut OpenBatch) -> io::Result<()> {
    let mut missing = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path.symlink_metadata().is_ok() {
            break;
        }
        missing.push(path.to_path_buf());
        current = path.parent();
    }

    for path in missing.into_iter().rev() {
        match fs::create_dir(&path) {
            Ok(()) => batch.record_created_dir(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Move a file, falling back to copy and remove when a plain rename is not
/// possible (for example across filesystems). A vanished source or denied
/// permission fails right away.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    let err = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    ) {
        return Err(err);
    }

    debug!(from = %from.display(), error = %err, "rename failed, copying instead");
    let modified = fs::metadata(from).and_then(|m| m.modified()).ok();
    fs::copy(from, to)?;
    if let Some(modified) = modified
        && let Err(e) = File::options()
            .write(true)
            .open(to)
            .and_then(|f| f.set_modified(modified))
    {
        debug!(path = %to.display(), error = %e, "could not preserve modification time");
    }

    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// First free variant of `path` in the form `name (1).ext`, `name (2).ext`, ...
pub fn unique_destination(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = path.with_file_name(format!("{stem} ({counter}){ext}"));
        if candidate.symlink_metadata().is_err() {
            return candidate;
        }
        counter += 1;
    }
}

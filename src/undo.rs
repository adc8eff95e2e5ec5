//! Undo journal.
//!
//! Every execute run records its moves in a batch. A batch is an
//! [`OpenBatch`] while moves are happening and becomes an immutable
//! [`UndoBatch`] once sealed. Sealed batches are kept in
//! `<root>/.treetidy_journal.json`, newest last, up to a fixed capacity.

use crate::error::JournalError;
use crate::file_organizer::move_file;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Journal file name inside the organization root.
pub const JOURNAL_FILE_NAME: &str = ".treetidy_journal.json";

const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
    Skipped,
}

/// One attempted move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub op_id: u64,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub timestamp: DateTime<Local>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A batch that is still receiving entries.
#[derive(Debug)]
pub struct OpenBatch {
    id: BatchId,
    root: PathBuf,
    started: DateTime<Local>,
    entries: Vec<UndoEntry>,
    created_dirs: Vec<PathBuf>,
}

impl OpenBatch {
    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn record(
        &mut self,
        source: &Path,
        destination: &Path,
        outcome: Outcome,
        reason: Option<String>,
    ) {
        let op_id = self.entries.len() as u64 + 1;
        self.entries.push(UndoEntry {
            op_id,
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            timestamp: Local::now(),
            outcome,
            reason,
        });
    }

    pub fn record_created_dir(&mut self, dir: PathBuf) {
        self.created_dirs.push(dir);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.created_dirs.is_empty()
    }

    pub fn seal(self, cancelled: bool) -> UndoBatch {
        UndoBatch {
            id: self.id,
            root: self.root,
            started: self.started,
            sealed: Local::now(),
            cancelled,
            entries: self.entries,
            created_dirs: self.created_dirs,
        }
    }
}

/// A sealed, persisted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoBatch {
    pub id: BatchId,
    pub root: PathBuf,
    pub started: DateTime<Local>,
    pub sealed: DateTime<Local>,
    #[serde(default)]
    pub cancelled: bool,
    pub entries: Vec<UndoEntry>,
    #[serde(default)]
    pub created_dirs: Vec<PathBuf>,
}

impl UndoBatch {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }
}

#[derive(Serialize, Deserialize)]
struct JournalDocument {
    version: u32,
    batches: Vec<UndoBatch>,
}

/// What an undo run achieved.
#[derive(Debug, Default)]
pub struct UndoReport {
    pub batch_id: Option<BatchId>,
    /// Original paths files were moved back to.
    pub restored: Vec<PathBuf>,
    /// Entries that could not be reverted because the filesystem changed
    /// since the batch ran.
    pub unresolved: Vec<(PathBuf, String)>,
    /// Entries whose move back failed with an I/O error. These stay in the
    /// journal for another attempt.
    pub failed: Vec<(PathBuf, String)>,
    pub removed_dirs: usize,
    pub journal_error: Option<String>,
}

impl UndoReport {
    /// Returns true if the undo was completely successful.
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.unresolved.is_empty() && self.journal_error.is_none()
    }
}

/// Bounded, durable list of sealed batches for one organization root.
#[derive(Debug)]
pub struct UndoJournal {
    root: PathBuf,
    path: PathBuf,
    capacity: usize,
    batches: Vec<UndoBatch>,
}

impl UndoJournal {
    pub fn path_for(root: &Path) -> PathBuf {
        root.join(JOURNAL_FILE_NAME)
    }

    /// Load the journal of `root`. A missing file is an empty journal.
    ///
    /// # Errors
    ///
    /// [`JournalError::Read`] if the file exists but cannot be read and
    /// [`JournalError::Corrupted`] if it does not parse.
    pub fn load(root: &Path, capacity: usize) -> Result<Self, JournalError> {
        let path = Self::path_for(root);
        let mut journal = Self {
            root: root.to_path_buf(),
            path,
            capacity: capacity.max(1),
            batches: Vec::new(),
        };

        let content = match fs::read_to_string(&journal.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(journal),
            Err(source) => {
                return Err(JournalError::Read {
                    path: journal.path,
                    source,
                });
            }
        };

        let document: JournalDocument =
            serde_json::from_str(&content).map_err(|e| JournalError::Corrupted {
                path: journal.path.clone(),
                reason: e.to_string(),
            })?;
        if document.version != JOURNAL_VERSION {
            return Err(JournalError::Corrupted {
                path: journal.path,
                reason: format!("unsupported journal version {}", document.version),
            });
        }

        journal.batches = document.batches;
        debug!(path = %journal.path.display(), batches = journal.batches.len(), "journal loaded");
        Ok(journal)
    }

    /// Like [`UndoJournal::load`], but a corrupted file is set aside as
    /// `.treetidy_journal.json.corrupt-<timestamp>` and an empty journal is
    /// returned together with a warning.
    pub fn load_or_recover(
        root: &Path,
        capacity: usize,
    ) -> Result<(Self, Option<String>), JournalError> {
        match Self::load(root, capacity) {
            Ok(journal) => Ok((journal, None)),
            Err(JournalError::Corrupted { path, reason }) => {
                let stamp = Local::now().format("%Y%m%d-%H%M%S");
                let backup = root.join(format!("{JOURNAL_FILE_NAME}.corrupt-{stamp}"));
                fs::rename(&path, &backup).map_err(|source| JournalError::Write {
                    path: path.clone(),
                    source,
                })?;
                let warning = format!(
                    "undo journal was corrupted ({reason}); moved aside to {}",
                    backup.display()
                );
                warn!("{}", warning);
                Ok((
                    Self {
                        root: root.to_path_buf(),
                        path,
                        capacity: capacity.max(1),
                        batches: Vec::new(),
                    },
                    Some(warning),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Oldest first.
    pub fn batches(&self) -> &[UndoBatch] {
        &self.batches
    }

    pub fn last(&self) -> Option<&UndoBatch> {
        self.batches.last()
    }

    /// Start a new batch with the next free id.
    pub fn open_batch(&self) -> OpenBatch {
        let next = self.batches.iter().map(|b| b.id.0).max().unwrap_or(0) + 1;
        OpenBatch {
            id: BatchId(next),
            root: self.root.clone(),
            started: Local::now(),
            entries: Vec::new(),
            created_dirs: Vec::new(),
        }
    }

    /// Append a sealed batch, dropping the oldest ones beyond capacity.
    pub fn push(&mut self, batch: UndoBatch) {
        self.batches.push(batch);
        if self.batches.len() > self.capacity {
            let excess = self.batches.len() - self.capacity;
            let dropped: Vec<_> = self.batches.drain(..excess).map(|b| b.id).collect();
            debug!(?dropped, "rotated old batches out of the journal");
        }
    }

    /// Write the journal atomically. An empty journal removes the file.
    pub fn save(&self) -> Result<(), JournalError> {
        let write_err = |source: io::Error| JournalError::Write {
            path: self.path.clone(),
            source,
        };

        if self.batches.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(write_err(e)),
            };
        }

        let document = JournalDocument {
            version: JOURNAL_VERSION,
            batches: self.batches.clone(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let tmp = self.path.with_file_name(format!("{JOURNAL_FILE_NAME}.tmp"));
        let result = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(json.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        Ok(())
    }

    /// Revert the most recent batch.
    ///
    /// Successful moves are replayed backwards. Directories the batch
    /// created are removed once empty. Entries that fail with an I/O error
    /// are kept in a reduced batch so the undo can be retried; a failure to
    /// persist the journal is reported in [`UndoReport::journal_error`].
    pub fn undo_last(&mut self) -> Result<UndoReport, JournalError> {
        let batch = self
            .batches
            .pop()
            .ok_or_else(|| JournalError::NothingToUndo(self.root.clone()))?;

        let mut report = UndoReport {
            batch_id: Some(batch.id),
            ..Default::default()
        };
        let mut retry = Vec::new();

        for entry in batch
            .entries
            .iter()
            .rev()
            .filter(|e| e.outcome == Outcome::Success)
        {
            match restore(entry) {
                Ok(()) => {
                    debug!(path = %entry.source.display(), "restored");
                    report.restored.push(entry.source.clone());
                }
                Err(Restore::Unresolved(reason)) => {
                    warn!(path = %entry.source.display(), %reason, "cannot restore");
                    report.unresolved.push((entry.source.clone(), reason));
                }
                Err(Restore::Failed(reason)) => {
                    warn!(path = %entry.source.display(), %reason, "restore failed");
                    report.failed.push((entry.source.clone(), reason));
                    retry.push(entry.clone());
                }
            }
        }

        let mut dirs = batch.created_dirs.clone();
        dirs.sort_by_key(|d| Reverse(d.components().count()));
        let mut kept_dirs = Vec::new();
        for dir in dirs {
            let empty = fs::read_dir(&dir).map(|mut it| it.next().is_none());
            match empty {
                Ok(true) => match fs::remove_dir(&dir) {
                    Ok(()) => report.removed_dirs += 1,
                    Err(e) => {
                        debug!(dir = %dir.display(), error = %e, "could not remove directory");
                        kept_dirs.push(dir);
                    }
                },
                Ok(false) => kept_dirs.push(dir),
                Err(_) => {}
            }
        }

        if !retry.is_empty() {
            retry.reverse();
            kept_dirs.reverse();
            self.batches.push(UndoBatch {
                entries: retry,
                created_dirs: kept_dirs,
                ..batch
            });
        }

        if let Err(e) = self.save() {
            warn!(error = %e, "undo journal not updated");
            report.journal_error = Some(e.to_string());
        }

        info!(
            batch = %batch_label(report.batch_id),
            restored = report.restored.len(),
            unresolved = report.unresolved.len(),
            failed = report.failed.len(),
            removed_dirs = report.removed_dirs,
            "undo finished"
        );
        Ok(report)
    }
}

fn batch_label(id: Option<BatchId>) -> String {
    id.map(|id| id.to_string()).unwrap_or_default()
}

enum Restore {
    Unresolved(String),
    Failed(String),
}

fn restore(entry: &UndoEntry) -> Result<(), Restore> {
    if entry.destination.symlink_metadata().is_err() {
        return Err(Restore::Unresolved(format!(
            "{} no longer exists",
            entry.destination.display()
        )));
    }
    if entry.source.symlink_metadata().is_ok() {
        return Err(Restore::Unresolved(
            "original location is occupied".to_string(),
        ));
    }

    if let Some(parent) = entry.source.parent()
        && !parent.is_dir()
    {
        fs::create_dir_all(parent)
            .map_err(|e| Restore::Failed(format!("cannot recreate {}: {e}", parent.display())))?;
    }

    move_file(&entry.destination, &entry.source)
        .map_err(|e| Restore::Failed(format!("failed to move back: {e}")))
}

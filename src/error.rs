//! Error types shared across the organization pipeline.
//!
//! Only conditions that stop a whole run are errors. Per-file failures are
//! recovered where they happen and reported as strings inside diagnostics,
//! journal entries and summaries.

use crate::config::ConfigError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions for an organize, undo or history run.
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("Directory does not exist: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Not a directory: {}", .0.display())]
    RootNotDirectory(PathBuf),

    #[error("Cannot access directory {}: {source}", .path.display())]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Failures reading, writing or replaying the undo journal.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Failed to read undo journal {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Undo journal {} is corrupted: {reason}", .path.display())]
    Corrupted { path: PathBuf, reason: String },

    #[error("Failed to write undo journal {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No organization batches recorded for {}", .0.display())]
    NothingToUndo(PathBuf),
}

/// Failures raised by an embedding backend.
#[derive(Debug, Clone, Error)]
pub enum EmbeddingError {
    /// The backend as a whole cannot produce vectors.
    #[error("Embedding backend unavailable: {0}")]
    Backend(String),

    /// A single input could not be embedded.
    #[error("Cannot embed input: {0}")]
    Input(String),
}

/// Result alias for pipeline entry points.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

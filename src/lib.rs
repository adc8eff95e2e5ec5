//! treetidy - organize a directory tree with preview, protection and undo
//!
//! The crate scans a directory, protects project, media and other special
//! roots, classifies files by extension and content signature, optionally
//! groups related documents by meaning, and resolves a bounded-depth target
//! layout. Execution moves files one at a time and records every move in an
//! on-disk journal so the last batches can be reverted.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod file_category;
pub mod file_organizer;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod placement;
pub mod protect;
pub mod scanner;
pub mod semantic;
pub mod undo;

pub use config::{CompiledFilters, ConfigError, Profile};
pub use embedding::{Embedder, HashingEmbedder, cosine_similarity};
pub use error::{EmbeddingError, JournalError, OrganizeError, OrganizeResult};
pub use file_category::{Category, CategoryResult, RuleClassifier};
pub use file_organizer::{ExecutionSummary, Executor};
pub use pipeline::{CancelToken, Mode, Pipeline, PipelineRun, Progress};
pub use placement::{DecisionSource, PlacementDecision, PlacementResolver, PreviewStats};
pub use protect::{ProtectedRoot, RootKind, RootProtector};
pub use scanner::{FileTree, ScanOutcome, TreeScanner};
pub use semantic::{SemanticGroup, SemanticGrouper};
pub use undo::{BatchId, UndoBatch, UndoJournal, UndoReport};

pub use cli::{OrganizeCommand, run_cli};

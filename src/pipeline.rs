//! The organization pipeline.
//!
//! Scanner → root protector → rule classifier → semantic grouper →
//! placement resolver → executor → undo journal. Each stage runs to
//! completion before the next starts; a [`Pipeline`] holds the profile and
//! the embedding backend and can be moved to a worker thread.

use crate::config::Profile;
use crate::embedding::{Embedder, HashingEmbedder};
use crate::error::{OrganizeError, OrganizeResult};
use crate::file_category::{CategoryResult, RuleClassifier};
use crate::file_organizer::{ExecutionSummary, Executor};
use crate::placement::{DecisionSource, PlacementDecision, PlacementResolver, PreviewStats};
use crate::protect::{ProtectedRoot, RootProtector};
use crate::scanner::{NodeId, ScanDiagnostic, TreeScanner};
use crate::semantic::{Candidate, GroupingOutcome, SemanticGroup, SemanticGrouper};
use crate::undo::{UndoBatch, UndoJournal, UndoReport};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, info_span, warn};

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress of the execute stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    /// File name of the most recently processed file.
    pub current: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Compute decisions only.
    Preview,
    /// Compute decisions and carry them out.
    Execute,
}

/// Everything one run produced.
#[derive(Debug)]
pub struct PipelineRun {
    pub root: PathBuf,
    pub mode: Mode,
    /// One per file, in tree order.
    pub decisions: Vec<PlacementDecision>,
    pub groups: Vec<SemanticGroup>,
    pub protected_roots: Vec<ProtectedRoot>,
    pub scan_diagnostics: Vec<ScanDiagnostic>,
    pub semantic_diagnostics: Vec<String>,
    /// `Some` for execute runs that reached the executor.
    pub execution: Option<ExecutionSummary>,
    /// Journal problems that did not stop the run.
    pub journal_warning: Option<String>,
    pub cancelled: bool,
}

impl PipelineRun {
    pub fn stats(&self) -> PreviewStats {
        PreviewStats::from_decisions(&self.decisions, &self.root)
    }
}

pub struct Pipeline {
    profile: Profile,
    embedder: Option<Box<dyn Embedder>>,
    cancel: CancelToken,
    follow_links: bool,
}

impl Pipeline {
    /// A pipeline using the built-in hashing embedder when semantic grouping
    /// is enabled in the profile.
    pub fn new(profile: Profile) -> Self {
        let embedder: Option<Box<dyn Embedder>> = if profile.semantic.enabled {
            Some(Box::new(HashingEmbedder::default()))
        } else {
            None
        };
        Self {
            profile,
            embedder,
            cancel: CancelToken::new(),
            follow_links: false,
        }
    }

    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn without_semantic(mut self) -> Self {
        self.embedder = None;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn follow_links(mut self, yes: bool) -> Self {
        self.follow_links = yes;
        self
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Run the pipeline over `root`.
    ///
    /// # Errors
    ///
    /// Only an unusable root, invalid filter patterns or an unreadable
    /// journal stop a run. Everything else is reported inside the
    /// returned [`PipelineRun`].
    pub fn run(
        &self,
        root: &Path,
        mode: Mode,
        progress: &mut dyn FnMut(&Progress),
    ) -> OrganizeResult<PipelineRun> {
        let root = validate_root(root)?;
        let _span = info_span!("organize", root = %root.display(), ?mode).entered();

        let filters = self.profile.compile_filters()?;
        let protector = RootProtector::new(&self.profile.protection, filters)?;

        let scan = TreeScanner::new()
            .follow_links(self.follow_links)
            .scan(&root, &self.cancel);
        let mut tree = scan.tree;
        let protected_roots = protector.protect(&mut tree);

        let classifier = RuleClassifier::new(
            &self.profile.rules,
            self.profile.execution.signature_probe_bytes,
        )
        .with_custom_rules(&self.profile.rules.custom)?;
        let classifications: HashMap<NodeId, CategoryResult> = tree
            .files()
            .filter(|id| !tree.get(*id).is_protected())
            .map(|id| (id, classifier.classify(&tree.get(id).path)))
            .collect();
        info!(
            classified = classifications.values().filter(|c| c.is_classified()).count(),
            unclassified = classifications.values().filter(|c| !c.is_classified()).count(),
            "classification finished"
        );

        let mut grouping = GroupingOutcome::default();
        if let Some(embedder) = &self.embedder
            && self.profile.semantic.enabled
            && !self.cancel.is_cancelled()
        {
            let candidates: Vec<Candidate<'_>> = classifications
                .iter()
                .map(|(id, classification)| Candidate {
                    path: &tree.get(*id).path,
                    classification,
                })
                .collect();
            grouping =
                SemanticGrouper::new(&self.profile.semantic, &**embedder).group(&candidates);
        }

        let decisions = PlacementResolver::new(&self.profile.placement).resolve(
            &tree,
            &classifications,
            &grouping.labels(),
        );
        let placed_by_group: HashSet<&Path> = decisions
            .iter()
            .filter(|d| d.decision_source == DecisionSource::Semantic)
            .map(|d| d.source.as_path())
            .collect();
        grouping
            .groups
            .retain(|g| g.members.iter().any(|m| placed_by_group.contains(m.as_path())));

        let cancelled = scan.cancelled || self.cancel.is_cancelled();
        let mut run = PipelineRun {
            root: root.clone(),
            mode,
            decisions,
            groups: grouping.groups,
            protected_roots,
            scan_diagnostics: scan.diagnostics,
            semantic_diagnostics: grouping.diagnostics,
            execution: None,
            journal_warning: None,
            cancelled,
        };

        if mode == Mode::Execute {
            if cancelled {
                warn!("cancelled before execution, nothing moved");
                return Ok(run);
            }

            let (mut journal, warning) =
                UndoJournal::load_or_recover(&root, self.profile.execution.journal_capacity)?;
            run.journal_warning = warning;

            let summary = Executor::new(&root, &self.profile.execution).execute(
                &run.decisions,
                &mut journal,
                &self.cancel,
                progress,
            );
            run.cancelled |= summary.cancelled;
            run.execution = Some(summary);
        }

        Ok(run)
    }

    /// Revert the most recent batch recorded for `root`.
    ///
    /// # Errors
    ///
    /// Fails when the root is unusable, the journal cannot be read or is
    /// corrupted, or no batch is recorded.
    pub fn undo(&self, root: &Path) -> OrganizeResult<UndoReport> {
        let root = validate_root(root)?;
        let _span = info_span!("undo", root = %root.display()).entered();
        let mut journal = UndoJournal::load(&root, self.profile.execution.journal_capacity)?;
        Ok(journal.undo_last()?)
    }

    /// Batches retained for `root`, oldest first.
    pub fn history(&self, root: &Path) -> OrganizeResult<Vec<UndoBatch>> {
        let root = validate_root(root)?;
        let journal = UndoJournal::load(&root, self.profile.execution.journal_capacity)?;
        Ok(journal.batches().to_vec())
    }
}

/// Canonical form of an existing directory.
fn validate_root(root: &Path) -> OrganizeResult<PathBuf> {
    let canonical = fs::canonicalize(root).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            OrganizeError::RootNotFound(root.to_path_buf())
        } else {
            OrganizeError::RootInaccessible {
                path: root.to_path_buf(),
                source,
            }
        }
    })?;
    if !canonical.is_dir() {
        return Err(OrganizeError::RootNotDirectory(root.to_path_buf()));
    }
    Ok(canonical)
}

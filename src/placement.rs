//! Placement resolution.
//!
//! Combines a file's rule category, optional semantic group, type folder and
//! date bucket into one target path relative to the organization root, then
//! trims redundant or sparsely populated levels and flags conflicts and
//! unsafe moves. Exactly one [`PlacementDecision`] is produced per file.

use crate::config::{DateGranularity, PlacementPolicy, UnclassifiedPolicy};
use crate::file_category::{Category, CategoryResult, MatchedRule};
use crate::scanner::{FileTree, NodeId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Longest absolute path the host accepts.
#[cfg(windows)]
pub const MAX_PATH_LEN: usize = 260;
#[cfg(not(windows))]
pub const MAX_PATH_LEN: usize = 4096;

/// Longest single path component in bytes.
pub const MAX_COMPONENT_LEN: usize = 255;

pub const NO_EXTENSION_FOLDER: &str = "No Extension";

/// Which stage decided where a file goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    Rule,
    Semantic,
    ProtectedSkip,
    FallbackUnclassified,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecisionSource::Rule => "rule",
            DecisionSource::Semantic => "semantic",
            DecisionSource::ProtectedSkip => "protected-skip",
            DecisionSource::FallbackUnclassified => "fallback-unclassified",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// Something already exists at the target.
    ExistsOnDisk,
    /// An earlier decision in the same run targets the same path.
    ClaimedBy(PathBuf),
    /// Other decisions place files inside the target, so it must be a folder.
    FolderOfOtherTargets,
}

/// A naming collision detected at preview time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Absolute colliding path.
    pub path: PathBuf,
    pub kind: ConflictKind,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConflictKind::ExistsOnDisk => write!(f, "{} already exists", self.path.display()),
            ConflictKind::ClaimedBy(other) => write!(
                f,
                "{} is also the target of {}",
                self.path.display(),
                other.display()
            ),
            ConflictKind::FolderOfOtherTargets => write!(
                f,
                "{} is a folder other files are placed in",
                self.path.display()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementDecision {
    /// Absolute path of the file today.
    pub source: PathBuf,
    /// Destination relative to the organization root.
    pub target: PathBuf,
    pub decision_source: DecisionSource,
    pub category: Category,
    pub reason: String,
    /// False when carrying out the move would break an invariant.
    pub safe: bool,
    pub conflict: Option<Conflict>,
}

impl PlacementDecision {
    pub fn target_path(&self, root: &Path) -> PathBuf {
        root.join(&self.target)
    }

    pub fn is_noop(&self, root: &Path) -> bool {
        self.target_path(root) == self.source
    }

    /// Whether the executor should carry this decision out.
    pub fn is_approved(&self, root: &Path) -> bool {
        self.safe && self.decision_source != DecisionSource::ProtectedSkip && !self.is_noop(root)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelKind {
    Category,
    Group,
    Type,
    Date,
}

impl LevelKind {
    fn label(self) -> &'static str {
        match self {
            LevelKind::Category => "category",
            LevelKind::Group => "group",
            LevelKind::Type => "type",
            LevelKind::Date => "date",
        }
    }
}

#[derive(Debug, Clone)]
struct Level {
    kind: LevelKind,
    name: String,
}

/// A movable file whose folder levels are still being shaped.
#[derive(Debug)]
struct Plan {
    decision: usize,
    levels: Vec<Level>,
    file_name: OsString,
    notes: Vec<String>,
}

impl Plan {
    fn dir(&self) -> PathBuf {
        self.levels.iter().map(|l| l.name.as_str()).collect()
    }

    fn drop_level(&mut self, kind: LevelKind) -> bool {
        match self.levels.iter().position(|l| l.kind == kind) {
            Some(pos) => {
                self.levels.remove(pos);
                true
            }
            None => false,
        }
    }
}

pub struct PlacementResolver<'a> {
    policy: &'a PlacementPolicy,
}

impl<'a> PlacementResolver<'a> {
    pub fn new(policy: &'a PlacementPolicy) -> Self {
        Self { policy }
    }

    /// One decision per file of `tree`, in tree order.
    ///
    /// `classifications` holds the rule result of every non-protected file;
    /// `groups` maps grouped file paths to their semantic label.
    pub fn resolve(
        &self,
        tree: &FileTree,
        classifications: &HashMap<NodeId, CategoryResult>,
        groups: &HashMap<PathBuf, String>,
    ) -> Vec<PlacementDecision> {
        let root = tree.root();
        let mut decisions = Vec::new();
        let mut plans = Vec::new();

        for id in tree.files() {
            let node = tree.get(id);
            let relative = tree.relative(id).to_path_buf();

            if let Some(protection) = node.protection {
                decisions.push(PlacementDecision {
                    source: node.path.clone(),
                    target: relative,
                    decision_source: DecisionSource::ProtectedSkip,
                    category: Category::Unclassified,
                    reason: format!("protected: {protection}"),
                    safe: false,
                    conflict: None,
                });
                continue;
            }

            let classification = classifications
                .get(&id)
                .cloned()
                .unwrap_or_else(CategoryResult::unclassified);
            let date = self.date_folder(node.modified);

            let mut levels = Vec::new();
            let decision_source;
            let mut reason;

            if classification.is_classified() {
                levels.push(Level {
                    kind: LevelKind::Category,
                    name: classification.category.dir_name().to_string(),
                });
                reason = format!(
                    "{} matched {} (confidence {:.2})",
                    classification.rule, classification.category, classification.confidence
                );
                match groups.get(&node.path) {
                    Some(label) => {
                        levels.push(Level {
                            kind: LevelKind::Group,
                            name: label.clone(),
                        });
                        reason.push_str(&format!("; semantic group '{label}'"));
                        decision_source = DecisionSource::Semantic;
                    }
                    None => decision_source = DecisionSource::Rule,
                }
                let type_name = match &classification.rule {
                    MatchedRule::Custom(rule) => rule.clone(),
                    _ => type_folder(&node.path),
                };
                levels.push(Level {
                    kind: LevelKind::Type,
                    name: type_name,
                });
            } else {
                match self.policy.unclassified {
                    UnclassifiedPolicy::LeaveInPlace => {
                        decisions.push(PlacementDecision {
                            source: node.path.clone(),
                            target: relative,
                            decision_source: DecisionSource::FallbackUnclassified,
                            category: Category::Unclassified,
                            reason: "no rule matched; left in place".to_string(),
                            safe: true,
                            conflict: None,
                        });
                        continue;
                    }
                    UnclassifiedPolicy::Uncategorized => {
                        levels.push(Level {
                            kind: LevelKind::Category,
                            name: Category::Unclassified.dir_name().to_string(),
                        });
                        reason = "no rule matched".to_string();
                        match groups.get(&node.path) {
                            Some(label) => {
                                levels.push(Level {
                                    kind: LevelKind::Group,
                                    name: label.clone(),
                                });
                                reason.push_str(&format!("; semantic group '{label}'"));
                                decision_source = DecisionSource::Semantic;
                            }
                            None => decision_source = DecisionSource::FallbackUnclassified,
                        }
                    }
                }
            }

            if let Some(date) = date {
                levels.push(Level {
                    kind: LevelKind::Date,
                    name: date,
                });
            }

            plans.push(Plan {
                decision: decisions.len(),
                levels,
                file_name: node.file_name().to_os_string(),
                notes: Vec::new(),
            });
            decisions.push(PlacementDecision {
                source: node.path.clone(),
                target: PathBuf::new(),
                decision_source,
                category: classification.category,
                reason,
                safe: true,
                conflict: None,
            });
        }

        for plan in &mut plans {
            collapse_redundant_group(plan);
            self.enforce_max_depth(plan);
        }
        self.collapse_sparse_folders(&mut plans);

        for plan in &plans {
            let decision = &mut decisions[plan.decision];
            decision.target = plan.dir().join(&plan.file_name);
            for note in &plan.notes {
                decision.reason.push_str("; ");
                decision.reason.push_str(note);
            }
        }

        check_conflicts_and_safety(tree, root, &mut decisions);

        info!(
            decisions = decisions.len(),
            moves = decisions.iter().filter(|d| d.is_approved(root)).count(),
            conflicts = decisions.iter().filter(|d| d.conflict.is_some()).count(),
            "placement resolved"
        );
        decisions
    }

    fn date_folder(&self, modified: Option<chrono::DateTime<chrono::Local>>) -> Option<String> {
        let modified = modified?;
        match self.policy.date_granularity {
            DateGranularity::Month => Some(modified.format("%Y-%m").to_string()),
            DateGranularity::Year => Some(modified.format("%Y").to_string()),
            DateGranularity::None => None,
        }
    }

    fn enforce_max_depth(&self, plan: &mut Plan) {
        for kind in [LevelKind::Date, LevelKind::Group, LevelKind::Type] {
            if plan.levels.len() <= self.policy.max_depth {
                return;
            }
            if plan.drop_level(kind) {
                plan.notes.push(format!(
                    "dropped {} level (max depth {})",
                    kind.label(),
                    self.policy.max_depth
                ));
            }
        }
    }

    /// Fold the deepest level of every under-populated destination folder
    /// into its parent until all folders are populated or only the category
    /// level remains.
    fn collapse_sparse_folders(&self, plans: &mut [Plan]) {
        let min = self.policy.min_folder_population;
        loop {
            let mut population: HashMap<PathBuf, usize> = HashMap::new();
            for plan in plans.iter() {
                *population.entry(plan.dir()).or_default() += 1;
            }

            let mut changed = false;
            for plan in plans.iter_mut() {
                let count = population.get(&plan.dir()).copied().unwrap_or(0);
                if count < min && plan.levels.len() > 1 {
                    if let Some(level) = plan.levels.pop() {
                        plan.notes.push(format!(
                            "collapsed {} level '{}' ({} file{} < {})",
                            level.kind.label(),
                            level.name,
                            count,
                            if count == 1 { "" } else { "s" },
                            min
                        ));
                    }
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }
}

/// Upper-cased extension, or [`NO_EXTENSION_FOLDER`].
pub fn type_folder(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_uppercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| NO_EXTENSION_FOLDER.to_string())
}

/// Comparison key for folder names: case and punctuation are ignored, as is
/// a trailing "files".
fn folder_key(name: &str) -> String {
    let key: String = name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect();
    match key.strip_suffix("files") {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => key,
    }
}

fn collapse_redundant_group(plan: &mut Plan) {
    let Some(group) = plan.levels.iter().find(|l| l.kind == LevelKind::Group) else {
        return;
    };
    let group_key = folder_key(&group.name);
    let duplicate = plan
        .levels
        .iter()
        .filter(|l| matches!(l.kind, LevelKind::Category | LevelKind::Type))
        .find(|l| folder_key(&l.name) == group_key)
        .map(|l| l.kind);

    if let Some(kind) = duplicate {
        let name = group.name.clone();
        plan.drop_level(LevelKind::Group);
        plan.notes.push(format!(
            "group '{name}' duplicates the {} folder",
            kind.label()
        ));
    }
}

fn check_conflicts_and_safety(tree: &FileTree, root: &Path, decisions: &mut [PlacementDecision]) {
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();

    // Folders the executor will need for the moves of this run.
    let folders: HashSet<PathBuf> = decisions
        .iter()
        .filter(|d| d.decision_source != DecisionSource::ProtectedSkip && !d.is_noop(root))
        .flat_map(|d| d.target.ancestors().skip(1).map(Path::to_path_buf))
        .filter(|dir| !dir.as_os_str().is_empty())
        .collect();

    for decision in decisions.iter_mut() {
        if decision.decision_source == DecisionSource::ProtectedSkip
            || decision.is_noop(root)
        {
            claimed
                .entry(decision.target.clone())
                .or_insert_with(|| decision.source.clone());
            continue;
        }

        let target = decision.target_path(root);

        if folders.contains(&decision.target) {
            debug!(source = %decision.source.display(), "target shadows a needed folder");
            decision.safe = false;
            decision.reason.push_str("; unsafe: target is needed as a folder");
            decision.conflict = Some(Conflict {
                path: target,
                kind: ConflictKind::FolderOfOtherTargets,
            });
            continue;
        }

        let problem = if decision.source.to_str().is_none() || target.to_str().is_none() {
            Some("path is not valid UTF-8 and cannot be recorded for undo".to_string())
        } else {
            unsafe_reason(tree, root, &decision.target, &target)
        };
        if let Some(problem) = problem {
            debug!(source = %decision.source.display(), %problem, "unsafe placement");
            decision.safe = false;
            decision.reason.push_str("; unsafe: ");
            decision.reason.push_str(&problem);
        }

        if let Some(first) = claimed.get(&decision.target) {
            decision.conflict = Some(Conflict {
                path: target,
                kind: ConflictKind::ClaimedBy(first.clone()),
            });
        } else {
            if target.symlink_metadata().is_ok() {
                decision.conflict = Some(Conflict {
                    path: target,
                    kind: ConflictKind::ExistsOnDisk,
                });
            }
            claimed.insert(decision.target.clone(), decision.source.clone());
        }
    }
}

fn unsafe_reason(tree: &FileTree, root: &Path, relative: &Path, target: &Path) -> Option<String> {
    if !relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Some("target leaves the organization root".to_string());
    }

    if target.as_os_str().len() > MAX_PATH_LEN {
        return Some(format!("target path exceeds {MAX_PATH_LEN} characters"));
    }
    if relative
        .components()
        .any(|c| c.as_os_str().len() > MAX_COMPONENT_LEN)
    {
        return Some(format!("a path component exceeds {MAX_COMPONENT_LEN} bytes"));
    }

    let mut prefix = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        prefix.push(component);
        if let Some(id) = tree.find(&prefix) {
            let node = tree.get(id);
            if !node.is_directory {
                return Some(format!("{} is an existing file", prefix.display()));
            }
            if let Some(protection) = node.protection {
                return Some(format!("{} is {}", prefix.display(), protection));
            }
        }
    }
    None
}

/// Counts shown before anything is moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewStats {
    /// Files that will move, per category folder.
    pub by_category: BTreeMap<String, usize>,
    pub by_source: BTreeMap<DecisionSource, usize>,
    pub conflicts: usize,
    pub unsafe_moves: usize,
    pub will_move: usize,
    pub will_skip: usize,
}

impl PreviewStats {
    pub fn from_decisions(decisions: &[PlacementDecision], root: &Path) -> Self {
        let mut stats = Self::default();
        for decision in decisions {
            *stats.by_source.entry(decision.decision_source).or_default() += 1;
            if decision.conflict.is_some() {
                stats.conflicts += 1;
            }
            if !decision.safe && decision.decision_source != DecisionSource::ProtectedSkip {
                stats.unsafe_moves += 1;
            }
            if decision.is_approved(root) {
                stats.will_move += 1;
                *stats
                    .by_category
                    .entry(decision.category.dir_name().to_string())
                    .or_default() += 1;
            } else {
                stats.will_skip += 1;
            }
        }
        stats
    }
}

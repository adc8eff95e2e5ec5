//! Directory tree snapshot.
//!
//! [`TreeScanner`] walks an organization root once and records every
//! reachable file and directory in a [`FileTree`]. Nodes are stored in an
//! arena in depth-first order; parent and child links are [`NodeId`]s into
//! that arena.

use crate::pipeline::CancelToken;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Index of a node inside its [`FileTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Why a node is excluded from reorganization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Inside a directory that carries a root marker.
    Root(crate::protect::RootKind),
    /// Excluded by the profile's filter rules.
    Filtered,
    /// Inside a hidden directory.
    Hidden,
    /// A file treetidy itself maintains.
    Internal,
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protection::Root(kind) => write!(f, "inside a protected {} root", kind.label()),
            Protection::Filtered => write!(f, "excluded by filter rules"),
            Protection::Hidden => write!(f, "hidden entry"),
            Protection::Internal => write!(f, "treetidy state file"),
        }
    }
}

/// One file or directory of the snapshot.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub path: PathBuf,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
    pub depth: usize,
    pub protection: Option<Protection>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl FileNode {
    pub fn is_protected(&self) -> bool {
        self.protection.is_some()
    }

    /// Display form of the file name. Lossy for names that are not UTF-8.
    pub fn name(&self) -> String {
        self.file_name().to_string_lossy().into_owned()
    }

    /// Exact file name as stored on disk.
    pub fn file_name(&self) -> &OsStr {
        self.path.file_name().unwrap_or_default()
    }
}

/// Arena of scanned nodes. The root is always `NodeId(0)`.
#[derive(Debug, Clone)]
pub struct FileTree {
    root: PathBuf,
    nodes: Vec<FileNode>,
    index: HashMap<PathBuf, NodeId>,
}

impl FileTree {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn insert(&mut self, node: FileNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        if let Some(parent) = node.parent {
            self.nodes[parent.0].children.push(id);
        }
        self.index.insert(node.path.clone(), id);
        self.nodes.push(node);
        id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_id(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &FileNode {
        &self.nodes[id.0]
    }

    pub fn find(&self, path: &Path) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    /// All node ids in depth-first, name-sorted order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Ids of every regular file.
    pub fn files(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids().filter(|id| !self.get(*id).is_directory)
    }

    pub fn file_count(&self) -> usize {
        self.files().count()
    }

    /// The node and every node beneath it.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }
        out
    }

    /// Protect a node and everything beneath it. Existing protection is kept.
    pub fn protect_subtree(&mut self, id: NodeId, protection: Protection) -> usize {
        let mut marked = 0;
        for node_id in self.subtree(id) {
            let node = &mut self.nodes[node_id.0];
            if node.protection.is_none() {
                node.protection = Some(protection);
                marked += 1;
            }
        }
        marked
    }

    /// Path of a node relative to the root.
    pub fn relative(&self, id: NodeId) -> &Path {
        let path = &self.nodes[id.0].path;
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Classification of a recovered scan fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    PermissionDenied,
    Vanished,
    SymlinkLoop,
    /// A followed link resolves outside the organization root.
    OutsideRoot,
    Other,
}

/// An entry the scanner could not read. The walk continues past it.
#[derive(Debug, Clone)]
pub struct ScanDiagnostic {
    pub path: Option<PathBuf>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl ScanDiagnostic {
    fn from_walk_error(err: &walkdir::Error) -> Self {
        let kind = if err.loop_ancestor().is_some() {
            DiagnosticKind::SymlinkLoop
        } else {
            match err.io_error().map(io::Error::kind) {
                Some(io::ErrorKind::PermissionDenied) => DiagnosticKind::PermissionDenied,
                Some(io::ErrorKind::NotFound) => DiagnosticKind::Vanished,
                _ => DiagnosticKind::Other,
            }
        };
        Self {
            path: err.path().map(Path::to_path_buf),
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for ScanDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {}", path.display(), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Result of one scan.
#[derive(Debug)]
pub struct ScanOutcome {
    pub tree: FileTree,
    pub diagnostics: Vec<ScanDiagnostic>,
    pub cancelled: bool,
}

/// Walks an organization root. Read-only.
#[derive(Debug, Clone, Default)]
pub struct TreeScanner {
    follow_links: bool,
}

impl TreeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow symbolic links. Links that point back at an ancestor are
    /// reported as [`DiagnosticKind::SymlinkLoop`] and skipped.
    ///
    /// Followed links never add nodes. A target outside the root is
    /// reported as [`DiagnosticKind::OutsideRoot`]; a target inside the root
    /// is already reached by the walk itself.
    pub fn follow_links(mut self, yes: bool) -> Self {
        self.follow_links = yes;
        self
    }

    pub fn scan(&self, root: &Path, cancel: &CancelToken) -> ScanOutcome {
        let mut tree = FileTree::new(root.to_path_buf());
        let mut diagnostics = Vec::new();
        let mut cancelled = false;

        let canonical_root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let mut walker = WalkDir::new(root)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter();

        loop {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let entry = match walker.next() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    let diagnostic = ScanDiagnostic::from_walk_error(&err);
                    warn!(kind = ?diagnostic.kind, "{}", diagnostic);
                    diagnostics.push(diagnostic);
                    continue;
                }
            };

            let file_type = entry.file_type();
            if self.follow_links && entry.depth() > 0 && entry.path_is_symlink() {
                if file_type.is_dir() {
                    walker.skip_current_dir();
                }
                match fs::canonicalize(entry.path()) {
                    Ok(target) if target.starts_with(&canonical_root) => {
                        debug!(path = %entry.path().display(), "link into the root, target already scanned");
                    }
                    Ok(target) => {
                        let diagnostic = ScanDiagnostic {
                            path: Some(entry.path().to_path_buf()),
                            kind: DiagnosticKind::OutsideRoot,
                            message: format!("link resolves outside the root to {}", target.display()),
                        };
                        warn!(kind = ?diagnostic.kind, "{}", diagnostic);
                        diagnostics.push(diagnostic);
                    }
                    Err(e) => {
                        let diagnostic = ScanDiagnostic {
                            path: Some(entry.path().to_path_buf()),
                            kind: match e.kind() {
                                io::ErrorKind::PermissionDenied => DiagnosticKind::PermissionDenied,
                                io::ErrorKind::NotFound => DiagnosticKind::Vanished,
                                _ => DiagnosticKind::Other,
                            },
                            message: e.to_string(),
                        };
                        warn!(kind = ?diagnostic.kind, "{}", diagnostic);
                        diagnostics.push(diagnostic);
                    }
                }
                continue;
            }
            if file_type.is_symlink() {
                debug!(path = %entry.path().display(), "skipping symbolic link");
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    let diagnostic = ScanDiagnostic::from_walk_error(&err);
                    warn!(kind = ?diagnostic.kind, "{}", diagnostic);
                    diagnostics.push(diagnostic);
                    if file_type.is_dir() {
                        walker.skip_current_dir();
                    }
                    continue;
                }
            };

            let parent = if entry.depth() == 0 {
                None
            } else {
                match entry.path().parent().and_then(|p| tree.find(p)) {
                    Some(parent) => Some(parent),
                    None => {
                        debug!(path = %entry.path().display(), "parent not in tree, skipping");
                        continue;
                    }
                }
            };

            tree.insert(FileNode {
                path: entry.path().to_path_buf(),
                is_directory: metadata.is_dir(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
                modified: metadata.modified().ok().map(DateTime::<Local>::from),
                depth: entry.depth(),
                protection: None,
                parent,
                children: Vec::new(),
            });
        }

        info!(
            root = %root.display(),
            nodes = tree.len(),
            files = tree.file_count(),
            diagnostics = diagnostics.len(),
            cancelled,
            "scan finished"
        );

        ScanOutcome {
            tree,
            diagnostics,
            cancelled,
        }
    }
}

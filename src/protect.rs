//! Root protection.
//!
//! A directory that directly contains a marker (a VCS directory, a build
//! manifest, a camera folder, a VM disk, ...) is treated as a self-contained
//! root: it and everything beneath it keeps its layout. Filter-excluded files,
//! hidden directories and treetidy's own state files are protected too.

use crate::config::{CompiledFilters, ConfigError, ProtectionPolicy, LOCAL_PROFILE_NAME};
use crate::scanner::{FileTree, NodeId, Protection};
use crate::undo::JOURNAL_FILE_NAME;
use glob::{MatchOptions, Pattern};
use std::path::PathBuf;
use tracing::{debug, info};

/// What kind of self-contained root a marker identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    Project,
    Media,
    VirtualMachine,
    Game,
    Backup,
    Custom,
}

impl RootKind {
    pub fn label(&self) -> &'static str {
        match self {
            RootKind::Project => "project",
            RootKind::Media => "media",
            RootKind::VirtualMachine => "virtual machine",
            RootKind::Game => "game",
            RootKind::Backup => "backup",
            RootKind::Custom => "custom",
        }
    }
}

const BUILTIN_MARKERS: &[(&str, RootKind)] = &[
    (".git", RootKind::Project),
    (".hg", RootKind::Project),
    (".svn", RootKind::Project),
    ("Cargo.toml", RootKind::Project),
    ("Cargo.lock", RootKind::Project),
    ("package.json", RootKind::Project),
    ("package-lock.json", RootKind::Project),
    ("yarn.lock", RootKind::Project),
    ("node_modules", RootKind::Project),
    ("pyproject.toml", RootKind::Project),
    ("setup.py", RootKind::Project),
    ("requirements.txt", RootKind::Project),
    ("Pipfile", RootKind::Project),
    ("pom.xml", RootKind::Project),
    ("build.gradle", RootKind::Project),
    ("CMakeLists.txt", RootKind::Project),
    ("Makefile", RootKind::Project),
    ("go.mod", RootKind::Project),
    ("Gemfile", RootKind::Project),
    ("composer.json", RootKind::Project),
    ("*.sln", RootKind::Project),
    ("*.xcodeproj", RootKind::Project),
    ("DCIM", RootKind::Media),
    (".nomedia", RootKind::Media),
    ("*.vbox", RootKind::VirtualMachine),
    ("*.vmx", RootKind::VirtualMachine),
    ("*.vmdk", RootKind::VirtualMachine),
    ("*.vdi", RootKind::VirtualMachine),
    ("steamapps", RootKind::Game),
    (".backup", RootKind::Backup),
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A directory protected because of the markers it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedRoot {
    pub path: PathBuf,
    pub kind: RootKind,
    /// Names of the entries that matched a marker.
    pub markers: Vec<String>,
}

#[derive(Debug)]
struct Marker {
    pattern: Pattern,
    kind: RootKind,
}

/// Tags protected nodes of a scanned tree.
#[derive(Debug)]
pub struct RootProtector {
    enabled: bool,
    markers: Vec<Marker>,
    filters: CompiledFilters,
}

impl RootProtector {
    pub fn new(policy: &ProtectionPolicy, filters: CompiledFilters) -> Result<Self, ConfigError> {
        let mut markers = BUILTIN_MARKERS
            .iter()
            .map(|(raw, kind)| {
                Pattern::new(raw)
                    .map(|pattern| Marker {
                        pattern,
                        kind: *kind,
                    })
                    .map_err(|_| ConfigError::InvalidGlobPattern(raw.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for raw in &policy.extra_markers {
            let pattern =
                Pattern::new(raw).map_err(|_| ConfigError::InvalidGlobPattern(raw.clone()))?;
            markers.push(Marker {
                pattern,
                kind: RootKind::Custom,
            });
        }

        Ok(Self {
            enabled: policy.enabled,
            markers,
            filters,
        })
    }

    /// Mark protected nodes in place and report the marker roots found.
    ///
    /// Nested marker roots inside an already protected root are not
    /// reported separately.
    pub fn protect(&self, tree: &mut FileTree) -> Vec<ProtectedRoot> {
        let mut roots = Vec::new();
        let ids: Vec<NodeId> = tree.ids().collect();

        for id in ids {
            let node = tree.get(id);
            if node.is_protected() {
                continue;
            }

            if node.is_directory {
                if self.enabled
                    && let Some(root) = self.marker_root(tree, id)
                {
                    let marked = tree.protect_subtree(id, Protection::Root(root.kind));
                    info!(
                        path = %root.path.display(),
                        kind = root.kind.label(),
                        markers = ?root.markers,
                        nodes = marked,
                        "protected root"
                    );
                    roots.push(root);
                    continue;
                }

                if id != tree.root_id() && self.filters.is_hidden_dir(tree.relative(id)) {
                    let marked = tree.protect_subtree(id, Protection::Hidden);
                    debug!(path = %tree.get(id).path.display(), nodes = marked, "hidden directory");
                }
                continue;
            }

            if node.depth == 1 && is_internal_file(&node.name()) {
                tree.protect_subtree(id, Protection::Internal);
            } else if !self.filters.should_include(tree.relative(id)) {
                debug!(path = %tree.get(id).path.display(), "filtered");
                tree.protect_subtree(id, Protection::Filtered);
            }
        }

        roots
    }

    fn marker_root(&self, tree: &FileTree, dir: NodeId) -> Option<ProtectedRoot> {
        let mut kind = None;
        let mut markers = Vec::new();

        for child in &tree.get(dir).children {
            let name = tree.get(*child).name();
            if let Some(marker) = self
                .markers
                .iter()
                .find(|m| m.pattern.matches_with(&name, MATCH_OPTIONS))
            {
                kind.get_or_insert(marker.kind);
                markers.push(name);
            }
        }

        kind.map(|kind| ProtectedRoot {
            path: tree.get(dir).path.clone(),
            kind,
            markers,
        })
    }
}

fn is_internal_file(name: &str) -> bool {
    name == LOCAL_PROFILE_NAME || name.starts_with(JOURNAL_FILE_NAME)
}

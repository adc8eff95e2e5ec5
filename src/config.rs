//! Organization profile loading and file filtering.
//!
//! A [`Profile`] bundles every tunable the pipeline consumes: filter rules,
//! extension overrides for the rule classifier, root protection markers and
//! the semantic, placement and execution policies. Profiles are stored as
//! TOML; every section and field is optional and falls back to a default.
//!
//! # Configuration File Format
//!
//! ```toml
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["*.tmp", "node_modules/**"]
//! extensions = ["bak", "tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//!
//! [rules.extensions]
//! xyz = "document"
//!
//! [[rules.custom]]
//! name = "Screenshots"
//! category = "image"
//! name_patterns = ["screenshot", "screen shot"]
//! max_size_bytes = 20_000_000
//!
//! [protection]
//! enabled = true
//! extra_markers = ["KEEP_OUT"]
//!
//! [semantic]
//! enabled = true
//! similarity_threshold = 0.65
//! min_group_size = 2
//!
//! [placement]
//! max_depth = 4
//! min_folder_population = 2
//! date_granularity = "month"
//! unclassified = "uncategorized"
//!
//! [execution]
//! conflict = "rename"
//! progress_interval = 10
//! journal_capacity = 10
//! ```

use crate::file_category::Category;
use glob::Pattern;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Name of the project-local profile file.
pub const LOCAL_PROFILE_NAME: &str = ".treetidyrc.toml";

/// Operating system metadata files that are never organized, compared
/// case-insensitively. `.DS_Store` is also hidden.
pub const SYSTEM_FILE_NAMES: &[&str] = &["desktop.ini", "thumbs.db", ".ds_store"];

/// Errors that can occur while loading or compiling a profile.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// A policy value is outside its accepted range.
    #[error("Invalid policy value for {field}: {reason}")]
    InvalidPolicy {
        field: &'static str,
        reason: String,
    },
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Everything the organization pipeline can be tuned with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub filters: FilterRules,
    pub rules: RuleOverrides,
    pub protection: ProtectionPolicy,
    pub semantic: SemanticPolicy,
    pub placement: PlacementPolicy,
    pub execution: ExecutionPolicy,
}

/// Root-level filter rules configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRules {
    /// Whether to organize hidden files (starting with "."). Defaults to false.
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    pub include: IncludeRules,
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., ".DS_Store", "Thumbs.db").
    pub filenames: Vec<String>,

    /// Glob patterns to exclude (e.g., "*.tmp", "node_modules/**").
    pub patterns: Vec<String>,

    /// File extensions to exclude (e.g., "bak", "tmp", "log").
    pub extensions: Vec<String>,

    /// Regex patterns matched against the file name.
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    pub patterns: Vec<String>,
}

/// Classification overrides layered on top of the built-in rule table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOverrides {
    /// Extension (without the dot) to category.
    pub extensions: BTreeMap<String, Category>,
    /// Named rules checked before the extension table, first match wins.
    pub custom: Vec<CustomRule>,
}

/// A named classification rule.
///
/// Every condition that is set must hold. `name_patterns` are regexes
/// searched case-insensitively in the file name; one match is enough.
/// The rule name becomes the type folder of matching files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRule {
    pub name: String,
    pub category: Category,
    #[serde(default)]
    pub name_patterns: Vec<String>,
    /// Extensions without the dot.
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub min_size_bytes: Option<u64>,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

impl CustomRule {
    /// Compile `name_patterns`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRegexPattern`] for the first pattern
    /// that does not compile.
    pub fn compile_patterns(&self) -> Result<Vec<Regex>, ConfigError> {
        self.name_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ConfigError::InvalidRegexPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPolicy {
            field: "rules.custom",
            reason,
        };

        let valid_name = !self.name.trim().is_empty()
            && self.name != "."
            && self.name != ".."
            && !self.name.contains(['/', '\\']);
        if !valid_name {
            return Err(invalid(format!("'{}' is not a usable folder name", self.name)));
        }
        if self.category == Category::Unclassified {
            return Err(invalid(format!(
                "rule '{}' must name a real category",
                self.name
            )));
        }
        if self.name_patterns.is_empty()
            && self.extensions.is_empty()
            && self.min_size_bytes.is_none()
            && self.max_size_bytes.is_none()
        {
            return Err(invalid(format!("rule '{}' has no conditions", self.name)));
        }
        if let (Some(min), Some(max)) = (self.min_size_bytes, self.max_size_bytes)
            && min > max
        {
            return Err(invalid(format!(
                "rule '{}' has min_size_bytes {min} above max_size_bytes {max}",
                self.name
            )));
        }
        self.compile_patterns()?;
        Ok(())
    }
}

/// Root protection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionPolicy {
    /// Disable only for trees known to contain no projects.
    pub enabled: bool,
    /// Additional marker names or `*.ext` globs that protect their directory.
    pub extra_markers: Vec<String>,
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            extra_markers: Vec::new(),
        }
    }
}

/// Semantic grouping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticPolicy {
    pub enabled: bool,
    /// Two files are linked when their cosine similarity exceeds this value.
    pub similarity_threshold: f32,
    /// Clusters smaller than this are discarded.
    pub min_group_size: usize,
    /// Files classified below this confidence are always eligible.
    pub low_confidence: f32,
    /// Categories whose files are eligible regardless of confidence.
    pub groupable: Vec<Category>,
    /// Upper bound on the content excerpt read from text-bearing files.
    pub max_excerpt_bytes: usize,
}

impl Default for SemanticPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.65,
            min_group_size: 2,
            low_confidence: 0.5,
            groupable: vec![
                Category::Document,
                Category::Spreadsheet,
                Category::Presentation,
            ],
            max_excerpt_bytes: 512,
        }
    }
}

/// Granularity of the date bucket folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateGranularity {
    /// `2026-10`
    Month,
    /// `2026`
    Year,
    /// No date level.
    None,
}

/// What happens to files no rule could classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnclassifiedPolicy {
    /// Move into the `Uncategorized` bucket.
    Uncategorized,
    /// Leave the file where it is.
    LeaveInPlace,
}

/// Target path shaping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementPolicy {
    /// Maximum number of folder levels below the root.
    pub max_depth: usize,
    /// Folders that would hold fewer files are merged into their parent.
    pub min_folder_population: usize,
    pub date_granularity: DateGranularity,
    pub unclassified: UnclassifiedPolicy,
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self {
            max_depth: 4,
            min_folder_population: 2,
            date_granularity: DateGranularity::Month,
            unclassified: UnclassifiedPolicy::Uncategorized,
        }
    }
}

/// How destination name clashes are handled at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Append ` (1)`, ` (2)`, ... to the file stem.
    Rename,
    /// Leave the source untouched and record the entry as skipped.
    Skip,
}

/// Execution and journaling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    pub conflict: ConflictPolicy,
    /// Progress is reported every this many processed files.
    pub progress_interval: usize,
    /// Number of sealed batches kept in the undo journal.
    pub journal_capacity: usize,
    /// Byte cap for magic-number probing during classification.
    pub signature_probe_bytes: usize,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            conflict: ConflictPolicy::Rename,
            progress_interval: 10,
            journal_capacity: 10,
            signature_probe_bytes: 8192,
        }
    }
}

impl Profile {
    /// Load a profile, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.treetidyrc.toml` in the current directory
    /// 3. Look for `~/.config/treetidy/config.toml` in home directory
    /// 4. Fall back to the default profile
    ///
    /// # Errors
    ///
    /// Returns an error if a file is found but cannot be read, parsed or
    /// validated.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_PROFILE_NAME);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home)
                .join(".config")
                .join("treetidy")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Load a profile from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a profile from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let profile: Profile =
            toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reject policy values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let semantic = &self.semantic;
        if !(-1.0..=1.0).contains(&semantic.similarity_threshold) {
            return Err(ConfigError::InvalidPolicy {
                field: "semantic.similarity_threshold",
                reason: format!("{} is outside [-1, 1]", semantic.similarity_threshold),
            });
        }
        if semantic.min_group_size < 2 {
            return Err(ConfigError::InvalidPolicy {
                field: "semantic.min_group_size",
                reason: "a group needs at least 2 members".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&semantic.low_confidence) {
            return Err(ConfigError::InvalidPolicy {
                field: "semantic.low_confidence",
                reason: format!("{} is outside [0, 1]", semantic.low_confidence),
            });
        }
        if self.placement.max_depth == 0 {
            return Err(ConfigError::InvalidPolicy {
                field: "placement.max_depth",
                reason: "must allow at least the category level".to_string(),
            });
        }
        if self.placement.min_folder_population == 0 {
            return Err(ConfigError::InvalidPolicy {
                field: "placement.min_folder_population",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.execution.progress_interval == 0 {
            return Err(ConfigError::InvalidPolicy {
                field: "execution.progress_interval",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.execution.journal_capacity == 0 {
            return Err(ConfigError::InvalidPolicy {
                field: "execution.journal_capacity",
                reason: "the journal must keep at least one batch".to_string(),
            });
        }
        for rule in &self.rules.custom {
            rule.validate()?;
        }
        Ok(())
    }

    /// Compile the filter section into matchers.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(&self.filters)
    }
}

/// Compiled, optimized filter structures for efficient file matching.
///
/// All glob and regex patterns are parsed once so matching a file only walks
/// the rule lists.
#[derive(Debug)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let compile_globs = |patterns: &[String]| {
            patterns
                .iter()
                .map(|pattern| {
                    Pattern::new(pattern)
                        .map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
                })
                .collect::<Result<Vec<_>, _>>()
        };

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns: compile_globs(&rules.exclude.patterns)?,
            exclude_regexes,
            include_patterns: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Check if a file should be organized.
    ///
    /// `rel_path` is the file's path relative to the organization root.
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Operating system metadata files and exact filename match - if
    ///    matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, rel_path: &Path) -> bool {
        let file_name = rel_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self
            .include_patterns
            .iter()
            .any(|pattern| pattern.matches_path(rel_path))
        {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref())
            || SYSTEM_FILE_NAMES.contains(&file_name.to_lowercase().as_str())
        {
            return false;
        }

        if let Some(ext) = rel_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches_path(rel_path))
        {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }

    /// Whether a directory is hidden and hidden entries are disabled.
    pub fn is_hidden_dir(&self, rel_path: &Path) -> bool {
        !self.enable_hidden_files
            && rel_path.components().any(|c| match c {
                Component::Normal(name) => name.to_string_lossy().starts_with('.'),
                _ => false,
            })
    }
}

//! Semantic grouping of loosely classified files.
//!
//! Eligible files are described by their cleaned name (plus a short content
//! excerpt for text formats and PDFs), embedded, and linked whenever two descriptions
//! are more similar than the configured threshold. Connected components that
//! reach the minimum size become named groups.

use crate::config::SemanticPolicy;
use crate::embedding::{Embedder, cosine_similarity};
use crate::file_category::CategoryResult;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Read;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static NAME_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[()\[\]{}\d_\-.,+]+").expect("static regex"));

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "rst", "csv", "tsv", "log", "json", "xml", "html", "htm", "yaml",
    "yml", "toml", "ini", "tex",
];

/// PDFs larger than this are described by name only.
const MAX_PDF_BYTES: u64 = 16 * 1024 * 1024;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "file", "files", "copy", "new", "old", "final",
    "draft", "untitled", "document", "scan", "img", "image", "version", "backup", "temp", "tmp",
    "misc", "download", "downloads",
];

/// Files that fell into the same cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticGroup {
    pub label: String,
    /// Sorted by path.
    pub members: Vec<PathBuf>,
    pub threshold: f32,
    pub min_size: usize,
}

/// A file offered to the grouper together with its rule classification.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub path: &'a Path,
    pub classification: &'a CategoryResult,
}

/// Groups plus the files that were excluded along the way.
#[derive(Debug, Default)]
pub struct GroupingOutcome {
    pub groups: Vec<SemanticGroup>,
    pub diagnostics: Vec<String>,
}

impl GroupingOutcome {
    /// Group label per member path.
    pub fn labels(&self) -> HashMap<PathBuf, String> {
        self.groups
            .iter()
            .flat_map(|group| {
                group
                    .members
                    .iter()
                    .map(|member| (member.clone(), group.label.clone()))
            })
            .collect()
    }
}

pub struct SemanticGrouper<'a> {
    policy: &'a SemanticPolicy,
    embedder: &'a dyn Embedder,
}

impl<'a> SemanticGrouper<'a> {
    pub fn new(policy: &'a SemanticPolicy, embedder: &'a dyn Embedder) -> Self {
        Self { policy, embedder }
    }

    /// Whether a file takes part in grouping at all.
    pub fn is_eligible(&self, classification: &CategoryResult) -> bool {
        classification.confidence < self.policy.low_confidence
            || self.policy.groupable.contains(&classification.category)
    }

    pub fn group(&self, candidates: &[Candidate<'_>]) -> GroupingOutcome {
        let mut outcome = GroupingOutcome::default();

        let mut eligible: Vec<&Path> = candidates
            .iter()
            .filter(|c| self.is_eligible(c.classification))
            .map(|c| c.path)
            .collect();
        eligible.sort();
        eligible.dedup();

        let mut described = Vec::new();
        let mut descriptions = Vec::new();
        for path in eligible {
            match describe(path, self.policy.max_excerpt_bytes) {
                Ok(text) => {
                    described.push(path);
                    descriptions.push(text);
                }
                Err(reason) => {
                    debug!(path = %path.display(), %reason, "excluded from grouping");
                    outcome
                        .diagnostics
                        .push(format!("{}: {}", path.display(), reason));
                }
            }
        }

        if described.len() < self.policy.min_group_size {
            return outcome;
        }

        let results = match self.embedder.embed_batch(&descriptions) {
            Ok(results) => results,
            Err(e) => {
                warn!(backend = self.embedder.name(), error = %e, "embedding backend failed, skipping grouping");
                outcome.diagnostics.push(e.to_string());
                return outcome;
            }
        };

        let mut paths = Vec::new();
        let mut vectors = Vec::new();
        for (path, result) in described.into_iter().zip(results) {
            match result {
                Ok(vector) => {
                    paths.push(path);
                    vectors.push(vector);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "embedding failed");
                    outcome.diagnostics.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        let components = cluster(&vectors, self.policy.similarity_threshold);
        let mut used_labels = BTreeSet::new();
        for component in components {
            if component.len() < self.policy.min_group_size {
                continue;
            }
            let members: Vec<PathBuf> = component.iter().map(|&i| paths[i].to_path_buf()).collect();
            let label = unique_label(group_label(&members), &mut used_labels);
            debug!(%label, members = members.len(), "semantic group");
            outcome.groups.push(SemanticGroup {
                label,
                members,
                threshold: self.policy.similarity_threshold,
                min_size: self.policy.min_group_size,
            });
        }

        info!(
            backend = self.embedder.name(),
            embedded = vectors.len(),
            groups = outcome.groups.len(),
            "semantic grouping finished"
        );
        outcome
    }
}

/// Cleaned, lower-cased file stem, e.g. `Cover_Letter (2)` becomes
/// `cover letter`.
pub fn clean_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    NAME_NOISE
        .replace_all(&stem, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Text handed to the embedder for one file.
pub fn describe(path: &Path, max_excerpt: usize) -> Result<String, String> {
    let mut description = clean_stem(path);

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());

    let content = match ext.as_deref() {
        _ if max_excerpt == 0 => None,
        Some(ext) if TEXT_EXTENSIONS.contains(&ext) => Some(text_excerpt(path, max_excerpt)?),
        Some("pdf") => pdf_text(path),
        _ => None,
    };

    if let Some(content) = content {
        let excerpt = truncate_at_char(&content, max_excerpt)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if !excerpt.is_empty() {
            if !description.is_empty() {
                description.push(' ');
            }
            description.push_str(&excerpt);
        }
    }

    if description.is_empty() {
        return Err("nothing to describe".to_string());
    }
    Ok(description)
}

fn text_excerpt(path: &Path, max_excerpt: usize) -> Result<String, String> {
    let mut buf = Vec::new();
    File::open(path)
        .and_then(|f| f.take(max_excerpt as u64).read_to_end(&mut buf))
        .map_err(|e| format!("cannot read excerpt: {e}"))?;

    match String::from_utf8(buf) {
        Ok(text) => Ok(text),
        // The cap may split a multi-byte character at the very end.
        Err(e) if e.utf8_error().error_len().is_none() => {
            let valid = e.utf8_error().valid_up_to();
            let mut buf = e.into_bytes();
            buf.truncate(valid);
            String::from_utf8(buf).map_err(|e| e.to_string())
        }
        Err(_) => Err("content is not valid UTF-8".to_string()),
    }
}

/// Extracted PDF text, or `None` when the document cannot be read. A
/// broken PDF still gets described by its name.
fn pdf_text(path: &Path) -> Option<String> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.len() <= MAX_PDF_BYTES => {}
        Ok(metadata) => {
            debug!(path = %path.display(), size = metadata.len(), "pdf too large for text extraction");
            return None;
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "pdf metadata unavailable");
            return None;
        }
    }

    // The parser panics on some malformed documents.
    match panic::catch_unwind(|| pdf_extract::extract_text(path)) {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            debug!(path = %path.display(), error = ?e, "pdf text unavailable");
            None
        }
        Err(_) => {
            debug!(path = %path.display(), "pdf parser panicked");
            None
        }
    }
}

fn truncate_at_char(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Connected components over pairs whose similarity exceeds `threshold`.
/// Components are returned in order of their smallest index.
fn cluster(vectors: &[Vec<f32>], threshold: f32) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..vectors.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..vectors.len() {
        for j in (i + 1)..vectors.len() {
            if cosine_similarity(&vectors[i], &vectors[j]) > threshold {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }
    }

    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..vectors.len() {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(i);
    }
    components.into_values().collect()
}

/// Most frequent meaningful token across member names, counted once per
/// member. Ties resolve alphabetically.
fn group_label(members: &[PathBuf]) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for member in members {
        let tokens: BTreeSet<String> = clean_stem(member)
            .split_whitespace()
            .filter(|t| t.chars().count() >= 3)
            .filter(|t| !t.chars().all(|c| c.is_numeric()))
            .filter(|t| !STOPWORDS.contains(t))
            .map(str::to_string)
            .collect();
        for token in tokens {
            *counts.entry(token).or_default() += 1;
        }
    }

    // BTreeMap iterates alphabetically, so the first maximum wins ties.
    let best = counts
        .iter()
        .fold(None::<(&String, usize)>, |best, (token, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((token, count)),
        });

    match best {
        Some((token, _)) => capitalize(token),
        None => format!("{} Files", dominant_extension(members)),
    }
}

fn dominant_extension(members: &[PathBuf]) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for member in members {
        let ext = member
            .extension()
            .map(|e| e.to_string_lossy().to_uppercase())
            .unwrap_or_else(|| "Misc".to_string());
        *counts.entry(ext).or_default() += 1;
    }
    counts
        .iter()
        .fold(None::<(&String, usize)>, |best, (ext, &count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((ext, count)),
        })
        .map(|(ext, _)| ext.clone())
        .unwrap_or_else(|| "Misc".to_string())
}

fn unique_label(label: String, used: &mut BTreeSet<String>) -> String {
    let mut candidate = label.clone();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{label} {n}");
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

//! Rule-based file classification.
//!
//! Named custom rules from the profile are checked first, then the
//! extension table. Files whose extension is missing or unknown get a
//! bounded magic-number probe, and anything left over is unclassified with
//! confidence 0.
//!
//! # Examples
//!
//! ```
//! use treetidy::file_category::{Category, RuleClassifier};
//!
//! let classifier = RuleClassifier::default();
//! assert_eq!(classifier.extension_to_category("png"), Some(Category::Image));
//! assert_eq!(classifier.mime_to_category("audio/mpeg"), Some(Category::Audio));
//! assert_eq!(classifier.extension_to_category("xyz"), None);
//! ```

use crate::config::{ConfigError, CustomRule, RuleOverrides};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Confidence assigned to a custom profile rule hit.
pub const CUSTOM_RULE_CONFIDENCE: f32 = 0.95;
/// Confidence assigned to an extension table hit.
pub const EXTENSION_CONFIDENCE: f32 = 0.9;
/// Confidence assigned to a content signature hit.
pub const SIGNATURE_CONFIDENCE: f32 = 0.8;

/// Represents a broad file category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Image files (PNG, JPG, GIF, etc.)
    Image,
    /// Audio files (MP3, WAV, FLAC, etc.)
    Audio,
    /// Video files (MP4, MKV, AVI, etc.)
    Video,
    /// Document files (PDF, DOCX, TXT, etc.)
    Document,
    /// Archive files (ZIP, RAR, 7Z, etc.)
    Archive,
    /// Code/Source files (Rust, Python, JavaScript, etc.)
    Code,
    /// Spreadsheet files (XLSX, CSV, ODS, etc.)
    Spreadsheet,
    /// Presentation files (PPTX, ODP, etc.)
    Presentation,
    /// Font files (TTF, OTF, WOFF, etc.)
    Font,
    /// Installers and disk images (EXE, MSI, DMG, etc.)
    Installer,
    /// Electronic books (EPUB, MOBI, etc.)
    Ebook,
    /// No rule matched.
    Unclassified,
}

impl Category {
    /// Returns the folder name for this category.
    ///
    /// # Examples
    ///
    /// ```
    /// use treetidy::file_category::Category;
    ///
    /// assert_eq!(Category::Image.dir_name(), "Images");
    /// assert_eq!(Category::Unclassified.dir_name(), "Uncategorized");
    /// ```
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Image => "Images",
            Category::Audio => "Audio",
            Category::Video => "Videos",
            Category::Document => "Documents",
            Category::Archive => "Archives",
            Category::Code => "Code",
            Category::Spreadsheet => "Spreadsheets",
            Category::Presentation => "Presentations",
            Category::Font => "Fonts",
            Category::Installer => "Installers",
            Category::Ebook => "eBooks",
            Category::Unclassified => "Uncategorized",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Which rule produced a classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchedRule {
    /// Named profile rule.
    Custom(String),
    /// Extension table entry, lower-cased.
    Extension(String),
    /// Content signature, as the detected MIME type.
    Signature(String),
    None,
}

impl fmt::Display for MatchedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchedRule::Custom(name) => write!(f, "rule '{name}'"),
            MatchedRule::Extension(ext) => write!(f, "extension .{ext}"),
            MatchedRule::Signature(mime) => write!(f, "signature {mime}"),
            MatchedRule::None => write!(f, "no rule"),
        }
    }
}

/// Per-file outcome of classification.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryResult {
    pub category: Category,
    /// Finer grained type, e.g. `PDF`.
    pub subtype: Option<String>,
    /// In `[0, 1]`; 0 means unclassified.
    pub confidence: f32,
    pub rule: MatchedRule,
}

impl CategoryResult {
    pub fn unclassified() -> Self {
        Self {
            category: Category::Unclassified,
            subtype: None,
            confidence: 0.0,
            rule: MatchedRule::None,
        }
    }

    pub fn is_classified(&self) -> bool {
        self.confidence > 0.0
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    category: Category,
    patterns: Vec<Regex>,
    extensions: Vec<String>,
    min_size: Option<u64>,
    max_size: Option<u64>,
}

impl CompiledRule {
    fn matches(&self, path: &Path, ext: Option<&str>) -> bool {
        if !self.extensions.is_empty() && !ext.is_some_and(|e| self.extensions.iter().any(|x| x == e)) {
            return false;
        }

        if !self.patterns.is_empty() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy())
                .unwrap_or_default();
            if !self.patterns.iter().any(|p| p.is_match(&name)) {
                return false;
            }
        }

        if self.min_size.is_some() || self.max_size.is_some() {
            let size = match fs::metadata(path) {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "size unavailable for custom rule");
                    return false;
                }
            };
            if self.min_size.is_some_and(|min| size < min) || self.max_size.is_some_and(|max| size > max) {
                return false;
            }
        }
        true
    }
}

/// Maps custom rules, extensions and content signatures to categories.
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    custom: Vec<CompiledRule>,
    mime_map: HashMap<String, Category>,
    extension_map: HashMap<String, Category>,
    probe_bytes: usize,
}

impl RuleClassifier {
    /// Standard tables with the profile's extension overrides applied.
    pub fn new(overrides: &RuleOverrides, probe_bytes: usize) -> Self {
        let mut classifier = Self {
            custom: Vec::new(),
            mime_map: HashMap::new(),
            extension_map: HashMap::new(),
            probe_bytes,
        };
        classifier.populate_standard_mappings();
        for (ext, category) in &overrides.extensions {
            classifier.add_extension_mapping(ext.trim_start_matches('.'), *category);
        }
        classifier
    }

    fn populate_standard_mappings(&mut self) {
        const MIMES: &[(&str, Category)] = &[
            ("image/png", Category::Image),
            ("image/jpeg", Category::Image),
            ("image/gif", Category::Image),
            ("image/webp", Category::Image),
            ("image/bmp", Category::Image),
            ("image/tiff", Category::Image),
            ("image/heif", Category::Image),
            ("image/x-icon", Category::Image),
            ("audio/mpeg", Category::Audio),
            ("audio/x-wav", Category::Audio),
            ("audio/ogg", Category::Audio),
            ("audio/x-flac", Category::Audio),
            ("audio/aac", Category::Audio),
            ("audio/m4a", Category::Audio),
            ("video/mp4", Category::Video),
            ("video/quicktime", Category::Video),
            ("video/x-msvideo", Category::Video),
            ("video/x-matroska", Category::Video),
            ("video/webm", Category::Video),
            ("video/x-flv", Category::Video),
            ("application/pdf", Category::Document),
            ("application/rtf", Category::Document),
            ("application/msword", Category::Document),
            (
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                Category::Document,
            ),
            ("application/vnd.oasis.opendocument.text", Category::Document),
            ("application/zip", Category::Archive),
            ("application/vnd.rar", Category::Archive),
            ("application/x-7z-compressed", Category::Archive),
            ("application/x-tar", Category::Archive),
            ("application/gzip", Category::Archive),
            ("application/x-bzip2", Category::Archive),
            ("application/x-xz", Category::Archive),
            ("application/vnd.ms-excel", Category::Spreadsheet),
            (
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                Category::Spreadsheet,
            ),
            ("application/vnd.ms-powerpoint", Category::Presentation),
            (
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                Category::Presentation,
            ),
            ("font/ttf", Category::Font),
            ("font/otf", Category::Font),
            ("font/woff", Category::Font),
            ("font/woff2", Category::Font),
            ("application/vnd.microsoft.portable-executable", Category::Installer),
            ("application/x-msdownload", Category::Installer),
            ("application/x-apple-diskimage", Category::Installer),
            ("application/vnd.debian.binary-package", Category::Installer),
            ("application/x-rpm", Category::Installer),
            ("application/epub+zip", Category::Ebook),
            ("application/x-mobipocket-ebook", Category::Ebook),
        ];

        const EXTENSIONS: &[(&str, Category)] = &[
            ("png", Category::Image),
            ("jpg", Category::Image),
            ("jpeg", Category::Image),
            ("gif", Category::Image),
            ("webp", Category::Image),
            ("svg", Category::Image),
            ("bmp", Category::Image),
            ("tif", Category::Image),
            ("tiff", Category::Image),
            ("ico", Category::Image),
            ("heic", Category::Image),
            ("raw", Category::Image),
            ("mp3", Category::Audio),
            ("wav", Category::Audio),
            ("ogg", Category::Audio),
            ("flac", Category::Audio),
            ("aac", Category::Audio),
            ("m4a", Category::Audio),
            ("wma", Category::Audio),
            ("mp4", Category::Video),
            ("mkv", Category::Video),
            ("avi", Category::Video),
            ("mov", Category::Video),
            ("flv", Category::Video),
            ("wmv", Category::Video),
            ("webm", Category::Video),
            ("3gp", Category::Video),
            ("pdf", Category::Document),
            ("txt", Category::Document),
            ("doc", Category::Document),
            ("docx", Category::Document),
            ("html", Category::Document),
            ("htm", Category::Document),
            ("md", Category::Document),
            ("rtf", Category::Document),
            ("odt", Category::Document),
            ("tex", Category::Document),
            ("zip", Category::Archive),
            ("rar", Category::Archive),
            ("7z", Category::Archive),
            ("tar", Category::Archive),
            ("gz", Category::Archive),
            ("bz2", Category::Archive),
            ("xz", Category::Archive),
            ("py", Category::Code),
            ("java", Category::Code),
            ("c", Category::Code),
            ("cpp", Category::Code),
            ("h", Category::Code),
            ("hpp", Category::Code),
            ("js", Category::Code),
            ("ts", Category::Code),
            ("rs", Category::Code),
            ("go", Category::Code),
            ("sh", Category::Code),
            ("bash", Category::Code),
            ("json", Category::Code),
            ("xml", Category::Code),
            ("yaml", Category::Code),
            ("yml", Category::Code),
            ("toml", Category::Code),
            ("csv", Category::Spreadsheet),
            ("xls", Category::Spreadsheet),
            ("xlsx", Category::Spreadsheet),
            ("ods", Category::Spreadsheet),
            ("ppt", Category::Presentation),
            ("pptx", Category::Presentation),
            ("odp", Category::Presentation),
            ("key", Category::Presentation),
            ("ttf", Category::Font),
            ("otf", Category::Font),
            ("woff", Category::Font),
            ("woff2", Category::Font),
            ("exe", Category::Installer),
            ("msi", Category::Installer),
            ("dmg", Category::Installer),
            ("pkg", Category::Installer),
            ("deb", Category::Installer),
            ("rpm", Category::Installer),
            ("appimage", Category::Installer),
            ("epub", Category::Ebook),
            ("mobi", Category::Ebook),
            ("azw3", Category::Ebook),
            ("fb2", Category::Ebook),
        ];

        for (mime, category) in MIMES {
            self.add_mime_mapping(mime, *category);
        }
        for (ext, category) in EXTENSIONS {
            self.add_extension_mapping(ext, *category);
        }
    }

    /// Add the profile's named rules, checked in order before the tables.
    ///
    /// # Errors
    ///
    /// Returns an error if a name pattern is not a valid regex.
    pub fn with_custom_rules(mut self, rules: &[CustomRule]) -> Result<Self, ConfigError> {
        for rule in rules {
            self.custom.push(CompiledRule {
                name: rule.name.clone(),
                category: rule.category,
                patterns: rule.compile_patterns()?,
                extensions: rule
                    .extensions
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect(),
                min_size: rule.min_size_bytes,
                max_size: rule.max_size_bytes,
            });
        }
        Ok(self)
    }

    /// Adds a MIME type to category mapping.
    pub fn add_mime_mapping(&mut self, mime: &str, category: Category) {
        self.mime_map.insert(mime.to_lowercase(), category);
    }

    /// Adds a file extension to category mapping.
    pub fn add_extension_mapping(&mut self, ext: &str, category: Category) {
        self.extension_map.insert(ext.to_lowercase(), category);
    }

    pub fn mime_to_category(&self, mime_type: &str) -> Option<Category> {
        self.mime_map.get(&mime_type.to_lowercase()).copied()
    }

    pub fn extension_to_category(&self, ext: &str) -> Option<Category> {
        self.extension_map.get(&ext.to_lowercase()).copied()
    }

    /// Classify one file. Never fails; unreadable files are unclassified.
    ///
    /// ```
    /// use treetidy::config::CustomRule;
    /// use treetidy::file_category::{Category, MatchedRule, RuleClassifier};
    /// use std::path::Path;
    ///
    /// let rule = CustomRule {
    ///     name: "Screenshots".to_string(),
    ///     category: Category::Image,
    ///     name_patterns: vec!["screen ?shot".to_string()],
    ///     extensions: Vec::new(),
    ///     min_size_bytes: None,
    ///     max_size_bytes: None,
    /// };
    /// let classifier = RuleClassifier::default().with_custom_rules(&[rule]).unwrap();
    /// let result = classifier.classify(Path::new("Screenshot 2026-10-01.png"));
    /// assert_eq!(result.rule, MatchedRule::Custom("Screenshots".to_string()));
    /// ```
    pub fn classify(&self, path: &Path) -> CategoryResult {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .filter(|e| !e.is_empty());

        if let Some(rule) = self.custom.iter().find(|r| r.matches(path, ext.as_deref())) {
            return CategoryResult {
                category: rule.category,
                subtype: Some(rule.name.clone()),
                confidence: CUSTOM_RULE_CONFIDENCE,
                rule: MatchedRule::Custom(rule.name.clone()),
            };
        }

        if let Some(ext) = &ext
            && let Some(category) = self.extension_to_category(ext)
        {
            return CategoryResult {
                category,
                subtype: Some(ext.to_uppercase()),
                confidence: EXTENSION_CONFIDENCE,
                rule: MatchedRule::Extension(ext.clone()),
            };
        }

        match self.probe_signature(path) {
            Some((category, kind)) => CategoryResult {
                category,
                subtype: Some(kind.extension().to_uppercase()),
                confidence: SIGNATURE_CONFIDENCE,
                rule: MatchedRule::Signature(kind.mime_type().to_string()),
            },
            None => CategoryResult::unclassified(),
        }
    }

    fn probe_signature(&self, path: &Path) -> Option<(Category, infer::Type)> {
        if self.probe_bytes == 0 {
            return None;
        }

        let mut header = Vec::with_capacity(self.probe_bytes.min(8192));
        let read = File::open(path)
            .and_then(|file| file.take(self.probe_bytes as u64).read_to_end(&mut header));
        if let Err(e) = read {
            debug!(path = %path.display(), error = %e, "signature probe failed");
            return None;
        }

        let kind = infer::get(&header)?;
        let category = self
            .mime_to_category(kind.mime_type())
            .or_else(|| matcher_category(kind.matcher_type()))?;
        Some((category, kind))
    }
}

fn matcher_category(matcher: infer::MatcherType) -> Option<Category> {
    use infer::MatcherType;
    match matcher {
        MatcherType::Image => Some(Category::Image),
        MatcherType::Audio => Some(Category::Audio),
        MatcherType::Video => Some(Category::Video),
        MatcherType::Archive => Some(Category::Archive),
        MatcherType::Doc => Some(Category::Document),
        MatcherType::Book => Some(Category::Ebook),
        MatcherType::Font => Some(Category::Font),
        MatcherType::App => Some(Category::Installer),
        _ => None,
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new(&RuleOverrides::default(), 8192)
    }
}

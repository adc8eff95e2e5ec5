/// Integration tests for treetidy
///
/// These tests drive the whole pipeline against real temporary directory
/// trees: scanning, protection, classification, semantic grouping,
/// placement, execution and undo.
///
/// Test categories:
/// 1. Rule-based organization and placement shaping
/// 2. Semantic grouping
/// 3. Root protection and filtering
/// 4. Execution failures and conflicts
/// 5. Undo, history and idempotence
/// 6. CLI entry points and error scenarios
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use treetidy::cli::{OrganizeCommand, run_cli_with_config};
use treetidy::config::{DateGranularity, Profile};
use treetidy::error::EmbeddingError;
use treetidy::pipeline::{CancelToken, Mode, Pipeline, PipelineRun, Progress};
use treetidy::placement::DecisionSource;
use treetidy::protect::RootKind;
use treetidy::scanner::DiagnosticKind;
use treetidy::undo::{JOURNAL_FILE_NAME, Outcome, UndoJournal};
use treetidy::{Embedder, Executor, OrganizeError};

// ============================================================================
// Test Utilities
// ============================================================================

/// A temporary directory tree to organize.
struct TestFixture {
    _temp_dir: TempDir,
    root: PathBuf,
}

impl TestFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        // Decisions carry canonical paths; compare against the same form.
        let root = fs::canonicalize(temp_dir.path()).expect("Failed to canonicalize");
        TestFixture {
            _temp_dir: temp_dir,
            root,
        }
    }

    fn path(&self) -> &Path {
        &self.root
    }

    /// Create a file (and its parent directories) with content.
    fn create_file(&self, rel_path: &str, content: &[u8]) {
        let file_path = self.path().join(rel_path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        let mut file = File::create(&file_path).expect("Failed to create file");
        file.write_all(content)
            .expect("Failed to write file content");
    }

    fn create_text_file(&self, rel_path: &str, content: &str) {
        self.create_file(rel_path, content.as_bytes());
    }

    fn create_subdir(&self, rel_path: &str) {
        fs::create_dir_all(self.path().join(rel_path)).expect("Failed to create subdirectory");
    }

    fn assert_dir_exists(&self, rel_path: &str) {
        let path = self.path().join(rel_path);
        assert!(
            path.exists() && path.is_dir(),
            "Directory should exist: {}",
            path.display()
        );
    }

    fn assert_file_exists(&self, rel_path: &str) {
        let path = self.path().join(rel_path);
        assert!(
            path.exists() && path.is_file(),
            "File should exist: {}",
            path.display()
        );
    }

    fn assert_file_not_exists(&self, rel_path: &str) {
        let path = self.path().join(rel_path);
        assert!(!path.exists(), "File should not exist: {}", path.display());
    }

    /// Entries directly under the root, excluding the undo journal.
    fn top_level_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.path())
            .expect("Failed to read directory")
            .filter_map(|entry| entry.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name != JOURNAL_FILE_NAME)
            .collect();
        names.sort();
        names
    }

    fn preview(&self, pipeline: &Pipeline) -> PipelineRun {
        pipeline
            .run(self.path(), Mode::Preview, &mut |_| {})
            .expect("Preview failed")
    }

    fn execute(&self, pipeline: &Pipeline) -> PipelineRun {
        pipeline
            .run(self.path(), Mode::Execute, &mut |_| {})
            .expect("Execute failed")
    }
}

/// A profile without date folders so targets do not depend on the clock.
fn undated_profile() -> Profile {
    let mut profile = Profile::default();
    profile.placement.date_granularity = DateGranularity::None;
    profile
}

fn rule_pipeline() -> Pipeline {
    Pipeline::new(undated_profile()).without_semantic()
}

/// Relative target of the file called `name`.
fn target_of(run: &PipelineRun, name: &str) -> PathBuf {
    run.decisions
        .iter()
        .find(|d| d.source.file_name().is_some_and(|n| n == name))
        .map(|d| d.target.clone())
        .unwrap_or_else(|| panic!("no decision for {name}"))
}

/// Maps known descriptions onto fixed vectors.
struct StaticEmbedder;

impl Embedder for StaticEmbedder {
    fn name(&self) -> &str {
        "static"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains("resume") {
            Ok(vec![1.0, 0.0, 0.0])
        } else if text.contains("cover") {
            Ok(vec![0.78, 0.6258, 0.0])
        } else {
            Ok(vec![0.1, 0.03515, 0.9944])
        }
    }
}

const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];
const PDF_HEADER: &[u8] = b"%PDF-1.4";
const ZIP_HEADER: &[u8] = &[0x50, 0x4B, 0x03, 0x04];
const NOISE: &[u8] = &[0x13, 0x37, 0xAB, 0x01, 0x7E, 0x42, 0x99, 0x00, 0x5A];

// ============================================================================
// 1. Rule-based organization
// ============================================================================

#[test]
fn test_mixed_files_are_organized_by_category_and_type() {
    let fixture = TestFixture::new();
    fixture.create_file("a.png", PNG_HEADER);
    fixture.create_file("b.png", PNG_HEADER);
    fixture.create_file("c.jpg", JPEG_HEADER);
    fixture.create_file("bundle.zip", ZIP_HEADER);

    let run = fixture.execute(&rule_pipeline());
    let summary = run.execution.as_ref().unwrap();
    assert!(summary.is_complete_success());
    assert_eq!(summary.succeeded.len(), 4);

    // Two PNGs keep their type folder, the lone JPG collapses into Images.
    fixture.assert_file_exists("Images/PNG/a.png");
    fixture.assert_file_exists("Images/PNG/b.png");
    fixture.assert_file_exists("Images/c.jpg");
    fixture.assert_file_exists("Archives/bundle.zip");
    fixture.assert_file_not_exists("a.png");
}

#[test]
fn test_signature_identifies_file_without_extension() {
    let fixture = TestFixture::new();
    fixture.create_file("scan", PDF_HEADER);

    let run = fixture.preview(&rule_pipeline());
    assert_eq!(target_of(&run, "scan"), PathBuf::from("Documents/scan"));
    assert!(run.decisions[0].reason.contains("signature"));
}

#[test]
fn test_unknown_bytes_go_to_uncategorized() {
    let fixture = TestFixture::new();
    fixture.create_file("data.xyz", NOISE);

    let run = fixture.execute(&rule_pipeline());
    let decision = &run.decisions[0];
    assert_eq!(decision.decision_source, DecisionSource::FallbackUnclassified);
    fixture.assert_file_exists("Uncategorized/data.xyz");
}

#[test]
fn test_leave_in_place_policy_keeps_unclassified_files() {
    let fixture = TestFixture::new();
    fixture.create_file("data.xyz", NOISE);
    let profile = Profile::from_toml(
        r#"
        [placement]
        date_granularity = "none"
        unclassified = "leave-in-place"
        "#,
    )
    .unwrap();

    let run = fixture.execute(&Pipeline::new(profile).without_semantic());
    assert_eq!(run.execution.as_ref().unwrap().total, 0);
    fixture.assert_file_exists("data.xyz");
}

#[test]
fn test_max_depth_limits_nesting() {
    let fixture = TestFixture::new();
    fixture.create_file("a.png", PNG_HEADER);
    fixture.create_file("b.png", PNG_HEADER);
    let profile = Profile::from_toml("[placement]\nmax_depth = 1\n").unwrap();

    let run = fixture.preview(&Pipeline::new(profile).without_semantic());
    assert_eq!(target_of(&run, "a.png"), PathBuf::from("Images/a.png"));
    assert_eq!(target_of(&run, "b.png"), PathBuf::from("Images/b.png"));
}

#[test]
fn test_preview_does_not_touch_the_tree() {
    let fixture = TestFixture::new();
    fixture.create_file("a.png", PNG_HEADER);
    fixture.create_file("report.pdf", PDF_HEADER);

    let run = fixture.preview(&rule_pipeline());
    assert_eq!(run.stats().will_move, 2);
    assert_eq!(fixture.top_level_names(), vec!["a.png", "report.pdf"]);
    fixture.assert_file_not_exists(JOURNAL_FILE_NAME);
}

#[test]
fn test_custom_rules_run_before_extension_table() {
    let fixture = TestFixture::new();
    fixture.create_file("Screenshot 2026-10-01.png", PNG_HEADER);
    fixture.create_file("Screen Shot 2026-10-02.png", PNG_HEADER);
    fixture.create_file("holiday.png", PNG_HEADER);
    fixture.create_file("beach.png", PNG_HEADER);
    fixture.create_file("huge.bin", &[0u8; 4096]);
    fixture.create_file("tiny.bin", &[0u8; 8]);
    let profile = Profile::from_toml(
        r#"
        [placement]
        date_granularity = "none"

        [[rules.custom]]
        name = "Screenshots"
        category = "image"
        name_patterns = ["^screen ?shot"]

        [[rules.custom]]
        name = "Dumps"
        category = "archive"
        extensions = ["bin"]
        min_size_bytes = 1024
        "#,
    )
    .unwrap();

    let run = fixture.preview(&Pipeline::new(profile).without_semantic());
    assert_eq!(
        target_of(&run, "Screenshot 2026-10-01.png"),
        PathBuf::from("Images/Screenshots/Screenshot 2026-10-01.png")
    );
    assert_eq!(
        target_of(&run, "Screen Shot 2026-10-02.png"),
        PathBuf::from("Images/Screenshots/Screen Shot 2026-10-02.png")
    );
    assert_eq!(
        target_of(&run, "holiday.png"),
        PathBuf::from("Images/PNG/holiday.png")
    );
    assert_eq!(target_of(&run, "huge.bin"), PathBuf::from("Archives/huge.bin"));
    assert!(
        run.decisions
            .iter()
            .find(|d| d.source.ends_with("huge.bin"))
            .is_some_and(|d| d.reason.contains("rule 'Dumps'"))
    );
    assert_ne!(target_of(&run, "tiny.bin"), PathBuf::from("Archives/tiny.bin"));
}

#[test]
fn test_extensionless_file_named_like_a_type_folder_stays_put() {
    let fixture = TestFixture::new();
    fixture.create_file("a.jpg", JPEG_HEADER);
    fixture.create_file("b.jpg", JPEG_HEADER);
    fixture.create_file("JPG", JPEG_HEADER);

    let run = fixture.execute(&rule_pipeline());
    let summary = run.execution.as_ref().unwrap();
    assert!(summary.is_complete_success());
    assert_eq!(summary.succeeded.len(), 2);
    fixture.assert_file_exists("Images/JPG/a.jpg");
    fixture.assert_file_exists("Images/JPG/b.jpg");
    fixture.assert_file_exists("JPG");
}

// ============================================================================
// 2. Semantic grouping
// ============================================================================

#[test]
fn test_related_documents_share_a_group_folder() {
    let fixture = TestFixture::new();
    fixture.create_file("resume.pdf", PDF_HEADER);
    fixture.create_file("cover_letter.pdf", PDF_HEADER);
    fixture.create_file("invoice.pdf", PDF_HEADER);

    let pipeline = Pipeline::new(undated_profile()).with_embedder(Box::new(StaticEmbedder));
    let run = fixture.preview(&pipeline);

    assert_eq!(run.groups.len(), 1);
    let group = &run.groups[0];
    assert_eq!(group.label, "Cover");
    assert_eq!(group.members.len(), 2);

    assert_eq!(
        target_of(&run, "resume.pdf"),
        PathBuf::from("Documents/Cover/PDF/resume.pdf")
    );
    assert_eq!(
        target_of(&run, "cover_letter.pdf"),
        PathBuf::from("Documents/Cover/PDF/cover_letter.pdf")
    );
    // The ungrouped invoice is alone in its type folder and collapses.
    assert_eq!(
        target_of(&run, "invoice.pdf"),
        PathBuf::from("Documents/invoice.pdf")
    );

    let sources: Vec<_> = run
        .decisions
        .iter()
        .map(|d| (d.source.file_name().unwrap().to_owned(), d.decision_source))
        .collect();
    assert!(sources.contains(&("resume.pdf".into(), DecisionSource::Semantic)));
    assert!(sources.contains(&("invoice.pdf".into(), DecisionSource::Rule)));
}

#[test]
fn test_disabled_semantic_stage_uses_rules_only() {
    let fixture = TestFixture::new();
    fixture.create_file("resume.pdf", PDF_HEADER);
    fixture.create_file("cover_letter.pdf", PDF_HEADER);

    let pipeline = Pipeline::new(undated_profile())
        .with_embedder(Box::new(StaticEmbedder))
        .without_semantic();
    let run = fixture.preview(&pipeline);

    assert!(run.groups.is_empty());
    assert_eq!(
        target_of(&run, "resume.pdf"),
        PathBuf::from("Documents/PDF/resume.pdf")
    );
}

// ============================================================================
// 3. Root protection and filtering
// ============================================================================

#[test]
fn test_project_root_is_left_intact() {
    let fixture = TestFixture::new();
    fixture.create_text_file("tool/.git/HEAD", "ref: refs/heads/main\n");
    fixture.create_text_file("tool/main.rs", "fn main() {}\n");
    fixture.create_text_file("tool/notes.txt", "todo\n");
    fixture.create_file("loose.pdf", PDF_HEADER);

    let run = fixture.execute(&rule_pipeline());

    assert_eq!(run.protected_roots.len(), 1);
    assert_eq!(run.protected_roots[0].path, fixture.path().join("tool"));
    assert_eq!(run.protected_roots[0].kind, RootKind::Project);

    for decision in run
        .decisions
        .iter()
        .filter(|d| d.source.starts_with(fixture.path().join("tool")))
    {
        assert_eq!(decision.decision_source, DecisionSource::ProtectedSkip);
        assert!(!decision.safe);
    }

    fixture.assert_file_exists("tool/main.rs");
    fixture.assert_file_exists("tool/notes.txt");
    fixture.assert_file_exists("tool/.git/HEAD");
    fixture.assert_file_exists("Documents/loose.pdf");
}

#[test]
fn test_nested_markers_report_outermost_root_only() {
    let fixture = TestFixture::new();
    fixture.create_text_file("app/package.json", "{}");
    fixture.create_text_file("app/node_modules/dep/package.json", "{}");

    let run = fixture.preview(&rule_pipeline());
    assert_eq!(run.protected_roots.len(), 1);
    assert_eq!(run.protected_roots[0].path, fixture.path().join("app"));
}

#[test]
fn test_extra_marker_from_profile() {
    let fixture = TestFixture::new();
    fixture.create_text_file("album/.keep-together", "");
    fixture.create_file("album/cover.png", PNG_HEADER);
    let mut profile = undated_profile();
    profile.protection.extra_markers = vec![".keep-together".to_string()];

    let run = fixture.execute(&Pipeline::new(profile).without_semantic());
    assert_eq!(run.protected_roots[0].kind, RootKind::Custom);
    fixture.assert_file_exists("album/cover.png");
}

#[test]
fn test_excluded_files_stay_in_place() {
    let fixture = TestFixture::new();
    fixture.create_file("photo.png", PNG_HEADER);
    fixture.create_text_file("scratch.tmp", "temp");
    fixture.create_text_file("debug.log", "log");

    let dir = TempDir::new().unwrap();
    let config = dir.path().join("profile.toml");
    fs::write(
        &config,
        r#"
        [filters.exclude]
        extensions = ["tmp"]
        filenames = ["debug.log"]

        [placement]
        date_granularity = "none"
        "#,
    )
    .unwrap();

    let profile = Profile::load(Some(&config)).unwrap();
    let run = fixture.execute(&Pipeline::new(profile).without_semantic());

    assert_eq!(run.execution.as_ref().unwrap().succeeded.len(), 1);
    fixture.assert_file_exists("scratch.tmp");
    fixture.assert_file_exists("debug.log");
    fixture.assert_file_exists("Images/photo.png");
}

#[test]
fn test_hidden_files_are_protected_by_default() {
    let fixture = TestFixture::new();
    fixture.create_text_file(".env", "SECRET=1");
    fixture.create_file(".cache/thumb.png", PNG_HEADER);

    let run = fixture.execute(&rule_pipeline());
    assert!(
        run.decisions
            .iter()
            .all(|d| d.decision_source == DecisionSource::ProtectedSkip)
    );
    fixture.assert_file_exists(".env");
    fixture.assert_file_exists(".cache/thumb.png");
}

#[test]
fn test_system_files_stay_in_place() {
    let fixture = TestFixture::new();
    fixture.create_file("Thumbs.db", NOISE);
    fixture.create_text_file("desktop.ini", "[.ShellClassInfo]");
    fixture.create_file("photo.png", PNG_HEADER);

    let run = fixture.execute(&rule_pipeline());
    assert_eq!(run.execution.as_ref().unwrap().total, 1);
    fixture.assert_file_exists("Thumbs.db");
    fixture.assert_file_exists("desktop.ini");
    fixture.assert_file_exists("Images/photo.png");
}

#[cfg(unix)]
#[test]
fn test_followed_links_never_move_outside_files() {
    let outside = TempDir::new().unwrap();
    let outside_file = outside.path().join("elsewhere.pdf");
    fs::write(&outside_file, PDF_HEADER).unwrap();

    let fixture = TestFixture::new();
    fixture.create_file("inside.png", PNG_HEADER);
    std::os::unix::fs::symlink(outside.path(), fixture.path().join("shortcut")).unwrap();

    let pipeline = rule_pipeline().follow_links(true);
    let run = fixture.execute(&pipeline);

    assert_eq!(run.execution.as_ref().unwrap().succeeded.len(), 1);
    assert!(outside_file.exists());
    assert_eq!(fs::read_dir(outside.path()).unwrap().count(), 1);
    assert!(
        run.scan_diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::OutsideRoot)
    );
    fixture.assert_file_exists("Images/inside.png");
}

// ============================================================================
// 4. Execution failures and conflicts
// ============================================================================

#[test]
fn test_vanished_source_fails_only_that_file() {
    let fixture = TestFixture::new();
    for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"] {
        fixture.create_file(name, JPEG_HEADER);
    }

    let mut profile = undated_profile();
    profile.execution.progress_interval = 2;
    let pipeline = Pipeline::new(profile.clone()).without_semantic();
    let run = fixture.preview(&pipeline);
    assert_eq!(run.stats().will_move, 5);

    fs::remove_file(fixture.path().join("c.jpg")).unwrap();

    let mut journal = UndoJournal::load(fixture.path(), 10).unwrap();
    let mut seen = Vec::new();
    let summary = Executor::new(fixture.path(), &profile.execution).execute(
        &run.decisions,
        &mut journal,
        &CancelToken::new(),
        &mut |p: &Progress| seen.push(p.processed),
    );

    assert_eq!(summary.succeeded.len(), 4);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, fixture.path().join("c.jpg"));
    assert_eq!(seen, vec![2, 4, 5]);
    fixture.assert_file_exists("Images/JPG/a.jpg");
    fixture.assert_file_exists("Images/JPG/e.jpg");
}

#[test]
fn test_same_target_is_renamed_on_execute() {
    let fixture = TestFixture::new();
    fixture.create_file("work/report.pdf", PDF_HEADER);
    fixture.create_file("home/report.pdf", PDF_HEADER);

    let pipeline = rule_pipeline();
    let preview = fixture.preview(&pipeline);
    assert_eq!(preview.stats().conflicts, 1);

    let run = fixture.execute(&pipeline);
    let summary = run.execution.as_ref().unwrap();
    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(summary.renamed, 1);
    fixture.assert_file_exists("Documents/PDF/report.pdf");
    fixture.assert_file_exists("Documents/PDF/report (1).pdf");
}

#[test]
fn test_skip_policy_leaves_conflicting_file() {
    let fixture = TestFixture::new();
    fixture.create_file("work/report.pdf", PDF_HEADER);
    fixture.create_file("home/report.pdf", PDF_HEADER);

    let mut profile = undated_profile();
    profile.execution.conflict = treetidy::config::ConflictPolicy::Skip;
    let run = fixture.execute(&Pipeline::new(profile).without_semantic());

    let summary = run.execution.as_ref().unwrap();
    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.skipped.len(), 1);
    fixture.assert_file_not_exists("Documents/PDF/report (1).pdf");
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_is_reported_not_fatal() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = TestFixture::new();
    fixture.create_file("locked/secret.pdf", PDF_HEADER);
    fixture.create_file("open.png", PNG_HEADER);
    let locked = fixture.path().join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can read anything; the scenario cannot be built.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let run = fixture.preview(&rule_pipeline());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(!run.scan_diagnostics.is_empty());
    assert_eq!(target_of(&run, "open.png"), PathBuf::from("Images/open.png"));
}

#[cfg(unix)]
#[test]
fn test_read_only_source_directory_fails_that_move() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = TestFixture::new();
    fixture.create_file("locked/report.pdf", PDF_HEADER);
    fixture.create_file("open.png", PNG_HEADER);
    let locked = fixture.path().join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

    // Privileged users can write anywhere; the scenario cannot be built.
    if File::create(locked.join("writable")).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let run = fixture.execute(&rule_pipeline());
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    let summary = run.execution.as_ref().unwrap();
    assert_eq!(summary.succeeded.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, locked.join("report.pdf"));
    fixture.assert_file_exists("locked/report.pdf");
    fixture.assert_file_exists("Images/open.png");

    let journal = UndoJournal::load(fixture.path(), 10).unwrap();
    let batch = &journal.batches()[0];
    assert_eq!(batch.count(Outcome::Failed), 1);
    assert_eq!(batch.count(Outcome::Success), 1);
}

#[test]
fn test_cancelling_mid_batch_seals_completed_moves() {
    let fixture = TestFixture::new();
    for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"] {
        fixture.create_file(name, JPEG_HEADER);
    }

    let mut profile = undated_profile();
    profile.execution.progress_interval = 1;
    let pipeline = Pipeline::new(profile.clone()).without_semantic();
    let run = fixture.preview(&pipeline);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let mut journal = UndoJournal::load(fixture.path(), 10).unwrap();
    let summary = Executor::new(fixture.path(), &profile.execution).execute(
        &run.decisions,
        &mut journal,
        &cancel,
        &mut |p: &Progress| {
            if p.processed == 2 {
                trigger.cancel();
            }
        },
    );

    assert!(summary.cancelled);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded.len(), 2);
    assert!(summary.failed.is_empty());

    let history = pipeline.history(fixture.path()).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].cancelled);
    assert_eq!(history[0].entries.len(), 2);
    assert_eq!(history[0].count(Outcome::Success), 2);

    let moved: Vec<PathBuf> = summary.succeeded.iter().map(|(from, _)| from.clone()).collect();
    let report = pipeline.undo(fixture.path()).unwrap();
    assert!(report.is_complete_success());
    let mut restored = report.restored.clone();
    restored.sort();
    let mut expected = moved;
    expected.sort();
    assert_eq!(restored, expected);
    assert_eq!(
        fixture.top_level_names(),
        vec!["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]
    );
}

#[cfg(unix)]
#[test]
fn test_non_utf8_name_stays_in_place() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let fixture = TestFixture::new();
    let odd = fixture.path().join(OsStr::from_bytes(b"caf\xe9.pdf"));
    // Some filesystems only accept UTF-8 names.
    if fs::write(&odd, PDF_HEADER).is_err() {
        return;
    }
    fixture.create_file("plain.pdf", PDF_HEADER);

    let pipeline = rule_pipeline();
    let run = fixture.execute(&pipeline);
    let summary = run.execution.as_ref().unwrap();
    assert_eq!(summary.succeeded.len(), 1);
    assert!(odd.exists());
    assert!(fixture.path().join(target_of(&run, "plain.pdf")).is_file());

    let history = pipeline.history(fixture.path()).unwrap();
    assert_eq!(history[0].entries.len(), 1);
    pipeline.undo(fixture.path()).unwrap();
    fixture.assert_file_exists("plain.pdf");
    assert!(odd.exists());
}

// ============================================================================
// 5. Undo, history and idempotence
// ============================================================================

#[test]
fn test_preview_execute_undo_round_trip() {
    let fixture = TestFixture::new();
    fixture.create_file("a.png", PNG_HEADER);
    fixture.create_file("b.png", PNG_HEADER);
    fixture.create_file("report.pdf", PDF_HEADER);
    fixture.create_file("data.xyz", NOISE);
    fixture.create_subdir("empty");

    let pipeline = rule_pipeline();
    let before = fixture.preview(&pipeline);
    let names_before = fixture.top_level_names();

    let run = fixture.execute(&pipeline);
    assert!(run.execution.as_ref().unwrap().is_complete_success());
    fixture.assert_dir_exists("Images/PNG");
    fixture.assert_file_exists(JOURNAL_FILE_NAME);

    let report = pipeline.undo(fixture.path()).unwrap();
    assert!(report.is_complete_success());
    assert_eq!(report.restored.len(), 4);

    // Created folders and the emptied journal are gone again.
    assert_eq!(fixture.top_level_names(), names_before);
    fixture.assert_file_not_exists(JOURNAL_FILE_NAME);
    fixture.assert_dir_exists("empty");

    let after = fixture.preview(&pipeline);
    let targets = |run: &PipelineRun| -> Vec<(PathBuf, PathBuf)> {
        run.decisions
            .iter()
            .map(|d| (d.source.clone(), d.target.clone()))
            .collect()
    };
    assert_eq!(targets(&before), targets(&after));
}

#[test]
fn test_undo_with_deleted_destination_reports_unresolved() {
    let fixture = TestFixture::new();
    fixture.create_file("a.png", PNG_HEADER);
    fixture.create_file("b.png", PNG_HEADER);
    fixture.create_file("c.png", PNG_HEADER);

    let pipeline = rule_pipeline();
    fixture.execute(&pipeline);
    fs::remove_file(fixture.path().join("Images/PNG/b.png")).unwrap();

    let report = pipeline.undo(fixture.path()).unwrap();
    assert_eq!(report.restored.len(), 2);
    assert_eq!(report.unresolved.len(), 1);
    assert!(report.failed.is_empty());
    fixture.assert_file_exists("a.png");
    fixture.assert_file_exists("c.png");
    fixture.assert_file_not_exists("b.png");
}

#[test]
fn test_undo_without_history_is_an_error() {
    let fixture = TestFixture::new();
    fixture.create_file("a.png", PNG_HEADER);

    let result = rule_pipeline().undo(fixture.path());
    assert!(matches!(result, Err(OrganizeError::Journal(_))));
}

#[test]
fn test_history_keeps_batches_in_order() {
    let fixture = TestFixture::new();
    fixture.create_file("a.jpg", JPEG_HEADER);

    let pipeline = rule_pipeline();
    fixture.execute(&pipeline);
    fixture.create_file("b.jpg", JPEG_HEADER);
    fixture.execute(&pipeline);

    let history = pipeline.history(fixture.path()).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].id < history[1].id);

    // Undo reverts the newest batch only.
    pipeline.undo(fixture.path()).unwrap();
    let history = pipeline.history(fixture.path()).unwrap();
    assert_eq!(history.len(), 1);
}

#[test]
fn test_journal_capacity_drops_oldest_batch() {
    let fixture = TestFixture::new();
    let mut profile = undated_profile();
    profile.execution.journal_capacity = 2;
    let pipeline = Pipeline::new(profile).without_semantic();

    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        fixture.create_file(name, JPEG_HEADER);
        fixture.execute(&pipeline);
    }

    assert_eq!(pipeline.history(fixture.path()).unwrap().len(), 2);
}

#[test]
fn test_corrupted_journal_is_set_aside_on_execute() {
    let fixture = TestFixture::new();
    fixture.create_file("a.png", PNG_HEADER);
    fixture.create_text_file(JOURNAL_FILE_NAME, "{ not json");

    let run = fixture.execute(&rule_pipeline());
    assert!(run.journal_warning.is_some());
    assert!(run.execution.as_ref().unwrap().is_complete_success());

    let set_aside = fs::read_dir(fixture.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
    assert!(set_aside);
}

// ============================================================================
// 6. CLI entry points and error scenarios
// ============================================================================

#[test]
fn test_cli_organize_and_undo_with_config() {
    let fixture = TestFixture::new();
    fixture.create_file("a.png", PNG_HEADER);
    fixture.create_file("report.pdf", PDF_HEADER);

    let dir = TempDir::new().unwrap();
    let config = dir.path().join("profile.toml");
    fs::write(&config, "[placement]\ndate_granularity = \"none\"\n").unwrap();

    let organize = OrganizeCommand::Organize {
        dry_run: false,
        semantic: false,
    };
    run_cli_with_config(organize, fixture.path(), Some(&config)).unwrap();
    fixture.assert_file_exists("Images/a.png");
    fixture.assert_file_exists("Documents/report.pdf");

    run_cli_with_config(OrganizeCommand::History, fixture.path(), Some(&config)).unwrap();
    run_cli_with_config(OrganizeCommand::Undo, fixture.path(), Some(&config)).unwrap();
    fixture.assert_file_exists("a.png");
    fixture.assert_file_exists("report.pdf");
}

#[test]
fn test_cli_dry_run_with_semantic_stage() {
    let fixture = TestFixture::new();
    fixture.create_text_file("meeting_notes.txt", "quarterly planning meeting");
    fixture.create_text_file("meeting_minutes.txt", "quarterly planning meeting");

    let command = OrganizeCommand::Organize {
        dry_run: true,
        semantic: true,
    };
    run_cli_with_config(command, fixture.path(), None).unwrap();
    assert_eq!(
        fixture.top_level_names(),
        vec!["meeting_minutes.txt", "meeting_notes.txt"]
    );
}

#[test]
fn test_cli_missing_config_file_is_an_error() {
    let fixture = TestFixture::new();
    let missing = fixture.path().join("nope.toml");

    let err =
        run_cli_with_config(OrganizeCommand::History, fixture.path(), Some(&missing)).unwrap_err();
    assert!(err.contains("configuration"));
}

#[test]
fn test_root_that_is_a_file_is_rejected() {
    let fixture = TestFixture::new();
    fixture.create_text_file("plain.txt", "x");

    let result = rule_pipeline().run(&fixture.path().join("plain.txt"), Mode::Preview, &mut |_| {});
    assert!(matches!(result, Err(OrganizeError::RootNotDirectory(_))));
}

#[test]
fn test_empty_directory_has_nothing_to_do() {
    let fixture = TestFixture::new();

    let run = fixture.execute(&rule_pipeline());
    assert!(run.decisions.is_empty());
    assert_eq!(run.execution.as_ref().unwrap().total, 0);
    fixture.assert_file_not_exists(JOURNAL_FILE_NAME);
}

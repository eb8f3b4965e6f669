//! Three-way merge engine.
//!
//! Uses the `diffy` crate to perform line-based three-way merges between a
//! left (common ancestor), right (incoming) and target (working) version of
//! a file, and materializes the outcome in the working copy: merged text,
//! inline conflict markers, label-suffixed backups and the entry's conflict
//! bookkeeping.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::resolver::{ConflictChoice, ConflictDescription, ConflictKind, ConflictResolver};
use super::{ConflictAction, ConflictReason};
use crate::config::MergeConfig;
use crate::entries;
use crate::errors::WcError;
use crate::lock::LockSet;
use crate::models::{is_binary_mime_type, looks_binary, normalize, split_path, NodeKind, PROP_MIME_TYPE};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Result of merging into one working file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The target already contained every change.
    Unchanged,
    /// Changes were merged without overlap.
    Merged,
    /// Overlapping changes (or binary content) left a conflict.
    Conflict,
    /// The target is absent or unversioned; nothing was merged.
    NoMerge,
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Merged => write!(f, "merged"),
            Self::Conflict => write!(f, "conflict"),
            Self::NoMerge => write!(f, "no_merge"),
        }
    }
}

/// Labels and switches of one `merge_file` call.
#[derive(Debug, Clone)]
pub struct MergeFileOptions {
    /// Suffix of the left backup and label of the ancestor section.
    pub left_label: String,
    /// Suffix of the right backup and label of the incoming section.
    pub right_label: String,
    /// Suffix of the pre-merge backup and label of the working section.
    pub target_label: String,
    /// Compute the outcome without touching the disk or the entries.
    pub dry_run: bool,
    /// Overrides the target's `svn:mime-type` property.
    pub mime_type: Option<String>,
}

impl MergeFileOptions {
    pub fn new(left_label: &str, right_label: &str, target_label: &str) -> Self {
        Self {
            left_label: left_label.to_string(),
            right_label: right_label.to_string(),
            target_label: target_label.to_string(),
            dry_run: false,
            mime_type: None,
        }
    }
}

impl From<&MergeConfig> for MergeFileOptions {
    fn from(config: &MergeConfig) -> Self {
        Self::new(&config.left_label, &config.right_label, &config.target_label)
    }
}

/// Merged text of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeText {
    /// The merged content; carries conflict markers when `has_conflicts`.
    pub merged_content: String,
    pub has_conflicts: bool,
}

// ---------------------------------------------------------------------------
// Text merge
// ---------------------------------------------------------------------------

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Merge the change from `left` to `right` into `target`.
    ///
    /// Overlapping regions are wrapped in `<<<<<<<` / `|||||||` / `=======` /
    /// `>>>>>>>` markers labelled with the target, left and right labels.
    pub fn three_way_merge(left: &str, target: &str, right: &str, opts: &MergeFileOptions) -> MergeText {
        // Fast path: if either side is identical to the ancestor, the other wins cleanly.
        if target == left {
            debug!("target == left, right wins cleanly");
            return MergeText::clean(right);
        }
        if right == left {
            debug!("right == left, target kept");
            return MergeText::clean(target);
        }
        // Fast path: both sides made the same change.
        if target == right {
            debug!("target == right, identical changes");
            return MergeText::clean(target);
        }

        match diffy::merge(left, target, right) {
            Ok(merged) => {
                debug!("clean three-way merge");
                MergeText::clean(&merged)
            }
            Err(conflicted) => {
                debug!("overlapping changes, emitting conflict markers");
                MergeText {
                    merged_content: relabel_markers(&conflicted, opts),
                    has_conflicts: true,
                }
            }
        }
    }
}

impl MergeText {
    fn clean(text: &str) -> Self {
        Self {
            merged_content: text.to_string(),
            has_conflicts: false,
        }
    }
}

fn relabel_markers(text: &str, opts: &MergeFileOptions) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\r', '\n']);
        let ending = &line[body.len()..];
        let label = if body.starts_with("<<<<<<<") {
            Some(("<<<<<<<", &opts.target_label))
        } else if body.starts_with("|||||||") {
            Some(("|||||||", &opts.left_label))
        } else if body.starts_with(">>>>>>>") {
            Some((">>>>>>>", &opts.right_label))
        } else {
            None
        };
        match label {
            Some((marker, label)) => {
                out.push_str(marker);
                out.push(' ');
                out.push_str(label);
                out.push_str(ending);
            }
            None => out.push_str(line),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Working-copy merge
// ---------------------------------------------------------------------------

/// Merge the difference between the fulltexts `left` and `right` into the
/// versioned working file `target`.
///
/// Binary content is never merged textually: it conflicts outright, and
/// outside dry-run the left and right versions are written beside the target.
/// Text conflicts are offered to `resolver` first; if still conflicted the
/// target receives inline markers, three label-suffixed backups are created
/// and registered on the entry. The caller must hold a write lock on the
/// target's directory unless `opts.dry_run`.
pub fn merge_file(
    set: &mut LockSet,
    left: &[u8],
    right: &[u8],
    target: &Path,
    opts: &MergeFileOptions,
    resolver: &mut dyn ConflictResolver,
) -> Result<MergeOutcome, WcError> {
    let target = normalize(target);
    let versioned = entries::entry(set, &target, false)?.is_some_and(|e| e.kind == NodeKind::File);
    if !versioned || NodeKind::on_disk(&target)? != NodeKind::File {
        debug!(path = %target.display(), "target absent or unversioned, no merge");
        return Ok(MergeOutcome::NoMerge);
    }
    let (parent, _) = split_path(&target)?;
    let parent_id = set.retrieve(&parent)?;
    if !opts.dry_run {
        set.require_write(parent_id)?;
    }

    let working = std::fs::read(&target)?;
    let mime_type = match &opts.mime_type {
        Some(m) => Some(m.clone()),
        None => entries::node_props(set, &target)?.working.get(PROP_MIME_TYPE).cloned(),
    };
    let texts = (
        std::str::from_utf8(left),
        std::str::from_utf8(&working),
        std::str::from_utf8(right),
    );
    let binary = mime_type.as_deref().is_some_and(is_binary_mime_type)
        || [left, working.as_slice(), right].into_iter().any(looks_binary);

    let (left_text, working_text, right_text) = match texts {
        (Ok(l), Ok(w), Ok(r)) if !binary => (l, w, r),
        _ => {
            return merge_binary(set, left, right, &target, &working, mime_type, opts, resolver);
        }
    };

    let merged = Merger::three_way_merge(left_text, working_text, right_text, opts);
    if !merged.has_conflicts {
        if merged.merged_content == working_text {
            return Ok(MergeOutcome::Unchanged);
        }
        if !opts.dry_run {
            std::fs::write(&target, merged.merged_content.as_bytes())?;
        }
        info!(path = %target.display(), "merged changes into working file");
        return Ok(MergeOutcome::Merged);
    }
    if opts.dry_run {
        return Ok(MergeOutcome::Conflict);
    }

    let adm_paths = set.adm(parent_id);
    let base_tmp = scratch(&adm_paths.tmp_dir(), left)?;
    let their_tmp = scratch(&adm_paths.tmp_dir(), right)?;
    let merged_tmp = scratch(&adm_paths.tmp_dir(), merged.merged_content.as_bytes())?;
    let description = ConflictDescription {
        path: target.clone(),
        node_kind: NodeKind::File,
        kind: ConflictKind::Text,
        property_name: None,
        is_binary: false,
        mime_type,
        action: ConflictAction::Edit,
        reason: ConflictReason::Edited,
        base_file: Some(base_tmp.path().to_path_buf()),
        their_file: Some(their_tmp.path().to_path_buf()),
        my_file: Some(target.clone()),
        merged_file: Some(merged_tmp.path().to_path_buf()),
    };
    let choice = resolver.resolve(&description)?;
    debug!(path = %target.display(), choice = %choice, "text conflict resolver answered");

    let chosen = match choice {
        ConflictChoice::Conflicted => None,
        ConflictChoice::Resolved => return Ok(MergeOutcome::Merged),
        ConflictChoice::ChooseBase => Some(left.to_vec()),
        ConflictChoice::ChooseRepository => Some(right.to_vec()),
        ConflictChoice::ChooseWorking => Some(working.clone()),
        ConflictChoice::ChooseMerged => Some(std::fs::read(merged_tmp.path())?),
    };
    if let Some(content) = chosen {
        return install_choice(&target, &working, &content);
    }

    // Still conflicted: markers into the target plus three backups.
    let name_old = write_backup(&parent, &target, &opts.left_label, left)?;
    let name_new = write_backup(&parent, &target, &opts.right_label, right)?;
    let name_wrk = write_backup(&parent, &target, &opts.target_label, &working)?;
    std::fs::write(&target, merged.merged_content.as_bytes())?;
    entries::modify_entry(set, &target, |e| {
        e.conflict_old = Some(name_old.clone());
        e.conflict_new = Some(name_new.clone());
        e.conflict_wrk = Some(name_wrk.clone());
    })?;
    info!(path = %target.display(), "text conflict left in working file");
    Ok(MergeOutcome::Conflict)
}

#[allow(clippy::too_many_arguments)]
fn merge_binary(
    set: &mut LockSet,
    left: &[u8],
    right: &[u8],
    target: &Path,
    working: &[u8],
    mime_type: Option<String>,
    opts: &MergeFileOptions,
    resolver: &mut dyn ConflictResolver,
) -> Result<MergeOutcome, WcError> {
    debug!(path = %target.display(), "binary target, no textual merge");
    if opts.dry_run {
        return Ok(MergeOutcome::Conflict);
    }
    let (parent, _) = split_path(target)?;
    let adm_paths = set.adm(set.retrieve(&parent)?);
    let base_tmp = scratch(&adm_paths.tmp_dir(), left)?;
    let their_tmp = scratch(&adm_paths.tmp_dir(), right)?;
    let description = ConflictDescription {
        path: target.to_path_buf(),
        node_kind: NodeKind::File,
        kind: ConflictKind::Text,
        property_name: None,
        is_binary: true,
        mime_type,
        action: ConflictAction::Edit,
        reason: ConflictReason::Edited,
        base_file: Some(base_tmp.path().to_path_buf()),
        their_file: Some(their_tmp.path().to_path_buf()),
        my_file: Some(target.to_path_buf()),
        merged_file: None,
    };
    let chosen = match resolver.resolve(&description)? {
        ConflictChoice::Conflicted => None,
        ConflictChoice::Resolved => return Ok(MergeOutcome::Merged),
        ConflictChoice::ChooseBase => Some(left.to_vec()),
        ConflictChoice::ChooseRepository => Some(right.to_vec()),
        // No merged fulltext exists for binary content.
        ConflictChoice::ChooseWorking | ConflictChoice::ChooseMerged => Some(working.to_vec()),
    };
    if let Some(content) = chosen {
        return install_choice(target, working, &content);
    }

    let name_old = write_backup(&parent, target, &opts.left_label, left)?;
    let name_new = write_backup(&parent, target, &opts.right_label, right)?;
    entries::modify_entry(set, target, |e| {
        e.conflict_old = Some(name_old.clone());
        e.conflict_new = Some(name_new.clone());
    })?;
    info!(path = %target.display(), "binary conflict, copies written beside target");
    Ok(MergeOutcome::Conflict)
}

fn install_choice(target: &Path, working: &[u8], content: &[u8]) -> Result<MergeOutcome, WcError> {
    if content == working {
        return Ok(MergeOutcome::Unchanged);
    }
    std::fs::write(target, content)?;
    Ok(MergeOutcome::Merged)
}

/// A scratch copy of `data` inside the administrative tmp area.
fn scratch(tmp_dir: &Path, data: &[u8]) -> Result<NamedTempFile, WcError> {
    std::fs::create_dir_all(tmp_dir)?;
    let mut file = NamedTempFile::new_in(tmp_dir)?;
    std::io::Write::write_all(&mut file, data)?;
    Ok(file)
}

/// Write `data` to the first free `<name><label>` / `<name>.<n><label>`
/// beside `target` and return the chosen file name.
fn write_backup(dir: &Path, target: &Path, label: &str, data: &[u8]) -> Result<String, WcError> {
    let (_, name) = split_path(target)?;
    let path = unique_path(dir, &name, label);
    std::fs::write(&path, data)?;
    Ok(path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default())
}

fn unique_path(dir: &Path, name: &str, label: &str) -> PathBuf {
    let first = dir.join(format!("{}{}", name, label));
    if !first.exists() {
        return first;
    }
    (2u32..)
        .map(|n| dir.join(format!("{}.{}{}", name, n, label)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::conflict::resolver::{AlwaysChoose, Postpone};
    use crate::lock::{LockDepth, LockMode};
    use crate::testutil::{checkout, Node};

    fn labels() -> MergeFileOptions {
        MergeFileOptions::new(".old", ".new", ".working")
    }

    #[test]
    fn test_identical_files() {
        let base = "line1\nline2\nline3\n";
        let result = Merger::three_way_merge(base, base, base, &labels());
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, base);
    }

    #[test]
    fn test_only_right_changed() {
        let base = "line1\nline2\nline3\n";
        let right = "line1\nline2\nline3\nline4\n";
        let result = Merger::three_way_merge(base, base, right, &labels());
        assert!(!result.has_conflicts);
        assert!(result.merged_content.contains("line4"));
    }

    #[test]
    fn test_non_overlapping_changes() {
        let base = "aaa\nbbb\nccc\nddd\neee\n";
        let target = "AAA\nbbb\nccc\nddd\neee\n";
        let right = "aaa\nbbb\nccc\nddd\nEEE\n";
        let result = Merger::three_way_merge(base, target, right, &labels());
        assert!(!result.has_conflicts);
        assert!(result.merged_content.contains("AAA"));
        assert!(result.merged_content.contains("EEE"));
    }

    #[test]
    fn test_conflicting_changes_are_labelled() {
        let base = "line1\noriginal\nline3\n";
        let target = "line1\nmine\nline3\n";
        let right = "line1\ntheirs\nline3\n";
        let result = Merger::three_way_merge(base, target, right, &labels());
        assert!(result.has_conflicts);
        assert!(result.merged_content.contains("<<<<<<< .working\n"));
        assert!(result.merged_content.contains("||||||| .old\n"));
        assert!(result.merged_content.contains("=======\n"));
        assert!(result.merged_content.contains(">>>>>>> .new\n"));
    }

    #[test]
    fn test_same_change_both_sides() {
        let result = Merger::three_way_merge("old\n", "new\n", "new\n", &labels());
        assert!(!result.has_conflicts);
        assert_eq!(result.merged_content, "new\n");
    }

    fn open(wc: &crate::testutil::TestWc) -> LockSet {
        let cancel = CancellationToken::new();
        LockSet::open(&wc.config, &wc.root, LockMode::Write, LockDepth::INFINITE, &cancel)
            .unwrap()
            .0
    }

    #[test]
    fn test_merge_file_unversioned_target() {
        let wc = checkout(&[]);
        std::fs::write(wc.root.join("loose.txt"), "x\n").unwrap();
        let mut set = open(&wc);
        let outcome = merge_file(
            &mut set,
            b"a\n",
            b"b\n",
            &wc.root.join("loose.txt"),
            &labels(),
            &mut Postpone,
        )
        .unwrap();
        assert_eq!(outcome, MergeOutcome::NoMerge);
        assert_eq!(std::fs::read_to_string(wc.root.join("loose.txt")).unwrap(), "x\n");
    }

    #[test]
    fn test_merge_file_conflict_materializes_backups() {
        let wc = checkout(&[Node::file("f.txt", "one\ntwo\nthree\n")]);
        let target = wc.root.join("f.txt");
        std::fs::write(&target, "one\nmine\nthree\n").unwrap();
        // A stale backup forces a uniquified name.
        std::fs::write(wc.root.join("f.txt.old"), "stale").unwrap();
        let mut set = open(&wc);

        let outcome = merge_file(
            &mut set,
            b"one\ntwo\nthree\n",
            b"one\ntheirs\nthree\n",
            &target,
            &labels(),
            &mut Postpone,
        )
        .unwrap();
        assert_eq!(outcome, MergeOutcome::Conflict);
        let text = std::fs::read_to_string(&target).unwrap();
        assert!(text.contains("<<<<<<< .working"));

        let entry = entries::entry(&set, &target, false).unwrap().unwrap();
        assert_eq!(entry.conflict_old.as_deref(), Some("f.txt.2.old"));
        assert_eq!(entry.conflict_new.as_deref(), Some("f.txt.new"));
        assert_eq!(entry.conflict_wrk.as_deref(), Some("f.txt.working"));
        assert_eq!(
            std::fs::read_to_string(wc.root.join("f.txt.working")).unwrap(),
            "one\nmine\nthree\n"
        );
    }

    #[test]
    fn test_merge_file_dry_run_touches_nothing() {
        let wc = checkout(&[Node::file("f.txt", "one\ntwo\nthree\n")]);
        let target = wc.root.join("f.txt");
        std::fs::write(&target, "one\nmine\nthree\n").unwrap();
        let mut set = open(&wc);
        let opts = MergeFileOptions {
            dry_run: true,
            ..labels()
        };
        let outcome = merge_file(
            &mut set,
            b"one\ntwo\nthree\n",
            b"one\ntheirs\nthree\n",
            &target,
            &opts,
            &mut Postpone,
        )
        .unwrap();
        assert_eq!(outcome, MergeOutcome::Conflict);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "one\nmine\nthree\n");
        assert!(!wc.root.join("f.txt.working").exists());
    }

    #[test]
    fn test_merge_file_resolver_choice_is_installed() {
        let wc = checkout(&[Node::file("f.txt", "one\ntwo\nthree\n")]);
        let target = wc.root.join("f.txt");
        std::fs::write(&target, "one\nmine\nthree\n").unwrap();
        let mut set = open(&wc);
        let outcome = merge_file(
            &mut set,
            b"one\ntwo\nthree\n",
            b"one\ntheirs\nthree\n",
            &target,
            &labels(),
            &mut AlwaysChoose(ConflictChoice::ChooseRepository),
        )
        .unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "one\ntheirs\nthree\n");
        assert!(!wc.root.join("f.txt.working").exists());
    }

    #[test]
    fn test_merge_file_binary_writes_copies() {
        let wc = checkout(&[Node::file("img.bin", "v1")]);
        let target = wc.root.join("img.bin");
        std::fs::write(&target, b"lo\0cal").unwrap();
        let mut set = open(&wc);
        let mut asked = false;
        let mut resolver = |d: &ConflictDescription| {
            asked = d.is_binary;
            Ok::<_, WcError>(ConflictChoice::Conflicted)
        };
        let outcome = merge_file(&mut set, b"v1", b"v\0two", &target, &labels(), &mut resolver).unwrap();
        assert_eq!(outcome, MergeOutcome::Conflict);
        assert!(asked);
        assert_eq!(std::fs::read(&target).unwrap(), b"lo\0cal");
        assert_eq!(std::fs::read(wc.root.join("img.bin.new")).unwrap(), b"v\0two");
        let entry = entries::entry(&set, &target, false).unwrap().unwrap();
        assert_eq!(entry.conflict_old.as_deref(), Some("img.bin.old"));
        assert!(entry.conflict_wrk.is_none());
    }
}

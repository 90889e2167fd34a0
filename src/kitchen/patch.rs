// src/kitchen/patch.rs

//! All-or-nothing patch application
//!
//! A patch is a unified diff that may touch several files. Every file is
//! patched in memory first; the tree is written only after all hunks of all
//! files applied. If a write fails midway, the files already written are
//! restored from a snapshot, so a failed patch leaves the tree exactly as it
//! was.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Why a patch did not apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFailure {
    /// File the failure concerns, relative to the source root
    pub file: String,
    /// First failing hunk, or the reason no hunk could be tried
    pub hunk: String,
}

impl PatchFailure {
    fn new(file: impl Into<String>, hunk: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            hunk: hunk.into(),
        }
    }

    /// Convert into the crate error for a package and patch
    pub fn into_error(self, package: &str, patch: &str) -> crate::Error {
        crate::Error::PatchApply {
            package: package.to_string(),
            patch: patch.to_string(),
            file: self.file,
            hunk: self.hunk,
        }
    }
}

/// Result of a successful application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedPatch {
    /// Files changed, relative to the source root
    pub files: Vec<PathBuf>,
}

/// The part of a diff that concerns one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Path on the `---` line; `None` for `/dev/null` (file creation)
    pub old_path: Option<String>,
    /// Path on the `+++` line; `None` for `/dev/null` (file deletion)
    pub new_path: Option<String>,
    /// Single-file unified diff with normalized headers
    text: String,
}

impl FilePatch {
    /// Path of the affected file after stripping `strip` leading components
    fn target(&self, strip: usize) -> Result<PathBuf, PatchFailure> {
        let raw = self
            .new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("/dev/null");

        let components: Vec<&str> = raw
            .split('/')
            .filter(|c| !c.is_empty() && *c != ".")
            .collect();
        if components.len() <= strip {
            return Err(PatchFailure::new(
                raw,
                format!("cannot strip {} component(s) from path", strip),
            ));
        }

        let path: PathBuf = components[strip..].iter().collect();
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(PatchFailure::new(raw, "path escapes the source tree"));
        }
        Ok(path)
    }
}

/// Split a (possibly multi-file) unified diff into per-file diffs
///
/// Preamble lines such as `diff --git` or `index` are dropped, and
/// timestamps after the file names are removed. Hunk bodies are consumed by
/// their declared line counts, so removed lines that happen to start with
/// `--- ` are not mistaken for headers.
pub fn split_diff(diff: &str) -> Vec<FilePatch> {
    let lines: Vec<&str> = diff.split_inclusive('\n').collect();
    let mut files = Vec::new();
    let mut current: Option<FilePatch> = None;
    let mut old_left = 0usize;
    let mut new_left = 0usize;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if old_left > 0 || new_left > 0 {
            if let Some(file) = current.as_mut() {
                match line.as_bytes().first() {
                    Some(b'-') => old_left = old_left.saturating_sub(1),
                    Some(b'+') => new_left = new_left.saturating_sub(1),
                    Some(b'\\') => {}
                    _ => {
                        old_left = old_left.saturating_sub(1);
                        new_left = new_left.saturating_sub(1);
                    }
                }
                // Editors strip the lone space of empty context lines
                if line.trim_end_matches(['\n', '\r']).is_empty() {
                    push_line(&mut file.text, " \n");
                } else {
                    push_line(&mut file.text, line);
                }
            }
            i += 1;
            continue;
        }

        if line.starts_with("--- ")
            && let Some(next) = lines.get(i + 1)
            && next.starts_with("+++ ")
        {
            if let Some(done) = current.take() {
                files.push(done);
            }
            let old_path = header_path(&line[4..]);
            let new_path = header_path(&next[4..]);
            let text = format!(
                "--- {}\n+++ {}\n",
                old_path.as_deref().unwrap_or("/dev/null"),
                new_path.as_deref().unwrap_or("/dev/null")
            );
            current = Some(FilePatch {
                old_path,
                new_path,
                text,
            });
            i += 2;
            continue;
        }

        if let Some(file) = current.as_mut() {
            if line.starts_with("@@") {
                if let Some((old, new)) = hunk_counts(line) {
                    old_left = old;
                    new_left = new;
                }
                push_line(&mut file.text, line);
            } else if line.starts_with('\\') {
                push_line(&mut file.text, line);
            }
        }
        i += 1;
    }

    if let Some(done) = current {
        files.push(done);
    }
    files
}

fn push_line(text: &mut String, line: &str) {
    text.push_str(line);
    if !line.ends_with('\n') {
        text.push('\n');
    }
}

/// File name of a `---`/`+++` header, without timestamp
fn header_path(rest: &str) -> Option<String> {
    let rest = rest.trim_end_matches(['\n', '\r']);
    let path = rest
        .split('\t')
        .next()
        .and_then(|p| p.split("  ").next())
        .unwrap_or("")
        .trim();
    if path == "/dev/null" || path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Old and new line counts of a `@@ -a,b +c,d @@` header
fn hunk_counts(line: &str) -> Option<(usize, usize)> {
    let inner = line.strip_prefix("@@ ")?;
    let spec = &inner[..inner.find(" @@")?];
    let mut parts = spec.split(' ');
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    Some((range_len(old), range_len(new)))
}

fn range_len(range: &str) -> usize {
    match range.split_once(',') {
        Some((_, len)) => len.parse().unwrap_or(0),
        None => 1,
    }
}

/// Describe the hunk a diffy apply error points at
fn describe_hunk(patch: &diffy::Patch<'_, str>, err: &diffy::ApplyError) -> String {
    let message = err.to_string();
    let index = message
        .rsplit('#')
        .next()
        .and_then(|n| n.trim().parse::<usize>().ok());

    match index.and_then(|n| patch.hunks().get(n.wrapping_sub(1)).map(|h| (n, h))) {
        Some((n, hunk)) => format!(
            "hunk #{} (@@ -{},{} +{},{} @@) does not match",
            n,
            hunk.old_range().start(),
            hunk.old_range().len(),
            hunk.new_range().start(),
            hunk.new_range().len()
        ),
        None => message,
    }
}

/// Current content of a file, `None` if it does not exist
fn read_text(path: &Path, display: &str) -> Result<Option<String>, PatchFailure> {
    match fs::read(path) {
        Ok(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| PatchFailure::new(display, "file is not valid UTF-8 text")),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PatchFailure::new(display, format!("cannot read file: {}", e))),
    }
}

/// Apply a unified diff to a source tree, all or nothing
pub fn apply_patch(source_dir: &Path, diff: &str, strip: usize) -> Result<AppliedPatch, PatchFailure> {
    let files = split_diff(diff);
    if files.is_empty() {
        return Err(PatchFailure::new("-", "no file changes found in diff"));
    }

    // relative path -> new content, `None` for deletion
    let mut pending: BTreeMap<PathBuf, Option<String>> = BTreeMap::new();

    for file in &files {
        let rel = file.target(strip)?;
        let display = rel.display().to_string();
        let patch = diffy::Patch::from_str(&file.text)
            .map_err(|e| PatchFailure::new(&display, format!("malformed diff: {}", e)))?;

        let current = match pending.get(&rel) {
            Some(change) => change.clone(),
            None => read_text(&source_dir.join(&rel), &display)?,
        };
        let base = match (&file.old_path, current) {
            (None, Some(_)) => {
                return Err(PatchFailure::new(&display, "file to be created already exists"));
            }
            (None, None) => String::new(),
            (Some(_), None) => return Err(PatchFailure::new(&display, "file not found")),
            (Some(_), Some(text)) => text,
        };

        let patched = diffy::apply(&base, &patch)
            .map_err(|e| PatchFailure::new(&display, describe_hunk(&patch, &e)))?;

        let change = file.new_path.as_ref().map(|_| patched);
        pending.insert(rel, change);
    }

    write_changes(source_dir, pending)
}

/// Prior state of a path, for rollback
struct Snapshot {
    path: PathBuf,
    /// Content and mode, `None` if the path did not exist
    original: Option<(Vec<u8>, fs::Permissions)>,
}

impl Snapshot {
    fn take(path: &Path) -> io::Result<Self> {
        let original = match fs::read(path) {
            Ok(bytes) => Some((bytes, fs::metadata(path)?.permissions())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            original,
        })
    }

    fn restore(&self) -> io::Result<()> {
        match &self.original {
            Some((bytes, permissions)) => {
                fs::write(&self.path, bytes)?;
                fs::set_permissions(&self.path, permissions.clone())
            }
            None if self.path.exists() => fs::remove_file(&self.path),
            None => Ok(()),
        }
    }
}

fn write_changes(
    source_dir: &Path,
    pending: BTreeMap<PathBuf, Option<String>>,
) -> Result<AppliedPatch, PatchFailure> {
    let mut snapshots: Vec<Snapshot> = Vec::new();
    let mut created_dirs: Vec<PathBuf> = Vec::new();
    let mut applied = AppliedPatch::default();

    for (rel, change) in pending {
        let path = source_dir.join(&rel);
        let result = (|| -> io::Result<()> {
            snapshots.push(Snapshot::take(&path)?);

            match change {
                Some(content) => {
                    if let Some(parent) = path.parent() {
                        create_dirs(parent, &mut created_dirs)?;
                    }
                    fs::write(&path, content)
                }
                None => fs::remove_file(&path),
            }
        })();

        if let Err(e) = result {
            rollback(&snapshots, &created_dirs);
            return Err(PatchFailure::new(
                rel.display().to_string(),
                format!("write failed: {}", e),
            ));
        }
        applied.files.push(rel);
    }

    debug!("Patched {} file(s)", applied.files.len());
    Ok(applied)
}

fn create_dirs(dir: &Path, created: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut missing = Vec::new();
    let mut cursor = Some(dir);
    while let Some(d) = cursor {
        if d.exists() {
            break;
        }
        missing.push(d.to_path_buf());
        cursor = d.parent();
    }
    for d in missing.into_iter().rev() {
        fs::create_dir(&d)?;
        created.push(d);
    }
    Ok(())
}

fn rollback(snapshots: &[Snapshot], created_dirs: &[PathBuf]) {
    for snapshot in snapshots.iter().rev() {
        if let Err(e) = snapshot.restore() {
            tracing::error!("Failed to restore {}: {}", snapshot.path.display(), e);
        }
    }
    for dir in created_dirs.iter().rev() {
        let _ = fs::remove_dir(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MULTI: &str = "\
diff --git a/src/main.c b/src/main.c
index 83db48f..bf269f4 100644
--- a/src/main.c\t2014-01-01 00:00:00.000000000 +0000
+++ b/src/main.c\t2014-01-02 00:00:00.000000000 +0000
@@ -1,3 +1,3 @@
 #include <stdio.h>
-int answer = 41;
+int answer = 42;
 int main(void);
--- /dev/null
+++ b/NEWS
@@ -0,0 +1,1 @@
+patched
";

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(
            dir.path().join("src/main.c"),
            "#include <stdio.h>\nint answer = 41;\nint main(void);\n",
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_split_multi_file_diff() {
        let files = split_diff(MULTI);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].old_path.as_deref(), Some("a/src/main.c"));
        assert_eq!(files[1].old_path, None);
        assert_eq!(files[1].new_path.as_deref(), Some("b/NEWS"));
        assert!(!files[0].text.contains("index 83db48f"));
        assert!(!files[0].text.contains("2014-01-01"));
    }

    #[test]
    fn test_removed_line_that_looks_like_header() {
        let diff = "\
--- a/notes.txt
+++ b/notes.txt
@@ -1,2 +1,1 @@
--- a/not-a-header
 keep
";
        let files = split_diff(diff);
        assert_eq!(files.len(), 1);

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "-- a/not-a-header\nkeep\n").unwrap();
        apply_patch(dir.path(), diff, 1).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "keep\n");
    }

    #[test]
    fn test_apply_modify_and_create() {
        let dir = tree();
        let applied = apply_patch(dir.path(), MULTI, 1).unwrap();
        assert_eq!(applied.files.len(), 2);
        assert!(
            fs::read_to_string(dir.path().join("src/main.c"))
                .unwrap()
                .contains("answer = 42")
        );
        assert_eq!(fs::read_to_string(dir.path().join("NEWS")).unwrap(), "patched\n");
    }

    #[test]
    fn test_failed_hunk_changes_nothing() {
        let dir = tree();
        // Second file does not match; first file must stay untouched
        let diff = format!(
            "{}--- a/src/other.c\n+++ b/src/other.c\n@@ -1,1 +1,1 @@\n-old\n+new\n",
            MULTI
        );
        fs::write(dir.path().join("src/other.c"), "different\n").unwrap();

        let err = apply_patch(dir.path(), &diff, 1).unwrap_err();
        assert_eq!(err.file, "src/other.c");
        assert!(err.hunk.starts_with("hunk #1"), "{}", err.hunk);
        assert!(
            fs::read_to_string(dir.path().join("src/main.c"))
                .unwrap()
                .contains("answer = 41")
        );
        assert!(!dir.path().join("NEWS").exists());
    }

    #[test]
    fn test_second_hunk_reported() {
        let dir = TempDir::new().unwrap();
        let body: String = (1..=20).map(|n| format!("line {}\n", n)).collect();
        fs::write(dir.path().join("f.txt"), &body).unwrap();
        let diff = "\
--- a/f.txt
+++ b/f.txt
@@ -1,3 +1,3 @@
 line 1
-line 2
+line two
 line 3
@@ -15,3 +15,3 @@
 line 15
-line sixteen
+line 16
 line 17
";
        let err = apply_patch(dir.path(), diff, 1).unwrap_err();
        assert!(err.hunk.starts_with("hunk #2 (@@ -15,3 +15,3 @@)"), "{}", err.hunk);
        assert_eq!(fs::read_to_string(dir.path().join("f.txt")).unwrap(), body);
    }

    #[test]
    fn test_delete_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("gone.txt"), "bye\n").unwrap();
        let diff = "--- a/gone.txt\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-bye\n";
        apply_patch(dir.path(), diff, 1).unwrap();
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[test]
    fn test_rollback_restores_deleted_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let configure = dir.path().join("configure");
        fs::write(&configure, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&configure, fs::Permissions::from_mode(0o755)).unwrap();
        let created = dir.path().join("NEWS");

        let snapshots = vec![Snapshot::take(&configure).unwrap(), Snapshot::take(&created).unwrap()];
        fs::remove_file(&configure).unwrap();
        fs::write(&created, "new\n").unwrap();

        rollback(&snapshots, &[]);
        assert_eq!(fs::read_to_string(&configure).unwrap(), "#!/bin/sh\nexit 0\n");
        assert_eq!(fs::metadata(&configure).unwrap().permissions().mode() & 0o777, 0o755);
        assert!(!created.exists());
    }

    #[test]
    fn test_missing_file_and_escape() {
        let dir = TempDir::new().unwrap();
        let diff = "--- a/nope.c\n+++ b/nope.c\n@@ -1,1 +1,1 @@\n-a\n+b\n";
        let err = apply_patch(dir.path(), diff, 1).unwrap_err();
        assert_eq!(err.hunk, "file not found");

        let escape = "--- a/../x\n+++ b/../x\n@@ -0,0 +1,1 @@\n+evil\n";
        assert!(apply_patch(dir.path(), escape, 1).is_err());
    }

    #[test]
    fn test_strip_zero() {
        let dir = tree();
        let diff = "--- src/main.c\n+++ src/main.c\n@@ -2,1 +2,1 @@\n-int answer = 41;\n+int answer = 0;\n";
        apply_patch(dir.path(), diff, 0).unwrap();
        assert!(
            fs::read_to_string(dir.path().join("src/main.c"))
                .unwrap()
                .contains("answer = 0")
        );
    }

    #[test]
    fn test_empty_diff() {
        let dir = TempDir::new().unwrap();
        assert!(apply_patch(dir.path(), "just some text\n", 1).is_err());
    }

    #[test]
    fn test_into_error() {
        let err = PatchFailure::new("src/a.c", "hunk #1").into_error("pkg", "fix.diff");
        assert_eq!(err.category(), crate::error::ErrorCategory::Patch);
    }
}

// src/cellar/mod.rs

//! Installation manager: per-version kegs and the shared prefix
//!
//! Layout:
//!
//! ```text
//! <cellar>/<name>/<version>/                  keg, one per installed version
//! <cellar>/<name>/<version>/INSTALL_RECEIPT.json
//! <prefix>/<name> -> <cellar>/<name>/<version>
//! <prefix>/.install.lock
//! ```
//!
//! Builds install into their keg, never into the prefix. Linking swaps the
//! prefix symlink with a rename, so a reader sees either the old version or
//! the new one. Superseded kegs stay until `cleanup`.

pub mod lock;
pub mod record;

pub use lock::PrefixLock;
pub use record::{InstallationRecord, RECEIPT_FILE};

/// Age below which `cleanup` treats a keg without a receipt as in progress
pub const INCOMPLETE_KEG_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::InstalledPackages;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// The cellar and the shared prefix it links into
#[derive(Debug, Clone)]
pub struct Cellar {
    root: PathBuf,
    prefix: PathBuf,
}

impl Cellar {
    /// Relative paths are resolved against the working directory
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<PathBuf>) -> Self {
        Self {
            root: absolute(root.into()),
            prefix: absolute(prefix.into()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.cellar, &config.prefix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn lock_path(&self) -> PathBuf {
        self.prefix.join(".install.lock")
    }

    /// Staging directory of one package version
    pub fn keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.root.join(name).join(version)
    }

    /// Shared-prefix path of a package
    pub fn link_path(&self, name: &str) -> PathBuf {
        self.prefix.join(name)
    }

    /// Installation record of a version, if the keg is complete
    pub fn record(&self, name: &str, version: &str) -> Result<Option<InstallationRecord>> {
        let keg = self.keg_path(name, version);
        if !keg.is_dir() {
            return Ok(None);
        }
        InstallationRecord::load(&keg)
    }

    /// All complete records of a package, oldest first
    pub fn records(&self, name: &str) -> Result<Vec<InstallationRecord>> {
        let mut records = Vec::new();
        for version in self.keg_versions(name)? {
            if let Some(record) = self.record(name, &version)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.installed_at.cmp(&b.installed_at));
        Ok(records)
    }

    /// Packages with at least one keg directory
    pub fn packages(&self) -> Result<Vec<String>> {
        list_dirs(&self.root)
    }

    fn keg_versions(&self, name: &str) -> Result<Vec<String>> {
        list_dirs(&self.root.join(name))
    }

    /// Version the prefix currently exposes for a package
    ///
    /// Only a symlink into this package's cellar directory counts.
    pub fn linked_version(&self, name: &str) -> Result<Option<String>> {
        let link = self.link_path(name);
        match fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        Ok(self.owned_link_version(name, &fs::read_link(&link)?))
    }

    /// Version named by a link target, if it points at one of our kegs
    fn owned_link_version(&self, name: &str, target: &Path) -> Option<String> {
        let target = if target.is_relative() {
            self.prefix.join(target)
        } else {
            target.to_path_buf()
        };
        if target.parent() != Some(self.root.join(name).as_path()) {
            return None;
        }
        target
            .file_name()
            .and_then(|v| v.to_str())
            .map(str::to_string)
    }

    /// Create an empty keg for a build
    ///
    /// A leftover keg without a receipt (an interrupted install) is removed
    /// first. A complete keg is never overwritten.
    pub fn prepare_keg(&self, name: &str, version: &str) -> Result<PathBuf> {
        let keg = self.keg_path(name, version);
        if keg.exists() {
            if InstallationRecord::load(&keg)?.is_some() {
                return Err(Error::IoError(format!(
                    "{} {} is already installed at {}",
                    name,
                    version,
                    keg.display()
                )));
            }
            warn!("Removing incomplete keg {}", keg.display());
            fs::remove_dir_all(&keg)?;
        }
        fs::create_dir_all(&keg)?;
        Ok(keg)
    }

    /// Remove a keg that did not complete
    pub fn discard_keg(&self, keg: &Path) -> Result<()> {
        if keg.exists() {
            debug!("Discarding keg {}", keg.display());
            fs::remove_dir_all(keg)?;
        }
        if let Some(parent) = keg.parent()
            && parent.starts_with(&self.root)
            && fs::read_dir(parent).map(|mut d| d.next().is_none()).unwrap_or(false)
        {
            let _ = fs::remove_dir(parent);
        }
        Ok(())
    }

    /// Point `<prefix>/<name>` at a recorded version
    ///
    /// Returns the previously linked version. Fails with
    /// [`Error::LinkConflict`] and leaves the prefix untouched if the link
    /// path is occupied by anything other than a link into this package's
    /// cellar directory.
    pub fn link(&self, name: &str, version: &str) -> Result<Option<String>> {
        let record = self
            .record(name, version)?
            .ok_or_else(|| Error::NotInstalled(format!("{} {}", name, version)))?;

        fs::create_dir_all(&self.prefix)?;
        let _lock = PrefixLock::acquire(self.lock_path())?;

        let link = self.link_path(name);
        let previous = match fs::symlink_metadata(&link) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = fs::read_link(&link)?;
                match self.owned_link_version(name, &target) {
                    Some(v) => Some(v),
                    None => {
                        return Err(Error::LinkConflict {
                            package: name.to_string(),
                            path: link,
                        });
                    }
                }
            }
            Ok(_) => {
                return Err(Error::LinkConflict {
                    package: name.to_string(),
                    path: link,
                });
            }
        };

        if previous.as_deref() == Some(version) {
            debug!("{} {} is already linked", name, version);
            return Ok(previous);
        }

        let temp = self
            .prefix
            .join(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4()));
        std::os::unix::fs::symlink(&record.keg_path, &temp)?;
        if let Err(e) = fs::rename(&temp, &link) {
            let _ = fs::remove_file(&temp);
            return Err(Error::IoError(format!(
                "Failed to link {}: {}",
                link.display(),
                e
            )));
        }

        match &previous {
            Some(old) => info!("Linked {} {} (was {})", name, version, old),
            None => info!("Linked {} {}", name, version),
        }
        Ok(previous)
    }

    /// Remove the prefix link of a package, if it is ours
    pub fn unlink(&self, name: &str) -> Result<bool> {
        let _lock = PrefixLock::acquire(self.lock_path())?;
        self.unlink_locked(name)
    }

    fn unlink_locked(&self, name: &str) -> Result<bool> {
        if self.linked_version(name)?.is_none() {
            return Ok(false);
        }
        fs::remove_file(self.link_path(name))?;
        info!("Unlinked {}", name);
        Ok(true)
    }

    /// Linked packages whose linked record depends on `name` at runtime
    pub fn linked_dependents(&self, name: &str) -> Result<Vec<String>> {
        let mut dependents = Vec::new();
        for package in self.packages()? {
            if package == name {
                continue;
            }
            let Some(version) = self.linked_version(&package)? else {
                continue;
            };
            if let Some(record) = self.record(&package, &version)?
                && record.runtime_dependencies.iter().any(|d| d == name)
            {
                dependents.push(package);
            }
        }
        Ok(dependents)
    }

    /// Remove a package: its link and every keg
    ///
    /// Refuses while linked packages depend on it unless
    /// `ignore_dependencies` is set.
    pub fn uninstall(&self, name: &str, ignore_dependencies: bool) -> Result<Vec<String>> {
        let versions = self.keg_versions(name)?;
        if versions.is_empty() {
            return Err(Error::NotInstalled(name.to_string()));
        }

        if !ignore_dependencies {
            let dependents = self.linked_dependents(name)?;
            if !dependents.is_empty() {
                return Err(Error::HasDependents {
                    package: name.to_string(),
                    dependents,
                });
            }
        }

        fs::create_dir_all(&self.prefix)?;
        let _lock = PrefixLock::acquire(self.lock_path())?;
        self.unlink_locked(name)?;

        for version in &versions {
            let keg = self.keg_path(name, version);
            fs::remove_dir_all(&keg)?;
            info!("Removed {}", keg.display());
        }
        let _ = fs::remove_dir(self.root.join(name));

        Ok(versions)
    }

    /// Delete kegs that are not linked
    ///
    /// Covers superseded records and interrupted installs. A keg without a
    /// receipt that changed within [`INCOMPLETE_KEG_GRACE`] may belong to a
    /// build still running elsewhere (builds do not take the prefix lock),
    /// so it is left alone. Returns the removed keg paths.
    pub fn cleanup(&self, name: Option<&str>) -> Result<Vec<PathBuf>> {
        let packages = match name {
            Some(name) => vec![name.to_string()],
            None => self.packages()?,
        };

        fs::create_dir_all(&self.prefix)?;
        let _lock = PrefixLock::acquire(self.lock_path())?;

        let mut removed = Vec::new();
        for package in packages {
            let linked = self.linked_version(&package)?;
            for version in self.keg_versions(&package)? {
                if linked.as_deref() == Some(version.as_str()) {
                    continue;
                }
                let keg = self.keg_path(&package, &version);
                if InstallationRecord::load(&keg)?.is_none() && recently_modified(&keg)? {
                    debug!("Keeping {}: possibly still being built", keg.display());
                    continue;
                }
                fs::remove_dir_all(&keg)?;
                info!("Removed {}", keg.display());
                removed.push(keg);
            }
        }
        Ok(removed)
    }
}

impl InstalledPackages for Cellar {
    fn linked_version(&self, name: &str) -> Option<String> {
        Cellar::linked_version(self, name).unwrap_or_else(|e| {
            warn!("Could not read link of {}: {}", name, e);
            None
        })
    }

    fn recorded_options(&self, name: &str, version: &str) -> Option<BTreeSet<String>> {
        self.record(name, version)
            .ok()
            .flatten()
            .map(|r| r.options.into_iter().collect())
    }
}

/// Whether a keg or any of its top-level entries changed within the grace period
fn recently_modified(keg: &Path) -> Result<bool> {
    let mut newest = fs::metadata(keg)?.modified()?;
    for entry in fs::read_dir(keg)? {
        let modified = entry?.metadata()?.modified()?;
        newest = newest.max(modified);
    }
    let age = SystemTime::now()
        .duration_since(newest)
        .unwrap_or(Duration::ZERO);
    Ok(age < INCOMPLETE_KEG_GRACE)
}

fn absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::path::absolute(&path).unwrap_or(path)
}

fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && let Some(name) = entry.file_name().to_str()
            && !name.starts_with('.')
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::Variant;
    use chrono::Utc;
    use tempfile::TempDir;

    /// `path` relative to `base`, via `..` components
    fn pathdiff(path: &Path, base: &Path) -> PathBuf {
        let common = path
            .components()
            .zip(base.components())
            .take_while(|(a, b)| a == b)
            .count();
        let mut rel = PathBuf::new();
        for _ in base.components().skip(common) {
            rel.push("..");
        }
        for part in path.components().skip(common) {
            rel.push(part);
        }
        rel
    }

    fn setup() -> (TempDir, Cellar) {
        let dir = TempDir::new().unwrap();
        let cellar = Cellar::new(dir.path().join("cellar"), dir.path().join("prefix"));
        (dir, cellar)
    }

    fn install(cellar: &Cellar, name: &str, version: &str, deps: &[&str]) {
        let keg = cellar.prepare_keg(name, version).unwrap();
        fs::create_dir_all(keg.join("bin")).unwrap();
        fs::write(keg.join("bin").join(name), version).unwrap();
        InstallationRecord {
            name: name.into(),
            version: version.into(),
            variant: Variant::Stable,
            options: Vec::new(),
            runtime_dependencies: deps.iter().map(|d| d.to_string()).collect(),
            keg_path: keg,
            link_path: cellar.link_path(name),
            installed_at: Utc::now(),
        }
        .save()
        .unwrap();
    }

    #[test]
    fn test_link_and_switch() {
        let (_dir, cellar) = setup();
        install(&cellar, "foo", "1.0", &[]);
        install(&cellar, "foo", "2.0", &[]);

        assert_eq!(cellar.link("foo", "1.0").unwrap(), None);
        assert_eq!(cellar.linked_version("foo").unwrap().as_deref(), Some("1.0"));
        assert_eq!(
            fs::read_to_string(cellar.link_path("foo").join("bin/foo")).unwrap(),
            "1.0"
        );

        assert_eq!(cellar.link("foo", "2.0").unwrap().as_deref(), Some("1.0"));
        assert_eq!(cellar.linked_version("foo").unwrap().as_deref(), Some("2.0"));

        // Superseded record is retained and can be relinked
        assert_eq!(cellar.records("foo").unwrap().len(), 2);
        cellar.link("foo", "1.0").unwrap();
        assert_eq!(cellar.linked_version("foo").unwrap().as_deref(), Some("1.0"));
    }

    #[test]
    fn test_link_waits_for_prefix_lock() {
        let (_dir, cellar) = setup();
        install(&cellar, "foo", "1.0", &[]);
        install(&cellar, "foo", "2.0", &[]);
        cellar.link("foo", "1.0").unwrap();

        let held = PrefixLock::acquire(cellar.lock_path()).unwrap();
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let other = cellar.clone();
        let linker = std::thread::spawn(move || {
            let result = other.link("foo", "2.0");
            done_tx.send(()).unwrap();
            result
        });

        // Blocked behind the lock; the prefix is unchanged
        assert!(done_rx
            .recv_timeout(std::time::Duration::from_millis(300))
            .is_err());
        assert_eq!(cellar.linked_version("foo").unwrap().as_deref(), Some("1.0"));

        drop(held);
        assert_eq!(linker.join().unwrap().unwrap().as_deref(), Some("1.0"));
        assert_eq!(cellar.linked_version("foo").unwrap().as_deref(), Some("2.0"));
    }

    #[test]
    fn test_concurrent_links_serialize() {
        let (_dir, cellar) = setup();
        install(&cellar, "foo", "1.0", &[]);
        install(&cellar, "foo", "2.0", &[]);

        let handles: Vec<_> = ["1.0", "2.0"]
            .into_iter()
            .map(|version| {
                let cellar = cellar.clone();
                std::thread::spawn(move || (version, cellar.link("foo", version).unwrap()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // One link went first; the other saw it as the previous version
        let first: Vec<_> = results.iter().filter(|(_, prev)| prev.is_none()).collect();
        assert_eq!(first.len(), 1);
        let (last, previous) = results.iter().find(|(_, prev)| prev.is_some()).unwrap();
        assert_eq!(previous.as_deref(), Some(first[0].0));
        assert_eq!(cellar.linked_version("foo").unwrap().as_deref(), Some(*last));

        let mut entries: Vec<String> = fs::read_dir(cellar.prefix())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(entries, vec![".install.lock", "foo"]);
    }

    #[test]
    fn test_relinking_through_relative_paths() {
        let dir = TempDir::new().unwrap();
        let cwd = std::env::current_dir().unwrap();
        let rel = |sub: &str| pathdiff(&dir.path().join(sub), &cwd);
        let cellar = Cellar::new(rel("cellar"), rel("prefix"));
        assert!(cellar.root().is_absolute());
        install(&cellar, "foo", "1.0", &[]);
        install(&cellar, "foo", "2.0", &[]);

        cellar.link("foo", "1.0").unwrap();
        let target = fs::read_link(cellar.link_path("foo")).unwrap();
        assert!(target.is_absolute());
        assert!(cellar.link_path("foo").join("bin/foo").exists());

        assert_eq!(cellar.link("foo", "2.0").unwrap().as_deref(), Some("1.0"));
        assert_eq!(cellar.linked_version("foo").unwrap().as_deref(), Some("2.0"));
    }

    #[test]
    fn test_link_requires_record() {
        let (_dir, cellar) = setup();
        cellar.prepare_keg("foo", "1.0").unwrap();
        assert!(matches!(cellar.link("foo", "1.0"), Err(Error::NotInstalled(_))));
        assert!(!cellar.link_path("foo").exists());
    }

    #[test]
    fn test_link_conflict_leaves_file_alone() {
        let (_dir, cellar) = setup();
        install(&cellar, "foo", "1.0", &[]);
        fs::create_dir_all(cellar.prefix()).unwrap();
        fs::write(cellar.link_path("foo"), "precious").unwrap();

        let err = cellar.link("foo", "1.0").unwrap_err();
        assert!(matches!(err, Error::LinkConflict { .. }));
        assert_eq!(fs::read_to_string(cellar.link_path("foo")).unwrap(), "precious");
    }

    #[test]
    fn test_foreign_symlink_is_conflict() {
        let (dir, cellar) = setup();
        install(&cellar, "foo", "1.0", &[]);
        fs::create_dir_all(cellar.prefix()).unwrap();
        std::os::unix::fs::symlink(dir.path(), cellar.link_path("foo")).unwrap();

        assert!(matches!(
            cellar.link("foo", "1.0"),
            Err(Error::LinkConflict { .. })
        ));
        assert_eq!(fs::read_link(cellar.link_path("foo")).unwrap(), dir.path());
    }

    #[test]
    fn test_prepare_keg_replaces_incomplete() {
        let (_dir, cellar) = setup();
        let keg = cellar.prepare_keg("foo", "1.0").unwrap();
        fs::write(keg.join("half-written"), "x").unwrap();

        let keg = cellar.prepare_keg("foo", "1.0").unwrap();
        assert!(!keg.join("half-written").exists());

        install(&cellar, "bar", "1.0", &[]);
        assert!(cellar.prepare_keg("bar", "1.0").is_err());
    }

    #[test]
    fn test_uninstall_refuses_with_dependents() {
        let (_dir, cellar) = setup();
        install(&cellar, "glib", "2.0", &[]);
        install(&cellar, "app", "1.0", &["glib"]);
        cellar.link("glib", "2.0").unwrap();
        cellar.link("app", "1.0").unwrap();

        let err = cellar.uninstall("glib", false).unwrap_err();
        assert!(matches!(err, Error::HasDependents { dependents, .. } if dependents == vec!["app"]));
        assert!(cellar.keg_path("glib", "2.0").exists());

        cellar.uninstall("app", false).unwrap();
        assert_eq!(cellar.uninstall("glib", false).unwrap(), vec!["2.0"]);
        assert!(!cellar.link_path("glib").exists());
        assert!(cellar.packages().unwrap().is_empty());
    }

    #[test]
    fn test_uninstall_missing() {
        let (_dir, cellar) = setup();
        assert!(matches!(cellar.uninstall("nope", false), Err(Error::NotInstalled(_))));
    }

    #[test]
    fn test_cleanup_keeps_linked() {
        let (_dir, cellar) = setup();
        install(&cellar, "foo", "1.0", &[]);
        install(&cellar, "foo", "2.0", &[]);
        cellar.link("foo", "2.0").unwrap();

        let removed = cellar.cleanup(Some("foo")).unwrap();
        assert_eq!(removed, vec![cellar.keg_path("foo", "1.0")]);
        assert!(cellar.keg_path("foo", "2.0").exists());
        assert_eq!(cellar.linked_version("foo").unwrap().as_deref(), Some("2.0"));
    }

    #[test]
    fn test_cleanup_spares_keg_under_construction() {
        let (_dir, cellar) = setup();
        let building = cellar.prepare_keg("foo", "3.0").unwrap();
        fs::write(building.join("partial.o"), "x").unwrap();
        assert!(cellar.cleanup(Some("foo")).unwrap().is_empty());
        assert!(building.exists());

        // Left over from an interrupted install long ago
        let stale = SystemTime::now() - INCOMPLETE_KEG_GRACE * 2;
        for path in [building.join("partial.o"), building.clone()] {
            fs::File::open(&path).unwrap().set_modified(stale).unwrap();
        }
        assert_eq!(cellar.cleanup(Some("foo")).unwrap(), vec![building.clone()]);
        assert!(!building.exists());
    }

    #[test]
    fn test_installed_packages_view() {
        let (_dir, cellar) = setup();
        install(&cellar, "foo", "1.0", &[]);
        let view: &dyn InstalledPackages = &cellar;
        assert_eq!(view.recorded_options("foo", "1.0"), Some(BTreeSet::new()));
        assert_eq!(view.recorded_options("foo", "2.0"), None);
        assert!(view.linked_version("foo").is_none());
        cellar.link("foo", "1.0").unwrap();
        assert_eq!(view.linked_version("foo").as_deref(), Some("1.0"));
    }
}

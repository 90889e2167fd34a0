// src/config.rs

//! Engine configuration
//!
//! Configuration is read from a TOML file. Lookup order: an explicit path,
//! then `$FORMULARY_CONFIG`, then `<config dir>/formulary/config.toml`. If
//! none exists, defaults rooted at `/opt/formulary` are used.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "FORMULARY_CONFIG";

const DEFAULT_ROOT: &str = "/opt/formulary";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of per-version installation directories
    pub cellar: PathBuf,
    /// Shared prefix holding one symlink per linked package
    pub prefix: PathBuf,
    /// Downloaded source archives, keyed by checksum
    pub cache_dir: PathBuf,
    /// Package-private build directories
    pub build_dir: PathBuf,
    /// Directories searched for `<name>.toml` recipes, in order
    pub recipe_paths: Vec<PathBuf>,
    /// Job count used when a package allows unlimited parallelism
    pub jobs: u32,
    /// Default per-step timeout
    pub step_timeout_secs: u64,
    /// Download attempts per URL
    pub fetch_retries: u32,
    /// Base delay between download attempts, multiplied by the attempt number
    pub retry_delay_ms: u64,
    /// Keep build directories after a build finishes
    pub keep_build_dirs: bool,
}

impl Default for Config {
    fn default() -> Self {
        let root = PathBuf::from(DEFAULT_ROOT);
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);

        Self {
            cellar: root.join("cellar"),
            prefix: root.join("prefix"),
            cache_dir: root.join("cache"),
            build_dir: root.join("build"),
            recipe_paths: vec![root.join("recipes")],
            jobs,
            step_timeout_secs: 3600, // 1 hour
            fetch_retries: 3,
            retry_delay_ms: 1000,
            keep_build_dirs: false,
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Parse(format!("Invalid config: {}", e)))
    }

    /// Read configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Load configuration following the lookup order
    ///
    /// An explicitly named file must exist; the implicit locations are
    /// skipped when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            debug!("Loading config from {}", path.display());
            return Self::from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            debug!("Loading config from ${} ({})", CONFIG_ENV, path.display());
            return Self::from_file(&path);
        }

        if let Some(path) = Self::default_path()
            && path.is_file()
        {
            debug!("Loading config from {}", path.display());
            return Self::from_file(&path);
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Per-user config location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("formulary").join("config.toml"))
    }

    /// Root every path at a single directory
    ///
    /// Used for isolated installs and tests.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            cellar: root.join("cellar"),
            prefix: root.join("prefix"),
            cache_dir: root.join("cache"),
            build_dir: root.join("build"),
            recipe_paths: vec![root.join("recipes")],
            ..Self::default()
        }
    }

    /// Resolve relative storage paths against the working directory
    ///
    /// Prefix links store the keg path as their target, so a relative
    /// cellar would produce links that dangle from inside the prefix.
    pub fn make_absolute(&mut self) -> Result<()> {
        for path in [
            &mut self.cellar,
            &mut self.prefix,
            &mut self.cache_dir,
            &mut self.build_dir,
        ] {
            if path.is_relative() {
                *path = std::path::absolute(&*path)?;
            }
        }
        Ok(())
    }

    /// Path of the prefix lock file
    pub fn lock_path(&self) -> PathBuf {
        self.prefix.join(".install.lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.jobs > 0);
        assert_eq!(config.cellar, PathBuf::from("/opt/formulary/cellar"));
        assert_eq!(config.lock_path(), PathBuf::from("/opt/formulary/prefix/.install.lock"));
        assert_eq!(config.fetch_retries, 3);
        assert!(!config.keep_build_dirs);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
prefix = "/usr/local/formulary"
jobs = 2
recipe_paths = ["/srv/recipes", "/home/me/recipes"]
"#,
        )
        .unwrap();

        assert_eq!(config.prefix, PathBuf::from("/usr/local/formulary"));
        assert_eq!(config.jobs, 2);
        assert_eq!(config.recipe_paths.len(), 2);
        assert_eq!(config.cellar, Config::default().cellar);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("jobs = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "step_timeout_secs = 60\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.step_timeout_secs, 60);

        let missing = dir.path().join("missing.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_make_absolute() {
        let mut config = Config::from_toml("cellar = \"cellar\"\nprefix = \"/srv/prefix\"\n").unwrap();
        config.make_absolute().unwrap();
        assert_eq!(config.cellar, std::env::current_dir().unwrap().join("cellar"));
        assert_eq!(config.prefix, PathBuf::from("/srv/prefix"));
        assert!(config.build_dir.is_absolute());
    }

    #[test]
    fn test_rooted_at() {
        let config = Config::rooted_at(Path::new("/tmp/x"));
        assert_eq!(config.prefix, PathBuf::from("/tmp/x/prefix"));
        assert_eq!(config.build_dir, PathBuf::from("/tmp/x/build"));
    }
}

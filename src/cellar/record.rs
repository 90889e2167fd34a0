// src/cellar/record.rs

//! Installation records
//!
//! Each complete keg carries an `INSTALL_RECEIPT.json`. A keg without a
//! receipt is an interrupted install and is never linked.

use crate::error::{Error, Result};
use crate::recipe::Variant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Receipt file name inside a keg
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// A completed installation of one package version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub name: String,
    pub version: String,
    pub variant: Variant,
    /// Options the package was built with
    #[serde(default)]
    pub options: Vec<String>,
    /// Packages this one needs at runtime
    #[serde(default)]
    pub runtime_dependencies: Vec<String>,
    /// Staged (keg) directory
    pub keg_path: PathBuf,
    /// Shared-prefix path the keg is exposed at when linked
    pub link_path: PathBuf,
    pub installed_at: DateTime<Utc>,
}

impl InstallationRecord {
    pub fn receipt_path(keg: &Path) -> PathBuf {
        keg.join(RECEIPT_FILE)
    }

    /// Read the receipt of a keg, or `None` if the keg has none
    pub fn load(keg: &Path) -> Result<Option<Self>> {
        let path = Self::receipt_path(keg);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::Parse(format!("Invalid receipt {}: {}", path.display(), e)))
    }

    /// Write the receipt into its keg
    ///
    /// The receipt is written to a temporary file and renamed into place so
    /// that a crash never leaves a half-written receipt behind.
    pub fn save(&self) -> Result<()> {
        let path = Self::receipt_path(&self.keg_path);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Parse(format!("Failed to serialize receipt: {}", e)))?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.keg_path)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&path)
            .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }
}

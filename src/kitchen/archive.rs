// src/kitchen/archive.rs

//! Source archive extraction
//!
//! Tarballs compressed with gzip, xz, or zstd are unpacked in-process.
//! bzip2 goes through the system `tar`.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Archive formats by file name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    TarZst,
    TarBz2,
}

impl ArchiveFormat {
    /// Detect the format from a file name
    pub fn detect(filename: &str) -> Option<Self> {
        let name = filename.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// Extract an archive into `dest`
///
/// `filename` decides the format; the archive itself may be stored under a
/// different name (the source cache keys files by checksum).
pub fn extract_archive(archive: &Path, filename: &str, dest: &Path) -> Result<()> {
    let format = ArchiveFormat::detect(filename)
        .ok_or_else(|| Error::IoError(format!("Unknown archive format: {}", filename)))?;
    fs::create_dir_all(dest)?;
    debug!("Extracting {} ({:?}) to {}", filename, format, dest.display());

    let file = File::open(archive)?;
    match format {
        ArchiveFormat::Tar => unpack(file, dest),
        ArchiveFormat::TarGz => unpack(GzDecoder::new(file), dest),
        ArchiveFormat::TarXz => unpack(xz2::read::XzDecoder::new(file), dest),
        ArchiveFormat::TarZst => unpack(zstd::stream::read::Decoder::new(file)?, dest),
        ArchiveFormat::TarBz2 => {
            let output = Command::new("tar")
                .arg("-xjf")
                .arg(archive)
                .arg("-C")
                .arg(dest)
                .output()
                .map_err(|e| Error::IoError(format!("tar failed: {}", e)))?;
            if !output.status.success() {
                return Err(Error::IoError(format!(
                    "Failed to extract {}: {}",
                    filename,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Ok(())
        }
    }
}

fn unpack<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| Error::IoError(format!("Failed to extract archive: {}", e)))
}

/// Directory to build in after extraction
///
/// Archives usually wrap everything in one top-level directory; if so, that
/// directory is the source root.
pub fn source_root(extracted: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(extracted)?.filter_map(|e| e.ok()).collect();
    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        return Ok(entries[0].path());
    }
    Ok(extracted.to_path_buf())
}

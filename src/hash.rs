// src/hash.rs

//! Checksums for source archives and external patches
//!
//! Recipes declare integrity checksums in prefixed form, e.g.
//! `sha256:9f86d081...`. Only cryptographic algorithms are accepted since the
//! checksum is the sole trust anchor for a downloaded tarball.

use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Digest length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Digest length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Checksum parsing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    UnknownAlgorithm(String),
    MissingPrefix(String),
    InvalidLength { expected: usize, got: usize },
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown checksum algorithm: {}", name),
            Self::MissingPrefix(s) => {
                write!(f, "checksum '{}' must be prefixed, e.g. sha256:<hex>", s)
            }
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid checksum length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in checksum: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// An expected checksum with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl Checksum {
    /// Create a checksum, validating the digest length and characters
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        let expected_len = algorithm.hex_len();

        if value.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    /// Parse a prefixed checksum string such as `sha256:abc...`
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        let (algo, digest) = s
            .split_once(':')
            .ok_or_else(|| HashError::MissingPrefix(s.to_string()))?;
        Self::new(algo.parse()?, digest)
    }

    /// Format as `algorithm:hex`
    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.value)
    }

    /// Filesystem-safe cache key for this checksum
    pub fn cache_key(&self) -> String {
        format!("{}_{}", self.algorithm.name(), self.value)
    }

    /// Check whether a file's content matches this checksum
    pub fn matches_file(&self, path: &Path) -> io::Result<bool> {
        Ok(hash_file(self.algorithm, path)? == self.value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.name(), self.value)
    }
}

impl FromStr for Checksum {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_prefixed(s)
    }
}

/// Hex digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

/// Hex digest of everything a reader yields
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut buffer = [0u8; 8192];
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = reader.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            loop {
                let n = reader.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

/// Hex digest of a file, streamed
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    hash_reader(algorithm, &mut file)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_parse_prefixed() {
        let checksum = Checksum::parse_prefixed(&format!("sha256:{}", HELLO_SHA256)).unwrap();
        assert_eq!(checksum.algorithm, HashAlgorithm::Sha256);
        assert_eq!(checksum.value, HELLO_SHA256);
        assert_eq!(checksum.to_prefixed_string(), format!("sha256:{}", HELLO_SHA256));
    }

    #[test]
    fn test_rejects_unprefixed_and_weak() {
        assert!(matches!(
            Checksum::parse_prefixed(HELLO_SHA256),
            Err(HashError::MissingPrefix(_))
        ));
        assert!(matches!(
            Checksum::parse_prefixed("sha1:081a2daf85e3257d7a2699e84a330712e3e5b9bb"),
            Err(HashError::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            Checksum::parse_prefixed("sha256:abc"),
            Err(HashError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_uppercase_is_normalized() {
        let checksum = Checksum::new(HashAlgorithm::Sha256, HELLO_SHA256.to_uppercase()).unwrap();
        assert_eq!(checksum.value, HELLO_SHA256);
    }

    #[test]
    fn test_hash_bytes() {
        assert_eq!(hash_bytes(HashAlgorithm::Sha256, b"hello world"), HELLO_SHA256);
        assert_eq!(hash_bytes(HashAlgorithm::Sha512, b"").len(), 128);
    }

    #[test]
    fn test_matches_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello world").unwrap();

        let good = Checksum::new(HashAlgorithm::Sha256, HELLO_SHA256).unwrap();
        assert!(good.matches_file(&path).unwrap());

        let bad = Checksum::new(HashAlgorithm::Sha256, "0".repeat(64)).unwrap();
        assert!(!bad.matches_file(&path).unwrap());
    }

    #[test]
    fn test_cache_key_is_path_safe() {
        let checksum = Checksum::new(HashAlgorithm::Sha256, HELLO_SHA256).unwrap();
        assert!(!checksum.cache_key().contains(':'));
        assert!(!checksum.cache_key().contains('/'));
    }
}

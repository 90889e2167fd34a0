// src/error.rs

//! Error types for the formula engine
//!
//! Every failure the engine can report maps onto one [`ErrorCategory`], and
//! the category decides the process exit code of the CLI.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by recipe loading, resolution, building, and linking
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or inconsistent recipe
    #[error("Specification error in '{package}': {message}")]
    Specification { package: String, message: String },

    /// Dependency cycle among active edges
    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// Mutually exclusive options enabled together
    #[error("Conflicting options for '{package}': '{first}' and '{second}' are mutually exclusive")]
    OptionConflict {
        package: String,
        first: String,
        second: String,
    },

    /// Flag does not name a declared option
    #[error("Unknown option '{option}' for '{package}'")]
    UnknownOption { package: String, option: String },

    /// Installed keg of the planned version was built with other options
    #[error(
        "'{package}' {version} is installed with options [{}] but [{}] is needed; uninstall it to rebuild",
        .installed.join(", "),
        .requested.join(", ")
    )]
    OptionMismatch {
        package: String,
        version: String,
        installed: Vec<String>,
        requested: Vec<String>,
    },

    /// Source download failed after all retries
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Downloaded content does not match the declared checksum
    #[error("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// External patch could not be fetched
    #[error("Failed to fetch patch '{patch}' for '{package}': {reason}")]
    PatchFetch {
        package: String,
        patch: String,
        reason: String,
    },

    /// Patch did not apply; the source tree was restored
    #[error("Patch '{patch}' failed for '{package}' at {file}: {hunk}")]
    PatchApply {
        package: String,
        patch: String,
        file: String,
        hunk: String,
    },

    /// Toolchain step exited unsuccessfully
    #[error("{phase} step failed for '{package}' with exit status {status}: {detail}")]
    BuildFailure {
        package: String,
        phase: String,
        status: i32,
        detail: String,
    },

    /// Toolchain step exceeded its timeout and was terminated
    #[error("{phase} step for '{package}' timed out after {}s", .timeout.as_secs())]
    BuildTimeout {
        package: String,
        phase: String,
        timeout: Duration,
    },

    /// Post-install smoke test step failed
    #[error("Test of '{package}' failed at `{step}`: {detail}")]
    TestFailure {
        package: String,
        step: String,
        detail: String,
    },

    /// User aborted the operation
    #[error("Operation cancelled during {phase} of '{package}'")]
    Cancelled { package: String, phase: String },

    /// Shared-prefix path is occupied by a file no record owns
    #[error("Refusing to link '{package}': {} is not managed by formulary", .path.display())]
    LinkConflict { package: String, path: PathBuf },

    /// Operation on a package or version that is not installed
    #[error("{0} is not installed")]
    NotInstalled(String),

    /// Uninstall blocked by linked dependents
    #[error("Refusing to uninstall '{package}': required by {}", .dependents.join(", "))]
    HasDependents {
        package: String,
        dependents: Vec<String>,
    },

    /// Prefix lock could not be taken
    #[error("Lock error: {0}")]
    Lock(String),

    /// Malformed input outside a recipe (config, receipts)
    #[error("Parse error: {0}")]
    Parse(String),

    /// I/O error with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Raw I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of errors, used for exit codes and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Specification,
    Resolution,
    Fetch,
    Patch,
    Build,
    Link,
    Cancelled,
    Other,
}

impl ErrorCategory {
    /// Process exit code for this category
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Other => 1,
            Self::Specification => 10,
            Self::Resolution => 11,
            Self::Patch => 12,
            Self::Build => 13,
            Self::Link => 14,
            Self::Fetch => 15,
            Self::Cancelled => 130,
        }
    }
}

impl Error {
    /// Shorthand for a specification error
    pub fn spec(package: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Specification {
            package: package.into(),
            message: message.into(),
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Specification { .. } | Self::Cycle { .. } => ErrorCategory::Specification,
            Self::OptionConflict { .. }
            | Self::UnknownOption { .. }
            | Self::OptionMismatch { .. } => ErrorCategory::Resolution,
            Self::Fetch { .. } | Self::ChecksumMismatch { .. } => ErrorCategory::Fetch,
            Self::PatchFetch { .. } | Self::PatchApply { .. } => ErrorCategory::Patch,
            Self::BuildFailure { .. } | Self::BuildTimeout { .. } | Self::TestFailure { .. } => {
                ErrorCategory::Build
            }
            Self::LinkConflict { .. } => ErrorCategory::Link,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::NotInstalled(_)
            | Self::HasDependents { .. }
            | Self::Lock(_)
            | Self::Parse(_)
            | Self::IoError(_)
            | Self::Io(_) => ErrorCategory::Other,
        }
    }

    /// Whether a fetch attempt that failed with this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::ChecksumMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let categories = [
            ErrorCategory::Specification,
            ErrorCategory::Resolution,
            ErrorCategory::Fetch,
            ErrorCategory::Patch,
            ErrorCategory::Build,
            ErrorCategory::Link,
            ErrorCategory::Cancelled,
            ErrorCategory::Other,
        ];
        let codes: std::collections::HashSet<i32> =
            categories.iter().map(|c| c.exit_code()).collect();
        assert_eq!(codes.len(), categories.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_cycle_message_names_path() {
        let err = Error::Cycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
        assert_eq!(err.category(), ErrorCategory::Specification);
    }

    #[test]
    fn test_timeout_is_build_category() {
        let err = Error::BuildTimeout {
            package: "foo".into(),
            phase: "build".into(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.category(), ErrorCategory::Build);
        assert!(err.to_string().contains("5s"));
    }
}

// src/kitchen/report.rs

//! Outcome reporting for an install run

use crate::cellar::InstallationRecord;
use crate::error::Error;
use std::fmt;
use std::path::PathBuf;

/// Why a package was not attempted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A dependency failed (or was itself blocked by this package)
    BlockedBy(String),
    /// The run was cancelled before the package started
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BlockedBy(package) => write!(f, "blocked by {}", package),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// What happened to one package
#[derive(Debug)]
pub enum PackageOutcome {
    /// Built, installed, and linked
    Installed(InstallationRecord),
    /// Retained record relinked
    Linked,
    /// Already linked at the planned version
    Satisfied,
    Failed(Error),
    Skipped(SkipReason),
}

/// Per-package entry of an [`InstallReport`]
#[derive(Debug)]
pub struct PackageReport {
    pub package: String,
    pub version: String,
    pub outcome: PackageOutcome,
    /// Build log of a failed build, kept for inspection
    pub log_path: Option<PathBuf>,
}

impl PackageReport {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            PackageOutcome::Installed(_) | PackageOutcome::Linked | PackageOutcome::Satisfied
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, PackageOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, PackageOutcome::Skipped(_))
    }

    /// Short status for summaries
    pub fn status(&self) -> String {
        match &self.outcome {
            PackageOutcome::Installed(_) => "installed".to_string(),
            PackageOutcome::Linked => "linked".to_string(),
            PackageOutcome::Satisfied => "already installed".to_string(),
            PackageOutcome::Failed(e) => format!("failed: {}", e),
            PackageOutcome::Skipped(reason) => reason.to_string(),
        }
    }
}

/// Result of installing a build plan
#[derive(Debug, Default)]
pub struct InstallReport {
    pub root: String,
    pub packages: Vec<PackageReport>,
}

impl InstallReport {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            packages: Vec::new(),
        }
    }

    pub fn get(&self, package: &str) -> Option<&PackageReport> {
        self.packages.iter().find(|p| p.package == package)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &PackageReport> {
        self.packages.iter().filter(|p| p.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PackageReport> {
        self.packages.iter().filter(|p| p.is_failure())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &PackageReport> {
        self.packages.iter().filter(|p| p.is_skipped())
    }

    pub fn is_success(&self) -> bool {
        self.packages.iter().all(PackageReport::is_success)
    }

    /// Whether the plan was cut short by cancellation
    pub fn was_cancelled(&self) -> bool {
        self.packages.iter().any(|p| {
            matches!(
                p.outcome,
                PackageOutcome::Failed(Error::Cancelled { .. })
                    | PackageOutcome::Skipped(SkipReason::Cancelled)
            )
        })
    }

    /// Take the first failure's error
    pub fn into_first_error(self) -> Option<Error> {
        self.packages.into_iter().find_map(|p| match p.outcome {
            PackageOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    /// Human-readable summary lines
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let group = |reports: Vec<&PackageReport>| -> Vec<String> {
            reports
                .iter()
                .map(|p| format!("  {} {} ({})", p.package, p.version, p.status()))
                .collect()
        };

        let succeeded: Vec<_> = self.succeeded().collect();
        if !succeeded.is_empty() {
            lines.push(format!("Succeeded ({}):", succeeded.len()));
            lines.extend(group(succeeded));
        }
        let failed: Vec<_> = self.failed().collect();
        if !failed.is_empty() {
            lines.push(format!("Failed ({}):", failed.len()));
            for report in failed {
                lines.push(format!("  {} {} ({})", report.package, report.version, report.status()));
                if let Some(log) = &report.log_path {
                    lines.push(format!("    build log: {}", log.display()));
                }
            }
        }
        let skipped: Vec<_> = self.skipped().collect();
        if !skipped.is_empty() {
            lines.push(format!("Skipped ({}):", skipped.len()));
            lines.extend(group(skipped));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(package: &str, outcome: PackageOutcome) -> PackageReport {
        PackageReport {
            package: package.into(),
            version: "1.0".into(),
            outcome,
            log_path: None,
        }
    }

    #[test]
    fn test_summary_groups() {
        let mut run = InstallReport::new("app");
        run.packages.push(report("glib", PackageOutcome::Satisfied));
        run.packages.push(report(
            "lib",
            PackageOutcome::Failed(Error::BuildFailure {
                package: "lib".into(),
                phase: "build".into(),
                status: 2,
                detail: "make: *** [all] Error 2".into(),
            }),
        ));
        run.packages.push(report(
            "app",
            PackageOutcome::Skipped(SkipReason::BlockedBy("lib".into())),
        ));

        assert!(!run.is_success());
        assert!(!run.was_cancelled());
        let summary = run.summary().join("\n");
        assert!(summary.contains("Succeeded (1):"));
        assert!(summary.contains("app 1.0 (blocked by lib)"));
        assert!(matches!(
            run.into_first_error(),
            Some(Error::BuildFailure { status: 2, .. })
        ));
    }
}

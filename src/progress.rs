// src/progress.rs

//! Build progress observation
//!
//! The kitchen reports what it is doing through a [`BuildObserver`]. The
//! library ships two implementations:
//! - `LogObserver`: reports through tracing
//! - `SilentObserver`: no-op for scripted use and tests
//!
//! The CLI adds an indicatif progress display on top of the same trait.

use crate::kitchen::{CookState, InstallReport, PackageReport};
use crate::resolver::{BuildPlan, PlanEntry};
use tracing::{info, warn};

/// Receives progress events from an install run
///
/// All methods default to doing nothing. Implementations must be
/// thread-safe so that a signal handler or UI thread can share them.
pub trait BuildObserver: Send + Sync {
    /// A plan is about to be executed
    fn plan_started(&self, _plan: &BuildPlan) {}

    /// Work on a package begins
    fn package_started(&self, _entry: &PlanEntry) {}

    /// A package reached a new build state
    fn state_changed(&self, _package: &str, _state: CookState) {}

    /// A toolchain step is about to run
    fn step_started(&self, _package: &str, _phase: &str, _command: &str) {}

    /// A package finished, successfully or not
    fn package_finished(&self, _report: &PackageReport) {}

    /// The whole plan finished
    fn plan_finished(&self, _report: &InstallReport) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl BuildObserver for SilentObserver {}

/// Observer that logs events at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl BuildObserver for LogObserver {
    fn plan_started(&self, plan: &BuildPlan) {
        info!(
            "Installing {} ({} package(s) in plan)",
            plan.root,
            plan.entries.len()
        );
    }

    fn package_started(&self, entry: &PlanEntry) {
        info!(
            "==> {} {} ({})",
            entry.package,
            entry.version,
            entry.action.as_str()
        );
    }

    fn state_changed(&self, package: &str, state: CookState) {
        info!("{}: {}", package, state);
    }

    fn package_finished(&self, report: &PackageReport) {
        if report.is_success() {
            info!("{} {}: {}", report.package, report.version, report.status());
        } else {
            warn!("{} {}: {}", report.package, report.version, report.status());
        }
    }

    fn plan_finished(&self, report: &InstallReport) {
        for line in report.summary() {
            info!("{}", line);
        }
    }
}

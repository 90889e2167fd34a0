// src/commands/progress.rs
//! Progress display for install runs
//!
//! Shows an overall progress bar over the plan with a status line below
//! naming the package and step currently running.

use formulary::kitchen::CookState;
use formulary::{BuildObserver, BuildPlan, InstallReport, PackageReport, PlanAction, PlanEntry};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal progress for a multi-package install
pub struct InstallProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    status: ProgressBar,
}

impl InstallProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let overall = ProgressBar::new(0);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );

        let status = ProgressBar::new_spinner();
        status.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let overall = multi.add(overall);
        let status = multi.add(status);

        Self {
            multi,
            overall,
            status,
        }
    }

    /// Print a line above the bars
    fn println(&self, line: String) {
        if self.multi.println(&line).is_err() {
            eprintln!("{}", line);
        }
    }
}

impl Default for InstallProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildObserver for InstallProgress {
    fn plan_started(&self, plan: &BuildPlan) {
        self.overall.set_length(plan.entries.len() as u64);
        self.overall.set_message(format!("Installing {}", plan.root));
        self.status.enable_steady_tick(Duration::from_millis(100));
    }

    fn package_started(&self, entry: &PlanEntry) {
        let action = match entry.action {
            PlanAction::Build => "Building",
            PlanAction::Link => "Linking",
            PlanAction::Satisfied => "Checking",
        };
        self.status
            .set_message(format!("{} {} {}...", action, entry.package, entry.version));
    }

    fn state_changed(&self, package: &str, state: CookState) {
        self.status.set_message(format!("{} [{}]", package, state));
    }

    fn step_started(&self, package: &str, phase: &str, command: &str) {
        self.status
            .set_message(format!("{} [{}] {}", package, phase, command));
    }

    fn package_finished(&self, report: &PackageReport) {
        self.overall.inc(1);
        let marker = if report.is_success() {
            "done"
        } else if report.is_failure() {
            "FAILED"
        } else {
            "skipped"
        };
        self.println(format!(
            "{} {} [{}] {}",
            report.package,
            report.version,
            marker,
            report.status()
        ));
    }

    fn plan_finished(&self, report: &InstallReport) {
        self.status.finish_and_clear();
        if report.is_success() {
            self.overall.finish_with_message(format!("Installed {}", report.root));
        } else {
            self.overall.abandon_with_message(format!("Install of {} incomplete", report.root));
        }
    }
}

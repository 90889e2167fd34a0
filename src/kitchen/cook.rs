// src/kitchen/cook.rs

//! Cook: the build of a single plan entry
//!
//! States advance strictly in order:
//! `Pending -> Fetched -> Patched -> Configured -> Built -> Installed`.
//! Each toolchain step runs through the kitchen's invoker with the package's
//! environment overlay. A package is `Installed` only once its receipt is
//! written; any earlier failure discards the keg.

use super::archive::{extract_archive, source_root};
use super::env::EnvOverlay;
use super::fetch::fetch_any;
use super::patch::apply_patch;
use super::strategy::{Parallelism, PlannedStep, option_arguments, strategy_for};
use super::toolchain::{CancelToken, Invocation, StepOutcome, StepOutput};
use super::Kitchen;
use crate::cellar::InstallationRecord;
use crate::error::{Error, Result};
use crate::progress::BuildObserver;
use crate::recipe::{Phase, SourceLocation, TemplateVars};
use crate::resolver::PlanEntry;
use chrono::Utc;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Build log file inside the build directory
pub const BUILD_LOG: &str = "build.log";

/// Lines of output quoted in a failure message
const DETAIL_LINES: usize = 5;

/// Progress of one package through the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CookState {
    Pending,
    Fetched,
    Patched,
    Configured,
    Built,
    Installed,
}

impl CookState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookState::Pending => "pending",
            CookState::Fetched => "fetched",
            CookState::Patched => "patched",
            CookState::Configured => "configured",
            CookState::Built => "built",
            CookState::Installed => "installed",
        }
    }

    /// State reached once every step of a phase succeeded
    fn after(phase: Phase) -> Self {
        match phase {
            Phase::Configure => CookState::Configured,
            Phase::Build => CookState::Built,
            Phase::Install => CookState::Installed,
        }
    }
}

impl fmt::Display for CookState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cook operation
pub(super) struct Cook<'a> {
    kitchen: &'a Kitchen,
    entry: &'a PlanEntry,
    observer: &'a dyn BuildObserver,
    cancel: &'a CancelToken,
    /// Package-private build directory
    build_dir: PathBuf,
    /// Root of the unpacked (or cloned) source tree
    source_dir: PathBuf,
    /// Downloaded archive, for archive sources
    archive: Option<PathBuf>,
    /// (label, diff) of every patch to apply, in order
    patches: Vec<(String, String)>,
    keg: Option<PathBuf>,
    env: EnvOverlay,
    vars: TemplateVars,
    option_args: Vec<String>,
    parallelism: Parallelism,
    timeout: Duration,
    state: CookState,
    log: String,
}

impl<'a> Cook<'a> {
    pub(super) fn new(
        kitchen: &'a Kitchen,
        entry: &'a PlanEntry,
        observer: &'a dyn BuildObserver,
        cancel: &'a CancelToken,
    ) -> Result<Self> {
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let build_dir = kitchen.config.build_root.join(format!(
            "{}-{}-{}",
            entry.package,
            entry.version,
            &unique[..8]
        ));
        fs::create_dir_all(&build_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create build directory {}: {}",
                build_dir.display(),
                e
            ))
        })?;

        let shared_prefix = kitchen.cellar().prefix();
        let build = &entry.recipe.build;

        Ok(Self {
            kitchen,
            entry,
            observer,
            cancel,
            source_dir: build_dir.join("src"),
            build_dir,
            archive: None,
            patches: Vec::new(),
            keg: None,
            env: EnvOverlay::for_package(entry, shared_prefix),
            vars: TemplateVars::new(),
            option_args: option_arguments(entry, shared_prefix),
            parallelism: Parallelism::from_build(build),
            timeout: kitchen.config.step_timeout(build.timeout_secs),
            state: CookState::Pending,
            log: String::new(),
        })
    }

    fn package(&self) -> &str {
        &self.entry.package
    }

    fn location(&self) -> Result<&'a SourceLocation> {
        self.entry
            .recipe
            .source_for(self.entry.variant)
            .ok_or_else(|| {
                Error::spec(
                    &self.entry.package,
                    format!("no {} source declared", self.entry.variant),
                )
            })
    }

    fn advance(&mut self, state: CookState) {
        debug_assert!(state > self.state);
        self.state = state;
        self.log_line(&format!("--- {} ---", state));
        self.observer.state_changed(&self.entry.package, state);
    }

    fn check_cancelled(&self, phase: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                package: self.entry.package.clone(),
                phase: phase.to_string(),
            });
        }
        Ok(())
    }

    /// Phase 1: Prep - fetch source and patches
    pub(super) fn prep(&mut self) -> Result<()> {
        self.check_cancelled("fetch")?;
        let location = self.location()?;

        if location.vcs.is_some() {
            self.clone_source(location)?;
        } else {
            let checksum = self.kitchen.source_checksum(self.package(), location)?;
            let path = fetch_any(self.kitchen.fetcher.as_ref(), &location.urls(), &checksum)?;
            self.log_line(&format!("Fetched source: {}", location.urls()[0]));
            self.archive = Some(path);
        }

        for (index, decl) in self.entry.recipe.patches_for(self.entry.variant).enumerate() {
            let label = decl.label(index);
            let diff = match (&decl.inline, &decl.url) {
                (Some(inline), _) => inline.clone(),
                (None, Some(url)) => {
                    let path = self.kitchen.fetch_patch(
                        &self.entry.package,
                        &label,
                        url,
                        decl.checksum.as_deref(),
                    )?;
                    fs::read_to_string(&path).map_err(|e| Error::PatchFetch {
                        package: self.entry.package.clone(),
                        patch: label.clone(),
                        reason: format!("unreadable patch: {}", e),
                    })?
                }
                (None, None) => {
                    return Err(Error::spec(
                        &self.entry.package,
                        format!("patch '{}' has neither inline text nor url", label),
                    ));
                }
            };
            self.log_line(&format!("Fetched patch: {}", label));
            self.patches.push((label, diff));
        }

        self.advance(CookState::Fetched);
        Ok(())
    }

    /// Clone a VCS source into the build directory
    fn clone_source(&mut self, location: &SourceLocation) -> Result<()> {
        let url = location.urls().into_iter().next().unwrap_or_default();
        let mut args = vec!["clone".to_string(), "--depth".to_string(), "1".to_string()];
        if let Some(branch) = &location.branch {
            args.push("--branch".to_string());
            args.push(branch.clone());
        }
        args.push(url.clone());
        args.push(self.source_dir.display().to_string());

        let invocation = Invocation {
            phase: "fetch".to_string(),
            program: "git".to_string(),
            args,
            workdir: self.build_dir.clone(),
            env: EnvOverlay::new(),
            timeout: self.timeout,
        };
        match self.execute(&invocation) {
            Ok(_) => Ok(()),
            Err(Error::BuildFailure { detail, .. }) => Err(Error::Fetch { url, reason: detail }),
            Err(e) => Err(e),
        }
    }

    /// Phase 2a: Unpack sources
    pub(super) fn unpack(&mut self) -> Result<()> {
        if let Some(archive) = &self.archive {
            let filename = self.location()?.filename();
            let extracted = self.build_dir.join("src");
            extract_archive(archive, &filename, &extracted)?;
            self.source_dir = source_root(&extracted)?;
            self.log_line(&format!("Extracted source to {}", self.source_dir.display()));
        }
        debug!("Source directory: {}", self.source_dir.display());
        Ok(())
    }

    /// Phase 2b: Apply patches, each all or nothing
    pub(super) fn patch(&mut self) -> Result<()> {
        let strips: Vec<usize> = self
            .entry
            .recipe
            .patches_for(self.entry.variant)
            .map(|p| p.strip)
            .collect();

        for ((label, diff), strip) in self.patches.iter().zip(strips) {
            self.check_cancelled("patch")?;
            info!("Applying patch {} to {}", label, self.entry.package);
            let applied = apply_patch(&self.source_dir, diff, strip)
                .map_err(|f| f.into_error(&self.entry.package, label))?;
            self.log.push_str(&format!(
                "Applied patch {} ({} file(s))\n",
                label,
                applied.files.len()
            ));
        }

        self.advance(CookState::Patched);
        Ok(())
    }

    /// Phase 3: Simmer - configure, build, and install into the keg
    pub(super) fn simmer(&mut self) -> Result<()> {
        self.check_cancelled("configure")?;
        let keg = self
            .kitchen
            .cellar()
            .prepare_keg(&self.entry.package, &self.entry.version)?;
        self.vars = self.template_vars(&keg);
        self.keg = Some(keg);

        let steps = strategy_for(self.entry.recipe.build.strategy).steps(self.entry);
        for phase in Phase::ALL {
            for step in steps.iter().filter(|s| s.phase == phase) {
                self.check_cancelled(phase.as_str())?;
                self.run_step(step)?;
            }
            // The receipt marks Installed; see plate()
            if phase != Phase::Install {
                self.advance(CookState::after(phase));
            }
        }
        Ok(())
    }

    /// Phase 4: Plate - write the receipt that makes the keg complete
    pub(super) fn plate(&mut self) -> Result<InstallationRecord> {
        self.check_cancelled("install")?;
        let keg = self.keg.clone().ok_or_else(|| {
            Error::IoError(format!("{} has no keg to record", self.entry.package))
        })?;

        let record = InstallationRecord {
            name: self.entry.package.clone(),
            version: self.entry.version.clone(),
            variant: self.entry.variant,
            options: self.entry.options.enabled().map(str::to_string).collect(),
            runtime_dependencies: self
                .entry
                .runtime_dependencies()
                .map(|d| d.name.clone())
                .collect(),
            link_path: self.kitchen.cellar().link_path(&self.entry.package),
            keg_path: keg,
            installed_at: Utc::now(),
        };
        record.save()?;
        self.advance(CookState::Installed);
        Ok(record)
    }

    /// Remove a partial keg after a failure
    pub(super) fn abandon(&mut self) {
        if let Some(keg) = self.keg.take()
            && let Err(e) = self.kitchen.cellar().discard_keg(&keg)
        {
            warn!("Failed to remove partial keg {}: {}", keg.display(), e);
        }
    }

    /// Write the build log and dispose of the build directory
    ///
    /// Returns the log path if the build directory was kept.
    pub(super) fn finish(self, success: bool) -> Option<PathBuf> {
        let log_path = self.build_dir.join(BUILD_LOG);
        if let Err(e) = fs::write(&log_path, &self.log) {
            warn!("Failed to write {}: {}", log_path.display(), e);
        }

        if success && !self.kitchen.config.keep_builddir {
            if let Err(e) = fs::remove_dir_all(&self.build_dir) {
                warn!(
                    "Failed to remove build directory {}: {}",
                    self.build_dir.display(),
                    e
                );
            }
            return None;
        }
        Some(log_path)
    }

    fn template_vars(&self, keg: &Path) -> TemplateVars {
        let shared_prefix = self.kitchen.cellar().prefix();
        let mut vars = TemplateVars::new()
            .with("name", &self.entry.package)
            .with("version", &self.entry.version)
            .with("variant", self.entry.variant.as_str())
            .with("prefix", keg.display().to_string())
            .with("shared_prefix", shared_prefix.display().to_string())
            .with("option_args", self.option_args.join(" "));
        for dep in &self.entry.dependencies {
            vars.set(
                format!("opt.{}", dep.name),
                shared_prefix.join(&dep.name).display().to_string(),
            );
        }
        let builtins = vars.clone();
        for (key, value) in &self.entry.recipe.variables {
            vars.set(key, builtins.substitute(value));
        }
        vars
    }

    fn workdir(&self) -> PathBuf {
        match &self.entry.recipe.build.workdir {
            Some(sub) => self.source_dir.join(sub),
            None => self.source_dir.clone(),
        }
    }

    fn run_step(&mut self, step: &PlannedStep) -> Result<StepOutput> {
        let jobs = self.parallelism.jobs_for(step, self.kitchen.config.jobs);
        let vars = self.vars.clone().with("jobs", jobs.to_string());

        let invocation = Invocation {
            phase: step.phase.as_str().to_string(),
            program: vars.substitute(&step.program),
            args: vars.expand_args(&step.args, &self.option_args),
            workdir: self.workdir(),
            env: self
                .env
                .with("MAKEFLAGS", format!("-j{}", jobs))
                .with_all(step.env.iter().cloned()),
            timeout: self.timeout,
        };
        self.execute(&invocation)
    }

    fn execute(&mut self, invocation: &Invocation) -> Result<StepOutput> {
        let command = invocation.display();
        let phase = invocation.phase.as_str();
        self.observer
            .step_started(&self.entry.package, phase, &command);
        self.log_line(&format!("==> [{}] {}", phase, command));

        let outcome = self
            .kitchen
            .invoker
            .invoke(invocation, self.cancel)
            .map_err(|e| Error::BuildFailure {
                package: self.entry.package.clone(),
                phase: phase.to_string(),
                status: -1,
                detail: format!("failed to start {}: {}", invocation.program, e),
            })?;

        match outcome {
            StepOutcome::Exited(output) => {
                self.log_build_output(phase, &output);
                if output.success() {
                    Ok(output)
                } else {
                    Err(Error::BuildFailure {
                        package: self.entry.package.clone(),
                        phase: phase.to_string(),
                        status: output.status,
                        detail: failure_detail(&output),
                    })
                }
            }
            StepOutcome::TimedOut { output } => {
                self.log_build_output(phase, &output);
                Err(Error::BuildTimeout {
                    package: self.entry.package.clone(),
                    phase: phase.to_string(),
                    timeout: invocation.timeout,
                })
            }
            StepOutcome::Cancelled => Err(Error::Cancelled {
                package: self.entry.package.clone(),
                phase: phase.to_string(),
            }),
        }
    }

    fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    /// Log step output with a phase prefix
    fn log_build_output(&mut self, phase: &str, output: &StepOutput) {
        for line in output.stdout.lines().chain(output.stderr.lines()) {
            debug!("[{}] {}", phase, line);
        }
        if !output.stdout.is_empty() {
            self.log.push_str(&output.stdout);
            if !output.stdout.ends_with('\n') {
                self.log.push('\n');
            }
        }
        if !output.stderr.is_empty() {
            self.log.push_str(&output.stderr);
            if !output.stderr.ends_with('\n') {
                self.log.push('\n');
            }
        }
        self.log_line(&format!("[{}] exit status {}", phase, output.status));
    }
}

/// Last lines of stderr (or stdout if stderr is empty)
pub(super) fn failure_detail(output: &StepOutput) -> String {
    let text = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = &lines[lines.len().saturating_sub(DETAIL_LINES)..];
    if tail.is_empty() {
        "no output".to_string()
    } else {
        tail.join("\n")
    }
}

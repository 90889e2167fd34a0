// src/kitchen/mod.rs

//! Kitchen: the build orchestrator
//!
//! The kitchen executes a [`BuildPlan`] in topological order, one package at
//! a time:
//! - Fetching source archives (or cloning head checkouts) and patches
//! - Extracting and patching sources
//! - Running the package's build strategy into its keg
//! - Writing the receipt and linking the keg into the shared prefix
//!
//! A failure halts only the failing package. Packages that depend on it are
//! skipped and reported as blocked; everything already installed stays.

mod archive;
mod config;
mod cook;
pub mod env;
pub mod fetch;
pub mod patch;
mod report;
pub mod strategy;
pub mod toolchain;
mod verify;

pub use archive::{ArchiveFormat, extract_archive};
pub use config::KitchenConfig;
pub use cook::{BUILD_LOG, CookState};
pub use env::EnvOverlay;
pub use fetch::{Fetcher, NetworkFetcher};
pub use report::{InstallReport, PackageOutcome, PackageReport, SkipReason};
pub use strategy::{BuildStrategy, Jobs, Parallelism, PlannedStep};
pub use toolchain::{
    CancelToken, Invocation, ProcessInvoker, StepOutcome, StepOutput, ToolchainInvoker,
};

use crate::cellar::{Cellar, InstallationRecord};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::progress::BuildObserver;
use crate::recipe::{Recipe, SourceLocation, Variant};
use crate::resolver::{BuildPlan, PlanAction, PlanEntry};
use cook::Cook;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// The kitchen: where plans are cooked
pub struct Kitchen {
    pub(crate) config: KitchenConfig,
    cellar: Cellar,
    fetcher: Arc<dyn Fetcher>,
    invoker: Arc<dyn ToolchainInvoker>,
}

impl Kitchen {
    pub fn new(
        config: KitchenConfig,
        cellar: Cellar,
        fetcher: Arc<dyn Fetcher>,
        invoker: Arc<dyn ToolchainInvoker>,
    ) -> Self {
        Self {
            config,
            cellar,
            fetcher,
            invoker,
        }
    }

    /// Kitchen with network fetching and real processes
    pub fn from_config(config: &Config) -> Result<Self> {
        let kitchen_config = KitchenConfig::from(config);
        let fetcher = NetworkFetcher::new(
            &kitchen_config.source_cache,
            kitchen_config.fetch_retries,
            kitchen_config.retry_delay,
        )?;
        Ok(Self::new(
            kitchen_config,
            Cellar::from_config(config),
            Arc::new(fetcher),
            Arc::new(ProcessInvoker::new()),
        ))
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    pub fn cellar(&self) -> &Cellar {
        &self.cellar
    }

    /// Execute a plan
    ///
    /// Never fails as a whole; per-package results are in the report. After
    /// cancellation the in-flight package fails with [`Error::Cancelled`] and
    /// every later package is skipped.
    pub fn install(
        &self,
        plan: &BuildPlan,
        observer: &dyn BuildObserver,
        cancel: &CancelToken,
    ) -> InstallReport {
        observer.plan_started(plan);
        let mut report = InstallReport::new(&plan.root);
        // package -> failed package that blocks it
        let mut blocked: BTreeMap<String, String> = BTreeMap::new();

        for entry in &plan.entries {
            observer.package_started(entry);
            let mut log_path = None;

            let outcome = if entry.action == PlanAction::Satisfied {
                PackageOutcome::Satisfied
            } else if cancel.is_cancelled() {
                PackageOutcome::Skipped(SkipReason::Cancelled)
            } else if let Some(cause) = entry
                .dependencies
                .iter()
                .find_map(|d| blocked.get(&d.name))
            {
                PackageOutcome::Skipped(SkipReason::BlockedBy(cause.clone()))
            } else if entry.action == PlanAction::Link {
                match self.cellar.link(&entry.package, &entry.version) {
                    Ok(_) => PackageOutcome::Linked,
                    Err(e) => PackageOutcome::Failed(e),
                }
            } else {
                let (result, log) = self.cook_logged(entry, observer, cancel);
                log_path = log;
                match result.and_then(|record| {
                    self.cellar.link(&record.name, &record.version)?;
                    Ok(record)
                }) {
                    Ok(record) => PackageOutcome::Installed(record),
                    Err(e) => PackageOutcome::Failed(e),
                }
            };

            match &outcome {
                PackageOutcome::Failed(_) => {
                    blocked.insert(entry.package.clone(), entry.package.clone());
                }
                PackageOutcome::Skipped(SkipReason::BlockedBy(cause)) => {
                    blocked.insert(entry.package.clone(), cause.clone());
                }
                _ => {}
            }

            let package_report = PackageReport {
                package: entry.package.clone(),
                version: entry.version.clone(),
                outcome,
                log_path,
            };
            observer.package_finished(&package_report);
            report.packages.push(package_report);
        }

        if let (Some(root), Some(done)) = (plan.root_entry(), report.get(&plan.root))
            && matches!(done.outcome, PackageOutcome::Installed(_))
            && let Some(caveats) = &root.recipe.caveats
        {
            info!("Caveats for {}:\n{}", root.package, caveats.trim_end());
        }

        observer.plan_finished(&report);
        report
    }

    /// Build one plan entry into its keg without linking it
    pub fn cook(
        &self,
        entry: &PlanEntry,
        observer: &dyn BuildObserver,
        cancel: &CancelToken,
    ) -> Result<InstallationRecord> {
        self.cook_logged(entry, observer, cancel).0
    }

    fn cook_logged(
        &self,
        entry: &PlanEntry,
        observer: &dyn BuildObserver,
        cancel: &CancelToken,
    ) -> (Result<InstallationRecord>, Option<PathBuf>) {
        info!("Cooking {} {}", entry.package, entry.version);
        let mut cook = match Cook::new(self, entry, observer, cancel) {
            Ok(cook) => cook,
            Err(e) => return (Err(e), None),
        };

        let result = (|| {
            cook.prep()?;
            cook.unpack()?;
            cook.patch()?;
            cook.simmer()?;
            cook.plate()
        })();

        if result.is_err() {
            cook.abandon();
        }
        let log_path = cook.finish(result.is_ok());
        (result, log_path)
    }

    /// Fetch the sources and patches of a recipe without building
    ///
    /// Head checkouts are cloned at build time and are skipped here.
    pub fn fetch(&self, recipe: &Recipe, variant: Variant) -> Result<Vec<PathBuf>> {
        let location = recipe.source_for(variant).ok_or_else(|| {
            Error::spec(recipe.name(), format!("no {} source declared", variant))
        })?;
        let mut fetched = Vec::new();

        if location.vcs.is_some() {
            info!(
                "{} {} is a checkout of {}; nothing to prefetch",
                recipe.name(),
                location.version,
                location.url
            );
        } else {
            let checksum = self.source_checksum(recipe.name(), location)?;
            fetched.push(fetch::fetch_any(
                self.fetcher.as_ref(),
                &location.urls(),
                &checksum,
            )?);
        }

        for (index, patch) in recipe.patches_for(variant).enumerate() {
            if let Some(url) = &patch.url {
                fetched.push(self.fetch_patch(
                    recipe.name(),
                    &patch.label(index),
                    url,
                    patch.checksum.as_deref(),
                )?);
            }
        }

        info!("Fetched {} file(s) for {}", fetched.len(), recipe.name());
        Ok(fetched)
    }

    /// Checksum of an archive source
    pub(crate) fn source_checksum(&self, package: &str, location: &SourceLocation) -> Result<Checksum> {
        let declared = location
            .checksum
            .as_deref()
            .ok_or_else(|| Error::spec(package, "source has no checksum"))?;
        Checksum::parse_prefixed(declared)
            .map_err(|e| Error::spec(package, format!("invalid checksum '{}': {}", declared, e)))
    }

    /// Fetch an external patch; failures are patch-fetch errors
    pub(crate) fn fetch_patch(
        &self,
        package: &str,
        label: &str,
        url: &str,
        checksum: Option<&str>,
    ) -> Result<PathBuf> {
        let patch_err = |reason: String| Error::PatchFetch {
            package: package.to_string(),
            patch: label.to_string(),
            reason,
        };
        let checksum = checksum
            .ok_or_else(|| patch_err("no checksum declared".to_string()))
            .and_then(|c| {
                Checksum::parse_prefixed(c).map_err(|e| patch_err(format!("invalid checksum: {}", e)))
            })?;

        debug!("Fetching patch {} for {}", label, package);
        self.fetcher
            .fetch(url, &checksum)
            .map_err(|e| patch_err(e.to_string()))
    }
}

// src/commands/install.rs
//! Package installation command

use super::progress::InstallProgress;
use super::recipe_source;
use anyhow::{Context, Result};
use formulary::{
    BuildObserver, CancelToken, Cellar, Config, Error, Kitchen, LogObserver, OptionFlags,
    PlanAction, PlanRequest, Planner, Variant,
};
use std::io::IsTerminal;
use tracing::info;

/// Build and link a package with its dependencies
///
/// Per-package outcomes are printed; the first failure becomes the command's
/// error so that its category picks the exit code.
pub fn cmd_install(
    config: &Config,
    package: &str,
    variant: Variant,
    options: &[String],
    keep_build_dir: bool,
    verbose: bool,
    cancel: &CancelToken,
) -> Result<()> {
    info!("Installing {} ({})", package, variant);

    let source = recipe_source(config);
    let cellar = Cellar::from_config(config);
    let request = PlanRequest::new(package)
        .with_variant(variant)
        .with_root_flags(OptionFlags::parse(options));
    let plan = Planner::new(&source, &cellar)
        .plan(&request)
        .with_context(|| format!("Failed to resolve dependencies of {}", package))?;

    if let Some(root) = plan.root_entry()
        && root.action == PlanAction::Satisfied
    {
        println!("{} {} is already installed", root.package, root.version);
        return Ok(());
    }

    let mut config = config.clone();
    config.keep_build_dirs |= keep_build_dir;
    let kitchen = Kitchen::from_config(&config).context("Failed to set up build environment")?;

    // Bars and debug logging fight over the terminal
    let progress;
    let observer: &dyn BuildObserver = if verbose || !std::io::stderr().is_terminal() {
        &LogObserver
    } else {
        progress = InstallProgress::new();
        &progress
    };

    let report = kitchen.install(&plan, observer, cancel);
    for line in report.summary() {
        println!("{}", line);
    }

    let cancelled = report.was_cancelled();
    match report.into_first_error() {
        Some(e) => Err(e).with_context(|| format!("Failed to install {}", package)),
        None if cancelled => Err(Error::Cancelled {
            package: package.to_string(),
            phase: "plan".to_string(),
        }
        .into()),
        None => Ok(()),
    }
}

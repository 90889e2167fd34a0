// src/commands/remove.rs
//! Package removal commands

use anyhow::{Context, Result};
use formulary::{Cellar, Config};
use tracing::info;

/// Remove every installed version of a package
pub fn cmd_uninstall(config: &Config, package: &str, ignore_dependencies: bool) -> Result<()> {
    info!("Uninstalling {}", package);
    let cellar = Cellar::from_config(config);
    let versions = cellar
        .uninstall(package, ignore_dependencies)
        .with_context(|| format!("Failed to uninstall {}", package))?;

    println!("Uninstalled {} {}", package, versions.join(", "));
    Ok(())
}

/// Delete kegs that are no longer linked
pub fn cmd_cleanup(config: &Config, package: Option<&str>) -> Result<()> {
    let cellar = Cellar::from_config(config);
    let removed = cellar.cleanup(package).context("Cleanup failed")?;

    if removed.is_empty() {
        println!("Nothing to clean up");
    } else {
        for keg in &removed {
            println!("Removed {}", keg.display());
        }
    }
    Ok(())
}

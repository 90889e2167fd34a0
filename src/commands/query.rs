// src/commands/query.rs
//! Installed package listing

use anyhow::{Context, Result};
use formulary::{Cellar, Config};

/// List installed packages with their versions
///
/// The linked version is marked with `*`.
pub fn cmd_list(config: &Config) -> Result<()> {
    let cellar = Cellar::from_config(config);
    let packages = cellar.packages().context("Failed to read cellar")?;

    if packages.is_empty() {
        println!("No packages installed");
        return Ok(());
    }

    for package in packages {
        let linked = cellar.linked_version(&package)?;
        let versions: Vec<String> = cellar
            .records(&package)?
            .into_iter()
            .map(|record| {
                if linked.as_deref() == Some(record.version.as_str()) {
                    format!("{}*", record.version)
                } else {
                    record.version
                }
            })
            .collect();
        if versions.is_empty() {
            continue;
        }
        println!("{} {}", package, versions.join(" "));
    }
    Ok(())
}

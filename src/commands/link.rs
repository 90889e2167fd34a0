// src/commands/link.rs
//! Version switching

use anyhow::{Context, Result};
use formulary::{Cellar, Config};

/// Point the prefix link of a package at another retained version
pub fn cmd_switch(config: &Config, package: &str, version: &str) -> Result<()> {
    let cellar = Cellar::from_config(config);
    let previous = cellar
        .link(package, version)
        .with_context(|| format!("Failed to switch {} to {}", package, version))?;

    match previous.as_deref() {
        Some(old) if old == version => println!("{} {} is already linked", package, version),
        Some(old) => println!("Switched {} from {} to {}", package, old, version),
        None => println!("Linked {} {}", package, version),
    }
    Ok(())
}

// src/commands/fetch.rs
//! Source prefetching

use super::recipe_source;
use anyhow::{Context, Result, anyhow};
use formulary::{Config, Kitchen, RecipeSource, Variant};

/// Download a package's sources and patches into the cache
pub fn cmd_fetch(config: &Config, package: &str, variant: Variant) -> Result<()> {
    let recipe = recipe_source(config)
        .load(package)
        .with_context(|| format!("Failed to load recipe for {}", package))?
        .ok_or_else(|| anyhow!("No recipe found for '{}'", package))?;

    let kitchen = Kitchen::from_config(config).context("Failed to set up source cache")?;
    let fetched = kitchen
        .fetch(&recipe, variant)
        .with_context(|| format!("Failed to fetch {} ({})", package, variant))?;

    for path in fetched {
        println!("{}", path.display());
    }
    Ok(())
}

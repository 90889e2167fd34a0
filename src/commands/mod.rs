// src/commands/mod.rs
//! Command handlers for the formulary CLI

mod fetch;
mod install;
mod link;
mod plan;
pub mod progress;
mod query;
mod remove;

pub use fetch::cmd_fetch;
pub use install::cmd_install;
pub use link::cmd_switch;
pub use plan::cmd_plan;
pub use query::cmd_list;
pub use remove::{cmd_cleanup, cmd_uninstall};
pub use test::cmd_test;

use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use formulary::{Config, DirectorySource};

/// Load the configuration and apply command-line overrides
///
/// `--recipes` directories are searched before the configured ones.
pub fn load_config(global: &GlobalArgs) -> Result<Config> {
    let mut config =
        Config::load(global.config.as_deref()).context("Failed to load configuration")?;

    if let Some(prefix) = &global.prefix {
        config.prefix = prefix.clone();
    }
    if let Some(cellar) = &global.cellar {
        config.cellar = cellar.clone();
    }
    if !global.recipes.is_empty() {
        let mut paths = global.recipes.clone();
        paths.append(&mut config.recipe_paths);
        config.recipe_paths = paths;
    }
    config
        .make_absolute()
        .context("Failed to resolve configured paths")?;

    Ok(config)
}

/// Recipe source over the configured search path
pub(crate) fn recipe_source(config: &Config) -> DirectorySource {
    DirectorySource::new(config.recipe_paths.clone())
}

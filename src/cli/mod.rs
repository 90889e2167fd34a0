// src/cli/mod.rs
//! CLI definitions for formulary
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.
//!
//! Commands:
//! - `install` - Build and link a package and its dependencies
//! - `uninstall` - Remove every installed version of a package
//! - `switch` - Relink a package to a retained version
//! - `cleanup` - Delete superseded versions
//! - `list` - List installed packages
//! - `plan` - Show the build plan without building
//! - `fetch` - Download sources into the cache
//! - `test` - Run a recipe's smoke test against the linked version

use clap::{Args, Parser, Subcommand};
use formulary::Variant;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "formulary")]
#[command(author = "Formulary Contributors")]
#[command(version)]
#[command(about = "Build packages from formulas and link them into a shared prefix", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Options accepted by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to the configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Shared prefix holding package links
    #[arg(long, global = true)]
    pub prefix: Option<PathBuf>,

    /// Directory holding installed kegs
    #[arg(long, global = true)]
    pub cellar: Option<PathBuf>,

    /// Recipe directory (repeatable, searched first)
    #[arg(long = "recipes", global = true)]
    pub recipes: Vec<PathBuf>,

    /// Log toolchain output and resolver decisions
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Source variant selection shared by commands that read sources
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct VariantArgs {
    /// Build from the head checkout
    #[arg(long = "HEAD")]
    pub head: bool,

    /// Build the development version
    #[arg(long, conflicts_with = "head")]
    pub devel: bool,
}

impl VariantArgs {
    pub fn variant(&self) -> Variant {
        if self.head {
            Variant::Head
        } else if self.devel {
            Variant::Devel
        } else {
            Variant::Stable
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build and install a package with its dependencies
    Install {
        /// Package name
        package: String,

        #[command(flatten)]
        variant: VariantArgs,

        /// Keep build directories after a successful build
        #[arg(long)]
        keep_build_dir: bool,

        /// Build options for the package (--with-<opt>, --without-<opt>)
        #[arg(allow_hyphen_values = true, value_name = "OPTION")]
        options: Vec<String>,
    },

    /// Remove every installed version of a package
    Uninstall {
        /// Package name
        package: String,

        /// Remove even if linked packages depend on it
        #[arg(long)]
        ignore_dependencies: bool,
    },

    /// Link a package to another installed version
    Switch {
        /// Package name
        package: String,

        /// Installed version to link
        version: String,
    },

    /// Delete installed versions that are not linked
    Cleanup {
        /// Only clean up this package
        package: Option<String>,
    },

    /// List installed packages
    List,

    /// Show the build plan for a package without building anything
    Plan {
        /// Package name
        package: String,

        #[command(flatten)]
        variant: VariantArgs,

        /// Build options for the package (--with-<opt>, --without-<opt>)
        #[arg(allow_hyphen_values = true, value_name = "OPTION")]
        options: Vec<String>,
    },

    /// Download sources and patches into the cache
    Fetch {
        /// Package name
        package: String,

        #[command(flatten)]
        variant: VariantArgs,
    },

    /// Run the recipe's smoke test against the linked version
    Test {
        /// Package name
        package: String,
    },
}

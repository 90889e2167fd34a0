// src/lib.rs

//! Formulary: a formula-driven build-and-install engine
//!
//! Given a package name and user-chosen build options, formulary works out
//! which packages must be built, builds each from source in dependency order,
//! and installs them into per-version kegs that are linked atomically into a
//! shared prefix.
//!
//! # Architecture
//!
//! - Recipes: declarative TOML descriptions of sources, options, dependencies,
//!   patches, and build steps
//! - Resolver: dependency graph plus option propagation into a [`BuildPlan`]
//! - Kitchen: fetch, unpack, patch, and run the toolchain for each plan entry
//! - Cellar: one keg per installed version, with an installation receipt; the
//!   active version is a single symlink in the prefix

pub mod cellar;
pub mod config;
mod error;
pub mod hash;
pub mod kitchen;
pub mod progress;
pub mod recipe;
pub mod resolver;

pub use cellar::{Cellar, InstallationRecord, PrefixLock};
pub use config::Config;
pub use error::{Error, ErrorCategory, Result};
pub use hash::{Checksum, HashAlgorithm};
pub use kitchen::{
    CancelToken, InstallReport, Kitchen, KitchenConfig, PackageOutcome, PackageReport, SkipReason,
};
pub use progress::{BuildObserver, LogObserver, SilentObserver};
pub use recipe::{DirectorySource, MemorySource, Recipe, RecipeSource, Variant};
pub use resolver::{BuildPlan, OptionFlags, PlanAction, PlanEntry, PlanRequest, Planner};

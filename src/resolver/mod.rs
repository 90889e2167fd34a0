// src/resolver/mod.rs

//! Dependency resolution
//!
//! Turns a requested package plus user flags into a [`BuildPlan`]: the
//! topologically ordered packages to build, each with its effective option set
//! and source variant.

pub mod graph;
pub mod options;
pub mod plan;

pub use graph::DependencyGraph;
pub use options::{OptionFlags, OptionSchema, OptionSet, OptionSpec};
pub use plan::{
    BuildPlan, InstalledPackages, NothingInstalled, PlanAction, PlanEntry, PlanRequest,
    PlannedDependency, Planner,
};

// src/kitchen/strategy.rs

//! Build strategies
//!
//! A recipe selects its strategy explicitly; nothing is inferred from the
//! contents of the source tree. Each strategy turns a plan entry into an
//! ordered list of [`PlannedStep`]s with unexpanded argument templates; the
//! cook expands them per step because `%(jobs)s` depends on the phase.

use crate::recipe::template::OPTION_ARGS;
use crate::recipe::{BuildSection, Phase, StepDecl, StrategyKind, Variant};
use crate::resolver::{OptionSet, PlanEntry};
use std::path::Path;

/// A toolchain step before template expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub phase: Phase,
    /// Program template
    pub program: String,
    /// Argument templates
    pub args: Vec<String>,
    /// Force a single job for this step
    pub serial: bool,
    /// Extra environment for this step
    pub env: Vec<(String, String)>,
}

impl PlannedStep {
    fn new(phase: Phase, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            phase,
            program: program.into(),
            args,
            serial: false,
            env: Vec::new(),
        }
    }

    fn from_decl(decl: &StepDecl) -> Self {
        Self {
            phase: decl.phase,
            program: decl.program.clone(),
            args: decl.args.clone(),
            serial: decl.serial,
            env: Vec::new(),
        }
    }
}

/// Produces the toolchain steps of a package
pub trait BuildStrategy {
    fn kind(&self) -> StrategyKind;

    /// Steps in execution order
    fn steps(&self, entry: &PlanEntry) -> Vec<PlannedStep>;
}

/// Strategy implementation for a recipe's declared kind
pub fn strategy_for(kind: StrategyKind) -> Box<dyn BuildStrategy> {
    match kind {
        StrategyKind::Autotools => Box::new(Autotools),
        StrategyKind::Direct => Box::new(Direct),
        StrategyKind::Script => Box::new(Script),
    }
}

/// Whether a declared step applies to this build
fn step_applies(step: &StepDecl, options: &OptionSet, variant: Variant) -> bool {
    step.when.as_deref().is_none_or(|o| options.is_enabled(o))
        && step.unless.as_deref().is_none_or(|o| !options.is_enabled(o))
        && step.variant.is_none_or(|v| v == variant)
}

fn declared_steps(entry: &PlanEntry, phase: Phase) -> impl Iterator<Item = PlannedStep> + '_ {
    entry
        .recipe
        .build
        .steps
        .iter()
        .filter(move |s| s.phase == phase && step_applies(s, &entry.options, entry.variant))
        .map(PlannedStep::from_decl)
}

/// `./configure --prefix=<keg> && make && make install`
///
/// Declared steps of a phase run after the default step of that phase.
/// Head builds run `head_bootstrap` commands (typically `autoreconf -fi`)
/// before configure.
#[derive(Debug, Clone, Copy)]
pub struct Autotools;

impl BuildStrategy for Autotools {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Autotools
    }

    fn steps(&self, entry: &PlanEntry) -> Vec<PlannedStep> {
        let build = &entry.recipe.build;
        let mut steps = Vec::new();

        if entry.variant == Variant::Head {
            for command in &build.head_bootstrap {
                steps.push(PlannedStep::new(
                    Phase::Configure,
                    "sh",
                    vec!["-c".to_string(), command.clone()],
                ));
            }
        }

        let mut configure = vec!["--prefix=%(prefix)s".to_string()];
        configure.extend(build.configure_args.iter().cloned());
        if !build.configure_args.iter().any(|a| a.trim() == OPTION_ARGS) {
            configure.push(OPTION_ARGS.to_string());
        }
        steps.push(PlannedStep::new(Phase::Configure, "./configure", configure));
        steps.extend(declared_steps(entry, Phase::Configure));

        steps.push(PlannedStep::new(Phase::Build, "make", Vec::new()));
        steps.extend(declared_steps(entry, Phase::Build));

        steps.push(PlannedStep::new(
            Phase::Install,
            "make",
            vec!["install".to_string()],
        ));
        steps.extend(declared_steps(entry, Phase::Install));

        steps
    }
}

/// Exactly the declared steps, grouped by phase in declaration order
#[derive(Debug, Clone, Copy)]
pub struct Direct;

impl BuildStrategy for Direct {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    fn steps(&self, entry: &PlanEntry) -> Vec<PlannedStep> {
        Phase::ALL
            .into_iter()
            .flat_map(|phase| declared_steps(entry, phase).collect::<Vec<_>>())
            .collect()
    }
}

/// One `sh -c <script>` per phase with `$FORMULARY_PHASE` set
#[derive(Debug, Clone, Copy)]
pub struct Script;

impl BuildStrategy for Script {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Script
    }

    fn steps(&self, entry: &PlanEntry) -> Vec<PlannedStep> {
        let Some(script) = &entry.recipe.build.script else {
            return Vec::new();
        };
        Phase::ALL
            .into_iter()
            .map(|phase| {
                let mut step =
                    PlannedStep::new(phase, "sh", vec!["-c".to_string(), script.clone()]);
                step.env
                    .push((super::env::PHASE_VAR.to_string(), phase.as_str().to_string()));
                step
            })
            .collect()
    }
}

/// Job policy of one step kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jobs {
    /// As many jobs as the machine allows
    Unlimited,
    Limited(u32),
}

impl Jobs {
    fn count(self, unlimited: u32) -> u32 {
        match self {
            Jobs::Unlimited => unlimited.max(1),
            Jobs::Limited(n) => n.max(1),
        }
    }
}

/// Parallelism policy of a package
///
/// The install policy is independent of the build policy so a package can
/// build in parallel and still install serially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parallelism {
    pub build: Jobs,
    pub install: Jobs,
}

impl Parallelism {
    pub fn from_build(build: &BuildSection) -> Self {
        let build_jobs = if build.serial_build {
            Jobs::Limited(1)
        } else {
            match build.jobs {
                Some(n) => Jobs::Limited(n),
                None => Jobs::Unlimited,
            }
        };
        let install_jobs = if build.serial_install {
            Jobs::Limited(1)
        } else {
            build_jobs
        };
        Self {
            build: build_jobs,
            install: install_jobs,
        }
    }

    /// Job count for a step
    pub fn jobs_for(&self, step: &PlannedStep, unlimited: u32) -> u32 {
        if step.serial {
            return 1;
        }
        match step.phase {
            Phase::Install => self.install.count(unlimited),
            Phase::Configure | Phase::Build => self.build.count(unlimited),
        }
    }
}

/// Option-derived arguments for a plan entry
///
/// The option schema's on/off arguments, then `--with-<feature>=<path>` for
/// every active dependency that declares a feature and `--without-<feature>`
/// for every inactive one.
pub fn option_arguments(entry: &PlanEntry, shared_prefix: &Path) -> Vec<String> {
    let mut args = entry.option_args.clone();
    for dep in &entry.dependencies {
        if let Some(feature) = &dep.configure_with {
            args.push(format!(
                "--with-{}={}",
                feature,
                shared_prefix.join(&dep.name).display()
            ));
        }
    }
    for feature in &entry.disabled_features {
        args.push(format!("--without-{}", feature));
    }
    args
}

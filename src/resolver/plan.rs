// src/resolver/plan.rs

//! Build plan resolution
//!
//! The planner loads every recipe reachable from the requested root over all
//! declared edges, then iterates option resolution and edge pruning together:
//! options are resolved, edges whose gating options ended up disabled are
//! dropped, options that active dependents require are fed back, and the
//! loop stops once the requirements no longer change. With no requirements
//! it settles after one pass, normally after two.
//!
//! Failures of recipes that end up unreachable (missing optional
//! dependencies, broken recipes behind a disabled option) are ignored.

use crate::error::{Error, Result};
use crate::recipe::{DependencyDecl, EdgeKind, Recipe, RecipeSource, Variant};
use crate::resolver::graph::DependencyGraph;
use crate::resolver::options::{OptionFlags, OptionSchema, OptionSet};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// View of what is currently installed
pub trait InstalledPackages {
    /// Version currently linked into the shared prefix
    fn linked_version(&self, name: &str) -> Option<String>;

    /// Enabled options of a complete installation record, if one exists
    fn recorded_options(&self, name: &str, version: &str) -> Option<BTreeSet<String>>;
}

/// An empty installation, for planning from scratch
#[derive(Debug, Clone, Copy, Default)]
pub struct NothingInstalled;

impl InstalledPackages for NothingInstalled {
    fn linked_version(&self, _name: &str) -> Option<String> {
        None
    }

    fn recorded_options(&self, _name: &str, _version: &str) -> Option<BTreeSet<String>> {
        None
    }
}

/// What has to happen for a plan entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    /// Fetch, patch, configure, build, install, link
    Build,
    /// A retained record exists; only relink it
    Link,
    /// The planned version is already linked
    Satisfied,
}

impl PlanAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Build => "build",
            PlanAction::Link => "link",
            PlanAction::Satisfied => "satisfied",
        }
    }
}

/// An active dependency edge of a plan entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDependency {
    pub name: String,
    pub kind: EdgeKind,
    /// Feature name for `--with-<feature>=<path>`
    pub configure_with: Option<String>,
}

/// One package of a build plan
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub package: String,
    pub version: String,
    pub variant: Variant,
    pub options: OptionSet,
    /// Arguments derived from the option set, in schema order
    pub option_args: Vec<String>,
    pub recipe: Arc<Recipe>,
    /// Active dependencies, in lexical order
    pub dependencies: Vec<PlannedDependency>,
    /// `configure_with` features of inactive edges, for `--without-<feature>`
    pub disabled_features: Vec<String>,
    pub action: PlanAction,
}

impl PlanEntry {
    /// Dependencies needed at runtime (everything except build-only edges)
    pub fn runtime_dependencies(&self) -> impl Iterator<Item = &PlannedDependency> {
        self.dependencies.iter().filter(|d| d.kind != EdgeKind::Build)
    }
}

/// Topologically ordered build plan
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub root: String,
    pub entries: Vec<PlanEntry>,
    graph: DependencyGraph,
}

impl BuildPlan {
    /// Package names in build order
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.package.as_str()).collect()
    }

    pub fn entry(&self, name: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.package == name)
    }

    pub fn root_entry(&self) -> Option<&PlanEntry> {
        self.entry(&self.root)
    }

    /// Active dependency graph of the plan
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Entries that need a build
    pub fn to_build(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.action == PlanAction::Build)
    }
}

/// What the user asked for
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub root: String,
    /// Variant of the root; dependencies are always built from stable
    pub variant: Variant,
    /// Explicit flags per package
    pub flags: BTreeMap<String, OptionFlags>,
}

impl PlanRequest {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            variant: Variant::Stable,
            flags: BTreeMap::new(),
        }
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    /// Flags for the root package
    pub fn with_root_flags(self, flags: OptionFlags) -> Self {
        let root = self.root.clone();
        self.with_flags(&root, flags)
    }

    pub fn with_flags(mut self, package: &str, flags: OptionFlags) -> Self {
        self.flags.insert(package.to_string(), flags);
        self
    }
}

/// A loaded package during planning
struct Node {
    recipe: Arc<Recipe>,
    variant: Variant,
    schema: OptionSchema,
}

impl Node {
    /// Edges that exist for this node's variant and whose gates are all on
    fn active_edges<'a>(&'a self, options: &'a OptionSet) -> impl Iterator<Item = &'a DependencyDecl> {
        self.recipe.dependencies.iter().filter(move |d| {
            d.applies_to(self.variant) && d.gates().iter().all(|g| options.is_enabled(g))
        })
    }
}

type Requirements = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

/// Resolves build plans against a recipe source and the installed state
pub struct Planner<'a> {
    source: &'a dyn RecipeSource,
    installed: &'a dyn InstalledPackages,
}

impl<'a> Planner<'a> {
    pub fn new(source: &'a dyn RecipeSource, installed: &'a dyn InstalledPackages) -> Self {
        Self { source, installed }
    }

    /// Resolve a build plan
    ///
    /// Fails before any I/O beyond recipe loading: specification errors,
    /// cycles, and option conflicts all surface here.
    pub fn plan(&self, request: &PlanRequest) -> Result<BuildPlan> {
        let root = request.root.as_str();
        let (nodes, mut failures) = self.load_closure(request)?;

        for package in request.flags.keys().filter(|p| !nodes.contains_key(*p)) {
            warn!("Ignoring flags for '{}', which is not part of the plan", package);
        }

        let no_flags = OptionFlags::new();
        let no_requirements = BTreeMap::new();
        let max_passes = nodes.len() + 2;
        let mut requirements = Requirements::new();
        let mut pass = 0;

        let (mut options, graph) = loop {
            pass += 1;

            let mut options = BTreeMap::new();
            let mut errors = BTreeMap::new();
            for (name, node) in &nodes {
                let flags = request.flags.get(name).unwrap_or(&no_flags);
                let required = requirements.get(name).unwrap_or(&no_requirements);
                match node.schema.resolve(flags, required) {
                    Ok(set) => {
                        options.insert(name.clone(), set);
                    }
                    Err(e) => {
                        errors.insert(name.clone(), e);
                    }
                }
            }

            let mut graph = DependencyGraph::new();
            graph.add_node(root);
            let mut missing: BTreeMap<String, String> = BTreeMap::new();
            for (name, node) in &nodes {
                let Some(set) = options.get(name) else {
                    continue;
                };
                graph.add_node(name);
                for dep in node.active_edges(set) {
                    if nodes.contains_key(&dep.name) {
                        graph.add_edge(name, &dep.name, dep.kind);
                    } else {
                        missing.entry(name.clone()).or_insert_with(|| dep.name.clone());
                    }
                }
            }

            let reachable = graph.reachable_from(root);
            // The root's own problems are the most useful to report
            let report_order = std::iter::once(root)
                .chain(reachable.iter().map(String::as_str).filter(|n| *n != root));
            for name in report_order {
                if let Some(e) = errors.remove(name) {
                    return Err(e);
                }
                if let Some(target) = missing.get(name) {
                    return Err(failures.remove(target).unwrap_or_else(|| {
                        Error::spec(
                            name,
                            format!("depends on '{}', for which no recipe exists", target),
                        )
                    }));
                }
            }

            let mut next = Requirements::new();
            for name in &reachable {
                let (Some(node), Some(set)) = (nodes.get(name), options.get(name)) else {
                    continue;
                };
                for dep in node.active_edges(set) {
                    for option in &dep.options {
                        next.entry(dep.name.clone())
                            .or_default()
                            .entry(option.clone())
                            .or_default()
                            .insert(name.clone());
                    }
                }
            }

            if next == requirements {
                debug!("Option resolution settled after {} pass(es)", pass);
                break (options, graph.restricted_to(&reachable));
            }
            if pass >= max_passes {
                return Err(Error::spec(root, "option resolution did not settle"));
            }
            requirements = next;
        };

        let order = graph.topological_sort()?;

        let mut entries = Vec::with_capacity(order.len());
        for name in order {
            let (Some(node), Some(set)) = (nodes.get(&name), options.remove(&name)) else {
                continue;
            };
            entries.push(self.entry(&name, node, set, &graph)?);
        }

        info!(
            "Resolved plan for {}: {}",
            root,
            entries
                .iter()
                .map(|e| format!("{} {} ({})", e.package, e.version, e.action.as_str()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(BuildPlan {
            root: root.to_string(),
            entries,
            graph,
        })
    }

    fn entry(
        &self,
        name: &str,
        node: &Node,
        options: OptionSet,
        graph: &DependencyGraph,
    ) -> Result<PlanEntry> {
        let version = node
            .recipe
            .version_for(node.variant)
            .ok_or_else(|| Error::spec(name, format!("no {} source", node.variant)))?
            .to_string();

        let active: Vec<&DependencyDecl> = node.active_edges(&options).collect();
        let dependencies: Vec<PlannedDependency> = graph
            .dependencies(name)
            .map(|deps| {
                deps.iter()
                    .map(|(dep, kind)| PlannedDependency {
                        name: dep.clone(),
                        kind: *kind,
                        configure_with: active
                            .iter()
                            .filter(|d| &d.name == dep)
                            .find_map(|d| d.configure_with.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let enabled_features: BTreeSet<&str> = dependencies
            .iter()
            .filter_map(|d| d.configure_with.as_deref())
            .collect();
        let mut disabled_features: Vec<String> = Vec::new();
        for decl in &node.recipe.dependencies {
            if let Some(feature) = &decl.configure_with
                && !enabled_features.contains(feature.as_str())
                && !disabled_features.contains(feature)
            {
                disabled_features.push(feature.clone());
            }
        }

        // A keg is reused only if it was built with exactly this option set
        let action = match self.installed.recorded_options(name, &version) {
            None => PlanAction::Build,
            Some(recorded) => {
                let wanted = options.enabled_set();
                if recorded != wanted {
                    return Err(Error::OptionMismatch {
                        package: name.to_string(),
                        version,
                        installed: recorded.into_iter().collect(),
                        requested: wanted.into_iter().collect(),
                    });
                }
                if self.installed.linked_version(name).as_deref() == Some(version.as_str()) {
                    PlanAction::Satisfied
                } else {
                    PlanAction::Link
                }
            }
        };

        Ok(PlanEntry {
            package: name.to_string(),
            option_args: node.schema.option_args(&options),
            version,
            variant: node.variant,
            options,
            recipe: node.recipe.clone(),
            dependencies,
            disabled_features,
            action,
        })
    }

    /// Load the root and every recipe reachable over any declared edge
    ///
    /// Only a broken or missing root fails here; other failures are kept
    /// until it is known whether the package is needed.
    fn load_closure(
        &self,
        request: &PlanRequest,
    ) -> Result<(BTreeMap<String, Node>, BTreeMap<String, Error>)> {
        let root = request.root.as_str();
        let recipe = self
            .source
            .load(root)?
            .ok_or_else(|| Error::spec(root, "no recipe found"))?;
        if recipe.source_for(request.variant).is_none() {
            return Err(Error::spec(
                root,
                format!("no {} source declared", request.variant),
            ));
        }

        let mut nodes = BTreeMap::new();
        let mut failures = BTreeMap::new();
        let mut absent = BTreeSet::new();
        let mut queue = VecDeque::from([root.to_string()]);
        nodes.insert(
            root.to_string(),
            Node {
                schema: OptionSchema::from_recipe(&recipe),
                recipe,
                variant: request.variant,
            },
        );

        while let Some(name) = queue.pop_front() {
            let Some(node) = nodes.get(&name) else {
                continue;
            };
            let targets: Vec<String> = node
                .recipe
                .dependencies
                .iter()
                .filter(|d| d.applies_to(node.variant))
                .map(|d| d.name.clone())
                .collect();

            for target in targets {
                if nodes.contains_key(&target)
                    || failures.contains_key(&target)
                    || absent.contains(&target)
                {
                    continue;
                }
                match self.source.load(&target) {
                    Ok(Some(recipe)) => {
                        nodes.insert(
                            target.clone(),
                            Node {
                                schema: OptionSchema::from_recipe(&recipe),
                                recipe,
                                variant: Variant::Stable,
                            },
                        );
                        queue.push_back(target);
                    }
                    Ok(None) => {
                        debug!("No recipe for '{}'", target);
                        absent.insert(target);
                    }
                    Err(e) => {
                        debug!("Recipe for '{}' failed to load: {}", target, e);
                        failures.insert(target, e);
                    }
                }
            }
        }

        Ok((nodes, failures))
    }
}

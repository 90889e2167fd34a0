// src/resolver/options.rs

//! Build option resolution
//!
//! Each package has a static option schema: its declared options plus one
//! implicit option per optional or recommended dependency. The effective
//! option set combines, from weakest to strongest:
//!
//! 1. the schema defaults,
//! 2. options that dependents require the package to be built with,
//! 3. explicit user flags for that exact package.
//!
//! An explicit `--without-<opt>` therefore beats a dependent's requirement.
//! Mutually exclusive options are checked last.

use crate::error::{Error, Result};
use crate::recipe::{EdgeKind, Recipe, normalize_option_name};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, warn};

/// One option in a package's schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: String,
    pub description: String,
    pub default: bool,
    /// Symmetric: if `a` conflicts with `b`, `b` lists `a` too
    pub conflicts: BTreeSet<String>,
    pub on_args: Vec<String>,
    pub off_args: Vec<String>,
    /// Set when the option comes from an optional or recommended dependency
    pub from_dependency: Option<EdgeKind>,
}

/// Statically declared options of one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSchema {
    package: String,
    specs: BTreeMap<String, OptionSpec>,
}

impl OptionSchema {
    /// Build the schema of a recipe
    pub fn from_recipe(recipe: &Recipe) -> Self {
        let mut specs: BTreeMap<String, OptionSpec> = recipe
            .options
            .iter()
            .map(|o| {
                let spec = OptionSpec {
                    name: o.name.clone(),
                    description: o.description.clone(),
                    default: o.default,
                    conflicts: o.conflicts.iter().cloned().collect(),
                    on_args: o.on_args.clone(),
                    off_args: o.off_args.clone(),
                    from_dependency: None,
                };
                (o.name.clone(), spec)
            })
            .collect();

        for dep in recipe.dependencies.iter().filter(|d| d.kind.declares_option()) {
            match specs.get_mut(&dep.name) {
                // `option "with-qt"` next to an optional `qt` dependency is one option
                Some(spec) => {
                    spec.from_dependency.get_or_insert(dep.kind);
                }
                None => {
                    specs.insert(
                        dep.name.clone(),
                        OptionSpec {
                            name: dep.name.clone(),
                            description: format!("Build with {} support", dep.name),
                            default: dep.kind.default_enabled(),
                            conflicts: BTreeSet::new(),
                            on_args: Vec::new(),
                            off_args: Vec::new(),
                            from_dependency: Some(dep.kind),
                        },
                    );
                }
            }
        }

        // Make conflicts symmetric
        let pairs: Vec<(String, String)> = specs
            .values()
            .flat_map(|s| s.conflicts.iter().map(move |c| (c.clone(), s.name.clone())))
            .collect();
        for (name, conflict) in pairs {
            if let Some(spec) = specs.get_mut(&name) {
                spec.conflicts.insert(conflict);
            }
        }

        Self {
            package: recipe.name().to_string(),
            specs,
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.specs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// Options in lexical order
    pub fn iter(&self) -> impl Iterator<Item = &OptionSpec> {
        self.specs.values()
    }

    /// Option set with every option at its default
    pub fn defaults(&self) -> OptionSet {
        OptionSet {
            values: self.specs.values().map(|s| (s.name.clone(), s.default)).collect(),
        }
    }

    /// Toolchain arguments derived from an effective option set
    pub fn option_args(&self, options: &OptionSet) -> Vec<String> {
        self.specs
            .values()
            .flat_map(|spec| {
                if options.is_enabled(&spec.name) {
                    spec.on_args.iter()
                } else {
                    spec.off_args.iter()
                }
            })
            .cloned()
            .collect()
    }

    /// Compute the effective option set
    ///
    /// `required` maps option names to the dependents that require them.
    pub fn resolve(
        &self,
        flags: &OptionFlags,
        required: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<OptionSet> {
        let explicit = self.explicit_values(flags)?;
        let mut values: BTreeMap<String, bool> =
            self.specs.values().map(|s| (s.name.clone(), s.default)).collect();

        for (option, dependents) in required {
            if !self.contains(option) {
                let dependent = dependents.iter().next().cloned().unwrap_or_default();
                return Err(Error::spec(
                    dependent,
                    format!(
                        "requires option '{}' of '{}', which declares no such option",
                        option, self.package
                    ),
                ));
            }
            if explicit.get(option) == Some(&false) {
                warn!(
                    "{}: option '{}' required by {} is explicitly disabled",
                    self.package,
                    option,
                    dependents.iter().cloned().collect::<Vec<_>>().join(", ")
                );
                continue;
            }
            values.insert(option.clone(), true);
        }

        for (option, enabled) in &explicit {
            values.insert(option.clone(), *enabled);
        }

        // Mutually exclusive options: an explicit choice turns the other one
        // off; two explicit or two implicit choices are a conflict
        for spec in self.specs.values() {
            for other in spec.conflicts.iter().filter(|o| spec.name < **o) {
                let both = values.get(&spec.name) == Some(&true) && values.get(other) == Some(&true);
                if !both {
                    continue;
                }
                let first_explicit = explicit.get(&spec.name) == Some(&true);
                let second_explicit = explicit.get(other) == Some(&true);
                let loser = match (first_explicit, second_explicit) {
                    (true, false) => other.clone(),
                    (false, true) => spec.name.clone(),
                    _ => {
                        return Err(Error::OptionConflict {
                            package: self.package.clone(),
                            first: spec.name.clone(),
                            second: other.clone(),
                        });
                    }
                };
                debug!(
                    "{}: disabling '{}' in favour of an explicit conflicting option",
                    self.package, loser
                );
                values.insert(loser, false);
            }
        }

        Ok(OptionSet { values })
    }

    /// Validate flags against the schema and fold them into name -> value
    fn explicit_values(&self, flags: &OptionFlags) -> Result<BTreeMap<String, bool>> {
        let mut explicit: BTreeMap<String, bool> = BTreeMap::new();
        for (name, enabled) in &flags.flags {
            if !self.contains(name) {
                return Err(Error::UnknownOption {
                    package: self.package.clone(),
                    option: name.clone(),
                });
            }
            match explicit.get(name) {
                Some(previous) if previous != enabled => {
                    return Err(Error::OptionConflict {
                        package: self.package.clone(),
                        first: format!("with-{}", name),
                        second: format!("without-{}", name),
                    });
                }
                _ => {
                    explicit.insert(name.clone(), *enabled);
                }
            }
        }

        // Two explicitly enabled options that exclude each other
        for (name, _) in explicit.iter().filter(|&(_, on)| *on) {
            if let Some(spec) = self.specs.get(name) {
                for other in spec.conflicts.iter().filter(|o| name < *o) {
                    if explicit.get(other) == Some(&true) {
                        return Err(Error::OptionConflict {
                            package: self.package.clone(),
                            first: name.clone(),
                            second: other.clone(),
                        });
                    }
                }
            }
        }

        Ok(explicit)
    }
}

/// Explicit user flags for one package, in the order given
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionFlags {
    flags: Vec<(String, bool)>,
}

impl OptionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse command-line style flags
    ///
    /// `--with-x` enables `x`, `--without-x` disables it, and a bare `--x`
    /// enables it.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Self {
        let mut flags = Self::new();
        for arg in args {
            let arg = arg.as_ref().trim().trim_start_matches("--");
            let enabled = !arg.starts_with("without-");
            flags.set(arg, enabled);
        }
        flags
    }

    /// Record an explicit value for an option
    pub fn set(&mut self, name: &str, enabled: bool) {
        self.flags.push((normalize_option_name(name), enabled));
    }

    pub fn enable(mut self, name: &str) -> Self {
        self.set(name, true);
        self
    }

    pub fn disable(mut self, name: &str) -> Self {
        self.set(name, false);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.flags.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

/// Effective option set of one package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet {
    values: BTreeMap<String, bool>,
}

impl OptionSet {
    pub fn is_enabled(&self, name: &str) -> bool {
        self.values.get(name).copied().unwrap_or(false)
    }

    /// Names of enabled options, in lexical order
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter(|&(_, on)| *on).map(|(n, _)| n.as_str())
    }

    pub fn enabled_set(&self) -> BTreeSet<String> {
        self.enabled().map(str::to_string).collect()
    }

    /// Every option with its value
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// This set spelled out as explicit flags
    pub fn as_flags(&self) -> OptionFlags {
        OptionFlags {
            flags: self.values.iter().map(|(n, v)| (n.clone(), *v)).collect(),
        }
    }
}

impl fmt::Display for OptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .values
            .iter()
            .map(|(name, on)| format!("{}-{}", if *on { "with" } else { "without" }, name))
            .collect();
        if parts.is_empty() {
            f.write_str("(no options)")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

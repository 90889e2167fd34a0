// src/recipe/parser.rs

//! Recipe file parsing and validation

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::recipe::format::{Recipe, StrategyKind, Variant};
use crate::recipe::template::{self, BUILTINS};
use std::collections::HashSet;
use std::path::Path;

/// Parse a recipe from a TOML string
///
/// Option names are normalized; the result is not yet validated.
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    let mut recipe: Recipe = toml::from_str(content)
        .map_err(|e| Error::spec("<unknown>", format!("Invalid recipe: {}", e)))?;
    recipe.normalize();
    Ok(recipe)
}

/// Parse a recipe from a file
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("Failed to read recipe file: {}", e)))?;

    parse_recipe(&content).map_err(|e| match e {
        Error::Specification { message, .. } => Error::spec(path.display().to_string(), message),
        other => other,
    })
}

/// Validate a recipe for completeness and correctness
///
/// Hard errors are returned as [`Error::Specification`]; softer problems are
/// returned as warnings.
pub fn validate_recipe(recipe: &Recipe) -> Result<Vec<String>> {
    let name = recipe.package.name.as_str();
    let fail = |message: String| Err(Error::spec(name, message));
    let mut warnings = Vec::new();

    // Names end up as directory names in the cellar and prefix
    if name.is_empty() {
        return Err(Error::spec("<unknown>", "Recipe package name cannot be empty"));
    }
    if !is_path_safe(name) {
        return fail(format!("Invalid package name '{}'", name));
    }

    for variant in recipe.variants() {
        let Some(source) = recipe.source_for(variant) else {
            continue;
        };
        if source.version.is_empty() || !is_path_safe(&source.version) {
            return fail(format!("Invalid {} version '{}'", variant, source.version));
        }
        if source.url.is_empty() {
            return fail(format!("{} source has no url", variant));
        }
        match (&source.vcs, &source.checksum) {
            (None, None) => {
                return fail(format!("{} source has no checksum", variant));
            }
            (None, Some(checksum)) => {
                if let Err(e) = Checksum::parse_prefixed(checksum) {
                    return fail(format!("{} source checksum: {}", variant, e));
                }
            }
            (Some(_), Some(_)) => {
                warnings.push(format!("Checksum of {} checkout is ignored", variant));
            }
            (Some(_), None) => {}
        }
    }

    // Option schema: declared options plus implicit ones from optional and
    // recommended dependencies
    let mut options = HashSet::new();
    for option in &recipe.options {
        if option.name.is_empty() {
            return fail("Option name cannot be empty".to_string());
        }
        if !options.insert(option.name.as_str()) {
            return fail(format!("Option '{}' declared twice", option.name));
        }
        if option.description.is_empty() {
            warnings.push(format!("Option '{}' has no description", option.name));
        }
    }
    for dep in &recipe.dependencies {
        if dep.kind.declares_option() {
            options.insert(dep.name.as_str());
        }
    }
    for option in &recipe.options {
        for conflict in &option.conflicts {
            if conflict == &option.name {
                return fail(format!("Option '{}' conflicts with itself", option.name));
            }
            if !options.contains(conflict.as_str()) {
                return fail(format!(
                    "Option '{}' conflicts with undeclared option '{}'",
                    option.name, conflict
                ));
            }
        }
    }

    let declared_variants: HashSet<Variant> = recipe.variants().into_iter().collect();
    let mut seen_edges = HashSet::new();
    for dep in &recipe.dependencies {
        if dep.name.is_empty() {
            return fail("Dependency name cannot be empty".to_string());
        }
        if dep.name == name {
            return fail("Package depends on itself".to_string());
        }
        if !seen_edges.insert((dep.name.as_str(), dep.variant)) {
            return fail(format!("Dependency '{}' declared twice", dep.name));
        }
        if let Some(when) = &dep.when
            && !options.contains(when.as_str())
        {
            return fail(format!(
                "Dependency '{}' is gated by undeclared option '{}'",
                dep.name, when
            ));
        }
        if dep.options.iter().any(|o| o.is_empty()) {
            return fail(format!("Dependency '{}' requires an empty option", dep.name));
        }
        if let Some(variant) = dep.variant
            && !declared_variants.contains(&variant)
        {
            warnings.push(format!(
                "Dependency '{}' is limited to undeclared variant {}",
                dep.name, variant
            ));
        }
    }

    for (index, patch) in recipe.patches.iter().enumerate() {
        let label = patch.label(index);
        match (&patch.inline, &patch.url) {
            (Some(_), Some(_)) => {
                return fail(format!("Patch '{}' has both inline text and a url", label));
            }
            (None, None) => {
                return fail(format!("Patch '{}' has neither inline text nor a url", label));
            }
            (None, Some(_)) => match &patch.checksum {
                None => return fail(format!("Remote patch '{}' has no checksum", label)),
                Some(checksum) => {
                    if let Err(e) = Checksum::parse_prefixed(checksum) {
                        return fail(format!("Patch '{}' checksum: {}", label, e));
                    }
                }
            },
            (Some(_), None) => {}
        }
    }

    match recipe.build.strategy {
        StrategyKind::Direct if recipe.build.steps.is_empty() => {
            return fail("Direct strategy requires at least one step".to_string());
        }
        StrategyKind::Script if recipe.build.script.is_none() => {
            return fail("Script strategy requires a script".to_string());
        }
        StrategyKind::Script if !recipe.build.steps.is_empty() => {
            warnings.push("Steps are ignored by the script strategy".to_string());
        }
        _ => {}
    }
    if recipe.build.jobs == Some(0) {
        return fail("Build jobs must be at least 1".to_string());
    }

    for step in &recipe.build.steps {
        if step.program.is_empty() {
            return fail(format!("{} step has no program", step.phase));
        }
        for gate in step.when.iter().chain(step.unless.iter()) {
            if !options.contains(gate.as_str()) {
                return fail(format!(
                    "Step '{}' refers to undeclared option '{}'",
                    step.program, gate
                ));
            }
        }
    }

    for step in &recipe.test.steps {
        if step.program.is_empty() {
            return fail("Test step has no program".to_string());
        }
    }

    // Every template reference must resolve to something
    let deps: HashSet<&str> = recipe.dependencies.iter().map(|d| d.name.as_str()).collect();
    let templates = recipe
        .build
        .configure_args
        .iter()
        .chain(recipe.build.steps.iter().flat_map(|s| s.args.iter()))
        .chain(recipe.build.environment.values())
        .chain(recipe.build.head_bootstrap.iter())
        .chain(
            recipe
                .test
                .steps
                .iter()
                .flat_map(|s| std::iter::once(&s.program).chain(s.args.iter())),
        )
        .chain(recipe.options.iter().flat_map(|o| o.on_args.iter().chain(o.off_args.iter())));
    for text in templates {
        for reference in template::references(text) {
            let known = BUILTINS.contains(&reference)
                || recipe.variables.contains_key(reference)
                || reference
                    .strip_prefix("opt.")
                    .is_some_and(|dep| deps.contains(dep));
            if !known {
                return fail(format!("Unknown template variable '%({})s'", reference));
            }
        }
    }

    // Warn about missing fields
    if recipe.package.description.is_none() {
        warnings.push("Missing package description".to_string());
    }
    if recipe.package.license.is_none() {
        warnings.push("Missing package license".to_string());
    }

    Ok(warnings)
}

fn is_path_safe(s: &str) -> bool {
    !s.starts_with('.') && !s.contains('/') && !s.contains('\0')
}

// src/commands/plan.rs
//! Build plan inspection

use super::recipe_source;
use anyhow::{Context, Result};
use formulary::{BuildPlan, Cellar, Config, OptionFlags, PlanRequest, Planner, Variant};

/// Resolve and print the build plan without building anything
pub fn cmd_plan(config: &Config, package: &str, variant: Variant, options: &[String]) -> Result<()> {
    let source = recipe_source(config);
    let cellar = Cellar::from_config(config);
    let request = PlanRequest::new(package)
        .with_variant(variant)
        .with_root_flags(OptionFlags::parse(options));
    let plan = Planner::new(&source, &cellar)
        .plan(&request)
        .with_context(|| format!("Failed to resolve dependencies of {}", package))?;

    for line in render_plan(&plan) {
        println!("{}", line);
    }
    Ok(())
}

fn render_plan(plan: &BuildPlan) -> Vec<String> {
    let mut lines = vec![format!(
        "Plan for {} ({} package(s), {} to build):",
        plan.root,
        plan.entries.len(),
        plan.to_build().count()
    )];

    for (index, entry) in plan.entries.iter().enumerate() {
        lines.push(format!(
            "{:>3}. {} {} ({}) [{}]",
            index + 1,
            entry.package,
            entry.version,
            entry.variant,
            entry.action.as_str()
        ));

        let options: Vec<String> = entry
            .options
            .iter()
            .map(|(name, on)| format!("{}{}", if on { '+' } else { '-' }, name))
            .collect();
        if !options.is_empty() {
            lines.push(format!("       options: {}", options.join(" ")));
        }
        if !entry.dependencies.is_empty() {
            let deps: Vec<String> = entry
                .dependencies
                .iter()
                .map(|d| format!("{} ({})", d.name, d.kind.as_str()))
                .collect();
            lines.push(format!("       depends on: {}", deps.join(", ")));
        }
        if !entry.option_args.is_empty() {
            lines.push(format!("       arguments: {}", entry.option_args.join(" ")));
        }
    }
    lines
}

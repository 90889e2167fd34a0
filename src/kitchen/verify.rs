// src/kitchen/verify.rs

//! Post-install smoke tests
//!
//! A recipe's `[test]` steps run against the linked keg in a scratch
//! directory under the build root, removed afterwards. They go through the
//! kitchen's invoker, so timeouts and cancellation behave as for build steps.

use super::Kitchen;
use super::cook::failure_detail;
use super::env::EnvOverlay;
use super::toolchain::{CancelToken, Invocation, StepOutcome};
use crate::error::{Error, Result};
use crate::recipe::{Recipe, TemplateVars};
use std::fs;
use tracing::{debug, info};

const PHASE: &str = "test";

impl Kitchen {
    /// Run a recipe's smoke test against its linked version
    ///
    /// Returns the number of steps that ran. Stops at the first failing step.
    pub fn test(&self, recipe: &Recipe, cancel: &CancelToken) -> Result<usize> {
        let name = recipe.name();
        if recipe.test.is_empty() {
            return Err(Error::spec(name, "recipe declares no test"));
        }
        let version = self
            .cellar
            .linked_version(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;
        let record = self
            .cellar
            .record(name, &version)?
            .ok_or_else(|| Error::NotInstalled(format!("{} {}", name, version)))?;

        fs::create_dir_all(&self.config.build_root)?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-test-", name))
            .tempdir_in(&self.config.build_root)?;

        let shared_prefix = self.cellar.prefix();
        let mut vars = TemplateVars::new()
            .with("name", name)
            .with("version", &version)
            .with("variant", record.variant.as_str())
            .with("prefix", record.keg_path.display().to_string())
            .with("shared_prefix", shared_prefix.display().to_string());
        for dep in &record.runtime_dependencies {
            vars.set(
                format!("opt.{}", dep),
                shared_prefix.join(dep).display().to_string(),
            );
        }
        let builtins = vars.clone();
        for (key, value) in &recipe.variables {
            vars.set(key, builtins.substitute(value));
        }

        let inherited = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
        let env = EnvOverlay::new().with(
            "PATH",
            format!("{}:{}", record.keg_path.join("bin").display(), inherited),
        );
        let timeout = self.config.step_timeout(recipe.test.timeout_secs);
        let cancelled = || Error::Cancelled {
            package: name.to_string(),
            phase: PHASE.to_string(),
        };

        info!("Testing {} {}", name, version);
        for step in &recipe.test.steps {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            let invocation = Invocation {
                phase: PHASE.to_string(),
                program: vars.substitute(&step.program),
                args: step.args.iter().map(|a| vars.substitute(a)).collect(),
                workdir: scratch.path().to_path_buf(),
                env: env.clone(),
                timeout,
            };
            let command = invocation.display();
            debug!("[{}] {}", PHASE, command);
            let failed = |detail: String| Error::TestFailure {
                package: name.to_string(),
                step: command.clone(),
                detail,
            };

            let output = match self
                .invoker
                .invoke(&invocation, cancel)
                .map_err(|e| failed(format!("failed to start {}: {}", invocation.program, e)))?
            {
                StepOutcome::Exited(output) => output,
                StepOutcome::TimedOut { .. } => {
                    return Err(Error::BuildTimeout {
                        package: name.to_string(),
                        phase: PHASE.to_string(),
                        timeout,
                    });
                }
                StepOutcome::Cancelled => return Err(cancelled()),
            };

            if !output.success() {
                return Err(failed(format!(
                    "exit status {}: {}",
                    output.status,
                    failure_detail(&output)
                )));
            }
            if let Some(expected) = &step.expect_stdout
                && output.stdout != *expected
            {
                return Err(failed(format!(
                    "expected output {:?}, got {:?}",
                    expected, output.stdout
                )));
            }
        }

        info!(
            "{} {} passed {} test step(s)",
            name,
            version,
            recipe.test.steps.len()
        );
        Ok(recipe.test.steps.len())
    }
}

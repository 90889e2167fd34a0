// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use formulary::CancelToken;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Token tripped by SIGINT
static INTERRUPT: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_interrupt(_signal: nix::libc::c_int) {
    if let Some(token) = INTERRUPT.get() {
        token.cancel();
    }
}

/// Route the first SIGINT into the cancel token
///
/// The handler resets itself, so a second interrupt terminates the process.
fn install_interrupt_handler() -> CancelToken {
    let token = INTERRUPT.get_or_init(CancelToken::new).clone();
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    // SAFETY: the handler only stores to an atomic flag
    if let Err(e) = unsafe { signal::sigaction(Signal::SIGINT, &action) } {
        warn!("Could not install interrupt handler: {}", e);
    }
    token
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = commands::load_config(&cli.global)?;
    debug!(
        "cellar={} prefix={}",
        config.cellar.display(),
        config.prefix.display()
    );

    match command {
        Commands::Install {
            package,
            variant,
            keep_build_dir,
            options,
        } => {
            let cancel = install_interrupt_handler();
            commands::cmd_install(
                &config,
                &package,
                variant.variant(),
                &options,
                keep_build_dir,
                cli.global.verbose,
                &cancel,
            )
        }
        Commands::Uninstall {
            package,
            ignore_dependencies,
        } => commands::cmd_uninstall(&config, &package, ignore_dependencies),
        Commands::Switch { package, version } => {
            commands::cmd_switch(&config, &package, &version)
        }
        Commands::Cleanup { package } => commands::cmd_cleanup(&config, package.as_deref()),
        Commands::List => commands::cmd_list(&config),
        Commands::Plan {
            package,
            variant,
            options,
        } => commands::cmd_plan(&config, &package, variant.variant(), &options),
        Commands::Fetch { package, variant } => {
            commands::cmd_fetch(&config, &package, variant.variant())
        }
        Commands::Test { package } => {
            let cancel = install_interrupt_handler();
            commands::cmd_test(&config, &package, &cancel)
        }
    }
}

/// Exit status for a failed command, chosen by the library error category
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<formulary::Error>())
        .map(|e| e.category().exit_code())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_follows_wrapped_error() {
        let err: Result<()> = Err(formulary::Error::OptionConflict {
            package: "wireshark".into(),
            first: "qt".into(),
            second: "x".into(),
        })
        .context("Failed to resolve dependencies of wireshark");
        assert_eq!(exit_code(&err.unwrap_err()), 11);

        assert_eq!(exit_code(&anyhow::anyhow!("plain failure")), 1);
    }
}

//! eksaddon CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or options
//! - 3: Template error
//! - 4: Resource error
//! - 5: Install error
//! - 6: Readiness timeout

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, LogFormat};
use eksaddon_core::CoreError;
use eksaddon_resource::ResourceError;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const TEMPLATE_ERROR: u8 = 3;
    pub const RESOURCE_ERROR: u8 = 4;
    pub const INSTALL_ERROR: u8 = 5;
    pub const READINESS_TIMEOUT: u8 = 6;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command {
        Commands::Install(args) => commands::install::execute(args).await,
        Commands::Uninstall(args) => commands::uninstall::execute(args).await,
        Commands::List(args) => commands::list::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Logs go to stderr so `--output json` stays machine readable.
/// `RUST_LOG` takes precedence over the verbosity flags.
fn init_logging(cli: &Cli) {
    let default = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "eksaddon=info,warn",
        (false, 1) => "eksaddon=debug,info",
        (false, _) => "eksaddon=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match cli.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    if result.is_err() {
        // Logging already initialized, continue
    }
}

/// Map an error to its exit code by the first core error in its chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    let Some(core) = e.chain().find_map(|c| c.downcast_ref::<CoreError>()) else {
        return ExitCodes::GENERAL_ERROR;
    };
    match core {
        CoreError::ApplicationNotFound(_)
        | CoreError::InvalidOption { .. }
        | CoreError::OptionsFile { .. } => ExitCodes::INVALID_ARGS,
        CoreError::Template(_) | CoreError::Resource(ResourceError::Template { .. }) => {
            ExitCodes::TEMPLATE_ERROR
        }
        CoreError::Resource(_) | CoreError::Teardown(_) => ExitCodes::RESOURCE_ERROR,
        CoreError::Installer(e) if e.is_readiness_timeout() => ExitCodes::READINESS_TIMEOUT,
        CoreError::Installer(_) => ExitCodes::INSTALL_ERROR,
        CoreError::Context { .. } | CoreError::Exec(_) => ExitCodes::GENERAL_ERROR,
    }
}

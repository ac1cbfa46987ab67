//! Schmied command line driver.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use convenient_asar::AsarCli;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use schmied::builders::{full, quick, Outcome};
use schmied::{Configuration, ToolFactory};

/// Incremental build driver for ROM hacking projects.
#[derive(Parser)]
#[clap(version)]
struct Opts {
    /// Path to the project manifest.
    #[clap(short, long, default_value = "schmied.yaml", env = "SCHMIED_MANIFEST")]
    manifest: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Quick build: re-insert only what changed, falling back to a full
    /// rebuild when skipping work cannot be proven safe.
    Build,
    /// Force a full rebuild from the base ROM.
    Rebuild,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "schmied=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let opts = Opts::parse();

    let config = match Configuration::load(&opts.manifest) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match opts.command {
        Command::Build => build(&config),
        Command::Rebuild => full::run(&config, &ToolFactory),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn build(config: &Configuration) -> Result<(), schmied::BuildError> {
    let mut assembler = AsarCli::new(&config.assembler);
    match quick::run(config, &ToolFactory, &mut assembler)? {
        Outcome::Success | Outcome::NoWork => Ok(()),
        Outcome::MustRebuild(reason) => {
            info!("{reason}");
            full::run(config, &ToolFactory)
        }
    }
}

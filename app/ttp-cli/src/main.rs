//! ttp-harness - two-node conformance harness for the TTP kernel module.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbosity() {
        0 => "ttp_core=info,ttp_cli=info",
        1 => "ttp_core=debug,ttp_cli=debug",
        _ => "ttp_core=trace,ttp_cli=trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, config).await,
        Commands::Cross(args) => commands::cross::execute(args, config).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

//! Bogoslav CLI
//!
//! Main entry point for the `bogoslav` binary.

use std::process::ExitCode;

use bogoslav_common_config::Environment;
use clap::Parser;

mod cli;
mod commands;
mod error;

use cli::Cli;
use error::CliError;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _env = Environment::init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", CliError::from(e).report());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.report());
            e.exit_code()
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = cli.load_config()?;
    bogoslav_common_log::init(cli.log_config(&config))?;
    cli.execute(config).await
}

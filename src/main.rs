use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use log::error;

mod cli;
use crate::cli::Cli;
use crate::cli::CliError;
use crate::cli::Commands;
use crate::cli::Config;

mod hash;
mod inspect;

fn run(cli: &Cli) -> Result<bool, CliError> {
    let config = Config::load(cli.config.as_deref())?.with_overrides(cli);
    let mut out = io::stdout().lock();

    let found = match &cli.command {
        Commands::List { file } => {
            inspect::list(file, &config, &mut out)?;
            true
        }
        Commands::Find { file, tag } => inspect::find(file, *tag, &config, &mut out)?,
        Commands::Dump { file, tag } => inspect::dump(file, *tag, &config, &mut out)?,
    };

    out.flush()?;
    Ok(found)
}

fn main() -> ExitCode {
    env_logger::init();

    // Parse the cli
    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            eprintln!("rstream: {}", e);
            ExitCode::from(2)
        }
    }
}

pub mod commands;

use std::ffi::OsString;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::commands::CommandResult;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley operator CLI",
    long_about = "Inspect Parley configuration, readiness, the model-facing tool catalog, and \
                  run a scripted end-to-end conversation.",
    after_help = "Examples:\n  parley doctor --json\n  parley config\n  parley tools\n  \
                  parley smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Validate config, LLM credentials, tool catalog, and session settings")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the tool schemas advertised to the model as JSON")]
    Tools,
    #[command(about = "Run a scripted bar-chart conversation through the orchestrator")]
    Smoke,
}

pub fn run() -> ExitCode {
    let result = run_with_args(std::env::args_os());
    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Parses `args` (program name first) and runs the selected command.
pub fn run_with_args<I, T>(args: I) -> CommandResult
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            return CommandResult {
                exit_code: if error.use_stderr() { 2 } else { 0 },
                output: error.render().to_string(),
            }
        }
    };

    match cli.command {
        Command::Config { json } => commands::config::run(json),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Tools => commands::tools::run(),
        Command::Smoke => commands::smoke::run(),
    }
}

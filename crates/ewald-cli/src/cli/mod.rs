mod commands;
mod lattice;

use clap::Parser;
use ewald_core::EwaldError;
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let fatal = error.as_ewald_error();
            eprintln!("{}", fatal.diagnostic_line());
            eprintln!("{}", fatal.fatal_exit_line());
            fatal.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("dipole-ewald".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            init_tracing(cli.verbose);
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

/// `RUST_LOG` wins when set; otherwise warnings only, or `info` with
/// `--verbose`. Diagnostics go to stderr so stdout stays parseable, and are
/// coloured only on a terminal.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "dipole-ewald",
    version,
    about = "Ewald summation for point dipoles in a cubic periodic box"
)]
struct Cli {
    /// Log initialisation and per-pass diagnostics
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Evaluate the energy of a dipole lattice on one or more in-process ranks
    Energy(commands::EnergyArgs),
    /// Print the derived Ewald parameters without evaluating anything
    Params(commands::ParamsArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Energy(args) => commands::run_energy_command(args),
        CliCommand::Params(args) => commands::run_params_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Compute(EwaldError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<EwaldError> for CliError {
    fn from(error: EwaldError) -> Self {
        Self::Compute(error)
    }
}

impl CliError {
    fn as_ewald_error(&self) -> EwaldError {
        match self {
            Self::Usage(message) => {
                EwaldError::input_validation("INPUT.CLI_USAGE", message.trim_end())
            }
            Self::Compute(error) => error.clone(),
            Self::Internal(error) => EwaldError::internal("IO.CLI", format!("{error:#}")),
        }
    }
}

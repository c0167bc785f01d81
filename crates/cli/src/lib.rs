pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fleetquote_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "fleetquote",
    about = "Fleetquote operator CLI",
    long_about = "Operate the fleetquote engine: migrations, readiness checks, config inspection and offline price estimates.",
    after_help = "Examples:\n  fleetquote doctor --json\n  fleetquote config\n  fleetquote estimate --vehicle \"14 Seater Minibus\" --pickup Sandton --dropoff \"Durban CBD\""
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this file instead of fleetquote.toml")]
    config_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database connectivity, schema and notification readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Price a trip with the standard rate card without touching the database")]
    Estimate {
        #[arg(long, help = "Vehicle label, e.g. \"4 Seater Sedan\"")]
        vehicle: String,
        #[arg(long)]
        pickup: String,
        #[arg(long)]
        dropoff: String,
        #[arg(long, help = "Final destination when it differs from the dropoff")]
        destination: Option<String>,
        #[arg(long, help = "Price a return trip instead of one-way")]
        round_trip: bool,
    },
}

fn load_options(config_file: Option<PathBuf>) -> LoadOptions {
    match config_file {
        Some(path) => {
            LoadOptions { config_path: Some(path), require_file: true, ..LoadOptions::default() }
        }
        None => LoadOptions::default(),
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = load_options(cli.config_file);

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Estimate { vehicle, pickup, dropoff, destination, round_trip } => {
            commands::estimate::run(commands::estimate::EstimateArgs {
                vehicle,
                pickup,
                dropoff,
                destination,
                round_trip,
            })
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

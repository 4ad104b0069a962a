// nuclink CLI - group level schemes from independent datasets

mod exit_codes;
mod group;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::{EXIT_ERROR, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "nuclink")]
#[command(about = "Group nuclear levels and gammas reported by independent datasets")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); overrides NUCLINK_LOG
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Group every dataset's levels and gammas into canonical entities
    #[command(after_help = "\
Examples:
  nuclink group 60ni.json
  nuclink group 60ni.json --config adopted.toml --json
  nuclink group 60ni.json --output groups.json
  NUCLINK_LOG=debug nuclink group 60ni.json")]
    Group {
        /// Observation input (JSON)
        input: PathBuf,

        /// Grouping config (TOML); built-in defaults when omitted
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output JSON to stdout instead of only the human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Exit non-zero when multiply-assigned members or spin-parity
        /// conflicts remain
        #[arg(long)]
        strict: bool,
    },

    /// Validate a grouping config without running
    #[command(after_help = "\
Examples:
  nuclink validate adopted.toml")]
    Validate {
        /// Path to the TOML config file
        config: PathBuf,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  nuclink-recon ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logger = match logging::init_logging(cli.verbose) {
        Ok(handle) => Some(handle),
        Err(message) => {
            eprintln!("warning: {message}");
            None
        }
    };

    let result = match cli.command {
        Commands::Group { input, config, json, output, strict } => {
            group::cmd_group(input, config, json, output, strict)
        }
        Commands::Validate { config } => group::cmd_validate(config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(if code == EXIT_SUCCESS { EXIT_ERROR } else { code })
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

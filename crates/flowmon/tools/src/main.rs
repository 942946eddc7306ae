// Flowmon
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Flowmon CLI Tool
//!
//! Main entry point for the flow monitor command-line interface.

use anyhow::Result;
use clap::{Parser, Subcommand};
use flowmon_tools::cli::replay::{ReplayArgs, render_report, run_replay};
use flowmon_tools::config::FlowmonConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowmon")]
#[command(about = "Flowmon - Dynamic Information-Flow Monitor")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file (TOML, overrides $FLOWMON_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded trace and report illegal flows
    Replay(ReplayArgs),
    /// Show the effective configuration
    Config,
}

fn main() -> Result<ExitCode> {
    // Initialize tracing, honouring RUST_LOG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = FlowmonConfig::resolve_config(cli.config)?;

    match cli.command {
        Commands::Replay(args) => {
            let report = run_replay(&args, &config)?;
            print!("{}", render_report(&report, args.json)?);
            if !report.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

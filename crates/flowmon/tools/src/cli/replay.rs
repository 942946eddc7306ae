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

//! Replay command for checking recorded traces

use anyhow::{Context, Result};
use clap::Args;
use flowmon_core::{Lattice, ReplayReport, Replayer, ThreeLevel, Trace, TwoLevel};
use serde::de::DeserializeOwned;
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use crate::config::{FlowmonConfig, LatticeKind};

/// Arguments for the replay command
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Path to the JSON trace to replay
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// Security lattice the trace is labelled with (overrides the config file)
    #[arg(short, long, value_enum)]
    pub lattice: Option<LatticeKind>,

    /// Keep replaying after an illegal flow
    #[arg(short, long)]
    pub keep_going: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Replay a trace held in `json` against a fresh heap
pub fn replay_trace<L>(json: &str, config: &FlowmonConfig, keep_going: bool) -> Result<ReplayReport>
where
    L: Lattice + DeserializeOwned,
{
    let trace: Trace<L> = Trace::from_json(json).context("Malformed trace")?;
    if !trace.description.is_empty() {
        info!("Replaying: {}", trace.description);
    }

    let mut replayer = Replayer::new(config.monitor.clone()).keep_going(keep_going);
    let report = replayer.run(&trace)?;
    Ok(report)
}

/// Execute the replay command
pub fn run_replay(args: &ReplayArgs, config: &FlowmonConfig) -> Result<ReplayReport> {
    let json = std::fs::read_to_string(&args.trace).with_context(|| format!("Failed to read trace {}", args.trace.display()))?;
    let lattice = args.lattice.unwrap_or(config.lattice);
    let keep_going = args.keep_going || config.keep_going;

    let start = Instant::now();
    let report = match lattice {
        LatticeKind::Two => replay_trace::<TwoLevel>(&json, config, keep_going),
        LatticeKind::Three => replay_trace::<ThreeLevel>(&json, config, keep_going),
    }
    .with_context(|| format!("Replay of {} failed", args.trace.display()))?;

    info!("Replayed {} step(s) in {:?}", report.steps_executed, start.elapsed());
    Ok(report)
}

/// Format a report for the terminal
pub fn render_report(report: &ReplayReport, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(report)? + "\n");
    }

    let mut out = String::new();
    writeln!(out, "Steps executed: {}", report.steps_executed)?;
    if report.is_clean() {
        writeln!(out, "No illegal flows found")?;
    } else {
        writeln!(out, "Illegal flows: {}", report.violations.len())?;
        for violation in &report.violations {
            writeln!(out, "  [step {}] {}: {}", violation.step, violation.frame, violation.message)?;
        }
    }
    Ok(out)
}

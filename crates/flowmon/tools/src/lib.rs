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

//! Flowmon Tools Library
//!
//! Command-line front end of the flow monitor: replays recorded traces of
//! monitor calls and reports the illegal flows found.

pub mod cli;
pub mod config;

pub use cli::replay::{ReplayArgs, render_report, replay_trace, run_replay};
pub use config::{FlowmonConfig, LatticeKind};

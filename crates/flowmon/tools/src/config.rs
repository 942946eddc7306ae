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

//! Tool configuration
//!
//! ```toml
//! lattice = "three"
//! keep_going = true
//!
//! [monitor]
//! auto_register_heap = false
//! max_scope_depth = 256
//! ```

use anyhow::{Context, Result};
use clap::ValueEnum;
use flowmon_core::MonitorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "FLOWMON_CONFIG";

/// Security lattice a trace is labelled with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LatticeKind {
    /// LOW < HIGH
    #[default]
    Two,
    /// LOW < MEDIUM < HIGH
    Three,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowmonConfig {
    pub lattice: LatticeKind,
    pub keep_going: bool,
    pub monitor: MonitorConfig,
}

impl FlowmonConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load the file given on the command line, else the one named by
    /// `FLOWMON_CONFIG`, else use defaults
    pub fn resolve_config(cli_config: Option<PathBuf>) -> Result<Self> {
        Self::resolve_with_env(cli_config, std::env::var(CONFIG_ENV).ok())
    }

    pub fn resolve_with_env(cli_config: Option<PathBuf>, env_config: Option<String>) -> Result<Self> {
        if let Some(config_path) = cli_config {
            Self::load_from_file(config_path)
        } else if let Some(env_config) = env_config {
            Self::load_from_file(env_config)
        } else {
            Ok(Self::default())
        }
    }
}

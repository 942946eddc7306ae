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

//! Monitor configuration

use serde::{Deserialize, Serialize};

/// Settings shared by every session of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Heap writes create unseen object, field and array slot records instead
    /// of failing with `UnknownSlot`
    pub auto_register_heap: bool,
    /// Maximum nesting of open branch scopes per frame; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_scope_depth: Option<usize>,
    /// `close()` rejects frames that still have open scopes
    pub require_balanced_close: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            auto_register_heap: true,
            max_scope_depth: None,
            require_balanced_close: true,
        }
    }
}

impl MonitorConfig {
    /// Configuration that only touches registered heap entities
    pub fn strict() -> Self {
        Self {
            auto_register_heap: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MonitorConfig = serde_json::from_str(r#"{"max_scope_depth": 8}"#).unwrap();
        assert_eq!(config.max_scope_depth, Some(8));
        assert!(config.auto_register_heap);
        assert!(config.require_balanced_close);
    }

    #[test]
    fn test_strict_disables_auto_registration() {
        let config = MonitorConfig::strict();
        assert!(!config.auto_register_heap);
        assert_eq!(config.max_scope_depth, None);
    }
}

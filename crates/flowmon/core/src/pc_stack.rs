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

//! Program-Counter Stack
//!
//! Conditionals and loops raise the ambient secrecy level for the duration of
//! their body. Each open region is an entry tagged with the caller-supplied
//! scope tag of its branch site; the local PC is the innermost entry's level and
//! the global PC is the join over all entries (and the frame's base level).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{FlowError, FlowResult};
use crate::lattice::Lattice;

/// Identifier of a static branch or loop site
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeTag(String);

impl ScopeTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeTag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for ScopeTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl From<u32> for ScopeTag {
    fn from(site: u32) -> Self {
        Self(site.to_string())
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct PcEntry<L> {
    tag: ScopeTag,
    level: L,
    /// Global PC while this entry is the innermost one
    global: L,
}

/// Scoped stack of program-counter levels
#[derive(Debug, Clone)]
pub struct PcStack<L> {
    entries: Vec<PcEntry<L>>,
    /// Level every global PC is joined with; the caller's PC for callee frames
    base: L,
    /// Nesting limit, unbounded when `None`
    max_depth: Option<usize>,
}

impl<L: Lattice> PcStack<L> {
    /// Create an empty, unbounded stack at bottom
    pub fn new() -> Self {
        Self::with_base(L::bottom(), None)
    }

    /// Create an empty stack whose global PC never drops below `base`
    pub fn with_base(base: L, max_depth: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            base,
            max_depth,
        }
    }

    /// Open a scope; returns the new global PC
    pub fn push(&mut self, level: L, tag: ScopeTag) -> FlowResult<L> {
        if let Some(limit) = self.max_depth.filter(|limit| self.entries.len() >= *limit) {
            return Err(FlowError::ScopeOverflow { limit });
        }
        let global = self.global_pc().join(level);
        self.entries.push(PcEntry { tag, level, global });
        Ok(global)
    }

    /// Close the innermost scope, which must carry `tag`; returns the restored global PC
    pub fn pop(&mut self, tag: &ScopeTag) -> FlowResult<L> {
        let innermost = self.entries.last().map(|entry| &entry.tag);
        if innermost != Some(tag) {
            return Err(FlowError::ScopeMismatch {
                expected: innermost.cloned(),
                found: tag.clone(),
            });
        }
        self.entries.pop();
        Ok(self.global_pc())
    }

    /// Level of the innermost open scope, bottom when none is open
    pub fn local_pc(&self) -> L {
        self.entries.last().map(|entry| entry.level).unwrap_or_else(L::bottom)
    }

    /// Join of the base level and every open scope
    pub fn global_pc(&self) -> L {
        self.entries.last().map(|entry| entry.global).unwrap_or(self.base)
    }

    pub fn base(&self) -> L {
        self.base
    }

    /// Number of open scopes
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Tags of the open scopes, outermost first
    pub fn open_tags(&self) -> impl Iterator<Item = &ScopeTag> {
        self.entries.iter().map(|entry| &entry.tag)
    }
}

impl<L: Lattice> Default for PcStack<L> {
    fn default() -> Self {
        Self::new()
    }
}

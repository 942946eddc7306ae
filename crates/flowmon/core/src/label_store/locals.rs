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

//! Frame-scoped local variable labels

use std::collections::HashMap;

use crate::errors::{FlowError, FlowResult, SlotRef};
use crate::lattice::Lattice;

/// Label state of one local variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSlot<L> {
    /// Current level of the value held by the variable
    pub level: L,
    /// Global PC at the point the variable was declared
    pub declared_under: L,
}

/// Locals of a single frame
#[derive(Debug, Clone, Default)]
pub struct LocalTable<L> {
    slots: HashMap<String, LocalSlot<L>>,
}

impl<L: Lattice> LocalTable<L> {
    pub fn new() -> Self {
        Self { slots: HashMap::new() }
    }

    /// Declare `name` at bottom. Returns false if it already existed, in which
    /// case its level and declaration PC are left as they were.
    pub fn register(&mut self, name: &str, declared_under: L) -> bool {
        if self.slots.contains_key(name) {
            return false;
        }
        self.slots.insert(name.to_string(), LocalSlot { level: L::bottom(), declared_under });
        true
    }

    pub fn slot(&self, name: &str) -> FlowResult<LocalSlot<L>> {
        self.slots.get(name).copied().ok_or_else(|| FlowError::UnknownSlot(SlotRef::local(name)))
    }

    pub fn level_of(&self, name: &str) -> FlowResult<L> {
        self.slot(name).map(|slot| slot.level)
    }

    /// Overwrite the level of a declared local; returns the previous level
    pub fn set(&mut self, name: &str, level: L) -> FlowResult<L> {
        let slot = self.slots.get_mut(name).ok_or_else(|| FlowError::UnknownSlot(SlotRef::local(name)))?;
        Ok(std::mem::replace(&mut slot.level, level))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Declared names, sorted for stable output
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

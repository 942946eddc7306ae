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

//! Flow Monitor Error Types
//!
//! `IllegalFlow` is the monitor's product: a report that the analyzed program
//! leaks. Every other variant means the instrumentation contract was broken
//! (a missing declaration, unbalanced branch scopes) and is not a policy finding.

use crate::label_store::ObjectId;
use crate::pc_stack::ScopeTag;
use std::fmt;

/// A trackable entity referenced by a monitor operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotRef {
    /// Local variable of the current frame
    Local(String),
    /// Field of a tracked object
    Field { object: ObjectId, field: String },
    /// Slot of a tracked array
    ArraySlot { array: ObjectId, index: String },
    /// Object or array record as a whole
    Record(ObjectId),
}

impl SlotRef {
    pub fn local(name: impl Into<String>) -> Self {
        SlotRef::Local(name.into())
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRef::Local(name) => write!(f, "local '{}'", name),
            SlotRef::Field { object, field } => write!(f, "field {}.{}", object, field),
            SlotRef::ArraySlot { array, index } => write!(f, "array slot {}[{}]", array, index),
            SlotRef::Record(object) => write!(f, "record {}", object),
        }
    }
}

/// Why a flow was rejected. Levels are kept in their display form so the error
/// type does not depend on the lattice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationReason {
    /// A variable that existed before the current branch would have to be raised
    SensitiveUpgrade { required: String, current: String, pc: String },
    /// A value reached a sink whose bound it exceeds
    SinkExceeded { level: String, bound: String },
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationReason::SensitiveUpgrade { required, current, pc } => {
                write!(f, "sensitive upgrade from {} to {} under pc {}", current, required, pc)
            }
            ViolationReason::SinkExceeded { level, bound } => {
                write!(f, "level {} exceeds sink bound {}", level, bound)
            }
        }
    }
}

/// Main monitor error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Illegal flow to {target}: {reason}")]
    IllegalFlow { target: SlotRef, reason: ViolationReason },

    #[error("Unknown slot: {0} was never registered")]
    UnknownSlot(SlotRef),

    #[error("Scope mismatch: exit of '{found}' but innermost open scope is {}", describe_scope(.expected))]
    ScopeMismatch { expected: Option<ScopeTag>, found: ScopeTag },

    #[error("Scope overflow - maximum nesting depth ({limit}) exceeded")]
    ScopeOverflow { limit: usize },

    #[error("Frame '{frame}' closed with {open} open scope(s)")]
    UnbalancedFrame { frame: String, open: usize },

    #[error("Missing argument at position {position} ({available} passed)")]
    MissingArgument { position: usize, available: usize },
}

fn describe_scope(tag: &Option<ScopeTag>) -> String {
    match tag {
        Some(tag) => format!("'{}'", tag),
        None => "<none>".to_string(),
    }
}

impl FlowError {
    /// True for policy findings that should be reported, not treated as faults
    pub fn is_violation(&self) -> bool {
        matches!(self, FlowError::IllegalFlow { .. })
    }

    /// True when the instrumentation contract was violated
    pub fn is_internal(&self) -> bool {
        !self.is_violation()
    }
}

/// Type alias for monitor operation results
pub type FlowResult<T> = Result<T, FlowError>;

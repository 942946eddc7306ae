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

//! Flowmon Core
//!
//! Dynamic information-flow monitor. Instrumented code opens a
//! [`MonitorSession`] per call frame and reports declarations, assignments,
//! branch entry and exit, and sink uses. The session tracks a security level
//! for every local, field and array slot, and rejects assignments that would
//! leak secret data through control flow (no-sensitive-upgrade).
//!
//! ```
//! use flowmon_core::{MonitorSession, TwoLevel};
//!
//! let mut session = MonitorSession::new(flowmon_core::init());
//! session.declare_local("y");
//! session.declare_local("secret");
//! session.assert_local_level("secret", TwoLevel::High).unwrap();
//!
//! session.enter_branch_on_locals("if_0", &["secret"]).unwrap();
//! assert!(session.write_local("y", TwoLevel::Low).is_err());
//! session.exit_branch("if_0").unwrap();
//! ```

pub mod config;
pub mod errors;
pub mod label_store;
pub mod lattice;
pub mod monitor;
pub mod pc_stack;
pub mod replay;

pub use config::MonitorConfig;
pub use errors::{FlowError, FlowResult, SlotRef, ViolationReason};
pub use label_store::{HeapTable, LocalTable, ObjectId, RecordKind, SharedHeap};
pub use lattice::{CategorySet, Lattice, ParseLevelError, ThreeLevel, TwoLevel};
pub use monitor::MonitorSession;
pub use pc_stack::{PcStack, ScopeTag};
pub use replay::{MonitorOp, Operand, ReplayError, ReplayReport, Replayer, Trace, TraceStep, Violation};

/// Start an analysis run with an empty heap table
pub fn init<L: Lattice>() -> SharedHeap<L> {
    SharedHeap::new()
}

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

//! # Label Store
//!
//! Maps every trackable entity to its current security level:
//!
//! - [`LocalTable`]: locals of one frame, owned by a monitor session
//! - [`HeapTable`]: object fields and array slots keyed by [`ObjectId`],
//!   shared by every session of a run through [`SharedHeap`]
//!
//! The store performs no flow checks; it only answers and records levels.

pub mod heap;
pub mod locals;

pub use heap::{HeapRecord, HeapTable, ObjectId, RecordKind, SharedHeap};
pub use locals::{LocalSlot, LocalTable};

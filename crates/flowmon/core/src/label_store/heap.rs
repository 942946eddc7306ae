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

//! Heap Label Table
//!
//! Object fields and array slots are labelled per object identity, never per
//! value: two distinct objects with equal contents have distinct records. The
//! instrumentation layer refers to objects by [`ObjectId`] handles, which it
//! either supplies itself or mints through [`HeapTable::allocate`].
//!
//! Array records are object records whose slot keys are decimal indices, so a
//! symbolic key can still be stored next to them through the field operations.

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::errors::{FlowError, FlowResult, SlotRef};
use crate::lattice::Lattice;

/// Stable identity handle of a tracked object or array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Wrap a handle chosen by the instrumentation layer
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of heap record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Object,
    Array,
}

/// Labels of one object or array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapRecord<L> {
    pub kind: RecordKind,
    pub slots: BTreeMap<String, L>,
}

impl<L> HeapRecord<L> {
    fn new(kind: RecordKind) -> Self {
        Self { kind, slots: BTreeMap::new() }
    }
}

fn index_key(index: usize) -> String {
    index.to_string()
}

/// Process-wide table of heap labels
#[derive(Debug, Clone)]
pub struct HeapTable<L> {
    records: HashMap<ObjectId, HeapRecord<L>>,
    next_handle: u64,
}

impl<L: Lattice> HeapTable<L> {
    pub fn new() -> Self {
        Self { records: HashMap::new(), next_handle: 1 }
    }

    /// Mint a fresh handle and create an empty record for it.
    /// Handles already supplied by the caller are skipped.
    pub fn allocate(&mut self, kind: RecordKind) -> ObjectId {
        while self.records.contains_key(&ObjectId(self.next_handle)) {
            self.next_handle += 1;
        }
        let id = ObjectId(self.next_handle);
        self.next_handle += 1;
        self.records.insert(id, HeapRecord::new(kind));
        id
    }

    /// Create an empty object record; returns false if it was already tracked
    pub fn register_object(&mut self, object: ObjectId) -> bool {
        if self.records.contains_key(&object) {
            return false;
        }
        self.records.insert(object, HeapRecord::new(RecordKind::Object));
        true
    }

    /// Register `field` at bottom, creating the object record on first use.
    /// Returns false if the field was already tracked.
    pub fn register_field(&mut self, object: ObjectId, field: &str) -> bool {
        let record = self.records.entry(object).or_insert_with(|| HeapRecord::new(RecordKind::Object));
        if record.slots.contains_key(field) {
            return false;
        }
        record.slots.insert(field.to_string(), L::bottom());
        true
    }

    pub fn level_of_field(&self, object: ObjectId, field: &str) -> FlowResult<L> {
        self.records
            .get(&object)
            .and_then(|record| record.slots.get(field))
            .copied()
            .ok_or_else(|| FlowError::UnknownSlot(SlotRef::Field { object, field: field.to_string() }))
    }

    /// Overwrite the level of a registered field; returns the previous level
    pub fn set_field(&mut self, object: ObjectId, field: &str, level: L) -> FlowResult<L> {
        let slot = self
            .records
            .get_mut(&object)
            .and_then(|record| record.slots.get_mut(field))
            .ok_or_else(|| FlowError::UnknownSlot(SlotRef::Field { object, field: field.to_string() }))?;
        Ok(std::mem::replace(slot, level))
    }

    /// Track `length` slots of `array` at bottom. Slots already present keep
    /// their level.
    pub fn register_array(&mut self, array: ObjectId, length: usize) {
        let record = self.records.entry(array).or_insert_with(|| HeapRecord::new(RecordKind::Array));
        record.kind = RecordKind::Array;
        for index in 0..length {
            record.slots.entry(index_key(index)).or_insert_with(L::bottom);
        }
    }

    /// Register one array slot at bottom; returns false if it was already tracked
    pub fn register_array_slot(&mut self, array: ObjectId, index: usize) -> bool {
        let record = self.records.entry(array).or_insert_with(|| HeapRecord::new(RecordKind::Array));
        let key = index_key(index);
        if record.slots.contains_key(&key) {
            return false;
        }
        record.slots.insert(key, L::bottom());
        true
    }

    pub fn level_of_array_slot(&self, array: ObjectId, index: usize) -> FlowResult<L> {
        let key = index_key(index);
        self.records
            .get(&array)
            .and_then(|record| record.slots.get(&key))
            .copied()
            .ok_or(FlowError::UnknownSlot(SlotRef::ArraySlot { array, index: key }))
    }

    /// Overwrite the level of a registered array slot; returns the previous level
    pub fn set_array_slot(&mut self, array: ObjectId, index: usize, level: L) -> FlowResult<L> {
        let key = index_key(index);
        match self.records.get_mut(&array).and_then(|record| record.slots.get_mut(&key)) {
            Some(slot) => Ok(std::mem::replace(slot, level)),
            None => Err(FlowError::UnknownSlot(SlotRef::ArraySlot { array, index: key })),
        }
    }

    /// Number of tracked slots of an object or array
    pub fn size_of(&self, object: ObjectId) -> FlowResult<usize> {
        self.records
            .get(&object)
            .map(|record| record.slots.len())
            .ok_or(FlowError::UnknownSlot(SlotRef::Record(object)))
    }

    pub fn record(&self, object: ObjectId) -> Option<&HeapRecord<L>> {
        self.records.get(&object)
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.records.contains_key(&object)
    }

    /// Number of tracked objects and arrays
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.next_handle = 1;
    }
}

impl<L: Lattice> Default for HeapTable<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to the heap table of one analysis run.
///
/// All sessions of a run hold clones of the same handle. Every access takes a
/// single mutex for the duration of one lookup or update.
#[derive(Debug)]
pub struct SharedHeap<L> {
    inner: Arc<Mutex<HeapTable<L>>>,
}

impl<L: Lattice> SharedHeap<L> {
    /// Start a run with an empty heap table
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HeapTable::new())) }
    }

    /// Clear every record in place. Must not race with active sessions.
    pub fn reset(&self) {
        self.inner.lock().clear();
    }

    pub fn lock(&self) -> MutexGuard<'_, HeapTable<L>> {
        self.inner.lock()
    }

    /// Run `f` with the table locked
    pub fn with<R>(&self, f: impl FnOnce(&mut HeapTable<L>) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    /// True if both handles refer to the same table
    pub fn same_table(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<L> Clone for SharedHeap<L> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<L: Lattice> Default for SharedHeap<L> {
    fn default() -> Self {
        Self::new()
    }
}

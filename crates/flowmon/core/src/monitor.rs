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

//! Flow Monitor
//!
//! A [`MonitorSession`] is the object instrumented code calls into, once per
//! analyzed call frame. It owns the frame's locals and program-counter stack
//! and shares the heap table with every other session of the run.
//!
//! # Enforcement
//!
//! - Locals follow no-sensitive-upgrade: a variable that existed before the
//!   current secret-dependent branch cannot be raised inside it, because whether
//!   the write happened already reveals the branch condition.
//! - Fields and array slots follow permissive upgrade: the write commits at
//!   `join(operand, globalPC)` and never fails on level grounds.
//! - Sinks reject values above their bound.
//!
//! A local counts as pre-existing when the current global PC is not below the
//! PC it was declared under.

use metrics::increment_counter;
use tracing::{debug, trace, warn};

use crate::config::MonitorConfig;
use crate::errors::{FlowError, FlowResult, SlotRef, ViolationReason};
use crate::label_store::{LocalTable, ObjectId, RecordKind, SharedHeap};
use crate::lattice::Lattice;
use crate::pc_stack::{PcStack, ScopeTag};

/// Frame name of sessions created without an explicit name
pub const ROOT_FRAME: &str = "main";

/// Monitor state of one analyzed call frame
#[derive(Debug)]
pub struct MonitorSession<L: Lattice> {
    frame: String,
    locals: LocalTable<L>,
    pc: PcStack<L>,
    heap: SharedHeap<L>,
    config: MonitorConfig,
    /// Levels of the arguments passed by the caller, already joined with its PC
    arguments: Vec<L>,
    return_level: Option<L>,
}

impl<L: Lattice> MonitorSession<L> {
    /// Open a root frame on `heap` with the default configuration
    pub fn new(heap: SharedHeap<L>) -> Self {
        Self::with_config(heap, MonitorConfig::default())
    }

    pub fn with_config(heap: SharedHeap<L>, config: MonitorConfig) -> Self {
        Self::open(ROOT_FRAME.to_string(), heap, config, L::bottom(), Vec::new())
    }

    fn open(frame: String, heap: SharedHeap<L>, config: MonitorConfig, base: L, arguments: Vec<L>) -> Self {
        debug!("Opening frame '{}' with pc base {} and {} argument(s)", frame, base, arguments.len());
        Self {
            frame,
            locals: LocalTable::new(),
            pc: PcStack::with_base(base, config.max_scope_depth),
            heap,
            config,
            arguments,
            return_level: None,
        }
    }

    /// Rename the frame for diagnostics
    pub fn named(mut self, frame: impl Into<String>) -> Self {
        self.frame = frame.into();
        self
    }

    // ---------------------------------------------------------------------
    // Locals
    // ---------------------------------------------------------------------

    /// Declare a local at bottom. Redeclaring an existing local is a no-op.
    pub fn declare_local(&mut self, name: &str) {
        let pc = self.pc.global_pc();
        if self.locals.register(name, pc) {
            debug!(frame = %self.frame, "Declared local '{}' under pc {}", name, pc);
        }
    }

    pub fn read_local(&self, name: &str) -> FlowResult<L> {
        let level = self.locals.level_of(name)?;
        trace!(frame = %self.frame, "Read local '{}' at {}", name, level);
        Ok(level)
    }

    /// Assign a value whose operands join to `operand` to a declared local.
    /// Returns the committed level.
    pub fn write_local(&mut self, name: &str, operand: L) -> FlowResult<L> {
        let pc = self.pc.global_pc();
        let required = operand.join(pc);
        let slot = self.locals.slot(name)?;

        let pre_existing = !pc.leq(slot.declared_under);
        if pre_existing && !required.leq(slot.level) {
            return Err(self.illegal_flow(
                SlotRef::local(name),
                ViolationReason::SensitiveUpgrade {
                    required: required.to_string(),
                    current: slot.level.to_string(),
                    pc: pc.to_string(),
                },
            ));
        }

        self.locals.set(name, required)?;
        trace!(frame = %self.frame, "Local '{}' := {} (was {})", name, required, slot.level);
        Ok(required)
    }

    /// Explicitly label a local, bypassing flow checks. Used for annotated
    /// sources and declassification points.
    pub fn assert_local_level(&mut self, name: &str, level: L) -> FlowResult<()> {
        let previous = self.locals.set(name, level)?;
        debug!(frame = %self.frame, "Local '{}' labelled {} (was {})", name, level, previous);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Heap
    // ---------------------------------------------------------------------

    /// Track an object created by an instrumented `new`
    pub fn register_object(&self, object: ObjectId) {
        if self.heap.lock().register_object(object) {
            debug!(frame = %self.frame, "Registered object {}", object);
        }
    }

    pub fn register_object_field(&self, object: ObjectId, field: &str) {
        self.heap.lock().register_field(object, field);
    }

    /// Track an array created by an instrumented `new`, one bottom slot per element
    pub fn register_array(&self, array: ObjectId, length: usize) {
        self.heap.lock().register_array(array, length);
        debug!(frame = %self.frame, "Registered array {} with {} slot(s)", array, length);
    }

    /// Mint a handle for a new object and track it
    pub fn new_object(&self) -> ObjectId {
        let object = self.heap.lock().allocate(RecordKind::Object);
        debug!(frame = %self.frame, "Allocated object {}", object);
        object
    }

    /// Mint a handle for a new array of `length` elements and track it
    pub fn new_array(&self, length: usize) -> ObjectId {
        let mut heap = self.heap.lock();
        let array = heap.allocate(RecordKind::Array);
        heap.register_array(array, length);
        array
    }

    pub fn read_field(&self, object: ObjectId, field: &str) -> FlowResult<L> {
        let level = self.heap.lock().level_of_field(object, field)?;
        trace!(frame = %self.frame, "Read field {}.{} at {}", object, field, level);
        Ok(level)
    }

    pub fn read_array_slot(&self, array: ObjectId, index: usize) -> FlowResult<L> {
        let level = self.heap.lock().level_of_array_slot(array, index)?;
        trace!(frame = %self.frame, "Read array slot {}[{}] at {}", array, index, level);
        Ok(level)
    }

    /// Assign to a field under permissive upgrade; returns the committed level
    pub fn write_field(&self, object: ObjectId, field: &str, operand: L) -> FlowResult<L> {
        let required = operand.join(self.pc.global_pc());
        let mut heap = self.heap.lock();
        if self.config.auto_register_heap {
            heap.register_field(object, field);
        }
        let previous = heap.set_field(object, field, required)?;
        trace!(frame = %self.frame, "Field {}.{} := {} (was {})", object, field, required, previous);
        Ok(required)
    }

    /// Assign to an array slot under permissive upgrade; returns the committed level
    pub fn write_array_slot(&self, array: ObjectId, index: usize, operand: L) -> FlowResult<L> {
        let required = operand.join(self.pc.global_pc());
        let mut heap = self.heap.lock();
        if self.config.auto_register_heap {
            heap.register_array_slot(array, index);
        }
        let previous = heap.set_array_slot(array, index, required)?;
        trace!(frame = %self.frame, "Array slot {}[{}] := {} (was {})", array, index, required, previous);
        Ok(required)
    }

    /// Explicitly label a field, bypassing flow checks
    pub fn assert_field_level(&self, object: ObjectId, field: &str, level: L) -> FlowResult<()> {
        let mut heap = self.heap.lock();
        if self.config.auto_register_heap {
            heap.register_field(object, field);
        }
        heap.set_field(object, field, level)?;
        debug!(frame = %self.frame, "Field {}.{} labelled {}", object, field, level);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Control flow
    // ---------------------------------------------------------------------

    /// Enter a branch whose condition reads operands at `condition`; returns
    /// the new global PC
    pub fn enter_branch<I>(&mut self, tag: impl Into<ScopeTag>, condition: I) -> FlowResult<L>
    where
        I: IntoIterator<Item = L>,
    {
        let tag = tag.into();
        let level = L::join_all(condition).join(self.pc.global_pc());
        let global = self.pc.push(level, tag.clone())?;
        debug!(frame = %self.frame, "Entered scope '{}' at {} (depth {})", tag, level, self.pc.depth());
        Ok(global)
    }

    /// Enter a branch whose condition reads the named locals
    pub fn enter_branch_on_locals(&mut self, tag: impl Into<ScopeTag>, locals: &[&str]) -> FlowResult<L> {
        let levels = locals.iter().map(|name| self.read_local(name)).collect::<FlowResult<Vec<L>>>()?;
        self.enter_branch(tag, levels)
    }

    /// Leave the innermost branch; returns the restored global PC
    pub fn exit_branch(&mut self, tag: impl Into<ScopeTag>) -> FlowResult<L> {
        let tag = tag.into();
        match self.pc.pop(&tag) {
            Ok(global) => {
                debug!(frame = %self.frame, "Exited scope '{}', pc back to {}", tag, global);
                Ok(global)
            }
            Err(err) => {
                increment_counter!("flowmon_scope_mismatches_total");
                Err(err)
            }
        }
    }

    pub fn local_pc(&self) -> L {
        self.pc.local_pc()
    }

    pub fn global_pc(&self) -> L {
        self.pc.global_pc()
    }

    // ---------------------------------------------------------------------
    // Sinks
    // ---------------------------------------------------------------------

    /// Reject a local that is at top before it reaches a public output
    pub fn check_not_top(&self, name: &str) -> FlowResult<()> {
        let level = self.locals.level_of(name)?;
        if level.is_top() {
            return Err(self.illegal_flow(
                SlotRef::local(name),
                ViolationReason::SinkExceeded {
                    level: level.to_string(),
                    bound: "below top".to_string(),
                },
            ));
        }
        Ok(())
    }

    /// Reject a local whose level does not flow to `sink`
    pub fn check_flows_to(&self, name: &str, sink: L) -> FlowResult<()> {
        let level = self.locals.level_of(name)?;
        if !level.leq(sink) {
            return Err(self.illegal_flow(
                SlotRef::local(name),
                ViolationReason::SinkExceeded {
                    level: level.to_string(),
                    bound: sink.to_string(),
                },
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------------

    /// Open a callee frame sharing this session's heap and configuration.
    /// Arguments and the callee's PC are raised to this frame's global PC.
    pub fn call<I>(&self, frame: impl Into<String>, arguments: I) -> MonitorSession<L>
    where
        I: IntoIterator<Item = L>,
    {
        let pc = self.pc.global_pc();
        let arguments = arguments.into_iter().map(|level| level.join(pc)).collect();
        Self::open(frame.into(), self.heap.clone(), self.config.clone(), pc, arguments)
    }

    /// Bind the argument at `position` to a fresh local `name`
    pub fn assign_argument(&mut self, position: usize, name: &str) -> FlowResult<L> {
        let level = *self.arguments.get(position).ok_or(FlowError::MissingArgument {
            position,
            available: self.arguments.len(),
        })?;
        self.declare_local(name);
        self.locals.set(name, level)?;
        debug!(frame = %self.frame, "Argument {} bound to '{}' at {}", position, name, level);
        Ok(level)
    }

    /// Return the value of a local
    pub fn return_local(&mut self, name: &str) -> FlowResult<L> {
        let level = self.locals.level_of(name)?.join(self.pc.global_pc());
        self.return_level = Some(level);
        Ok(level)
    }

    /// Return a constant; its level is the PC at the return point
    pub fn return_constant(&mut self) -> L {
        let level = self.pc.global_pc();
        self.return_level = Some(level);
        level
    }

    pub fn return_level(&self) -> Option<L> {
        self.return_level
    }

    /// Fail with `UnbalancedFrame` if scopes are still open and the
    /// configuration requires balanced frames
    pub fn check_balanced(&self) -> FlowResult<()> {
        if self.config.require_balanced_close && !self.pc.is_empty() {
            return Err(FlowError::UnbalancedFrame { frame: self.frame.clone(), open: self.pc.depth() });
        }
        Ok(())
    }

    /// End the frame and hand back its return level, if any
    pub fn close(self) -> FlowResult<Option<L>> {
        self.check_balanced()?;
        debug!("Closing frame '{}' ({} local(s))", self.frame, self.locals.len());
        Ok(self.return_level)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn locals(&self) -> &LocalTable<L> {
        &self.locals
    }

    pub fn heap(&self) -> &SharedHeap<L> {
        &self.heap
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn arguments(&self) -> &[L] {
        &self.arguments
    }

    /// Number of open branch scopes
    pub fn scope_depth(&self) -> usize {
        self.pc.depth()
    }

    fn illegal_flow(&self, target: SlotRef, reason: ViolationReason) -> FlowError {
        warn!(frame = %self.frame, "Illegal flow to {}: {}", target, reason);
        increment_counter!("flowmon_illegal_flows_total");
        FlowError::IllegalFlow { target, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::{ThreeLevel, TwoLevel};

    fn session() -> MonitorSession<TwoLevel> {
        MonitorSession::new(SharedHeap::new())
    }

    #[test]
    fn test_write_outside_branches_follows_operand() {
        let mut hs = session();
        hs.declare_local("int_x");

        assert_eq!(hs.write_local("int_x", TwoLevel::High).unwrap(), TwoLevel::High);
        // Flow-sensitive: a public write lowers it again
        assert_eq!(hs.write_local("int_x", TwoLevel::Low).unwrap(), TwoLevel::Low);
    }

    #[test]
    fn test_nsu_rejects_upgrade_of_pre_existing_local() {
        let mut hs = session();
        hs.declare_local("y");
        hs.declare_local("secret");
        hs.assert_local_level("secret", TwoLevel::High).unwrap();

        hs.enter_branch_on_locals("if_0", &["secret"]).unwrap();
        let result = hs.write_local("y", TwoLevel::Low);

        assert!(matches!(result, Err(FlowError::IllegalFlow { target: SlotRef::Local(ref name), .. }) if name == "y"));
        // The rejected write is not committed
        assert_eq!(hs.read_local("y").unwrap(), TwoLevel::Low);
    }

    #[test]
    fn test_nsu_allows_local_declared_inside_branch() {
        let mut hs = session();
        hs.enter_branch("if_0", [TwoLevel::High]).unwrap();
        hs.declare_local("tmp");

        assert_eq!(hs.write_local("tmp", TwoLevel::Low).unwrap(), TwoLevel::High);
        hs.exit_branch("if_0").unwrap();
    }

    #[test]
    fn test_nsu_allows_write_to_already_high_local() {
        let mut hs = session();
        hs.declare_local("y");
        hs.write_local("y", TwoLevel::High).unwrap();

        hs.enter_branch("if_0", [TwoLevel::High]).unwrap();
        assert_eq!(hs.write_local("y", TwoLevel::Low).unwrap(), TwoLevel::High);
    }

    #[test]
    fn test_low_branch_does_not_block_writes() {
        let mut hs = session();
        hs.declare_local("y");
        hs.enter_branch("if_0", [TwoLevel::Low]).unwrap();
        assert_eq!(hs.write_local("y", TwoLevel::High).unwrap(), TwoLevel::High);
        hs.exit_branch("if_0").unwrap();
    }

    #[test]
    fn test_medium_branch_in_three_level_lattice() {
        let mut hs: MonitorSession<ThreeLevel> = MonitorSession::new(SharedHeap::new());
        hs.declare_local("a");
        hs.declare_local("b");
        hs.write_local("b", ThreeLevel::High).unwrap();

        hs.enter_branch("if_m", [ThreeLevel::Medium]).unwrap();
        // b is already above the pc, so it can take a medium value
        assert_eq!(hs.write_local("b", ThreeLevel::Low).unwrap(), ThreeLevel::Medium);
        // a is below the pc and pre-existing
        assert!(hs.write_local("a", ThreeLevel::Low).unwrap_err().is_violation());
    }

    #[test]
    fn test_unknown_local_write() {
        let mut hs = session();
        assert_eq!(hs.write_local("ghost", TwoLevel::Low), Err(FlowError::UnknownSlot(SlotRef::local("ghost"))));
        assert!(hs.check_not_top("ghost").unwrap_err().is_internal());
    }

    #[test]
    fn test_field_write_requires_registration_when_strict() {
        let hs: MonitorSession<TwoLevel> = MonitorSession::with_config(SharedHeap::new(), MonitorConfig::strict());
        let obj = ObjectId::from_raw(1);

        assert!(matches!(hs.write_field(obj, "f", TwoLevel::Low), Err(FlowError::UnknownSlot(_))));
        assert!(matches!(hs.write_array_slot(obj, 0, TwoLevel::Low), Err(FlowError::UnknownSlot(_))));

        hs.register_object_field(obj, "f");
        assert_eq!(hs.write_field(obj, "f", TwoLevel::High).unwrap(), TwoLevel::High);
    }

    #[test]
    fn test_check_flows_to() {
        let mut hs: MonitorSession<ThreeLevel> = MonitorSession::new(SharedHeap::new());
        hs.declare_local("m");
        hs.assert_local_level("m", ThreeLevel::Medium).unwrap();

        assert!(hs.check_flows_to("m", ThreeLevel::Medium).is_ok());
        assert!(hs.check_flows_to("m", ThreeLevel::Low).unwrap_err().is_violation());
        assert!(hs.check_not_top("m").is_ok());
    }

    #[test]
    fn test_close_rejects_open_scopes() {
        let mut hs = session().named("f");
        hs.enter_branch("loop_1", [TwoLevel::Low]).unwrap();

        assert_eq!(hs.close(), Err(FlowError::UnbalancedFrame { frame: "f".to_string(), open: 1 }));
    }

    #[test]
    fn test_check_balanced() {
        let mut hs = session();
        assert!(hs.check_balanced().is_ok());

        hs.enter_branch("if_0", [TwoLevel::Low]).unwrap();
        assert_eq!(hs.check_balanced(), Err(FlowError::UnbalancedFrame { frame: ROOT_FRAME.to_string(), open: 1 }));

        hs.exit_branch("if_0").unwrap();
        assert!(hs.check_balanced().is_ok());
    }

    #[test]
    fn test_close_lenient() {
        let config = MonitorConfig { require_balanced_close: false, ..MonitorConfig::default() };
        let mut hs: MonitorSession<TwoLevel> = MonitorSession::with_config(SharedHeap::new(), config);
        hs.enter_branch("loop_1", [TwoLevel::Low]).unwrap();
        assert_eq!(hs.close(), Ok(None));
    }

    #[test]
    fn test_missing_argument() {
        let caller = session();
        let mut callee = caller.call("f", [TwoLevel::Low]);

        assert_eq!(callee.assign_argument(1, "b"), Err(FlowError::MissingArgument { position: 1, available: 1 }));
        assert_eq!(callee.assign_argument(0, "a").unwrap(), TwoLevel::Low);
        assert_eq!(callee.frame(), "f");
        assert_eq!(callee.arguments(), &[TwoLevel::Low]);
    }
}

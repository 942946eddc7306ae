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

//! Trace Replay
//!
//! A trace is the sequence of monitor calls an instrumented program would make,
//! each tagged with the frame that makes it. The [`Replayer`] drives one
//! [`MonitorSession`] per frame over a single shared heap and collects the
//! illegal flows it finds.
//!
//! ```json
//! {
//!   "description": "implicit flow through a secret branch",
//!   "steps": [
//!     { "frame": "main", "op": { "kind": "declare_local", "name": "y" } },
//!     { "frame": "main", "op": { "kind": "declare_local", "name": "secret" } },
//!     { "frame": "main", "op": { "kind": "assert_local_level", "name": "secret", "level": "HIGH" } },
//!     { "frame": "main", "op": { "kind": "enter_branch", "tag": "if_0", "condition": [{ "kind": "local", "name": "secret" }] } },
//!     { "frame": "main", "op": { "kind": "write_local", "name": "y", "operands": [{ "kind": "constant" }] } },
//!     { "frame": "main", "op": { "kind": "exit_branch", "tag": "if_0" } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::MonitorConfig;
use crate::errors::{FlowError, FlowResult};
use crate::label_store::{ObjectId, SharedHeap};
use crate::lattice::Lattice;
use crate::monitor::MonitorSession;
use crate::pc_stack::ScopeTag;

/// One value read by an expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand<L> {
    Local { name: String },
    Field { object: ObjectId, field: String },
    ArraySlot { array: ObjectId, index: usize },
    /// A literal, always at bottom
    Constant,
    /// A value of known level, e.g. the result of an unmonitored call
    Level { level: L },
}

/// A single monitor call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", bound(deserialize = "L: Deserialize<'de>"))]
pub enum MonitorOp<L> {
    DeclareLocal {
        name: String,
    },
    WriteLocal {
        name: String,
        #[serde(default)]
        operands: Vec<Operand<L>>,
    },
    WriteField {
        object: ObjectId,
        field: String,
        #[serde(default)]
        operands: Vec<Operand<L>>,
    },
    WriteArraySlot {
        array: ObjectId,
        index: usize,
        #[serde(default)]
        operands: Vec<Operand<L>>,
    },
    EnterBranch {
        tag: ScopeTag,
        #[serde(default)]
        condition: Vec<Operand<L>>,
    },
    ExitBranch {
        tag: ScopeTag,
    },
    CheckNotTop {
        name: String,
    },
    CheckFlowsTo {
        name: String,
        sink: L,
    },
    RegisterObject {
        object: ObjectId,
    },
    RegisterObjectField {
        object: ObjectId,
        field: String,
    },
    RegisterArray {
        array: ObjectId,
        length: usize,
    },
    AssertLocalLevel {
        name: String,
        level: L,
    },
    AssertFieldLevel {
        object: ObjectId,
        field: String,
        level: L,
    },
    /// Open frame `callee`; each argument is a single operand of the caller
    Call {
        callee: String,
        #[serde(default)]
        arguments: Vec<Operand<L>>,
    },
    AssignArgument {
        position: usize,
        name: String,
    },
    ReturnLocal {
        name: String,
    },
    ReturnConstant,
    Close,
    /// Write the return level of a closed callee to a local of this frame
    AssignReturn {
        callee: String,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep<L> {
    pub frame: String,
    pub op: MonitorOp<L>,
}

/// Recorded run of an instrumented program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace<L> {
    #[serde(default)]
    pub description: String,
    pub steps: Vec<TraceStep<L>>,
}

impl<L: DeserializeOwned> Trace<L> {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// An illegal flow found during replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Zero-based index of the offending step
    pub step: usize,
    pub frame: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub steps_executed: usize,
    pub violations: Vec<Violation>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Faults that abort a replay
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    #[error("Step {step}: frame '{frame}' is already open")]
    FrameInUse { step: usize, frame: String },

    #[error("Step {step}: frame '{frame}' has not returned")]
    NoReturn { step: usize, frame: String },

    #[error("Step {step}: frame '{frame}' is already closed")]
    FrameClosed { step: usize, frame: String },

    #[error("Step {step} in frame '{frame}': {source}")]
    Monitor {
        step: usize,
        frame: String,
        source: FlowError,
    },
}

pub type ReplayResult<T> = Result<T, ReplayError>;

/// Replays traces against live monitor sessions
#[derive(Debug)]
pub struct Replayer<L: Lattice> {
    heap: SharedHeap<L>,
    config: MonitorConfig,
    keep_going: bool,
    frames: HashMap<String, MonitorSession<L>>,
    /// Every frame opened during the current run, open or closed
    seen: HashSet<String>,
    /// Return levels of closed frames
    returns: HashMap<String, Option<L>>,
}

impl<L: Lattice> Replayer<L> {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            heap: crate::init(),
            config,
            keep_going: false,
            frames: HashMap::new(),
            seen: HashSet::new(),
            returns: HashMap::new(),
        }
    }

    /// Drop all frames and clear the heap so the next run starts fresh
    pub fn reset(&mut self) {
        self.frames.clear();
        self.seen.clear();
        self.returns.clear();
        self.heap.reset();
    }

    /// Continue after an illegal flow instead of stopping at the first one
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn heap(&self) -> &SharedHeap<L> {
        &self.heap
    }

    /// Frames opened and not yet closed, sorted
    pub fn open_frames(&self) -> Vec<&str> {
        let mut frames: Vec<&str> = self.frames.keys().map(String::as_str).collect();
        frames.sort_unstable();
        frames
    }

    /// Replay `trace` as an independent run. State left by a previous run is
    /// discarded first; the final state stays inspectable until the next run.
    #[instrument(skip_all, fields(steps = trace.steps.len()))]
    pub fn run(&mut self, trace: &Trace<L>) -> ReplayResult<ReplayReport> {
        self.reset();
        let mut report = ReplayReport::default();

        for (index, step) in trace.steps.iter().enumerate() {
            report.steps_executed += 1;
            match self.apply(index, step) {
                Ok(()) => {}
                Err(ReplayError::Monitor { step, frame, source }) if source.is_violation() => {
                    report.violations.push(Violation { step, frame, message: source.to_string() });
                    if !self.keep_going {
                        break;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        info!("Replay finished: {} step(s), {} violation(s)", report.steps_executed, report.violations.len());
        Ok(report)
    }

    /// Open session of `frame`. A frame never seen in this run is opened as a
    /// root frame; a frame that was opened and has closed is rejected.
    fn session(&mut self, index: usize, frame: &str) -> ReplayResult<&mut MonitorSession<L>> {
        if !self.frames.contains_key(frame) {
            if self.seen.contains(frame) {
                return Err(ReplayError::FrameClosed { step: index, frame: frame.to_string() });
            }
            debug!("Step {}: opening root frame '{}'", index, frame);
            let session = MonitorSession::with_config(self.heap.clone(), self.config.clone()).named(frame);
            self.seen.insert(frame.to_string());
            self.frames.insert(frame.to_string(), session);
        }
        match self.frames.get_mut(frame) {
            Some(session) => Ok(session),
            None => Err(ReplayError::FrameClosed { step: index, frame: frame.to_string() }),
        }
    }

    fn apply(&mut self, index: usize, step: &TraceStep<L>) -> ReplayResult<()> {
        let frame = step.frame.as_str();
        let monitor = |source: FlowError| ReplayError::Monitor {
            step: index,
            frame: frame.to_string(),
            source,
        };

        match &step.op {
            MonitorOp::Call { callee, arguments } => {
                if self.frames.contains_key(callee) {
                    return Err(ReplayError::FrameInUse { step: index, frame: callee.clone() });
                }
                let caller = self.session(index, frame)?;
                let levels = fold_each(caller, arguments).map_err(monitor)?;
                let session = caller.call(callee.as_str(), levels);
                debug!("Step {}: '{}' calls '{}'", index, frame, callee);
                self.returns.remove(callee);
                self.seen.insert(callee.clone());
                self.frames.insert(callee.clone(), session);
                Ok(())
            }
            MonitorOp::Close => {
                // A failed close leaves the frame open so later steps see it
                self.session(index, frame)?.check_balanced().map_err(monitor)?;
                if let Some(session) = self.frames.remove(frame) {
                    let level = session.close().map_err(monitor)?;
                    self.returns.insert(frame.to_string(), level);
                }
                Ok(())
            }
            MonitorOp::AssignReturn { callee, name } => {
                let level = self
                    .returns
                    .get(callee)
                    .copied()
                    .ok_or_else(|| ReplayError::NoReturn { step: index, frame: callee.clone() })?;
                // A callee that returned nothing contributes bottom
                let level = level.unwrap_or_else(L::bottom);
                self.session(index, frame)?.write_local(name, level).map_err(monitor)?;
                Ok(())
            }
            op => apply_op(self.session(index, frame)?, op).map_err(monitor),
        }
    }
}

impl<L: Lattice> Default for Replayer<L> {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

/// Join the levels of every operand, reading them through the session
fn fold<L: Lattice>(session: &MonitorSession<L>, operands: &[Operand<L>]) -> FlowResult<L> {
    let mut level = L::bottom();
    for operand in operands {
        let read = match operand {
            Operand::Local { name } => session.read_local(name)?,
            Operand::Field { object, field } => session.read_field(*object, field)?,
            Operand::ArraySlot { array, index } => session.read_array_slot(*array, *index)?,
            Operand::Constant => L::bottom(),
            Operand::Level { level } => *level,
        };
        level = level.join(read);
    }
    Ok(level)
}

fn fold_each<L: Lattice>(session: &MonitorSession<L>, operands: &[Operand<L>]) -> FlowResult<Vec<L>> {
    operands.iter().map(|operand| fold(session, std::slice::from_ref(operand))).collect()
}

fn apply_op<L: Lattice>(session: &mut MonitorSession<L>, op: &MonitorOp<L>) -> FlowResult<()> {
    match op {
        MonitorOp::DeclareLocal { name } => session.declare_local(name),
        MonitorOp::WriteLocal { name, operands } => {
            let level = fold(session, operands)?;
            session.write_local(name, level)?;
        }
        MonitorOp::WriteField { object, field, operands } => {
            let level = fold(session, operands)?;
            session.write_field(*object, field, level)?;
        }
        MonitorOp::WriteArraySlot { array, index, operands } => {
            let level = fold(session, operands)?;
            session.write_array_slot(*array, *index, level)?;
        }
        MonitorOp::EnterBranch { tag, condition } => {
            let level = fold(session, condition)?;
            session.enter_branch(tag.clone(), [level])?;
        }
        MonitorOp::ExitBranch { tag } => {
            session.exit_branch(tag.clone())?;
        }
        MonitorOp::CheckNotTop { name } => session.check_not_top(name)?,
        MonitorOp::CheckFlowsTo { name, sink } => session.check_flows_to(name, *sink)?,
        MonitorOp::RegisterObject { object } => session.register_object(*object),
        MonitorOp::RegisterObjectField { object, field } => session.register_object_field(*object, field),
        MonitorOp::RegisterArray { array, length } => session.register_array(*array, *length),
        MonitorOp::AssertLocalLevel { name, level } => session.assert_local_level(name, *level)?,
        MonitorOp::AssertFieldLevel { object, field, level } => session.assert_field_level(*object, field, *level)?,
        MonitorOp::AssignArgument { position, name } => {
            session.assign_argument(*position, name)?;
        }
        MonitorOp::ReturnLocal { name } => {
            session.return_local(name)?;
        }
        MonitorOp::ReturnConstant => {
            session.return_constant();
        }
        // Dispatched by `Replayer::apply`, which owns the frame map
        MonitorOp::Call { .. } | MonitorOp::Close | MonitorOp::AssignReturn { .. } => {}
    }
    Ok(())
}

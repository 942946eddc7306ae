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

//! End-to-end monitor scenarios
//!
//! Each test drives a session the way instrumented code would for a small
//! program, given in the comment above it.

use flowmon_core::{FlowError, MonitorConfig, MonitorSession, ObjectId, SharedHeap, SlotRef, ThreeLevel, TwoLevel};
use std::thread;

fn session() -> MonitorSession<TwoLevel> {
    MonitorSession::new(flowmon_core::init())
}

// int x = secret; if (x) { int y = 1; } else { int y = 2; }
#[test]
fn test_if_statement_with_locals_declared_inside() {
    let mut hs = session();
    hs.declare_local("secret");
    hs.declare_local("x");
    hs.assert_local_level("secret", TwoLevel::High).unwrap();

    let secret = hs.read_local("secret").unwrap();
    hs.write_local("x", secret).unwrap();
    assert_eq!(hs.read_local("x").unwrap(), TwoLevel::High);

    assert_eq!(hs.enter_branch_on_locals("if_1", &["x"]).unwrap(), TwoLevel::High);
    hs.declare_local("y");
    assert_eq!(hs.write_local("y", TwoLevel::Low).unwrap(), TwoLevel::High);
    assert_eq!(hs.local_pc(), TwoLevel::High);
    assert_eq!(hs.exit_branch("if_1").unwrap(), TwoLevel::Low);

    assert_eq!(hs.global_pc(), TwoLevel::Low);
    assert_eq!(hs.close(), Ok(None));
}

// int y = 0; if (secret) { y = 1; }
#[test]
fn test_nsu_rejects_implicit_flow() {
    let mut hs = session();
    hs.declare_local("y");
    hs.declare_local("secret");
    hs.assert_local_level("secret", TwoLevel::High).unwrap();

    hs.enter_branch("if_2", [hs.read_local("secret").unwrap()]).unwrap();
    let err = hs.write_local("y", TwoLevel::Low).unwrap_err();

    assert!(err.is_violation());
    assert!(matches!(err, FlowError::IllegalFlow { target: SlotRef::Local(ref name), .. } if name == "y"));
    assert_eq!(hs.read_local("y").unwrap(), TwoLevel::Low);
}

// Nested branches: the outer secret condition taints writes in the inner public branch
#[test]
fn test_nested_branches_keep_outer_pc() {
    let mut hs = session();
    hs.declare_local("y");

    hs.enter_branch("outer", [TwoLevel::High]).unwrap();
    hs.enter_branch("inner", [TwoLevel::Low]).unwrap();
    // The inner entry is pushed at join(condition, globalPC)
    assert_eq!(hs.local_pc(), TwoLevel::High);
    assert_eq!(hs.global_pc(), TwoLevel::High);
    assert!(hs.write_local("y", TwoLevel::Low).unwrap_err().is_violation());

    assert_eq!(hs.exit_branch("inner").unwrap(), TwoLevel::High);
    assert_eq!(hs.exit_branch("outer").unwrap(), TwoLevel::Low);
    assert_eq!(hs.write_local("y", TwoLevel::Low).unwrap(), TwoLevel::Low);
}

// Loops reuse the same scope tag on every iteration
#[test]
fn test_loop_iterations_reuse_tag() {
    let mut hs = session();
    hs.declare_local("i");
    for _ in 0..3 {
        hs.enter_branch_on_locals("while_3", &["i"]).unwrap();
        hs.write_local("i", TwoLevel::Low).unwrap();
        hs.exit_branch("while_3").unwrap();
    }
    assert_eq!(hs.scope_depth(), 0);
}

#[test]
fn test_scope_mismatch_on_wrong_tag() {
    let mut hs = session();
    hs.enter_branch("if_a", [TwoLevel::Low]).unwrap();

    let err = hs.exit_branch("if_b").unwrap_err();
    assert!(err.is_internal());
    assert_eq!(err, FlowError::ScopeMismatch { expected: Some("if_a".into()), found: "if_b".into() });
    assert_eq!(hs.scope_depth(), 1);
}

#[test]
fn test_scope_overflow_at_configured_depth() {
    let config = MonitorConfig { max_scope_depth: Some(4), ..MonitorConfig::default() };
    let mut hs: MonitorSession<TwoLevel> = MonitorSession::with_config(flowmon_core::init(), config);

    for site in 0..4u32 {
        hs.enter_branch(site, [TwoLevel::Low]).unwrap();
    }
    assert_eq!(hs.enter_branch(4u32, [TwoLevel::Low]), Err(FlowError::ScopeOverflow { limit: 4 }));
}

// int[] a = new int[3]; if (secret) { a[2] = 1; }
#[test]
fn test_arrays() {
    let mut hs = session();
    let arr = ObjectId::from_raw(100);
    hs.register_array(arr, 3);

    for i in 0..3 {
        assert_eq!(hs.read_array_slot(arr, i).unwrap(), TwoLevel::Low);
    }
    assert!(matches!(hs.read_array_slot(arr, 3), Err(FlowError::UnknownSlot(SlotRef::ArraySlot { .. }))));

    hs.enter_branch("if_4", [TwoLevel::High]).unwrap();
    assert_eq!(hs.write_array_slot(arr, 2, TwoLevel::Low).unwrap(), TwoLevel::High);
    hs.exit_branch("if_4").unwrap();

    assert_eq!(hs.read_array_slot(arr, 2).unwrap(), TwoLevel::High);
    assert_eq!(hs.read_array_slot(arr, 1).unwrap(), TwoLevel::Low);

    // Registering again is a no-op for existing slots
    hs.register_array(arr, 3);
    assert_eq!(hs.read_array_slot(arr, 2).unwrap(), TwoLevel::High);
    assert_eq!(hs.heap().lock().size_of(arr).unwrap(), 3);
}

// obj.f = 1; if (secret) { obj.f = 2; }
#[test]
fn test_fields_permissive_upgrade() {
    let mut hs = session();
    let obj = hs.new_object();
    hs.register_object_field(obj, "int_field");

    assert_eq!(hs.write_field(obj, "int_field", TwoLevel::Low).unwrap(), TwoLevel::Low);
    assert_eq!(hs.read_field(obj, "int_field").unwrap(), TwoLevel::Low);

    hs.enter_branch("if_5", [TwoLevel::High]).unwrap();
    assert_eq!(hs.write_field(obj, "int_field", TwoLevel::Low).unwrap(), TwoLevel::High);
    hs.exit_branch("if_5").unwrap();

    assert_eq!(hs.read_field(obj, "int_field").unwrap(), TwoLevel::High);
}

#[test]
fn test_fields_are_per_object() {
    let hs = session();
    let first = hs.new_object();
    let second = hs.new_object();
    assert_ne!(first, second);

    hs.write_field(first, "f", TwoLevel::High).unwrap();
    hs.write_field(second, "f", TwoLevel::Low).unwrap();

    assert_eq!(hs.read_field(first, "f").unwrap(), TwoLevel::High);
    assert_eq!(hs.read_field(second, "f").unwrap(), TwoLevel::Low);
    assert!(hs.read_field(first, "g").is_err());
}

#[test]
fn test_assert_field_level() {
    let hs = session();
    let obj = ObjectId::from_raw(9);
    hs.register_object(obj);
    hs.assert_field_level(obj, "secret", TwoLevel::High).unwrap();
    assert_eq!(hs.read_field(obj, "secret").unwrap(), TwoLevel::High);

    // Declassification lowers it again
    hs.assert_field_level(obj, "secret", TwoLevel::Low).unwrap();
    assert_eq!(hs.read_field(obj, "secret").unwrap(), TwoLevel::Low);
}

// System.out.println(x) with x labelled HIGH
#[test]
fn test_check_not_high() {
    let mut hs = session();
    hs.declare_local("low");
    hs.declare_local("high");
    hs.assert_local_level("high", TwoLevel::High).unwrap();

    assert!(hs.check_not_top("low").is_ok());
    let err = hs.check_not_top("high").unwrap_err();
    assert!(err.is_violation());
    assert_eq!(err.to_string(), "Illegal flow to local 'high': level HIGH exceeds sink bound below top");
}

#[test]
fn test_three_level_sinks() {
    let mut hs: MonitorSession<ThreeLevel> = MonitorSession::new(flowmon_core::init());
    hs.declare_local("m");
    hs.assert_local_level("m", ThreeLevel::Medium).unwrap();

    assert!(hs.check_not_top("m").is_ok());
    assert!(hs.check_flows_to("m", ThreeLevel::Medium).is_ok());
    assert!(hs.check_flows_to("m", ThreeLevel::Low).is_err());
}

// int f(int a) { return a; }  ...  if (secret) { r = f(1); }
#[test]
fn test_callee_inherits_caller_pc() {
    let mut caller = session();
    caller.declare_local("r");
    caller.declare_local("arg");

    caller.enter_branch("if_6", [TwoLevel::High]).unwrap();
    let mut callee = caller.call("f", [caller.read_local("arg").unwrap()]);

    assert_eq!(callee.global_pc(), TwoLevel::High);
    assert_eq!(callee.assign_argument(0, "a").unwrap(), TwoLevel::High);
    assert_eq!(callee.return_local("a").unwrap(), TwoLevel::High);

    // The callee cannot write to the shared heap below the caller's pc
    let obj = ObjectId::from_raw(1);
    assert_eq!(callee.write_field(obj, "f", TwoLevel::Low).unwrap(), TwoLevel::High);
    assert_eq!(caller.read_field(obj, "f").unwrap(), TwoLevel::High);

    let returned = callee.close().unwrap().unwrap();
    // r existed before the secret branch
    assert!(caller.write_local("r", returned).unwrap_err().is_violation());
    caller.exit_branch("if_6").unwrap();
}

#[test]
fn test_return_constant_under_public_pc() {
    let caller = session();
    let mut callee = caller.call("g", Vec::new());

    assert!(callee.arguments().is_empty());
    assert_eq!(callee.return_constant(), TwoLevel::Low);
    assert_eq!(callee.close(), Ok(Some(TwoLevel::Low)));
}

#[test]
fn test_unbalanced_close() {
    let mut hs = session().named("loop_body");
    hs.enter_branch("for_7", [TwoLevel::Low]).unwrap();

    assert_eq!(hs.close(), Err(FlowError::UnbalancedFrame { frame: "loop_body".into(), open: 1 }));
}

#[test]
fn test_concurrent_sessions_share_heap() {
    let heap: SharedHeap<TwoLevel> = flowmon_core::init();
    let array = MonitorSession::new(heap.clone()).new_array(64);

    let handles: Vec<_> = (0..4usize)
        .map(|worker| {
            let heap = heap.clone();
            thread::spawn(move || {
                let mut hs = MonitorSession::new(heap).named(format!("worker_{}", worker));
                let pc = if worker % 2 == 0 { TwoLevel::High } else { TwoLevel::Low };
                hs.enter_branch("if_w", [pc]).unwrap();
                for index in (worker..64).step_by(4) {
                    hs.write_array_slot(array, index, TwoLevel::Low).unwrap();
                }
                hs.exit_branch("if_w").unwrap();
                hs.close().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let table = heap.lock();
    for index in 0..64 {
        let expected = if (index % 4) % 2 == 0 { TwoLevel::High } else { TwoLevel::Low };
        assert_eq!(table.level_of_array_slot(array, index).unwrap(), expected);
    }
}

#[test]
fn test_reset_clears_heap_between_runs() {
    let heap: SharedHeap<TwoLevel> = flowmon_core::init();
    let hs = MonitorSession::new(heap.clone());
    let obj = hs.new_object();
    hs.write_field(obj, "f", TwoLevel::High).unwrap();

    heap.reset();
    assert!(hs.read_field(obj, "f").is_err());
    assert_eq!(heap.lock().record_count(), 0);
}

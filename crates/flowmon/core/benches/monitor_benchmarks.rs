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

//! Monitor hot-path benchmarks
//!
//! Every instrumented assignment and branch of the analyzed program goes
//! through these operations, so they bound the monitor's overhead.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use flowmon_core::{MonitorSession, ObjectId, ThreeLevel, TwoLevel};

fn bench_local_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_writes");
    group.throughput(Throughput::Elements(1));

    let mut session = MonitorSession::new(flowmon_core::init());
    session.declare_local("x");
    group.bench_function("write_local_low_pc", |b| b.iter(|| session.write_local(black_box("x"), black_box(TwoLevel::High)).unwrap()));

    let mut session = MonitorSession::new(flowmon_core::init());
    session.enter_branch("if_0", [TwoLevel::High]).unwrap();
    session.declare_local("y");
    group.bench_function("write_local_high_pc", |b| b.iter(|| session.write_local(black_box("y"), black_box(TwoLevel::Low)).unwrap()));

    group.finish();
}

fn bench_branch_nesting(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_nesting");

    for depth in [1usize, 8, 64] {
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut session = MonitorSession::new(flowmon_core::init());
            b.iter(|| {
                for site in 0..depth as u32 {
                    session.enter_branch(site, [ThreeLevel::Medium]).unwrap();
                }
                for site in (0..depth as u32).rev() {
                    session.exit_branch(site).unwrap();
                }
            })
        });
    }

    group.finish();
}

fn bench_heap_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_writes");
    group.throughput(Throughput::Elements(1));

    let session = MonitorSession::new(flowmon_core::init());
    let object = ObjectId::from_raw(1);
    session.register_object_field(object, "f");
    group.bench_function("write_field", |b| b.iter(|| session.write_field(black_box(object), black_box("f"), black_box(TwoLevel::High)).unwrap()));

    let array = session.new_array(1024);
    group.bench_function("write_array_slot", |b| b.iter(|| session.write_array_slot(black_box(array), black_box(512), black_box(TwoLevel::Low)).unwrap()));

    group.finish();
}

criterion_group!(monitor_benches, bench_local_writes, bench_branch_nesting, bench_heap_writes);
criterion_main!(monitor_benches);

//! Machine store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;
use tickfsm_core::{Condition, Machine, Transition};
use tickfsm_storage::MachineStore;

fn machine() -> Machine {
    let mut machine = Machine::builder()
        .states(["ALIVE", "ASLEEP", "AWAKE", "HUNGRY"])
        .initial("ALIVE")
        .initial("ASLEEP")
        .attribute("hunger", 0)
        .attribute("sleepiness", 100)
        .build()
        .unwrap();
    let asleep = machine.state_id("ASLEEP").unwrap();
    let awake = machine.state_id("AWAKE").unwrap();
    machine
        .add_transition(Transition::between(asleep, awake).when(Condition::new(["{sleepiness} <= 0"])))
        .unwrap();
    machine
        .add_tick(asleep, "<sleepiness> = {sleepiness} - 15", 1)
        .unwrap();
    machine
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine_store");
    let dir = TempDir::new().unwrap();
    let store = MachineStore::open(dir.path()).unwrap();
    let machine = machine();

    group.bench_function("save", |b| {
        b.iter(|| black_box(store.save(&machine, "bench").unwrap()))
    });

    store.save(&machine, "bench").unwrap();
    group.bench_function("load", |b| {
        b.iter(|| black_box(store.load("bench").unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_store);
criterion_main!(benches);

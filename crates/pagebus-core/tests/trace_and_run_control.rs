//! Access tracing and run-loop control coverage.

use std::time::Duration;

use bitflags as _;
use pagebus_core::{
    run_until_stopped, AccessFlags, AccessIntent, Bus, BusAccess, BusError, BusTarget,
    DeviceRegistry, FaultKind, InstructionStepper, Machine, MachineError, PagePerms, RamTarget,
    RangeMapping, RegionTag, RunControl, RunState, StepOutcome, StopReason, TraceRecord,
    TraceRing,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;
use tracing as _;

const COUNTER: u32 = 0x0010;

fn ram_bus() -> Bus {
    let mut bus = Bus::default();
    let ram = bus
        .add_target("ram", BusTarget::Ram(RamTarget::new(0x1000)))
        .expect("ram");
    bus.map_range(0x0000, 0x1000, RangeMapping::new(ram, PagePerms::RWX, RegionTag::Ram))
        .expect("map");
    bus
}

#[test]
fn ring_of_four_keeps_last_four_of_six() {
    let mut ring = TraceRing::with_capacity(4).expect("capacity");
    for cycle in 0..6 {
        ring.emit(TraceRecord {
            cycle,
            ..TraceRecord::default()
        });
    }
    let cycles: Vec<u64> = ring.iter().map(|record| record.cycle).collect();
    assert_eq!(cycles, vec![2, 3, 4, 5]);
    assert_eq!(ring.total_emitted(), 6);
    assert_eq!(
        TraceRing::with_capacity(6).map(|ring| ring.capacity()),
        Err(BusError::InvalidTraceCapacity(6))
    );
}

#[test]
fn bus_traces_each_access_including_faults() {
    let mut bus = ram_bus();
    bus.enable_trace(4).expect("trace");
    for offset in 0..6 {
        bus.write_u8(0x0100 + offset, 0xA0);
    }
    let _ = bus.try_read(&BusAccess::read(0x9000).at_cycle(77));
    let _ = bus.try_read(&BusAccess::read(0x0100).with_flags(AccessFlags::NO_TRACE));

    let ring = bus.trace().expect("ring enabled");
    let records: Vec<&TraceRecord> = ring.iter().collect();
    assert_eq!(records.len(), 4);
    let addresses: Vec<u32> = records.iter().map(|record| record.address).collect();
    assert_eq!(addresses, vec![0x0103, 0x0104, 0x0105, 0x9000]);
    assert_eq!(records[0].intent, AccessIntent::DataWrite);
    assert_eq!(records[0].value, 0xA0);
    assert_eq!(records[3].fault, Some(FaultKind::Unmapped));
    assert_eq!(records[3].cycle, 77);
    assert_eq!(records[3].region, RegionTag::Invalid);

    let ring = bus.disable_trace().expect("ring handed back");
    assert_eq!(ring.total_emitted(), 7);
    assert!(bus.trace().is_none());
}

#[derive(Debug, Default)]
struct Counter {
    halt_at: Option<u8>,
}

impl InstructionStepper for Counter {
    fn step(&mut self, bus: &mut Bus) -> StepOutcome {
        let value = bus.read_u8(COUNTER).wrapping_add(1);
        bus.write_u8(COUNTER, value);
        if self.halt_at == Some(value) {
            return StepOutcome::Halted;
        }
        if let Err(fault) = bus.try_read(&BusAccess::fetch(0x8000)) {
            if value == 0xFF {
                return StepOutcome::Fault(fault);
            }
        }
        StepOutcome::Retired { cycles: 2 }
    }
}

#[test]
fn run_loop_honours_limit_stop_and_halt() {
    let mut bus = ram_bus();
    let control = RunControl::new();
    let mut stepper = Counter::default();

    let outcome = run_until_stopped(&mut stepper, &mut bus, &control, Some(10));
    assert_eq!((outcome.steps, outcome.cycles), (10, 20));
    assert_eq!(outcome.reason, StopReason::LimitReached);
    assert_eq!(control.state(), RunState::Paused);
    assert_eq!(bus.read_u8(COUNTER), 10);

    control.request_stop();
    let outcome = run_until_stopped(&mut stepper, &mut bus, &control, None);
    assert_eq!(outcome.steps, 0);
    assert_eq!(outcome.reason, StopReason::StopRequested);
    assert!(!control.stop_requested());

    stepper.halt_at = Some(12);
    let outcome = run_until_stopped(&mut stepper, &mut bus, &control, None);
    assert_eq!(outcome.steps, 1);
    assert_eq!(outcome.reason, StopReason::Halted);
    assert_eq!(control.state(), RunState::Halted);
}

#[test]
fn fetch_fault_stops_the_loop() {
    let mut bus = ram_bus();
    bus.write_u8(COUNTER, 0xFD);
    let control = RunControl::new();
    let outcome = run_until_stopped(&mut Counter::default(), &mut bus, &control, None);
    assert_eq!(outcome.steps, 1);
    match outcome.reason {
        StopReason::Fault(fault) => assert_eq!(fault.kind, FaultKind::Unmapped),
        other => panic!("expected fetch fault, got {other:?}"),
    }
    assert_eq!(control.state(), RunState::Halted);
}

struct Ticker;

impl InstructionStepper for Ticker {
    fn step(&mut self, bus: &mut Bus) -> StepOutcome {
        let next = bus.read(COUNTER, 32).unwrap_or_default().wrapping_add(1);
        let _ = bus.write(COUNTER, 32, next);
        StepOutcome::Retired { cycles: 1 }
    }
}

fn ticks(machine: &Machine<Ticker>) -> u32 {
    machine
        .with_bus(|bus| bus.read(COUNTER, 32))
        .expect("bus lock")
        .expect("valid width")
}

#[test]
fn machine_pauses_resumes_and_halts_on_a_worker_thread() {
    let mut machine = Machine::new(ram_bus(), DeviceRegistry::new(), Ticker);
    assert_eq!(machine.state(), RunState::Paused);

    machine.spawn(None).expect("spawn");
    assert_eq!(machine.spawn(None), Err(MachineError::AlreadyRunning));
    while ticks(&machine) < 3 {
        std::thread::sleep(Duration::from_millis(1));
    }
    let paused = machine.pause().expect("pause").expect("outcome");
    assert_eq!(paused.reason, StopReason::StopRequested);
    assert_eq!(machine.state(), RunState::Paused);
    assert_eq!(u64::from(ticks(&machine)), paused.steps);

    machine.resume(Some(2)).expect("resume");
    let resumed = machine.wait().expect("join").expect("outcome");
    assert_eq!(resumed.steps, 2);
    assert_eq!(resumed.reason, StopReason::LimitReached);
    assert_eq!(machine.last_outcome(), Some(resumed));
    assert_eq!(u64::from(ticks(&machine)), paused.steps + 2);

    machine.halt().expect("halt");
    assert_eq!(machine.state(), RunState::Halted);
    assert_eq!(machine.spawn(None), Err(MachineError::Halted));
    machine.reset_halt();
    assert_eq!(machine.state(), RunState::Paused);
    assert!(machine.devices().is_empty());
}

#[test]
fn machine_resumes_after_a_run_reaches_its_limit_unjoined() {
    let mut machine = Machine::new(ram_bus(), DeviceRegistry::new(), Ticker);
    machine.spawn(Some(5)).expect("spawn");
    while machine.state() == RunState::Running {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(machine.state(), RunState::Paused);

    machine.resume(Some(5)).expect("resume after limit");
    let outcome = machine.wait().expect("join").expect("outcome");
    assert_eq!(outcome.steps, 5);
    assert_eq!(outcome.reason, StopReason::LimitReached);
    assert_eq!(ticks(&machine), 10);
}

//! Cooperative run control for the instruction loop.
//!
//! The loop checks a shared stop flag once per instruction boundary, so a
//! paused machine is only ever observed between whole instructions. Pausing
//! keeps CPU and bus state; halting requires [`Machine::reset_halt`] before
//! the machine may run again.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::{Bus, BusFault, DeviceRegistry};

/// Host-visible execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum RunState {
    /// Executing instructions.
    Running = 0,
    /// Stopped between instructions; state is preserved.
    #[default]
    Paused = 1,
    /// Stopped by a halt or a machine-fatal fault; needs a reset.
    Halted = 2,
}

impl RunState {
    const fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::Running,
            2 => Self::Halted,
            _ => Self::Paused,
        }
    }
}

/// Result of one instruction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// An instruction retired.
    Retired {
        /// Cycles consumed.
        cycles: u32,
    },
    /// The CPU executed a halting instruction.
    Halted,
    /// A bus fault the CPU cannot continue past, such as a faulted fetch.
    Fault(BusFault),
}

/// Why a run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The stop flag was raised.
    StopRequested,
    /// The instruction limit was reached.
    LimitReached,
    /// The CPU halted.
    Halted,
    /// A machine-fatal bus fault.
    Fault(BusFault),
}

/// Summary of one run-loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunOutcome {
    /// Instructions retired during this call.
    pub steps: u64,
    /// Cycles consumed by retired instructions.
    pub cycles: u64,
    /// Why the loop returned.
    pub reason: StopReason,
}

/// A CPU core driving the bus one instruction at a time.
pub trait InstructionStepper {
    /// Executes exactly one instruction.
    fn step(&mut self, bus: &mut Bus) -> StepOutcome;
}

#[derive(Debug, Default)]
struct ControlShared {
    stop: AtomicBool,
    state: AtomicU8,
}

/// Cloneable handle to a stop flag and run state.
#[derive(Debug, Clone)]
pub struct RunControl {
    shared: Arc<ControlShared>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    /// Creates a paused control with the stop flag clear.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ControlShared {
                stop: AtomicBool::new(false),
                state: AtomicU8::new(RunState::Paused as u8),
            }),
        }
    }

    /// Asks the loop to stop at the next instruction boundary.
    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    /// Returns `true` while a stop is pending.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        RunState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RunState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    fn clear_stop(&self) {
        self.shared.stop.store(false, Ordering::Release);
    }
}

fn drive(
    control: &RunControl,
    limit: Option<u64>,
    mut step: impl FnMut() -> StepOutcome,
) -> RunOutcome {
    control.set_state(RunState::Running);
    let mut steps = 0_u64;
    let mut cycles = 0_u64;
    let reason = loop {
        if control.stop_requested() {
            break StopReason::StopRequested;
        }
        if limit.is_some_and(|limit| steps >= limit) {
            break StopReason::LimitReached;
        }
        match step() {
            StepOutcome::Retired { cycles: spent } => {
                steps += 1;
                cycles += u64::from(spent);
            }
            StepOutcome::Halted => break StopReason::Halted,
            StepOutcome::Fault(fault) => break StopReason::Fault(fault),
        }
    };
    control.clear_stop();
    control.set_state(match reason {
        StopReason::StopRequested | StopReason::LimitReached => RunState::Paused,
        StopReason::Halted | StopReason::Fault(_) => RunState::Halted,
    });
    tracing::debug!(steps, cycles, ?reason, "run loop stopped");
    RunOutcome {
        steps,
        cycles,
        reason,
    }
}

/// Steps until a stop request, the optional instruction `limit`, a halt or a
/// machine-fatal fault.
pub fn run_until_stopped<S: InstructionStepper + ?Sized>(
    stepper: &mut S,
    bus: &mut Bus,
    control: &RunControl,
    limit: Option<u64>,
) -> RunOutcome {
    drive(control, limit, || stepper.step(bus))
}

/// Errors raised by [`Machine`] lifecycle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MachineError {
    /// The machine is already running.
    #[error("machine is already running")]
    AlreadyRunning,
    /// The machine halted and must be reset first.
    #[error("machine is halted; reset before resuming")]
    Halted,
    /// A worker panicked while holding the bus.
    #[error("bus lock poisoned by a panicked worker")]
    BusPoisoned,
    /// The worker thread panicked and the CPU state was lost.
    #[error("run-loop worker panicked")]
    WorkerPanicked,
}

/// A bus, its device registry and a CPU, runnable on a worker thread.
///
/// The worker locks the bus once per instruction, so tooling may interleave
/// accesses through [`Machine::with_bus`] between instructions.
pub struct Machine<S> {
    bus: Arc<Mutex<Bus>>,
    devices: DeviceRegistry,
    control: RunControl,
    stepper: Option<S>,
    worker: Option<JoinHandle<(S, RunOutcome)>>,
    last_outcome: Option<RunOutcome>,
}

impl<S: InstructionStepper + Send + 'static> Machine<S> {
    /// Assembles a paused machine.
    #[must_use]
    pub fn new(bus: Bus, devices: DeviceRegistry, stepper: S) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
            devices,
            control: RunControl::new(),
            stepper: Some(stepper),
            worker: None,
            last_outcome: None,
        }
    }

    /// Device metadata.
    #[must_use]
    pub const fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    /// Run-control handle.
    #[must_use]
    pub const fn control(&self) -> &RunControl {
        &self.control
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    /// Outcome of the most recently joined run.
    #[must_use]
    pub const fn last_outcome(&self) -> Option<RunOutcome> {
        self.last_outcome
    }

    /// Runs `f` with exclusive access to the bus.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::BusPoisoned`] when a worker panicked mid-access.
    pub fn with_bus<R>(&self, f: impl FnOnce(&mut Bus) -> R) -> Result<R, MachineError> {
        let mut bus = self.bus.lock().map_err(|_| MachineError::BusPoisoned)?;
        Ok(f(&mut bus))
    }

    /// Starts the run loop on a worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::AlreadyRunning`] or [`MachineError::Halted`].
    pub fn spawn(&mut self, limit: Option<u64>) -> Result<(), MachineError> {
        // A worker that stopped on its own still holds the stepper.
        if self.worker.is_some() && self.state() != RunState::Running {
            self.wait()?;
        }
        if self.state() == RunState::Halted {
            return Err(MachineError::Halted);
        }
        let Some(mut stepper) = self.stepper.take() else {
            return Err(MachineError::AlreadyRunning);
        };
        let bus = Arc::clone(&self.bus);
        let control = self.control.clone();
        control.clear_stop();
        control.set_state(RunState::Running);
        tracing::debug!(?limit, "spawning run loop");
        self.worker = Some(std::thread::spawn(move || {
            let outcome = drive(&control, limit, || {
                let Ok(mut guard) = bus.lock() else {
                    tracing::warn!("bus lock poisoned, halting run loop");
                    return StepOutcome::Halted;
                };
                stepper.step(&mut guard)
            });
            (stepper, outcome)
        }));
        Ok(())
    }

    /// Resumes a paused machine. Same as [`Self::spawn`].
    ///
    /// # Errors
    ///
    /// As [`Self::spawn`].
    pub fn resume(&mut self, limit: Option<u64>) -> Result<(), MachineError> {
        self.spawn(limit)
    }

    /// Waits for the current run to finish on its own.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::WorkerPanicked`] when the worker panicked.
    pub fn wait(&mut self) -> Result<Option<RunOutcome>, MachineError> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        let (stepper, outcome) = worker.join().map_err(|_| {
            self.control.set_state(RunState::Halted);
            MachineError::WorkerPanicked
        })?;
        self.stepper = Some(stepper);
        self.last_outcome = Some(outcome);
        Ok(Some(outcome))
    }

    /// Stops at the next instruction boundary, keeping all state.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::WorkerPanicked`] when the worker panicked.
    pub fn pause(&mut self) -> Result<Option<RunOutcome>, MachineError> {
        if self.worker.is_none() {
            return Ok(None);
        }
        self.control.request_stop();
        self.wait()
    }

    /// Stops the machine hard; only [`Self::reset_halt`] allows running again.
    ///
    /// # Errors
    ///
    /// Returns [`MachineError::WorkerPanicked`] when the worker panicked.
    pub fn halt(&mut self) -> Result<Option<RunOutcome>, MachineError> {
        let outcome = self.pause()?;
        self.control.set_state(RunState::Halted);
        Ok(outcome)
    }

    /// Clears a halt, leaving the machine paused.
    pub fn reset_halt(&mut self) {
        if self.state() == RunState::Halted {
            self.control.clear_stop();
            self.control.set_state(RunState::Paused);
        }
    }
}

impl<S> Drop for Machine<S> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.control.request_stop();
            let _ = worker.join();
        }
    }
}

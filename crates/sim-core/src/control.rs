//! Execution cursor, run modes, and published execution states.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::instruction::InstructionId;

/// How the run loop advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum RunMode {
    /// Run until halted, stopped, or broken.
    Run = 0,
    /// Execute exactly one micro, then stop.
    StepByMicro = 1,
    /// Execute through the next `End` micro, then stop.
    StepByInstr = 2,
    /// Stop at the top of the next loop iteration.
    Stop = 3,
    /// Abort at the top of the next loop iteration.
    Abort = 4,
    /// Run to completion on the calling thread without stepping events.
    CommandLine = 5,
}

impl RunMode {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Run,
            1 => Self::StepByMicro,
            2 => Self::StepByInstr,
            4 => Self::Abort,
            5 => Self::CommandLine,
            _ => Self::Stop,
        }
    }

    /// Returns `true` for modes that publish per-cycle and per-micro states.
    #[must_use]
    pub const fn is_interactive(self) -> bool {
        !matches!(self, Self::Run | Self::CommandLine)
    }
}

/// Shared, lock-free run-mode flag.
///
/// Every clone observes the same flag. The execution thread reads it at the
/// top of each micro step.
#[derive(Debug, Clone)]
pub struct RunModeHandle(Arc<AtomicU8>);

impl RunModeHandle {
    /// Creates a flag in `mode`.
    #[must_use]
    pub fn new(mode: RunMode) -> Self {
        Self(Arc::new(AtomicU8::new(mode as u8)))
    }

    /// Current mode.
    #[must_use]
    pub fn get(&self) -> RunMode {
        RunMode::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Replaces the mode.
    pub fn set(&self, mode: RunMode) {
        self.0.store(mode as u8, Ordering::SeqCst);
    }

    /// Requests a stop at the next micro boundary.
    pub fn stop(&self) {
        self.set(RunMode::Stop);
    }

    /// Requests an abort at the next micro boundary.
    pub fn abort(&self) {
        self.set(RunMode::Abort);
    }
}

impl Default for RunModeHandle {
    fn default() -> Self {
        Self::new(RunMode::Stop)
    }
}

/// Which micro list the control unit is walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CurrentInstruction {
    /// The fetch sequence.
    #[default]
    Fetch,
    /// A decoded machine instruction.
    Instruction(InstructionId),
}

/// The execution cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlUnit {
    current: CurrentInstruction,
    micro_index: i64,
}

impl ControlUnit {
    /// Cursor at the start of the fetch sequence.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: CurrentInstruction::Fetch,
            micro_index: 0,
        }
    }

    /// Instruction being executed.
    #[must_use]
    pub const fn current(&self) -> CurrentInstruction {
        self.current
    }

    /// Index of the next micro to run. May be out of range after a branch.
    #[must_use]
    pub const fn micro_index(&self) -> i64 {
        self.micro_index
    }

    /// Switches instruction and restarts at micro 0.
    pub fn set_current(&mut self, current: CurrentInstruction) {
        self.current = current;
        self.micro_index = 0;
    }

    /// Moves the cursor within the current instruction.
    pub fn set_micro_index(&mut self, index: i64) {
        self.micro_index = index;
    }

    /// Shifts the cursor by `offset` micros.
    pub fn offset_micro_index(&mut self, offset: i64) {
        self.micro_index = self.micro_index.saturating_add(offset);
    }

    /// Returns to `(fetch sequence, 0)`.
    pub fn reset(&mut self) {
        self.set_current(CurrentInstruction::Fetch);
    }

    /// Returns `true` at the first micro of the fetch sequence.
    #[must_use]
    pub fn at_machine_cycle_start(&self) -> bool {
        self.current == CurrentInstruction::Fetch && self.micro_index == 0
    }
}

/// A point in the execution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ExecutionState {
    /// Nothing has run since construction or reset.
    #[default]
    NeverRun,
    /// A run has begun.
    StartOfExecuteThread,
    /// The fetch sequence is about to start.
    StartOfMachineCycle,
    /// A micro is about to run.
    StartOfMicroinstruction,
    /// Stopped by a halt bit, a stop request, or the end of an instruction step.
    ExecutionHalted,
    /// Stopped by an abort request.
    ExecutionAborted,
    /// A micro failed; the cursor points at it.
    ExceptionThrown,
    /// Stopped at a breakpoint before fetching from it.
    Break,
    /// Stopped after a single micro step.
    HaltedStepByMicro,
}

impl ExecutionState {
    /// Returns `true` for states that end a run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ExecutionHalted
                | Self::ExecutionAborted
                | Self::ExceptionThrown
                | Self::Break
                | Self::HaltedStepByMicro
        )
    }
}

/// A timestamped execution-state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    /// New state.
    pub state: ExecutionState,
    /// Wall-clock time of the transition.
    pub at: SystemTime,
    /// Name of the instruction under the cursor.
    pub instruction: String,
    /// Micro index under the cursor.
    pub micro_index: i64,
    /// Breakpoint address for [`ExecutionState::Break`].
    pub address: Option<u64>,
    /// Failure description for [`ExecutionState::ExceptionThrown`].
    pub message: Option<String>,
}

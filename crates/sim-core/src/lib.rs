//! Core crate of the table-driven ISA simulator.
//!
//! A machine is data: instruction fields, registers and memories, a set of
//! micro-operations, and instructions built from those micros. This crate
//! validates such a definition and runs programs against it one micro at a
//! time.

/// Two's-complement helpers for widths up to 64 bits.
pub mod bits;

/// Definition and execution errors.
pub mod error;
pub use error::{ExecutionError, ValidationError};

/// Instruction fields.
pub mod field;
pub use field::{Field, FieldType, FieldValue, Relativity};

/// Registers, register arrays, RAMs, and condition bits.
pub mod module;
pub use module::{
    ConditionBit, ConditionBitId, ModuleRef, Modules, Ram, RamId, Register, RegisterArray,
    RegisterArrayId, RegisterId,
};

/// Micro-operations and their semantics.
pub mod micro;
pub use micro::{
    ArithmeticOp, Comparison, ExecContext, IoDirection, IoKind, LogicalOp, MemoryDirection, Micro,
    MicroId, Microinstruction, ShiftDirection, ShiftKind,
};

/// Machine instructions and field correlation.
pub mod instruction;
pub use instruction::{CorrelationTag, FieldSlot, InstructionId, MachineInstruction};

/// Control unit, run modes, and execution states.
pub mod control;
pub use control::{
    ControlUnit, CurrentInstruction, ExecutionState, RunMode, RunModeHandle, StateSnapshot,
};

/// Named I/O channels.
pub mod channel;
pub use channel::{BufferChannel, ChannelError, Channels, IoChannel, SharedOutput, StreamChannel};

/// Machine definitions and the run loop.
pub mod machine;
pub use machine::{
    default_punctuation, Equ, ExecutionHandle, LoadRecord, Machine, MachineConfig,
    MachineDefinition, PunctChar, PunctUse,
};

/// Built-in reference machine.
pub mod sample;
pub use sample::{accumulator_machine, CONSOLE_CHANNEL};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use serde_json as _;

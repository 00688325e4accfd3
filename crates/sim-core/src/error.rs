//! Error taxonomy for machine definitions and micro-operation execution.
//!
//! Definition problems surface as [`ValidationError`] before anything runs;
//! runtime problems surface as [`ExecutionError`] from a single micro and are
//! absorbed by the control loop into the `ExceptionThrown` state.

use thiserror::Error;

/// A machine definition, module, micro, or instruction is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// An instruction field violates its width/value constraints.
    #[error("field `{field}`: {reason}")]
    Field {
        /// Field name.
        field: String,
        /// Human-readable cause.
        reason: String,
    },
    /// A register, register array, RAM, or condition bit is malformed.
    #[error("module `{module}`: {reason}")]
    Module {
        /// Module name.
        module: String,
        /// Human-readable cause.
        reason: String,
    },
    /// A microinstruction references modules inconsistently.
    #[error("microinstruction `{micro}`: {reason}")]
    Micro {
        /// Microinstruction name.
        micro: String,
        /// Human-readable cause.
        reason: String,
    },
    /// A machine instruction layout is inconsistent.
    #[error("instruction `{instruction}`: {reason}")]
    Instruction {
        /// Instruction name.
        instruction: String,
        /// Human-readable cause.
        reason: String,
    },
    /// A machine-wide setting is inconsistent.
    #[error("machine: {0}")]
    Machine(String),
}

impl ValidationError {
    pub(crate) fn field(field: &str, reason: impl Into<String>) -> Self {
        Self::Field {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn module(module: &str, reason: impl Into<String>) -> Self {
        Self::Module {
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn micro(micro: &str, reason: impl Into<String>) -> Self {
        Self::Micro {
            micro: micro.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn instruction(instruction: &str, reason: impl Into<String>) -> Self {
        Self::Instruction {
            instruction: instruction.to_string(),
            reason: reason.into(),
        }
    }
}

/// A micro-operation could not complete against the current machine state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The control unit points past the end of the current instruction.
    #[error("micro index {index} is out of range for `{instruction}`")]
    MicroIndexOutOfRange {
        /// Name of the current instruction.
        instruction: String,
        /// Offending micro index.
        index: i64,
    },
    /// Integer division by zero.
    #[error("division by zero in `{micro}`")]
    DivideByZero {
        /// Name of the failing micro.
        micro: String,
    },
    /// A memory access fell outside the RAM.
    #[error("address {address} is outside `{ram}` ({len} cells)")]
    AddressOutOfRange {
        /// RAM name.
        ram: String,
        /// First cell address of the access.
        address: u64,
        /// Number of cells in the RAM.
        len: usize,
    },
    /// A register-array index fell outside the array.
    #[error("index {index} is outside register array `{array}` ({len} registers)")]
    ArrayIndexOutOfRange {
        /// Array name.
        array: String,
        /// Offending index.
        index: u64,
        /// Number of registers in the array.
        len: usize,
    },
    /// Decode found no instruction for the opcode bits.
    #[error("no instruction has opcode {opcode:#x}")]
    UnknownOpcode {
        /// Opcode bits read from the instruction register.
        opcode: u64,
    },
    /// An I/O micro names a channel that was never attached.
    #[error("no I/O channel named `{0}` is attached")]
    MissingChannel(String),
    /// An I/O channel failed to read or write.
    #[error("channel `{channel}`: {reason}")]
    Io {
        /// Channel name.
        channel: String,
        /// Underlying failure.
        reason: String,
    },
    /// A program was loaded into a machine without a code store.
    #[error("the machine has no code store")]
    NoCodeStore,
    /// An input or stored value does not fit the destination.
    #[error("value {value} does not fit in {width}-bit `{target}`")]
    ValueOutOfRange {
        /// Offending value.
        value: i128,
        /// Destination width in bits.
        width: u32,
        /// Destination register or RAM name.
        target: String,
    },
}

//! Microinstructions: the primitive operations machine instructions are built from.
//!
//! Each [`Microinstruction`] pairs a display name with one closed [`Micro`]
//! variant. Variants carry module handles only; they are checked against a
//! [`Modules`] arena by [`Microinstruction::validate`] and run by
//! [`Microinstruction::execute`].

use crate::bits::{fits_either, range_fits};
use crate::module::{
    ConditionBitId, ModuleRef, Modules, RamId, RegisterArrayId, RegisterId,
};
use crate::ValidationError;

mod exec;

pub use exec::ExecContext;

/// Handle to a [`Microinstruction`] in a machine's micro list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MicroId(pub usize);

/// Arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ArithmeticOp {
    /// `source1 + source2`.
    Add,
    /// `source1 - source2`.
    Subtract,
    /// `source1 * source2`.
    Multiply,
    /// `source1 / source2`, truncating toward zero.
    Divide,
}

/// Bitwise operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LogicalOp {
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Negated and.
    Nand,
    /// Negated or.
    Nor,
    /// Exclusive or.
    Xor,
    /// Complement of `source1`; `source2` is ignored.
    Not,
}

/// How vacated bits are filled by a shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ShiftKind {
    /// Fill with zeros.
    Logical,
    /// Right shifts replicate the sign bit.
    Arithmetic,
    /// Bits rotate around the register width.
    Cyclic,
}

/// Shift direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ShiftDirection {
    /// Toward the most significant bit.
    Left,
    /// Toward the least significant bit.
    Right,
}

/// Relation used by [`Micro::Test`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Comparison {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `>`
    Greater,
    /// `<=`
    LessOrEqual,
    /// `>=`
    GreaterOrEqual,
}

impl Comparison {
    /// Applies the relation.
    #[must_use]
    pub fn holds(self, left: i128, right: i128) -> bool {
        match self {
            Self::Equal => left == right,
            Self::NotEqual => left != right,
            Self::Less => left < right,
            Self::Greater => left > right,
            Self::LessOrEqual => left <= right,
            Self::GreaterOrEqual => left >= right,
        }
    }
}

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemoryDirection {
    /// RAM to data register.
    Read,
    /// Data register to RAM.
    Write,
}

/// Unit transferred by an I/O micro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum IoKind {
    /// A signed decimal integer.
    Integer,
    /// One character in `0..=255`.
    Ascii,
    /// One Unicode scalar value.
    Unicode,
}

/// Direction of an I/O micro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum IoDirection {
    /// Channel to buffer register.
    Input,
    /// Buffer register to channel.
    Output,
}

/// The closed set of micro-operation kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum Micro {
    /// Signed arithmetic with optional overflow and carry flags.
    Arithmetic {
        op: ArithmeticOp,
        source1: RegisterId,
        source2: RegisterId,
        destination: RegisterId,
        overflow_bit: Option<ConditionBitId>,
        carry_bit: Option<ConditionBitId>,
    },
    /// Bitwise logic.
    Logical {
        op: LogicalOp,
        source1: RegisterId,
        source2: RegisterId,
        destination: RegisterId,
    },
    /// Width-bounded shift or rotate.
    Shift {
        kind: ShiftKind,
        direction: ShiftDirection,
        source: RegisterId,
        destination: RegisterId,
        distance: u32,
    },
    /// Adds a signed constant to a register.
    Increment {
        register: RegisterId,
        delta: i64,
        overflow_bit: Option<ConditionBitId>,
        carry_bit: Option<ConditionBitId>,
    },
    /// Copies a bit range between registers.
    TransferRtoR {
        source: RegisterId,
        source_start: u32,
        destination: RegisterId,
        destination_start: u32,
        num_bits: u32,
    },
    /// Copies a bit range into the array element selected by an index register.
    TransferRtoA {
        source: RegisterId,
        source_start: u32,
        array: RegisterArrayId,
        destination_start: u32,
        num_bits: u32,
        index: RegisterId,
        index_start: u32,
        index_num_bits: u32,
    },
    /// Copies a bit range out of the array element selected by an index register.
    TransferAtoR {
        array: RegisterArrayId,
        source_start: u32,
        destination: RegisterId,
        destination_start: u32,
        num_bits: u32,
        index: RegisterId,
        index_start: u32,
        index_num_bits: u32,
    },
    /// Writes a constant into a bit range.
    Set {
        register: RegisterId,
        start: u32,
        num_bits: u32,
        value: i64,
    },
    /// Skips `omission` following micros when the comparison holds.
    Test {
        register: RegisterId,
        start: u32,
        num_bits: u32,
        comparison: Comparison,
        value: i64,
        omission: i64,
    },
    /// Jumps `amount` micros relative to this one within the current instruction.
    Branch { amount: i64 },
    /// Selects the instruction whose opcode matches the top bits of `ir`.
    Decode { ir: RegisterId },
    /// Moves a register's worth of consecutive cells between RAM and a register.
    MemoryAccess {
        direction: MemoryDirection,
        ram: RamId,
        data: RegisterId,
        address: RegisterId,
    },
    /// Synchronous transfer on a named I/O channel.
    Io {
        kind: IoKind,
        direction: IoDirection,
        buffer: RegisterId,
        channel: String,
    },
    /// Sets or clears a condition bit.
    SetCondBit { bit: ConditionBitId, value: bool },
    /// Returns control to the fetch sequence.
    End,
    /// Does nothing.
    Comment,
}

/// A named micro-operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Microinstruction {
    name: String,
    micro: Micro,
}

impl Microinstruction {
    /// Creates a micro.
    #[must_use]
    pub fn new(name: impl Into<String>, micro: Micro) -> Self {
        Self {
            name: name.into(),
            micro,
        }
    }

    /// Creates the `End` micro.
    #[must_use]
    pub fn end() -> Self {
        Self::new("end", Micro::End)
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Operation kind and operands.
    #[must_use]
    pub const fn micro(&self) -> &Micro {
        &self.micro
    }

    /// Returns `true` for the `End` micro.
    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self.micro, Micro::End)
    }

    /// I/O channel named by this micro, if any.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        match &self.micro {
            Micro::Io { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Returns `true` when this micro reads or writes `module`.
    #[must_use]
    pub fn uses(&self, module: ModuleRef) -> bool {
        self.modules().contains(&module)
    }

    /// Every module this micro touches.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleRef> {
        use ModuleRef::{ConditionBit, Ram, Register, RegisterArray};
        match &self.micro {
            Micro::Arithmetic {
                source1,
                source2,
                destination,
                overflow_bit,
                carry_bit,
                ..
            } => {
                let mut used = vec![Register(*source1), Register(*source2), Register(*destination)];
                used.extend(overflow_bit.map(ConditionBit));
                used.extend(carry_bit.map(ConditionBit));
                used
            }
            Micro::Logical {
                source1,
                source2,
                destination,
                ..
            } => vec![Register(*source1), Register(*source2), Register(*destination)],
            Micro::Shift {
                source,
                destination,
                ..
            }
            | Micro::TransferRtoR {
                source,
                destination,
                ..
            } => vec![Register(*source), Register(*destination)],
            Micro::Increment {
                register,
                overflow_bit,
                carry_bit,
                ..
            } => {
                let mut used = vec![Register(*register)];
                used.extend(overflow_bit.map(ConditionBit));
                used.extend(carry_bit.map(ConditionBit));
                used
            }
            Micro::TransferRtoA {
                source,
                array,
                index,
                ..
            } => vec![Register(*source), RegisterArray(*array), Register(*index)],
            Micro::TransferAtoR {
                array,
                destination,
                index,
                ..
            } => vec![RegisterArray(*array), Register(*destination), Register(*index)],
            Micro::Set { register, .. } | Micro::Test { register, .. } => vec![Register(*register)],
            Micro::Decode { ir } => vec![Register(*ir)],
            Micro::MemoryAccess {
                ram, data, address, ..
            } => vec![Ram(*ram), Register(*data), Register(*address)],
            Micro::Io { buffer, .. } => vec![Register(*buffer)],
            Micro::SetCondBit { bit, .. } => vec![ConditionBit(*bit)],
            Micro::Branch { .. } | Micro::End | Micro::Comment => Vec::new(),
        }
    }

    /// Checks that every referenced module exists and every bit range fits.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Micro`] describing the first inconsistency.
    pub fn validate(&self, modules: &Modules) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::micro(&self.name, "name cannot be blank"));
        }
        if let Some(missing) = self.modules().into_iter().find(|m| !modules.contains(*m)) {
            return Err(ValidationError::micro(
                &self.name,
                format!("refers to missing module {missing:?}"),
            ));
        }
        let width = |id: RegisterId| modules[id].width();
        let check_range = |what: &str, register_width: u32, start: u32, num_bits: u32| {
            if range_fits(register_width, start, num_bits) {
                Ok(())
            } else {
                Err(ValidationError::micro(
                    &self.name,
                    format!(
                        "{what} range {start}+{num_bits} does not fit {register_width} bits"
                    ),
                ))
            }
        };
        match &self.micro {
            Micro::Shift {
                source,
                destination,
                ..
            } if width(*source) != width(*destination) => Err(ValidationError::micro(
                &self.name,
                "source and destination must have the same width",
            )),
            Micro::TransferRtoR {
                source,
                source_start,
                destination,
                destination_start,
                num_bits,
            } => {
                check_range("source", width(*source), *source_start, *num_bits)?;
                check_range(
                    "destination",
                    width(*destination),
                    *destination_start,
                    *num_bits,
                )
            }
            Micro::TransferRtoA {
                source,
                source_start,
                array,
                destination_start,
                num_bits,
                index,
                index_start,
                index_num_bits,
            } => {
                check_range("source", width(*source), *source_start, *num_bits)?;
                check_range(
                    "destination",
                    modules[*array].width(),
                    *destination_start,
                    *num_bits,
                )?;
                check_range("index", width(*index), *index_start, *index_num_bits)
            }
            Micro::TransferAtoR {
                array,
                source_start,
                destination,
                destination_start,
                num_bits,
                index,
                index_start,
                index_num_bits,
            } => {
                check_range("source", modules[*array].width(), *source_start, *num_bits)?;
                check_range(
                    "destination",
                    width(*destination),
                    *destination_start,
                    *num_bits,
                )?;
                check_range("index", width(*index), *index_start, *index_num_bits)
            }
            Micro::Set {
                register,
                start,
                num_bits,
                value,
            } => {
                check_range("target", width(*register), *start, *num_bits)?;
                if fits_either(i128::from(*value), *num_bits) {
                    Ok(())
                } else {
                    Err(ValidationError::micro(
                        &self.name,
                        format!("value {value} does not fit in {num_bits} bits"),
                    ))
                }
            }
            Micro::Test {
                register,
                start,
                num_bits,
                ..
            } => check_range("tested", width(*register), *start, *num_bits),
            Micro::MemoryAccess { ram, data, .. } => {
                let cell_size = modules[*ram].cell_size();
                if cell_size != 0 && width(*data) % cell_size == 0 {
                    Ok(())
                } else {
                    Err(ValidationError::micro(
                        &self.name,
                        format!(
                            "data register width {} is not a multiple of the {cell_size}-bit cell size",
                            width(*data)
                        ),
                    ))
                }
            }
            Micro::Io { channel, .. } if channel.trim().is_empty() => Err(
                ValidationError::micro(&self.name, "channel name cannot be blank"),
            ),
            _ => Ok(()),
        }
    }
}

//! Micro-operation semantics.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::too_many_lines
)]

use log::trace;

use super::{
    ArithmeticOp, IoDirection, IoKind, LogicalOp, MemoryDirection, Micro, Microinstruction,
    ShiftDirection, ShiftKind,
};
use crate::bits::{
    extract, fits_either, fits_signed, insert, mask, sign_extend, unsigned_bits, MAX_WIDTH,
};
use crate::channel::Channels;
use crate::control::{ControlUnit, CurrentInstruction};
use crate::instruction::{InstructionId, MachineInstruction};
use crate::module::{ConditionBitId, Modules, RegisterId};
use crate::ExecutionError;

/// Everything a micro may read or mutate while it runs.
pub struct ExecContext<'a> {
    /// Registers, arrays, RAMs, and condition bits.
    pub modules: &'a mut Modules,
    /// Execution cursor.
    pub control: &'a mut ControlUnit,
    /// Attached I/O channels.
    pub channels: &'a mut Channels,
    /// Instructions available to `Decode`.
    pub instructions: &'a [MachineInstruction],
    /// Bit 0 is the least-significant bit when set.
    pub index_from_right: bool,
}

impl ExecContext<'_> {
    fn write_flag(&mut self, bit: Option<ConditionBitId>, value: bool) {
        if let Some(bit) = bit {
            self.modules
                .set_condition_bit(bit, value, self.index_from_right);
        }
    }

    fn element_index(
        &self,
        index: RegisterId,
        start: u32,
        num_bits: u32,
    ) -> u64 {
        let register = &self.modules[index];
        extract(
            register.value(),
            register.width(),
            start,
            num_bits,
            self.index_from_right,
        )
    }
}

impl Microinstruction {
    /// Runs this micro against `ctx`.
    ///
    /// The control unit has already been advanced past this micro, so
    /// `Branch` and `Test` offsets are applied relative to the next index.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError`] when the micro cannot complete; module
    /// state is left untouched in that case.
    pub fn execute(&self, ctx: &mut ExecContext<'_>) -> Result<(), ExecutionError> {
        trace!("micro `{}`", self.name);
        let from_right = ctx.index_from_right;
        match &self.micro {
            Micro::Arithmetic {
                op,
                source1,
                source2,
                destination,
                overflow_bit,
                carry_bit,
            } => {
                let left = ctx.modules[*source1].unsigned_value();
                let right = ctx.modules[*source2].unsigned_value();
                let width = ctx.modules[*destination].width();
                let (result, carry) = arithmetic(*op, left, right, width)
                    .ok_or_else(|| ExecutionError::DivideByZero {
                        micro: self.name.clone(),
                    })?;
                ctx.write_flag(*overflow_bit, !fits_signed(result, width));
                if let Some(carry) = carry {
                    ctx.write_flag(*carry_bit, carry);
                }
                ctx.modules[*destination].store(result);
            }
            Micro::Logical {
                op,
                source1,
                source2,
                destination,
            } => {
                let left = ctx.modules[*source1].unsigned_value();
                let right = ctx.modules[*source2].unsigned_value();
                let result = match op {
                    LogicalOp::And => left & right,
                    LogicalOp::Or => left | right,
                    LogicalOp::Nand => !(left & right),
                    LogicalOp::Nor => !(left | right),
                    LogicalOp::Xor => left ^ right,
                    LogicalOp::Not => !left,
                };
                ctx.modules[*destination].store(i128::from(result));
            }
            Micro::Shift {
                kind,
                direction,
                source,
                destination,
                distance,
            } => {
                let register = &ctx.modules[*source];
                let bits = shift(
                    *kind,
                    *direction,
                    register.unsigned_value(),
                    register.width(),
                    *distance,
                );
                let width = register.width();
                ctx.modules[*destination].store(i128::from(sign_extend(bits, width)));
            }
            Micro::Increment {
                register,
                delta,
                overflow_bit,
                carry_bit,
            } => {
                let target = &ctx.modules[*register];
                let width = target.width();
                let exact = i128::from(target.value()) + i128::from(*delta);
                let unsigned_sum = i128::from(target.unsigned_value())
                    + i128::from(unsigned_bits(*delta, width));
                ctx.write_flag(*overflow_bit, !fits_signed(exact, width));
                ctx.write_flag(*carry_bit, unsigned_sum >> width != 0);
                ctx.modules[*register].store(exact);
            }
            Micro::TransferRtoR {
                source,
                source_start,
                destination,
                destination_start,
                num_bits,
            } => {
                let from = &ctx.modules[*source];
                let bits = extract(from.value(), from.width(), *source_start, *num_bits, from_right);
                let to = &ctx.modules[*destination];
                let merged = insert(
                    to.value(),
                    to.width(),
                    *destination_start,
                    *num_bits,
                    bits,
                    from_right,
                );
                ctx.modules[*destination].store(i128::from(merged));
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
                let from = &ctx.modules[*source];
                let bits = extract(from.value(), from.width(), *source_start, *num_bits, from_right);
                let element = ctx.element_index(*index, *index_start, *index_num_bits);
                let target = &mut ctx.modules[*array];
                let len = target.len();
                let array_name = target.name().to_string();
                let register = usize::try_from(element)
                    .ok()
                    .and_then(|slot| target.get_mut(slot))
                    .ok_or(ExecutionError::ArrayIndexOutOfRange {
                        array: array_name,
                        index: element,
                        len,
                    })?;
                let merged = insert(
                    register.value(),
                    register.width(),
                    *destination_start,
                    *num_bits,
                    bits,
                    from_right,
                );
                register.store(i128::from(merged));
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
                let element = ctx.element_index(*index, *index_start, *index_num_bits);
                let source = &ctx.modules[*array];
                let register = usize::try_from(element)
                    .ok()
                    .and_then(|slot| source.get(slot))
                    .ok_or_else(|| ExecutionError::ArrayIndexOutOfRange {
                        array: source.name().to_string(),
                        index: element,
                        len: source.len(),
                    })?;
                let bits = extract(
                    register.value(),
                    register.width(),
                    *source_start,
                    *num_bits,
                    from_right,
                );
                let to = &ctx.modules[*destination];
                let merged = insert(
                    to.value(),
                    to.width(),
                    *destination_start,
                    *num_bits,
                    bits,
                    from_right,
                );
                ctx.modules[*destination].store(i128::from(merged));
            }
            Micro::Set {
                register,
                start,
                num_bits,
                value,
            } => {
                let target = &ctx.modules[*register];
                let merged = insert(
                    target.value(),
                    target.width(),
                    *start,
                    *num_bits,
                    unsigned_bits(*value, *num_bits),
                    from_right,
                );
                ctx.modules[*register].store(i128::from(merged));
            }
            Micro::Test {
                register,
                start,
                num_bits,
                comparison,
                value,
                omission,
            } => {
                let target = &ctx.modules[*register];
                let observed = if *num_bits == target.width() {
                    i128::from(target.value())
                } else {
                    i128::from(extract(
                        target.value(),
                        target.width(),
                        *start,
                        *num_bits,
                        from_right,
                    ))
                };
                if comparison.holds(observed, i128::from(*value)) {
                    ctx.control.offset_micro_index(*omission);
                }
            }
            Micro::Branch { amount } => {
                let branch_index = ctx.control.micro_index() - 1;
                ctx.control.set_micro_index(branch_index.saturating_add(*amount));
            }
            Micro::Decode { ir } => {
                let register = &ctx.modules[*ir];
                let id = decode(ctx.instructions, register.unsigned_value(), register.width())
                    .ok_or_else(|| ExecutionError::UnknownOpcode {
                        opcode: register.unsigned_value(),
                    })?;
                trace!("decoded `{}`", ctx.instructions[id.0].name());
                ctx.control.set_current(CurrentInstruction::Instruction(id));
            }
            Micro::MemoryAccess {
                direction,
                ram,
                data,
                address,
            } => {
                let at = ctx.modules[*address].unsigned_value();
                let data_width = ctx.modules[*data].width();
                let memory = &ctx.modules[*ram];
                let num_cells = (data_width / memory.cell_size()) as usize;
                match direction {
                    MemoryDirection::Read => {
                        let bits = memory.read(at, num_cells)?;
                        ctx.modules[*data].store(i128::from(sign_extend(bits, data_width)));
                    }
                    MemoryDirection::Write => {
                        let bits = ctx.modules[*data].unsigned_value();
                        ctx.modules[*ram].write(at, num_cells, bits)?;
                    }
                }
            }
            Micro::Io {
                kind,
                direction,
                buffer,
                channel,
            } => {
                let io_error = |reason: String| ExecutionError::Io {
                    channel: channel.clone(),
                    reason,
                };
                let port = ctx
                    .channels
                    .get_mut(channel)
                    .ok_or_else(|| ExecutionError::MissingChannel(channel.clone()))?;
                let register = &ctx.modules[*buffer];
                match direction {
                    IoDirection::Input => {
                        let value = match kind {
                            IoKind::Integer => port
                                .read_integer()
                                .map_err(|err| io_error(err.to_string()))?,
                            IoKind::Ascii | IoKind::Unicode => {
                                let c = port.read_char().map_err(|err| io_error(err.to_string()))?;
                                if *kind == IoKind::Ascii && u32::from(c) > 0xFF {
                                    return Err(io_error(format!("`{c}` is not an ASCII character")));
                                }
                                i64::from(u32::from(c))
                            }
                        };
                        if !fits_either(i128::from(value), register.width()) {
                            return Err(ExecutionError::ValueOutOfRange {
                                value: i128::from(value),
                                width: register.width(),
                                target: register.name().to_string(),
                            });
                        }
                        ctx.modules[*buffer].store(i128::from(value));
                    }
                    IoDirection::Output => {
                        let result = match kind {
                            IoKind::Integer => port.write_integer(register.value()),
                            IoKind::Ascii | IoKind::Unicode => {
                                let code = register.unsigned_value();
                                let limit = if *kind == IoKind::Ascii { 0xFF } else { u64::from(u32::MAX) };
                                let c = u32::try_from(code)
                                    .ok()
                                    .filter(|_| code <= limit)
                                    .and_then(char::from_u32)
                                    .ok_or_else(|| {
                                        io_error(format!("{code} is not a printable character code"))
                                    })?;
                                port.write_char(c)
                            }
                        };
                        result.map_err(|err| io_error(err.to_string()))?;
                    }
                }
            }
            Micro::SetCondBit { bit, value } => {
                ctx.modules.set_condition_bit(*bit, *value, from_right);
            }
            Micro::End => ctx.control.reset(),
            Micro::Comment => {}
        }
        Ok(())
    }
}

/// Exact signed result and, for add/subtract/multiply, the unsigned carry out
/// of `width` bits. `None` on division by zero.
fn arithmetic(op: ArithmeticOp, left: i64, right: i64, width: u32) -> Option<(i128, Option<bool>)> {
    let (l, r) = (i128::from(left), i128::from(right));
    let width_mask = i128::from(mask(width));
    let (ul, ur) = (l & width_mask, r & width_mask);
    let carry_out = |unsigned: i128| unsigned >> width != 0;
    match op {
        ArithmeticOp::Add => Some((l + r, Some(carry_out(ul + ur)))),
        ArithmeticOp::Subtract => Some((l - r, Some(carry_out(ul + ((-ur) & width_mask))))),
        ArithmeticOp::Multiply => {
            let product = u128::from(ul as u64) * u128::from(ur as u64);
            Some((l * r, Some(product >> width != 0)))
        }
        ArithmeticOp::Divide => (r != 0).then(|| (l / r, None)),
    }
}

fn shift(kind: ShiftKind, direction: ShiftDirection, bits: u64, width: u32, distance: u32) -> u64 {
    let width_mask = mask(width);
    let wide = u128::from(bits);
    match (kind, direction) {
        (ShiftKind::Logical | ShiftKind::Arithmetic, ShiftDirection::Left) => {
            if distance >= width {
                0
            } else {
                ((wide << distance) as u64) & width_mask
            }
        }
        (ShiftKind::Logical, ShiftDirection::Right) => {
            if distance >= width {
                0
            } else {
                bits >> distance
            }
        }
        (ShiftKind::Arithmetic, ShiftDirection::Right) => {
            let signed = sign_extend(bits, width);
            let shifted = signed >> distance.min(MAX_WIDTH - 1);
            (shifted as u64) & width_mask
        }
        (ShiftKind::Cyclic, _) => {
            let turn = distance % width;
            if turn == 0 {
                return bits;
            }
            let turn = match direction {
                ShiftDirection::Left => turn,
                ShiftDirection::Right => width - turn,
            };
            (((wide << turn) | (wide >> (width - turn))) as u64) & width_mask
        }
    }
}

fn decode(instructions: &[MachineInstruction], ir: u64, ir_width: u32) -> Option<InstructionId> {
    instructions
        .iter()
        .position(|instruction| {
            let width = instruction.opcode_width();
            width > 0
                && width <= ir_width
                && (ir >> (ir_width - width)) & mask(width) == instruction.opcode()
        })
        .map(InstructionId)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::channel::BufferChannel;
    use crate::field::{Field, FieldType};
    use crate::micro::Comparison;
    use crate::module::{ConditionBit, Ram, Register, RegisterArray};

    struct Rig {
        modules: Modules,
        control: ControlUnit,
        channels: Channels,
        instructions: Vec<MachineInstruction>,
        from_right: bool,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                modules: Modules::new(),
                control: ControlUnit::new(),
                channels: Channels::new(),
                instructions: Vec::new(),
                from_right: false,
            }
        }

        fn run(&mut self, micro: Micro) -> Result<(), ExecutionError> {
            let micro = Microinstruction::new("test", micro);
            micro.validate(&self.modules).unwrap();
            let mut ctx = ExecContext {
                modules: &mut self.modules,
                control: &mut self.control,
                channels: &mut self.channels,
                instructions: &self.instructions,
                index_from_right: self.from_right,
            };
            micro.execute(&mut ctx)
        }

        fn flag(&self, bit: ConditionBitId) -> bool {
            self.modules.is_condition_bit_set(bit, self.from_right)
        }
    }

    fn flagged(width: u32) -> (Rig, RegisterId, ConditionBitId, ConditionBitId) {
        let mut rig = Rig::new();
        let register = rig.modules.add_register(Register::new("r", width));
        let status = rig.modules.add_register(Register::new("status", 2));
        let overflow = rig
            .modules
            .add_condition_bit(ConditionBit::new("overflow", status, 0));
        let carry = rig
            .modules
            .add_condition_bit(ConditionBit::new("carry", status, 1));
        (rig, register, overflow, carry)
    }

    #[test]
    fn increment_scenario_four_and_six_bits() {
        let (mut rig, register, overflow, carry) = flagged(4);
        let step = |rig: &mut Rig, delta| {
            rig.run(Micro::Increment {
                register,
                delta,
                overflow_bit: Some(overflow),
                carry_bit: Some(carry),
            })
            .unwrap();
            (rig.modules[register].value(), rig.flag(carry), rig.flag(overflow))
        };
        assert_eq!(step(&mut rig, 7), (7, false, false));
        assert_eq!(step(&mut rig, 7), (-2, false, true));
        assert_eq!(step(&mut rig, 7), (5, true, false));

        rig.modules[register].set_width(6).unwrap();
        rig.modules[register].set_value(0).unwrap();
        assert_eq!(step(&mut rig, 31), (31, false, false));
        assert_eq!(step(&mut rig, 31), (-2, false, true));
        assert_eq!(step(&mut rig, 31), (29, true, false));
    }

    #[rstest]
    #[case(ArithmeticOp::Add, 100, 27, 127, false, false)]
    #[case(ArithmeticOp::Add, 100, 28, -128, true, false)]
    #[case(ArithmeticOp::Add, -1, 1, 0, false, true)]
    #[case(ArithmeticOp::Subtract, 5, 3, 2, false, true)]
    #[case(ArithmeticOp::Subtract, 3, 5, -2, false, false)]
    #[case(ArithmeticOp::Subtract, -128, 1, 127, true, true)]
    #[case(ArithmeticOp::Multiply, 16, 8, -128, true, false)]
    #[case(ArithmeticOp::Multiply, -1, 2, -2, false, true)]
    fn arithmetic_flags_on_eight_bits(
        #[case] op: ArithmeticOp,
        #[case] left: i64,
        #[case] right: i64,
        #[case] expected: i64,
        #[case] expect_overflow: bool,
        #[case] expect_carry: bool,
    ) {
        let (mut rig, a, overflow, carry) = flagged(8);
        let b = rig.modules.add_register(Register::new("b", 8));
        rig.modules[a].set_value(left).unwrap();
        rig.modules[b].set_value(right).unwrap();
        rig.run(Micro::Arithmetic {
            op,
            source1: a,
            source2: b,
            destination: a,
            overflow_bit: Some(overflow),
            carry_bit: Some(carry),
        })
        .unwrap();
        assert_eq!(rig.modules[a].value(), expected);
        assert_eq!(rig.flag(overflow), expect_overflow, "overflow");
        assert_eq!(rig.flag(carry), expect_carry, "carry");
    }

    #[test]
    fn divide_by_zero_leaves_state_untouched() {
        let (mut rig, a, overflow, carry) = flagged(8);
        let b = rig.modules.add_register(Register::new("b", 8));
        rig.modules[a].set_value(9).unwrap();
        let result = rig.run(Micro::Arithmetic {
            op: ArithmeticOp::Divide,
            source1: a,
            source2: b,
            destination: a,
            overflow_bit: Some(overflow),
            carry_bit: Some(carry),
        });
        assert!(matches!(result, Err(ExecutionError::DivideByZero { .. })));
        assert_eq!(rig.modules[a].value(), 9);

        rig.modules[b].set_value(-2).unwrap();
        rig.run(Micro::Arithmetic {
            op: ArithmeticOp::Divide,
            source1: a,
            source2: b,
            destination: a,
            overflow_bit: Some(overflow),
            carry_bit: Some(carry),
        })
        .unwrap();
        assert_eq!(rig.modules[a].value(), -4);
    }

    #[rstest]
    #[case(LogicalOp::And, 0b1100, 0b1010, 0b1000)]
    #[case(LogicalOp::Or, 0b1100, 0b1010, 0b1110)]
    #[case(LogicalOp::Xor, 0b1100, 0b1010, 0b0110)]
    #[case(LogicalOp::Nand, 0b1100, 0b1010, 0b0111)]
    #[case(LogicalOp::Nor, 0b1100, 0b1010, 0b0001)]
    #[case(LogicalOp::Not, 0b0000, 0b1111, 0b1111)]
    fn logical_ops_on_four_bits(
        #[case] op: LogicalOp,
        #[case] left: i64,
        #[case] right: i64,
        #[case] expected: u64,
    ) {
        let mut rig = Rig::new();
        let a = rig.modules.add_register(Register::new("a", 4));
        let b = rig.modules.add_register(Register::new("b", 4));
        rig.modules[a].set_value(left).unwrap();
        rig.modules[b].set_value(right).unwrap();
        rig.run(Micro::Logical {
            op,
            source1: a,
            source2: b,
            destination: a,
        })
        .unwrap();
        assert_eq!(rig.modules[a].unsigned_value(), expected);
    }

    #[rstest]
    #[case(LogicalOp::And, 0x00)]
    #[case(LogicalOp::Or, 0xFF)]
    #[case(LogicalOp::Xor, 0xFF)]
    #[case(LogicalOp::Not, 0xF0)]
    fn logical_ops_combine_register_contents_across_widths(
        #[case] op: LogicalOp,
        #[case] expected: u64,
    ) {
        let mut rig = Rig::new();
        let a = rig.modules.add_register(Register::new("a", 4));
        let b = rig.modules.add_register(Register::new("b", 8));
        let d = rig.modules.add_register(Register::new("d", 8));
        rig.modules[a].set_value(0b1111).unwrap();
        rig.modules[b].set_value(0xF0).unwrap();
        rig.run(Micro::Logical {
            op,
            source1: a,
            source2: b,
            destination: d,
        })
        .unwrap();
        assert_eq!(rig.modules[d].unsigned_value(), expected);
    }

    #[rstest]
    #[case(ShiftKind::Logical, ShiftDirection::Left, 2, 0b1011_0001, 0b1100_0100)]
    #[case(ShiftKind::Logical, ShiftDirection::Right, 2, 0b1011_0001, 0b0010_1100)]
    #[case(ShiftKind::Arithmetic, ShiftDirection::Right, 2, 0b1011_0001, 0b1110_1100)]
    #[case(ShiftKind::Cyclic, ShiftDirection::Left, 3, 0b1011_0001, 0b1000_1101)]
    #[case(ShiftKind::Cyclic, ShiftDirection::Right, 3, 0b1011_0001, 0b0011_0110)]
    #[case(ShiftKind::Logical, ShiftDirection::Left, 9, 0b1011_0001, 0)]
    fn shifts_on_eight_bits(
        #[case] kind: ShiftKind,
        #[case] direction: ShiftDirection,
        #[case] distance: u32,
        #[case] input: u64,
        #[case] expected: u64,
    ) {
        assert_eq!(shift(kind, direction, input, 8, distance), expected);
    }

    #[test]
    fn transfers_move_bit_ranges() {
        let mut rig = Rig::new();
        let ir = rig.modules.add_register(Register::new("ir", 16));
        let mar = rig.modules.add_register(Register::new("mar", 12));
        rig.modules[ir].set_value(0x3ABC).unwrap();
        rig.run(Micro::TransferRtoR {
            source: ir,
            source_start: 4,
            destination: mar,
            destination_start: 0,
            num_bits: 12,
        })
        .unwrap();
        assert_eq!(rig.modules[mar].unsigned_value(), 0xABC);
    }

    #[test]
    fn array_transfers_select_by_index() {
        let mut rig = Rig::new();
        let array = rig
            .modules
            .add_register_array(RegisterArray::new("r", 4, 8));
        let ir = rig.modules.add_register(Register::new("ir", 8));
        let acc = rig.modules.add_register(Register::new("acc", 8));
        rig.modules[acc].set_value(0x5A).unwrap();
        // Index held in the low two bits of ir.
        rig.modules[ir].set_value(0b10).unwrap();
        rig.run(Micro::TransferRtoA {
            source: acc,
            source_start: 0,
            array,
            destination_start: 0,
            num_bits: 8,
            index: ir,
            index_start: 6,
            index_num_bits: 2,
        })
        .unwrap();
        assert_eq!(rig.modules[array].get(2).map(Register::value), Some(0x5A));

        let other = rig.modules.add_register(Register::new("out", 8));
        rig.run(Micro::TransferAtoR {
            array,
            source_start: 0,
            destination: other,
            destination_start: 0,
            num_bits: 8,
            index: ir,
            index_start: 6,
            index_num_bits: 2,
        })
        .unwrap();
        assert_eq!(rig.modules[other].value(), 0x5A);

        rig.modules[ir].set_value(0b100).unwrap();
        let small = rig
            .modules
            .add_register_array(RegisterArray::new("s", 3, 8));
        let result = rig.run(Micro::TransferRtoA {
            source: acc,
            source_start: 0,
            array: small,
            destination_start: 0,
            num_bits: 8,
            index: ir,
            index_start: 5,
            index_num_bits: 3,
        });
        assert!(matches!(
            result,
            Err(ExecutionError::ArrayIndexOutOfRange { index: 4, len: 3, .. })
        ));
    }

    #[test]
    fn set_honors_bit_numbering() {
        let mut rig = Rig::new();
        let r = rig.modules.add_register(Register::new("r", 8));
        rig.run(Micro::Set {
            register: r,
            start: 0,
            num_bits: 2,
            value: 0b11,
        })
        .unwrap();
        assert_eq!(rig.modules[r].unsigned_value(), 0b1100_0000);
        rig.from_right = true;
        rig.run(Micro::Set {
            register: r,
            start: 0,
            num_bits: 2,
            value: 0b01,
        })
        .unwrap();
        assert_eq!(rig.modules[r].unsigned_value(), 0b1100_0001);
    }

    #[test]
    fn test_skips_and_branch_jumps() {
        let mut rig = Rig::new();
        let acc = rig.modules.add_register(Register::new("acc", 8));
        rig.modules[acc].set_value(-1).unwrap();
        rig.control.set_micro_index(3);
        rig.run(Micro::Test {
            register: acc,
            start: 0,
            num_bits: 8,
            comparison: Comparison::Less,
            value: 0,
            omission: 2,
        })
        .unwrap();
        assert_eq!(rig.control.micro_index(), 5);

        // A partial range compares unsigned bits: top nibble 0xF is not < 0.
        rig.run(Micro::Test {
            register: acc,
            start: 0,
            num_bits: 4,
            comparison: Comparison::Less,
            value: 0,
            omission: 2,
        })
        .unwrap();
        assert_eq!(rig.control.micro_index(), 5);

        rig.run(Micro::Branch { amount: -3 }).unwrap();
        assert_eq!(rig.control.micro_index(), 1);
    }

    #[test]
    fn decode_matches_top_bits() {
        let mut rig = Rig::new();
        let ir = rig.modules.add_register(Register::new("ir", 16));
        rig.instructions = vec![
            MachineInstruction::new("a", 1, vec![Field::new("op", 4), Field::new("x", 12)]),
            MachineInstruction::new(
                "b",
                0x25,
                vec![Field::new("op", 8), Field::new("x", 8).with_type(FieldType::Ignored)],
            ),
        ];
        rig.modules[ir].set_value(0x25_00).unwrap();
        rig.run(Micro::Decode { ir }).unwrap();
        assert_eq!(
            rig.control.current(),
            CurrentInstruction::Instruction(InstructionId(1))
        );
        rig.modules[ir].set_value(0x1F_FF).unwrap();
        rig.run(Micro::Decode { ir }).unwrap();
        assert_eq!(
            rig.control.current(),
            CurrentInstruction::Instruction(InstructionId(0))
        );
        rig.modules[ir].set_value(0xF0_00_u16 as i16 as i64).unwrap();
        assert!(matches!(
            rig.run(Micro::Decode { ir }),
            Err(ExecutionError::UnknownOpcode { .. })
        ));
    }

    #[test]
    fn memory_access_moves_whole_register() {
        let mut rig = Rig::new();
        let ram = rig.modules.add_ram(Ram::new("main", 8, 8));
        let mdr = rig.modules.add_register(Register::new("mdr", 16));
        let mar = rig.modules.add_register(Register::new("mar", 3));
        rig.modules[mdr].set_value(0x1234).unwrap();
        rig.modules[mar].set_value(6).unwrap();
        rig.run(Micro::MemoryAccess {
            direction: MemoryDirection::Write,
            ram,
            data: mdr,
            address: mar,
        })
        .unwrap();
        assert_eq!(rig.modules[ram].cell(6), Some(0x12));
        assert_eq!(rig.modules[ram].cell(7), Some(0x34));

        rig.modules[mdr].set_value(0).unwrap();
        rig.run(Micro::MemoryAccess {
            direction: MemoryDirection::Read,
            ram,
            data: mdr,
            address: mar,
        })
        .unwrap();
        assert_eq!(rig.modules[mdr].value(), 0x1234);

        rig.modules[mar].set_value(7).unwrap();
        assert!(matches!(
            rig.run(Micro::MemoryAccess {
                direction: MemoryDirection::Read,
                ram,
                data: mdr,
                address: mar,
            }),
            Err(ExecutionError::AddressOutOfRange { .. })
        ));
    }

    #[test]
    fn io_reads_and_writes_channels() {
        let mut rig = Rig::new();
        let buffer = rig.modules.add_register(Register::new("buf", 8));
        let channel = BufferChannel::new("300 42 Z");
        let output = channel.output();
        rig.channels.insert("console".into(), Box::new(channel));
        let io = |kind, direction| Micro::Io {
            kind,
            direction,
            buffer,
            channel: "console".into(),
        };
        assert!(matches!(
            rig.run(io(IoKind::Integer, IoDirection::Input)),
            Err(ExecutionError::ValueOutOfRange { value: 300, .. })
        ));
        rig.run(io(IoKind::Integer, IoDirection::Input)).unwrap();
        assert_eq!(rig.modules[buffer].value(), 42);
        rig.run(io(IoKind::Integer, IoDirection::Output)).unwrap();
        rig.run(io(IoKind::Ascii, IoDirection::Input)).unwrap();
        rig.run(io(IoKind::Ascii, IoDirection::Input)).unwrap();
        assert_eq!(rig.modules[buffer].value(), i64::from(b'Z'));
        rig.run(io(IoKind::Ascii, IoDirection::Output)).unwrap();
        assert_eq!(output.lock().unwrap().as_str(), "42\nZ");

        let missing = Micro::Io {
            kind: IoKind::Integer,
            direction: IoDirection::Output,
            buffer,
            channel: "printer".into(),
        };
        assert!(matches!(
            rig.run(missing),
            Err(ExecutionError::MissingChannel(name)) if name == "printer"
        ));
    }

    #[test]
    fn end_returns_to_fetch() {
        let mut rig = Rig::new();
        rig.control
            .set_current(CurrentInstruction::Instruction(InstructionId(0)));
        rig.control.set_micro_index(4);
        rig.run(Micro::End).unwrap();
        assert!(rig.control.at_machine_cycle_start());
    }
}

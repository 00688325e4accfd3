//! Bit-exact code generation (pass 2).
//!
//! Fields are concatenated in instruction order starting with the opcode, so
//! bit 0 of an instruction is the most significant bit of its opcode. The
//! combined bits are sign-extended from the instruction's total width.

use sim_core::bits::{fits_either, fits_signed, fits_unsigned, mask, narrow, sign_extend, unsigned_bits};
use sim_core::{Field, LoadRecord, MachineInstruction};

use crate::errors::{AssemblyError, AssemblyErrorKind};
use crate::normalizer::{Body, NormalizedStatement, Operand};

/// One emitted word with its listing context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledInstruction {
    /// Cell address.
    pub address: u64,
    /// Encoded value, sign-extended from `num_bits`.
    pub value: i64,
    /// Width in bits.
    pub num_bits: u32,
    /// Source line number.
    pub line: usize,
    /// Source line text.
    pub source: String,
    /// Comment text.
    pub comment: String,
}

impl AssembledInstruction {
    /// The value as unsigned bits, for hex listings.
    #[must_use]
    pub const fn bits(&self) -> u64 {
        unsigned_bits(self.value, self.num_bits)
    }

    /// Converts into a record for [`sim_core::Machine::load_program`].
    #[must_use]
    pub const fn load_record(&self) -> LoadRecord {
        LoadRecord {
            address: self.address,
            value: self.value,
            num_bits: self.num_bits,
        }
    }
}

/// Encodes a normalized statement into zero or more words.
///
/// Data values advance the address by `value_bits / cell_size` cells each.
///
/// # Errors
///
/// Returns [`AssemblyErrorKind::Value`] when an operand does not fit its
/// field or a data value does not fit its cells.
pub fn encode_statement(
    normalized: &NormalizedStatement<'_>,
    cell_size: u32,
) -> Result<Vec<AssembledInstruction>, AssemblyError> {
    let statement = &normalized.statement;
    let word = |address: u64, value: i64, num_bits: u32| AssembledInstruction {
        address,
        value,
        num_bits,
        line: statement.head.line,
        source: statement.source.clone(),
        comment: statement.comment.clone(),
    };

    match &normalized.body {
        Body::Instruction {
            instruction,
            operands,
        } => {
            let value = encode_instruction(instruction, operands)?;
            Ok(vec![word(normalized.address, value, instruction.num_bits())])
        }
        Body::Data { value_bits, values } => {
            let cells_per_value = u64::from(*value_bits / cell_size.max(1));
            let mut address = normalized.address;
            let mut words = Vec::with_capacity(values.len());
            for operand in values {
                if !fits_either(operand.value, *value_bits) {
                    return Err(operand.token.error(AssemblyErrorKind::Value(format!(
                        "{} does not fit in {value_bits} bits",
                        operand.value
                    ))));
                }
                words.push(word(address, narrow(operand.value, *value_bits), *value_bits));
                address += cells_per_value;
            }
            Ok(words)
        }
        Body::Empty => Ok(Vec::new()),
    }
}

/// Combines the opcode and operands of one instruction.
///
/// `operands` is aligned with `padded_assembly_tags`; fields without an
/// operand encode their default.
///
/// # Errors
///
/// Returns [`AssemblyErrorKind::Value`] for an operand outside its field's
/// signed or unsigned range.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_instruction(
    instruction: &MachineInstruction,
    operands: &[Option<Operand>],
) -> Result<i64, AssemblyError> {
    let opcode_width = instruction.opcode_width();
    let mut acc = u128::from(instruction.opcode() & mask(opcode_width));
    let mut total = opcode_width;

    let order = instruction.relative_order_of_fields();
    for (slot, index) in instruction.instruction_fields().iter().skip(1).zip(order) {
        let field = &slot.field;
        let width = field.num_bits();
        if width == 0 {
            continue;
        }
        let operand = index.and_then(|i| operands.get(i)).and_then(Option::as_ref);
        let value = match operand {
            Some(operand) => {
                check_range(field, operand)?;
                operand.value
            }
            None => i128::from(field.default_value()),
        };
        acc = (acc << width) | u128::from(unsigned_bits(narrow(value, width), width));
        total += width;
    }

    Ok(sign_extend(acc as u64, total))
}

fn check_range(field: &Field, operand: &Operand) -> Result<(), AssemblyError> {
    let width = field.num_bits();
    let (fits, kind) = if field.is_signed() {
        (fits_signed(operand.value, width), "signed")
    } else {
        (fits_unsigned(operand.value, width), "unsigned")
    };
    if fits {
        return Ok(());
    }
    let (low, high) = field.range();
    Err(operand.token.error(AssemblyErrorKind::Value(format!(
        "{} does not fit the {width}-bit {kind} field `{}` ({low}..={high})",
        operand.value,
        field.name()
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Statement, StatementKind};
    use crate::scanner::{Origin, Token, TokenKind};
    use rstest::rstest;
    use sim_core::{accumulator_machine, FieldType};
    use std::path::PathBuf;
    use std::rc::Rc;

    fn token(text: &str) -> Token {
        Token {
            kind: TokenKind::Symbol,
            text: text.to_string(),
            line: 3,
            column: 5,
            scope: 0,
            origin: Rc::new(Origin {
                file: PathBuf::from("main.asm"),
                include_chain: Vec::new(),
            }),
        }
    }

    fn operand(value: i128) -> Option<Operand> {
        Some(Operand {
            value,
            token: token("x"),
        })
    }

    fn normalized(body: Body<'_>, address: u64) -> NormalizedStatement<'_> {
        NormalizedStatement {
            statement: Statement {
                labels: Vec::new(),
                kind: StatementKind::Data,
                head: token("data"),
                operands: Vec::new(),
                source: ".data".to_string(),
                comment: "table".to_string(),
            },
            address,
            body,
        }
    }

    fn instruction(name: &str) -> MachineInstruction {
        accumulator_machine()
            .instructions
            .into_iter()
            .find(|instruction| instruction.name() == name)
            .unwrap()
    }

    #[test]
    fn opcode_occupies_the_high_bits() {
        let load = instruction("load");
        assert_eq!(encode_instruction(&load, &[operand(0x014)]).unwrap(), 0x1014);
    }

    #[test]
    fn result_is_sign_extended_from_the_total_width() {
        let input = instruction("in");
        let value = encode_instruction(&input, &[None]).unwrap();
        assert_eq!(value, -0x8000);
        assert_eq!(unsigned_bits(value, 16), 0x8000);

        let br = instruction("br");
        assert_eq!(encode_instruction(&br, &[operand(-4)]).unwrap(), -0x6004);
    }

    #[test]
    fn missing_operands_use_defaults() {
        let halt = instruction("halt");
        assert_eq!(encode_instruction(&halt, &[None]).unwrap(), 0);

        let with_default = MachineInstruction::new(
            "pad",
            0xA,
            vec![
                Field::new("op", 4),
                Field::new("fill", 4).with_type(FieldType::Ignored).with_default(0x5),
                Field::new("imm", 8),
            ],
        );
        assert_eq!(
            unsigned_bits(encode_instruction(&with_default, &[None, operand(0x7F)]).unwrap(), 16),
            0xA57F
        );
    }

    #[test]
    fn operands_follow_the_binary_order() {
        let swapped = MachineInstruction::new(
            "swap",
            1,
            vec![Field::new("op", 4), Field::new("a", 4), Field::new("b", 8)],
        )
        .with_assembly_order(&[0, 2, 1])
        .unwrap();
        let value = encode_instruction(&swapped, &[operand(0xBC), operand(0xA)]).unwrap();
        assert_eq!(unsigned_bits(value, 16), 0x1ABC);
    }

    #[rstest]
    #[case::unsigned_max("addr", 4095, true)]
    #[case::unsigned_over("addr", 4096, false)]
    #[case::unsigned_negative("addr", -1, false)]
    #[case::signed_min("offset", -2048, true)]
    #[case::signed_max("offset", 2047, true)]
    #[case::signed_over("offset", 2048, false)]
    fn field_range_checks(#[case] kind: &str, #[case] value: i128, #[case] ok: bool) {
        let name = if kind == "addr" { "load" } else { "br" };
        let result = encode_instruction(&instruction(name), &[operand(value)]);
        assert_eq!(result.is_ok(), ok, "{result:?}");
        if let Err(err) = result {
            assert!(matches!(err.kind, AssemblyErrorKind::Value(_)));
            assert_eq!(err.location.unwrap().column, 5);
        }
    }

    #[test]
    fn data_values_advance_by_their_cell_count() {
        let body = Body::Data {
            value_bits: 16,
            values: vec![operand(-1).unwrap(), operand(0xFFFF).unwrap(), operand(7).unwrap()],
        };
        let words = encode_statement(&normalized(body, 0x20), 8).unwrap();
        let summary: Vec<(u64, i64, u64)> = words
            .iter()
            .map(|word| (word.address, word.value, word.bits()))
            .collect();
        assert_eq!(
            summary,
            vec![(0x20, -1, 0xFFFF), (0x22, -1, 0xFFFF), (0x24, 7, 7)]
        );
        assert_eq!(words[0].comment, "table");
        assert_eq!(words[0].line, 3);
        assert_eq!(
            words[2].load_record(),
            LoadRecord {
                address: 0x24,
                value: 7,
                num_bits: 16
            }
        );
    }

    #[rstest]
    #[case(-128, true)]
    #[case(255, true)]
    #[case(256, false)]
    #[case(-129, false)]
    fn data_values_accept_either_signedness(#[case] value: i128, #[case] ok: bool) {
        let body = Body::Data {
            value_bits: 8,
            values: vec![operand(value).unwrap()],
        };
        assert_eq!(encode_statement(&normalized(body, 0), 8).is_ok(), ok);
    }

    #[test]
    fn empty_statement_emits_nothing() {
        assert!(encode_statement(&normalized(Body::Empty, 4), 8).unwrap().is_empty());
    }
}

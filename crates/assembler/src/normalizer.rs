//! Operand alignment and resolution.
//!
//! Normalizing a program:
//!
//! 1. matches each instruction's operand tokens against its assembly fields,
//!    filling omitted optional and zero-width fields,
//! 2. sizes every statement and assigns label addresses ([`crate::symbols`]),
//! 3. replaces field-value names, EQUs, and labels with numbers, applying
//!    pc-relative adjustment where the field asks for it.
//!
//! The result lists operands in padded assembly order, ready for the code
//! generator to pick up through `relative_order_of_fields`.

use std::collections::HashMap;

use log::debug;
use sim_core::{CorrelationTag, Field, FieldType, MachineInstruction, Relativity};

use crate::assembler::InstructionSet;
use crate::errors::{AssemblyError, AssemblyErrorKind};
use crate::parser::{Program, Statement, StatementKind};
use crate::scanner::{Token, TokenKind};
use crate::symbols::{assign_addresses, LabelTable};

/// A resolved operand and the token it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    /// Resolved value, not yet range-checked.
    pub value: i128,
    /// Token for error reporting.
    pub token: Token,
}

/// What a normalized statement encodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body<'a> {
    /// A machine instruction. `operands[i]` belongs to the i-th padded
    /// assembly tag; `None` means "use the field default".
    Instruction {
        /// The instruction being encoded.
        instruction: &'a MachineInstruction,
        /// Operands aligned with `padded_assembly_tags`.
        operands: Vec<Option<Operand>>,
    },
    /// Consecutive values of `value_bits` each, from `.data` or `.ascii`.
    Data {
        /// Width of every value.
        value_bits: u32,
        /// Values in address order.
        values: Vec<Operand>,
    },
    /// Nothing to emit.
    Empty,
}

/// A statement with its address and resolved operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedStatement<'a> {
    /// The parsed statement.
    pub statement: Statement,
    /// Cell address.
    pub address: u64,
    /// Encoding.
    pub body: Body<'a>,
}

enum Shape<'a> {
    Instruction {
        instruction: &'a MachineInstruction,
        aligned: Vec<Option<Token>>,
    },
    Data {
        value_bits: u32,
        values: Vec<Token>,
    },
    Ascii {
        value_bits: u32,
        codes: Vec<i128>,
        token: Token,
    },
    Empty,
}

struct Sized<'a> {
    shape: Shape<'a>,
    num_bits: u64,
}

/// Aligns, sizes, and resolves every statement of `program`.
///
/// # Errors
///
/// Returns the first alignment, sizing, label, or resolution error.
pub fn normalize<'a>(
    program: Program,
    isa: &InstructionSet<'a>,
) -> Result<Vec<NormalizedStatement<'a>>, AssemblyError> {
    let config = isa.config();
    let cell_size = config.cell_size.max(1);

    let sized = program
        .statements
        .iter()
        .map(|statement| size_statement(statement, isa, &program.equs))
        .collect::<Result<Vec<_>, _>>()?;
    let lengths: Vec<u64> = sized.iter().map(|item| item.num_bits).collect();

    let assignment = assign_addresses(
        &program.statements,
        &lengths,
        config.load_address,
        cell_size,
        program.globals,
        &program.equs,
    )?;
    debug!(
        "pass 1 assigned {} statements, {} labels",
        assignment.addresses.len(),
        assignment.labels.len()
    );

    let resolver = Resolver {
        equs: &program.equs,
        labels: &assignment.labels,
    };
    program
        .statements
        .into_iter()
        .zip(sized)
        .zip(assignment.addresses)
        .map(|((statement, item), address)| -> Result<_, AssemblyError> {
            let length = item.num_bits / u64::from(cell_size);
            let body = resolver.resolve_shape(item.shape, &statement.head, address, length)?;
            Ok(NormalizedStatement {
                statement,
                address,
                body,
            })
        })
        .collect()
}

fn size_statement<'a>(
    statement: &Statement,
    isa: &InstructionSet<'a>,
    equs: &HashMap<String, i128>,
) -> Result<Sized<'a>, AssemblyError> {
    let cell_size = u64::from(isa.config().cell_size.max(1));
    match statement.kind {
        StatementKind::Instruction => {
            let head = &statement.head;
            let instruction = isa.instruction(&head.text).ok_or_else(|| {
                head.error(AssemblyErrorKind::Syntax(format!(
                    "unknown instruction `{}`",
                    head.text
                )))
            })?;
            let num_bits = u64::from(instruction.num_bits());
            if num_bits % cell_size != 0 {
                return Err(head.error(AssemblyErrorKind::Type(format!(
                    "`{}` is {num_bits} bits long, not a multiple of the {cell_size}-bit cell",
                    head.text
                ))));
            }
            let aligned = align_operands(instruction, &statement.operands).ok_or_else(|| {
                head.error(AssemblyErrorKind::InvalidOperand(format!(
                    "operands do not match `{}`",
                    operand_syntax(instruction)
                )))
            })?;
            Ok(Sized {
                shape: Shape::Instruction {
                    instruction,
                    aligned,
                },
                num_bits,
            })
        }
        StatementKind::Data => size_data(statement, cell_size, equs),
        StatementKind::Ascii => {
            let [token] = statement.operands.as_slice() else {
                return Err(statement.head.error(AssemblyErrorKind::Syntax(
                    "`.ascii` takes one quoted string".into(),
                )));
            };
            let TokenKind::Str(text) = &token.kind else {
                return Err(token.error(AssemblyErrorKind::Syntax(format!(
                    "`.ascii` takes a quoted string, found {}",
                    token.describe()
                ))));
            };
            let codes: Vec<i128> = text.chars().map(|c| i128::from(u32::from(c))).collect();
            let num_bits = codes.len() as u64 * cell_size;
            Ok(Sized {
                shape: Shape::Ascii {
                    value_bits: isa.config().cell_size.max(1),
                    codes,
                    token: token.clone(),
                },
                num_bits,
            })
        }
        StatementKind::LabelsOnly => Ok(Sized {
            shape: Shape::Empty,
            num_bits: 0,
        }),
    }
}

fn size_data<'a>(
    statement: &Statement,
    cell_size: u64,
    equs: &HashMap<String, i128>,
) -> Result<Sized<'a>, AssemblyError> {
    let cell_count = |token: &Token| -> Result<u64, AssemblyError> {
        let value = match &token.kind {
            TokenKind::Constant(value) => Some(*value),
            TokenKind::Symbol => equs.get(&token.text).copied(),
            _ => None,
        };
        let value = value.ok_or_else(|| {
            token.error(AssemblyErrorKind::Syntax(format!(
                "expected a cell count, found {}",
                token.describe()
            )))
        })?;
        u64::try_from(value)
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| {
                token.error(AssemblyErrorKind::Value(format!(
                    "cell count {value} must be positive"
                )))
            })
    };

    let (cells, per_value, values) = match statement.operands.as_slice() {
        [count, value] if is_operand(value) => {
            let cells = cell_count(count)?;
            (cells, cells, vec![value.clone()])
        }
        [count, size, open, list @ .., close]
            if open.kind == TokenKind::Punct('[') && close.kind == TokenKind::Punct(']') =>
        {
            let cells = cell_count(count)?;
            let per_value = cell_count(size)?;
            let mut values = Vec::new();
            for token in list {
                if is_operand(token) {
                    values.push(token.clone());
                } else if token.kind != TokenKind::Punct(',') {
                    return Err(token.error(AssemblyErrorKind::Syntax(format!(
                        "expected a value, found {}",
                        token.describe()
                    ))));
                }
            }
            if cells % per_value != 0 || cells / per_value != values.len() as u64 {
                return Err(count.error(AssemblyErrorKind::Value(format!(
                    "{cells} cells do not hold {} values of {per_value} cells",
                    values.len()
                ))));
            }
            (cells, per_value, values)
        }
        _ => {
            return Err(statement.head.error(AssemblyErrorKind::Syntax(
                "`.data` expects `n value` or `n m [values]`".into(),
            )));
        }
    };

    let value_bits = per_value
        .checked_mul(cell_size)
        .and_then(|bits| u32::try_from(bits).ok())
        .filter(|bits| *bits <= 64)
        .ok_or_else(|| {
            statement.head.error(AssemblyErrorKind::Value(format!(
                "{per_value} cells are wider than 64 bits"
            )))
        })?;
    Ok(Sized {
        shape: Shape::Data { value_bits, values },
        num_bits: cells * cell_size,
    })
}

const fn is_operand(token: &Token) -> bool {
    !matches!(
        token.kind,
        TokenKind::Punct(_) | TokenKind::Eol | TokenKind::Eof
    )
}

/// Matches operand tokens to the instruction's positive-width assembly fields.
///
/// The first attempt assumes optional operands were written; if the tokens do
/// not fit, the second assumes they were left out.
fn align_operands(
    instruction: &MachineInstruction,
    operands: &[Token],
) -> Option<Vec<Option<Token>>> {
    let mut by_tag = align_with(instruction, operands, true)
        .or_else(|| align_with(instruction, operands, false))?;
    Some(
        instruction
            .padded_assembly_tags()
            .iter()
            .map(|tag| by_tag.remove(tag))
            .collect(),
    )
}

fn align_with(
    instruction: &MachineInstruction,
    operands: &[Token],
    optional_supplied: bool,
) -> Option<HashMap<CorrelationTag, Token>> {
    let mut by_tag = HashMap::new();
    let mut rest = operands.iter().peekable();
    for slot in instruction.assembly_fields().iter().skip(1) {
        let field = &slot.field;
        if field.num_bits() == 0 {
            if rest.peek().is_some_and(|token| token.text == field.name()) {
                rest.next();
            }
            continue;
        }
        let optional = match field.field_type() {
            FieldType::Ignored => continue,
            FieldType::Optional => true,
            FieldType::Required => false,
        };
        if optional && !optional_supplied {
            continue;
        }
        match rest.peek() {
            Some(token) if is_operand(token) => {
                by_tag.insert(slot.tag, (*token).clone());
                rest.next();
            }
            _ if optional => {}
            _ => return None,
        }
    }
    rest.next().is_none().then_some(by_tag)
}

/// Operand text layout for messages, e.g. `load addr` or `mov dst , src`.
fn operand_syntax(instruction: &MachineInstruction) -> String {
    let mut parts = vec![instruction.name().to_string()];
    for slot in instruction.assembly_fields().iter().skip(1) {
        let field = &slot.field;
        match field.field_type() {
            FieldType::Ignored => {}
            FieldType::Optional if field.num_bits() > 0 => parts.push(format!("[{}]", field.name())),
            _ => parts.push(field.name().to_string()),
        }
    }
    parts.join(" ")
}

struct Resolver<'p> {
    equs: &'p HashMap<String, i128>,
    labels: &'p LabelTable,
}

impl Resolver<'_> {
    fn resolve_shape<'a>(
        &self,
        shape: Shape<'a>,
        head: &Token,
        address: u64,
        length: u64,
    ) -> Result<Body<'a>, AssemblyError> {
        match shape {
            Shape::Instruction {
                instruction,
                aligned,
            } => {
                let fields =
                    fields_for_tags(instruction, &instruction.padded_assembly_tags(), head)?;
                let operands = aligned
                    .into_iter()
                    .enumerate()
                    .map(|(index, token)| {
                        token
                            .map(|token| -> Result<Operand, AssemblyError> {
                                let field = fields.get(index).copied();
                                let value = self.resolve(&token, field, address, length)?;
                                check_allowed(field, value, &token)?;
                                Ok(Operand { value, token })
                            })
                            .transpose()
                    })
                    .collect::<Result<_, AssemblyError>>()?;
                Ok(Body::Instruction {
                    instruction,
                    operands,
                })
            }
            Shape::Data { value_bits, values } => {
                let values = values
                    .into_iter()
                    .map(|token| -> Result<Operand, AssemblyError> {
                        let value = self.resolve(&token, None, address, length)?;
                        Ok(Operand { value, token })
                    })
                    .collect::<Result<_, AssemblyError>>()?;
                Ok(Body::Data { value_bits, values })
            }
            Shape::Ascii {
                value_bits,
                codes,
                token,
            } => Ok(Body::Data {
                value_bits,
                values: codes
                    .into_iter()
                    .map(|value| Operand {
                        value,
                        token: token.clone(),
                    })
                    .collect(),
            }),
            Shape::Empty => Ok(Body::Empty),
        }
    }

    fn resolve(
        &self,
        token: &Token,
        field: Option<&Field>,
        address: u64,
        length: u64,
    ) -> Result<i128, AssemblyError> {
        match &token.kind {
            TokenKind::Constant(value) => Ok(*value),
            TokenKind::Symbol => {
                if let Some(value) = field.and_then(|field| field.value_named(&token.text)) {
                    return Ok(i128::from(value));
                }
                if let Some(value) = self.equs.get(&token.text) {
                    return Ok(*value);
                }
                let symbol = self.labels.lookup(token).ok_or_else(|| {
                    token.error(AssemblyErrorKind::UndefinedOperand(format!(
                        "`{}` is not a field value, EQU, or visible label",
                        token.text
                    )))
                })?;
                let target = i128::from(symbol.address);
                let here = i128::from(address);
                Ok(match field.map_or(Relativity::Absolute, Field::relativity) {
                    Relativity::Absolute => target,
                    Relativity::PcRelativePreIncr => target - here,
                    Relativity::PcRelativePostIncr => target - (here + i128::from(length)),
                })
            }
            _ => Err(token.error(AssemblyErrorKind::Type(format!(
                "expected a number or name, found {}",
                token.describe()
            )))),
        }
    }
}

fn fields_for_tags<'a>(
    instruction: &'a MachineInstruction,
    tags: &[CorrelationTag],
    head: &Token,
) -> Result<Vec<&'a Field>, AssemblyError> {
    tags.iter()
        .map(|tag| {
            field_for_tag(instruction, *tag).ok_or_else(|| {
                head.error(AssemblyErrorKind::Type(format!(
                    "`{}` has no field with correlation tag {}",
                    instruction.name(),
                    tag.0
                )))
            })
        })
        .collect()
}

fn field_for_tag(instruction: &MachineInstruction, tag: CorrelationTag) -> Option<&Field> {
    instruction
        .instruction_fields()
        .iter()
        .chain(instruction.assembly_fields())
        .find(|slot| slot.tag == tag)
        .map(|slot| &slot.field)
}

fn check_allowed(field: Option<&Field>, value: i128, token: &Token) -> Result<(), AssemblyError> {
    let Some(field) = field else {
        return Ok(());
    };
    let allowed = field.values();
    if allowed.is_empty() || allowed.iter().any(|v| i128::from(v.value) == value) {
        return Ok(());
    }
    let names: Vec<&str> = allowed.iter().map(|v| v.name.as_str()).collect();
    Err(token.error(AssemblyErrorKind::InvalidOperand(format!(
        "`{}` is not one of {} for field `{}`",
        token.text,
        names.join(", "),
        field.name()
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::AssemblerConfig;
    use crate::parser::Parser;
    use sim_core::accumulator_machine;
    use std::path::Path;

    fn normalize_text(
        instructions: &[MachineInstruction],
        text: &str,
    ) -> Result<Vec<(u64, Vec<Option<i128>>)>, AssemblyError> {
        let isa = InstructionSet::new(instructions, &[], AssemblerConfig::default());
        let program = Parser::new(&isa).parse(Path::new("main.asm"), text)?;
        Ok(normalize(program, &isa)?
            .into_iter()
            .map(|item| {
                let values = match item.body {
                    Body::Instruction { operands, .. } => operands
                        .into_iter()
                        .map(|operand| operand.map(|op| op.value))
                        .collect(),
                    Body::Data { values, .. } => values.into_iter().map(|op| Some(op.value)).collect(),
                    Body::Empty => Vec::new(),
                };
                (item.address, values)
            })
            .collect())
    }

    fn sample(text: &str) -> Result<Vec<(u64, Vec<Option<i128>>)>, AssemblyError> {
        normalize_text(&accumulator_machine().instructions, text)
    }

    fn move_instruction() -> MachineInstruction {
        MachineInstruction::new(
            "mov",
            1,
            vec![
                Field::new("op", 4),
                Field::new("dst", 2).with_value("r0", 0).with_value("r1", 1).with_value("r2", 2),
                Field::new("src", 2).with_value("r0", 0).with_value("r1", 1).with_value("r2", 2),
                Field::new("imm", 8).with_type(FieldType::Optional).with_default(5),
            ],
        )
        .with_syntax_field(2, Field::new(",", 0))
    }

    #[test]
    fn labels_resolve_forward_and_backward() {
        let items = sample("start: load value\n jmp start\nvalue: .data 2 7\n").unwrap();
        assert_eq!(items[0], (0, vec![Some(4)]));
        assert_eq!(items[1], (2, vec![Some(0)]));
        assert_eq!(items[2], (4, vec![Some(7)]));
    }

    #[test]
    fn ignored_fields_pad_with_default() {
        let items = sample("halt\n").unwrap();
        assert_eq!(items[0].1, vec![None]);
    }

    #[test]
    fn post_increment_offsets_are_relative_to_the_next_instruction() {
        let items = sample("back: halt\n br back\n br ahead\n halt\nahead: halt\n").unwrap();
        assert_eq!(items[1].1, vec![Some(-4)]);
        assert_eq!(items[2].1, vec![Some(2)]);
    }

    #[test]
    fn pre_increment_offsets_are_relative_to_the_current_instruction() {
        let skip = MachineInstruction::new(
            "skip",
            2,
            vec![
                Field::new("op", 4),
                Field::new("to", 12)
                    .signed(true)
                    .with_relativity(Relativity::PcRelativePreIncr),
            ],
        );
        let items = normalize_text(&[skip], "skip there\nskip there\nthere: skip there\n").unwrap();
        assert_eq!(items[0].1, vec![Some(4)]);
        assert_eq!(items[2].1, vec![Some(0)]);
    }

    #[test]
    fn unknown_correlation_tag_is_a_type_error() {
        let instruction = move_instruction();
        let instructions = [instruction.clone()];
        let isa = InstructionSet::new(&instructions, &[], AssemblerConfig::default());
        let program = Parser::new(&isa)
            .parse(Path::new("main.asm"), "mov r0, r1\n")
            .unwrap();
        let head = &program.statements[0].head;

        let names: Vec<&str> =
            fields_for_tags(&instruction, &instruction.padded_assembly_tags(), head)
                .unwrap()
                .into_iter()
                .map(Field::name)
                .collect();
        assert_eq!(names, vec!["dst", "src", "imm"]);

        let err = fields_for_tags(&instruction, &[CorrelationTag(99)], head).unwrap_err();
        assert!(matches!(err.kind, AssemblyErrorKind::Type(_)));
        assert_eq!(err.location.unwrap().line, 1);
    }

    #[test]
    fn syntax_fields_and_optional_operands() {
        let instructions = [move_instruction()];
        let items = normalize_text(&instructions, "mov r1, r2 9\nmov r0 , r1\n").unwrap();
        assert_eq!(items[0].1, vec![Some(1), Some(2), Some(9)]);
        assert_eq!(items[1].1, vec![Some(0), Some(1), None]);
    }

    #[test]
    fn disallowed_field_value_is_invalid() {
        let instructions = [move_instruction()];
        let err = normalize_text(&instructions, "mov r1, 3\n").unwrap_err();
        assert!(matches!(err.kind, AssemblyErrorKind::InvalidOperand(_)));
    }

    #[test]
    fn wrong_operand_count_is_invalid() {
        for text in ["load\n", "load 1 2\n", "halt 4\n", "load ,\n"] {
            let err = sample(text).unwrap_err();
            assert!(
                matches!(err.kind, AssemblyErrorKind::InvalidOperand(_)),
                "{text:?} gave {err}"
            );
        }
    }

    #[test]
    fn undefined_and_mistyped_operands() {
        assert!(matches!(
            sample("load nowhere\n").unwrap_err().kind,
            AssemblyErrorKind::UndefinedOperand(_)
        ));
        assert!(matches!(
            sample("load \"text\"\n").unwrap_err().kind,
            AssemblyErrorKind::Type(_)
        ));
    }

    #[test]
    fn equs_take_part_in_resolution() {
        let items = sample("base EQU 0x20\nload base\n").unwrap();
        assert_eq!(items[0].1, vec![Some(0x20)]);
    }

    #[test]
    fn data_lists_and_ascii_take_cells() {
        let items = sample("a: .data 4 2 [1, -2]\nb: .ascii \"hi\"\nc: .data 1 b\n").unwrap();
        assert_eq!(items[0], (0, vec![Some(1), Some(-2)]));
        assert_eq!(items[1], (4, vec![Some(104), Some(105)]));
        assert_eq!(items[2], (6, vec![Some(4)]));
    }

    #[test]
    fn data_shape_errors() {
        assert!(matches!(
            sample(".data 4 2 [1]\n").unwrap_err().kind,
            AssemblyErrorKind::Value(_)
        ));
        assert!(matches!(
            sample(".data 3 2 [1]\n").unwrap_err().kind,
            AssemblyErrorKind::Value(_)
        ));
        assert!(matches!(
            sample(".data 9 1\n").unwrap_err().kind,
            AssemblyErrorKind::Value(_)
        ));
        assert!(matches!(
            sample(".data 0 1\n").unwrap_err().kind,
            AssemblyErrorKind::Value(_)
        ));
        assert!(matches!(
            sample(".data\n").unwrap_err().kind,
            AssemblyErrorKind::Syntax(_)
        ));
    }

    #[test]
    fn load_address_offsets_labels() {
        let definition = accumulator_machine();
        let config = AssemblerConfig {
            load_address: 0x40,
            ..AssemblerConfig::default()
        };
        let isa = InstructionSet::new(&definition.instructions, &[], config);
        let program = Parser::new(&isa)
            .parse(Path::new("main.asm"), "halt\nhere: jmp here\n")
            .unwrap();
        let items = normalize(program, &isa).unwrap();
        assert_eq!(items[1].address, 0x42);
        let Body::Instruction { operands, .. } = &items[1].body else {
            panic!("expected an instruction");
        };
        assert_eq!(operands[0].as_ref().unwrap().value, 0x42);
    }
}

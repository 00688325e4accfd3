//! Machine instructions and the correlation between their two field orderings.
//!
//! An instruction's binary layout (`instruction_fields`) and its operand text
//! (`assembly_fields`) list the same logical fields in possibly different
//! orders. Ignored fields only exist in the binary layout, and zero-width
//! syntax fields may only exist in the text. Every field occurrence carries a
//! [`CorrelationTag`] so the two lists can be matched without relying on field
//! names, which may repeat.

use std::collections::HashSet;

use crate::bits::{extract, MAX_WIDTH};
use crate::field::{Field, FieldType};
use crate::micro::MicroId;
use crate::ValidationError;

/// Handle to a [`MachineInstruction`] in a machine's instruction list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct InstructionId(pub usize);

/// Identifier shared by one field occurrence across both orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct CorrelationTag(pub u32);

/// A field occurrence and its correlation tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FieldSlot {
    /// Tag linking this occurrence to its counterpart in the other ordering.
    pub tag: CorrelationTag,
    /// Field descriptor.
    pub field: Field,
}

impl FieldSlot {
    /// Pairs a tag with a field.
    #[must_use]
    pub const fn new(tag: CorrelationTag, field: Field) -> Self {
        Self { tag, field }
    }
}

/// An opcode, its field layouts, and the micros it runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineInstruction {
    name: String,
    opcode: u64,
    instruction_fields: Vec<FieldSlot>,
    assembly_fields: Vec<FieldSlot>,
    micros: Vec<MicroId>,
}

impl MachineInstruction {
    /// Creates an instruction whose operand text follows the binary layout.
    ///
    /// Fields are tagged sequentially; ignored fields are left out of the
    /// assembly ordering. The first field holds the opcode.
    #[must_use]
    pub fn new(name: impl Into<String>, opcode: u64, fields: Vec<Field>) -> Self {
        let instruction_fields: Vec<FieldSlot> = (0_u32..)
            .zip(fields)
            .map(|(tag, field)| FieldSlot::new(CorrelationTag(tag), field))
            .collect();
        let assembly_fields = instruction_fields
            .iter()
            .filter(|slot| slot.field.field_type() != FieldType::Ignored)
            .cloned()
            .collect();
        Self {
            name: name.into(),
            opcode,
            instruction_fields,
            assembly_fields,
            micros: Vec::new(),
        }
    }

    /// Creates the fetch sequence pseudo-instruction.
    #[must_use]
    pub fn fetch_sequence(micros: Vec<MicroId>) -> Self {
        Self {
            name: "Fetch sequence".to_string(),
            opcode: 0,
            instruction_fields: Vec::new(),
            assembly_fields: Vec::new(),
            micros,
        }
    }

    /// Creates an instruction from explicitly tagged layouts.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Instruction`] when the layouts do not
    /// correlate (see [`MachineInstruction::validate`]).
    pub fn from_layout(
        name: impl Into<String>,
        opcode: u64,
        instruction_fields: Vec<FieldSlot>,
        assembly_fields: Vec<FieldSlot>,
    ) -> Result<Self, ValidationError> {
        let instruction = Self {
            name: name.into(),
            opcode,
            instruction_fields,
            assembly_fields,
            micros: Vec::new(),
        };
        instruction.validate()?;
        Ok(instruction)
    }

    /// Reorders the operand text by instruction-field position.
    ///
    /// `order` lists indices into the binary layout; it must start with the
    /// opcode field (index `0`).
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Instruction`] when an index is out of range.
    pub fn with_assembly_order(mut self, order: &[usize]) -> Result<Self, ValidationError> {
        let slots = order
            .iter()
            .map(|&index| {
                self.instruction_fields.get(index).cloned().ok_or_else(|| {
                    ValidationError::instruction(
                        &self.name,
                        format!("assembly position refers to missing field {index}"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.assembly_fields = slots;
        Ok(self)
    }

    /// Inserts a syntax-only field (e.g. a comma) at `position` in the operand text.
    #[must_use]
    pub fn with_syntax_field(mut self, position: usize, field: Field) -> Self {
        let tag = self
            .instruction_fields
            .iter()
            .chain(&self.assembly_fields)
            .map(|slot| slot.tag.0 + 1)
            .max()
            .unwrap_or(0);
        let position = position.min(self.assembly_fields.len());
        self.assembly_fields
            .insert(position, FieldSlot::new(CorrelationTag(tag), field));
        self
    }

    /// Replaces the micro sequence.
    #[must_use]
    pub fn with_micros(mut self, micros: Vec<MicroId>) -> Self {
        self.micros = micros;
        self
    }

    /// Instruction name (the assembly mnemonic).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opcode stored in the first field.
    #[must_use]
    pub const fn opcode(&self) -> u64 {
        self.opcode
    }

    /// Fields in binary layout order.
    #[must_use]
    pub fn instruction_fields(&self) -> &[FieldSlot] {
        &self.instruction_fields
    }

    /// Fields in operand text order.
    #[must_use]
    pub fn assembly_fields(&self) -> &[FieldSlot] {
        &self.assembly_fields
    }

    /// Micro sequence.
    #[must_use]
    pub fn micros(&self) -> &[MicroId] {
        &self.micros
    }

    /// Width of the opcode field.
    #[must_use]
    pub fn opcode_width(&self) -> u32 {
        self.instruction_fields
            .first()
            .map_or(0, |slot| slot.field.num_bits())
    }

    /// Total binary length in bits.
    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.instruction_fields
            .iter()
            .map(|slot| slot.field.num_bits())
            .sum()
    }

    /// Positive-width operand tags in text order, padded with the tags of
    /// binary-only fields at their binary-relative positions. The opcode is
    /// excluded.
    #[must_use]
    pub fn padded_assembly_tags(&self) -> Vec<CorrelationTag> {
        let mut padded: Vec<CorrelationTag> = self
            .assembly_fields
            .iter()
            .skip(1)
            .filter(|slot| slot.field.num_bits() > 0)
            .map(|slot| slot.tag)
            .collect();
        for (position, slot) in self.instruction_fields.iter().skip(1).enumerate() {
            if !padded.contains(&slot.tag) {
                padded.insert(position.min(padded.len()), slot.tag);
            }
        }
        padded
    }

    /// For each non-opcode field in binary order, its index into
    /// [`MachineInstruction::padded_assembly_tags`].
    #[must_use]
    pub fn relative_order_of_fields(&self) -> Vec<Option<usize>> {
        let padded = self.padded_assembly_tags();
        self.instruction_fields
            .iter()
            .skip(1)
            .map(|slot| padded.iter().position(|tag| *tag == slot.tag))
            .collect()
    }

    /// Splits an encoded instruction into its field values in binary order.
    ///
    /// Signed fields are sign-extended; the opcode is returned unsigned.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn field_values(&self, word: i64) -> Vec<i64> {
        let total = self.num_bits();
        let mut start = 0;
        self.instruction_fields
            .iter()
            .map(|slot| {
                let width = slot.field.num_bits();
                let value = if width == 0 {
                    0
                } else {
                    let bits = extract(word, total, start, width, false);
                    if slot.field.is_signed() {
                        crate::bits::sign_extend(bits, width)
                    } else {
                        bits as i64
                    }
                };
                start += width;
                value
            })
            .collect()
    }

    /// Checks opcode width, tag uniqueness, and the correlation of both orderings.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Field`] for an invalid field and
    /// [`ValidationError::Instruction`] for a layout problem.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fail = |reason: String| Err(ValidationError::instruction(&self.name, reason));
        if self.name.trim().is_empty() || self.name.chars().any(char::is_whitespace) {
            return fail(format!("name `{}` must be a single word", self.name));
        }
        let Some(opcode_slot) = self.instruction_fields.first() else {
            return fail("an instruction needs an opcode field".to_string());
        };
        for slot in self.instruction_fields.iter().chain(&self.assembly_fields) {
            slot.field.validate()?;
        }
        let opcode_width = opcode_slot.field.num_bits();
        if opcode_width == 0 || opcode_width > MAX_WIDTH {
            return fail(format!("opcode field width {opcode_width} is outside 1..={MAX_WIDTH}"));
        }
        if opcode_width < MAX_WIDTH && self.opcode >> opcode_width != 0 {
            return fail(format!(
                "opcode {:#x} does not fit the {opcode_width}-bit opcode field",
                self.opcode
            ));
        }
        let total = self.num_bits();
        if total > MAX_WIDTH {
            return fail(format!("{total} bits exceeds the {MAX_WIDTH}-bit limit"));
        }

        let mut seen = HashSet::new();
        if let Some(slot) = self
            .instruction_fields
            .iter()
            .find(|slot| !seen.insert(slot.tag))
        {
            return fail(format!(
                "correlation tag {} is used by more than one field",
                slot.tag.0
            ));
        }
        let mut seen = HashSet::new();
        if let Some(slot) = self.assembly_fields.iter().find(|slot| !seen.insert(slot.tag)) {
            return fail(format!(
                "correlation tag {} appears twice in the operand order",
                slot.tag.0
            ));
        }

        if self.assembly_fields.first().map(|slot| slot.tag) != Some(opcode_slot.tag) {
            return fail("the first operand must be the opcode field".to_string());
        }
        for slot in &self.assembly_fields {
            let counterpart = self
                .instruction_fields
                .iter()
                .find(|candidate| candidate.tag == slot.tag);
            match counterpart {
                Some(counterpart) if counterpart.field != slot.field => {
                    return fail(format!(
                        "field `{}` differs between the two orderings",
                        slot.field.name()
                    ));
                }
                Some(counterpart) if counterpart.field.field_type() == FieldType::Ignored => {
                    return fail(format!(
                        "ignored field `{}` cannot appear in the operand order",
                        slot.field.name()
                    ));
                }
                None if slot.field.num_bits() > 0 => {
                    return fail(format!(
                        "operand `{}` is not part of the binary layout",
                        slot.field.name()
                    ));
                }
                _ => {}
            }
        }
        for slot in &self.instruction_fields {
            let in_text = self.assembly_fields.iter().any(|other| other.tag == slot.tag);
            if slot.field.field_type() != FieldType::Ignored
                && slot.field.num_bits() > 0
                && !in_text
            {
                return fail(format!(
                    "field `{}` is neither ignored nor part of the operand order",
                    slot.field.name()
                ));
            }
        }
        Ok(())
    }
}

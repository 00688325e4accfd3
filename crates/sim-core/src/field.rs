//! Instruction field descriptors.
//!
//! A [`Field`] describes one bit-range of an instruction's binary encoding and,
//! unless it is ignored, one operand position of its assembly text.

use crate::bits::{fits_signed, fits_unsigned, signed_range, unsigned_range, MAX_WIDTH};
use crate::ValidationError;

/// Whether the programmer must, may, or cannot supply a field in assembly text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FieldType {
    /// Operand must appear in the assembly text.
    #[default]
    Required,
    /// Operand may be omitted; the default value is used instead.
    Optional,
    /// Field never appears in assembly text; always encodes the default.
    Ignored,
}

/// How a label operand's address is adjusted before encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Relativity {
    /// The label's address is encoded as-is.
    #[default]
    Absolute,
    /// Encoded relative to the address of the current instruction.
    PcRelativePreIncr,
    /// Encoded relative to the address following the current instruction.
    PcRelativePostIncr,
}

/// A named constant a field may take (e.g. a register name or syntax token).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FieldValue {
    /// Name written in assembly text.
    pub name: String,
    /// Encoded value.
    pub value: i64,
}

/// A bit-field descriptor used by instruction layouts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Field {
    name: String,
    field_type: FieldType,
    num_bits: u32,
    relativity: Relativity,
    signed: bool,
    default_value: i64,
    values: Vec<FieldValue>,
}

impl Field {
    /// Creates a required, unsigned, absolute field with default `0`.
    #[must_use]
    pub fn new(name: impl Into<String>, num_bits: u32) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Required,
            num_bits,
            relativity: Relativity::Absolute,
            signed: false,
            default_value: 0,
            values: Vec::new(),
        }
    }

    /// Sets the field type.
    #[must_use]
    pub const fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    /// Sets the relativity used for label operands.
    #[must_use]
    pub const fn with_relativity(mut self, relativity: Relativity) -> Self {
        self.relativity = relativity;
        self
    }

    /// Marks the field as signed (two's complement) or unsigned.
    #[must_use]
    pub const fn signed(mut self, signed: bool) -> Self {
        self.signed = signed;
        self
    }

    /// Sets the value encoded when the operand is omitted or ignored.
    #[must_use]
    pub const fn with_default(mut self, default_value: i64) -> Self {
        self.default_value = default_value;
        self
    }

    /// Appends a named allowed value.
    #[must_use]
    pub fn with_value(mut self, name: impl Into<String>, value: i64) -> Self {
        self.values.push(FieldValue {
            name: name.into(),
            value,
        });
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Required/optional/ignored classification.
    #[must_use]
    pub const fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Width in bits (may be zero for purely syntactic fields).
    #[must_use]
    pub const fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Label relativity.
    #[must_use]
    pub const fn relativity(&self) -> Relativity {
        self.relativity
    }

    /// Whether the field encodes two's-complement values.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.signed
    }

    /// Value used when the operand is absent.
    #[must_use]
    pub const fn default_value(&self) -> i64 {
        self.default_value
    }

    /// Fixed set of allowed values, empty when any in-range value is accepted.
    #[must_use]
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Looks up an allowed value by its assembly name.
    #[must_use]
    pub fn value_named(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|candidate| candidate.name == name)
            .map(|candidate| candidate.value)
    }

    /// Inclusive numeric range accepted by this field.
    #[must_use]
    pub const fn range(&self) -> (i128, i128) {
        if self.signed {
            signed_range(self.num_bits)
        } else {
            unsigned_range(self.num_bits)
        }
    }

    /// Returns `true` when `value` fits the field's width and signedness.
    #[must_use]
    pub const fn accepts(&self, value: i64) -> bool {
        if self.signed {
            fits_signed(value as i128, self.num_bits)
        } else {
            fits_unsigned(value as i128, self.num_bits)
        }
    }

    /// Checks the field's structural and numeric invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Field`] when the field is wider than 64
    /// bits, is a zero-width ignored field, has a negative unsigned default,
    /// restricts values on a relative or zero-width field, repeats an allowed
    /// value name, or has a default/allowed value outside its range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.num_bits > MAX_WIDTH {
            return Err(ValidationError::field(
                &self.name,
                format!("width {} exceeds {MAX_WIDTH} bits", self.num_bits),
            ));
        }
        if self.num_bits == 0 && self.field_type == FieldType::Ignored {
            return Err(ValidationError::field(
                &self.name,
                "a zero-width field cannot be ignored",
            ));
        }
        if !self.signed && self.default_value < 0 {
            return Err(ValidationError::field(
                &self.name,
                format!(
                    "unsigned field has negative default value {}",
                    self.default_value
                ),
            ));
        }
        if !self.values.is_empty() {
            if self.relativity != Relativity::Absolute {
                return Err(ValidationError::field(
                    &self.name,
                    "a field with fixed values must be absolute",
                ));
            }
            if self.num_bits == 0 {
                return Err(ValidationError::field(
                    &self.name,
                    "a field with fixed values must have a positive width",
                ));
            }
        }
        if !self.accepts(self.default_value) {
            return Err(ValidationError::field(
                &self.name,
                self.out_of_range("default value", self.default_value),
            ));
        }
        for (index, allowed) in self.values.iter().enumerate() {
            if allowed.name.trim().is_empty() {
                return Err(ValidationError::field(
                    &self.name,
                    "allowed value names cannot be blank",
                ));
            }
            if self.values[..index]
                .iter()
                .any(|earlier| earlier.name == allowed.name)
            {
                return Err(ValidationError::field(
                    &self.name,
                    format!("allowed value `{}` is listed twice", allowed.name),
                ));
            }
            if !self.accepts(allowed.value) {
                return Err(ValidationError::field(
                    &self.name,
                    self.out_of_range(&format!("allowed value `{}`", allowed.name), allowed.value),
                ));
            }
        }
        Ok(())
    }

    fn out_of_range(&self, what: &str, value: i64) -> String {
        let (min, max) = self.range();
        format!(
            "{what} {value} does not fit in {} {} bits ({min}..={max})",
            if self.signed { "signed" } else { "unsigned" },
            self.num_bits
        )
    }
}

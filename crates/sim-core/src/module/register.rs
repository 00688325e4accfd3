//! Registers and register arrays.

use log::warn;

use crate::bits::{fits_either, narrow, signed_range, unsigned_bits, unsigned_range, MAX_WIDTH};
use crate::ValidationError;

/// A width-bounded storage register.
///
/// The stored value is always the two's-complement narrowing of whatever was
/// last written, so `value()` lies in the signed range of `width()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Register {
    name: String,
    width: u32,
    value: i64,
    initial_value: i64,
    read_only: bool,
}

impl Register {
    /// Creates a writable register holding `0`.
    #[must_use]
    pub fn new(name: impl Into<String>, width: u32) -> Self {
        Self {
            name: name.into(),
            width,
            value: 0,
            initial_value: 0,
            read_only: false,
        }
    }

    /// Sets the value restored by [`Register::reset`] and loads it now.
    #[must_use]
    pub fn with_initial_value(mut self, initial_value: i64) -> Self {
        self.initial_value = narrow(i128::from(initial_value), self.width.min(MAX_WIDTH));
        self.value = self.initial_value;
        self
    }

    /// Marks the register as read-only for micro-operations.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Register name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width in bits.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Current value, sign-extended from `width()` bits.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.value
    }

    /// Current value as an unsigned `width()`-bit quantity.
    #[must_use]
    pub const fn unsigned_value(&self) -> u64 {
        unsigned_bits(self.value, self.width)
    }

    /// Value loaded by [`Register::reset`].
    #[must_use]
    pub const fn initial_value(&self) -> i64 {
        self.initial_value
    }

    /// Whether micro-operations may write this register.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Changes the width. Narrowing clears the current value to `0`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Module`] when `width` is outside `1..=64`.
    pub fn set_width(&mut self, width: u32) -> Result<(), ValidationError> {
        if !(1..=MAX_WIDTH).contains(&width) {
            return Err(ValidationError::module(
                &self.name,
                format!("width {width} is outside 1..={MAX_WIDTH}"),
            ));
        }
        if width < self.width {
            self.value = 0;
            if !fits_either(i128::from(self.initial_value), width) {
                self.initial_value = 0;
            }
        }
        self.width = width;
        Ok(())
    }

    /// Writes a value directly, bypassing the read-only flag.
    ///
    /// Accepts anything in the signed or unsigned range of the width; unsigned
    /// values above the signed maximum are stored as their negative
    /// two's-complement equivalent.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Module`] when `value` does not fit the width.
    pub fn set_value(&mut self, value: i64) -> Result<(), ValidationError> {
        if !fits_either(i128::from(value), self.width) {
            let (min, _) = signed_range(self.width);
            let (_, max) = unsigned_range(self.width);
            return Err(ValidationError::module(
                &self.name,
                format!(
                    "value {value} does not fit in {} bits ({min}..={max})",
                    self.width
                ),
            ));
        }
        self.value = narrow(i128::from(value), self.width);
        Ok(())
    }

    /// Stores the narrowing of `value`. Writes to read-only registers are dropped.
    pub(crate) fn store(&mut self, value: i128) {
        if self.read_only {
            warn!("ignored write of {value} to read-only register `{}`", self.name);
            return;
        }
        self.value = narrow(value, self.width);
    }

    /// Restores the initial value.
    pub fn reset(&mut self) {
        self.value = self.initial_value;
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::module(&self.name, "name cannot be blank"));
        }
        if !(1..=MAX_WIDTH).contains(&self.width) {
            return Err(ValidationError::module(
                &self.name,
                format!("width {} is outside 1..={MAX_WIDTH}", self.width),
            ));
        }
        Ok(())
    }
}

/// An indexed list of equal-width registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterArray {
    name: String,
    width: u32,
    registers: Vec<Register>,
}

impl RegisterArray {
    /// Creates `length` zeroed registers named `name[i]`.
    #[must_use]
    pub fn new(name: impl Into<String>, length: usize, width: u32) -> Self {
        let name = name.into();
        let registers = (0..length)
            .map(|index| Register::new(format!("{name}[{index}]"), width))
            .collect();
        Self {
            name,
            width,
            registers,
        }
    }

    /// Array name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width shared by every element.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Returns `true` when the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Element at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Register> {
        self.registers.get(index)
    }

    /// Mutable element at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Register> {
        self.registers.get_mut(index)
    }

    /// Iterates the elements in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    /// Changes the width of every element, clearing them when narrowing.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Module`] when `width` is outside `1..=64`.
    pub fn set_width(&mut self, width: u32) -> Result<(), ValidationError> {
        for register in &mut self.registers {
            register.set_width(width)?;
        }
        self.width = width;
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        self.registers.iter_mut().for_each(Register::reset);
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.registers.is_empty() {
            return Err(ValidationError::module(&self.name, "array has no registers"));
        }
        for register in &self.registers {
            register.validate()?;
            if register.width() != self.width {
                return Err(ValidationError::module(
                    &self.name,
                    format!(
                        "element `{}` is {} bits wide, expected {}",
                        register.name(),
                        register.width(),
                        self.width
                    ),
                ));
            }
        }
        Ok(())
    }
}

//! Cell-addressed main memory.

use std::collections::BTreeSet;

use crate::bits::{fits_either, mask, narrow, sign_extend, MAX_WIDTH};
use crate::{ExecutionError, ValidationError};

/// An array of fixed-width cells with per-cell breakpoint flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Ram {
    name: String,
    cell_size: u32,
    cells: Vec<i64>,
    breakpoints: BTreeSet<u64>,
}

impl Ram {
    /// Creates `length` zeroed cells of `cell_size` bits.
    #[must_use]
    pub fn new(name: impl Into<String>, length: usize, cell_size: u32) -> Self {
        Self {
            name: name.into(),
            cell_size,
            cells: vec![0; length],
            breakpoints: BTreeSet::new(),
        }
    }

    /// RAM name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bits per cell.
    #[must_use]
    pub const fn cell_size(&self) -> u32 {
        self.cell_size
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns `true` when the RAM has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Cell value at `address`, sign-extended from the cell size.
    #[must_use]
    pub fn cell(&self, address: u64) -> Option<i64> {
        usize::try_from(address)
            .ok()
            .and_then(|index| self.cells.get(index))
            .copied()
    }

    /// Writes one cell directly.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Module`] when the address is outside the
    /// RAM or the value does not fit a cell.
    pub fn set_cell(&mut self, address: u64, value: i64) -> Result<(), ValidationError> {
        if !fits_either(i128::from(value), self.cell_size) {
            return Err(ValidationError::module(
                &self.name,
                format!("value {value} does not fit a {}-bit cell", self.cell_size),
            ));
        }
        let len = self.cells.len();
        let cell_size = self.cell_size;
        let slot = usize::try_from(address)
            .ok()
            .and_then(|index| self.cells.get_mut(index))
            .ok_or_else(|| {
                ValidationError::module(
                    &self.name,
                    format!("address {address} is outside 0..{len}"),
                )
            })?;
        *slot = narrow(i128::from(value), cell_size);
        Ok(())
    }

    /// Reads `num_cells` consecutive cells, most significant first.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::AddressOutOfRange`] when the span leaves the RAM.
    pub fn read(&self, address: u64, num_cells: usize) -> Result<u64, ExecutionError> {
        let range = self.span(address, num_cells)?;
        Ok(self.cells[range].iter().fold(0_u64, |bits, &cell| {
            shift_in(bits, self.cell_size) | (cell as u64 & mask(self.cell_size))
        }))
    }

    /// Writes the low `num_cells * cell_size` bits of `bits`, most significant first.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::AddressOutOfRange`] when the span leaves the RAM.
    pub fn write(&mut self, address: u64, num_cells: usize, bits: u64) -> Result<(), ExecutionError> {
        let range = self.span(address, num_cells)?;
        let cell_size = self.cell_size;
        for (offset, cell) in self.cells[range].iter_mut().rev().enumerate() {
            let shift = u32::try_from(offset).unwrap_or(u32::MAX).saturating_mul(cell_size);
            let chunk = if shift >= MAX_WIDTH { 0 } else { (bits >> shift) & mask(cell_size) };
            *cell = sign_extend(chunk, cell_size);
        }
        Ok(())
    }

    /// Sets or clears the breakpoint flag of one cell.
    pub fn set_breakpoint(&mut self, address: u64, enabled: bool) {
        if enabled {
            self.breakpoints.insert(address);
        } else {
            self.breakpoints.remove(&address);
        }
    }

    /// Returns `true` when `address` carries a breakpoint.
    #[must_use]
    pub fn has_breakpoint(&self, address: u64) -> bool {
        self.breakpoints.contains(&address)
    }

    /// Addresses with breakpoints, ascending.
    pub fn breakpoints(&self) -> impl Iterator<Item = u64> + '_ {
        self.breakpoints.iter().copied()
    }

    /// Zeroes every cell. Breakpoints are kept.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    fn span(&self, address: u64, num_cells: usize) -> Result<std::ops::Range<usize>, ExecutionError> {
        let out_of_range = || ExecutionError::AddressOutOfRange {
            ram: self.name.clone(),
            address,
            len: self.cells.len(),
        };
        let start = usize::try_from(address).map_err(|_| out_of_range())?;
        let end = start.checked_add(num_cells).ok_or_else(out_of_range)?;
        if end > self.cells.len() {
            return Err(out_of_range());
        }
        Ok(start..end)
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::module(&self.name, "name cannot be blank"));
        }
        if !(1..=MAX_WIDTH).contains(&self.cell_size) {
            return Err(ValidationError::module(
                &self.name,
                format!("cell size {} is outside 1..={MAX_WIDTH}", self.cell_size),
            ));
        }
        if self.cells.is_empty() {
            return Err(ValidationError::module(&self.name, "RAM has no cells"));
        }
        Ok(())
    }
}

const fn shift_in(bits: u64, cell_size: u32) -> u64 {
    if cell_size >= MAX_WIDTH {
        0
    } else {
        bits << cell_size
    }
}

//! Hardware state containers owned by a machine.
//!
//! Modules live in typed arenas inside [`Modules`] and are addressed by small
//! copyable handles. Microinstructions and condition bits store handles, never
//! references, so a machine definition is plain data that can be cloned,
//! validated, and moved across threads.

use std::collections::HashSet;
use std::ops::{Index, IndexMut};

use crate::bits::{extract, insert};
use crate::ValidationError;

mod condition_bit;
mod ram;
mod register;

pub use condition_bit::ConditionBit;
pub use ram::Ram;
pub use register::{Register, RegisterArray};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub usize);

        impl $name {
            /// Arena slot index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0
            }
        }
    };
}

handle!(
    /// Handle to a [`Register`] in a [`Modules`] arena.
    RegisterId
);
handle!(
    /// Handle to a [`RegisterArray`] in a [`Modules`] arena.
    RegisterArrayId
);
handle!(
    /// Handle to a [`Ram`] in a [`Modules`] arena.
    RamId
);
handle!(
    /// Handle to a [`ConditionBit`] in a [`Modules`] arena.
    ConditionBitId
);

/// A reference to any one module, used for dependency queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleRef {
    /// A register.
    Register(RegisterId),
    /// A register array.
    RegisterArray(RegisterArrayId),
    /// A RAM.
    Ram(RamId),
    /// A condition bit.
    ConditionBit(ConditionBitId),
}

/// Arena of every register, register array, RAM, and condition bit of a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Modules {
    registers: Vec<Register>,
    register_arrays: Vec<RegisterArray>,
    rams: Vec<Ram>,
    condition_bits: Vec<ConditionBit>,
}

impl Modules {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registers: Vec::new(),
            register_arrays: Vec::new(),
            rams: Vec::new(),
            condition_bits: Vec::new(),
        }
    }

    /// Adds a register and returns its handle.
    pub fn add_register(&mut self, register: Register) -> RegisterId {
        self.registers.push(register);
        RegisterId(self.registers.len() - 1)
    }

    /// Adds a register array and returns its handle.
    pub fn add_register_array(&mut self, array: RegisterArray) -> RegisterArrayId {
        self.register_arrays.push(array);
        RegisterArrayId(self.register_arrays.len() - 1)
    }

    /// Adds a RAM and returns its handle.
    pub fn add_ram(&mut self, ram: Ram) -> RamId {
        self.rams.push(ram);
        RamId(self.rams.len() - 1)
    }

    /// Adds a condition bit and returns its handle.
    pub fn add_condition_bit(&mut self, bit: ConditionBit) -> ConditionBitId {
        self.condition_bits.push(bit);
        ConditionBitId(self.condition_bits.len() - 1)
    }

    /// Register behind `id`, if it exists.
    #[must_use]
    pub fn register(&self, id: RegisterId) -> Option<&Register> {
        self.registers.get(id.0)
    }

    /// Mutable register behind `id`, if it exists.
    pub fn register_mut(&mut self, id: RegisterId) -> Option<&mut Register> {
        self.registers.get_mut(id.0)
    }

    /// Register array behind `id`, if it exists.
    #[must_use]
    pub fn register_array(&self, id: RegisterArrayId) -> Option<&RegisterArray> {
        self.register_arrays.get(id.0)
    }

    /// Mutable register array behind `id`, if it exists.
    pub fn register_array_mut(&mut self, id: RegisterArrayId) -> Option<&mut RegisterArray> {
        self.register_arrays.get_mut(id.0)
    }

    /// RAM behind `id`, if it exists.
    #[must_use]
    pub fn ram(&self, id: RamId) -> Option<&Ram> {
        self.rams.get(id.0)
    }

    /// Mutable RAM behind `id`, if it exists.
    pub fn ram_mut(&mut self, id: RamId) -> Option<&mut Ram> {
        self.rams.get_mut(id.0)
    }

    /// Condition bit behind `id`, if it exists.
    #[must_use]
    pub fn condition_bit(&self, id: ConditionBitId) -> Option<&ConditionBit> {
        self.condition_bits.get(id.0)
    }

    /// All registers with their handles.
    pub fn registers(&self) -> impl Iterator<Item = (RegisterId, &Register)> {
        self.registers
            .iter()
            .enumerate()
            .map(|(index, register)| (RegisterId(index), register))
    }

    /// All register arrays with their handles.
    pub fn register_arrays(&self) -> impl Iterator<Item = (RegisterArrayId, &RegisterArray)> {
        self.register_arrays
            .iter()
            .enumerate()
            .map(|(index, array)| (RegisterArrayId(index), array))
    }

    /// All RAMs with their handles.
    pub fn rams(&self) -> impl Iterator<Item = (RamId, &Ram)> {
        self.rams
            .iter()
            .enumerate()
            .map(|(index, ram)| (RamId(index), ram))
    }

    /// All condition bits with their handles.
    pub fn condition_bits(&self) -> impl Iterator<Item = (ConditionBitId, &ConditionBit)> {
        self.condition_bits
            .iter()
            .enumerate()
            .map(|(index, bit)| (ConditionBitId(index), bit))
    }

    /// Looks up a register by name.
    #[must_use]
    pub fn register_named(&self, name: &str) -> Option<RegisterId> {
        self.registers
            .iter()
            .position(|register| register.name() == name)
            .map(RegisterId)
    }

    /// Looks up a register array by name.
    #[must_use]
    pub fn register_array_named(&self, name: &str) -> Option<RegisterArrayId> {
        self.register_arrays
            .iter()
            .position(|array| array.name() == name)
            .map(RegisterArrayId)
    }

    /// Looks up a RAM by name.
    #[must_use]
    pub fn ram_named(&self, name: &str) -> Option<RamId> {
        self.rams.iter().position(|ram| ram.name() == name).map(RamId)
    }

    /// Looks up a condition bit by name.
    #[must_use]
    pub fn condition_bit_named(&self, name: &str) -> Option<ConditionBitId> {
        self.condition_bits
            .iter()
            .position(|bit| bit.name() == name)
            .map(ConditionBitId)
    }

    /// Returns `true` when `module` names an existing arena slot.
    #[must_use]
    pub fn contains(&self, module: ModuleRef) -> bool {
        match module {
            ModuleRef::Register(id) => id.0 < self.registers.len(),
            ModuleRef::RegisterArray(id) => id.0 < self.register_arrays.len(),
            ModuleRef::Ram(id) => id.0 < self.rams.len(),
            ModuleRef::ConditionBit(id) => id.0 < self.condition_bits.len(),
        }
    }

    /// Reads a condition bit. Bit 0 is the MSB unless `from_right`.
    #[must_use]
    pub fn is_condition_bit_set(&self, id: ConditionBitId, from_right: bool) -> bool {
        let Some(bit) = self.condition_bit(id) else {
            return false;
        };
        self.register(bit.register()).is_some_and(|register| {
            extract(register.value(), register.width(), bit.bit(), 1, from_right) == 1
        })
    }

    /// Sets or clears a condition bit. Bit 0 is the MSB unless `from_right`.
    pub fn set_condition_bit(&mut self, id: ConditionBitId, value: bool, from_right: bool) {
        let Some((register_id, index)) = self
            .condition_bit(id)
            .map(|bit| (bit.register(), bit.bit()))
        else {
            return;
        };
        if let Some(register) = self.register_mut(register_id) {
            let updated = insert(
                register.value(),
                register.width(),
                index,
                1,
                u64::from(value),
                from_right,
            );
            register.store(i128::from(updated));
        }
    }

    /// Returns `true` when any halt-flagged condition bit is set.
    #[must_use]
    pub fn any_halt_bit_set(&self, from_right: bool) -> bool {
        self.condition_bits()
            .any(|(id, bit)| bit.halts() && self.is_condition_bit_set(id, from_right))
    }

    /// Clears every halt-flagged condition bit.
    pub fn clear_halt_bits(&mut self, from_right: bool) {
        let halting: Vec<ConditionBitId> = self
            .condition_bits()
            .filter(|(_, bit)| bit.halts())
            .map(|(id, _)| id)
            .collect();
        for id in halting {
            self.set_condition_bit(id, false, from_right);
        }
    }

    /// Restores every register to its initial value and zeroes every RAM.
    pub fn reset(&mut self) {
        self.registers.iter_mut().for_each(Register::reset);
        self.register_arrays
            .iter_mut()
            .for_each(RegisterArray::reset);
        self.rams.iter_mut().for_each(Ram::clear);
    }

    /// Validates every module and the uniqueness of module names.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError::Module`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut names = HashSet::new();
        let mut claim = |name: &str| {
            if names.insert(name.to_string()) {
                Ok(())
            } else {
                Err(ValidationError::module(name, "name is used by another module"))
            }
        };
        for register in &self.registers {
            register.validate()?;
            claim(register.name())?;
        }
        for array in &self.register_arrays {
            array.validate()?;
            claim(array.name())?;
        }
        for ram in &self.rams {
            ram.validate()?;
            claim(ram.name())?;
        }
        for bit in &self.condition_bits {
            claim(bit.name())?;
            let register = self.register(bit.register()).ok_or_else(|| {
                ValidationError::module(bit.name(), "owning register does not exist")
            })?;
            if bit.bit() >= register.width() {
                return Err(ValidationError::module(
                    bit.name(),
                    format!(
                        "bit {} is outside {}-bit register `{}`",
                        bit.bit(),
                        register.width(),
                        register.name()
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl Index<RegisterId> for Modules {
    type Output = Register;

    fn index(&self, id: RegisterId) -> &Register {
        &self.registers[id.0]
    }
}

impl IndexMut<RegisterId> for Modules {
    fn index_mut(&mut self, id: RegisterId) -> &mut Register {
        &mut self.registers[id.0]
    }
}

impl Index<RegisterArrayId> for Modules {
    type Output = RegisterArray;

    fn index(&self, id: RegisterArrayId) -> &RegisterArray {
        &self.register_arrays[id.0]
    }
}

impl IndexMut<RegisterArrayId> for Modules {
    fn index_mut(&mut self, id: RegisterArrayId) -> &mut RegisterArray {
        &mut self.register_arrays[id.0]
    }
}

impl Index<RamId> for Modules {
    type Output = Ram;

    fn index(&self, id: RamId) -> &Ram {
        &self.rams[id.0]
    }
}

impl IndexMut<RamId> for Modules {
    fn index_mut(&mut self, id: RamId) -> &mut Ram {
        &mut self.rams[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> (Modules, RegisterId, ConditionBitId, ConditionBitId) {
        let mut modules = Modules::new();
        let status = modules.add_register(Register::new("status", 4));
        let halt = modules.add_condition_bit(ConditionBit::new("halt", status, 0).halting(true));
        let carry = modules.add_condition_bit(ConditionBit::new("carry", status, 3));
        (modules, status, halt, carry)
    }

    #[test]
    fn condition_bits_honor_left_numbering() {
        let (mut modules, status, halt, carry) = flags();
        modules.set_condition_bit(carry, true, false);
        assert_eq!(modules[status].unsigned_value(), 0b0001);
        modules.set_condition_bit(halt, true, false);
        assert_eq!(modules[status].unsigned_value(), 0b1001);
        assert!(modules.is_condition_bit_set(halt, false));
        assert!(modules.any_halt_bit_set(false));
        modules.clear_halt_bits(false);
        assert_eq!(modules[status].unsigned_value(), 0b0001);
    }

    #[test]
    fn condition_bits_honor_right_numbering() {
        let (mut modules, status, _, carry) = flags();
        modules.set_condition_bit(carry, true, true);
        assert_eq!(modules[status].unsigned_value(), 0b1000);
        assert!(modules.is_condition_bit_set(carry, true));
        assert!(!modules.is_condition_bit_set(carry, false));
    }

    #[test]
    fn validation_rejects_bit_outside_register() {
        let (mut modules, status, _, _) = flags();
        assert!(modules.validate().is_ok());
        modules.add_condition_bit(ConditionBit::new("bad", status, 4));
        assert!(modules.validate().is_err());
    }

    #[test]
    fn validation_rejects_duplicate_names() {
        let mut modules = Modules::new();
        modules.add_register(Register::new("acc", 8));
        modules.add_ram(Ram::new("acc", 8, 8));
        assert!(matches!(
            modules.validate(),
            Err(ValidationError::Module { .. })
        ));
    }

    #[test]
    fn lookups_by_name() {
        let (modules, status, halt, _) = flags();
        assert_eq!(modules.register_named("status"), Some(status));
        assert_eq!(modules.condition_bit_named("halt"), Some(halt));
        assert_eq!(modules.ram_named("main"), None);
        assert!(modules.contains(ModuleRef::Register(status)));
        assert!(!modules.contains(ModuleRef::Ram(RamId(0))));
    }

    #[test]
    fn reset_restores_registers_and_clears_memory() {
        let mut modules = Modules::new();
        let pc = modules.add_register(Register::new("pc", 8).with_initial_value(4));
        let ram = modules.add_ram(Ram::new("main", 4, 8));
        modules[pc].store(9);
        modules[ram].set_cell(1, 5).unwrap();
        modules.reset();
        assert_eq!(modules[pc].value(), 4);
        assert_eq!(modules[ram].cell(1), Some(0));
    }
}

//! Label table and pass-1 address assignment.
//!
//! Addresses are counted in code store cells. A running bit offset starts at
//! `load_address * cell_size`; each label takes the cell address of the
//! statement it precedes.

use std::collections::{HashMap, HashSet};

use crate::errors::{AssemblyError, AssemblyErrorKind, SourceLoc};
use crate::parser::Statement;
use crate::scanner::Token;

/// Scope shared by every label named in a `.global` directive.
pub const GLOBAL_SCOPE: u32 = u32::MAX;

/// A label with its assigned address and definition location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Cell address of the label.
    pub address: u64,
    /// Where the label was defined.
    pub defined_at: SourceLoc,
}

/// Labels keyed by scope and name.
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    globals: HashSet<String>,
    symbols: HashMap<(u32, String), Symbol>,
}

impl LabelTable {
    /// Creates an empty table; `globals` are visible from every scope.
    #[must_use]
    pub fn new(globals: HashSet<String>) -> Self {
        Self {
            globals,
            symbols: HashMap::new(),
        }
    }

    fn key(&self, token: &Token) -> (u32, String) {
        let scope = if self.globals.contains(&token.text) {
            GLOBAL_SCOPE
        } else {
            token.scope
        };
        (scope, token.text.clone())
    }

    /// Defines the label written as `token`.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyErrorKind::NameSpace`] when the label is already
    /// defined in the same scope.
    pub fn define(&mut self, token: &Token, address: u64) -> Result<(), AssemblyError> {
        let key = self.key(token);
        if let Some(existing) = self.symbols.get(&key) {
            return Err(token.error(AssemblyErrorKind::NameSpace(format!(
                "label `{}` is already defined at {}",
                token.text,
                existing.defined_at.format_location()
            ))));
        }
        self.symbols.insert(
            key,
            Symbol {
                address,
                defined_at: token.location(),
            },
        );
        Ok(())
    }

    /// Finds the label a reference token names, if it is visible.
    #[must_use]
    pub fn lookup(&self, token: &Token) -> Option<&Symbol> {
        self.symbols.get(&self.key(token))
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Returns `true` if no labels are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Result of pass 1.
#[derive(Debug, Clone)]
pub struct AddressAssignment {
    /// Cell address of each statement.
    pub addresses: Vec<u64>,
    /// Every label definition.
    pub labels: LabelTable,
}

/// Assigns a cell address to every statement and defines its labels.
///
/// `lengths` holds each statement's size in bits.
///
/// # Errors
///
/// Returns [`AssemblyErrorKind::NameSpace`] for duplicate labels or labels
/// that shadow an EQU, and [`AssemblyErrorKind::Value`] when the program runs
/// past the end of the address space.
pub fn assign_addresses(
    statements: &[Statement],
    lengths: &[u64],
    load_address: u64,
    cell_size: u32,
    globals: HashSet<String>,
    equs: &HashMap<String, i128>,
) -> Result<AddressAssignment, AssemblyError> {
    let cell_size = u64::from(cell_size.max(1));
    let mut labels = LabelTable::new(globals);
    let mut addresses = Vec::with_capacity(statements.len());
    let mut offset = load_address.checked_mul(cell_size);

    for (statement, &length) in statements.iter().zip(lengths) {
        let Some(bits) = offset else {
            return Err(statement.head.error(AssemblyErrorKind::Value(
                "program runs past the end of the address space".into(),
            )));
        };
        let address = bits / cell_size;
        for label in &statement.labels {
            if equs.contains_key(&label.text) {
                return Err(label.error(AssemblyErrorKind::NameSpace(format!(
                    "label `{}` is already defined as an EQU",
                    label.text
                ))));
            }
            labels.define(label, address)?;
        }
        addresses.push(address);
        offset = bits.checked_add(length);
    }

    Ok(AddressAssignment { addresses, labels })
}

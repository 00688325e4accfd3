//! Assembler for table-driven instruction sets.
//!
//! Source text is assembled against a [`sim_core::MachineInstruction`] table:
//! the machine decides the mnemonics, operand layouts, punctuation, and code
//! store cell size.

#[cfg(test)]
use proptest as _;
use serde_json as _;
use fern as _;

/// Top-level assembler pipeline.
pub mod assembler;
/// Bit-exact instruction and data encoding.
pub mod encoder;
/// Structured assembly error types.
pub mod errors;
/// Operand alignment and resolution.
pub mod normalizer;
/// Recursive-descent parser with includes and macros.
pub mod parser;
/// Tokenizer driven by the machine's punctuation table.
pub mod scanner;
/// Label table and pass-1 address assignment.
pub mod symbols;

//! Structured error reporting for assembler phases.
//!
//! Every error carries the offending token's location when one is known.
//! Errors raised inside included files also carry the include chain, so a
//! message reads:
//!
//! ```text
//! lib.asm:5:1: error: undefined operand: `count` (included from main.asm:3)
//! ```
//!
//! Assembly stops at the first error.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A source location for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    /// File path.
    pub file: PathBuf,
    /// 1-indexed line number.
    pub line: usize,
    /// 1-indexed column number (1 if unknown).
    pub column: usize,
    /// Include chain (outermost first).
    pub include_chain: Vec<IncludeTraceEntry>,
}

impl SourceLoc {
    /// Creates a new source location.
    #[must_use]
    pub const fn new(file: PathBuf, line: usize, column: usize) -> Self {
        Self {
            file,
            line,
            column,
            include_chain: Vec::new(),
        }
    }

    /// Creates a source location with an include chain.
    #[must_use]
    pub fn with_include_chain(mut self, chain: Vec<IncludeTraceEntry>) -> Self {
        self.include_chain = chain;
        self
    }

    /// Formats the location without the include chain.
    #[must_use]
    pub fn format_location(&self) -> String {
        format!("{}:{}:{}", self.file.display(), self.line, self.column)
    }

    /// Formats the full location with include chain.
    #[must_use]
    pub fn format_full(&self) -> String {
        if self.include_chain.is_empty() {
            self.format_location()
        } else {
            let mut parts = vec![self.format_location()];
            for entry in self.include_chain.iter().rev() {
                parts.push(format!(
                    "included from {}:{}",
                    entry.file.display(),
                    entry.line
                ));
            }
            parts.join(" (") + &")".repeat(self.include_chain.len())
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_full())
    }
}

/// An entry in an include chain trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IncludeTraceEntry {
    /// The file that contained the `.include` directive.
    pub file: PathBuf,
    /// The line number of the `.include` directive.
    pub line: usize,
}

/// Classification of assembly errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyErrorKind {
    /// Token sequence does not fit the grammar.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// A value does not fit its field or cell.
    #[error("value error: {0}")]
    Value(String),
    /// A token of the wrong kind where a value is required.
    #[error("type error: {0}")]
    Type(String),
    /// A name is defined twice or collides with another kind of name.
    #[error("name space error: {0}")]
    NameSpace(String),
    /// An included file is missing, unreadable, or circular.
    #[error("import error: {0}")]
    Import(String),
    /// A symbol is neither a field value, an EQU, nor a visible label.
    #[error("undefined operand: {0}")]
    UndefinedOperand(String),
    /// Operands do not match the instruction's operand layout.
    #[error("invalid operand: {0}")]
    InvalidOperand(String),
    /// The scanner met a character or literal it cannot tokenize.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The root source file could not be read.
    #[error("I/O error: {0}")]
    Io(String),
}

/// An assembly error with source context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyError {
    /// The kind of error.
    pub kind: AssemblyErrorKind,
    /// Source location if available.
    pub location: Option<SourceLoc>,
}

impl AssemblyError {
    /// Creates a new assembly error without a location.
    #[must_use]
    pub const fn new(kind: AssemblyErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    /// Creates an error at `location`.
    #[must_use]
    pub const fn at(kind: AssemblyErrorKind, location: SourceLoc) -> Self {
        Self {
            kind,
            location: Some(location),
        }
    }

    /// Adds a source location to the error.
    #[must_use]
    pub fn with_location(mut self, loc: SourceLoc) -> Self {
        self.location = Some(loc);
        self
    }

    /// Formats the error for stderr output.
    #[must_use]
    pub fn format_for_stderr(&self) -> String {
        self.location.as_ref().map_or_else(
            || format!("error: {}", self.kind),
            |loc| format!("{}: error: {}", loc.format_location(), self.kind) + &chain_suffix(loc),
        )
    }
}

fn chain_suffix(loc: &SourceLoc) -> String {
    loc.include_chain
        .iter()
        .rev()
        .map(|entry| format!(" (included from {}:{})", entry.file.display(), entry.line))
        .collect()
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}", loc.format_full(), self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AssemblyError {}

//! Recursive-descent parser for assembly programs.
//!
//! Grammar, per file:
//!
//! ```text
//! Program  → [blank] (Equ | Include | Macro | Global)* InstrPart EOF
//! Equ      → name EQU (constant | earlier-equ) EOL
//! Include  → .include "path" EOL
//! Macro    → .macro name param* EOL body .endm EOL
//! Global   → .global name+ EOL
//! InstrPart→ (label* (instruction | macro-call | .data … | .ascii "…")? EOL)*
//! ```
//!
//! Macro parameters and call arguments are single tokens separated by
//! whitespace or commas. Macro calls are expanded here. Each expansion and
//! each file gets a fresh label scope; labels named by `.global` are shared by every scope.
//! An included file contributes its declarations at the include point and its
//! instructions after those of the including file.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::assembler::InstructionSet;
use crate::errors::{AssemblyError, AssemblyErrorKind, IncludeTraceEntry};
use crate::scanner::{scan, Origin, Token, TokenKind};

const MAX_EXPANSION_DEPTH: usize = 64;

fn without_separators(tokens: Vec<Token>) -> Vec<Token> {
    tokens
        .into_iter()
        .filter(|token| token.kind != TokenKind::Punct(','))
        .collect()
}

/// What a statement asks the code generator to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// A machine instruction.
    Instruction,
    /// A `.data` pseudo-instruction.
    Data,
    /// An `.ascii` pseudo-instruction.
    Ascii,
    /// Labels with nothing after them at the end of a file.
    LabelsOnly,
}

/// One line of the instruction part after macro expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Labels defined at this statement's address.
    pub labels: Vec<Token>,
    /// Statement kind.
    pub kind: StatementKind,
    /// Mnemonic or directive token; the last label for [`StatementKind::LabelsOnly`].
    pub head: Token,
    /// Operand tokens in text order.
    pub operands: Vec<Token>,
    /// Source text of the line.
    pub source: String,
    /// Comment text of the line.
    pub comment: String,
}

/// A parsed program with every include and macro expanded.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Statements in address order.
    pub statements: Vec<Statement>,
    /// Machine and program EQUs, resolved to constants.
    pub equs: HashMap<String, i128>,
    /// Label names shared across files and expansions.
    pub globals: HashSet<String>,
}

#[derive(Debug, Clone)]
struct Macro {
    params: Vec<String>,
    body: Vec<Token>,
}

struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
    lines: Rc<Vec<String>>,
}

impl Cursor {
    fn new(tokens: Vec<Token>, lines: Rc<Vec<String>>) -> Self {
        Self {
            tokens,
            pos: 0,
            lines,
        }
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_second(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn skip_blank_lines(&mut self) {
        while self.peek().kind == TokenKind::Eol {
            self.pos += 1;
        }
    }

    /// Tokens up to the end of the line, plus that line's comment.
    fn rest_of_line(&mut self) -> (Vec<Token>, String) {
        let mut tokens = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Eof => return (tokens, String::new()),
                TokenKind::Eol => return (tokens, self.next().text),
                _ => tokens.push(self.next()),
            }
        }
    }

    fn expect_end_of_line(&mut self) -> Result<(), AssemblyError> {
        match self.peek().kind {
            TokenKind::Eof => Ok(()),
            TokenKind::Eol => {
                self.next();
                Ok(())
            }
            _ => {
                let token = self.next();
                Err(token.error(AssemblyErrorKind::Syntax(format!(
                    "expected end of line, found {}",
                    token.describe()
                ))))
            }
        }
    }

    fn line_text(&self, line: usize) -> String {
        line.checked_sub(1)
            .and_then(|index| self.lines.get(index))
            .map_or_else(String::new, |text| text.trim().to_string())
    }
}

/// Parses a program and everything it includes.
pub struct Parser<'a> {
    isa: &'a InstructionSet<'a>,
    macros: HashMap<String, Macro>,
    equs: HashMap<String, i128>,
    globals: HashSet<String>,
    next_scope: u32,
    open_files: Vec<PathBuf>,
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Creates a parser seeded with the machine's EQUs.
    #[must_use]
    pub fn new(isa: &'a InstructionSet<'a>) -> Self {
        Self {
            isa,
            macros: HashMap::new(),
            equs: isa
                .equs()
                .iter()
                .map(|equ| (equ.name.clone(), i128::from(equ.value)))
                .collect(),
            globals: HashSet::new(),
            next_scope: 0,
            open_files: Vec::new(),
            depth: 0,
        }
    }

    /// Parses `text` as the root file `path`.
    ///
    /// # Errors
    ///
    /// Returns the first scanner, syntax, name-space, or import error.
    pub fn parse(mut self, path: &Path, text: &str) -> Result<Program, AssemblyError> {
        if let Ok(canonical) = path.canonicalize() {
            self.open_files.push(canonical);
        }
        let statements = self.parse_text(path, text, Vec::new())?;
        debug!(
            "parsed {} statements, {} macros, {} EQUs",
            statements.len(),
            self.macros.len(),
            self.equs.len()
        );
        Ok(Program {
            statements,
            equs: self.equs,
            globals: self.globals,
        })
    }

    fn fresh_scope(&mut self) -> u32 {
        let scope = self.next_scope;
        self.next_scope += 1;
        scope
    }

    fn parse_text(
        &mut self,
        path: &Path,
        text: &str,
        include_chain: Vec<IncludeTraceEntry>,
    ) -> Result<Vec<Statement>, AssemblyError> {
        let origin = Rc::new(Origin {
            file: path.to_path_buf(),
            include_chain,
        });
        let scope = self.fresh_scope();
        let tokens = scan(text, &self.isa.config().punctuation, origin, scope)?;
        let lines = Rc::new(text.lines().map(str::to_string).collect());
        let mut cursor = Cursor::new(tokens, lines);

        let mut included = Vec::new();
        self.parse_declarations(&mut cursor, &mut included)?;
        let mut statements = self.parse_instructions(&mut cursor, Vec::new())?;
        statements.append(&mut included);
        Ok(statements)
    }

    fn parse_declarations(
        &mut self,
        cursor: &mut Cursor,
        included: &mut Vec<Statement>,
    ) -> Result<(), AssemblyError> {
        loop {
            cursor.skip_blank_lines();
            let token = cursor.peek();
            if token.is_pseudo("include") {
                self.parse_include(cursor, included)?;
            } else if token.is_pseudo("macro") {
                self.parse_macro(cursor)?;
            } else if token.is_pseudo("global") {
                self.parse_global(cursor)?;
            } else if token.kind == TokenKind::Symbol
                && cursor.peek_second().is_some_and(|next| next.is_word("equ"))
            {
                self.parse_equ(cursor)?;
            } else {
                return Ok(());
            }
        }
    }

    fn check_new_name(&self, token: &Token, what: &str) -> Result<(), AssemblyError> {
        let name = token.text.as_str();
        let clash = if self.isa.instruction(name).is_some() {
            Some("an instruction")
        } else if self.macros.contains_key(name) {
            Some("a macro")
        } else if self.equs.contains_key(name) {
            Some("an EQU")
        } else {
            None
        };
        match clash {
            Some(existing) => Err(token.error(AssemblyErrorKind::NameSpace(format!(
                "{what} `{name}` is already defined as {existing}"
            )))),
            None => Ok(()),
        }
    }

    fn parse_equ(&mut self, cursor: &mut Cursor) -> Result<(), AssemblyError> {
        let name = cursor.next();
        cursor.next();
        self.check_new_name(&name, "EQU")?;
        let value_token = cursor.next();
        let value = match &value_token.kind {
            TokenKind::Constant(value) => *value,
            TokenKind::Symbol => self.equs.get(&value_token.text).copied().ok_or_else(|| {
                value_token.error(AssemblyErrorKind::UndefinedOperand(format!(
                    "`{}` is not an EQU defined earlier",
                    value_token.text
                )))
            })?,
            _ => {
                return Err(value_token.error(AssemblyErrorKind::Syntax(format!(
                    "EQU `{}` needs a constant, found {}",
                    name.text,
                    value_token.describe()
                ))));
            }
        };
        cursor.expect_end_of_line()?;
        self.equs.insert(name.text, value);
        Ok(())
    }

    fn parse_global(&mut self, cursor: &mut Cursor) -> Result<(), AssemblyError> {
        let directive = cursor.next();
        let (names, _) = cursor.rest_of_line();
        if names.is_empty() {
            return Err(directive.error(AssemblyErrorKind::Syntax(
                "`.global` needs at least one label name".into(),
            )));
        }
        for name in names {
            if name.kind != TokenKind::Symbol {
                return Err(name.error(AssemblyErrorKind::Syntax(format!(
                    "expected a label name, found {}",
                    name.describe()
                ))));
            }
            self.globals.insert(name.text);
        }
        Ok(())
    }

    fn parse_macro(&mut self, cursor: &mut Cursor) -> Result<(), AssemblyError> {
        let directive = cursor.next();
        let name = cursor.next();
        if name.kind != TokenKind::Symbol {
            return Err(name.error(AssemblyErrorKind::Syntax(format!(
                "expected a macro name, found {}",
                name.describe()
            ))));
        }
        self.check_new_name(&name, "macro")?;
        let (params, _) = cursor.rest_of_line();
        let params = without_separators(params);
        let mut seen = HashSet::new();
        for param in &params {
            if param.kind != TokenKind::Symbol || !seen.insert(param.text.as_str()) {
                return Err(param.error(AssemblyErrorKind::Syntax(format!(
                    "{} is not a valid parameter of macro `{}`",
                    param.describe(),
                    name.text
                ))));
            }
        }

        let mut body = Vec::new();
        loop {
            let token = cursor.next();
            match token.kind {
                TokenKind::Eof => {
                    return Err(directive.error(AssemblyErrorKind::Syntax(format!(
                        "macro `{}` is missing `.endm`",
                        name.text
                    ))));
                }
                TokenKind::Pseudo if token.is_pseudo("endm") => break,
                TokenKind::Pseudo if token.is_pseudo("macro") => {
                    return Err(token.error(AssemblyErrorKind::Syntax(
                        "macros cannot be defined inside macros".into(),
                    )));
                }
                _ => body.push(token),
            }
        }
        cursor.expect_end_of_line()?;

        self.macros.insert(
            name.text,
            Macro {
                params: params.into_iter().map(|param| param.text).collect(),
                body,
            },
        );
        Ok(())
    }

    fn parse_include(
        &mut self,
        cursor: &mut Cursor,
        included: &mut Vec<Statement>,
    ) -> Result<(), AssemblyError> {
        let directive = cursor.next();
        let path_token = cursor.next();
        let TokenKind::Str(relative) = &path_token.kind else {
            return Err(path_token.error(AssemblyErrorKind::Syntax(format!(
                "`.include` needs a quoted path, found {}",
                path_token.describe()
            ))));
        };
        cursor.expect_end_of_line()?;

        let import_error =
            |message: String| directive.error(AssemblyErrorKind::Import(message));
        let resolved = resolve_include_path(relative, &directive.origin.file);
        let canonical = resolved.canonicalize().map_err(|err| {
            import_error(format!("cannot open `{}`: {err}", resolved.display()))
        })?;
        if self.open_files.contains(&canonical) {
            return Err(import_error(format!(
                "circular include of `{}`",
                resolved.display()
            )));
        }
        let text = fs::read_to_string(&resolved).map_err(|err| {
            import_error(format!("cannot read `{}`: {err}", resolved.display()))
        })?;

        let mut chain = directive.origin.include_chain.clone();
        chain.push(IncludeTraceEntry {
            file: directive.origin.file.clone(),
            line: directive.line,
        });
        debug!("including `{}`", resolved.display());
        self.open_files.push(canonical);
        let statements = self.parse_text(&resolved, &text, chain);
        self.open_files.pop();
        included.extend(statements?);
        Ok(())
    }

    fn parse_instructions(
        &mut self,
        cursor: &mut Cursor,
        mut labels: Vec<Token>,
    ) -> Result<Vec<Statement>, AssemblyError> {
        let mut statements = Vec::new();
        loop {
            let token = cursor.next();
            match token.kind {
                TokenKind::Eol => {}
                TokenKind::Eof => break,
                TokenKind::Label => labels.push(token),
                TokenKind::Symbol => {
                    if cursor.peek().is_word("equ") {
                        return Err(token.error(AssemblyErrorKind::Syntax(
                            "EQU declarations must come before the first instruction".into(),
                        )));
                    }
                    let (operands, comment) = cursor.rest_of_line();
                    if let Some(found) = self.macros.get(&token.text).cloned() {
                        let expanded = self.expand(
                            &found,
                            &token,
                            operands,
                            std::mem::take(&mut labels),
                            &cursor.lines,
                        )?;
                        statements.extend(expanded);
                    } else if self.isa.instruction(&token.text).is_some() {
                        statements.push(Statement {
                            labels: std::mem::take(&mut labels),
                            kind: StatementKind::Instruction,
                            source: cursor.line_text(token.line),
                            head: token,
                            operands,
                            comment,
                        });
                    } else {
                        return Err(token.error(AssemblyErrorKind::Syntax(format!(
                            "unknown instruction or macro `{}`",
                            token.text
                        ))));
                    }
                }
                TokenKind::Pseudo if token.is_pseudo("data") || token.is_pseudo("ascii") => {
                    let kind = if token.is_pseudo("data") {
                        StatementKind::Data
                    } else {
                        StatementKind::Ascii
                    };
                    let (operands, comment) = cursor.rest_of_line();
                    statements.push(Statement {
                        labels: std::mem::take(&mut labels),
                        kind,
                        source: cursor.line_text(token.line),
                        head: token,
                        operands,
                        comment,
                    });
                }
                TokenKind::Pseudo
                    if ["include", "macro", "global", "endm"]
                        .iter()
                        .any(|name| token.is_pseudo(name)) =>
                {
                    return Err(token.error(AssemblyErrorKind::Syntax(format!(
                        "`{}` must come before the first instruction",
                        token.text
                    ))));
                }
                TokenKind::Pseudo => {
                    return Err(token.error(AssemblyErrorKind::Syntax(format!(
                        "unknown directive `{}`",
                        token.text
                    ))));
                }
                _ => {
                    return Err(token.error(AssemblyErrorKind::Syntax(format!(
                        "expected a label or instruction, found {}",
                        token.describe()
                    ))));
                }
            }
        }
        if let Some(last) = labels.last().cloned() {
            statements.push(Statement {
                labels,
                kind: StatementKind::LabelsOnly,
                source: cursor.line_text(last.line),
                head: last,
                operands: Vec::new(),
                comment: String::new(),
            });
        }
        Ok(statements)
    }

    /// Substitutes arguments into a copy of the macro body and parses it.
    ///
    /// Labels defined in the body move to a fresh scope; every other name
    /// stays in the caller's scope.
    fn expand(
        &mut self,
        found: &Macro,
        call: &Token,
        args: Vec<Token>,
        labels: Vec<Token>,
        lines: &Rc<Vec<String>>,
    ) -> Result<Vec<Statement>, AssemblyError> {
        let args = without_separators(args);
        if args.len() != found.params.len() {
            return Err(call.error(AssemblyErrorKind::Syntax(format!(
                "macro `{}` takes {} arguments, found {}",
                call.text,
                found.params.len(),
                args.len()
            ))));
        }
        if self.depth >= MAX_EXPANSION_DEPTH {
            return Err(call.error(AssemblyErrorKind::Syntax(format!(
                "macro `{}` expands too deeply",
                call.text
            ))));
        }

        let scope = self.fresh_scope();
        let local: HashSet<&str> = found
            .body
            .iter()
            .filter(|token| token.kind == TokenKind::Label)
            .map(|token| token.text.as_str())
            .collect();
        let mut tokens: Vec<Token> = found
            .body
            .iter()
            .map(|token| {
                let is_name = matches!(token.kind, TokenKind::Symbol | TokenKind::Label);
                let param = found.params.iter().position(|param| *param == token.text);
                let mut copy = match param {
                    Some(index) if is_name => {
                        let mut arg = args[index].clone();
                        if token.kind == TokenKind::Label {
                            arg.kind = TokenKind::Label;
                        }
                        arg
                    }
                    _ => {
                        let mut copy = token.clone();
                        copy.scope = if is_name && local.contains(token.text.as_str()) {
                            scope
                        } else {
                            call.scope
                        };
                        copy
                    }
                };
                copy.line = call.line;
                copy.column = call.column;
                copy.origin = Rc::clone(&call.origin);
                copy
            })
            .collect();
        let mut end = call.clone();
        end.kind = TokenKind::Eof;
        tokens.push(end);

        self.depth += 1;
        let statements = self.parse_instructions(&mut Cursor::new(tokens, Rc::clone(lines)), labels);
        self.depth -= 1;
        statements
    }
}

/// Resolves an include path relative to the including file's directory.
fn resolve_include_path(include_path: &str, containing_file: &Path) -> PathBuf {
    let include = PathBuf::from(include_path);

    if include.is_absolute() {
        include
    } else {
        match containing_file.parent() {
            Some(dir) => dir.join(include),
            None => include,
        }
    }
}

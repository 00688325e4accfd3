//! Tokenizer driven by the machine's punctuation table.
//!
//! Every character of the source is either whitespace, alphanumeric, or
//! listed in the punctuation table. Symbol characters extend names, token
//! characters stand alone, and the label, comment, and pseudo characters
//! shape labels, comments, and directives. Anything else is an invalid token.

use std::path::PathBuf;
use std::rc::Rc;

use sim_core::{PunctChar, PunctUse};

use crate::errors::{AssemblyError, AssemblyErrorKind, IncludeTraceEntry, SourceLoc};

/// The file a token was read from, shared by all of its tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// File path as written or resolved.
    pub file: PathBuf,
    /// Include chain leading to this file (outermost first).
    pub include_chain: Vec<IncludeTraceEntry>,
}

/// Token classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// A name: mnemonic, EQU, label reference, or field value.
    Symbol,
    /// A numeric literal.
    Constant(i128),
    /// A name followed by the label character.
    Label,
    /// A directive such as `.data`; the text holds the name without the prefix.
    Pseudo,
    /// A double-quoted string with escapes processed.
    Str(String),
    /// A standalone punctuation character.
    Punct(char),
    /// End of a line; the text holds that line's comment, if any.
    Eol,
    /// End of input.
    Eof,
}

/// A scanned token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Classification.
    pub kind: TokenKind,
    /// Source text (see [`TokenKind`] for the special cases).
    pub text: String,
    /// 1-indexed line.
    pub line: usize,
    /// 1-indexed column.
    pub column: usize,
    /// Label scope the token was written in.
    pub scope: u32,
    /// File the token came from.
    pub origin: Rc<Origin>,
}

impl Token {
    /// Location for error reporting.
    #[must_use]
    pub fn location(&self) -> SourceLoc {
        SourceLoc::new(self.origin.file.clone(), self.line, self.column)
            .with_include_chain(self.origin.include_chain.clone())
    }

    /// Builds an error pointing at this token.
    #[must_use]
    pub fn error(&self, kind: AssemblyErrorKind) -> AssemblyError {
        AssemblyError::at(kind, self.location())
    }

    /// Returns `true` for a symbol spelled `word`, ignoring ASCII case.
    #[must_use]
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text.eq_ignore_ascii_case(word)
    }

    /// Returns `true` for a directive named `name`, ignoring ASCII case.
    #[must_use]
    pub fn is_pseudo(&self, name: &str) -> bool {
        self.kind == TokenKind::Pseudo && self.text.eq_ignore_ascii_case(name)
    }

    /// Human-readable rendering for messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Eol => "end of line".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::Str(_) => format!("string {}", self.text),
            _ => format!("`{}`", self.text),
        }
    }
}

struct Scanner<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    punctuation: &'a [PunctChar],
    origin: Rc<Origin>,
    scope: u32,
    tokens: Vec<Token>,
}

/// Tokenizes `text`, ending with `Eol` and `Eof`.
///
/// # Errors
///
/// Returns [`AssemblyErrorKind::InvalidToken`] for illegal or unknown
/// characters, malformed numbers, and unterminated strings.
pub fn scan(
    text: &str,
    punctuation: &[PunctChar],
    origin: Rc<Origin>,
    scope: u32,
) -> Result<Vec<Token>, AssemblyError> {
    let mut scanner = Scanner {
        chars: text.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        punctuation,
        origin,
        scope,
        tokens: Vec::new(),
    };
    scanner.run()?;
    Ok(scanner.tokens)
}

impl Scanner<'_> {
    fn usage(&self, c: char) -> Option<PunctUse> {
        self.punctuation
            .iter()
            .find(|entry| entry.ch == c)
            .map(|entry| entry.usage)
    }

    fn is_name_char(&self, c: char) -> bool {
        c.is_alphanumeric() || self.usage(c) == Some(PunctUse::Symbol)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, text: String, line: usize, column: usize) {
        self.tokens.push(Token {
            kind,
            text,
            line,
            column,
            scope: self.scope,
            origin: Rc::clone(&self.origin),
        });
    }

    fn fail(&self, line: usize, column: usize, message: String) -> AssemblyError {
        AssemblyError::at(
            AssemblyErrorKind::InvalidToken(message),
            SourceLoc::new(self.origin.file.clone(), line, column)
                .with_include_chain(self.origin.include_chain.clone()),
        )
    }

    fn run(&mut self) -> Result<(), AssemblyError> {
        let mut comment = String::new();
        while let Some(c) = self.peek_at(0) {
            let (line, column) = (self.line, self.column);
            if c == '\n' {
                self.bump();
                self.push(TokenKind::Eol, std::mem::take(&mut comment), line, column);
            } else if c.is_whitespace() {
                self.bump();
            } else if c == '"' {
                self.string(line, column)?;
            } else if c.is_ascii_digit()
                || (matches!(c, '-' | '+') && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                self.number(line, column)?;
            } else if self.is_name_char(c) {
                self.name(line, column);
            } else {
                match self.usage(c) {
                    Some(PunctUse::Comment) => {
                        self.bump();
                        let start = self.pos;
                        while self.peek_at(0).is_some_and(|next| next != '\n') {
                            self.bump();
                        }
                        comment = self.chars[start..self.pos].iter().collect::<String>();
                        comment = comment.trim().to_string();
                    }
                    Some(PunctUse::Pseudo) => {
                        self.bump();
                        let start = self.pos;
                        while self.peek_at(0).is_some_and(|next| self.is_name_char(next)) {
                            self.bump();
                        }
                        if start == self.pos {
                            return Err(self.fail(line, column, format!("`{c}` must start a directive")));
                        }
                        let name = self.chars[start..self.pos].iter().collect();
                        self.push(TokenKind::Pseudo, name, line, column);
                    }
                    Some(PunctUse::Token) => {
                        self.bump();
                        self.push(TokenKind::Punct(c), c.to_string(), line, column);
                    }
                    Some(PunctUse::Label) => {
                        return Err(self.fail(line, column, format!("`{c}` must follow a label name")));
                    }
                    Some(PunctUse::Illegal) => {
                        return Err(self.fail(line, column, format!("`{c}` is not allowed")));
                    }
                    Some(PunctUse::Symbol) | None => {
                        return Err(self.fail(line, column, format!("unexpected character `{c}`")));
                    }
                }
            }
        }
        let (line, column) = (self.line, self.column);
        self.push(TokenKind::Eol, comment, line, column);
        self.push(TokenKind::Eof, String::new(), line, column);
        Ok(())
    }

    fn name(&mut self, line: usize, column: usize) {
        let start = self.pos;
        while self.peek_at(0).is_some_and(|c| self.is_name_char(c)) {
            self.bump();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if self
            .peek_at(0)
            .is_some_and(|c| self.usage(c) == Some(PunctUse::Label))
        {
            self.bump();
            self.push(TokenKind::Label, text, line, column);
        } else {
            self.push(TokenKind::Symbol, text, line, column);
        }
    }

    fn number(&mut self, line: usize, column: usize) -> Result<(), AssemblyError> {
        let start = self.pos;
        let negative = self.peek_at(0) == Some('-');
        if matches!(self.peek_at(0), Some('-' | '+')) {
            self.bump();
        }
        while self.peek_at(0).is_some_and(|c| self.is_name_char(c)) {
            self.bump();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let digits = text.trim_start_matches(['-', '+']).replace('_', "");
        let lower = digits.to_ascii_lowercase();
        let parsed = if let Some(hex) = lower.strip_prefix("0x") {
            i128::from_str_radix(hex, 16)
        } else if let Some(binary) = lower.strip_prefix("0b") {
            i128::from_str_radix(binary, 2)
        } else {
            lower.parse::<i128>()
        };
        let magnitude = parsed.map_err(|_| self.fail(line, column, format!("malformed number `{text}`")))?;
        let value = if negative { -magnitude } else { magnitude };
        if value < i128::from(i64::MIN) || value > i128::from(u64::MAX) {
            return Err(self.fail(line, column, format!("number `{text}` does not fit in 64 bits")));
        }
        self.push(TokenKind::Constant(value), text, line, column);
        Ok(())
    }

    fn string(&mut self, line: usize, column: usize) -> Result<(), AssemblyError> {
        let start = self.pos;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('0') => '\0',
                        Some(c @ ('\\' | '"' | '\'')) => c,
                        Some(c) => {
                            return Err(self.fail(line, column, format!("unknown escape `\\{c}`")));
                        }
                        None => return Err(self.fail(line, column, "unterminated string".into())),
                    };
                    value.push(escaped);
                }
                Some('\n') | None => {
                    return Err(self.fail(line, column, "unterminated string".into()));
                }
                Some(c) => value.push(c),
            }
        }
        let text = self.chars[start..self.pos].iter().collect();
        self.push(TokenKind::Str(value), text, line, column);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::default_punctuation;

    fn tokens(text: &str) -> Vec<TokenKind> {
        let origin = Rc::new(Origin {
            file: PathBuf::from("test.asm"),
            include_chain: Vec::new(),
        });
        scan(text, &default_punctuation(), origin, 0)
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    fn scan_err(text: &str) -> AssemblyError {
        let origin = Rc::new(Origin {
            file: PathBuf::from("test.asm"),
            include_chain: Vec::new(),
        });
        scan(text, &default_punctuation(), origin, 0).unwrap_err()
    }

    #[test]
    fn scans_label_instruction_and_comment() {
        let origin = Rc::new(Origin {
            file: PathBuf::from("test.asm"),
            include_chain: Vec::new(),
        });
        let scanned = scan("loop: add x ; bump\n", &default_punctuation(), origin, 0).unwrap();
        let kinds: Vec<&TokenKind> = scanned.iter().map(|token| &token.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &TokenKind::Label,
                &TokenKind::Symbol,
                &TokenKind::Symbol,
                &TokenKind::Eol,
                &TokenKind::Eol,
                &TokenKind::Eof
            ]
        );
        assert_eq!(scanned[0].text, "loop");
        assert_eq!(scanned[2].column, 11);
        assert_eq!(scanned[3].text, "bump");
    }

    #[test]
    fn scans_numbers_in_each_radix() {
        assert_eq!(
            tokens("12 -7 0x1F 0b101 +3"),
            vec![
                TokenKind::Constant(12),
                TokenKind::Constant(-7),
                TokenKind::Constant(31),
                TokenKind::Constant(5),
                TokenKind::Constant(3),
                TokenKind::Eol,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn punctuation_tokens_and_directives() {
        assert_eq!(
            tokens(".data 2 [1, x]"),
            vec![
                TokenKind::Pseudo,
                TokenKind::Constant(2),
                TokenKind::Punct('['),
                TokenKind::Constant(1),
                TokenKind::Punct(','),
                TokenKind::Symbol,
                TokenKind::Punct(']'),
                TokenKind::Eol,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn strings_process_escapes() {
        assert_eq!(
            tokens(r#".ascii "a\"b\n""#)[1],
            TokenKind::Str("a\"b\n".to_string())
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(scan_err("12ab").kind, AssemblyErrorKind::InvalidToken(_)));
        assert!(matches!(scan_err("\"open").kind, AssemblyErrorKind::InvalidToken(_)));
        assert!(matches!(scan_err("a : b").kind, AssemblyErrorKind::InvalidToken(_)));
        let err = scan_err("ok\n  'x'");
        assert_eq!(err.location.unwrap().format_location(), "test.asm:2:3");
    }

    #[test]
    fn symbol_punctuation_extends_names() {
        let origin = Rc::new(Origin {
            file: PathBuf::from("test.asm"),
            include_chain: Vec::new(),
        });
        let scanned = scan("_start$1:", &default_punctuation(), origin, 0).unwrap();
        assert_eq!(scanned[0].kind, TokenKind::Label);
        assert_eq!(scanned[0].text, "_start$1");
    }
}

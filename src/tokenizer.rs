//! Lexical analysis: turns the raw input string into classified tokens.
//!
//! The parser pulls tokens one at a time through [`Lexer::advance`] and
//! [`Lexer::peek`]. Words are scanned whole and only then checked against the
//! keyword table, so `ifx` is an identifier rather than `if` followed by `x`.
//! Comments run from one `|` to the next (or to the end of input) and do not
//! nest.

use crate::error::{CompileError, CompileResult};

/// Delimiter that opens and closes a comment.
pub const COMMENT: u8 = b'|';

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  If,
  Not,
  While,
  End,
  Done,
  Write,
  Read,
  Free,
  Macro,
  Takes,
  Define,
  Emcro,
  Call,
  Breakpoint,
  Ident,
  Literal,
  Assign,
  AddAssign,
  SubAssign,
  Eof,
}

const KEYWORDS: [(&str, TokenKind); 14] = [
  ("if", TokenKind::If),
  ("not", TokenKind::Not),
  ("while", TokenKind::While),
  ("end", TokenKind::End),
  ("done", TokenKind::Done),
  ("write", TokenKind::Write),
  ("read", TokenKind::Read),
  ("free", TokenKind::Free),
  ("macro", TokenKind::Macro),
  ("takes", TokenKind::Takes),
  ("define", TokenKind::Define),
  ("emcro", TokenKind::Emcro),
  ("call", TokenKind::Call),
  ("breakpoint", TokenKind::Breakpoint),
];

const OPERATORS: [(&str, TokenKind); 3] = [
  ("+=", TokenKind::AddAssign),
  ("-=", TokenKind::SubAssign),
  ("=", TokenKind::Assign),
];

/// A classified lexeme together with the line it started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub text: String,
  pub line: usize,
}

impl Token {
  pub fn new(kind: TokenKind, text: impl Into<String>, line: usize) -> Self {
    Self {
      kind,
      text: text.into(),
      line,
    }
  }

  pub fn is(&self, kind: TokenKind) -> bool {
    self.kind == kind
  }

  /// Human-friendly description used in diagnostics.
  pub fn describe(&self) -> &str {
    match self.kind {
      TokenKind::Eof => "end of input",
      _ => &self.text,
    }
  }
}

/// Pull-based scanner over a source string.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
  source: &'a str,
  pos: usize,
  line: usize,
}

impl<'a> Lexer<'a> {
  pub fn new(source: &'a str) -> Self {
    Self {
      source,
      pos: 0,
      line: 1,
    }
  }

  /// Consume and return the next token.
  ///
  /// An unclassifiable run is consumed up to the next whitespace before the
  /// error is returned, so a caller that keeps going resumes after it.
  pub fn advance(&mut self) -> CompileResult<Token> {
    let (result, pos, line) = self.scan();
    self.pos = pos;
    self.line = line;
    result
  }

  /// Return the next token without consuming it.
  pub fn peek(&self) -> CompileResult<Token> {
    self.scan().0
  }

  /// Current 1-based line counter.
  pub fn line(&self) -> usize {
    self.line
  }

  fn scan(&self) -> (CompileResult<Token>, usize, usize) {
    let bytes = self.source.as_bytes();
    let (mut i, line) = skip_trivia(bytes, self.pos, self.line);

    if i >= bytes.len() {
      return (Ok(Token::new(TokenKind::Eof, "", line)), i, line);
    }

    let c = bytes[i];
    let start = i;

    if c.is_ascii_alphabetic() || c == b'_' {
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let word = &self.source[start..i];
      let kind = KEYWORDS
        .iter()
        .find(|(keyword, _)| *keyword == word)
        .map_or(TokenKind::Ident, |(_, kind)| *kind);
      return (Ok(Token::new(kind, word, line)), i, line);
    }

    if c.is_ascii_digit() {
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &self.source[start..i];
      return (Ok(Token::new(TokenKind::Literal, text, line)), i, line);
    }

    if c == b'\'' {
      let mut chars = self.source[start + 1..].chars();
      if let Some(quoted) = chars.next()
        && quoted != '\n'
        && chars.next() == Some('\'')
      {
        i = start + 1 + quoted.len_utf8() + 1;
        let text = &self.source[start..i];
        return (Ok(Token::new(TokenKind::Literal, text, line)), i, line);
      }
    }

    if let Some((op, kind)) = OPERATORS
      .iter()
      .find(|(op, _)| self.source[i..].starts_with(op))
    {
      i += op.len();
      return (Ok(Token::new(*kind, *op, line)), i, line);
    }

    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
      i += 1;
    }
    // Stop on a char boundary so the error text is valid UTF-8.
    while !self.source.is_char_boundary(i) {
      i += 1;
    }
    let text = self.source[start..i].to_string();
    let err = CompileError::UnrecognizedToken {
      text,
      line: Some(line),
    };
    (Err(err), i, line)
  }
}

/// Skip whitespace and comments, counting newlines on the way.
fn skip_trivia(bytes: &[u8], mut i: usize, mut line: usize) -> (usize, usize) {
  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      if c == b'\n' {
        line += 1;
      }
      i += 1;
      continue;
    }

    if c == COMMENT {
      i += 1;
      while i < bytes.len() && bytes[i] != COMMENT {
        if bytes[i] == b'\n' {
          line += 1;
        }
        i += 1;
      }
      if i < bytes.len() {
        i += 1;
      }
      continue;
    }

    break;
  }
  (i, line)
}

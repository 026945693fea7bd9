//! Shared error utilities used across the compilation pipeline.
//!
//! Every stage reports through a [`Reporter`]. The default policy,
//! [`FailFast`], hands the error straight back so `?` unwinds the stage at
//! the first problem. [`Collect`] records the error and lets the stage skip
//! the offending statement and keep going, which is what tooling and the
//! `--keep-going` flag want.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// Classification shared by every reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  InvalidLiteral,
  InvalidIdentifier,
  MismatchedEnd,
  InvalidOperator,
  InvalidRightHandSide,
  UnrecognizedToken,
  ArgumentCount,
  MacroRecursion,
  UnexpandedMacro,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::InvalidLiteral => "invalid literal",
      ErrorKind::InvalidIdentifier => "invalid identifier",
      ErrorKind::MismatchedEnd => "mismatched end",
      ErrorKind::InvalidOperator => "invalid operator",
      ErrorKind::InvalidRightHandSide => "invalid right-hand side",
      ErrorKind::UnrecognizedToken => "unrecognized token",
      ErrorKind::ArgumentCount => "wrong argument count",
      ErrorKind::MacroRecursion => "recursive macro",
      ErrorKind::UnexpandedMacro => "unexpanded macro",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum CompileError {
  #[snafu(display("invalid literal: \"{value}\"{}", at_line(line)))]
  InvalidLiteral { value: String, line: Option<usize> },

  #[snafu(display("invalid identifier: \"{name}\" {reason}{}", at_line(line)))]
  InvalidIdentifier {
    name: String,
    reason: String,
    line: Option<usize>,
  },

  #[snafu(display("mismatched end: {message}{}", at_line(line)))]
  MismatchedEnd {
    message: String,
    line: Option<usize>,
  },

  #[snafu(display("invalid operator: expected =, += or -= but got \"{found}\"{}", at_line(line)))]
  InvalidOperator { found: String, line: Option<usize> },

  #[snafu(display(
    "invalid right-hand side: expected an identifier or literal but got \"{found}\"{}",
    at_line(line)
  ))]
  InvalidRightHandSide { found: String, line: Option<usize> },

  #[snafu(display("unrecognized token: \"{text}\"{}", at_line(line)))]
  UnrecognizedToken { text: String, line: Option<usize> },

  #[snafu(display(
    "wrong argument count: macro \"{name}\" takes {expected} argument(s), got {found}{}",
    at_line(line)
  ))]
  ArgumentCount {
    name: String,
    expected: usize,
    found: usize,
    line: Option<usize>,
  },

  #[snafu(display("recursive macro: \"{name}\" expands into itself via {chain}{}", at_line(line)))]
  MacroRecursion {
    name: String,
    chain: String,
    line: Option<usize>,
  },

  #[snafu(display(
    "unexpanded macro: call to \"{name}\" reached code generation{}",
    at_line(line)
  ))]
  UnexpandedMacro { name: String, line: Option<usize> },
}

fn at_line(line: &Option<usize>) -> String {
  match line {
    Some(line) => format!(" at line {line}"),
    None => String::new(),
  }
}

impl CompileError {
  pub fn invalid_literal(value: impl Into<String>, line: Option<usize>) -> Self {
    Self::InvalidLiteral {
      value: value.into(),
      line,
    }
  }

  pub fn invalid_identifier(
    name: impl Into<String>,
    reason: impl Into<String>,
    line: Option<usize>,
  ) -> Self {
    Self::InvalidIdentifier {
      name: name.into(),
      reason: reason.into(),
      line,
    }
  }

  pub fn mismatched_end(message: impl Into<String>, line: usize) -> Self {
    Self::MismatchedEnd {
      message: message.into(),
      line: Some(line),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InvalidLiteral { .. } => ErrorKind::InvalidLiteral,
      Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
      Self::MismatchedEnd { .. } => ErrorKind::MismatchedEnd,
      Self::InvalidOperator { .. } => ErrorKind::InvalidOperator,
      Self::InvalidRightHandSide { .. } => ErrorKind::InvalidRightHandSide,
      Self::UnrecognizedToken { .. } => ErrorKind::UnrecognizedToken,
      Self::ArgumentCount { .. } => ErrorKind::ArgumentCount,
      Self::MacroRecursion { .. } => ErrorKind::MacroRecursion,
      Self::UnexpandedMacro { .. } => ErrorKind::UnexpandedMacro,
    }
  }

  /// Source line the error was detected on, when the stage knows it.
  pub fn line(&self) -> Option<usize> {
    match self {
      Self::InvalidLiteral { line, .. }
      | Self::InvalidIdentifier { line, .. }
      | Self::MismatchedEnd { line, .. }
      | Self::InvalidOperator { line, .. }
      | Self::InvalidRightHandSide { line, .. }
      | Self::UnrecognizedToken { line, .. }
      | Self::ArgumentCount { line, .. }
      | Self::MacroRecursion { line, .. }
      | Self::UnexpandedMacro { line, .. } => *line,
    }
  }
}

/// Policy deciding what happens to an error once a stage detects it.
///
/// Returning `Err` aborts the stage; returning `Ok(())` asks the stage to
/// recover as far as it structurally can and continue.
pub trait Reporter {
  fn report(&mut self, error: CompileError) -> CompileResult<()>;
}

/// Abort on the first error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailFast;

impl Reporter for FailFast {
  fn report(&mut self, error: CompileError) -> CompileResult<()> {
    Err(error)
  }
}

/// Record every error and keep going.
#[derive(Debug, Default)]
pub struct Collect {
  errors: Vec<CompileError>,
}

impl Collect {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn errors(&self) -> &[CompileError] {
    &self.errors
  }

  pub fn has_errors(&self) -> bool {
    !self.errors.is_empty()
  }

  pub fn into_errors(self) -> Vec<CompileError> {
    self.errors
  }
}

impl Reporter for Collect {
  fn report(&mut self, error: CompileError) -> CompileResult<()> {
    log::debug!("recorded: {error}");
    self.errors.push(error);
    Ok(())
  }
}

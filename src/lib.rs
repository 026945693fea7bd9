//! Crate root: wires together the compilation pipeline.
//!
//! - `tokenizer` scans source text into classified tokens on demand.
//! - `parser` builds the syntax tree and expands every macro call in place.
//! - `memory` assigns variables and scratch values to tape cells.
//! - `codegen` lowers the expanded tree into tape-machine instructions.
//! - `error` holds the classified error type and the reporting policies.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod memory;
pub mod parser;
pub mod tokenizer;

pub use error::{Collect, CompileError, CompileResult, ErrorKind, FailFast, Reporter};
pub use parser::parse;

/// Compile a source string into tape-machine code, stopping at the first error.
pub fn compile(source: &str) -> CompileResult<String> {
  compile_with(source, &mut FailFast)
}

/// Compile a source string, sending every error to `reporter`.
///
/// With a collecting reporter the returned code is only meaningful when no
/// error was recorded.
pub fn compile_with(source: &str, reporter: &mut dyn Reporter) -> CompileResult<String> {
  compile_inspect(source, reporter, |_| {})
}

/// Like [`compile_with`], handing the expanded tree to `inspect` before any
/// code is generated.
pub fn compile_inspect(
  source: &str,
  reporter: &mut dyn Reporter,
  inspect: impl FnOnce(&ast::Block),
) -> CompileResult<String> {
  let program = parser::parse_with(source, reporter)?;
  inspect(&program);
  codegen::generate_with(&program, reporter)
}

//! Code generation: lower the expanded tree into tape-machine instructions.
//!
//! The target only has "loop while the current cell is nonzero", so every
//! conditional is built from loops over scratch cells. Each construct
//! allocates its temporaries from the memory manager and releases them
//! (cleared) before it finishes, so they never leak into later statements.
//!
//! A `free` inside a conditional body may never run, so the cell it names is
//! cleared but not handed back for reuse.
//!
//! Loops are always opened and closed with the pointer on the same cell,
//! which keeps the statically tracked pointer correct whatever the loop
//! count turns out to be at run time.

use log::debug;

use crate::ast::{Block, Ident, Literal, Node, Operand};
use crate::error::{CompileError, CompileResult, FailFast, Reporter};
use crate::memory::MemoryManager;

/// The target machine's instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
  Inc,
  Dec,
  Left,
  Right,
  Read,
  Write,
  Open,
  Close,
  Breakpoint,
}

impl Instr {
  /// Idiom zeroing the current cell.
  pub const CLEAR: &'static str = "[-]";

  pub const fn symbol(self) -> char {
    match self {
      Instr::Inc => '+',
      Instr::Dec => '-',
      Instr::Left => '<',
      Instr::Right => '>',
      Instr::Read => ',',
      Instr::Write => '.',
      Instr::Open => '[',
      Instr::Close => ']',
      Instr::Breakpoint => '!',
    }
  }

  pub fn emit(self, out: &mut String) {
    out.push(self.symbol());
  }

  pub fn emit_n(self, out: &mut String, count: usize) {
    out.extend(std::iter::repeat_n(self.symbol(), count));
  }
}

/// Emit code for an expanded program, aborting at the first error.
pub fn generate(program: &Block) -> CompileResult<String> {
  generate_with(program, &mut FailFast)
}

/// Emit code for an expanded program, sending every error to `reporter`.
/// Nodes that fail are skipped.
pub fn generate_with(program: &Block, reporter: &mut dyn Reporter) -> CompileResult<String> {
  let mut generator = CodeGenerator::new(reporter);
  generator.emit_block(program)?;
  debug!(
    "generated {} instruction(s) over {} cell(s), pointer ends on cell {}",
    generator.code.len(),
    generator.memory.cells_used(),
    generator.memory.pointer()
  );
  Ok(generator.code)
}

struct CodeGenerator<'r> {
  memory: MemoryManager,
  code: String,
  reporter: &'r mut dyn Reporter,
  /// Number of enclosing bodies that may run zero times.
  conditional: usize,
}

impl<'r> CodeGenerator<'r> {
  fn new(reporter: &'r mut dyn Reporter) -> Self {
    Self {
      memory: MemoryManager::new(),
      code: String::new(),
      reporter,
      conditional: 0,
    }
  }

  // Primitive operations on a cell.

  fn inc(&mut self, cell: usize, count: usize) {
    self.memory.move_to(cell, &mut self.code);
    Instr::Inc.emit_n(&mut self.code, count);
  }

  fn dec(&mut self, cell: usize, count: usize) {
    self.memory.move_to(cell, &mut self.code);
    Instr::Dec.emit_n(&mut self.code, count);
  }

  fn clear(&mut self, cell: usize) {
    self.memory.move_to(cell, &mut self.code);
    self.code.push_str(Instr::CLEAR);
  }

  fn open_at(&mut self, cell: usize) {
    self.memory.move_to(cell, &mut self.code);
    Instr::Open.emit(&mut self.code);
  }

  fn close_at(&mut self, cell: usize) {
    self.memory.move_to(cell, &mut self.code);
    Instr::Close.emit(&mut self.code);
  }

  fn emit_at(&mut self, cell: usize, instr: Instr) {
    self.memory.move_to(cell, &mut self.code);
    instr.emit(&mut self.code);
  }

  fn locate(&mut self, ident: &Ident) -> usize {
    self.memory.locate(&ident.name, &mut self.code)
  }

  fn temp(&mut self) -> usize {
    self.memory.temp(&mut self.code)
  }

  fn release_temp(&mut self, cell: usize) {
    self.memory.release_temp(cell, &mut self.code);
  }

  // Composite operations.

  /// `to = from`, leaving `from` unchanged. `from` is drained into `to` and a
  /// scratch cell, then refilled from the scratch cell.
  fn copy(&mut self, from: usize, to: usize) {
    self.clear(to);
    let tmp = self.temp();

    self.open_at(from);
    self.inc(tmp, 1);
    self.inc(to, 1);
    self.dec(from, 1);
    self.close_at(from);

    self.open_at(tmp);
    self.inc(from, 1);
    self.dec(tmp, 1);
    self.close_at(tmp);

    self.release_temp(tmp);
  }

  fn add(&mut self, left: usize, right: usize) {
    self.drain_copy_into(left, right, Instr::Inc);
  }

  fn sub(&mut self, left: usize, right: usize) {
    self.drain_copy_into(left, right, Instr::Dec);
  }

  /// Copy `right` to a scratch cell and drain it into `left` one unit at a time.
  fn drain_copy_into(&mut self, left: usize, right: usize, step: Instr) {
    let tmp = self.temp();
    self.copy(right, tmp);

    self.open_at(tmp);
    self.emit_at(left, step);
    self.dec(tmp, 1);
    self.close_at(tmp);

    self.release_temp(tmp);
  }

  /// Leave a fresh scratch cell holding 1 if `cond` is zero, 0 otherwise.
  /// Returns `(scratch, flag)`; both must be released by the caller.
  fn zero_flag(&mut self, cond: usize) -> (usize, usize) {
    let scratch = self.temp();
    let flag = self.temp();

    self.copy(cond, scratch);
    self.inc(flag, 1);

    self.open_at(scratch);
    self.clear(scratch);
    self.dec(flag, 1);
    self.close_at(scratch);

    (scratch, flag)
  }

  // Checks that report and let the caller skip the node.

  fn count(&mut self, lit: &Literal) -> CompileResult<Option<usize>> {
    let text = lit.text.as_str();
    let parsed = if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
      text.parse::<u64>().ok()
    } else {
      None
    };
    match parsed {
      Some(value) => Ok(Some((value % 256) as usize)),
      None => {
        self
          .reporter
          .report(CompileError::invalid_literal(text, None))?;
        Ok(None)
      }
    }
  }

  fn declared(&mut self, ident: &Ident) -> CompileResult<bool> {
    if self.memory.is_declared(&ident.name) {
      return Ok(true);
    }
    self.reporter.report(CompileError::invalid_identifier(
      ident.name.as_str(),
      "is not declared",
      None,
    ))?;
    Ok(false)
  }

  // Tree walk.

  /// Emit a body that may be skipped at run time.
  fn emit_conditional_block(&mut self, body: &Block) -> CompileResult<()> {
    self.conditional += 1;
    let result = self.emit_block(body);
    self.conditional -= 1;
    result
  }

  fn emit_block(&mut self, block: &Block) -> CompileResult<()> {
    for node in &block.nodes {
      self.emit_node(node)?;
    }
    Ok(())
  }

  fn emit_node(&mut self, node: &Node) -> CompileResult<()> {
    match node {
      Node::Block(block) => self.emit_block(block)?,
      Node::Assign { target, value } => self.emit_assign(target, value)?,
      Node::Add { target, value } => self.emit_update(target, value, Instr::Inc)?,
      Node::Sub { target, value } => self.emit_update(target, value, Instr::Dec)?,
      Node::Write(value) => self.emit_write(value)?,
      Node::Read(ident) => {
        let cell = self.locate(ident);
        self.emit_at(cell, Instr::Read);
      }
      Node::Free(ident) => {
        let released = if self.conditional > 0 {
          self.memory.forget(&ident.name, &mut self.code)
        } else {
          self.memory.release(&ident.name, &mut self.code)
        };
        if released.is_none() {
          self.reporter.report(CompileError::invalid_identifier(
            ident.name.as_str(),
            "is freed but was never declared",
            None,
          ))?;
        }
      }
      Node::If { cond, body } => self.emit_if(cond, body)?,
      Node::IfNot { cond, body } => self.emit_if_not(cond, body)?,
      Node::While { cond, body } => {
        let cell = self.locate(cond);
        self.open_at(cell);
        self.emit_conditional_block(body)?;
        self.close_at(cell);
      }
      Node::WhileNot { cond, body } => self.emit_while_not(cond, body)?,
      Node::MacroDef(_) => {}
      Node::MacroCall(call) => {
        self.reporter.report(CompileError::UnexpandedMacro {
          name: call.name.clone(),
          line: Some(call.line),
        })?;
      }
      Node::Breakpoint => Instr::Breakpoint.emit(&mut self.code),
    }
    Ok(())
  }

  fn emit_assign(&mut self, target: &Ident, value: &Operand) -> CompileResult<()> {
    match value {
      Operand::Literal(lit) => {
        let Some(count) = self.count(lit)? else {
          return Ok(());
        };
        let cell = self.memory.locate_and_clear(&target.name, &mut self.code);
        self.inc(cell, count);
      }
      Operand::Ident(source) => {
        if !self.declared(source)? {
          return Ok(());
        }
        if source == target {
          self.locate(target);
          return Ok(());
        }
        let to = self.memory.locate_and_clear(&target.name, &mut self.code);
        let from = self.locate(source);
        self.copy(from, to);
      }
    }
    Ok(())
  }

  /// `+=` and `-=`; `step` picks the direction.
  fn emit_update(&mut self, target: &Ident, value: &Operand, step: Instr) -> CompileResult<()> {
    match value {
      Operand::Literal(lit) => {
        let Some(count) = self.count(lit)? else {
          return Ok(());
        };
        self.locate(target);
        step.emit_n(&mut self.code, count);
      }
      Operand::Ident(source) => {
        if !self.declared(source)? {
          return Ok(());
        }
        let left = self.locate(target);
        let right = self.locate(source);
        match step {
          Instr::Inc => self.add(left, right),
          _ => self.sub(left, right),
        }
      }
    }
    Ok(())
  }

  fn emit_write(&mut self, value: &Operand) -> CompileResult<()> {
    match value {
      Operand::Literal(lit) => {
        let Some(count) = self.count(lit)? else {
          return Ok(());
        };
        let tmp = self.temp();
        self.inc(tmp, count);
        self.emit_at(tmp, Instr::Write);
        self.release_temp(tmp);
      }
      Operand::Ident(ident) => {
        if !self.declared(ident)? {
          return Ok(());
        }
        let cell = self.locate(ident);
        self.emit_at(cell, Instr::Write);
      }
    }
    Ok(())
  }

  /// Run `body` at most once: the loop runs on a copy of `cond` that the
  /// loop itself zeroes.
  fn emit_if(&mut self, cond: &Ident, body: &Block) -> CompileResult<()> {
    let cell = self.locate(cond);
    let tmp = self.temp();
    self.copy(cell, tmp);

    self.open_at(tmp);
    self.emit_conditional_block(body)?;
    self.clear(tmp);
    self.close_at(tmp);

    self.release_temp(tmp);
    Ok(())
  }

  fn emit_if_not(&mut self, cond: &Ident, body: &Block) -> CompileResult<()> {
    let cell = self.locate(cond);
    let (scratch, flag) = self.zero_flag(cell);

    self.open_at(flag);
    self.dec(flag, 1);
    self.emit_conditional_block(body)?;
    self.close_at(flag);

    self.release_temp(scratch);
    self.release_temp(flag);
    Ok(())
  }

  /// Loop while `cond` is zero. A gate cell is set only if `cond` starts at
  /// zero; after each pass `cond` is re-tested and a nonzero value drops the
  /// gate, ending the loop.
  fn emit_while_not(&mut self, cond: &Ident, body: &Block) -> CompileResult<()> {
    let cell = self.locate(cond);
    let (scratch, flag) = self.zero_flag(cell);

    self.open_at(flag);
    self.dec(flag, 1);

    let gate = self.temp();
    self.inc(gate, 1);
    self.open_at(gate);

    self.emit_conditional_block(body)?;

    let retest = self.temp();
    self.copy(cell, retest);
    self.open_at(retest);
    self.clear(retest);
    self.dec(gate, 1);
    self.close_at(retest);

    self.close_at(gate);
    self.close_at(flag);

    for tmp in [scratch, flag, gate, retest] {
      self.release_temp(tmp);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{Collect, ErrorKind};
  use crate::parser::parse;

  fn compile(source: &str) -> CompileResult<String> {
    generate(&parse(source)?)
  }

  #[test]
  fn literal_assignment_clears_then_increments() {
    assert_eq!(compile("x = 3").unwrap(), "[-]+++");
    assert_eq!(compile("x = 1 y = 2").unwrap(), "[-]+>[-]++");
  }

  #[test]
  fn literal_values_wrap_at_256() {
    assert_eq!(compile("x = 258").unwrap(), "[-]++");
  }

  #[test]
  fn add_and_sub_literals_reuse_the_cell() {
    assert_eq!(compile("x += 2 x -= 1").unwrap(), "++-");
  }

  #[test]
  fn write_literal_uses_a_released_temp() {
    assert_eq!(compile("write 2").unwrap(), "++.[-]");
  }

  #[test]
  fn read_auto_declares() {
    assert_eq!(compile("read a read b write a").unwrap(), ",>,<.");
  }

  #[test]
  fn copy_uses_one_temp_and_restores_the_source() {
    // x at 0, y at 1, scratch at 2.
    assert_eq!(
      compile("x = 1 y = x").unwrap(),
      "[-]+>[-]<>[-]><<[>>+<+<-]>>[<<+>>-][-]"
    );
  }

  #[test]
  fn self_assignment_is_a_no_op() {
    assert_eq!(compile("x = 4 x = x").unwrap(), "[-]++++");
  }

  #[test]
  fn breakpoint_is_a_single_marker() {
    assert_eq!(compile("x = 1 breakpoint").unwrap(), "[-]+!");
  }

  #[test]
  fn macro_definitions_emit_nothing() {
    assert_eq!(compile("macro m takes a define a += 1 emcro").unwrap(), "");
  }

  #[test]
  fn loops_are_balanced() {
    let code = compile(
      "x = 2 y = 0 while x x -= 1 if x y += 1 end if not y y = 9 end end
       while not y y += 1 end",
    )
    .unwrap();
    let opens = code.matches('[').count();
    let closes = code.matches(']').count();
    assert_eq!(opens, closes);
  }

  #[test]
  fn free_in_a_body_keeps_the_cell_out_of_reuse() {
    // x at 0, c at 1, the condition copy at 2 and its scratch at 3. x is
    // cleared inside the body, and y gets the scratch cell rather than x's.
    assert_eq!(
      compile("x = 1 c = 0 if c free x end y = 2").unwrap(),
      "[-]+>[-]>[-]><<[>>+<+<-]>>[<<+>>-][-]<[<<[-]>>[-]][-]>[-]++"
    );
    // At top level the cell goes straight back on the free list.
    assert_eq!(compile("x = 1 free x y = 2").unwrap(), "[-]+[-][-]++");
  }

  #[test]
  fn undeclared_right_hand_side_is_fatal() {
    for source in ["x += y", "x -= y", "x = y", "write y", "free y"] {
      let err = compile(source).unwrap_err();
      assert_eq!(err.kind(), ErrorKind::InvalidIdentifier, "{source}");
    }
  }

  #[test]
  fn non_numeric_literal_is_invalid() {
    let tree = Block::new(vec![Node::Assign {
      target: Ident::new("x"),
      value: Operand::literal("12a"),
    }]);
    assert_eq!(generate(&tree).unwrap_err().kind(), ErrorKind::InvalidLiteral);

    let huge = Block::new(vec![Node::Write(Operand::literal("99999999999999999999999"))]);
    assert_eq!(generate(&huge).unwrap_err().kind(), ErrorKind::InvalidLiteral);
  }

  #[test]
  fn leftover_macro_call_is_rejected() {
    let tree = Block::new(vec![Node::MacroCall(crate::ast::MacroCall {
      name: "m".into(),
      args: vec![],
      line: 4,
    })]);
    let err = generate(&tree).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpandedMacro);
  }

  #[test]
  fn collecting_reporter_skips_bad_nodes() {
    let tree = parse("x += y write z x = 1").unwrap();
    let mut reporter = Collect::new();
    let code = generate_with(&tree, &mut reporter).unwrap();
    assert_eq!(reporter.errors().len(), 2);
    assert_eq!(code, "[-]+");
  }
}

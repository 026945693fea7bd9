//! Tape cell allocation and pointer tracking.
//!
//! Every cell access in the generator goes through this type, so it always
//! knows where the pointer is and can emit the exact relative motion needed
//! to reach a target cell. Released cells are cleared before they go back on
//! the free list, which means any cell handed out (named or temporary) holds
//! zero without an explicit clear.

use std::collections::{HashMap, VecDeque};

use log::trace;

use crate::codegen::Instr;

#[derive(Debug, Default)]
pub struct MemoryManager {
  variables: HashMap<String, usize>,
  /// Released cells, reused oldest first.
  freed: VecDeque<usize>,
  /// First cell never handed out.
  next: usize,
  pointer: usize,
}

impl MemoryManager {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cell the pointer is on after the code emitted so far.
  pub fn pointer(&self) -> usize {
    self.pointer
  }

  /// Number of distinct cells the program has touched.
  pub fn cells_used(&self) -> usize {
    self.next
  }

  pub fn is_declared(&self, name: &str) -> bool {
    self.variables.contains_key(name)
  }

  /// Emit the motion from the current pointer to `cell`.
  pub fn move_to(&mut self, cell: usize, out: &mut String) {
    if cell < self.pointer {
      Instr::Left.emit_n(out, self.pointer - cell);
    } else {
      Instr::Right.emit_n(out, cell - self.pointer);
    }
    self.pointer = cell;
  }

  /// Move to the cell of `name`, allocating one on first use.
  pub fn locate(&mut self, name: &str, out: &mut String) -> usize {
    let cell = match self.variables.get(name) {
      Some(&cell) => cell,
      None => {
        let cell = self.allocate();
        trace!("variable \"{name}\" -> cell {cell}");
        self.variables.insert(name.to_string(), cell);
        cell
      }
    };
    self.move_to(cell, out);
    cell
  }

  pub fn locate_and_clear(&mut self, name: &str, out: &mut String) -> usize {
    let cell = self.locate(name, out);
    out.push_str(Instr::CLEAR);
    cell
  }

  /// Allocate an anonymous scratch cell and move to it.
  pub fn temp(&mut self, out: &mut String) -> usize {
    let cell = self.allocate();
    trace!("temp -> cell {cell}");
    self.move_to(cell, out);
    cell
  }

  /// Clear `cell` and return it to the free list.
  pub fn release_temp(&mut self, cell: usize, out: &mut String) {
    self.move_to(cell, out);
    out.push_str(Instr::CLEAR);
    self.freed.push_back(cell);
    trace!("released cell {cell}");
  }

  /// Release the cell of `name` and forget the name. Returns the cell, or
  /// `None` when the name was never declared.
  pub fn release(&mut self, name: &str, out: &mut String) -> Option<usize> {
    let cell = self.variables.remove(name)?;
    trace!("freeing variable \"{name}\"");
    self.release_temp(cell, out);
    Some(cell)
  }

  /// Clear the cell of `name` and forget the name without making the cell
  /// available again. Used where the clearing code might never run.
  pub fn forget(&mut self, name: &str, out: &mut String) -> Option<usize> {
    let cell = self.variables.remove(name)?;
    trace!("forgetting variable \"{name}\", cell {cell} retired");
    self.move_to(cell, out);
    out.push_str(Instr::CLEAR);
    Some(cell)
  }

  fn allocate(&mut self) -> usize {
    if let Some(cell) = self.freed.pop_front() {
      return cell;
    }
    let cell = self.next;
    self.next += 1;
    cell
  }
}

//! Syntax tree shared by the parser and the code generator.
//!
//! Identifiers carry only a name; the memory manager resolves them to cells
//! lazily while code is generated. Literals keep their source text (character
//! literals already rewritten to their decimal code) and are turned into
//! numbers by the generator.

use std::fmt;

/// A variable reference by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
  pub name: String,
}

impl Ident {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

/// An integer literal as written (after character-literal resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
  pub text: String,
}

impl Literal {
  pub fn new(text: impl Into<String>) -> Self {
    Self { text: text.into() }
  }
}

/// Right-hand operand: either a variable or a literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  Ident(Ident),
  Literal(Literal),
}

impl Operand {
  pub fn ident(name: impl Into<String>) -> Self {
    Self::Ident(Ident::new(name))
  }

  pub fn literal(text: impl Into<String>) -> Self {
    Self::Literal(Literal::new(text))
  }
}

/// Ordered statement list. The root of every tree is a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
  pub nodes: Vec<Node>,
}

impl Block {
  pub fn new(nodes: Vec<Node>) -> Self {
    Self { nodes }
  }

  pub fn push(&mut self, node: Node) {
    self.nodes.push(node);
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }
}

/// A named template; never emits code by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDef {
  pub name: String,
  pub params: Vec<Ident>,
  pub body: Block,
}

/// A deferred macro invocation. Only ever found inside a macro body; the
/// parser replaces it with the expanded block before the tree is handed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroCall {
  pub name: String,
  pub args: Vec<Operand>,
  pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
  Block(Block),
  Assign { target: Ident, value: Operand },
  Add { target: Ident, value: Operand },
  Sub { target: Ident, value: Operand },
  If { cond: Ident, body: Block },
  IfNot { cond: Ident, body: Block },
  While { cond: Ident, body: Block },
  WhileNot { cond: Ident, body: Block },
  Write(Operand),
  Read(Ident),
  Free(Ident),
  MacroDef(MacroDef),
  MacroCall(MacroCall),
  Breakpoint,
}

impl fmt::Display for Ident {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.name)
  }
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Operand::Ident(ident) => write!(f, "{ident}"),
      Operand::Literal(lit) => write!(f, "#{}", lit.text),
    }
  }
}

impl fmt::Display for Block {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "Program")?;
    write_block(f, self, 1)
  }
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &Block, depth: usize) -> fmt::Result {
  for node in &block.nodes {
    write_node(f, node, depth)?;
  }
  Ok(())
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &Node, depth: usize) -> fmt::Result {
  let pad = "  ".repeat(depth);
  match node {
    Node::Block(block) => {
      writeln!(f, "{pad}Block")?;
      write_block(f, block, depth + 1)
    }
    Node::Assign { target, value } => writeln!(f, "{pad}Assign {target} = {value}"),
    Node::Add { target, value } => writeln!(f, "{pad}Add {target} += {value}"),
    Node::Sub { target, value } => writeln!(f, "{pad}Sub {target} -= {value}"),
    Node::If { cond, body } => {
      writeln!(f, "{pad}If {cond}")?;
      write_block(f, body, depth + 1)
    }
    Node::IfNot { cond, body } => {
      writeln!(f, "{pad}IfNot {cond}")?;
      write_block(f, body, depth + 1)
    }
    Node::While { cond, body } => {
      writeln!(f, "{pad}While {cond}")?;
      write_block(f, body, depth + 1)
    }
    Node::WhileNot { cond, body } => {
      writeln!(f, "{pad}WhileNot {cond}")?;
      write_block(f, body, depth + 1)
    }
    Node::Write(value) => writeln!(f, "{pad}Write {value}"),
    Node::Read(ident) => writeln!(f, "{pad}Read {ident}"),
    Node::Free(ident) => writeln!(f, "{pad}Free {ident}"),
    Node::MacroDef(def) => {
      let params: Vec<&str> = def.params.iter().map(|p| p.name.as_str()).collect();
      writeln!(f, "{pad}Macro {}({})", def.name, params.join(", "))?;
      write_block(f, &def.body, depth + 1)
    }
    Node::MacroCall(call) => {
      let args: Vec<String> = call.args.iter().map(ToString::to_string).collect();
      writeln!(f, "{pad}Call {}({})", call.name, args.join(", "))
    }
    Node::Breakpoint => writeln!(f, "{pad}Breakpoint"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tree_printer_indents_bodies() {
    let tree = Block::new(vec![
      Node::Assign {
        target: Ident::new("x"),
        value: Operand::literal("3"),
      },
      Node::While {
        cond: Ident::new("x"),
        body: Block::new(vec![Node::Sub {
          target: Ident::new("x"),
          value: Operand::literal("1"),
        }]),
      },
      Node::Write(Operand::ident("x")),
    ]);
    assert_eq!(
      tree.to_string(),
      "Program\n  Assign x = #3\n  While x\n    Sub x -= #1\n  Write x\n"
    );
  }
}

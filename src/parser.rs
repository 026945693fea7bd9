//! Recursive-descent statement parser with macro capture and expansion.
//!
//! Blocks are parsed by recursion: `if`/`while` bodies run until `end`,
//! macro bodies until `emcro`, and the root until `done` or the end of input.
//! A closer that does not match the innermost open block is a mismatched end.
//!
//! Macros are templates. A `call` at statement level is expanded on the spot
//! by deep-copying the macro body with every parameter identifier replaced by
//! the matching argument. Substitution is deliberately non-hygienic: any
//! identifier that is not a parameter keeps its name and so refers to the
//! caller's variable of that name. A `call` written inside a macro body is
//! kept as a [`MacroCall`] node and expanded only when the enclosing macro is,
//! with the outer bindings visible underneath its own parameters.

use std::collections::HashMap;

use log::{debug, warn};

use crate::ast::{Block, Ident, Literal, MacroCall, MacroDef, Node, Operand};
use crate::error::{CompileError, CompileResult, FailFast, Reporter};
use crate::tokenizer::{Lexer, Token, TokenKind};

/// Parameter name to the operand it stands for during one expansion.
type Bindings = HashMap<String, Operand>;

/// Parse and fully expand a program, aborting at the first error.
pub fn parse(source: &str) -> CompileResult<Block> {
  parse_with(source, &mut FailFast)
}

/// Parse and fully expand a program, sending every error to `reporter`.
pub fn parse_with(source: &str, reporter: &mut dyn Reporter) -> CompileResult<Block> {
  let mut parser = Parser::new(source, reporter);
  let root = parser.parse_block(Closer::Root)?;
  debug!(
    "parsed {} top-level statement(s) over {} line(s), {} macro(s) defined",
    root.len(),
    parser.lexer.line(),
    parser.macros.len()
  );
  Ok(root)
}

/// What ends the block currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
  Root,
  End,
  Emcro,
}

impl Closer {
  fn opener(self) -> &'static str {
    match self {
      Closer::Root => "program",
      Closer::End => "if/while block",
      Closer::Emcro => "macro definition",
    }
  }
}

struct Parser<'a, 'r> {
  lexer: Lexer<'a>,
  macros: HashMap<String, MacroDef>,
  reporter: &'r mut dyn Reporter,
  /// Nesting depth of macro bodies being parsed; calls inside them are deferred.
  defining: usize,
  /// Set once `done` or the end of input has been consumed.
  finished: bool,
}

impl<'a, 'r> Parser<'a, 'r> {
  fn new(source: &'a str, reporter: &'r mut dyn Reporter) -> Self {
    Self {
      lexer: Lexer::new(source),
      macros: HashMap::new(),
      reporter,
      defining: 0,
      finished: false,
    }
  }

  /// Report `error`; `Ok(None)` tells the caller to drop what it was building.
  fn recover<T>(&mut self, error: CompileError) -> CompileResult<Option<T>> {
    self.reporter.report(error)?;
    Ok(None)
  }

  fn parse_block(&mut self, closer: Closer) -> CompileResult<Block> {
    let mut block = Block::default();

    while !self.finished {
      let token = match self.lexer.advance() {
        Ok(token) => token,
        Err(err) => {
          self.reporter.report(err)?;
          continue;
        }
      };

      match token.kind {
        TokenKind::Eof | TokenKind::Done => {
          self.finished = true;
          if closer != Closer::Root {
            let message = format!(
              "{} reached with an open {}",
              token.describe(),
              closer.opener()
            );
            self
              .reporter
              .report(CompileError::mismatched_end(message, token.line))?;
          }
        }
        TokenKind::End if closer == Closer::End => return Ok(block),
        TokenKind::Emcro if closer == Closer::Emcro => return Ok(block),
        TokenKind::End | TokenKind::Emcro => {
          let message = format!("\"{}\" cannot close the open {}", token.text, closer.opener());
          self
            .reporter
            .report(CompileError::mismatched_end(message, token.line))?;
        }
        _ => {
          if let Some(node) = self.parse_statement(token)? {
            block.push(node);
          }
        }
      }
    }

    Ok(block)
  }

  fn parse_statement(&mut self, token: Token) -> CompileResult<Option<Node>> {
    match token.kind {
      TokenKind::If | TokenKind::While => self.parse_conditional(token.kind),
      TokenKind::Ident => self.parse_assignment(Ident::new(token.text)),
      TokenKind::Write => {
        let Some(value) = self.operand()? else {
          return Ok(None);
        };
        Ok(Some(Node::Write(value)))
      }
      TokenKind::Read => Ok(self.ident("read target")?.map(Node::Read)),
      TokenKind::Free => Ok(self.ident("free target")?.map(Node::Free)),
      TokenKind::Breakpoint => Ok(Some(Node::Breakpoint)),
      TokenKind::Macro => self.parse_macro_def(),
      TokenKind::Call => self.parse_call(token.line),
      _ => self.recover(CompileError::invalid_identifier(
        token.describe(),
        "cannot start a statement",
        Some(token.line),
      )),
    }
  }

  /// `if [not] NAME ... end` and `while [not] NAME ... end`.
  fn parse_conditional(&mut self, keyword: TokenKind) -> CompileResult<Option<Node>> {
    let negated = matches!(self.lexer.peek(), Ok(ref token) if token.is(TokenKind::Not));
    if negated {
      self.lexer.advance()?;
    }
    let cond = self.ident("condition")?;
    let body = self.parse_block(Closer::End)?;
    let Some(cond) = cond else {
      return Ok(None);
    };

    let node = match (keyword, negated) {
      (TokenKind::If, false) => Node::If { cond, body },
      (TokenKind::If, true) => Node::IfNot { cond, body },
      (_, false) => Node::While { cond, body },
      (_, true) => Node::WhileNot { cond, body },
    };
    Ok(Some(node))
  }

  /// `NAME (= | += | -=) (NAME | LITERAL)`.
  fn parse_assignment(&mut self, target: Ident) -> CompileResult<Option<Node>> {
    let op = match self.lexer.advance() {
      Ok(op) => op,
      Err(err) => return self.recover(err),
    };
    let make: fn(Ident, Operand) -> Node = match op.kind {
      TokenKind::Assign => |target, value| Node::Assign { target, value },
      TokenKind::AddAssign => |target, value| Node::Add { target, value },
      TokenKind::SubAssign => |target, value| Node::Sub { target, value },
      _ => {
        return self.recover(CompileError::InvalidOperator {
          found: op.describe().to_string(),
          line: Some(op.line),
        });
      }
    };
    let value = self.operand()?;
    Ok(value.map(|value| make(target, value)))
  }

  /// `macro NAME takes PARAM* define ... emcro`
  fn parse_macro_def(&mut self) -> CompileResult<Option<Node>> {
    let Some(name) = self.ident("macro name")? else {
      return Ok(None);
    };

    let takes = match self.lexer.advance() {
      Ok(token) => token,
      Err(err) => return self.recover(err),
    };
    if !takes.is(TokenKind::Takes) {
      return self.recover(CompileError::invalid_identifier(
        takes.describe(),
        format!("found where \"takes\" was expected after macro \"{name}\""),
        Some(takes.line),
      ));
    }

    let mut params = Vec::new();
    loop {
      let token = match self.lexer.advance() {
        Ok(token) => token,
        Err(err) => {
          self.reporter.report(err)?;
          continue;
        }
      };
      match token.kind {
        TokenKind::Define => break,
        TokenKind::Ident => params.push(Ident::new(token.text)),
        TokenKind::Eof => {
          self.finished = true;
          return self.recover(CompileError::mismatched_end(
            format!("end of input reached in the parameter list of macro \"{name}\""),
            token.line,
          ));
        }
        _ => {
          self.reporter.report(CompileError::invalid_identifier(
            token.describe(),
            format!("is not a valid parameter name for macro \"{name}\""),
            Some(token.line),
          ))?;
        }
      }
    }

    self.defining += 1;
    let body = self.parse_block(Closer::Emcro);
    self.defining -= 1;

    let def = MacroDef {
      name: name.name,
      params,
      body: body?,
    };
    if self.macros.contains_key(&def.name) {
      warn!("macro \"{}\" redefined", def.name);
    }
    debug!(
      "defined macro \"{}\" taking {} parameter(s)",
      def.name,
      def.params.len()
    );
    self.macros.insert(def.name.clone(), def.clone());
    Ok(Some(Node::MacroDef(def)))
  }

  /// `call NAME ARG*`, reading exactly as many arguments as the macro takes.
  fn parse_call(&mut self, line: usize) -> CompileResult<Option<Node>> {
    let Some(name) = self.ident("macro name")? else {
      return Ok(None);
    };
    let Some(expected) = self.macros.get(&name.name).map(|def| def.params.len()) else {
      return self.recover(CompileError::invalid_identifier(
        name.name,
        "is not a defined macro",
        Some(line),
      ));
    };

    let mut args = Vec::with_capacity(expected);
    while args.len() < expected {
      let is_arg = matches!(
        self.lexer.peek(),
        Ok(ref token) if token.is(TokenKind::Ident) || token.is(TokenKind::Literal)
      );
      if !is_arg {
        return self.recover(CompileError::ArgumentCount {
          name: name.name,
          expected,
          found: args.len(),
          line: Some(line),
        });
      }
      let Some(arg) = self.operand()? else {
        return Ok(None);
      };
      args.push(arg);
    }

    // A literal cannot start a statement, so one here is a surplus argument.
    let mut surplus = 0;
    while matches!(self.lexer.peek(), Ok(ref token) if token.is(TokenKind::Literal)) {
      self.lexer.advance()?;
      surplus += 1;
    }
    if surplus > 0 {
      return self.recover(CompileError::ArgumentCount {
        name: name.name,
        expected,
        found: expected + surplus,
        line: Some(line),
      });
    }

    let call = MacroCall {
      name: name.name,
      args,
      line,
    };
    if self.defining > 0 {
      return Ok(Some(Node::MacroCall(call)));
    }

    let expanded = self.expand_call(&call, &Bindings::new(), &mut Vec::new(), line)?;
    Ok(expanded.map(Node::Block))
  }

  fn ident(&mut self, role: &str) -> CompileResult<Option<Ident>> {
    let token = match self.lexer.advance() {
      Ok(token) => token,
      Err(err) => return self.recover(err),
    };
    if token.is(TokenKind::Ident) {
      return Ok(Some(Ident::new(token.text)));
    }
    self.recover(CompileError::invalid_identifier(
      token.describe(),
      format!("is not a valid {role}"),
      Some(token.line),
    ))
  }

  fn operand(&mut self) -> CompileResult<Option<Operand>> {
    let token = match self.lexer.advance() {
      Ok(token) => token,
      Err(err) => return self.recover(err),
    };
    match token.kind {
      TokenKind::Ident => Ok(Some(Operand::Ident(Ident::new(token.text)))),
      TokenKind::Literal => Ok(self.literal(&token)?.map(Operand::Literal)),
      _ => self.recover(CompileError::InvalidRightHandSide {
        found: token.describe().to_string(),
        line: Some(token.line),
      }),
    }
  }

  /// Rewrite a quoted character to its decimal code; digit runs pass through.
  fn literal(&mut self, token: &Token) -> CompileResult<Option<Literal>> {
    let Some(quoted) = token
      .text
      .strip_prefix('\'')
      .and_then(|rest| rest.strip_suffix('\''))
    else {
      return Ok(Some(Literal::new(token.text.as_str())));
    };

    let mut chars = quoted.chars();
    match (chars.next(), chars.next()) {
      (Some(c), None) if u32::from(c) <= u32::from(u8::MAX) => {
        Ok(Some(Literal::new(u32::from(c).to_string())))
      }
      _ => self.recover(CompileError::invalid_literal(
        token.text.as_str(),
        Some(token.line),
      )),
    }
  }

  /// Instantiate `call` under `outer`. `active` holds the macros currently
  /// being expanded and `site` the line of the statement-level call.
  fn expand_call(
    &mut self,
    call: &MacroCall,
    outer: &Bindings,
    active: &mut Vec<String>,
    site: usize,
  ) -> CompileResult<Option<Block>> {
    let Some(def) = self.macros.get(&call.name).cloned() else {
      return self.recover(CompileError::invalid_identifier(
        call.name.as_str(),
        "is not a defined macro",
        Some(site),
      ));
    };
    if def.params.len() != call.args.len() {
      return self.recover(CompileError::ArgumentCount {
        name: call.name.clone(),
        expected: def.params.len(),
        found: call.args.len(),
        line: Some(site),
      });
    }
    if active.contains(&call.name) {
      let chain = active
        .iter()
        .chain(std::iter::once(&call.name))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" -> ");
      return self.recover(CompileError::MacroRecursion {
        name: call.name.clone(),
        chain,
        line: Some(site),
      });
    }

    let mut bindings = outer.clone();
    for (param, arg) in def.params.iter().zip(&call.args) {
      bindings.insert(param.name.clone(), substitute(arg, outer));
    }

    debug!("expanding macro \"{}\" for the call at line {site}", call.name);
    active.push(call.name.clone());
    let expanded = self.expand_block(&def.body, &bindings, active, site);
    active.pop();
    expanded.map(Some)
  }

  fn expand_block(
    &mut self,
    block: &Block,
    bindings: &Bindings,
    active: &mut Vec<String>,
    site: usize,
  ) -> CompileResult<Block> {
    let mut out = Block::default();
    for node in &block.nodes {
      if let Some(node) = self.expand_node(node, bindings, active, site)? {
        out.push(node);
      }
    }
    Ok(out)
  }

  fn expand_node(
    &mut self,
    node: &Node,
    bindings: &Bindings,
    active: &mut Vec<String>,
    site: usize,
  ) -> CompileResult<Option<Node>> {
    let node = match node {
      Node::Block(block) => Node::Block(self.expand_block(block, bindings, active, site)?),
      Node::Assign { target, value } => {
        let Some(target) = self.bind_ident(target, bindings, site)? else {
          return Ok(None);
        };
        let value = substitute(value, bindings);
        Node::Assign { target, value }
      }
      Node::Add { target, value } => {
        let Some(target) = self.bind_ident(target, bindings, site)? else {
          return Ok(None);
        };
        let value = substitute(value, bindings);
        Node::Add { target, value }
      }
      Node::Sub { target, value } => {
        let Some(target) = self.bind_ident(target, bindings, site)? else {
          return Ok(None);
        };
        let value = substitute(value, bindings);
        Node::Sub { target, value }
      }
      Node::If { cond, body }
      | Node::IfNot { cond, body }
      | Node::While { cond, body }
      | Node::WhileNot { cond, body } => {
        let cond = self.bind_ident(cond, bindings, site)?;
        let body = self.expand_block(body, bindings, active, site)?;
        let Some(cond) = cond else {
          return Ok(None);
        };
        match node {
          Node::If { .. } => Node::If { cond, body },
          Node::IfNot { .. } => Node::IfNot { cond, body },
          Node::While { .. } => Node::While { cond, body },
          _ => Node::WhileNot { cond, body },
        }
      }
      Node::Write(value) => Node::Write(substitute(value, bindings)),
      Node::Read(ident) => match self.bind_ident(ident, bindings, site)? {
        Some(ident) => Node::Read(ident),
        None => return Ok(None),
      },
      Node::Free(ident) => match self.bind_ident(ident, bindings, site)? {
        Some(ident) => Node::Free(ident),
        None => return Ok(None),
      },
      Node::MacroDef(def) => Node::MacroDef(def.clone()),
      Node::MacroCall(call) => match self.expand_call(call, bindings, active, site)? {
        Some(block) => Node::Block(block),
        None => return Ok(None),
      },
      Node::Breakpoint => Node::Breakpoint,
    };
    Ok(Some(node))
  }

  /// Substitute into a position that only accepts a variable.
  fn bind_ident(
    &mut self,
    ident: &Ident,
    bindings: &Bindings,
    site: usize,
  ) -> CompileResult<Option<Ident>> {
    match bindings.get(&ident.name) {
      None => Ok(Some(ident.clone())),
      Some(Operand::Ident(bound)) => Ok(Some(bound.clone())),
      Some(Operand::Literal(lit)) => self.recover(CompileError::invalid_identifier(
        lit.text.as_str(),
        format!(
          "was passed for parameter \"{}\" which is used as a variable",
          ident.name
        ),
        Some(site),
      )),
    }
  }
}

fn substitute(operand: &Operand, bindings: &Bindings) -> Operand {
  match operand {
    Operand::Ident(ident) => bindings
      .get(&ident.name)
      .cloned()
      .unwrap_or_else(|| operand.clone()),
    Operand::Literal(_) => operand.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{Collect, ErrorKind};

  fn assign(target: &str, value: Operand) -> Node {
    Node::Assign {
      target: Ident::new(target),
      value,
    }
  }

  fn add(target: &str, value: Operand) -> Node {
    Node::Add {
      target: Ident::new(target),
      value,
    }
  }

  fn parse_err(source: &str) -> CompileError {
    parse(source).unwrap_err()
  }

  #[test]
  fn simple_statements() {
    let tree = parse("x = 3 y += x z -= 'a' write x read y free z breakpoint done").unwrap();
    assert_eq!(
      tree.nodes,
      vec![
        assign("x", Operand::literal("3")),
        add("y", Operand::ident("x")),
        Node::Sub {
          target: Ident::new("z"),
          value: Operand::literal("97"),
        },
        Node::Write(Operand::ident("x")),
        Node::Read(Ident::new("y")),
        Node::Free(Ident::new("z")),
        Node::Breakpoint,
      ]
    );
  }

  #[test]
  fn nested_conditionals() {
    let tree = parse("if not a while b while not c end end end").unwrap();
    let Node::IfNot { cond, body } = &tree.nodes[0] else {
      panic!("expected IfNot, got {:?}", tree.nodes[0]);
    };
    assert_eq!(cond.name, "a");
    let Node::While { body, .. } = &body.nodes[0] else {
      panic!("expected While");
    };
    assert!(matches!(&body.nodes[0], Node::WhileNot { cond, .. } if cond.name == "c"));
  }

  #[test]
  fn text_after_done_is_ignored() {
    let tree = parse("x = 1 done this is not parsed $$").unwrap();
    assert_eq!(tree.len(), 1);
  }

  #[test]
  fn macro_definition_is_kept_but_inert() {
    let tree = parse("macro inc takes v define v += 1 emcro").unwrap();
    let Node::MacroDef(def) = &tree.nodes[0] else {
      panic!("expected MacroDef");
    };
    assert_eq!(def.name, "inc");
    assert_eq!(def.params, vec![Ident::new("v")]);
    assert_eq!(def.body.nodes, vec![add("v", Operand::literal("1"))]);
  }

  #[test]
  fn call_substitutes_parameters_only() {
    let tree = parse("macro m takes a b define a += b t = a emcro call m x 5").unwrap();
    let Node::Block(expanded) = &tree.nodes[1] else {
      panic!("expected expanded block");
    };
    assert_eq!(
      expanded.nodes,
      vec![
        add("x", Operand::literal("5")),
        assign("t", Operand::ident("x")),
      ]
    );
  }

  #[test]
  fn nested_call_is_expanded_with_composed_bindings() {
    let source = "
      macro inner takes p define p += q emcro
      macro outer takes q r define call inner r emcro
      call outer 7 y
    ";
    let tree = parse(source).unwrap();
    let Node::Block(outer) = &tree.nodes[2] else {
      panic!("expected expanded block");
    };
    // `q` is not a parameter of `inner`, so the outer binding shows through.
    assert_eq!(
      outer.nodes,
      vec![Node::Block(Block::new(vec![add("y", Operand::literal("7"))]))]
    );
  }

  #[test]
  fn inner_parameters_shadow_outer_ones() {
    let source = "
      macro inner takes a define a = 1 emcro
      macro outer takes a define call inner z a += 2 emcro
      call outer w
    ";
    let tree = parse(source).unwrap();
    let Node::Block(outer) = &tree.nodes[2] else {
      panic!("expected expanded block");
    };
    assert_eq!(
      outer.nodes,
      vec![
        Node::Block(Block::new(vec![assign("z", Operand::literal("1"))])),
        add("w", Operand::literal("2")),
      ]
    );
  }

  #[test]
  fn no_macro_call_survives() {
    fn contains_call(block: &Block) -> bool {
      block.nodes.iter().any(|node| match node {
        Node::MacroCall(_) => true,
        Node::Block(b) => contains_call(b),
        Node::If { body, .. }
        | Node::IfNot { body, .. }
        | Node::While { body, .. }
        | Node::WhileNot { body, .. } => contains_call(body),
        _ => false,
      })
    }
    let source = "
      macro a takes x define x += 1 emcro
      macro b takes x define if x call a x end emcro
      call b n
    ";
    assert!(!contains_call(&parse(source).unwrap()));
  }

  #[test]
  fn mismatched_end_at_root() {
    let err = parse_err("x = 1\nend");
    assert_eq!(err.kind(), ErrorKind::MismatchedEnd);
    assert_eq!(err.line(), Some(2));
  }

  #[test]
  fn done_inside_block_is_mismatched() {
    assert_eq!(parse_err("if x done").kind(), ErrorKind::MismatchedEnd);
    assert_eq!(parse_err("while x x -= 1").kind(), ErrorKind::MismatchedEnd);
  }

  #[test]
  fn closers_must_match() {
    assert_eq!(
      parse_err("macro m takes define x = 1 end").kind(),
      ErrorKind::MismatchedEnd
    );
    assert_eq!(parse_err("if x emcro").kind(), ErrorKind::MismatchedEnd);
  }

  #[test]
  fn bad_operator_and_rhs() {
    assert_eq!(parse_err("x write 1").kind(), ErrorKind::InvalidOperator);
    assert_eq!(parse_err("x = done").kind(), ErrorKind::InvalidRightHandSide);
    assert_eq!(parse_err("write end").kind(), ErrorKind::InvalidRightHandSide);
  }

  #[test]
  fn bad_statement_start() {
    let err = parse_err("x = 1\n\n42");
    assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
    assert_eq!(err.line(), Some(3));
  }

  #[test]
  fn unknown_macro() {
    assert_eq!(parse_err("call nothing").kind(), ErrorKind::InvalidIdentifier);
  }

  #[test]
  fn argument_count_is_checked() {
    let source = "macro m takes a b define a += b emcro ";
    assert_eq!(
      parse_err(&format!("{source} call m x")).kind(),
      ErrorKind::ArgumentCount
    );
    assert_eq!(
      parse_err(&format!("{source} call m x 1 2")).kind(),
      ErrorKind::ArgumentCount
    );
  }

  #[test]
  fn literal_for_variable_parameter() {
    let err = parse_err("macro m takes v define read v emcro call m 3");
    assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
  }

  #[test]
  fn redefinition_cycle_is_rejected() {
    let source = "
      macro a takes define x += 1 emcro
      macro b takes define call a emcro
      macro a takes define call b emcro
      call a
    ";
    let err = parse_err(source);
    assert_eq!(err.kind(), ErrorKind::MacroRecursion);
    assert!(err.to_string().contains("a -> b -> a"));
  }

  #[test]
  fn wide_character_literal_is_invalid() {
    assert_eq!(parse_err("x = 'λ'").kind(), ErrorKind::InvalidLiteral);
  }

  #[test]
  fn collecting_reporter_sees_every_error() {
    let mut reporter = Collect::new();
    let tree = parse_with("x = 1\ny ?\nz = 3\nend\nw = 4", &mut reporter).unwrap();
    let kinds: Vec<_> = reporter.errors().iter().map(CompileError::kind).collect();
    assert_eq!(
      kinds,
      vec![ErrorKind::UnrecognizedToken, ErrorKind::MismatchedEnd]
    );
    assert_eq!(
      tree.nodes,
      vec![
        assign("x", Operand::literal("1")),
        assign("z", Operand::literal("3")),
        assign("w", Operand::literal("4")),
      ]
    );
  }
}

//! Reference tape machine used to check generated code by running it.

#![allow(dead_code)]

/// Upper bound on executed instructions so a miscompiled loop fails the test
/// instead of hanging it.
const STEP_LIMIT: usize = 10_000_000;

pub struct Run {
  pub output: Vec<u8>,
  pub tape: Vec<u8>,
  pub pointer: usize,
}

/// Execute `code` against `input`. Cells are wrapping bytes, reads past the
/// end of input yield 0 and the breakpoint marker is ignored.
pub fn execute(code: &str, input: &[u8]) -> Run {
  let program: Vec<u8> = code.bytes().collect();
  let jumps = match_brackets(&program);

  let mut tape = vec![0u8; 1];
  let mut pointer = 0usize;
  let mut input = input.iter().copied();
  let mut output = Vec::new();
  let mut pc = 0usize;
  let mut steps = 0usize;

  while pc < program.len() {
    steps += 1;
    assert!(steps <= STEP_LIMIT, "step limit exceeded running {code}");
    match program[pc] {
      b'+' => tape[pointer] = tape[pointer].wrapping_add(1),
      b'-' => tape[pointer] = tape[pointer].wrapping_sub(1),
      b'>' => {
        pointer += 1;
        if pointer == tape.len() {
          tape.push(0);
        }
      }
      b'<' => {
        assert!(pointer > 0, "pointer moved left of cell 0 at {pc}");
        pointer -= 1;
      }
      b',' => tape[pointer] = input.next().unwrap_or(0),
      b'.' => output.push(tape[pointer]),
      b'[' if tape[pointer] == 0 => pc = jumps[pc],
      b']' if tape[pointer] != 0 => pc = jumps[pc],
      b'[' | b']' | b'!' => {}
      other => panic!("unexpected instruction {:?} at {pc}", other as char),
    }
    pc += 1;
  }

  Run {
    output,
    tape,
    pointer,
  }
}

fn match_brackets(program: &[u8]) -> Vec<usize> {
  let mut jumps = vec![0; program.len()];
  let mut open = Vec::new();
  for (pc, &byte) in program.iter().enumerate() {
    match byte {
      b'[' => open.push(pc),
      b']' => {
        let start = open.pop().expect("unbalanced ]");
        jumps[start] = pc;
        jumps[pc] = start;
      }
      _ => {}
    }
  }
  assert!(open.is_empty(), "unbalanced [");
  jumps
}

/// Compile `source` and run it, returning what it wrote.
pub fn run(source: &str, input: &[u8]) -> Vec<u8> {
  let code = rbrain::compile(source).unwrap_or_else(|err| panic!("{source}: {err}"));
  execute(&code, input).output
}

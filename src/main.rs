use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use env_logger::Env;
use log::info;
use snafu::{ResultExt, Snafu};

use rbrain::{Collect, CompileError, CompileResult, FailFast, Reporter};

/// Compile a macro language source file into tape-machine code.
#[derive(Parser)]
#[command(name = "rbrain")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Source file to compile
  input: PathBuf,

  /// Where to write the generated code (defaults to INPUT with a `.b` extension)
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Print the expanded syntax tree before generating code
  #[arg(long)]
  print_tree: bool,

  /// Report every error instead of stopping at the first one
  #[arg(short = 'k', long)]
  keep_going: bool,

  /// Raise log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = clap::ArgAction::Count)]
  verbose: u8,
}

#[derive(Debug, Snafu)]
enum DriverError {
  #[snafu(display("cannot read {}: {source}", path.display()))]
  Read {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(display("cannot write {}: {source}", path.display()))]
  Write {
    path: PathBuf,
    source: std::io::Error,
  },

  #[snafu(context(false), display("{source}"))]
  Compile { source: CompileError },

  #[snafu(display("compilation failed with {count} error(s)"))]
  Failed { count: usize },
}

fn build(source: &str, reporter: &mut dyn Reporter, print_tree: bool) -> CompileResult<String> {
  rbrain::compile_inspect(source, reporter, |program| {
    if print_tree {
      print!("{program}");
    }
  })
}

fn run(cli: &Cli) -> Result<(), DriverError> {
  let source = fs::read_to_string(&cli.input).context(ReadSnafu {
    path: cli.input.clone(),
  })?;

  let code = if cli.keep_going {
    let mut reporter = Collect::new();
    let code = build(&source, &mut reporter, cli.print_tree)?;
    if reporter.has_errors() {
      let errors = reporter.into_errors();
      for err in &errors {
        eprintln!("error: {err}");
      }
      return FailedSnafu {
        count: errors.len(),
      }
      .fail();
    }
    code
  } else {
    build(&source, &mut FailFast, cli.print_tree)?
  };

  let output = cli
    .output
    .clone()
    .unwrap_or_else(|| cli.input.with_extension("b"));
  fs::write(&output, &code).context(WriteSnafu {
    path: output.clone(),
  })?;
  info!("wrote {} bytes to {}", code.len(), output.display());
  Ok(())
}

fn main() {
  let cli = Cli::parse();

  let level = match cli.verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

  if let Err(err) = run(&cli) {
    eprintln!("error: {err}");
    process::exit(1);
  }
}

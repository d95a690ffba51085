// File: src/main.rs
//
// Entry point for `ctok`: run a script file, or drop into the REPL when
// invoked with no arguments.

use clap::Parser as ClapParser;
use std::path::PathBuf;
use std::process::ExitCode;
use tok::repl;
use tok::vm::{Vm, VmError};

const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

#[derive(ClapParser)]
#[command(
    name = "ctok",
    about = "Tok: a bytecode compiler and stack VM for a small class-based scripting language",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    /// Script to run. Omit to start the interactive REPL.
    file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.file {
        Some(path) => run_file(&path),
        None => {
            repl::run();
            ExitCode::SUCCESS
        }
    }
}

fn run_file(path: &PathBuf) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("can't open file '{}': {}", path.display(), err);
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(VmError::Compile(errors)) => {
            for error in &errors {
                eprintln!("{}", error);
            }
            ExitCode::from(EXIT_COMPILE_ERROR)
        }
        Err(VmError::Runtime(error)) => {
            eprintln!("{}", error);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

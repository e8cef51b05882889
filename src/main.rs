//! The `jake` command-line front-end.
//!
//! Runs a Jake script from a file: with no argument the default script path
//! is used, with one argument that path is run, and anything else prints a
//! usage line.  A one-line duration readout follows every run.

use std::env;
use std::fs;
use std::process::ExitCode;
use std::time::Instant;

/// Script run when no path argument is given.
const DEFAULT_SCRIPT: &str = "../code.jake";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    match args.len() {
        1 => run_file(DEFAULT_SCRIPT),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("Usage: jake [path]");
            ExitCode::from(64)
        }
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("[Error] Failed to open source file {path}: {error}");
            return ExitCode::from(74);
        }
    };

    let started = Instant::now();
    let result = jake::interpret(&source);
    let elapsed = started.elapsed().as_millis();

    match result {
        Ok(()) => {
            eprintln!(">> interpreter finished in {elapsed} ms <<");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{error}");
            eprintln!(">> interpreter finished with error in {elapsed} ms <<");
            ExitCode::from(70)
        }
    }
}

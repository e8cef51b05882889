//! The Jake language compiler and runtime library.
//!
//! Jake is a small dynamically-typed scripting language: numbers, strings,
//! first-class functions with closures, and single-inheritance classes.
//! This crate provides the complete pipeline:
//!
//! 1. **Scanner** (`scanner`) — tokenises source text on demand.
//! 2. **Compiler** (`compiler`) — a single-pass Pratt parser that emits
//!    bytecode directly, with no intermediate AST.
//! 3. **Bytecode** (`bytecode`) — `OpCode` definitions and `Chunk`
//!    (instructions + constant pool + line table).
//! 4. **Values** (`value`) — the runtime `Value` enum and its heap objects.
//! 5. **Builtins** (`builtins`) — native Rust functions exposed as globals.
//! 6. **VM** (`vm`) — the stack-based interpreter.
//!
//! # Entry point
//!
//! The simplest way to run a Jake program from Rust is:
//!
//! ```rust,ignore
//! jake::interpret(source)?;
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod scanner;
pub mod token;
pub mod value;
pub mod vm;

use std::io::Write;
use std::rc::Rc;

use crate::compiler::CompileError;
use crate::value::Function;
use crate::vm::{Interpreter, RuntimeError};

// ─────────────────────────────────────────────────────────────────────────────
// Unified error type
// ─────────────────────────────────────────────────────────────────────────────

/// The unified error type for the Jake pipeline.
///
/// Both language-level variants render the standard report format
/// (`jake error on line N: ...`); runtime errors additionally carry a
/// backtrace of the active call frames.
#[derive(Debug, thiserror::Error)]
pub enum JakeError {
    /// A syntax error detected during compilation.
    #[error("{0}")]
    Compile(#[from] CompileError),

    /// A runtime error raised by the VM.
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// An I/O error (reading a source file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result type for Jake operations.
pub type JakeResult<T> = Result<T, JakeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Compile `source` into the top-level script function without running it.
pub fn compile(source: &str) -> JakeResult<Rc<Function>> {
    Ok(compiler::compile(source)?)
}

/// Compile and run `source`, printing to stdout.
pub fn interpret(source: &str) -> JakeResult<()> {
    let function = compiler::compile(source)?;
    let mut vm = Interpreter::new();
    vm.run(function)?;
    Ok(())
}

/// Compile and run `source`, writing `print` output to `out`.
pub fn interpret_with_output(source: &str, out: Box<dyn Write>) -> JakeResult<()> {
    let function = compiler::compile(source)?;
    let mut vm = Interpreter::with_output(out);
    vm.run(function)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

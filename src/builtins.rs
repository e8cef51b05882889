//! Native built-in functions for the Jake VM.
//!
//! Each built-in is a plain Rust function with the [`NativeFn`] signature
//! `fn(&[Value]) -> Result<Value, String>`; an `Err` surfaces as a runtime
//! error at the call site.  [`register_all`] installs the whole registry
//! into a VM's globals at construction.
//!
//! | Name | Signature | Result |
//! |------|-----------|--------|
//! | `pow` | `pow(base, exponent)` | number |
//! | `sqrt` | `sqrt(x)` | number |
//! | `clock` | `clock()` | elapsed process time in whole microseconds |

use std::time::Instant;

use lazy_static::lazy_static;

use crate::value::{NativeFn, Value};
use crate::vm::Interpreter;

lazy_static! {
    /// Every built-in, in registration order.
    static ref NATIVE_FUNCTIONS: Vec<(&'static str, NativeFn)> = vec![
        ("pow", native_pow as NativeFn),
        ("sqrt", native_sqrt),
        ("clock", native_clock),
    ];

    /// Process epoch for [`native_clock`], pinned on first use.
    static ref CLOCK_EPOCH: Instant = Instant::now();
}

/// Register all built-ins into `vm` as globals.
pub fn register_all(vm: &mut Interpreter) {
    for (name, func) in NATIVE_FUNCTIONS.iter() {
        vm.define_native(name, *func);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument helpers
// ─────────────────────────────────────────────────────────────────────────────

fn expect_args(args: &[Value], count: usize) -> Result<(), String> {
    if args.len() != count {
        return Err(format!("Expected {count} arguments, got {}", args.len()));
    }
    Ok(())
}

fn get_number(args: &[Value], index: usize) -> Result<f64, String> {
    match &args[index] {
        Value::Number(n) => Ok(*n),
        _ => Err(format!("Expected argument {} as number", index + 1)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-ins
// ─────────────────────────────────────────────────────────────────────────────

fn native_pow(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 2)?;
    let base = get_number(args, 0)?;
    let exponent = get_number(args, 1)?;
    Ok(Value::Number(base.powf(exponent)))
}

fn native_sqrt(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 1)?;
    Ok(Value::Number(get_number(args, 0)?.sqrt()))
}

fn native_clock(args: &[Value]) -> Result<Value, String> {
    expect_args(args, 0)?;
    Ok(Value::Number(CLOCK_EPOCH.elapsed().as_micros() as f64))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! The Jake virtual machine.
//!
//! The [`Interpreter`] is a **stack-based interpreter** executing [`Chunk`]
//! bytecode.  It owns a flat value stack shared by all call frames, a call
//! stack of at most [`FRAMES_MAX`] frames, the global variable table, and
//! the list of open upvalue cells.
//!
//! # Execution model
//!
//! - Each [`CallFrame`] stores its instruction pointer, the closure being
//!   run, and `slots` — the stack index of its slot 0.  Slot 0 always holds
//!   the callee value (the receiver for methods); arguments follow at
//!   `slots + 1` onwards.
//! - `Call` pushes a frame; `Return` closes the frame's upvalues, truncates
//!   the stack back to `slots`, and leaves the return value on top.
//!
//! # Upvalues
//!
//! `open_upvalues` holds every cell that still aliases a live stack slot,
//! sorted ascending by slot.  Capturing a slot returns the existing cell if
//! one is open for it, so every closure over the same variable shares one
//! cell.  Closing (at scope exit or return) moves the value off the stack
//! into the cell and removes it from the list.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use crate::bytecode::{Chunk, Constant, OpCode};
use crate::value::{
    BoundMethod, ClassObj, Closure, Function, InstanceObj, NativeFn, NativeObj, Upvalue, Value,
};

/// Maximum depth of the call-frame stack.
pub const FRAMES_MAX: usize = 64;
/// Value-stack capacity reserved up front.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// The method name invoked implicitly on class instantiation.
const INITIALIZER_NAME: &str = "init";

// ─────────────────────────────────────────────────────────────────────────────
// Runtime error
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime error raised by the VM, annotated with the source line and a
/// backtrace of the active frames (innermost first).
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub line: u32,
    pub trace: Vec<TraceFrame>,
}

/// One backtrace entry.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: u32,
    /// The function's name; empty for the top-level script.
    pub name: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "jake error on line {}:\n    RuntimeError: {}",
            self.line, self.message
        )?;
        for frame in &self.trace {
            if frame.name.is_empty() {
                write!(f, "\n[line {}] in script", frame.line)?;
            } else {
                write!(f, "\n[line {}] in {}()", frame.line, frame.name)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

type VmResult<T> = Result<T, RuntimeError>;

// ─────────────────────────────────────────────────────────────────────────────
// CallFrame
// ─────────────────────────────────────────────────────────────────────────────

/// One active call on the frame stack.
struct CallFrame {
    closure: Rc<Closure>,
    /// Index of the next byte to execute in the closure's chunk.
    ip: usize,
    /// Stack index of this frame's slot 0 (the callee / receiver).
    slots: usize,
}

impl CallFrame {
    #[inline]
    fn chunk(&self) -> &Chunk {
        &self.closure.function.chunk
    }

    #[inline]
    fn read_byte(&mut self) -> u8 {
        let byte = self.chunk().code[self.ip];
        self.ip += 1;
        byte
    }

    #[inline]
    fn read_u16(&mut self) -> u16 {
        let value = self.chunk().read_u16(self.ip);
        self.ip += 2;
        value
    }

    /// The source line of the instruction currently executing.
    fn current_line(&self) -> u32 {
        self.chunk().line_for(self.ip.saturating_sub(1))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interpreter
// ─────────────────────────────────────────────────────────────────────────────

/// The Jake virtual machine.
///
/// Strictly single-threaded and synchronous: [`Interpreter::run`] returns
/// only once the script completes or errors.  Independent interpreters do
/// not share any state and may run in parallel.
pub struct Interpreter {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<String, Value>,
    /// Open upvalue cells, ascending by aliased stack slot.
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
    /// Where `print` writes; stdout unless an embedder redirects it.
    out: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create a VM printing to stdout, with all built-ins registered.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Create a VM that writes `print` output to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            out,
        };
        crate::builtins::register_all(&mut vm);
        vm
    }

    /// Register a native function as a global.
    pub fn define_native(&mut self, name: &'static str, func: NativeFn) {
        self.globals
            .insert(name.to_string(), Value::Native(Rc::new(NativeObj { name, func })));
    }

    /// Execute a compiled script function to completion.
    pub fn run(&mut self, function: Rc<Function>) -> VmResult<()> {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();

        let closure = Rc::new(Closure::new(function));
        self.push(Value::Closure(closure.clone()));
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: 0,
        });

        self.dispatch()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frame and operand plumbing
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("at least one active frame")
    }

    #[inline]
    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("at least one active frame")
    }

    #[inline]
    fn read_byte(&mut self) -> u8 {
        self.frame_mut().read_byte()
    }

    #[inline]
    fn read_u16(&mut self) -> u16 {
        self.frame_mut().read_u16()
    }

    fn read_constant(&mut self) -> VmResult<Constant> {
        let idx = self.read_byte() as usize;
        match self.frame().chunk().constants.get(idx) {
            Some(constant) => Ok(constant.clone()),
            None => self.runtime_error(format!("Constant index {idx} out of range")),
        }
    }

    /// Read a one-byte constant operand that must name something.
    fn read_string(&mut self) -> VmResult<String> {
        match self.read_constant()? {
            Constant::Str(s) => Ok(s),
            other => self.runtime_error(format!("Expected a name constant, got {other}")),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stack helpers
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    #[inline]
    fn peek(&self, depth: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - depth]
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Error helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn make_error(&self, message: impl Into<String>) -> RuntimeError {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                line: frame.current_line(),
                name: frame.closure.function.name.clone(),
            })
            .collect();
        RuntimeError {
            message: message.into(),
            line: self.frame().current_line(),
            trace,
        }
    }

    fn runtime_error<T>(&self, message: impl Into<String>) -> VmResult<T> {
        Err(self.make_error(message))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Main dispatch loop
    // ─────────────────────────────────────────────────────────────────────────

    fn dispatch(&mut self) -> VmResult<()> {
        loop {
            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(unknown) => {
                    return self.runtime_error(format!("Unknown Instruction ({unknown})"))
                }
            };

            match op {
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("returning frame");
                    self.close_upvalues(frame.slots);

                    if self.frames.is_empty() {
                        // The script itself returned; its closure is the
                        // last thing left on the stack.
                        self.pop();
                        return Ok(());
                    }

                    self.stack.truncate(frame.slots);
                    self.push(result);
                }

                // ── Constants / literals ─────────────────────────────────────
                OpCode::Constant => {
                    let value = match self.read_constant()? {
                        Constant::Number(n) => Value::Number(n),
                        Constant::Str(s) => Value::Str(Rc::from(s.as_str())),
                        Constant::Function(f) => Value::Function(f),
                    };
                    self.push(value);
                }
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::None => self.push(Value::None),

                // ── Arithmetic ───────────────────────────────────────────────
                OpCode::Add => {
                    let b = self.pop();
                    let a = self.pop();
                    let result = match (&a, &b) {
                        (Value::Number(x), Value::Number(y)) => Value::Number(x + y),
                        (Value::Str(x), Value::Str(y)) => {
                            Value::Str(Rc::from(format!("{x}{y}").as_str()))
                        }
                        _ => return self.runtime_error("Can only add numbers or strings"),
                    };
                    self.push(result);
                }
                OpCode::Subtract => self.numeric_binary(|x, y| x - y, "Can only subtract numbers")?,
                OpCode::Multiply => self.numeric_binary(|x, y| x * y, "Can only multiply numbers")?,
                OpCode::Divide => self.numeric_binary(|x, y| x / y, "Can only divide numbers")?,

                // ── Equality and comparison ──────────────────────────────────
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a.equals(&b)));
                }
                OpCode::NotEqual => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(!a.equals(&b)));
                }
                OpCode::Greater => self.numeric_compare(|x, y| x > y)?,
                OpCode::Less => self.numeric_compare(|x, y| x < y)?,
                OpCode::GreaterEqual => self.numeric_compare(|x, y| x >= y)?,
                OpCode::LessEqual => self.numeric_compare(|x, y| x <= y)?,

                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    let value = self.pop();
                    match value {
                        Value::Number(n) => self.push(Value::Number(-n)),
                        _ => return self.runtime_error("Can only negate a number"),
                    }
                }

                OpCode::Print => {
                    let value = self.pop();
                    if writeln!(self.out, "{value}").is_err() {
                        return self.runtime_error("Failed to write output");
                    }
                }

                // ── Globals ──────────────────────────────────────────────────
                OpCode::DefineGlobal => {
                    let name = self.read_string()?;
                    let value = self.peek(0).clone();
                    self.globals.insert(name, value);
                    self.pop();
                }
                OpCode::GetGlobal => {
                    let name = self.read_string()?;
                    let Some(value) = self.globals.get(&name).cloned() else {
                        return self.runtime_error(format!("Undefined variable {name}"));
                    };
                    self.push(value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_string()?;
                    if !self.globals.contains_key(&name) {
                        return self.runtime_error(format!("Undefined variable {name}"));
                    }
                    let value = self.peek(0).clone();
                    self.globals.insert(name, value);
                }

                // ── Locals ───────────────────────────────────────────────────
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.stack[self.frame().slots + slot].clone();
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let value = self.peek(0).clone();
                    let base = self.frame().slots;
                    self.stack[base + slot] = value;
                }

                // ── Upvalues ─────────────────────────────────────────────────
                OpCode::GetUpvalue => {
                    let idx = self.read_byte() as usize;
                    let cell = self.frame().closure.upvalues[idx].clone();
                    let value = cell.borrow().get(&self.stack);
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let idx = self.read_byte() as usize;
                    let cell = self.frame().closure.upvalues[idx].clone();
                    let value = self.peek(0).clone();
                    cell.borrow_mut().set(&mut self.stack, value);
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                // ── Jumps ────────────────────────────────────────────────────
                OpCode::Jump => {
                    let distance = self.read_u16() as usize;
                    self.frame_mut().ip += distance;
                }
                OpCode::JumpBack => {
                    let distance = self.read_u16() as usize;
                    self.frame_mut().ip -= distance;
                }
                OpCode::JumpIfTrue => {
                    let distance = self.read_u16() as usize;
                    if !self.peek(0).is_falsey() {
                        self.frame_mut().ip += distance;
                    }
                }
                OpCode::JumpIfFalse => {
                    let distance = self.read_u16() as usize;
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += distance;
                    }
                }

                // ── Calls and closures ───────────────────────────────────────
                OpCode::Call => {
                    let argc = self.read_byte() as usize;
                    let callee = self.peek(argc).clone();
                    self.call_value(callee, argc)?;
                }

                OpCode::Closure => {
                    let function = match self.read_constant()? {
                        Constant::Function(function) => function,
                        other => {
                            return self
                                .runtime_error(format!("Expected a function constant, got {other}"))
                        }
                    };

                    let mut upvalues = Vec::with_capacity(function.upvalue_count);
                    for _ in 0..function.upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        let cell = if is_local {
                            let slot = self.frame().slots + index;
                            self.capture_upvalue(slot)
                        } else {
                            self.frame().closure.upvalues[index].clone()
                        };
                        upvalues.push(cell);
                    }

                    self.push(Value::Closure(Rc::new(Closure { function, upvalues })));
                }

                // ── Classes ──────────────────────────────────────────────────
                OpCode::Class => {
                    let name = self.read_string()?;
                    let class = ClassObj::new(Rc::from(name.as_str()));
                    self.push(Value::Class(Rc::new(RefCell::new(class))));
                }

                OpCode::GetProperty => {
                    let name = self.read_string()?;
                    let Value::Instance(instance) = self.peek(0).clone() else {
                        return self.runtime_error("Only instances have properties");
                    };

                    let field = instance.borrow().fields.get(&name).cloned();
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = instance.borrow().class.clone();
                        self.bind_method(&class, &name)?;
                    }
                }

                OpCode::SetProperty => {
                    let name = self.read_string()?;
                    let Value::Instance(instance) = self.peek(1).clone() else {
                        return self.runtime_error("Only instances have properties");
                    };

                    let value = self.pop();
                    instance.borrow_mut().fields.insert(name, value.clone());
                    self.pop();
                    self.push(value);
                }

                OpCode::Method => {
                    let name = self.read_string()?;
                    let method = self.peek(0).clone();
                    let Value::Class(class) = self.peek(1).clone() else {
                        return self.runtime_error("Methods can only attach to a class");
                    };
                    class.borrow_mut().methods.insert(name, method);
                    self.pop();
                }

                OpCode::Inherit => {
                    let Value::Class(base) = self.peek(1).clone() else {
                        return self.runtime_error("Can only inherit from a class");
                    };
                    let Value::Class(sub) = self.peek(0).clone() else {
                        return self.runtime_error("Can only inherit from a class");
                    };

                    // The subclass has no methods of its own yet, so a plain
                    // copy cannot clobber anything.
                    let methods: Vec<(String, Value)> = base
                        .borrow()
                        .methods
                        .iter()
                        .map(|(name, method)| (name.clone(), method.clone()))
                        .collect();
                    sub.borrow_mut().methods.extend(methods);

                    self.pop();
                }

                OpCode::GetSuper => {
                    let name = self.read_string()?;
                    let Value::Class(superclass) = self.pop() else {
                        return self.runtime_error("Can only inherit from a class");
                    };
                    self.bind_method(&superclass, &name)?;
                }

                OpCode::Invoke => {
                    let name = self.read_string()?;
                    let argc = self.read_byte() as usize;
                    self.invoke(&name, argc)?;
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Call dispatch
    // ─────────────────────────────────────────────────────────────────────────

    fn call_value(&mut self, callee: Value, argc: usize) -> VmResult<()> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),

            Value::Native(native) => {
                let base = self.stack.len() - argc;
                let result = (native.func)(&self.stack[base..])
                    .map_err(|message| self.make_error(message))?;
                // Pop the arguments and the callee, push the result.
                self.stack.truncate(base - 1);
                self.push(result);
                Ok(())
            }

            Value::Class(class) => {
                let callee_slot = self.stack.len() - argc - 1;
                let instance = InstanceObj::new(class.clone());
                self.stack[callee_slot] = Value::Instance(Rc::new(RefCell::new(instance)));

                let initializer = class.borrow().methods.get(INITIALIZER_NAME).cloned();
                match initializer {
                    Some(Value::Closure(init)) => self.call_closure(init, argc),
                    _ if argc != 0 => {
                        self.runtime_error(format!("Expected 0 arguments got {argc}"))
                    }
                    _ => Ok(()),
                }
            }

            Value::BoundMethod(bound) => {
                let callee_slot = self.stack.len() - argc - 1;
                self.stack[callee_slot] = bound.receiver.clone();
                self.call_closure(bound.method.clone(), argc)
            }

            _ => self.runtime_error("Invalid call target"),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, argc: usize) -> VmResult<()> {
        if self.frames.len() == FRAMES_MAX {
            return self.runtime_error("Stack overflow");
        }

        let arity = closure.function.arity as usize;
        if arity != argc {
            return self.runtime_error(format!("Expected {arity} arguments, got {argc}"));
        }

        let slots = self.stack.len() - argc - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots,
        });
        Ok(())
    }

    /// Fused property lookup + call: an instance field shadowing the method
    /// name is called in its place.
    fn invoke(&mut self, name: &str, argc: usize) -> VmResult<()> {
        let Value::Instance(instance) = self.peek(argc).clone() else {
            return self.runtime_error("Only instances have methods");
        };

        let field = instance.borrow().fields.get(name).cloned();
        if let Some(field) = field {
            let callee_slot = self.stack.len() - argc - 1;
            self.stack[callee_slot] = field.clone();
            return self.call_value(field, argc);
        }

        let class = instance.borrow().class.clone();
        self.invoke_from_class(&class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: &Rc<RefCell<ClassObj>>,
        name: &str,
        argc: usize,
    ) -> VmResult<()> {
        let method = class.borrow().methods.get(name).cloned();
        match method {
            Some(Value::Closure(closure)) => self.call_closure(closure, argc),
            _ => self.runtime_error(format!("Undefined property {name}")),
        }
    }

    /// Replace the receiver on top of the stack with `name` bound against it.
    fn bind_method(&mut self, class: &Rc<RefCell<ClassObj>>, name: &str) -> VmResult<()> {
        let method = class.borrow().methods.get(name).cloned();
        let Some(Value::Closure(method)) = method else {
            let class_name = class.borrow().name.clone();
            return self.runtime_error(format!(
                "Instance of {class_name} has no property {name}"
            ));
        };

        let receiver = self.pop();
        self.push(Value::BoundMethod(Rc::new(BoundMethod { receiver, method })));
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Upvalues
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the open cell aliasing `slot`, creating and inserting one in
    /// sorted position if none exists.
    fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        let pos = self
            .open_upvalues
            .partition_point(|cell| cell.borrow().open_slot().unwrap_or(usize::MAX) < slot);

        if let Some(cell) = self.open_upvalues.get(pos) {
            if cell.borrow().open_slot() == Some(slot) {
                return cell.clone();
            }
        }

        let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
        self.open_upvalues.insert(pos, cell.clone());
        cell
    }

    /// Close every open cell aliasing a slot at or above `from_slot`.
    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(cell) = self.open_upvalues.last() {
            match cell.borrow().open_slot() {
                Some(slot) if slot >= from_slot => {}
                _ => break,
            }
            let cell = self.open_upvalues.pop().expect("checked non-empty");
            let slot = cell.borrow().open_slot().expect("open cell in open list");
            let value = self.stack[slot].clone();
            *cell.borrow_mut() = Upvalue::Closed(value);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Arithmetic helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn numeric_binary(
        &mut self,
        op: impl FnOnce(f64, f64) -> f64,
        message: &str,
    ) -> VmResult<()> {
        let b = self.pop();
        let a = self.pop();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                self.push(Value::Number(op(*x, *y)));
                Ok(())
            }
            _ => self.runtime_error(message),
        }
    }

    fn numeric_compare(&mut self, op: impl FnOnce(f64, f64) -> bool) -> VmResult<()> {
        let b = self.pop();
        let a = self.pop();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => {
                self.push(Value::Bool(op(*x, *y)));
                Ok(())
            }
            _ => self.runtime_error("Can only compare numbers"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

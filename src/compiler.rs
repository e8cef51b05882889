//! Single-pass compiler for the Jake language.
//!
//! The [`Parser`] pulls tokens straight from the [`Scanner`] and emits
//! bytecode into the current function's [`Chunk`] as it goes; there is no
//! intermediate AST.  Statements are parsed by recursive descent, and
//! expressions by Pratt precedence climbing driven by a per-token rule
//! table ([`rule_for`]).
//!
//! # Scope model
//!
//! Each function being compiled gets a [`FunctionCtx`] on a stack.  Locals
//! live in a flat `Vec<Local>` that mirrors the VM's stack layout: slot 0 is
//! reserved for the callee (named `this` in methods and initializers, and
//! unnameable otherwise), parameters follow, then block locals.  Closing a
//! scope pops its locals, emitting `CloseUpvalue` for captured slots and
//! `Pop` for the rest.
//!
//! Upvalues are resolved by walking enclosing contexts: a name found as a
//! local one level up is captured directly (`is_local = true`); a name found
//! further out is chained down through each intermediate context as an
//! `is_local = false` entry.
//!
//! # Error model
//!
//! The first error wins: once an error is recorded the parser stops
//! consuming and `compile` returns it.  A scanner failure with no recorded
//! message surfaces as a generic `Invalid Syntax` error.

use std::fmt;
use std::rc::Rc;

use crate::bytecode::{Chunk, Constant, OpCode};
use crate::scanner::Scanner;
use crate::token::{Token, TokenType};
use crate::value::Function;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// A compile-time (syntax) error.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    /// The offending token's source text, when quoting it helps.
    pub token: Option<String>,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "jake error on line {}:\n    SyntaxError: {}",
            self.line, self.message
        )?;
        if let Some(token) = &self.token {
            write!(f, " '{token}'")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

// ─────────────────────────────────────────────────────────────────────────────
// Precedence and parse rules
// ─────────────────────────────────────────────────────────────────────────────

/// Expression precedence, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // = += -= *= /=
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    /// The next-higher level, used by left-associative binary operators.
    fn one_higher(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Prefix parse actions, dispatched through a match rather than function
/// pointers.
#[derive(Debug, Clone, Copy)]
enum PrefixRule {
    Number,
    Variable,
    Str,
    Literal,
    Grouping,
    Unary,
    This,
    Super,
}

/// Infix parse actions.
#[derive(Debug, Clone, Copy)]
enum InfixRule {
    Binary,
    And,
    Or,
    Call,
    Dot,
}

struct ParseRule {
    prefix: Option<PrefixRule>,
    infix: Option<InfixRule>,
    precedence: Precedence,
}

const fn rule(
    prefix: Option<PrefixRule>,
    infix: Option<InfixRule>,
    precedence: Precedence,
) -> ParseRule {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

/// The (prefix, infix, precedence) triple for a token type.
fn rule_for(kind: TokenType) -> ParseRule {
    match kind {
        TokenType::Number => rule(Some(PrefixRule::Number), None, Precedence::None),
        TokenType::Identifier => rule(Some(PrefixRule::Variable), None, Precedence::None),
        TokenType::String => rule(Some(PrefixRule::Str), None, Precedence::None),
        TokenType::True | TokenType::False | TokenType::None => {
            rule(Some(PrefixRule::Literal), None, Precedence::None)
        }
        TokenType::This => rule(Some(PrefixRule::This), None, Precedence::None),
        TokenType::Super => rule(Some(PrefixRule::Super), None, Precedence::None),
        TokenType::LeftParen => rule(
            Some(PrefixRule::Grouping),
            Some(InfixRule::Call),
            Precedence::Call,
        ),
        TokenType::Dot => rule(None, Some(InfixRule::Dot), Precedence::Call),
        TokenType::Bang => rule(Some(PrefixRule::Unary), None, Precedence::None),
        TokenType::Minus => rule(
            Some(PrefixRule::Unary),
            Some(InfixRule::Binary),
            Precedence::Term,
        ),
        TokenType::Plus => rule(None, Some(InfixRule::Binary), Precedence::Term),
        TokenType::Asterisk | TokenType::Slash => {
            rule(None, Some(InfixRule::Binary), Precedence::Factor)
        }
        TokenType::EqualEqual | TokenType::BangEqual => {
            rule(None, Some(InfixRule::Binary), Precedence::Equality)
        }
        TokenType::Greater | TokenType::Less | TokenType::GreaterEqual | TokenType::LessEqual => {
            rule(None, Some(InfixRule::Binary), Precedence::Comparison)
        }
        TokenType::And => rule(None, Some(InfixRule::And), Precedence::And),
        TokenType::Or => rule(None, Some(InfixRule::Or), Precedence::Or),
        _ => rule(None, None, Precedence::None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Function compilation context
// ─────────────────────────────────────────────────────────────────────────────

/// What kind of function body is being compiled; drives the implicit return
/// and the reserved slot-0 name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A local variable slot.
#[derive(Debug)]
struct Local {
    name: String,
    /// `None` while the initializer is still being compiled.
    depth: Option<u32>,
    is_captured: bool,
}

/// One captured-variable descriptor, emitted after `Closure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

/// Per-function compilation state.
struct FunctionCtx {
    kind: FunctionKind,
    name: String,
    arity: u8,
    chunk: Chunk,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: u32,
}

/// Locals per function, bounded by the one-byte slot operand.
const MAX_LOCALS: usize = 256;
/// Upvalues per function, bounded by the one-byte index operand.
const MAX_UPVALUES: usize = 256;
/// Constants per chunk, bounded by the one-byte pool operand.
const MAX_CONSTANTS: usize = 256;

impl FunctionCtx {
    fn new(kind: FunctionKind, name: String) -> Self {
        // Slot 0 belongs to the callee: it is `this` inside methods and
        // initializers, and unnameable everywhere else.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            FunctionKind::Script | FunctionKind::Function => "",
        };
        Self {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: slot_zero.to_string(),
                depth: Some(0),
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// A class body being compiled; tracks whether `super` is available.
struct ClassCtx {
    has_superclass: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

/// The single-pass Jake parser/compiler.
pub struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    ctxs: Vec<FunctionCtx>,
    classes: Vec<ClassCtx>,
    can_assign: bool,
    had_error: bool,
    error: Option<CompileError>,
}

/// Compile `source` into the top-level script function.
pub fn compile(source: &str) -> Result<Rc<Function>, CompileError> {
    let mut parser = Parser::new(source);
    parser.advance();
    while !parser.is_finished() {
        parser.declaration();
    }
    let (function, _) = parser.end_function();
    match parser.error {
        Some(error) => Err(error),
        None => Ok(function),
    }
}

impl<'src> Parser<'src> {
    fn new(source: &'src str) -> Self {
        let placeholder = Token::synthetic(TokenType::EndOfFile, "");
        Self {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            ctxs: vec![FunctionCtx::new(FunctionKind::Script, String::new())],
            classes: Vec::new(),
            can_assign: false,
            had_error: false,
            error: None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Token plumbing
    // ─────────────────────────────────────────────────────────────────────────

    fn advance(&mut self) {
        if self.had_error {
            return;
        }

        self.previous = self.current;
        self.current = self.scanner.scan_token();

        if self.current.kind == TokenType::Error {
            // A scanner-diagnosed failure carries its own message; a stray
            // character is reported generically when compilation ends.
            if let Some(message) = self.scanner.take_error() {
                self.error_at(self.current, &message, false);
            }
            self.had_error = true;
            self.previous = self.current;
        }
    }

    fn consume(&mut self, kind: TokenType, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at(self.current, message, true);
    }

    #[inline]
    fn check(&self, kind: TokenType) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenType) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn is_finished(&self) -> bool {
        self.had_error || self.check(TokenType::EndOfFile) || self.check(TokenType::Error)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Error helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an error at `token`.  The first error wins; later reports are
    /// dropped so a single failure does not cascade.
    fn error_at(&mut self, token: Token<'src>, message: &str, quote_token: bool) {
        if self.error.is_none() {
            self.error = Some(CompileError {
                message: message.to_string(),
                line: token.line,
                token: if quote_token && !token.source.is_empty() {
                    Some(token.source.to_string())
                } else {
                    None
                },
            });
        }
        self.had_error = true;
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message, false);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Emission helpers
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn ctx(&self) -> &FunctionCtx {
        self.ctxs.last().expect("at least one function context")
    }

    #[inline]
    fn ctx_mut(&mut self) -> &mut FunctionCtx {
        self.ctxs.last_mut().expect("at least one function context")
    }

    fn emit(&mut self, op: OpCode) {
        let line = self.previous.line;
        self.ctx_mut().chunk.emit_op(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.ctx_mut().chunk.emit_byte(byte, line);
    }

    fn emit_pair(&mut self, op: OpCode, operand: u8) {
        self.emit(op);
        self.emit_byte(operand);
    }

    fn make_constant(&mut self, constant: Constant) -> u8 {
        let idx = self.ctx_mut().chunk.add_constant(constant);
        if idx >= MAX_CONSTANTS {
            self.error("Too many constants in one chunk");
            return 0;
        }
        idx as u8
    }

    fn make_id_constant(&mut self, name: &str) -> u8 {
        self.make_constant(Constant::Str(name.to_string()))
    }

    fn emit_constant(&mut self, constant: Constant) {
        let idx = self.make_constant(constant);
        self.emit_pair(OpCode::Constant, idx);
    }

    /// The implicit return: initializers return `this` (slot 0), everything
    /// else returns `none`.
    fn emit_return(&mut self) {
        if self.ctx().kind == FunctionKind::Initializer {
            self.emit_pair(OpCode::GetLocal, 0);
        } else {
            self.emit(OpCode::None);
        }
        self.emit(OpCode::Return);
    }

    /// Emit a forward jump with a placeholder distance; returns the operand
    /// offset for [`Parser::patch_jump`].
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.ctx().chunk.code.len() - 2
    }

    /// Backpatch the jump operand at `offset` to land at the current end of
    /// the chunk.
    fn patch_jump(&mut self, offset: usize) {
        let distance = self.ctx().chunk.code.len() - offset - 2;
        if distance > u16::MAX as usize {
            self.error("Too much code to jump over");
            return;
        }
        self.ctx_mut().chunk.patch_u16(offset, distance as u16);
    }

    /// Emit a `JumpBack` to the instruction at `start`.
    fn emit_loop(&mut self, start: usize) {
        self.emit(OpCode::JumpBack);
        let distance = self.ctx().chunk.code.len() - start + 2;
        if distance > u16::MAX as usize {
            self.error("Too much code to loop over");
            return;
        }
        let [lo, hi] = (distance as u16).to_le_bytes();
        self.emit_byte(lo);
        self.emit_byte(hi);
    }

    /// Finish the current function: emit the implicit return, pop its
    /// context and package the compiled [`Function`].
    fn end_function(&mut self) -> (Rc<Function>, Vec<UpvalueDesc>) {
        if self.had_error && self.error.is_none() {
            self.error_at(self.previous, "Invalid Syntax", true);
        }

        self.emit_return();

        let ctx = self.ctxs.pop().expect("at least one function context");
        let function = Rc::new(Function {
            name: ctx.name,
            arity: ctx.arity,
            upvalue_count: ctx.upvalues.len(),
            chunk: ctx.chunk,
        });
        (function, ctx.upvalues)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scopes and locals
    // ─────────────────────────────────────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.ctx_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.ctx_mut().scope_depth -= 1;
        let depth = self.ctx().scope_depth;

        loop {
            let Some(local) = self.ctx().locals.last() else {
                break;
            };
            if local.depth.unwrap_or(u32::MAX) <= depth {
                break;
            }
            let captured = local.is_captured;
            self.ctx_mut().locals.pop();
            if captured {
                self.emit(OpCode::CloseUpvalue);
            } else {
                self.emit(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: &str) {
        if self.ctx().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in one function");
            return;
        }
        self.ctx_mut().locals.push(Local {
            name: name.to_string(),
            depth: None,
            is_captured: false,
        });
    }

    /// Register the just-parsed identifier as a local in the current scope.
    /// At global scope this is a no-op (globals are late-bound by name).
    fn declare_variable(&mut self) {
        if self.ctx().scope_depth == 0 {
            return;
        }

        let name = self.previous.source;
        let depth = self.ctx().scope_depth;
        let mut duplicate = false;
        for local in self.ctx().locals.iter().rev() {
            if let Some(d) = local.depth {
                if d < depth {
                    break;
                }
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("There is already a variable with the same name in this scope");
        }

        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        let depth = self.ctx().scope_depth;
        if depth > 0 {
            if let Some(local) = self.ctx_mut().locals.last_mut() {
                local.depth = Some(depth);
            }
        }
    }

    /// Consume an identifier, declare it, and intern its name constant.
    fn parse_variable_name(&mut self, message: &str) -> u8 {
        self.consume(TokenType::Identifier, message);
        self.declare_variable();
        self.make_id_constant(self.previous.source)
    }

    /// Emit the definition for the variable named by constant `global`:
    /// locals become initialized in place, globals get `DefineGlobal`.
    fn define_variable(&mut self, global: u8) {
        if self.ctx().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_pair(OpCode::DefineGlobal, global);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Name resolution
    // ─────────────────────────────────────────────────────────────────────────

    /// Find `name` among the locals of `ctxs[ctx_idx]`, newest first.
    fn resolve_local(&mut self, ctx_idx: usize, name: &str) -> Option<u8> {
        for (idx, local) in self.ctxs[ctx_idx].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth.is_none() {
                    self.error("Can't read a local variable in its own initializer");
                }
                return Some(idx as u8);
            }
        }
        None
    }

    /// Resolve `name` as an upvalue of `ctxs[ctx_idx]`, capturing through
    /// every intermediate context.
    fn resolve_upvalue(&mut self, ctx_idx: usize, name: &str) -> Option<u8> {
        if ctx_idx == 0 {
            return None;
        }

        if let Some(local) = self.resolve_local(ctx_idx - 1, name) {
            self.ctxs[ctx_idx - 1].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(ctx_idx, local, true));
        }

        if let Some(upvalue) = self.resolve_upvalue(ctx_idx - 1, name) {
            return Some(self.add_upvalue(ctx_idx, upvalue, false));
        }

        None
    }

    fn add_upvalue(&mut self, ctx_idx: usize, index: u8, is_local: bool) -> u8 {
        let desc = UpvalueDesc { index, is_local };
        let upvalues = &mut self.ctxs[ctx_idx].upvalues;

        if let Some(existing) = upvalues.iter().position(|uv| *uv == desc) {
            return existing as u8;
        }
        if upvalues.len() >= MAX_UPVALUES {
            self.error("Too many up values in one function");
            return 0;
        }
        upvalues.push(desc);
        (upvalues.len() - 1) as u8
    }

    /// Compile a load of `name` — or an assignment to it, when `can_assign`
    /// holds and an assignment operator follows.  Compound forms load,
    /// evaluate the right-hand side, apply the operator, then store.
    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let ctx_idx = self.ctxs.len() - 1;

        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(ctx_idx, name.source) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(idx) = self.resolve_upvalue(ctx_idx, name.source) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, idx)
        } else {
            let constant = self.make_id_constant(name.source);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        let is_assignment = can_assign
            && name.kind != TokenType::This
            && matches!(
                self.current.kind,
                TokenType::Equal
                    | TokenType::PlusEqual
                    | TokenType::MinusEqual
                    | TokenType::AsteriskEqual
                    | TokenType::SlashEqual
            );

        if !is_assignment {
            self.emit_pair(get_op, arg);
            return;
        }

        if self.matches(TokenType::Equal) {
            self.expression();
            self.emit_pair(set_op, arg);
        } else {
            let operator = self.current.kind;
            self.advance();
            self.emit_pair(get_op, arg);
            self.expression();
            match operator {
                TokenType::PlusEqual => self.emit(OpCode::Add),
                TokenType::MinusEqual => self.emit(OpCode::Subtract),
                TokenType::AsteriskEqual => self.emit(OpCode::Multiply),
                TokenType::SlashEqual => self.emit(OpCode::Divide),
                _ => {}
            }
            self.emit_pair(set_op, arg);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        let Some(prefix) = rule_for(self.previous.kind).prefix else {
            self.error("Expected an expression");
            return;
        };

        self.can_assign = precedence <= Precedence::Assignment;
        self.run_prefix(prefix);

        while !self.had_error && precedence <= rule_for(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule_for(self.previous.kind).infix {
                self.run_infix(infix);
            }
        }

        // A leftover assignment operator here means the prefix it followed
        // was not a valid target.
        let is_assignment = matches!(
            self.current.kind,
            TokenType::Equal
                | TokenType::PlusEqual
                | TokenType::MinusEqual
                | TokenType::AsteriskEqual
                | TokenType::SlashEqual
        );
        if precedence <= Precedence::Assignment && is_assignment {
            self.error("Invalid assignment target");
            self.advance();
        }
    }

    fn run_prefix(&mut self, prefix: PrefixRule) {
        match prefix {
            PrefixRule::Number => self.number(),
            PrefixRule::Variable => self.variable(),
            PrefixRule::Str => self.string(),
            PrefixRule::Literal => self.literal(),
            PrefixRule::Grouping => self.grouping(),
            PrefixRule::Unary => self.unary(),
            PrefixRule::This => self.this_expression(),
            PrefixRule::Super => self.super_expression(),
        }
    }

    fn run_infix(&mut self, infix: InfixRule) {
        match infix {
            InfixRule::Binary => self.binary(),
            InfixRule::And => self.and_operator(),
            InfixRule::Or => self.or_operator(),
            InfixRule::Call => self.call(),
            InfixRule::Dot => self.dot(),
        }
    }

    fn number(&mut self) {
        let text = self.previous.source;
        // A leading-dot literal like `.5` parses as `0.5`.
        let parsed = if text.starts_with('.') {
            format!("0{text}").parse::<f64>()
        } else {
            text.parse::<f64>()
        };
        match parsed {
            Ok(value) => self.emit_constant(Constant::Number(value)),
            Err(_) => self.error("Invalid number literal"),
        }
    }

    fn variable(&mut self) {
        self.named_variable(self.previous, self.can_assign);
    }

    fn string(&mut self) {
        let source = self.previous.source;
        let content = &source[1..source.len() - 1];
        self.emit_constant(Constant::Str(content.to_string()));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenType::True => self.emit(OpCode::True),
            TokenType::False => self.emit(OpCode::False),
            TokenType::None => self.emit(OpCode::None),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenType::RightParen, "Expected a closing parenthesis");
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenType::Minus => self.emit(OpCode::Negate),
            TokenType::Bang => self.emit(OpCode::Not),
            _ => {}
        }
    }

    fn binary(&mut self) {
        let operator = self.previous.kind;
        let precedence = rule_for(operator).precedence;
        self.parse_precedence(precedence.one_higher());

        match operator {
            TokenType::Plus => self.emit(OpCode::Add),
            TokenType::Minus => self.emit(OpCode::Subtract),
            TokenType::Asterisk => self.emit(OpCode::Multiply),
            TokenType::Slash => self.emit(OpCode::Divide),
            TokenType::EqualEqual => self.emit(OpCode::Equal),
            TokenType::BangEqual => self.emit(OpCode::NotEqual),
            TokenType::Greater => self.emit(OpCode::Greater),
            TokenType::GreaterEqual => self.emit(OpCode::GreaterEqual),
            TokenType::Less => self.emit(OpCode::Less),
            TokenType::LessEqual => self.emit(OpCode::LessEqual),
            _ => {}
        }
    }

    fn and_operator(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_operator(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfTrue);
        self.emit(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_pair(OpCode::Call, argc);
    }

    fn dot(&mut self) {
        self.consume(TokenType::Identifier, "Expected identifier after '.'");
        let name = self.make_id_constant(self.previous.source);

        if self.can_assign && self.matches(TokenType::Equal) {
            self.expression();
            self.emit_pair(OpCode::SetProperty, name);
        } else if self.matches(TokenType::LeftParen) {
            let argc = self.argument_list();
            self.emit_pair(OpCode::Invoke, name);
            self.emit_byte(argc);
        } else {
            self.emit_pair(OpCode::GetProperty, name);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u16 = 0;
        if !self.check(TokenType::RightParen) {
            loop {
                self.expression();
                argc += 1;
                if argc > u8::MAX as u16 {
                    self.error("Too many arguments (max: 255)");
                    argc = u8::MAX as u16;
                }
                if self.had_error || !self.matches(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expected ')' after arguments");
        argc as u8
    }

    fn this_expression(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class");
            return;
        }
        self.variable();
    }

    fn super_expression(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().is_some_and(|c| c.has_superclass) {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenType::Dot, "Expect '.' after 'super'.");
        self.consume(TokenType::Identifier, "Expect superclass method name.");
        let name = self.make_id_constant(self.previous.source);

        self.named_variable(Token::synthetic(TokenType::This, "this"), false);
        self.named_variable(Token::synthetic(TokenType::Identifier, "super"), false);
        self.emit_pair(OpCode::GetSuper, name);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    fn declaration(&mut self) {
        match self.current.kind {
            TokenType::Var => self.var_declaration(),
            TokenType::Func => self.func_declaration(),
            TokenType::Class => self.class_declaration(),
            _ => self.statement(),
        }
    }

    fn statement(&mut self) {
        match self.current.kind {
            TokenType::If => self.if_statement(),
            TokenType::While => self.while_loop(),
            TokenType::For => self.for_loop(),
            TokenType::Return => self.return_statement(),
            TokenType::Print => self.print_statement(),
            TokenType::LeftBrace => {
                self.begin_scope();
                self.block();
                self.end_scope();
            }
            TokenType::Semicolon => self.advance(),
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.emit(OpCode::Pop);
        self.consume(TokenType::Semicolon, "Expected ';' after expression");
    }

    fn print_statement(&mut self) {
        self.advance();
        self.expression();
        self.emit(OpCode::Print);
        self.consume(TokenType::Semicolon, "Expected ';' after print statement");
    }

    fn return_statement(&mut self) {
        if self.ctx().kind == FunctionKind::Script {
            self.error("Cannot return from top level of code");
            return;
        }

        self.advance();

        if self.matches(TokenType::Semicolon) {
            self.emit_return();
        } else if self.ctx().kind == FunctionKind::Initializer {
            self.error("Can't return a value from an initializer");
        } else {
            self.expression();
            self.emit(OpCode::Return);
            self.consume(TokenType::Semicolon, "Expected ';' after return statement");
        }
    }

    fn if_statement(&mut self) {
        self.advance();
        self.consume(TokenType::LeftParen, "Expected '(' before condition");
        self.expression();
        self.consume(TokenType::RightParen, "Expected ')' after condition");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit(OpCode::Pop);

        if self.matches(TokenType::Else) {
            self.statement();
        }

        self.patch_jump(else_jump);
    }

    fn while_loop(&mut self) {
        let loop_start = self.ctx().chunk.code.len();
        self.advance();
        self.consume(TokenType::LeftParen, "Expected '(' before condition");
        self.expression();
        self.consume(TokenType::RightParen, "Expected ')' after condition");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OpCode::Pop);
    }

    fn for_loop(&mut self) {
        self.advance();
        self.begin_scope();
        self.consume(TokenType::LeftParen, "Expected '(' after 'for'");

        // Initializer clause.
        if self.check(TokenType::Var) {
            self.var_declaration();
        } else if !self.matches(TokenType::Semicolon) {
            self.expression_statement();
        }

        // Condition clause.
        let mut exit_jump = None;
        let mut loop_start = self.ctx().chunk.code.len();

        if !self.matches(TokenType::Semicolon) {
            self.expression();
            self.consume(TokenType::Semicolon, "Expected ';' after loop condition");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit(OpCode::Pop);
        }

        // Increment clause runs after the body, so jump over it on the way
        // in and loop back through it afterwards.
        if !self.matches(TokenType::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.ctx().chunk.code.len();

            self.expression();
            self.emit(OpCode::Pop);
            self.consume(TokenType::RightParen, "Expected ')' after increment clause");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit(OpCode::Pop);
        }

        self.end_scope();
    }

    fn block(&mut self) {
        self.advance();

        while !self.check(TokenType::RightBrace) && !self.is_finished() {
            self.declaration();
        }

        self.consume(TokenType::RightBrace, "Expected '}' after block");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Declarations
    // ─────────────────────────────────────────────────────────────────────────

    fn var_declaration(&mut self) {
        self.advance();
        let global = self.parse_variable_name("Invalid variable name");

        if self.matches(TokenType::Equal) {
            self.expression();
        } else {
            self.emit(OpCode::None);
        }

        self.consume(
            TokenType::Semicolon,
            "Expected ';' after variable declaration",
        );
        self.define_variable(global);
    }

    fn func_declaration(&mut self) {
        self.advance();
        let global = self.parse_variable_name("Expected function name");
        // Initialized before the body so the function can call itself.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compile a function body (the name has just been consumed) and emit
    /// the `Closure` instruction with its capture pairs.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.previous.source.to_string();
        self.ctxs.push(FunctionCtx::new(kind, name));
        self.begin_scope();

        self.consume(TokenType::LeftParen, "Expected '(' after function name");
        if !self.check(TokenType::RightParen) {
            loop {
                if self.ctx().arity == u8::MAX {
                    self.error("Can't have more than 255 parameters");
                } else {
                    self.ctx_mut().arity += 1;
                }
                let constant = self.parse_variable_name("Expect parameter name");
                self.define_variable(constant);
                if self.had_error || !self.matches(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expected ')' after parameters");

        if !self.check(TokenType::LeftBrace) {
            self.error_at(self.current, "Expected '{' before function body", true);
        }
        self.block();

        let (function, upvalues) = self.end_function();
        let constant = self.make_constant(Constant::Function(function));
        self.emit_pair(OpCode::Closure, constant);

        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenType::Identifier, "Expected method name");
        let constant = self.make_id_constant(self.previous.source);

        let kind = if self.previous.source == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind);

        self.emit_pair(OpCode::Method, constant);
    }

    fn class_declaration(&mut self) {
        self.advance();
        self.consume(TokenType::Identifier, "Expected class name");

        let class_name = self.previous;
        let name_constant = self.make_id_constant(class_name.source);

        self.declare_variable();

        self.emit_pair(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassCtx {
            has_superclass: false,
        });

        if self.matches(TokenType::Less) {
            self.consume(TokenType::Identifier, "Expected base class name");

            if self.previous.source == class_name.source {
                self.error("A class can't inherit from itself");
            }

            // Load the base class, then keep it alive in a synthetic local
            // named `super` for the span of the class body.
            self.named_variable(self.previous, false);

            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();

            self.named_variable(class_name, false);
            self.emit(OpCode::Inherit);

            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        // The class value stays on the stack while methods attach to it.
        self.named_variable(class_name, false);
        self.consume(TokenType::LeftBrace, "Expected '{' before class body");

        while !self.is_finished() && !self.check(TokenType::RightBrace) {
            self.method();
        }

        self.consume(TokenType::RightBrace, "Expected '}' after class body");
        self.emit(OpCode::Pop);

        if self.classes.last().is_some_and(|c| c.has_superclass) {
            self.end_scope();
        }

        self.classes.pop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disassemble;

    fn compile_ok(source: &str) -> Rc<Function> {
        match compile(source) {
            Ok(function) => function,
            Err(error) => panic!("compile failed: {error}"),
        }
    }

    fn compile_err(source: &str) -> CompileError {
        match compile(source) {
            Ok(_) => panic!("expected a compile error for {source:?}"),
            Err(error) => error,
        }
    }

    #[test]
    fn test_expression_statement_bytecode() {
        let function = compile_ok("1 + 2;");
        let code = &function.chunk.code;
        // Constant 1, Constant 2, Add, Pop, implicit None + Return.
        assert_eq!(
            code,
            &vec![
                OpCode::Constant as u8,
                0,
                OpCode::Constant as u8,
                1,
                OpCode::Add as u8,
                OpCode::Pop as u8,
                OpCode::None as u8,
                OpCode::Return as u8,
            ]
        );
    }

    #[test]
    fn test_script_function_is_unnamed() {
        let function = compile_ok("print 1;");
        assert!(function.name.is_empty());
        assert_eq!(function.arity, 0);
        assert_eq!(function.upvalue_count, 0);
    }

    #[test]
    fn test_numeric_constants_dedup_across_statement() {
        let function = compile_ok("print 1 + 1 + 1;");
        let numbers = function
            .chunk
            .constants
            .iter()
            .filter(|c| matches!(c, Constant::Number(_)))
            .count();
        assert_eq!(numbers, 1);
    }

    #[test]
    fn test_leading_dot_number() {
        let function = compile_ok("print .5;");
        assert!(function
            .chunk
            .constants
            .iter()
            .any(|c| matches!(c, Constant::Number(n) if *n == 0.5)));
    }

    #[test]
    fn test_compound_assignment_expands() {
        let function = compile_ok("var a = 1; a += 2;");
        let code = &function.chunk.code;
        let add_at = code
            .iter()
            .position(|&b| b == OpCode::Add as u8)
            .expect("compound assignment emits Add");
        // Load, RHS, Add, store.
        assert_eq!(code[add_at + 1], OpCode::SetGlobal as u8);
    }

    #[test]
    fn test_block_locals_use_slots() {
        let function = compile_ok("{ var a = 1; print a; }");
        let code = &function.chunk.code;
        assert!(code.contains(&(OpCode::GetLocal as u8)));
        assert!(!code.contains(&(OpCode::GetGlobal as u8)));
        // The local is popped when the scope closes.
        assert!(code.contains(&(OpCode::Pop as u8)));
    }

    #[test]
    fn test_nested_function_captures_upvalue() {
        let function = compile_ok(
            "func make() { var x = 0; func inc() { x = x + 1; return x; } return inc; }",
        );
        let make = function
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("make is a function constant");
        let inc = make
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("inc is a function constant");

        assert_eq!(inc.name, "inc");
        assert_eq!(inc.upvalue_count, 1);
        assert!(inc.chunk.code.contains(&(OpCode::GetUpvalue as u8)));
        // The captured local is closed rather than popped at scope end.
        assert!(make.chunk.code.contains(&(OpCode::CloseUpvalue as u8)));
    }

    #[test]
    fn test_closure_capture_pairs_follow_instruction() {
        let function = compile_ok(
            "func make() { var x = 0; func inc() { x = x + 1; return x; } return inc; }",
        );
        let make = function
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("make is a function constant");

        let code = &make.chunk.code;
        let closure_at = code
            .iter()
            .position(|&b| b == OpCode::Closure as u8)
            .expect("make's body emits Closure for inc");
        // (is_local = 1, index) pair trails the constant operand.
        assert_eq!(code[closure_at + 2], 1);
    }

    #[test]
    fn test_chained_capture_is_not_local() {
        let function = compile_ok(
            "func outer() { var x = 1; func mid() { func inner() { return x; } return inner; } return mid; }",
        );
        let outer = function
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("outer function constant");
        let mid = outer
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("mid function constant");

        // mid captures x from outer as a local...
        assert_eq!(mid.upvalue_count, 1);
        let closure_at = mid
            .chunk
            .code
            .iter()
            .position(|&b| b == OpCode::Closure as u8)
            .expect("mid emits Closure for inner");
        // ...and inner re-captures it from mid's upvalues (is_local = 0).
        assert_eq!(mid.chunk.code[closure_at + 2], 0);
    }

    #[test]
    fn test_if_else_jumps_disassemble() {
        let function = compile_ok("if (true) print 1; else print 2;");
        let text = disassemble(&function.chunk, "script");
        assert!(text.contains("JumpIfFalse"));
        assert!(text.contains("Jump"));
    }

    #[test]
    fn test_and_or_short_circuit_shapes() {
        let with_and = compile_ok("print true and false;");
        assert!(with_and
            .chunk
            .code
            .contains(&(OpCode::JumpIfFalse as u8)));

        let with_or = compile_ok("print true or false;");
        assert!(with_or.chunk.code.contains(&(OpCode::JumpIfTrue as u8)));
    }

    #[test]
    fn test_while_emits_jump_back() {
        let function = compile_ok("while (false) print 1;");
        assert!(function.chunk.code.contains(&(OpCode::JumpBack as u8)));
    }

    #[test]
    fn test_for_all_clauses_optional() {
        compile_ok("for (;;) { return; }");
    }

    #[test]
    fn test_class_compiles_methods() {
        let function = compile_ok("class A { init(v) { this.v = v; } show() { print this.v; } }");
        let code = &function.chunk.code;
        assert!(code.contains(&(OpCode::Class as u8)));
        assert!(code.contains(&(OpCode::Method as u8)));
    }

    #[test]
    fn test_inheritance_emits_inherit() {
        let function = compile_ok("class A {} class B < A {}");
        assert!(function.chunk.code.contains(&(OpCode::Inherit as u8)));
    }

    #[test]
    fn test_super_call_emits_get_super() {
        let function =
            compile_ok("class A { show() {} } class B < A { show() { super.show(); } }");
        let b_show = find_function(&function.chunk.constants, "show", 1)
            .expect("B.show function constant");
        assert!(b_show.chunk.code.contains(&(OpCode::GetSuper as u8)));
    }

    /// Find the `skip + 1`-th function constant named `name`, searching
    /// nested chunks too.
    fn find_function(constants: &[Constant], name: &str, mut skip: usize) -> Option<Rc<Function>> {
        fn walk(
            constants: &[Constant],
            name: &str,
            skip: &mut usize,
        ) -> Option<Rc<Function>> {
            for constant in constants {
                if let Constant::Function(function) = constant {
                    if function.name == name {
                        if *skip == 0 {
                            return Some(function.clone());
                        }
                        *skip -= 1;
                    }
                    if let Some(found) = walk(&function.chunk.constants, name, skip) {
                        return Some(found);
                    }
                }
            }
            None
        }
        walk(constants, name, &mut skip)
    }

    #[test]
    fn test_method_invoke_fuses_lookup_and_call() {
        let function = compile_ok("class A { show() {} } var a = A(); a.show();");
        assert!(function.chunk.code.contains(&(OpCode::Invoke as u8)));
    }

    #[test]
    fn test_initializer_implicitly_returns_this() {
        let function = compile_ok("class A { init() {} }");
        let init =
            find_function(&function.chunk.constants, "init", 0).expect("init function constant");
        let code = &init.chunk.code;
        let len = code.len();
        // ... GetLocal 0, Return
        assert_eq!(code[len - 3], OpCode::GetLocal as u8);
        assert_eq!(code[len - 2], 0);
        assert_eq!(code[len - 1], OpCode::Return as u8);
    }

    #[test]
    fn test_empty_statement() {
        compile_ok(";;;");
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn test_invalid_assignment_target() {
        let error = compile_err("1 + 2 = 3;");
        assert_eq!(error.message, "Invalid assignment target");
    }

    #[test]
    fn test_this_outside_class() {
        let error = compile_err("print this;");
        assert_eq!(error.message, "Can't use 'this' outside of a class");
    }

    #[test]
    fn test_super_without_superclass() {
        let error = compile_err("class A { show() { super.show(); } }");
        assert_eq!(
            error.message,
            "Can't use 'super' in a class with no superclass."
        );
    }

    #[test]
    fn test_return_at_top_level() {
        let error = compile_err("return 1;");
        assert_eq!(error.message, "Cannot return from top level of code");
    }

    #[test]
    fn test_initializer_may_not_return_value() {
        let error = compile_err("class A { init() { return 1; } }");
        assert_eq!(error.message, "Can't return a value from an initializer");

        // A bare return is fine.
        compile_ok("class A { init() { return; } }");
    }

    #[test]
    fn test_duplicate_local_in_scope() {
        let error = compile_err("{ var a = 1; var a = 2; }");
        assert_eq!(
            error.message,
            "There is already a variable with the same name in this scope"
        );
        // Shadowing in an inner scope is allowed.
        compile_ok("{ var a = 1; { var a = 2; } }");
        // Global redefinition is allowed.
        compile_ok("var a = 1; var a = 2;");
    }

    #[test]
    fn test_local_in_own_initializer() {
        let error = compile_err("{ var a = 1; { var a = a; } }");
        assert_eq!(
            error.message,
            "Can't read a local variable in its own initializer"
        );
    }

    #[test]
    fn test_class_self_inheritance() {
        let error = compile_err("class A < A {}");
        assert_eq!(error.message, "A class can't inherit from itself");
    }

    #[test]
    fn test_unterminated_string_reports_scanner_message() {
        let error = compile_err("print \"oops;");
        assert_eq!(error.message, "String literal does not end");
    }

    #[test]
    fn test_stray_character_is_invalid_syntax() {
        let error = compile_err("var a = #;");
        assert_eq!(error.message, "Invalid Syntax");
    }

    #[test]
    fn test_missing_semicolon_quotes_token() {
        let error = compile_err("print 1 print 2;");
        assert_eq!(error.message, "Expected ';' after print statement");
        assert_eq!(error.token.as_deref(), Some("print"));
    }

    #[test]
    fn test_error_carries_line() {
        let error = compile_err("var ok = 1;\nvar bad = ;\n");
        assert_eq!(error.line, 2);
    }

    // ── Limits ───────────────────────────────────────────────────────────────

    #[test]
    fn test_constant_pool_limit() {
        // The name string, the 0 literal and 254 distinct numbers fill the
        // pool exactly (256 entries).
        let mut source = String::from("var sink = 0;");
        for n in 0..254 {
            source.push_str(&format!("sink = {n}.5;"));
        }
        compile_ok(&source);

        // One more distinct constant overflows the pool.
        source.push_str("sink = 999999.25;");
        let error = compile_err(&source);
        assert_eq!(error.message, "Too many constants in one chunk");
    }

    #[test]
    fn test_local_limit() {
        // Slot 0 is reserved, so 255 declared locals fill the frame.
        let mut source = String::from("{");
        for n in 0..255 {
            source.push_str(&format!("var l{n};"));
        }
        source.push('}');
        compile_ok(&source);

        let mut over = String::from("{");
        for n in 0..256 {
            over.push_str(&format!("var l{n};"));
        }
        over.push('}');
        let error = compile_err(&over);
        assert_eq!(error.message, "Too many local variables in one function");
    }

    #[test]
    fn test_parameter_limit() {
        let params: Vec<String> = (0..255).map(|n| format!("p{n}")).collect();
        let source = format!("func f({}) {{}}", params.join(", "));
        compile_ok(&source);

        let params: Vec<String> = (0..256).map(|n| format!("p{n}")).collect();
        let source = format!("func f({}) {{}}", params.join(", "));
        let error = compile_err(&source);
        assert_eq!(error.message, "Can't have more than 255 parameters");
    }

    #[test]
    fn test_argument_limit() {
        let args: Vec<String> = (0..256).map(|_| "1".to_string()).collect();
        let source = format!("func f() {{}} f({});", args.join(", "));
        let error = compile_err(&source);
        assert_eq!(error.message, "Too many arguments (max: 255)");
    }

    #[test]
    fn test_jump_distance_limit() {
        // A single if-body bigger than u16::MAX bytes of code.  Each
        // `sink = 0;` statement compiles to 5 bytes (Constant c, SetGlobal
        // c, Pop), so 14_000 statements are comfortably past the limit.
        let mut source = String::from("var sink = 0; if (true) {");
        for _ in 0..14_000 {
            source.push_str("sink = 0;");
        }
        source.push('}');
        let error = compile_err(&source);
        assert_eq!(error.message, "Too much code to jump over");
    }

    #[test]
    fn test_statements_are_stack_neutral() {
        // Walking the bytecode of a straight-line script and simulating
        // stack effects should end balanced at every statement boundary.
        let function = compile_ok("var a = 1; var b = 2; print a + b; a = b;");
        let code = &function.chunk.code;
        let mut depth: i32 = 0;
        let mut offset = 0;
        while offset < code.len() {
            let op = OpCode::try_from(code[offset]).expect("valid opcode");
            let (effect, size) = match op {
                OpCode::Constant => (1, 2),
                OpCode::None | OpCode::True | OpCode::False => (1, 1),
                OpCode::DefineGlobal => (-1, 2),
                OpCode::GetGlobal => (1, 2),
                OpCode::SetGlobal => (0, 2),
                OpCode::Add => (-1, 1),
                OpCode::Print => (-1, 1),
                OpCode::Pop => (-1, 1),
                OpCode::Return => (-1, 1),
                other => panic!("unexpected opcode {other:?}"),
            };
            depth += effect;
            offset += size;
            assert!(depth >= 0, "stack underflow at offset {offset}");
        }
        // The implicit return leaves the simulated stack empty.
        assert_eq!(depth, 0);
    }
}

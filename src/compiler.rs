// File: src/compiler.rs
//
// Single-pass Pratt-parsing compiler: tokens go straight to bytecode, no
// AST is ever materialized. One `FunctionScope` exists per nested
// function/method/initializer/script currently being compiled; the
// innermost is `self.functions.last()`. Locals, upvalues and scope depth
// all live on that stack, mirroring the call stack the VM will build at
// runtime.

use crate::chunk::{Chunk, OpCode};
use crate::errors::{SourceLocation, TokError};
use crate::gc::Heap;
use crate::object::{FunctionKind, ObjData, ObjFunction, ObjHandle, UpvalueDesc};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
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
    fn next(self) -> Precedence {
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
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src>, &mut Heap, bool);

#[derive(Clone, Copy)]
struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

fn get_rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use TokenKind::*;
    let rule = |prefix: Option<ParseFn<'src>>, infix: Option<ParseFn<'src>>, precedence: Precedence| ParseRule {
        prefix,
        infix,
        precedence,
    };
    match kind {
        LeftParen => rule(Some(Compiler::grouping), Some(Compiler::call), Precedence::Call),
        Dot => rule(None, Some(Compiler::dot), Precedence::Call),
        Minus => rule(Some(Compiler::unary), Some(Compiler::binary), Precedence::Term),
        Plus => rule(None, Some(Compiler::binary), Precedence::Term),
        Slash => rule(None, Some(Compiler::binary), Precedence::Factor),
        Star => rule(None, Some(Compiler::binary), Precedence::Factor),
        Bang => rule(Some(Compiler::unary), None, Precedence::None),
        BangEqual => rule(None, Some(Compiler::binary), Precedence::Equality),
        EqualEqual => rule(None, Some(Compiler::binary), Precedence::Equality),
        Greater => rule(None, Some(Compiler::binary), Precedence::Comparison),
        GreaterEqual => rule(None, Some(Compiler::binary), Precedence::Comparison),
        Less => rule(None, Some(Compiler::binary), Precedence::Comparison),
        LessEqual => rule(None, Some(Compiler::binary), Precedence::Comparison),
        Identifier => rule(Some(Compiler::variable), None, Precedence::None),
        String => rule(Some(Compiler::string), None, Precedence::None),
        Number => rule(Some(Compiler::number), None, Precedence::None),
        And => rule(None, Some(Compiler::and_), Precedence::And),
        Or => rule(None, Some(Compiler::or_), Precedence::Or),
        False => rule(Some(Compiler::literal), None, Precedence::None),
        Nil => rule(Some(Compiler::literal), None, Precedence::None),
        True => rule(Some(Compiler::literal), None, Precedence::None),
        Super => rule(Some(Compiler::super_), None, Precedence::None),
        This => rule(Some(Compiler::this_), None, Precedence::None),
        _ => rule(None, None, Precedence::None),
    }
}

struct LocalVar<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

struct FunctionScope<'src> {
    function: ObjHandle,
    kind: FunctionKind,
    locals: Vec<LocalVar<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl<'src> FunctionScope<'src> {
    fn new(function: ObjHandle, kind: FunctionKind) -> Self {
        // Slot 0 is reserved: `this` for methods/initializers, an
        // unnamed placeholder for plain functions and the script.
        let first_local_name = if kind == FunctionKind::Method || kind == FunctionKind::Initializer {
            "this"
        } else {
            ""
        };
        Self {
            function,
            kind,
            locals: vec![LocalVar { name: first_local_name, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassScope {
    has_superclass: bool,
}

/// Compiles one source string into a top-level script `ObjFunction`.
/// Lives only for the duration of `compile`; the scanner's lifetime
/// `'src` ties every token's lexeme back to the caller's source buffer.
pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<TokError>,
    functions: Vec<FunctionScope<'src>>,
    classes: Vec<ClassScope>,
}

pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjHandle, Vec<TokError>> {
    let script = heap.alloc(ObjData::Function(ObjFunction::new()));
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        current: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
        previous: Token { kind: TokenKind::Eof, lexeme: "", line: 0 },
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        functions: vec![FunctionScope::new(script, FunctionKind::Script)],
        classes: Vec::new(),
    };

    compiler.advance();
    while !compiler.match_token(TokenKind::Eof, heap) {
        compiler.declaration(heap);
    }
    compiler.emit_return(heap);

    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(script)
    }
}

impl<'src> Compiler<'src> {
    // --- Token stream -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind, _heap: &mut Heap) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let text = if token.kind == TokenKind::Eof {
            format!("at end: {}", message)
        } else if token.kind == TokenKind::Error {
            message.to_string()
        } else {
            format!("at '{}': {}", token.lexeme, message)
        };
        self.errors.push(TokError::compile(text, SourceLocation::new(token.line)));
    }

    /// Skips tokens until a statement boundary, so one error doesn't
    /// cascade into a wall of spurious follow-on errors.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // --- Emission helpers ----------------------------------------------

    fn current_index(&self) -> usize {
        self.functions.len() - 1
    }

    fn chunk_mut<'h>(&self, heap: &'h mut Heap) -> &'h mut Chunk {
        let handle = self.functions[self.current_index()].function;
        match heap.get_mut(handle) {
            ObjData::Function(f) => &mut f.chunk,
            _ => unreachable!("function scope handle must be an ObjFunction"),
        }
    }

    fn emit_byte(&mut self, byte: u8, heap: &mut Heap) {
        let line = self.previous.line;
        self.chunk_mut(heap).write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode, heap: &mut Heap) {
        self.emit_byte(op as u8, heap);
    }

    fn emit_ops(&mut self, a: OpCode, b: u8, heap: &mut Heap) {
        self.emit_op(a, heap);
        self.emit_byte(b, heap);
    }

    fn emit_jump(&mut self, op: OpCode, heap: &mut Heap) -> usize {
        self.emit_op(op, heap);
        self.emit_byte(0xff, heap);
        self.emit_byte(0xff, heap);
        self.chunk_mut(heap).len() - 2
    }

    fn patch_jump(&mut self, offset: usize, heap: &mut Heap) {
        let jump = self.chunk_mut(heap).len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("loop body too large to jump over");
            return;
        }
        self.chunk_mut(heap).patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize, heap: &mut Heap) {
        self.emit_op(OpCode::Loop, heap);
        let offset = self.chunk_mut(heap).len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("loop body too large");
            return;
        }
        let line = self.previous.line;
        self.chunk_mut(heap).write_u16(offset as u16, line);
    }

    fn make_constant(&mut self, value: Value, heap: &mut Heap) -> u8 {
        match self.chunk_mut(heap).add_constant(value) {
            Ok(idx) => idx,
            Err(message) => {
                self.error(&message);
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value, heap: &mut Heap) {
        let idx = self.make_constant(value, heap);
        self.emit_ops(OpCode::Constant, idx, heap);
    }

    /// Initializers implicitly return the instance (`this`, slot 0);
    /// everything else implicitly returns nil.
    fn emit_return(&mut self, heap: &mut Heap) {
        let kind = self.functions[self.current_index()].kind;
        if kind == FunctionKind::Initializer {
            self.emit_ops(OpCode::GetLocal, 0, heap);
        } else {
            self.emit_op(OpCode::Nil, heap);
        }
        self.emit_op(OpCode::Return, heap);
    }

    fn identifier_constant(&mut self, name: &str, heap: &mut Heap) -> u8 {
        let handle = heap.intern(name);
        self.make_constant(Value::Obj(handle), heap)
    }

    // --- Scope -----------------------------------------------------------

    fn begin_scope(&mut self) {
        self.functions[self.current_index()].scope_depth += 1;
    }

    fn end_scope(&mut self, heap: &mut Heap) {
        let idx = self.current_index();
        self.functions[idx].scope_depth -= 1;
        let depth = self.functions[idx].scope_depth;
        loop {
            let should_pop = match self.functions[idx].locals.last() {
                Some(local) if local.depth > depth => true,
                _ => false,
            };
            if !should_pop {
                break;
            }
            if self.functions[idx].locals.last().unwrap().is_captured {
                self.emit_op(OpCode::CloseUpvalue, heap);
            } else {
                self.emit_op(OpCode::Pop, heap);
            }
            self.functions[idx].locals.pop();
        }
    }

    fn declare_variable(&mut self) {
        let idx = self.current_index();
        if self.functions[idx].scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let depth = self.functions[idx].scope_depth;
        let mut duplicate = false;
        for local in self.functions[idx].locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("a variable with this name is already declared in this scope");
            return;
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        let idx = self.current_index();
        if self.functions[idx].locals.len() >= 256 {
            self.error("too many local variables in function");
            return;
        }
        self.functions[idx].locals.push(LocalVar { name, depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        let idx = self.current_index();
        if self.functions[idx].scope_depth == 0 {
            return;
        }
        let depth = self.functions[idx].scope_depth;
        self.functions[idx].locals.last_mut().unwrap().depth = depth;
    }

    fn parse_variable(&mut self, message: &str, heap: &mut Heap) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.functions[self.current_index()].scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.identifier_constant(name, heap)
    }

    fn define_variable(&mut self, global: u8, heap: &mut Heap) {
        if self.functions[self.current_index()].scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_ops(OpCode::DefineGlobal, global, heap);
    }

    fn resolve_local(&mut self, func_idx: usize, name: &str) -> Option<u8> {
        let locals = &self.functions[func_idx].locals;
        for (slot, local) in locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error("can't read local variable in its own initializer");
                }
                return Some(slot as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, func_idx: usize, name: &str) -> Option<u8> {
        if func_idx == 0 {
            return None;
        }
        let enclosing = func_idx - 1;
        if let Some(local_slot) = self.resolve_local(enclosing, name) {
            self.functions[enclosing].locals[local_slot as usize].is_captured = true;
            return Some(self.add_upvalue(func_idx, local_slot, true));
        }
        if let Some(upvalue_slot) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(func_idx, upvalue_slot, false));
        }
        None
    }

    fn add_upvalue(&mut self, func_idx: usize, index: u8, is_local: bool) -> u8 {
        {
            let upvalues = &self.functions[func_idx].upvalues;
            for (i, up) in upvalues.iter().enumerate() {
                if up.index == index && up.is_local == is_local {
                    return i as u8;
                }
            }
        }
        if self.functions[func_idx].upvalues.len() >= 256 {
            self.error("too many closure variables in function");
            return 0;
        }
        self.functions[func_idx].upvalues.push(UpvalueDesc { is_local, index });
        (self.functions[func_idx].upvalues.len() - 1) as u8
    }

    // --- Declarations ----------------------------------------------------

    fn declaration(&mut self, heap: &mut Heap) {
        if self.match_token(TokenKind::Class, heap) {
            self.class_declaration(heap);
        } else if self.match_token(TokenKind::Fun, heap) {
            self.fun_declaration(heap);
        } else if self.match_token(TokenKind::Var, heap) {
            self.var_declaration(heap);
        } else {
            self.statement(heap);
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn class_declaration(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::Identifier, "expect class name");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name, heap);
        self.declare_variable();
        self.emit_ops(OpCode::Class, name_constant, heap);
        self.define_variable(name_constant, heap);

        self.classes.push(ClassScope { has_superclass: false });

        if self.match_token(TokenKind::Less, heap) {
            self.consume(TokenKind::Identifier, "expect superclass name");
            self.variable(heap, false);
            if self.previous.lexeme == class_name {
                self.error("a class can't inherit from itself");
            }
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0, heap);
            self.named_variable(class_name, heap, false);
            self.emit_op(OpCode::Inherit, heap);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, heap, false);
        self.consume(TokenKind::LeftBrace, "expect '{' before class body");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method(heap);
        }
        self.consume(TokenKind::RightBrace, "expect '}' after class body");
        self.emit_op(OpCode::Pop, heap);

        let class_scope = self.classes.pop().unwrap();
        if class_scope.has_superclass {
            self.end_scope(heap);
        }
    }

    fn method(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::Identifier, "expect method name");
        let name = self.previous.lexeme;
        let name_constant = self.identifier_constant(name, heap);
        let kind = if name == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
        self.function(kind, heap);
        self.emit_ops(OpCode::Method, name_constant, heap);
    }

    fn fun_declaration(&mut self, heap: &mut Heap) {
        let global = self.parse_variable("expect function name", heap);
        self.mark_initialized();
        self.function(FunctionKind::Function, heap);
        self.define_variable(global, heap);
    }

    fn function(&mut self, kind: FunctionKind, heap: &mut Heap) {
        let name = self.previous.lexeme;
        let name_handle = heap.intern(name);
        let mut function = ObjFunction::new();
        function.name = Some(name_handle);
        let handle = heap.alloc(ObjData::Function(function));
        self.functions.push(FunctionScope::new(handle, kind));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "expect '(' after function name");
        let mut arity: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                arity += 1;
                if arity > 255 {
                    self.error_at_current("can't have more than 255 parameters");
                }
                let constant = self.parse_variable("expect parameter name", heap);
                self.define_variable(constant, heap);
                if !self.match_token(TokenKind::Comma, heap) {
                    break;
                }
            }
        }
        let idx = self.current_index();
        match heap.get_mut(self.functions[idx].function) {
            ObjData::Function(f) => f.arity = arity.min(255) as u8,
            _ => unreachable!(),
        }
        self.consume(TokenKind::RightParen, "expect ')' after parameters");
        self.consume(TokenKind::LeftBrace, "expect '{' before function body");
        self.block(heap);

        self.emit_return(heap);

        let scope = self.functions.pop().unwrap();
        let upvalue_count = scope.upvalues.len() as u8;
        match heap.get_mut(scope.function) {
            ObjData::Function(f) => f.upvalue_count = upvalue_count,
            _ => unreachable!(),
        }

        let const_idx = self.make_constant(Value::Obj(scope.function), heap);
        self.emit_ops(OpCode::Closure, const_idx, heap);
        for up in &scope.upvalues {
            self.emit_byte(up.is_local as u8, heap);
            self.emit_byte(up.index, heap);
        }
    }

    fn var_declaration(&mut self, heap: &mut Heap) {
        let global = self.parse_variable("expect variable name", heap);
        if self.match_token(TokenKind::Equal, heap) {
            self.expression(heap);
        } else {
            self.emit_op(OpCode::Nil, heap);
        }
        self.consume(TokenKind::Semicolon, "expect ';' after variable declaration");
        self.define_variable(global, heap);
    }

    // --- Statements --------------------------------------------------------

    fn statement(&mut self, heap: &mut Heap) {
        if self.match_token(TokenKind::Print, heap) {
            self.print_statement(heap);
        } else if self.match_token(TokenKind::If, heap) {
            self.if_statement(heap);
        } else if self.match_token(TokenKind::Return, heap) {
            self.return_statement(heap);
        } else if self.match_token(TokenKind::While, heap) {
            self.while_statement(heap);
        } else if self.match_token(TokenKind::For, heap) {
            self.for_statement(heap);
        } else if self.match_token(TokenKind::LeftBrace, heap) {
            self.begin_scope();
            self.block(heap);
            self.end_scope(heap);
        } else {
            self.expression_statement(heap);
        }
    }

    fn block(&mut self, heap: &mut Heap) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration(heap);
        }
        self.consume(TokenKind::RightBrace, "expect '}' after block");
    }

    fn print_statement(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::Semicolon, "expect ';' after value");
        self.emit_op(OpCode::Print, heap);
    }

    fn return_statement(&mut self, heap: &mut Heap) {
        if self.functions[self.current_index()].kind == FunctionKind::Script {
            self.error("can't return from top-level code");
        }
        if self.match_token(TokenKind::Semicolon, heap) {
            self.emit_return(heap);
        } else {
            if self.functions[self.current_index()].kind == FunctionKind::Initializer {
                self.error("can't return a value from an initializer");
            }
            self.expression(heap);
            self.consume(TokenKind::Semicolon, "expect ';' after return value");
            self.emit_op(OpCode::Return, heap);
        }
    }

    fn if_statement(&mut self, heap: &mut Heap) {
        self.consume(TokenKind::LeftParen, "expect '(' after 'if'");
        self.expression(heap);
        self.consume(TokenKind::RightParen, "expect ')' after condition");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse, heap);
        self.emit_op(OpCode::Pop, heap);
        self.statement(heap);

        let else_jump = self.emit_jump(OpCode::Jump, heap);
        self.patch_jump(then_jump, heap);
        self.emit_op(OpCode::Pop, heap);

        if self.match_token(TokenKind::Else, heap) {
            self.statement(heap);
        }
        self.patch_jump(else_jump, heap);
    }

    fn while_statement(&mut self, heap: &mut Heap) {
        let loop_start = self.chunk_mut(heap).len();
        self.consume(TokenKind::LeftParen, "expect '(' after 'while'");
        self.expression(heap);
        self.consume(TokenKind::RightParen, "expect ')' after condition");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse, heap);
        self.emit_op(OpCode::Pop, heap);
        self.statement(heap);
        self.emit_loop(loop_start, heap);

        self.patch_jump(exit_jump, heap);
        self.emit_op(OpCode::Pop, heap);
    }

    fn for_statement(&mut self, heap: &mut Heap) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "expect '(' after 'for'");
        if self.match_token(TokenKind::Semicolon, heap) {
            // no initializer
        } else if self.match_token(TokenKind::Var, heap) {
            self.var_declaration(heap);
        } else {
            self.expression_statement(heap);
        }

        let mut loop_start = self.chunk_mut(heap).len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon, heap) {
            self.expression(heap);
            self.consume(TokenKind::Semicolon, "expect ';' after loop condition");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse, heap));
            self.emit_op(OpCode::Pop, heap);
        }

        if !self.match_token(TokenKind::RightParen, heap) {
            let body_jump = self.emit_jump(OpCode::Jump, heap);
            let increment_start = self.chunk_mut(heap).len();
            self.expression(heap);
            self.emit_op(OpCode::Pop, heap);
            self.consume(TokenKind::RightParen, "expect ')' after for clauses");

            self.emit_loop(loop_start, heap);
            loop_start = increment_start;
            self.patch_jump(body_jump, heap);
        }

        self.statement(heap);
        self.emit_loop(loop_start, heap);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit, heap);
            self.emit_op(OpCode::Pop, heap);
        }
        self.end_scope(heap);
    }

    fn expression_statement(&mut self, heap: &mut Heap) {
        self.expression(heap);
        self.consume(TokenKind::Semicolon, "expect ';' after expression");
        self.emit_op(OpCode::Pop, heap);
    }

    // --- Expressions -------------------------------------------------------

    fn expression(&mut self, heap: &mut Heap) {
        self.parse_precedence(Precedence::Assignment, heap);
    }

    fn parse_precedence(&mut self, precedence: Precedence, heap: &mut Heap) {
        self.advance();
        let prefix_rule = match get_rule::<'src>(self.previous.kind).prefix {
            Some(rule) => rule,
            None => {
                self.error("expect expression");
                return;
            }
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix_rule(self, heap, can_assign);

        while precedence <= get_rule::<'src>(self.current.kind).precedence {
            self.advance();
            let infix_rule = get_rule::<'src>(self.previous.kind).infix.unwrap();
            infix_rule(self, heap, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal, heap) {
            self.error("invalid assignment target");
        }
    }

    fn number(&mut self, heap: &mut Heap, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().unwrap_or(0.0);
        self.emit_constant(Value::Number(value), heap);
    }

    fn string(&mut self, heap: &mut Heap, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let content = &lexeme[1..lexeme.len() - 1];
        let handle = heap.intern(content);
        self.emit_constant(Value::Obj(handle), heap);
    }

    fn literal(&mut self, heap: &mut Heap, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False, heap),
            TokenKind::Nil => self.emit_op(OpCode::Nil, heap),
            TokenKind::True => self.emit_op(OpCode::True, heap),
            _ => unreachable!(),
        }
    }

    fn grouping(&mut self, heap: &mut Heap, _can_assign: bool) {
        self.expression(heap);
        self.consume(TokenKind::RightParen, "expect ')' after expression");
    }

    fn unary(&mut self, heap: &mut Heap, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary, heap);
        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not, heap),
            TokenKind::Minus => self.emit_op(OpCode::Negate, heap),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self, heap: &mut Heap, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = get_rule::<'src>(operator);
        self.parse_precedence(rule.precedence.next(), heap);
        match operator {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal, heap);
                self.emit_op(OpCode::Not, heap);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal, heap),
            TokenKind::Greater => self.emit_op(OpCode::Greater, heap),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less, heap);
                self.emit_op(OpCode::Not, heap);
            }
            TokenKind::Less => self.emit_op(OpCode::Less, heap),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater, heap);
                self.emit_op(OpCode::Not, heap);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add, heap),
            TokenKind::Minus => self.emit_op(OpCode::Subtract, heap),
            TokenKind::Star => self.emit_op(OpCode::Multiply, heap),
            TokenKind::Slash => self.emit_op(OpCode::Divide, heap),
            _ => unreachable!(),
        }
    }

    fn and_(&mut self, heap: &mut Heap, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse, heap);
        self.emit_op(OpCode::Pop, heap);
        self.parse_precedence(Precedence::And, heap);
        self.patch_jump(end_jump, heap);
    }

    fn or_(&mut self, heap: &mut Heap, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse, heap);
        let end_jump = self.emit_jump(OpCode::Jump, heap);
        self.patch_jump(else_jump, heap);
        self.emit_op(OpCode::Pop, heap);
        self.parse_precedence(Precedence::Or, heap);
        self.patch_jump(end_jump, heap);
    }

    fn call(&mut self, heap: &mut Heap, _can_assign: bool) {
        let argc = self.argument_list(heap);
        self.emit_ops(OpCode::Call, argc, heap);
    }

    fn dot(&mut self, heap: &mut Heap, can_assign: bool) {
        self.consume(TokenKind::Identifier, "expect property name after '.'");
        let name = self.previous.lexeme;
        let name_constant = self.identifier_constant(name, heap);

        if can_assign && self.match_token(TokenKind::Equal, heap) {
            self.expression(heap);
            self.emit_ops(OpCode::SetProperty, name_constant, heap);
        } else if self.match_token(TokenKind::LeftParen, heap) {
            let argc = self.argument_list(heap);
            self.emit_ops(OpCode::Invoke, name_constant, heap);
            self.emit_byte(argc, heap);
        } else {
            self.emit_ops(OpCode::GetProperty, name_constant, heap);
        }
    }

    fn argument_list(&mut self, heap: &mut Heap) -> u8 {
        let mut argc: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression(heap);
                if argc == 255 {
                    self.error("can't have more than 255 arguments");
                }
                argc += 1;
                if !self.match_token(TokenKind::Comma, heap) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expect ')' after arguments");
        argc as u8
    }

    fn variable(&mut self, heap: &mut Heap, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, heap, can_assign);
    }

    fn named_variable(&mut self, name: &str, heap: &mut Heap, can_assign: bool) {
        let idx = self.current_index();
        let (get_op, set_op, arg): (OpCode, OpCode, u8) = if let Some(slot) = self.resolve_local(idx, name) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(idx, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let constant = self.identifier_constant(name, heap);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.match_token(TokenKind::Equal, heap) {
            self.expression(heap);
            self.emit_ops(set_op, arg, heap);
        } else {
            self.emit_ops(get_op, arg, heap);
        }
    }

    fn this_(&mut self, heap: &mut Heap, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("can't use 'this' outside of a class");
            return;
        }
        self.variable(heap, false);
    }

    fn super_(&mut self, heap: &mut Heap, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("can't use 'super' outside of a class");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("can't use 'super' in a class with no superclass");
        }

        self.consume(TokenKind::Dot, "expect '.' after 'super'");
        self.consume(TokenKind::Identifier, "expect superclass method name");
        let name = self.previous.lexeme;
        let name_constant = self.identifier_constant(name, heap);

        self.named_variable("this", heap, false);
        if self.match_token(TokenKind::LeftParen, heap) {
            let argc = self.argument_list(heap);
            self.named_variable("super", heap, false);
            self.emit_ops(OpCode::SuperInvoke, name_constant, heap);
            self.emit_byte(argc, heap);
        } else {
            self.named_variable("super", heap, false);
            self.emit_ops(OpCode::GetSuper, name_constant, heap);
        }
    }
}

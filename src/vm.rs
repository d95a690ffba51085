// File: src/vm.rs
//
// Stack-based virtual machine for compiled Tok bytecode. One `CallFrame`
// per active closure invocation; the operand stack is shared by every
// frame, with each frame's locals living at a `slot_base` offset into it
// (clox's calling convention: slot 0 of a frame is the callee itself, or
// `this` for a method).

use crate::chunk::OpCode;
use crate::compiler::compile;
use crate::errors::{SourceLocation, TokError};
use crate::gc::Heap;
use crate::native;
use crate::object::{
    NativeFn, ObjBoundMethod, ObjClass, ObjClosure, ObjData, ObjHandle, ObjInstance, ObjNative, ObjUpvalue,
};
use crate::table::Table;
use crate::value::Value;
use std::sync::{Arc, Mutex};

const FRAMES_MAX: usize = 64;

struct CallFrame {
    closure: ObjHandle,
    ip: usize,
    slot_base: usize,
}

/// Either a compile-time failure (one diagnostic per parse error found)
/// or a single runtime failure with its call-frame trace attached.
#[derive(Debug)]
pub enum VmError {
    Compile(Vec<TokError>),
    Runtime(TokError),
}

pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table<Value>,
    /// Open upvalues, sorted by descending stack slot; at most one per
    /// live slot (spec's closure invariant).
    open_upvalues: Vec<ObjHandle>,
    trace: bool,
    /// Sink for `print` output; `None` means stdout. Tests swap this in
    /// to capture output without touching the process's real stdout.
    output: Option<Arc<Mutex<Vec<u8>>>>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Self {
            heap: Heap::new(),
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            trace: std::env::var("TOK_TRACE_EXECUTION").is_ok(),
            output: None,
        };
        native::mark_start();
        vm.define_native("clock", native::clock);
        vm
    }

    /// Redirects `print` output into a shared buffer instead of stdout.
    /// Used by tests to assert on program output.
    pub fn set_output(&mut self, output: Arc<Mutex<Vec<u8>>>) {
        self.output = Some(output);
    }

    fn write_output(&self, line: &str) {
        if let Some(out) = &self.output {
            use std::io::Write;
            let mut buffer = out.lock().unwrap();
            let _ = writeln!(buffer, "{}", line);
        } else {
            println!("{}", line);
        }
    }

    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_handle = self.heap.intern(name);
        let native_handle = self.heap.alloc(ObjData::Native(ObjNative { name: name_handle, function }));
        let hash = self.heap.hash_of(name_handle);
        self.globals.set(name_handle, hash, Value::Obj(native_handle));
    }

    /// Compiles and runs one source string, sharing globals and the heap
    /// with any previous call (the REPL relies on this).
    pub fn interpret(&mut self, source: &str) -> Result<(), VmError> {
        let script = compile(source, &mut self.heap).map_err(VmError::Compile)?;
        let closure = self.heap.alloc(ObjData::Closure(ObjClosure { function: script, upvalues: Vec::new() }));
        self.push(Value::Obj(closure));
        self.frames.push(CallFrame { closure, ip: 0, slot_base: 0 });
        self.run().map_err(VmError::Runtime)
    }

    // --- Stack -----------------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // --- Allocation, routed through a GC checkpoint -----------------------

    fn alloc(&mut self, data: ObjData) -> ObjHandle {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(data)
    }

    fn intern(&mut self, s: &str) -> ObjHandle {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.intern(s)
    }

    fn collect_garbage(&mut self) {
        let mut object_roots: Vec<ObjHandle> = self.frames.iter().map(|f| f.closure).collect();
        object_roots.extend(self.open_upvalues.iter().copied());
        object_roots.extend(self.globals.iter().map(|(k, _)| k));
        let mut value_roots: Vec<Value> = self.stack.clone();
        value_roots.extend(self.globals.iter().map(|(_, v)| *v));
        self.heap.collect(&object_roots, &value_roots);
    }

    // --- Bytecode stream ---------------------------------------------------

    fn current_chunk_byte(&self, offset: usize) -> u8 {
        let closure = self.frames.last().unwrap().closure;
        let function = match self.heap.get(closure) {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        };
        match self.heap.get(function) {
            ObjData::Function(f) => f.chunk.code[offset],
            _ => unreachable!(),
        }
    }

    fn current_chunk_line(&self, offset: usize) -> u32 {
        let closure = self.frames.last().unwrap().closure;
        let function = match self.heap.get(closure) {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        };
        match self.heap.get(function) {
            ObjData::Function(f) => f.chunk.line_at(offset),
            _ => unreachable!(),
        }
    }

    fn current_constant(&self, idx: usize) -> Value {
        let closure = self.frames.last().unwrap().closure;
        let function = match self.heap.get(closure) {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        };
        match self.heap.get(function) {
            ObjData::Function(f) => f.chunk.constants[idx],
            _ => unreachable!(),
        }
    }

    fn read_byte(&mut self) -> u8 {
        let offset = self.frames.last().unwrap().ip;
        let byte = self.current_chunk_byte(offset);
        self.frames.last_mut().unwrap().ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte() as usize;
        self.current_constant(idx)
    }

    fn read_string_constant(&mut self) -> ObjHandle {
        match self.read_constant() {
            Value::Obj(h) => h,
            _ => unreachable!("name constants are always interned strings"),
        }
    }

    // --- Errors --------------------------------------------------------

    fn runtime_error(&self, message: impl Into<String>) -> TokError {
        let line = self
            .frames
            .last()
            .map(|f| self.current_chunk_line(f.ip.saturating_sub(1)))
            .unwrap_or(0);
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = match self.heap.get(frame.closure) {
                ObjData::Closure(c) => c.function,
                _ => unreachable!(),
            };
            let frame_line = self.current_chunk_line_of(function, frame.ip.saturating_sub(1));
            let label = match self.heap.get(function) {
                ObjData::Function(f) => match f.name {
                    Some(n) => format!("{}()", self.heap.as_string(n)),
                    None => "script".to_string(),
                },
                _ => unreachable!(),
            };
            trace.push(format!("[line {}] in {}", frame_line, label));
        }
        TokError::runtime(message, SourceLocation::new(line)).with_call_trace(trace)
    }

    fn current_chunk_line_of(&self, function: ObjHandle, offset: usize) -> u32 {
        match self.heap.get(function) {
            ObjData::Function(f) => f.chunk.line_at(offset),
            _ => unreachable!(),
        }
    }

    // --- Upvalues ----------------------------------------------------------

    fn upvalue_slot(&self, handle: ObjHandle) -> Option<usize> {
        match self.heap.get(handle) {
            ObjData::Upvalue(ObjUpvalue::Open(slot)) => Some(*slot),
            _ => None,
        }
    }

    fn capture_upvalue(&mut self, slot: usize) -> ObjHandle {
        let mut insert_at = self.open_upvalues.len();
        for (i, &h) in self.open_upvalues.iter().enumerate() {
            let s = self.upvalue_slot(h).expect("open upvalue must still be open");
            if s == slot {
                return h;
            }
            if s < slot {
                insert_at = i;
                break;
            }
        }
        let handle = self.alloc(ObjData::Upvalue(ObjUpvalue::Open(slot)));
        self.open_upvalues.insert(insert_at, handle);
        handle
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(&first) = self.open_upvalues.first() {
            let slot = match self.upvalue_slot(first) {
                Some(s) => s,
                None => break,
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot];
            if let ObjData::Upvalue(u) = self.heap.get_mut(first) {
                *u = ObjUpvalue::Closed(value);
            }
            self.open_upvalues.remove(0);
        }
    }

    fn get_upvalue_value(&self, handle: ObjHandle) -> Value {
        match self.heap.get(handle) {
            ObjData::Upvalue(ObjUpvalue::Open(slot)) => self.stack[*slot],
            ObjData::Upvalue(ObjUpvalue::Closed(v)) => *v,
            _ => unreachable!(),
        }
    }

    fn set_upvalue_value(&mut self, handle: ObjHandle, value: Value) {
        let slot = match self.heap.get(handle) {
            ObjData::Upvalue(ObjUpvalue::Open(slot)) => Some(*slot),
            ObjData::Upvalue(ObjUpvalue::Closed(_)) => None,
            _ => unreachable!(),
        };
        match slot {
            Some(slot) => self.stack[slot] = value,
            None => {
                if let ObjData::Upvalue(u) = self.heap.get_mut(handle) {
                    *u = ObjUpvalue::Closed(value);
                }
            }
        }
    }

    // --- Calls ---------------------------------------------------------

    fn call(&mut self, closure_handle: ObjHandle, argc: u8) -> Result<(), TokError> {
        let function_handle = match self.heap.get(closure_handle) {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        };
        let arity = match self.heap.get(function_handle) {
            ObjData::Function(f) => f.arity,
            _ => unreachable!(),
        };
        if argc != arity {
            return Err(self.runtime_error(format!("expected {} arguments but got {}", arity, argc)));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("stack overflow"));
        }
        let slot_base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame { closure: closure_handle, ip: 0, slot_base });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), TokError> {
        let handle = match callee {
            Value::Obj(h) => h,
            _ => return Err(self.runtime_error("can only call functions and classes")),
        };

        enum Callable {
            Closure,
            Native(NativeFn),
            Class,
            Bound(Value, ObjHandle),
        }

        let callable = match self.heap.get(handle) {
            ObjData::Closure(_) => Callable::Closure,
            ObjData::Native(n) => Callable::Native(n.function),
            ObjData::Class(_) => Callable::Class,
            ObjData::BoundMethod(b) => Callable::Bound(b.receiver, b.method),
            _ => return Err(self.runtime_error("can only call functions and classes")),
        };

        match callable {
            Callable::Closure => self.call(handle, argc),
            Callable::Native(f) => {
                let start = self.stack.len() - argc as usize;
                match f(&self.stack[start..]) {
                    Ok(value) => {
                        self.stack.truncate(start - 1);
                        self.push(value);
                        Ok(())
                    }
                    Err(message) => Err(self.runtime_error(message)),
                }
            }
            Callable::Class => {
                let instance = self.alloc(ObjData::Instance(ObjInstance::new(handle)));
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = Value::Obj(instance);
                let init_name = self.heap.init_string;
                let hash = self.heap.hash_of(init_name);
                let initializer = match self.heap.get(handle) {
                    ObjData::Class(c) => c.methods.get(init_name, hash).copied(),
                    _ => unreachable!(),
                };
                match initializer {
                    Some(Value::Obj(init_closure)) => self.call(init_closure, argc),
                    _ if argc != 0 => Err(self.runtime_error(format!("expected 0 arguments but got {}", argc))),
                    _ => Ok(()),
                }
            }
            Callable::Bound(receiver, method) => {
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = receiver;
                self.call(method, argc)
            }
        }
    }

    fn invoke(&mut self, name: ObjHandle, argc: u8) -> Result<(), TokError> {
        let receiver = self.peek(argc as usize);
        let instance_handle = match receiver {
            Value::Obj(h) if matches!(self.heap.get(h), ObjData::Instance(_)) => h,
            _ => return Err(self.runtime_error("only instances have methods")),
        };
        let hash = self.heap.hash_of(name);
        let field = match self.heap.get(instance_handle) {
            ObjData::Instance(i) => i.fields.get(name, hash).copied(),
            _ => unreachable!(),
        };
        if let Some(value) = field {
            let slot = self.stack.len() - argc as usize - 1;
            self.stack[slot] = value;
            return self.call_value(value, argc);
        }
        let class_handle = match self.heap.get(instance_handle) {
            ObjData::Instance(i) => i.class,
            _ => unreachable!(),
        };
        self.invoke_from_class(class_handle, name, argc)
    }

    fn invoke_from_class(&mut self, class_handle: ObjHandle, name: ObjHandle, argc: u8) -> Result<(), TokError> {
        let hash = self.heap.hash_of(name);
        let method = match self.heap.get(class_handle) {
            ObjData::Class(c) => c.methods.get(name, hash).copied(),
            _ => unreachable!(),
        };
        match method {
            Some(Value::Obj(closure_handle)) => self.call(closure_handle, argc),
            _ => Err(self.runtime_error(format!("undefined property '{}'", self.heap.as_string(name)))),
        }
    }

    fn bind_method(&mut self, class_handle: ObjHandle, name: ObjHandle) -> Result<(), TokError> {
        let hash = self.heap.hash_of(name);
        let method = match self.heap.get(class_handle) {
            ObjData::Class(c) => c.methods.get(name, hash).copied(),
            _ => unreachable!(),
        };
        let method_handle = match method {
            Some(Value::Obj(h)) => h,
            _ => return Err(self.runtime_error(format!("undefined property '{}'", self.heap.as_string(name)))),
        };
        let receiver = self.peek(0);
        let bound = self.alloc(ObjData::BoundMethod(ObjBoundMethod { receiver, method: method_handle }));
        self.pop();
        self.push(Value::Obj(bound));
        Ok(())
    }

    // --- Dispatch loop ---------------------------------------------------

    fn run(&mut self) -> Result<(), TokError> {
        loop {
            if self.trace {
                self.trace_instruction();
            }
            let byte = self.read_byte();
            let op = OpCode::from_byte(byte).expect("invalid opcode in compiled chunk");

            match op {
                OpCode::Constant => {
                    let v = self.read_constant();
                    self.push(v);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.hash_of(name);
                    match self.globals.get(name, hash).copied() {
                        Some(v) => self.push(v),
                        None => {
                            return Err(
                                self.runtime_error(format!("undefined variable '{}'", self.heap.as_string(name)))
                            )
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.hash_of(name);
                    let value = self.pop();
                    self.globals.set(name, hash, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_string_constant();
                    let hash = self.heap.hash_of(name);
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        self.globals.delete(name, hash);
                        return Err(
                            self.runtime_error(format!("undefined variable '{}'", self.heap.as_string(name)))
                        );
                    }
                }
                OpCode::GetUpvalue => {
                    let idx = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let uv = match self.heap.get(closure) {
                        ObjData::Closure(c) => c.upvalues[idx],
                        _ => unreachable!(),
                    };
                    let v = self.get_upvalue_value(uv);
                    self.push(v);
                }
                OpCode::SetUpvalue => {
                    let idx = self.read_byte() as usize;
                    let value = self.peek(0);
                    let closure = self.frames.last().unwrap().closure;
                    let uv = match self.heap.get(closure) {
                        ObjData::Closure(c) => c.upvalues[idx],
                        _ => unreachable!(),
                    };
                    self.set_upvalue_value(uv, value);
                }
                OpCode::GetProperty => {
                    let instance_handle = match self.peek(0) {
                        Value::Obj(h) if matches!(self.heap.get(h), ObjData::Instance(_)) => h,
                        _ => return Err(self.runtime_error("only instances have properties")),
                    };
                    let name = self.read_string_constant();
                    let hash = self.heap.hash_of(name);
                    let field = match self.heap.get(instance_handle) {
                        ObjData::Instance(i) => i.fields.get(name, hash).copied(),
                        _ => unreachable!(),
                    };
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        let class_handle = match self.heap.get(instance_handle) {
                            ObjData::Instance(i) => i.class,
                            _ => unreachable!(),
                        };
                        self.bind_method(class_handle, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let instance_handle = match self.peek(1) {
                        Value::Obj(h) if matches!(self.heap.get(h), ObjData::Instance(_)) => h,
                        _ => return Err(self.runtime_error("only instances have fields")),
                    };
                    let name = self.read_string_constant();
                    let hash = self.heap.hash_of(name);
                    let value = self.peek(0);
                    match self.heap.get_mut(instance_handle) {
                        ObjData::Instance(i) => {
                            i.fields.set(name, hash, value);
                        }
                        _ => unreachable!(),
                    }
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string_constant();
                    let superclass = self.pop().as_obj().expect("super must resolve to a class");
                    self.bind_method(superclass, name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(Value::values_equal(a, b)));
                }
                OpCode::Greater => self.numeric_binary(|x, y| Value::Bool(x > y))?,
                OpCode::Less => self.numeric_binary(|x, y| Value::Bool(x < y))?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.numeric_binary(|x, y| Value::Number(x - y))?,
                OpCode::Multiply => self.numeric_binary(|x, y| Value::Number(x * y))?,
                OpCode::Divide => self.numeric_binary(|x, y| Value::Number(x / y))?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Negate => {
                    let v = self.peek(0);
                    match v.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => return Err(self.runtime_error("operand must be a number")),
                    }
                }
                OpCode::Print => {
                    let v = self.pop();
                    self.write_output(&v.print(&self.heap));
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string_constant();
                    let argc = self.read_byte();
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string_constant();
                    let argc = self.read_byte();
                    let superclass = self.pop().as_obj().expect("super must resolve to a class");
                    self.invoke_from_class(superclass, name, argc)?;
                }
                OpCode::Closure => {
                    let function_handle = self.read_constant().as_obj().expect("closure operand must be a function");
                    let upvalue_count = match self.heap.get(function_handle) {
                        ObjData::Function(f) => f.upvalue_count,
                        _ => unreachable!(),
                    };
                    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte();
                        if is_local {
                            let slot = self.frames.last().unwrap().slot_base + index as usize;
                            upvalues.push(self.capture_upvalue(slot));
                        } else {
                            let enclosing = self.frames.last().unwrap().closure;
                            let enclosing_upvalue = match self.heap.get(enclosing) {
                                ObjData::Closure(c) => c.upvalues[index as usize],
                                _ => unreachable!(),
                            };
                            upvalues.push(enclosing_upvalue);
                        }
                    }
                    let closure_handle = self.alloc(ObjData::Closure(ObjClosure { function: function_handle, upvalues }));
                    self.push(Value::Obj(closure_handle));
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.slot_base);
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slot_base);
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string_constant();
                    let class = self.alloc(ObjData::Class(ObjClass::new(name)));
                    self.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let superclass_handle = match self.peek(1) {
                        Value::Obj(h) if matches!(self.heap.get(h), ObjData::Class(_)) => h,
                        _ => return Err(self.runtime_error("superclass must be a class")),
                    };
                    let subclass_handle = self.peek(0).as_obj().expect("class value must be an object");
                    let super_methods = match self.heap.get(superclass_handle) {
                        ObjData::Class(c) => c.methods.clone(),
                        _ => unreachable!(),
                    };
                    match self.heap.get_mut(subclass_handle) {
                        ObjData::Class(c) => c.methods.copy_from(&super_methods),
                        _ => unreachable!(),
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string_constant();
                    let hash = self.heap.hash_of(name);
                    let method = self.pop();
                    let class_handle = self.peek(0).as_obj().expect("class value must be an object");
                    match self.heap.get_mut(class_handle) {
                        ObjData::Class(c) => {
                            c.methods.set(name, hash, method);
                        }
                        _ => unreachable!(),
                    }
                }
            }
        }
    }

    fn numeric_binary(&mut self, f: impl Fn(f64, f64) -> Value) -> Result<(), TokError> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                self.push(f(x, y));
                Ok(())
            }
            _ => Err(self.runtime_error("operands must be numbers")),
        }
    }

    fn add(&mut self) -> Result<(), TokError> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(x + y));
                Ok(())
            }
            (Value::Obj(ha), Value::Obj(hb))
                if matches!(self.heap.get(ha), ObjData::String(_)) && matches!(self.heap.get(hb), ObjData::String(_)) =>
            {
                let mut concatenated = String::with_capacity(self.heap.as_string(ha).len() + self.heap.as_string(hb).len());
                concatenated.push_str(self.heap.as_string(ha));
                concatenated.push_str(self.heap.as_string(hb));
                self.pop();
                self.pop();
                let handle = self.intern(&concatenated);
                self.push(Value::Obj(handle));
                Ok(())
            }
            _ => Err(self.runtime_error("operands must be two numbers or two strings")),
        }
    }

    fn trace_instruction(&self) {
        let mut stack_line = String::from("          ");
        for v in &self.stack {
            stack_line.push_str(&format!("[ {} ]", v.print(&self.heap)));
        }
        eprintln!("{}", stack_line);

        let frame = self.frames.last().unwrap();
        let closure = frame.closure;
        let function = match self.heap.get(closure) {
            ObjData::Closure(c) => c.function,
            _ => unreachable!(),
        };
        let mut out = String::new();
        match self.heap.get(function) {
            ObjData::Function(f) => {
                f.chunk.disassemble_instruction(&mut out, frame.ip);
            }
            _ => unreachable!(),
        }
        eprint!("{}", out);
    }
}

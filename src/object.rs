// File: src/object.rs
//
// Heap-allocated object variants for the Tok VM: strings, functions,
// closures, upvalues, classes, instances, bound methods, and natives.
// Every variant lives in the heap's object arena and is referenced by
// handle (see gc.rs), never by raw pointer.

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

/// Index into `Heap::objects`. Identity of a `Value::Obj` is identity of
/// this handle; for strings, interning makes handle identity equivalent
/// to content equality.
pub type ObjHandle = u32;

/// A native function's calling convention: argument count plus a pointer
/// to the first argument, returning a `Value` or an error message.
pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

#[derive(Debug)]
pub enum ObjData {
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    Native(ObjNative),
}

impl ObjData {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjData::String(_) => "string",
            ObjData::Function(_) => "function",
            ObjData::Closure(_) => "closure",
            ObjData::Upvalue(_) => "upvalue",
            ObjData::Class(_) => "class",
            ObjData::Instance(_) => "instance",
            ObjData::BoundMethod(_) => "bound method",
            ObjData::Native(_) => "native function",
        }
    }
}

/// Immutable byte sequence with a cached FNV-1a hash, globally interned:
/// two strings with equal bytes are the same `ObjHandle`.
#[derive(Debug, Clone)]
pub struct ObjString {
    pub chars: Box<str>,
    pub hash: u32,
}

impl ObjString {
    pub fn new(chars: &str) -> Self {
        Self { chars: chars.into(), hash: fnv1a(chars) }
    }
}

/// FNV-1a over the raw bytes of a string, per the 32-bit variant the
/// spec's data model calls out for interned strings.
pub fn fnv1a(s: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in s.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// A function kind, recorded so the compiler can special-case `this` and
/// `init` when emitting bytecode for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug)]
pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    /// Interned name string, `None` for the top-level script.
    pub name: Option<ObjHandle>,
}

impl ObjFunction {
    pub fn new() -> Self {
        Self { arity: 0, upvalue_count: 0, chunk: Chunk::new(), name: None }
    }
}

/// Descriptor consumed by the VM's `CLOSURE` instruction: whether the
/// captured variable is a local slot of the immediately enclosing
/// function or one of its own upvalues.
#[derive(Debug, Clone, Copy)]
pub struct UpvalueDesc {
    pub is_local: bool,
    pub index: u8,
}

/// Every callable function value at runtime is a closure, even the
/// top-level script, so all call sites are uniform.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjHandle,
    pub upvalues: Vec<ObjHandle>,
}

/// Either open (pointing at a live VM stack slot) or closed (holding the
/// captured value by value, once that slot has left scope).
#[derive(Debug)]
pub enum ObjUpvalue {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjHandle,
    pub methods: Table<Value>,
}

impl ObjClass {
    pub fn new(name: ObjHandle) -> Self {
        Self { name, methods: Table::new() }
    }
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjHandle,
    pub fields: Table<Value>,
}

impl ObjInstance {
    pub fn new(class: ObjHandle) -> Self {
        Self { class, fields: Table::new() }
    }
}

/// Produced by property access when a method name is resolved on an
/// instance: pairs the receiver with the method's closure.
#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjHandle,
}

#[derive(Debug)]
pub struct ObjNative {
    pub name: ObjHandle,
    pub function: NativeFn,
}

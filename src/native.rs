// File: src/native.rs
//
// Built-in native functions. `clock` is the only one spec.md names; the
// VM installs it as a global bound to an `ObjNative` the way the teacher
// installs its own builtins as global `NativeFunction` values (see
// `ruff`'s `main.rs` registration of `interpreter::Interpreter::get_builtin_names`).

use crate::value::Value;
use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Marks "now" as the program-start reference point `clock()` measures
/// from. Called once by `Vm::new()`; later calls are no-ops.
pub fn mark_start() {
    START.get_or_init(Instant::now);
}

/// Seconds since program start, as an `f64`.
pub fn clock(_args: &[Value]) -> Result<Value, String> {
    let start = START.get_or_init(Instant::now);
    Ok(Value::Number(start.elapsed().as_secs_f64()))
}

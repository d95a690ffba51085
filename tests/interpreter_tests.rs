// Integration tests for the Tok compiler and VM.
//
// Each test compiles and runs a complete source string against a fresh
// `Vm`, capturing `print` output via `Vm::set_output` rather than the
// process's real stdout.

use std::sync::{Arc, Mutex};
use tok::vm::{Vm, VmError};

fn run(source: &str) -> Result<String, VmError> {
    let mut vm = Vm::new();
    let buffer = Arc::new(Mutex::new(Vec::new()));
    vm.set_output(buffer.clone());
    vm.interpret(source)?;
    let bytes = buffer.lock().unwrap().clone();
    Ok(String::from_utf8(bytes).unwrap())
}

fn expect_runtime_error(source: &str) -> String {
    match run(source) {
        Err(VmError::Runtime(err)) => err.to_string(),
        Err(VmError::Compile(errs)) => panic!("expected runtime error, got compile errors: {:?}", errs),
        Ok(out) => panic!("expected runtime error, program ran to completion with output: {}", out),
    }
}

fn expect_compile_error(source: &str) -> Vec<String> {
    match run(source) {
        Err(VmError::Compile(errs)) => errs.iter().map(|e| e.to_string()).collect(),
        Err(VmError::Runtime(err)) => panic!("expected compile error, got runtime error: {}", err),
        Ok(out) => panic!("expected compile error, program ran to completion with output: {}", out),
    }
}

#[test]
fn arithmetic_precedence_and_grouping() {
    let out = run("print 1 + 2 * 3 - (4 + 5) / 3;").unwrap();
    assert_eq!(out, "4\n");
}

#[test]
fn string_concatenation() {
    let out = run(r#"print "hello" + " " + "world";"#).unwrap();
    assert_eq!(out, "hello world\n");
}

#[test]
fn comparisons_and_equality() {
    let out = run(
        r#"
        print 1 < 2;
        print 2 <= 2;
        print 3 > 4;
        print "a" == "a";
        print nil == false;
        "#,
    )
    .unwrap();
    assert_eq!(out, "true\ntrue\nfalse\ntrue\nfalse\n");
}

#[test]
fn global_and_local_variables() {
    let out = run(
        r#"
        var a = 1;
        var b = 2;
        {
            var a = a + b;
            print a;
        }
        print a;
        "#,
    )
    .unwrap();
    assert_eq!(out, "3\n1\n");
}

#[test]
fn for_loop_accumulates() {
    let out = run(
        r#"
        var total = 0;
        for (var i = 0; i < 5; i = i + 1) {
            total = total + i;
        }
        print total;
        "#,
    )
    .unwrap();
    assert_eq!(out, "10\n");
}

#[test]
fn while_loop_and_logical_operators() {
    let out = run(
        r#"
        var i = 0;
        var seen_three = false;
        while (i < 5) {
            if (i == 3 and !seen_three) {
                seen_three = true;
                print "three";
            }
            i = i + 1;
        }
        print i == 5 or false;
        "#,
    )
    .unwrap();
    assert_eq!(out, "three\ntrue\n");
}

#[test]
fn functions_and_recursion() {
    let out = run(
        r#"
        fun fib(n) {
            if (n < 2) return n;
            return fib(n - 1) + fib(n - 2);
        }
        print fib(10);
        "#,
    )
    .unwrap();
    assert_eq!(out, "55\n");
}

#[test]
fn closures_capture_by_reference() {
    let out = run(
        r#"
        fun make_counter() {
            var count = 0;
            fun increment() {
                count = count + 1;
                return count;
            }
            return increment;
        }
        var counter = make_counter();
        print counter();
        print counter();
        print counter();
        "#,
    )
    .unwrap();
    assert_eq!(out, "1\n2\n3\n");
}

#[test]
fn classes_methods_and_fields() {
    let out = run(
        r#"
        class Counter {
            init(start) {
                this.value = start;
            }
            increment() {
                this.value = this.value + 1;
                return this.value;
            }
        }
        var c = Counter(10);
        print c.increment();
        print c.increment();
        print c.value;
        "#,
    )
    .unwrap();
    assert_eq!(out, "11\n12\n12\n");
}

#[test]
fn inheritance_and_super_calls() {
    let out = run(
        r#"
        class Animal {
            speak() {
                return "...";
            }
            describe() {
                return "an animal that says " + this.speak();
            }
        }
        class Dog < Animal {
            speak() {
                return "woof";
            }
            describe() {
                return super.describe() + "!";
            }
        }
        print Dog().describe();
        "#,
    )
    .unwrap();
    assert_eq!(out, "an animal that says woof!\n");
}

#[test]
fn native_clock_is_callable_and_numeric() {
    let out = run(
        r#"
        var t = clock();
        print t >= 0;
        "#,
    )
    .unwrap();
    assert_eq!(out, "true\n");
}

#[test]
fn repl_style_reuse_shares_globals_across_interpret_calls() {
    let mut vm = Vm::new();
    let buffer = Arc::new(Mutex::new(Vec::new()));
    vm.set_output(buffer.clone());
    vm.interpret("var x = 10;").unwrap();
    vm.interpret("x = x + 5;").unwrap();
    vm.interpret("print x;").unwrap();
    let out = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert_eq!(out, "15\n");
}

#[test]
fn error_adding_number_and_string() {
    let message = expect_runtime_error(r#"print 1 + "two";"#);
    assert!(message.contains("operands must be two numbers or two strings"), "{}", message);
}

#[test]
fn error_calling_a_non_callable_value() {
    let message = expect_runtime_error("var x = nil; x();");
    assert!(message.contains("can only call functions and classes"), "{}", message);
}

#[test]
fn error_undefined_property_access() {
    let message = expect_runtime_error(
        r#"
        class Box {}
        var b = Box();
        print b.missing;
        "#,
    );
    assert!(message.contains("undefined property"), "{}", message);
}

#[test]
fn error_inheriting_from_non_class_at_runtime() {
    let message = expect_runtime_error(
        r#"
        var NotAClass = 1;
        class Sub < NotAClass {}
        "#,
    );
    assert!(message.contains("superclass must be a class"), "{}", message);
}

#[test]
fn error_undefined_global_variable() {
    let message = expect_runtime_error("print undefined_name;");
    assert!(message.contains("undefined variable"), "{}", message);
}

#[test]
fn error_returning_a_value_from_an_initializer() {
    let errors = expect_compile_error(
        r#"
        class Thing {
            init() {
                return 1;
            }
        }
        "#,
    );
    assert!(errors.iter().any(|e| e.contains("init")), "{:?}", errors);
}

#[test]
fn error_top_level_return() {
    let errors = expect_compile_error("return 1;");
    assert!(errors.iter().any(|e| e.to_lowercase().contains("return")), "{:?}", errors);
}

#[test]
fn many_locals_in_one_scope_stay_within_limits() {
    let mut source = String::new();
    for i in 0..200 {
        source.push_str(&format!("var v{} = {};\n", i, i));
    }
    source.push_str("print v199;\n");
    let out = run(&source).unwrap();
    assert_eq!(out, "199\n");
}

#[test]
fn deeply_nested_call_chain_within_frame_limit() {
    let out = run(
        r#"
        fun countdown(n) {
            if (n == 0) return 0;
            return countdown(n - 1);
        }
        print countdown(60);
        "#,
    )
    .unwrap();
    assert_eq!(out, "0\n");
}

#[test]
fn stack_overflow_past_frame_limit_is_a_runtime_error() {
    let message = expect_runtime_error(
        r#"
        fun recurse(n) {
            return recurse(n + 1);
        }
        print recurse(0);
        "#,
    );
    assert!(message.to_lowercase().contains("stack overflow"), "{}", message);
}

// The VM's frame stack holds at most 64 call frames (the top-level script
// counts as the first one). `countdown(62)` pushes 63 more frames on top
// of it (countdown(62) down through countdown(0)), landing on exactly 64
// and succeeding; `countdown(63)` needs a 65th and overflows.
#[test]
fn call_depth_exactly_at_frame_limit_succeeds() {
    let out = run(
        r#"
        fun countdown(n) {
            if (n == 0) return 0;
            return countdown(n - 1);
        }
        print countdown(62);
        "#,
    )
    .unwrap();
    assert_eq!(out, "0\n");
}

#[test]
fn call_depth_one_past_frame_limit_overflows() {
    let message = expect_runtime_error(
        r#"
        fun countdown(n) {
            if (n == 0) return 0;
            return countdown(n - 1);
        }
        print countdown(63);
        "#,
    );
    assert!(message.to_lowercase().contains("stack overflow"), "{}", message);
}

#[test]
fn exactly_256_constants_in_one_chunk_compiles() {
    let mut source = String::new();
    for i in 0..256 {
        source.push_str(&format!("print {};\n", i));
    }
    let out = run(&source).unwrap();
    assert_eq!(out.lines().count(), 256);
    assert_eq!(out.lines().next().unwrap(), "0");
    assert_eq!(out.lines().last().unwrap(), "255");
}

#[test]
fn exactly_257_constants_in_one_chunk_is_compile_error() {
    let mut source = String::new();
    for i in 0..257 {
        source.push_str(&format!("print {};\n", i));
    }
    let errors = expect_compile_error(&source);
    assert!(errors.iter().any(|e| e.contains("too many constants")), "{:?}", errors);
}

#[test]
fn exactly_255_parameters_compiles_and_runs() {
    let params: Vec<String> = (0..255).map(|i| format!("p{}", i)).collect();
    let args: Vec<String> = (0..255).map(|i| i.to_string()).collect();
    let source = format!(
        "fun sum({params}) {{ return {sum}; }}\nprint sum({args});\n",
        params = params.join(", "),
        sum = params.join(" + "),
        args = args.join(", "),
    );
    let out = run(&source).unwrap();
    let expected: i64 = (0..255).sum();
    assert_eq!(out, format!("{}\n", expected));
}

#[test]
fn exactly_256_parameters_is_compile_error() {
    let params: Vec<String> = (0..256).map(|i| format!("p{}", i)).collect();
    let source = format!("fun sum({params}) {{ return 0; }}\n", params = params.join(", "));
    let errors = expect_compile_error(&source);
    assert!(errors.iter().any(|e| e.contains("can't have more than 255 parameters")), "{:?}", errors);
}

/// Builds an `if (true) { <nil-statements> }` body of exactly `body_bytes`
/// bytes of compiled bytecode (each `nil;` is 2 bytes: OP_NIL, OP_POP; one
/// optional leading `!nil;` is 3 bytes: OP_NIL, OP_NOT, OP_POP, used to
/// reach an odd byte count). The compiler's `JUMP_IF_FALSE` over that body
/// carries an offset of `body_bytes + 4` (one POP plus the three-byte
/// unconditional jump that follows the then-branch).
fn program_with_then_branch_of(body_bytes: usize) -> String {
    let (odd_adjust, nil_count) = if body_bytes % 2 == 0 {
        (false, body_bytes / 2)
    } else {
        (true, (body_bytes - 3) / 2)
    };
    let mut body = String::new();
    if odd_adjust {
        body.push_str("!nil;\n");
    }
    body.push_str(&"nil;\n".repeat(nil_count));
    format!("if (true) {{\n{}\n}}\nprint \"after\";\n", body)
}

#[test]
fn jump_offset_of_exactly_65535_bytes_compiles() {
    let source = program_with_then_branch_of(65531);
    let out = run(&source).unwrap();
    assert_eq!(out, "after\n");
}

#[test]
fn jump_offset_of_65536_bytes_is_compile_error() {
    let source = program_with_then_branch_of(65532);
    let errors = expect_compile_error(&source);
    assert!(errors.iter().any(|e| e.contains("too large to jump over")), "{:?}", errors);
}

#[test]
fn bound_method_stored_in_variable_then_called_later() {
    let out = run(
        r#"
        class Greeter {
            init(name) {
                this.name = name;
            }
            greet() {
                return "hi " + this.name;
            }
        }
        var g = Greeter("Ada");
        var m = g.greet;
        print m();
        "#,
    )
    .unwrap();
    assert_eq!(out, "hi Ada\n");
}

// Regression test for a bug where `bind_method` popped the receiver off
// the operand stack before allocating the `ObjBoundMethod`, leaving it
// unrooted for the duration of that allocation. Under GC stress mode every
// allocation collects, so a receiver freed between the pop and the alloc
// would leave `m` holding a dangling handle and panic on `m()`.
#[test]
fn bound_method_survives_collection_under_gc_stress() {
    std::env::set_var("TOK_GC_STRESS", "1");
    let result = run(
        r#"
        class Greeter {
            init(name) {
                this.name = name;
            }
            greet() {
                return "hi " + this.name;
            }
        }
        var m = Greeter("Ada").greet;
        print m();
        "#,
    );
    std::env::remove_var("TOK_GC_STRESS");
    let out = result.unwrap();
    assert_eq!(out, "hi Ada\n");
}

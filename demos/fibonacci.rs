// Runs a recursive Fibonacci program through the VM and times it with the
// `clock()` native, the same shape as the teacher's own JIT microbenchmark
// driver.

use tok::vm::Vm;

const PROGRAM: &str = r#"
fun fib(n) {
    if (n < 2) return n;
    return fib(n - 1) + fib(n - 2);
}

var start = clock();
print fib(24);
print clock() - start;
"#;

fn main() {
    let mut vm = Vm::new();
    if let Err(err) = vm.interpret(PROGRAM) {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}

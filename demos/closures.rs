// Demonstrates closures over shared upvalues and a small class hierarchy,
// driven directly through the library API rather than the REPL or a file
// argument to `ctok`.

use tok::vm::Vm;

const PROGRAM: &str = r#"
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

class Shape {
    area() {
        return 0;
    }
}

class Square < Shape {
    init(side) {
        this.side = side;
    }
    area() {
        return this.side * this.side;
    }
}

print "area =";
print Square(4).area();
"#;

fn main() {
    let mut vm = Vm::new();
    if let Err(err) = vm.interpret(PROGRAM) {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}

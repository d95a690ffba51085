// File: src/repl.rs
//
// Interactive REPL (Read-Eval-Print Loop) for Tok. Each complete chunk of
// input is compiled and run against a single persistent `Vm`, so globals
// and function/class definitions from earlier lines stay visible to later
// ones — declare at the top level with `print` to see results.

use crate::vm::{Vm, VmError};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        Ok(Repl { vm: Vm::new(), editor })
    }

    fn show_banner(&self) {
        println!("{}", "Tok REPL".bright_cyan().bold());
        println!(
            "  Use {}{} for commands, {}{} to exit.",
            ":".bright_blue(),
            "help".bright_yellow(),
            ":".bright_blue(),
            "quit".bright_yellow()
        );
        println!("  Unclosed braces continue onto the next line.");
        println!();
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();

        let mut buffer = String::new();

        loop {
            let prompt = if buffer.is_empty() {
                "tok> ".bright_green().to_string()
            } else {
                "...> ".bright_blue().to_string()
            };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());

                    if buffer.is_empty() && line.trim().starts_with(':') {
                        if self.handle_command(line.trim()) {
                            continue;
                        } else {
                            break;
                        }
                    }

                    buffer.push_str(&line);
                    buffer.push('\n');

                    if is_input_complete(&buffer) {
                        self.eval_input(&buffer);
                        buffer.clear();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C (Ctrl+C to interrupt, :quit to exit)".bright_yellow());
                    buffer.clear();
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "\nGoodbye!".bright_cyan());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {}", "Error:".bright_red(), err);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Returns true to continue the REPL, false to quit.
    fn handle_command(&mut self, cmd: &str) -> bool {
        match cmd {
            ":help" | ":h" => {
                self.show_help();
                true
            }
            ":quit" | ":q" | ":exit" => {
                println!("{}", "Goodbye!".bright_cyan());
                false
            }
            _ => {
                println!(
                    "{} Unknown command: {}. Type {}{} for available commands.",
                    "Error:".bright_red(),
                    cmd.bright_yellow(),
                    ":".bright_blue(),
                    "help".bright_yellow()
                );
                true
            }
        }
    }

    fn show_help(&self) {
        println!();
        println!("{}", "REPL Commands:".bright_cyan().bold());
        println!("  {}{} Display this help message", ":help".bright_yellow(), " or :h".dimmed());
        println!("  {}{} Exit the REPL", ":quit".bright_yellow(), " or :q".dimmed());
        println!();
        println!("{}", "Multi-line Input:".bright_cyan().bold());
        println!("  Leave braces unclosed to continue on the next line.");
        println!();
        println!("{}", "Example:".bright_cyan().bold());
        println!("  {}", "tok> var greeting = \"hi\";".dimmed());
        println!("  {}", "tok> print greeting;".dimmed());
        println!();
    }

    fn eval_input(&mut self, input: &str) {
        if input.trim().is_empty() {
            return;
        }

        match self.vm.interpret(input) {
            Ok(()) => {}
            Err(VmError::Compile(errors)) => {
                for error in &errors {
                    println!("{} {}", "Error:".bright_red().bold(), error.to_string().bright_red());
                }
            }
            Err(VmError::Runtime(error)) => {
                println!("{} {}", "Error:".bright_red().bold(), error.to_string().bright_red());
            }
        }
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new().expect("failed to create REPL")
    }
}

/// True once all braces/parens/brackets opened so far are balanced and
/// we're not sitting inside an open string or line comment.
fn is_input_complete(input: &str) -> bool {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return true;
    }

    let mut brace_count = 0;
    let mut bracket_count = 0;
    let mut paren_count = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut in_comment = false;
    let mut prev_slash = false;

    for ch in trimmed.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
            }
            continue;
        }

        if escape_next {
            escape_next = false;
            continue;
        }

        if prev_slash && ch == '/' && !in_string {
            in_comment = true;
            prev_slash = false;
            continue;
        }
        prev_slash = ch == '/' && !in_string;

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_count += 1,
            '}' if !in_string => brace_count -= 1,
            '[' if !in_string => bracket_count += 1,
            ']' if !in_string => bracket_count -= 1,
            '(' if !in_string => paren_count += 1,
            ')' if !in_string => paren_count -= 1,
            _ => {}
        }
    }

    !in_string && brace_count <= 0 && bracket_count <= 0 && paren_count <= 0
}

/// Entry point used by `main`: creates a REPL and runs it until exit.
pub fn run() {
    match Repl::new() {
        Ok(mut repl) => {
            if let Err(err) = repl.run() {
                eprintln!("REPL error: {}", err);
            }
        }
        Err(err) => eprintln!("failed to start REPL: {}", err),
    }
}

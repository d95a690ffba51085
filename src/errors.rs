// File: src/errors.rs
//
// Structured diagnostics for Tok: the three error kinds of spec.md §7
// (lexical, compile, runtime), each carrying a source location and
// printed in the teacher's colored, arrow-annotated style.

use colored::Colorize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
}

impl SourceLocation {
    pub fn new(line: u32) -> Self {
        Self { line }
    }

    pub fn unknown() -> Self {
        Self { line: 0 }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}", self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Compile,
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Lexical => write!(f, "Lexical Error"),
            ErrorKind::Compile => write!(f, "Compile Error"),
            ErrorKind::Runtime => write!(f, "Runtime Error"),
        }
    }
}

/// A diagnostic ready to print to stderr. Runtime errors additionally
/// carry the unwound call-frame trace ("[line L] in FN()" per frame,
/// outermost labelled `script`).
#[derive(Debug, Clone)]
pub struct TokError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: SourceLocation,
    pub call_trace: Vec<String>,
}

impl TokError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, location: SourceLocation) -> Self {
        Self { kind, message: message.into(), location, call_trace: Vec::new() }
    }

    pub fn lexical(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Lexical, message, location)
    }

    pub fn compile(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Compile, message, location)
    }

    pub fn runtime(message: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(ErrorKind::Runtime, message, location)
    }

    pub fn with_call_trace(mut self, frames: Vec<String>) -> Self {
        self.call_trace = frames;
        self
    }
}

impl fmt::Display for TokError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}: {}", format!("{}", self.kind).red().bold(), self.message.bold())?;
        writeln!(f, "{}", format!("  --> {}", self.location).bright_blue())?;
        for frame in &self.call_trace {
            writeln!(f, "{}", frame.bright_black())?;
        }
        Ok(())
    }
}

impl std::error::Error for TokError {}

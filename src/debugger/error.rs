use crate::compile::CompileError;
use crate::lang::parser::ParseError;
use crate::vm::RuntimeError;

/// A debuggee fault, surfaced to the client through stop events and
/// `exceptionInfo`. All three kinds carry 1-based source coordinates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl Fault {
    pub fn line(&self) -> u32 {
        match self {
            Fault::Parse(e) => e.line,
            Fault::Compile(e) => e.line,
            Fault::Runtime(e) => e.line,
        }
    }

    pub fn col(&self) -> u32 {
        match self {
            Fault::Parse(e) => e.col,
            Fault::Compile(e) => e.col,
            Fault::Runtime(e) => e.col,
        }
    }
}

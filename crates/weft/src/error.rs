//! Facade error type.
//!
//! The engine surfaces two failure kinds: compile errors, raised
//! synchronously when binding text is malformed, and evaluation errors
//! from one-shot reads and assignments. Watcher evaluation errors never
//! reach here; the watcher recovers and keeps its previous value.

use std::fmt;

use weft_core::EvalError;
use weft_expr::CompileError;

/// Error from an engine entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The expression text did not compile.
    Compile(CompileError),
    /// A one-shot evaluation or assignment failed.
    Eval(EvalError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Compile(err) => write!(f, "compile error: {err}"),
            EngineError::Eval(err) => write!(f, "evaluation error: {err}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<CompileError> for EngineError {
    fn from(err: CompileError) -> Self {
        EngineError::Compile(err)
    }
}

impl From<EvalError> for EngineError {
    fn from(err: EvalError) -> Self {
        EngineError::Eval(err)
    }
}

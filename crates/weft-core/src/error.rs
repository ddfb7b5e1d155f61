//! Runtime error types.
//!
//! Evaluation errors are recoverable by design: a watcher that hits one keeps
//! its previous value and dependency edges, reports the error, and stays
//! usable. Nothing here aborts the scheduler.

use std::fmt;
use std::rc::Rc;

/// Error raised while evaluating a compiled expression or invoking a
/// filter/native function.
///
/// # Failure Modes
///
/// - Watchers recover: `Watcher::evaluate` reports the error and retains the
///   previous value and edge set.
/// - One-shot evaluation (`Engine::eval` and friends) propagates it to the
///   caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Attempted to call a value that is not a function.
    NotCallable {
        /// Type name of the value that was called.
        found: &'static str,
    },
    /// Property access through a nullish (`null`/`undefined`) value.
    NilAccess {
        /// The key whose base was nullish.
        key: String,
    },
    /// Filter name not present in the registry at evaluation time.
    UnknownFilter { name: String },
    /// The grammar accepts the operator but the value domain cannot
    /// evaluate it (`instanceof`, `new`).
    Unsupported { op: &'static str },
    /// A registered filter, native function, or user task reported a failure.
    Native { message: String },
}

impl EvalError {
    /// Convenience constructor for native-function failures.
    pub fn native(message: impl Into<String>) -> Self {
        EvalError::Native {
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::NotCallable { found } => {
                write!(f, "value of type {found} is not callable")
            }
            EvalError::NilAccess { key } => {
                write!(f, "cannot read property '{key}' of a nullish value")
            }
            EvalError::UnknownFilter { name } => {
                write!(f, "unknown filter '{name}'")
            }
            EvalError::Unsupported { op } => {
                write!(f, "operator '{op}' is not supported by the value model")
            }
            EvalError::Native { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Diagnostic for a rejected circular update.
///
/// Built by the scheduler when an enqueue during a watcher flush targets an
/// ancestor in the current causation chain. The chain lists watcher labels
/// from the oldest ancestor down to the rejected re-entry.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Expression labels, oldest ancestor first, offending watcher last.
    pub chain: Vec<Rc<str>>,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watchers updating circularly: ")?;
        for (i, label) in self.chain.iter().enumerate() {
            if i > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{label}")?;
        }
        Ok(())
    }
}

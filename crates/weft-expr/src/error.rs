//! Compile-time error types.
//!
//! Unlike evaluation errors, these propagate: a caller handing us an
//! expression gets the verdict synchronously, before anything is cached.
//! Malformed input that can still be read best-effort does not error;
//! only structural problems do.

use std::fmt;

/// Error raised while compiling expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Bracket nesting does not balance: an opener without its closer, or a
    /// closer with no opener. The op-list form needs structurally complete
    /// input.
    UnbalancedBrackets {
        /// The bracket character that could not be matched.
        bracket: char,
    },
    /// A writer target must be a single property-access path, with nothing
    /// but member and index steps.
    InvalidWriteTarget {
        /// The offending expression text.
        expr: String,
    },
    /// A loop header matched none of the three accepted forms, or the range
    /// form's bound variable is not a single identifier.
    InvalidLoopSyntax {
        /// The offending header text.
        header: String,
    },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnbalancedBrackets { bracket } => {
                write!(f, "unbalanced bracket '{bracket}' in expression")
            }
            CompileError::InvalidWriteTarget { expr } => {
                write!(f, "\"{expr}\" is not an assignable property path")
            }
            CompileError::InvalidLoopSyntax { header } => {
                write!(f, "\"{header}\" is not a valid loop header")
            }
        }
    }
}

impl std::error::Error for CompileError {}

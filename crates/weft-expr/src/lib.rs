#![cfg_attr(not(test), forbid(unsafe_code))]
#![cfg_attr(test, deny(unsafe_code))]

//! Expression compiler: binding text in, shared programs out.
//!
//! # Role in Weft
//! `weft-expr` turns the expression dialect embedded in bindings into
//! compact op-list programs run by a small stack evaluator. Programs read
//! and write exclusively through [`weft_core::Scope`] and
//! [`weft_core::Value`], so every evaluation is dependency-tracked
//! without the expression layer knowing about watchers at all.
//!
//! # Primary responsibilities
//! - **Tokenizer**: one forgiving pass over source text; finds the filter
//!   suffix and resolves positional binding names.
//! - **Parser**: precedence climbing with a postfix-chain tracker, so
//!   assignments and `?.` guards lower to plain ops; bracket imbalance is
//!   the only hard error.
//! - **Compiler**: the cached entry points. Readers, writers, handlers,
//!   delimiter templates, condition chains, and loop headers, one shape
//!   per binding form the runtime watches.
//! - **Filters**: a shared name-to-function registry, applied by programs
//!   at evaluation time.
//!
//! # How it fits in the system
//! The facade crate (`weft`) wires compiled readers into watchers from
//! `weft-core` and dispatches handlers from its event surface.

pub mod error;

mod compiler;
mod filters;
mod ir;
mod loops;
mod parser;
mod template;
mod token;

pub use compiler::{Compiler, ConditionChain, Handler, Reader, Writer};
pub use error::CompileError;
pub use filters::{FilterFn, FilterRegistry};
pub use loops::{LoopHeader, LoopItem, LoopKind};
pub use template::Template;

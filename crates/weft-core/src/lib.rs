#![cfg_attr(not(test), forbid(unsafe_code))]
#![cfg_attr(test, deny(unsafe_code))]

//! Core: value model, reactive containers, watchers, and the update
//! scheduler.
//!
//! # Role in Weft
//! `weft-core` is the reactive engine. It owns the dynamically typed value
//! model, the tracked map/list containers every read and write flows
//! through, the watcher abstraction that couples an evaluator to a change
//! handler, and the scheduler that batches updates into ordered flush
//! cycles.
//!
//! # Primary responsibilities
//! - **Value**: loosely typed values with deliberate coercion rules
//!   (truthiness, numeric and display coercion, strict identity vs. loose
//!   equality).
//! - **ReactiveMap / ReactiveList**: the interception layer. There are no
//!   raw containers; access goes through handles that record dependency
//!   edges on tracked reads and notify on writes.
//! - **Watcher**: one registered expression. Evaluation replaces its edge
//!   set wholesale, so dependencies stay exact as control flow shifts.
//! - **Scheduler**: ascending-id batched flush with causation-based
//!   rejection of circular updates.
//! - **Builtins**: `Math`/`JSON`/coercion globals and native method
//!   dispatch on values.
//!
//! # How it fits in the system
//! The expression compiler (`weft-expr`) lowers template expressions into
//! programs whose evaluators read and write exclusively through [`Scope`]
//! and [`Value`], so tracking is automatic. The facade crate (`weft`)
//! couples compiled readers to watchers and exposes the engine surface.

pub mod builtins;
pub mod error;
pub mod reactive;
pub mod scheduler;
pub mod scope;
pub mod value;

pub use error::{CycleReport, EvalError};
pub use reactive::{
    observe_changes, unobserve_changes, wrap, ChangeHandler, ChangeToken, Evaluator, PropKey,
    ReactiveList, ReactiveMap, Watcher, WatcherFlags,
};
pub use scheduler::Scheduler;
pub use scope::Scope;
pub use value::{NativeFunc, Value};

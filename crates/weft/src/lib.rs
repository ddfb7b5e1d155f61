#![cfg_attr(not(test), forbid(unsafe_code))]
#![cfg_attr(test, deny(unsafe_code))]

//! Facade: the assembled reactive runtime.
//!
//! # Role in Weft
//! `weft` couples the two lower crates into one embeddable engine. It
//! owns a root scope backed by a tracked map, an expression compiler
//! with its filter registry, and the scheduler that batches every
//! change into ordered flush cycles.
//!
//! # Primary responsibilities
//! - **Engine**: root data (`set` / `get_value` / `assign`), one-shot
//!   evaluation (`eval`), and watcher registration (`watch`,
//!   `watch_once`, `watch_until`) with engine-owned lifetimes.
//! - **Flush control**: `push_task` defers work to the user phase;
//!   `settle` drains the queue; `refresh` force-reevaluates owned
//!   watchers.
//! - **Re-exports**: the value model, containers, scheduler, and
//!   compiler types an embedding host needs, so most hosts depend on
//!   this crate alone.
//!
//! # How it fits in the system
//! `weft-core` supplies values, tracked containers, watchers, and the
//! scheduler; `weft-expr` compiles expression text into cached
//! programs. This crate wires compiled readers into watchers over a
//! shared root scope and exposes the result as [`Engine`].

pub mod error;

mod engine;

pub use engine::{Engine, WatcherId};
pub use error::EngineError;

pub use weft_core::{
    observe_changes, unobserve_changes, wrap, ChangeHandler, ChangeToken, CycleReport, EvalError,
    Evaluator, NativeFunc, ReactiveList, ReactiveMap, Scheduler, Scope, Value, Watcher,
    WatcherFlags,
};
pub use weft_expr::{
    CompileError, Compiler, ConditionChain, FilterFn, FilterRegistry, Handler, LoopHeader,
    LoopItem, LoopKind, Reader, Template, Writer,
};

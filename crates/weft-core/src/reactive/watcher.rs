//! Couples one compiled evaluator to a scope and a change handler.
//!
//! A watcher evaluates synchronously at construction, so its cached value is
//! valid the moment `new` returns. Each successful re-evaluation replaces
//! the dependency edge set wholesale with exactly the keys that run touched;
//! a failed re-evaluation is reported, keeps the previous value and edges,
//! and rolls back any edges the failed run had already recorded.
//!
//! # Invariants
//!
//! 1. Watcher ids are minted by the scheduler and strictly increase;
//!    the flush drains pending watchers in ascending id order.
//! 2. After `destroy()`, no observer holds an edge to this watcher and
//!    pending scheduled updates are no-ops.
//! 3. The handler is never invoked through an active borrow: a handler may
//!    destroy its own watcher.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use tracing::warn;

use crate::error::EvalError;
use crate::reactive::observer::PropKey;
use crate::reactive::tracking::{self, Edge};
use crate::scheduler::Scheduler;
use crate::scope::Scope;
use crate::value::Value;

bitflags! {
    /// Behavioral modifiers fixed at construction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WatcherFlags: u8 {
        /// Keep updating while the watcher is deactivated.
        const RUN_WHILE_INACTIVE = 1 << 0;
        /// Fire the handler on a forced refresh even when the value is
        /// unchanged.
        const FORCE_ON_REFRESH = 1 << 1;
    }
}

/// A compiled, reusable read of a scope.
pub type Evaluator = Rc<dyn Fn(&Scope) -> Result<Value, EvalError>>;

/// Change callback, invoked with (new, old).
pub type ChangeHandler = Box<dyn FnMut(&Value, &Value)>;

/// One registered expression: evaluator, scope, cached value, edge set.
pub struct Watcher {
    id: u64,
    label: Rc<str>,
    scope: Scope,
    eval: Evaluator,
    handler: RefCell<ChangeHandler>,
    value: RefCell<Value>,
    edges: RefCell<Vec<Edge>>,
    flags: WatcherFlags,
    active: Cell<bool>,
    destroyed: Cell<bool>,
    scheduler: Scheduler,
}

impl Watcher {
    /// Creates the watcher and evaluates it synchronously; the cached value
    /// is valid on return. An initial evaluation error is reported and
    /// leaves the value `Undefined`.
    pub fn new(
        scope: Scope,
        eval: Evaluator,
        handler: ChangeHandler,
        flags: WatcherFlags,
        scheduler: &Scheduler,
        label: impl Into<Rc<str>>,
    ) -> Rc<Watcher> {
        let watcher = Rc::new(Watcher {
            id: scheduler.next_watcher_id(),
            label: label.into(),
            scope,
            eval,
            handler: RefCell::new(handler),
            value: RefCell::new(Value::Undefined),
            edges: RefCell::new(Vec::new()),
            flags,
            active: Cell::new(true),
            destroyed: Cell::new(false),
            scheduler: scheduler.clone(),
        });
        watcher.evaluate();
        watcher
    }

    #[must_use]
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn label_rc(&self) -> Rc<str> {
        self.label.clone()
    }

    /// The value from the most recent evaluation.
    #[must_use]
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Deactivated watchers are skipped by the flush unless they carry
    /// `RUN_WHILE_INACTIVE`.
    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub(crate) fn runs_while_inactive(&self) -> bool {
        self.flags.contains(WatcherFlags::RUN_WHILE_INACTIVE)
    }

    /// Current edge set as (observer id, key) pairs.
    #[must_use]
    pub fn edge_keys(&self) -> Vec<(u64, PropKey)> {
        self.edges
            .borrow()
            .iter()
            .map(|e| (e.observer.id(), e.key.clone()))
            .collect()
    }

    /// Re-runs the evaluator under edge tracking and returns the current
    /// value. On success the edge set is replaced wholesale; on failure the
    /// previous value and edges are kept and the failed run's new edges are
    /// rolled back.
    pub fn evaluate(self: &Rc<Self>) -> Value {
        if self.destroyed.get() {
            return self.value();
        }
        let (result, new_edges) =
            tracking::with_tracking(self, &self.scheduler, || (self.eval)(&self.scope));
        match result {
            Ok(value) => {
                self.replace_edges(new_edges);
                *self.value.borrow_mut() = value.clone();
                value
            }
            Err(err) => {
                warn!(
                    watcher = %self.label,
                    error = %err,
                    "evaluation failed; keeping previous value"
                );
                self.rollback_edges(new_edges);
                self.value()
            }
        }
    }

    /// Schedules a re-evaluation; idempotent within one flush cycle.
    pub fn update(self: &Rc<Self>) {
        self.scheduler.enqueue_watcher(self.clone());
    }

    /// Re-evaluates immediately and fires the handler when the value
    /// changed, or when `force` is set and the watcher carries
    /// `FORCE_ON_REFRESH`.
    pub fn update_now(self: &Rc<Self>, force: bool) {
        if self.destroyed.get() {
            return;
        }
        let old = self.value();
        let new = self.evaluate();
        let fire =
            !new.identical(&old) || (force && self.flags.contains(WatcherFlags::FORCE_ON_REFRESH));
        if fire {
            // Take the handler out of its cell so a handler that destroys
            // its own watcher does not hit an active borrow.
            let mut handler: ChangeHandler =
                std::mem::replace(&mut *self.handler.borrow_mut(), Box::new(|_, _| {}));
            handler(&new, &old);
            if !self.destroyed.get() {
                *self.handler.borrow_mut() = handler;
            }
        }
    }

    /// Removes every edge from its observer and deactivates permanently.
    /// Pending scheduled updates become no-ops.
    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        let edges = std::mem::take(&mut *self.edges.borrow_mut());
        for edge in &edges {
            edge.observer.remove_dependent(&edge.key, self.id);
        }
        // Drop the handler: it may close over scopes that point back here.
        *self.handler.borrow_mut() = Box::new(|_, _| {});
    }

    fn replace_edges(&self, new_edges: Vec<Edge>) {
        let stale: Vec<Edge> = {
            let old = self.edges.borrow();
            old.iter()
                .filter(|o| {
                    !new_edges
                        .iter()
                        .any(|n| n.observer.id() == o.observer.id() && n.key == o.key)
                })
                .cloned()
                .collect()
        };
        *self.edges.borrow_mut() = new_edges;
        for edge in stale {
            edge.observer.remove_dependent(&edge.key, self.id);
        }
    }

    /// Removes edges a failed run recorded that are not part of the kept
    /// set, so an aborted evaluation never leaves the graph half-updated.
    fn rollback_edges(&self, attempted: Vec<Edge>) {
        let unknown: Vec<Edge> = {
            let old = self.edges.borrow();
            attempted
                .into_iter()
                .filter(|e| {
                    !old.iter()
                        .any(|o| o.observer.id() == e.observer.id() && o.key == e.key)
                })
                .collect()
        };
        for edge in unknown {
            edge.observer.remove_dependent(&edge.key, self.id);
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("edges", &self.edges.borrow().len())
            .field("active", &self.active.get())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

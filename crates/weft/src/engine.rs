//! The engine: root data, compiler, scheduler, and owned watchers in one
//! handle.
//!
//! An `Engine` ties the pieces together the way an embedding host uses
//! them: a root scope backed by an eagerly-wrapped reactive map, one
//! expression compiler with its filter registry, and a scheduler that
//! batches every change. Watchers registered through the engine are owned
//! by it: `unwatch` releases one, `destroy` releases them all.
//!
//! # Invariants
//!
//! - Handlers never run inside `watch`/`set`/`assign`; they run during a
//!   flush (`settle`) or, for `immediate` registration, exactly once
//!   before the watcher exists.
//! - Owned-watcher iteration is collect-then-invoke, so a handler may
//!   unwatch anything, itself included, mid-flush.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use weft_core::{
    wrap, ChangeHandler, EvalError, ReactiveMap, Scheduler, Scope, Value, Watcher, WatcherFlags,
};
use weft_expr::Compiler;

use crate::error::EngineError;

/// Identifies a watcher owned by an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

type WatcherRegistry = Rc<RefCell<BTreeMap<WatcherId, Rc<Watcher>>>>;

/// The assembled runtime.
pub struct Engine {
    scheduler: Scheduler,
    scope: Scope,
    compiler: Compiler,
    watchers: WatcherRegistry,
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_scheduler(Scheduler::new())
    }

    /// Builds an engine on an existing scheduler, so several engines (or
    /// hand-built watchers) can share one flush queue.
    #[must_use]
    pub fn with_scheduler(scheduler: Scheduler) -> Self {
        let frame = ReactiveMap::new();
        // Attach the root observer now: changes arm the scheduler even
        // before the first watcher evaluates.
        wrap(&Value::Map(frame.clone()), &scheduler);
        Engine {
            scheduler,
            scope: Scope::with_frame(frame),
            compiler: Compiler::new(),
            watchers: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// The root scope every engine expression evaluates against.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Defines or replaces a root-frame value. Containers are wrapped so
    /// their changes notify immediately.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        let value = wrap(&value.into(), &self.scheduler);
        self.scope.frame().set(name, value);
    }

    /// Reads a root-frame value without touching the scope chain.
    #[must_use]
    pub fn get_value(&self, name: &str) -> Value {
        self.scope.frame().get(name)
    }

    /// One-shot read: compiles (or reuses) the expression and evaluates it
    /// against the root scope, outside any watcher.
    pub fn eval(&self, expr: &str) -> Result<Value, EngineError> {
        let reader = self.compiler.compile_reader(expr, &[])?;
        Ok(reader.evaluate(&self.scope)?)
    }

    /// Stores `value` through a writer target such as `user.name`.
    /// Returns what was written, filters applied.
    pub fn assign(&self, expr: &str, value: impl Into<Value>) -> Result<Value, EngineError> {
        let writer = self.compiler.compile_writer(expr)?;
        Ok(writer.assign(&self.scope, value.into())?)
    }

    /// Registers a named filter on the engine's compiler.
    pub fn register_filter(
        &self,
        name: impl Into<Rc<str>>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, EvalError> + 'static,
    ) {
        self.compiler.register_filter(name, f);
    }

    /// Watches an expression; `handler` receives `(new, old)` whenever the
    /// value changes across a flush.
    pub fn watch(
        &self,
        expr: &str,
        handler: impl FnMut(&Value, &Value) + 'static,
    ) -> Result<WatcherId, EngineError> {
        self.watch_with(expr, handler, WatcherFlags::empty(), false)
    }

    /// Watches with explicit flags. When `immediate` is set the handler is
    /// invoked once with the initial value at registration, old value
    /// `Undefined`.
    pub fn watch_with(
        &self,
        expr: &str,
        handler: impl FnMut(&Value, &Value) + 'static,
        flags: WatcherFlags,
        immediate: bool,
    ) -> Result<WatcherId, EngineError> {
        let reader = self.compiler.compile_reader(expr, &[])?;
        let mut handler = handler;
        if immediate {
            let initial = reader.evaluate(&self.scope).unwrap_or(Value::Undefined);
            handler(&initial, &Value::Undefined);
        }
        let watcher = Watcher::new(
            self.scope.clone(),
            reader.evaluator(),
            Box::new(handler),
            flags,
            &self.scheduler,
            expr,
        );
        Ok(self.adopt(watcher))
    }

    /// Watches until the first change fires the handler, then unwatches.
    pub fn watch_once(
        &self,
        expr: &str,
        handler: impl FnMut(&Value, &Value) + 'static,
    ) -> Result<WatcherId, EngineError> {
        let reader = self.compiler.compile_reader(expr, &[])?;
        let mut handler = handler;
        let slot: Rc<RefCell<Option<Rc<Watcher>>>> = Rc::new(RefCell::new(None));
        let registry = Rc::clone(&self.watchers);
        let hslot = Rc::clone(&slot);
        let wrapped: ChangeHandler = Box::new(move |new, old| {
            handler(new, old);
            if let Some(watcher) = hslot.borrow_mut().take() {
                watcher.destroy();
                registry.borrow_mut().remove(&WatcherId(watcher.id()));
            }
        });
        let watcher = Watcher::new(
            self.scope.clone(),
            reader.evaluator(),
            wrapped,
            WatcherFlags::empty(),
            &self.scheduler,
            expr,
        );
        *slot.borrow_mut() = Some(Rc::clone(&watcher));
        Ok(self.adopt(watcher))
    }

    /// Watches until the value turns truthy, fires the handler once, and
    /// unwatches. Returns `None` when the value is already truthy; the
    /// handler has then run synchronously and nothing was registered.
    pub fn watch_until(
        &self,
        expr: &str,
        handler: impl FnMut(&Value) + 'static,
    ) -> Result<Option<WatcherId>, EngineError> {
        let reader = self.compiler.compile_reader(expr, &[])?;
        let mut handler = handler;
        let initial = reader.evaluate(&self.scope).unwrap_or(Value::Undefined);
        if initial.is_truthy() {
            handler(&initial);
            return Ok(None);
        }
        let slot: Rc<RefCell<Option<Rc<Watcher>>>> = Rc::new(RefCell::new(None));
        let registry = Rc::clone(&self.watchers);
        let hslot = Rc::clone(&slot);
        let wrapped: ChangeHandler = Box::new(move |new, _old| {
            if !new.is_truthy() {
                return;
            }
            handler(new);
            if let Some(watcher) = hslot.borrow_mut().take() {
                watcher.destroy();
                registry.borrow_mut().remove(&WatcherId(watcher.id()));
            }
        });
        let watcher = Watcher::new(
            self.scope.clone(),
            reader.evaluator(),
            wrapped,
            WatcherFlags::empty(),
            &self.scheduler,
            expr,
        );
        *slot.borrow_mut() = Some(Rc::clone(&watcher));
        Ok(Some(self.adopt(watcher)))
    }

    /// Releases one owned watcher. Returns whether the id was known.
    pub fn unwatch(&self, id: WatcherId) -> bool {
        let removed = self.watchers.borrow_mut().remove(&id);
        match removed {
            Some(watcher) => {
                watcher.destroy();
                true
            }
            None => false,
        }
    }

    /// Defers a fallible task to the user phase of the next flush.
    pub fn push_task(&self, task: impl FnOnce() -> Result<(), EvalError> + 'static) {
        self.scheduler.push_user_task(task);
    }

    /// Drains every pending update now.
    pub fn settle(&self) {
        self.scheduler.flush();
    }

    /// Forces a re-evaluation of every owned watcher. Handlers fire on
    /// change as usual; watchers carrying
    /// [`WatcherFlags::FORCE_ON_REFRESH`] fire regardless.
    pub fn refresh(&self) {
        let snapshot: Vec<Rc<Watcher>> = self.watchers.borrow().values().cloned().collect();
        debug!(count = snapshot.len(), "refreshing watchers");
        for watcher in snapshot {
            watcher.update_now(true);
        }
        self.watchers
            .borrow_mut()
            .retain(|_, watcher| !watcher.is_destroyed());
    }

    /// Destroys every owned watcher. The engine stays usable; data and
    /// compiled programs survive.
    pub fn destroy(&self) {
        let drained: Vec<Rc<Watcher>> = {
            let mut registry = self.watchers.borrow_mut();
            std::mem::take(&mut *registry).into_values().collect()
        };
        debug!(count = drained.len(), "destroying watchers");
        for watcher in drained {
            watcher.destroy();
        }
    }

    /// Number of live owned watchers.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.borrow().len()
    }

    fn adopt(&self, watcher: Rc<Watcher>) -> WatcherId {
        let id = WatcherId(watcher.id());
        self.watchers.borrow_mut().insert(id, watcher);
        id
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

//! Chained binding environments.
//!
//! A scope is a reactive frame plus an optional parent consulted when a
//! name is not defined locally, plus a designated write scope. Reads resolve
//! outward through the chain; bare assignments land on the write frame;
//! loop variables shadow by defining locally.
//!
//! Unresolved reads are recorded against the write frame, so defining the
//! name there later re-triggers every watcher that read it while missing.

use std::fmt;
use std::rc::Rc;

use crate::reactive::ReactiveMap;
use crate::value::Value;

struct ScopeInner {
    frame: ReactiveMap,
    parent: Option<Scope>,
    /// `None` means this scope is its own write scope.
    write: Option<Scope>,
}

/// Shared handle to one link of a scope chain.
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Scope {
    /// A root scope: fresh empty frame, no parent, writes land locally.
    #[must_use]
    pub fn root() -> Self {
        Self::with_frame(ReactiveMap::new())
    }

    /// A root scope over an existing frame.
    #[must_use]
    pub fn with_frame(frame: ReactiveMap) -> Self {
        Scope {
            inner: Rc::new(ScopeInner {
                frame,
                parent: None,
                write: None,
            }),
        }
    }

    /// A child scope: empty local frame shadowing this chain, sharing this
    /// scope's write frame. Loop bodies evaluate in children.
    #[must_use]
    pub fn child(&self) -> Self {
        Scope {
            inner: Rc::new(ScopeInner {
                frame: ReactiveMap::new(),
                parent: Some(self.clone()),
                write: Some(self.write_scope()),
            }),
        }
    }

    #[must_use]
    pub fn frame(&self) -> &ReactiveMap {
        &self.inner.frame
    }

    #[must_use]
    pub fn parent(&self) -> Option<Scope> {
        self.inner.parent.clone()
    }

    /// The scope whose frame receives bare assignments.
    #[must_use]
    pub fn write_scope(&self) -> Scope {
        match &self.inner.write {
            Some(scope) => scope.clone(),
            None => self.clone(),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Finds the chain frame defining `name` locally, outward from here.
    /// Does not record a dependency edge.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<(Scope, Rc<str>)> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if let Some(key) = scope.inner.frame.local_key(name) {
                return Some((scope, key));
            }
            current = scope.inner.parent.clone();
        }
        None
    }

    /// Resolves `name` through the chain and reads it with tracking.
    /// Unresolved names read through the write frame instead, recording the
    /// edge there.
    #[must_use]
    pub fn read(&self, name: &str) -> Value {
        match self.lookup(name) {
            Some((owner, key)) => owner.inner.frame.get(&key),
            None => self.write_scope().inner.frame.get(name),
        }
    }

    /// Reads `name` from the write frame only (tracked). Call targets
    /// resolve here, so a method invokes against the frame it would assign
    /// to.
    #[must_use]
    pub fn read_for_write(&self, name: &str) -> Value {
        self.write_scope().inner.frame.get(name)
    }

    /// Bare assignment: writes into the write frame regardless of which
    /// frame currently defines `name`.
    pub fn write(&self, name: &str, value: Value) {
        self.write_scope().inner.frame.set(name, value);
    }

    /// Compound-assignment write-back: writes to the frame that owns
    /// `name`, defining it locally when no frame does.
    pub fn assign_resolved(&self, name: &str, value: Value) {
        match self.lookup(name) {
            Some((owner, key)) => owner.inner.frame.set(&key, value),
            None => self.inner.frame.set(name, value),
        }
    }

    /// Defines `name` on this scope's own frame, shadowing any outer
    /// definition. Loop-variable binding.
    pub fn define_local(&self, name: &str, value: Value) {
        self.inner.frame.set(name, value);
    }

    /// What `this` evaluates to: the write frame as a map value.
    #[must_use]
    pub fn this_value(&self) -> Value {
        Value::Map(self.write_scope().inner.frame.clone())
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Scope {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("frame", &self.inner.frame)
            .field("has_parent", &self.inner.parent.is_some())
            .field("is_write_scope", &self.inner.write.is_none())
            .finish()
    }
}

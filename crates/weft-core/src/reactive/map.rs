//! Reactive insertion-ordered mapping.
//!
//! `ReactiveMap` is the only mapping type in the value model; every read and
//! write goes through it, which is what makes dependency tracking impossible
//! to bypass. Cloning a handle shares the underlying target, so two clones
//! are the same map for identity, observation and mutation purposes.
//!
//! # Design
//!
//! - Entries keep insertion order; loop enumeration and JSON output are
//!   deterministic without a hashing dependency.
//! - The observer is attached lazily: plain reads outside any watcher
//!   evaluation never allocate one.
//! - Writes compare old and new with strict identity and suppress unchanged
//!   values, so `m.set("x", m.get("x"))` never schedules anything.
//! - Notification happens after the entry borrow is released; a handler may
//!   re-enter the same map freely.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::reactive::observer::{Observer, PropKey, TargetRef};
use crate::reactive::tracking;
use crate::scheduler::Scheduler;
use crate::value::Value;

pub(crate) struct MapInner {
    entries: RefCell<Vec<(Rc<str>, Value)>>,
    observer: RefCell<Option<Rc<Observer>>>,
    /// Inert maps (builtin namespaces) are invisible to tracking and never
    /// notify.
    inert: bool,
}

/// Shared handle to a reactive insertion-ordered mapping.
pub struct ReactiveMap {
    inner: Rc<MapInner>,
}

impl ReactiveMap {
    #[must_use]
    pub fn new() -> Self {
        Self::with_inner(Vec::new(), false)
    }

    /// Builds a map that never participates in tracking or notification.
    /// Used for builtin namespaces shared across schedulers.
    #[must_use]
    pub(crate) fn inert() -> Self {
        Self::with_inner(Vec::new(), true)
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Rc<str>, Value)>) -> Self {
        Self::with_inner(entries.into_iter().collect(), false)
    }

    fn with_inner(entries: Vec<(Rc<str>, Value)>, inert: bool) -> Self {
        ReactiveMap {
            inner: Rc::new(MapInner {
                entries: RefCell::new(entries),
                observer: RefCell::new(None),
                inert,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<MapInner>) -> Self {
        ReactiveMap { inner }
    }

    /// Two handles are the same map when they share the target.
    #[must_use]
    #[inline]
    pub fn ptr_eq(&self, other: &ReactiveMap) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable address of the target, for cycle detection in deep walks.
    #[must_use]
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    #[must_use]
    pub(crate) fn is_inert(&self) -> bool {
        self.inner.inert
    }

    /// Reads `name`, recording a dependency edge when a watcher is
    /// evaluating. Missing keys read as `Undefined` and still record an
    /// edge, so a later definition re-triggers. Function values are handed
    /// out without recording anything.
    #[must_use]
    pub fn get(&self, name: &str) -> Value {
        let (key, value) = {
            let entries = self.inner.entries.borrow();
            match entries.iter().find(|(k, _)| k.as_ref() == name) {
                Some((k, v)) => (k.clone(), v.clone()),
                None => (Rc::from(name), Value::Undefined),
            }
        };
        if !self.inner.inert {
            self.track_read(PropKey::Name(key), &value);
        }
        value
    }

    /// Writes `name`, suppressing the notification when the new value is
    /// identical to the old one. Writing `Undefined` where nothing was
    /// defined is a complete no-op.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let notify = {
            let mut entries = self.inner.entries.borrow_mut();
            match entries.iter_mut().find(|(k, _)| k.as_ref() == name) {
                Some((k, slot)) => {
                    if slot.identical(&value) {
                        None
                    } else {
                        let key = k.clone();
                        *slot = value;
                        Some(key)
                    }
                }
                None if matches!(value, Value::Undefined) => None,
                None => {
                    let key: Rc<str> = Rc::from(name);
                    entries.push((key.clone(), value));
                    Some(key)
                }
            }
        };
        if let Some(key) = notify {
            if !self.inner.inert {
                if let Some(observer) = self.observer() {
                    observer.notify_key(&PropKey::Name(key));
                }
            }
        }
    }

    /// Presence check; records an edge like a read.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        let (key, present) = {
            let entries = self.inner.entries.borrow();
            match entries.iter().find(|(k, _)| k.as_ref() == name) {
                Some((k, _)) => (k.clone(), true),
                None => (Rc::from(name), false),
            }
        };
        if !self.inner.inert {
            self.track_read(PropKey::Name(key), &Value::Undefined);
        }
        present
    }

    /// Removes `name`; notifies only when the key existed.
    pub fn delete(&self, name: &str) -> bool {
        let removed = {
            let mut entries = self.inner.entries.borrow_mut();
            entries
                .iter()
                .position(|(k, _)| k.as_ref() == name)
                .map(|pos| entries.remove(pos).0)
        };
        match removed {
            Some(key) => {
                if !self.inner.inert {
                    if let Some(observer) = self.observer() {
                        observer.notify_key(&PropKey::Name(key));
                    }
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// Snapshot of the keys in insertion order. Not tracked.
    #[must_use]
    pub fn keys(&self) -> Vec<Rc<str>> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Snapshot of entries in insertion order. Not tracked; use `get` to
    /// read individual values under tracking.
    #[must_use]
    pub fn entries(&self) -> Vec<(Rc<str>, Value)> {
        self.inner.entries.borrow().clone()
    }

    /// The stored key handle when `name` is defined locally. No tracking.
    pub(crate) fn local_key(&self, name: &str) -> Option<Rc<str>> {
        self.inner
            .entries
            .borrow()
            .iter()
            .find(|(k, _)| k.as_ref() == name)
            .map(|(k, _)| k.clone())
    }

    pub(crate) fn ensure_observer(&self, scheduler: &Scheduler) -> Rc<Observer> {
        let mut slot = self.inner.observer.borrow_mut();
        match slot.as_ref() {
            Some(observer) => observer.clone(),
            None => {
                let observer = Observer::new(
                    scheduler.next_observer_id(),
                    scheduler.clone(),
                    TargetRef::Map(Rc::downgrade(&self.inner)),
                );
                *slot = Some(observer.clone());
                observer
            }
        }
    }

    pub(crate) fn observer(&self) -> Option<Rc<Observer>> {
        self.inner.observer.borrow().clone()
    }

    fn track_read(&self, key: PropKey, value: &Value) {
        if matches!(value, Value::Func(_)) {
            return;
        }
        let Some(scheduler) = tracking::current_scheduler() else {
            return;
        };
        let observer = self.ensure_observer(&scheduler);
        tracking::record_read(&observer, &key);
        super::attach_child(value, &scheduler);
    }
}

impl Clone for ReactiveMap {
    fn clone(&self) -> Self {
        ReactiveMap {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for ReactiveMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: values may refer back to this map.
        let entries = self.inner.entries.borrow();
        f.debug_struct("ReactiveMap")
            .field("keys", &entries.iter().map(|(k, _)| k.as_ref()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_target() {
        let a = ReactiveMap::new();
        let b = a.clone();
        b.set("x", Value::Num(1.0));
        assert_eq!(a.get("x"), Value::Num(1.0));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let m = ReactiveMap::new();
        m.set("b", Value::Num(1.0));
        m.set("a", Value::Num(2.0));
        m.set("c", Value::Num(3.0));
        let keys: Vec<String> = m.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, ["b", "a", "c"]);
    }

    #[test]
    fn unchanged_writes_do_not_allocate_an_observer_or_notify() {
        let m = ReactiveMap::new();
        m.set("x", Value::Num(1.0));
        m.set("x", Value::Num(1.0));
        assert!(
            m.observer().is_none(),
            "no tracking happened, so no observer should exist"
        );
    }

    #[test]
    fn writing_undefined_over_nothing_defines_no_key() {
        let m = ReactiveMap::new();
        m.set("ghost", Value::Undefined);
        assert!(!m.has("ghost"));
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn delete_reports_whether_the_key_existed() {
        let m = ReactiveMap::new();
        m.set("x", Value::Num(1.0));
        assert!(m.delete("x"));
        assert!(!m.delete("x"));
        assert!(matches!(m.get("x"), Value::Undefined));
    }

    #[test]
    fn plain_reads_leave_the_map_observer_free() {
        let m = ReactiveMap::new();
        m.set("x", Value::Num(1.0));
        let _ = m.get("x");
        let _ = m.has("x");
        assert!(m.observer().is_none());
    }
}

//! Reactive interception layer.
//!
//! Mappings and sequences exist only as [`ReactiveMap`]/[`ReactiveList`]
//! handles, so every structural access is observable by construction. A
//! [`Watcher`] evaluation installs an ambient tracking frame; reads made
//! while it is active become dependency edges, and writes schedule the
//! watchers holding matching edges.
//!
//! Child containers are not wrapped eagerly: a nested map gets its observer
//! the first time it is read during an active evaluation.

pub mod list;
pub mod map;
pub mod observer;
pub(crate) mod tracking;
pub mod watcher;

pub use list::ReactiveList;
pub use map::ReactiveMap;
pub use observer::{ChangeToken, Observer, PropKey};
pub use watcher::{ChangeHandler, Evaluator, Watcher, WatcherFlags};

use std::rc::Rc;

use crate::scheduler::Scheduler;
use crate::value::Value;

/// Ensures the value's observer exists. Identity-preserving: wrapping an
/// already-wrapped target keeps its observer, and the returned value shares
/// the same target as the input. Scalars pass through untouched.
pub fn wrap(value: &Value, scheduler: &Scheduler) -> Value {
    attach_child(value, scheduler);
    value.clone()
}

/// Registers a whole-object subscriber on a map or list value, invoked once
/// per flush cycle with the target whenever any of its properties changed.
/// Returns `None` for scalar values, which have no observer.
pub fn observe_changes(
    value: &Value,
    handler: impl Fn(&Value) + 'static,
    scheduler: &Scheduler,
) -> Option<ChangeToken> {
    let observer = match value {
        Value::Map(m) if !m.is_inert() => m.ensure_observer(scheduler),
        Value::List(l) => l.ensure_observer(scheduler),
        _ => return None,
    };
    Some(observer.subscribe(Rc::new(handler)))
}

/// Removes a subscriber registered with [`observe_changes`]. Returns whether
/// the token was found.
pub fn unobserve_changes(value: &Value, token: ChangeToken) -> bool {
    let observer = match value {
        Value::Map(m) => m.observer(),
        Value::List(l) => l.observer(),
        _ => None,
    };
    observer.is_some_and(|obs| obs.unsubscribe(token))
}

/// Attaches an observer to container values; the lazy child-wrap step of a
/// tracked read.
pub(crate) fn attach_child(value: &Value, scheduler: &Scheduler) {
    match value {
        Value::Map(m) if !m.is_inert() => {
            m.ensure_observer(scheduler);
        }
        Value::List(l) => {
            l.ensure_observer(scheduler);
        }
        _ => {}
    }
}

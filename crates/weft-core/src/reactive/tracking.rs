//! Ambient dependency tracking.
//!
//! While a watcher evaluates, a frame on a thread-local stack receives every
//! (observer, key) pair the evaluation reads. The reactive handles call
//! [`record_read`] on each tracked access; outside an evaluation those calls
//! are no-ops, so plain data access costs one thread-local check.
//!
//! The stack nests: a watcher constructed during another watcher's
//! evaluation records its own edges without polluting the outer frame.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::reactive::observer::{Observer, PropKey};
use crate::reactive::watcher::Watcher;
use crate::scheduler::Scheduler;

/// One dependency edge: an observed target plus the key read on it.
#[derive(Clone)]
pub(crate) struct Edge {
    pub(crate) observer: Rc<Observer>,
    pub(crate) key: PropKey,
}

struct TrackFrame {
    watcher: Weak<Watcher>,
    watcher_id: u64,
    scheduler: Scheduler,
    edges: Vec<Edge>,
}

thread_local! {
    static ACTIVE: RefCell<Vec<TrackFrame>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` with `watcher` installed as the actively-evaluating watcher and
/// returns its result together with every edge the run recorded.
pub(crate) fn with_tracking<R>(
    watcher: &Rc<Watcher>,
    scheduler: &Scheduler,
    f: impl FnOnce() -> R,
) -> (R, Vec<Edge>) {
    ACTIVE.with(|stack| {
        stack.borrow_mut().push(TrackFrame {
            watcher: Rc::downgrade(watcher),
            watcher_id: watcher.id(),
            scheduler: scheduler.clone(),
            edges: Vec::new(),
        });
    });
    let out = f();
    let edges = ACTIVE.with(|stack| {
        stack
            .borrow_mut()
            .pop()
            .map(|frame| frame.edges)
            .unwrap_or_default()
    });
    (out, edges)
}

/// Records a read of `key` on `observer` against the innermost active
/// evaluation, if any. Duplicate (observer, key) pairs within one frame
/// collapse to a single edge.
pub(crate) fn record_read(observer: &Rc<Observer>, key: &PropKey) {
    ACTIVE.with(|stack| {
        let mut stack = stack.borrow_mut();
        let Some(frame) = stack.last_mut() else {
            return;
        };
        let seen = frame
            .edges
            .iter()
            .any(|e| e.observer.id() == observer.id() && e.key == *key);
        if seen {
            return;
        }
        frame.edges.push(Edge {
            observer: observer.clone(),
            key: key.clone(),
        });
        observer.add_dependent(key, frame.watcher_id, frame.watcher.clone());
    });
}

/// Scheduler of the innermost active evaluation, if any. Reactive handles
/// use this to mint observers lazily at first tracked read.
pub(crate) fn current_scheduler() -> Option<Scheduler> {
    ACTIVE.with(|stack| stack.borrow().last().map(|frame| frame.scheduler.clone()))
}

/// True while some watcher evaluation is active on this thread.
#[cfg(test)]
pub(crate) fn is_tracking() -> bool {
    ACTIVE.with(|stack| !stack.borrow().is_empty())
}

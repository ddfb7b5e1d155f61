//! Per-target change bookkeeping.
//!
//! Every reactive map or list owns at most one [`Observer`], created lazily
//! the first time the target is read under an active watcher evaluation or
//! explicitly wrapped. The observer records which watchers depend on which
//! property, coalesces sequence mutations into a single "index ≥ start plus
//! length" notification per cycle, and carries whole-object change
//! subscribers.
//!
//! # Invariants
//!
//! 1. Observer ids are minted by the scheduler and strictly increase; the
//!    event phase drains observers in ascending id order.
//! 2. Dependents are weak: a dropped watcher never keeps firing, and empty
//!    dependent lists are pruned by a deferred internal task rather than
//!    inline.
//! 3. Notification never runs user code while the dependent table is
//!    borrowed (collect, then invoke).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::reactive::list::ListInner;
use crate::reactive::map::MapInner;
use crate::reactive::watcher::Watcher;
use crate::scheduler::Scheduler;
use crate::value::Value;

/// A property key as seen by the dependency graph.
///
/// Sequence accesses normalize to `Index`/`Length` so coalesced range
/// notifications can match them structurally.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropKey {
    /// Named mapping entry (or a non-index name read on a sequence).
    Name(Rc<str>),
    /// Positional sequence slot.
    Index(usize),
    /// Sequence length.
    Length,
}

impl fmt::Display for PropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropKey::Name(name) => write!(f, "{name}"),
            PropKey::Index(i) => write!(f, "{i}"),
            PropKey::Length => f.write_str("length"),
        }
    }
}

/// Handle for cancelling a whole-object change subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChangeToken(u64);

/// Weak back-reference to the observed target, used to hand subscribers the
/// target value without keeping it alive.
pub(crate) enum TargetRef {
    Map(Weak<MapInner>),
    List(Weak<ListInner>),
}

struct DepEntry {
    id: u64,
    watcher: Weak<Watcher>,
}

struct SubEntry {
    token: ChangeToken,
    handler: Rc<dyn Fn(&Value)>,
}

/// Change bookkeeping for one reactive target.
pub struct Observer {
    id: u64,
    scheduler: Scheduler,
    target: TargetRef,
    dependents: RefCell<HashMap<PropKey, SmallVec<[DepEntry; 2]>>>,
    subscribers: RefCell<Vec<SubEntry>>,
    /// Lowest sequence index touched since the last coalesced delivery;
    /// `usize::MAX` means no pending range.
    pending_start: Cell<usize>,
    prune_queued: Cell<bool>,
    next_token: Cell<u64>,
}

impl Observer {
    pub(crate) fn new(id: u64, scheduler: Scheduler, target: TargetRef) -> Rc<Observer> {
        Rc::new(Observer {
            id,
            scheduler,
            target,
            dependents: RefCell::new(HashMap::new()),
            subscribers: RefCell::new(Vec::new()),
            pending_start: Cell::new(usize::MAX),
            prune_queued: Cell::new(false),
            next_token: Cell::new(0),
        })
    }

    #[must_use]
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Registers `watcher` as depending on `key`; duplicate registrations
    /// within the same evaluation are ignored.
    pub(crate) fn add_dependent(&self, key: &PropKey, watcher_id: u64, watcher: Weak<Watcher>) {
        let mut deps = self.dependents.borrow_mut();
        let entries = deps.entry(key.clone()).or_default();
        if entries.iter().any(|e| e.id == watcher_id) {
            return;
        }
        entries.push(DepEntry {
            id: watcher_id,
            watcher,
        });
    }

    /// Drops the edge (`key`, `watcher_id`). When that leaves the key's
    /// dependent list empty, a prune of empty entries is deferred to the
    /// internal-task phase, at most one per observer at a time.
    pub(crate) fn remove_dependent(self: &Rc<Self>, key: &PropKey, watcher_id: u64) {
        let emptied = {
            let mut deps = self.dependents.borrow_mut();
            match deps.get_mut(key) {
                Some(entries) => {
                    entries.retain(|e| e.id != watcher_id);
                    entries.is_empty()
                }
                None => false,
            }
        };
        if emptied && !self.prune_queued.get() {
            self.prune_queued.set(true);
            let weak = Rc::downgrade(self);
            self.scheduler.push_internal_task(move || {
                if let Some(obs) = weak.upgrade() {
                    obs.prune_queued.set(false);
                    obs.dependents.borrow_mut().retain(|_, entries| {
                        entries.retain(|e| e.watcher.strong_count() > 0);
                        !entries.is_empty()
                    });
                }
            });
        }
    }

    /// Schedules every watcher depending on `key`, plus the event phase when
    /// whole-object subscribers exist.
    pub(crate) fn notify_key(self: &Rc<Self>, key: &PropKey) {
        let watchers = self.collect_dependents(key);
        for watcher in watchers {
            watcher.update();
        }
        self.schedule_subscribers();
    }

    /// Records a sequence mutation touching indices `start..`. Reports fold
    /// to the minimum start across the cycle; while a flush is running the
    /// coalesced notification applies immediately instead of queueing.
    pub(crate) fn report_range(self: &Rc<Self>, start: usize) {
        let pending = self.pending_start.get();
        self.pending_start.set(pending.min(start));
        if self.scheduler.is_flushing() {
            self.apply_coalesced();
        } else {
            self.scheduler.enqueue_array_observer(self.clone());
        }
        self.schedule_subscribers();
    }

    /// Delivers the pending coalesced range: watchers depending on `length`
    /// or on any index ≥ the recorded start are scheduled, then the pending
    /// start resets.
    pub(crate) fn apply_coalesced(self: &Rc<Self>) {
        let start = self.pending_start.replace(usize::MAX);
        if start == usize::MAX {
            return;
        }
        let watchers: Vec<Rc<Watcher>> = {
            let deps = self.dependents.borrow();
            deps.iter()
                .filter(|(key, _)| match key {
                    PropKey::Length => true,
                    PropKey::Index(i) => *i >= start,
                    PropKey::Name(_) => false,
                })
                .flat_map(|(_, entries)| entries.iter().filter_map(|e| e.watcher.upgrade()))
                .collect()
        };
        for watcher in watchers {
            watcher.update();
        }
    }

    /// Invokes every whole-object subscriber with the target value. Runs
    /// outside any internal borrow, so subscribers may freely mutate.
    pub(crate) fn flush_subscribers(self: &Rc<Self>) {
        let Some(target) = self.target_value() else {
            return;
        };
        let handlers: Vec<Rc<dyn Fn(&Value)>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|s| s.handler.clone())
            .collect();
        for handler in handlers {
            handler(&target);
        }
    }

    pub(crate) fn subscribe(&self, handler: Rc<dyn Fn(&Value)>) -> ChangeToken {
        let token = ChangeToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        self.subscribers.borrow_mut().push(SubEntry { token, handler });
        token
    }

    /// Returns whether a subscriber with this token existed.
    pub(crate) fn unsubscribe(&self, token: ChangeToken) -> bool {
        let mut subs = self.subscribers.borrow_mut();
        let before = subs.len();
        subs.retain(|s| s.token != token);
        subs.len() != before
    }

    fn schedule_subscribers(self: &Rc<Self>) {
        if !self.subscribers.borrow().is_empty() {
            self.scheduler.enqueue_event_observer(self.clone());
        }
    }

    fn collect_dependents(&self, key: &PropKey) -> Vec<Rc<Watcher>> {
        let deps = self.dependents.borrow();
        match deps.get(key) {
            Some(entries) => entries.iter().filter_map(|e| e.watcher.upgrade()).collect(),
            None => Vec::new(),
        }
    }

    fn target_value(&self) -> Option<Value> {
        match &self.target {
            TargetRef::Map(weak) => weak
                .upgrade()
                .map(|inner| Value::Map(crate::reactive::map::ReactiveMap::from_inner(inner))),
            TargetRef::List(weak) => weak
                .upgrade()
                .map(|inner| Value::List(crate::reactive::list::ReactiveList::from_inner(inner))),
        }
    }

    #[cfg(test)]
    pub(crate) fn dependent_count(&self, key: &PropKey) -> usize {
        self.dependents
            .borrow()
            .get(key)
            .map_or(0, |entries| entries.len())
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("tracked_keys", &self.dependents.borrow().len())
            .field("subscribers", &self.subscribers.borrow().len())
            .finish()
    }
}

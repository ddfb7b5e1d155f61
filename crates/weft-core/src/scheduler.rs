//! Ordered batching of reactive updates.
//!
//! One explicit [`Scheduler`] instance per engine (or test) carries every
//! pending queue plus the id counters for watchers and observers. Mutations
//! enqueue; nothing user-visible runs until [`Scheduler::flush`] drains the
//! phases:
//!
//! 1. sequence observers deliver their coalesced range notifications,
//! 2. pending watchers run in ascending id order,
//! 3. whole-object subscribers run in ascending observer id order, with
//!    phase 2 fully re-drained after each observer,
//! 4. internal bookkeeping tasks run FIFO,
//! 5. user tasks run FIFO and protected, with phases 1–4 re-drained after
//!    each one.
//!
//! The first enqueue while idle arms the cycle and invokes the deferred-
//! flush hook exactly once; the embedder calls `flush()` at its next
//! scheduling boundary (the facade's `settle()` does so synchronously).
//!
//! # Invariants
//!
//! 1. Enqueue is idempotent per id per cycle.
//! 2. The flush loops until every queue is empty; later phases may refill
//!    earlier ones without stranding work for a next cycle.
//! 3. While a watcher updates, an enqueue targeting one of its causation
//!    ancestors (or itself) is rejected and reported once, with the full
//!    expression chain.
//! 4. No queue borrow is held while user code runs.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, debug_span, warn};

use crate::error::{CycleReport, EvalError};
use crate::reactive::observer::Observer;
use crate::reactive::watcher::Watcher;

type InternalTask = Box<dyn FnOnce()>;
type UserTask = Box<dyn FnOnce() -> Result<(), EvalError>>;
type ArmHook = Box<dyn FnMut()>;
type CycleHook = Box<dyn Fn(&CycleReport)>;

struct SchedState {
    armed: bool,
    flushing: bool,
    /// Pending watchers, kept sorted by ascending id.
    watchers: Vec<Rc<Watcher>>,
    watcher_pending: HashSet<u64>,
    /// Pending sequence observers, FIFO.
    array_observers: Vec<Rc<Observer>>,
    array_pending: HashSet<u64>,
    /// Pending event observers, kept sorted by ascending id.
    event_observers: Vec<Rc<Observer>>,
    event_pending: HashSet<u64>,
    internal_tasks: VecDeque<InternalTask>,
    user_tasks: VecDeque<UserTask>,
    /// The watcher currently running in phase 2, if any.
    updating: Option<Rc<Watcher>>,
    /// Per-flush map: watcher id → the watcher whose update enqueued it.
    causation: HashMap<u64, Rc<Watcher>>,
    next_watcher_id: u64,
    next_observer_id: u64,
    arm_hook: Option<ArmHook>,
    cycle_hook: Option<CycleHook>,
}

impl SchedState {
    fn arm_if_needed(&mut self) -> bool {
        if self.armed || self.flushing {
            false
        } else {
            self.armed = true;
            true
        }
    }

    /// When enqueuing `candidate` would re-enter its own causation chain,
    /// returns the chain labels (oldest ancestor first, candidate last).
    fn cycle_chain(&self, candidate: &Rc<Watcher>, updating: &Rc<Watcher>) -> Option<Vec<Rc<str>>> {
        let mut found = candidate.id() == updating.id();
        let mut labels = vec![updating.label_rc()];
        let mut cursor = updating.id();
        while let Some(parent) = self.causation.get(&cursor) {
            labels.push(parent.label_rc());
            if parent.id() == candidate.id() {
                found = true;
            }
            cursor = parent.id();
        }
        if !found {
            return None;
        }
        labels.reverse();
        labels.push(candidate.label_rc());
        Some(labels)
    }
}

/// Cheaply clonable handle to one scheduling domain.
pub struct Scheduler {
    state: Rc<RefCell<SchedState>>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Scheduler {
            state: Rc::new(RefCell::new(SchedState {
                armed: false,
                flushing: false,
                watchers: Vec::new(),
                watcher_pending: HashSet::new(),
                array_observers: Vec::new(),
                array_pending: HashSet::new(),
                event_observers: Vec::new(),
                event_pending: HashSet::new(),
                internal_tasks: VecDeque::new(),
                user_tasks: VecDeque::new(),
                updating: None,
                causation: HashMap::new(),
                next_watcher_id: 1,
                next_observer_id: 1,
                arm_hook: None,
                cycle_hook: None,
            })),
        }
    }

    /// Installs the deferred-flush hook, invoked exactly once per cycle at
    /// the first enqueue while idle. The embedder is expected to call
    /// [`Scheduler::flush`] at its next scheduling boundary.
    pub fn set_arm_hook(&self, hook: impl FnMut() + 'static) {
        self.state.borrow_mut().arm_hook = Some(Box::new(hook));
    }

    /// Installs an observer for rejected circular updates, in addition to
    /// the logged warning.
    pub fn set_cycle_hook(&self, hook: impl Fn(&CycleReport) + 'static) {
        self.state.borrow_mut().cycle_hook = Some(Box::new(hook));
    }

    /// Defers bookkeeping to phase 4. Internal tasks must not mutate
    /// tracked state.
    pub fn push_internal_task(&self, task: impl FnOnce() + 'static) {
        let arm = {
            let mut s = self.state.borrow_mut();
            s.internal_tasks.push_back(Box::new(task));
            s.arm_if_needed()
        };
        if arm {
            self.invoke_arm_hook();
        }
    }

    /// Defers user work to phase 5. A failing task is reported and never
    /// aborts the queue.
    pub fn push_user_task(&self, task: impl FnOnce() -> Result<(), EvalError> + 'static) {
        let arm = {
            let mut s = self.state.borrow_mut();
            s.user_tasks.push_back(Box::new(task));
            s.arm_if_needed()
        };
        if arm {
            self.invoke_arm_hook();
        }
    }

    /// Enqueues a watcher for phase 2. Destroyed watchers and inactive ones
    /// without `RUN_WHILE_INACTIVE` are dropped here; duplicates within the
    /// cycle are dropped; an enqueue that re-enters the currently-updating
    /// causation chain is rejected and reported.
    pub(crate) fn enqueue_watcher(&self, watcher: Rc<Watcher>) {
        if watcher.is_destroyed() || !(watcher.is_active() || watcher.runs_while_inactive()) {
            return;
        }
        let mut report = None;
        let arm = {
            let mut s = self.state.borrow_mut();
            if let Some(updating) = s.updating.clone() {
                match s.cycle_chain(&watcher, &updating) {
                    Some(chain) => report = Some(CycleReport { chain }),
                    None => {
                        s.causation.insert(watcher.id(), updating);
                    }
                }
            }
            if report.is_some() || s.watcher_pending.contains(&watcher.id()) {
                false
            } else {
                s.watcher_pending.insert(watcher.id());
                let pos = s.watchers.partition_point(|w| w.id() < watcher.id());
                s.watchers.insert(pos, watcher);
                s.arm_if_needed()
            }
        };
        if let Some(report) = report {
            warn!(%report, "rejected circular update");
            self.invoke_cycle_hook(&report);
        }
        if arm {
            self.invoke_arm_hook();
        }
    }

    /// Enqueues a sequence observer for phase 1. While a flush is running,
    /// the observer applies its coalesced range immediately instead.
    pub(crate) fn enqueue_array_observer(&self, observer: Rc<Observer>) {
        let arm = {
            let mut s = self.state.borrow_mut();
            if s.array_pending.contains(&observer.id()) {
                return;
            }
            s.array_pending.insert(observer.id());
            s.array_observers.push(observer);
            s.arm_if_needed()
        };
        if arm {
            self.invoke_arm_hook();
        }
    }

    /// Enqueues an event observer for phase 3, in ascending id position.
    pub(crate) fn enqueue_event_observer(&self, observer: Rc<Observer>) {
        let arm = {
            let mut s = self.state.borrow_mut();
            if s.event_pending.contains(&observer.id()) {
                return;
            }
            s.event_pending.insert(observer.id());
            let pos = s.event_observers.partition_point(|o| o.id() < observer.id());
            s.event_observers.insert(pos, observer);
            s.arm_if_needed()
        };
        if arm {
            self.invoke_arm_hook();
        }
    }

    /// Drains every phase until all queues are empty, then returns to idle.
    /// Re-entrant calls are no-ops.
    pub fn flush(&self) {
        {
            let mut s = self.state.borrow_mut();
            if s.flushing {
                return;
            }
            s.flushing = true;
            s.armed = false;
        }
        let span = debug_span!("flush");
        let _guard = span.enter();
        loop {
            self.drain_array_observers();
            self.drain_watchers();
            self.drain_event_observers();
            self.drain_internal_tasks();
            if let Some(task) = self.take_user_task() {
                if let Err(err) = task() {
                    warn!(error = %err, "deferred task failed");
                }
                // Settle phases 1-4 before the next task observes the world.
                continue;
            }
            if self.is_settled() {
                break;
            }
        }
        let mut s = self.state.borrow_mut();
        s.flushing = false;
        s.causation.clear();
        debug!("flush settled");
    }

    /// Clears every pending queue and returns to idle. Id counters keep
    /// counting. Intended for test isolation.
    pub fn reset(&self) {
        let mut s = self.state.borrow_mut();
        s.armed = false;
        s.flushing = false;
        s.watchers.clear();
        s.watcher_pending.clear();
        s.array_observers.clear();
        s.array_pending.clear();
        s.event_observers.clear();
        s.event_pending.clear();
        s.internal_tasks.clear();
        s.user_tasks.clear();
        s.updating = None;
        s.causation.clear();
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.state.borrow().armed
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.state.borrow().flushing
    }

    #[must_use]
    pub fn pending_watcher_count(&self) -> usize {
        self.state.borrow().watchers.len()
    }

    pub(crate) fn next_watcher_id(&self) -> u64 {
        let mut s = self.state.borrow_mut();
        let id = s.next_watcher_id;
        s.next_watcher_id += 1;
        id
    }

    pub(crate) fn next_observer_id(&self) -> u64 {
        let mut s = self.state.borrow_mut();
        let id = s.next_observer_id;
        s.next_observer_id += 1;
        id
    }

    fn drain_array_observers(&self) {
        loop {
            let next = {
                let mut s = self.state.borrow_mut();
                if s.array_observers.is_empty() {
                    break;
                }
                s.array_observers.remove(0)
            };
            next.apply_coalesced();
            self.state.borrow_mut().array_pending.remove(&next.id());
        }
    }

    fn drain_watchers(&self) {
        loop {
            let next = {
                let mut s = self.state.borrow_mut();
                if s.watchers.is_empty() {
                    s.updating = None;
                    break;
                }
                let watcher = s.watchers.remove(0);
                s.updating = Some(watcher.clone());
                watcher
            };
            let runnable =
                !next.is_destroyed() && (next.is_active() || next.runs_while_inactive());
            if runnable {
                next.update_now(false);
            }
            // The pending mark clears only after the run, so a watcher
            // re-enqueued during its own update folds into this pass.
            self.state.borrow_mut().watcher_pending.remove(&next.id());
        }
    }

    fn drain_event_observers(&self) {
        loop {
            let next = {
                let mut s = self.state.borrow_mut();
                if s.event_observers.is_empty() {
                    break;
                }
                s.event_observers.remove(0)
            };
            next.flush_subscribers();
            self.state.borrow_mut().event_pending.remove(&next.id());
            // Subscribers may invalidate watchers; settle them before the
            // next observer runs.
            self.drain_watchers();
        }
    }

    fn drain_internal_tasks(&self) {
        loop {
            let task = self.state.borrow_mut().internal_tasks.pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    fn take_user_task(&self) -> Option<UserTask> {
        self.state.borrow_mut().user_tasks.pop_front()
    }

    fn is_settled(&self) -> bool {
        let s = self.state.borrow();
        s.watchers.is_empty()
            && s.array_observers.is_empty()
            && s.event_observers.is_empty()
            && s.internal_tasks.is_empty()
            && s.user_tasks.is_empty()
    }

    fn invoke_arm_hook(&self) {
        let hook = self.state.borrow_mut().arm_hook.take();
        match hook {
            Some(mut hook) => {
                hook();
                let mut s = self.state.borrow_mut();
                if s.arm_hook.is_none() {
                    s.arm_hook = Some(hook);
                }
            }
            None => debug!("flush armed; caller is expected to settle"),
        }
    }

    fn invoke_cycle_hook(&self, report: &CycleReport) {
        let hook = self.state.borrow_mut().cycle_hook.take();
        if let Some(hook) = hook {
            hook(report);
            let mut s = self.state.borrow_mut();
            if s.cycle_hook.is_none() {
                s.cycle_hook = Some(hook);
            }
        }
    }
}

impl Clone for Scheduler {
    fn clone(&self) -> Self {
        Scheduler {
            state: Rc::clone(&self.state),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.borrow();
        f.debug_struct("Scheduler")
            .field("armed", &s.armed)
            .field("flushing", &s.flushing)
            .field("pending_watchers", &s.watchers.len())
            .field("pending_events", &s.event_observers.len())
            .field("pending_arrays", &s.array_observers.len())
            .field("internal_tasks", &s.internal_tasks.len())
            .field("user_tasks", &s.user_tasks.len())
            .finish()
    }
}

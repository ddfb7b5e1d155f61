//! Reactive ordered sequence.
//!
//! Mutating operations report only the lowest index they touched; the
//! observer coalesces all reports in a cycle into one "index ≥ start plus
//! length" notification, so a thousand appends wake a length-dependent
//! watcher once. Read-only helpers (`join`, `index_of`, `slice`, …) read
//! element-wise through the tracked path, so a watcher computing over the
//! list re-runs when any visited element changes.
//!
//! # Performance
//!
//! | operation        | cost               | report            |
//! |------------------|--------------------|-------------------|
//! | `get`/`set`      | O(1)               | single index      |
//! | `push`/`pop`     | amortized O(1)     | old/new length    |
//! | `shift`/`unshift`| O(n)               | index 0           |
//! | `splice`         | O(n)               | normalized start  |
//! | `sort`           | O(n log n) + calls | index 0           |

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::error::EvalError;
use crate::reactive::observer::{Observer, PropKey, TargetRef};
use crate::reactive::tracking;
use crate::scheduler::Scheduler;
use crate::value::{parse_index_key, NativeFunc, Value};

pub(crate) struct ListInner {
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Rc<Observer>>>,
}

/// Shared handle to a reactive ordered sequence.
pub struct ReactiveList {
    inner: Rc<ListInner>,
}

impl ReactiveList {
    #[must_use]
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    #[must_use]
    pub fn from_values(items: Vec<Value>) -> Self {
        ReactiveList {
            inner: Rc::new(ListInner {
                items: RefCell::new(items),
                observer: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<ListInner>) -> Self {
        ReactiveList { inner }
    }

    #[must_use]
    #[inline]
    pub fn ptr_eq(&self, other: &ReactiveList) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable address of the target, for cycle detection in deep walks.
    #[must_use]
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    /// Current length. Not tracked; `get_key("length")` is the tracked read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Reads one slot; out-of-range reads yield `Undefined` but still record
    /// an edge, so growth into that slot re-triggers.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        let value = self
            .inner
            .items
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or_default();
        self.track_read(PropKey::Index(index), &value);
        value
    }

    /// Named read: `length`, a canonical decimal index, or `Undefined`.
    #[must_use]
    pub fn get_key(&self, name: &str) -> Value {
        if name == "length" {
            let len = self.len();
            self.track_read(PropKey::Length, &Value::Undefined);
            return Value::Num(len as f64);
        }
        match parse_index_key(name) {
            Some(index) => self.get(index),
            None => {
                self.track_read(PropKey::Name(Rc::from(name)), &Value::Undefined);
                Value::Undefined
            }
        }
    }

    /// Writes one slot, growing with `Undefined` holes past the end.
    /// Notifies only that index; whole-range growth goes through the
    /// mutating operations.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        let changed = {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                items.resize(index + 1, Value::Undefined);
            }
            let slot = &mut items[index];
            if slot.identical(&value) {
                false
            } else {
                *slot = value;
                true
            }
        };
        if changed {
            if let Some(observer) = self.observer() {
                observer.notify_key(&PropKey::Index(index));
            }
        }
    }

    /// Truncates or grows to `len`. Always notifies length dependents, even
    /// when the length did not change.
    pub fn set_len(&self, len: usize) {
        self.inner.items.borrow_mut().resize(len, Value::Undefined);
        if let Some(observer) = self.observer() {
            observer.notify_key(&PropKey::Length);
        }
    }

    /// Named write: `length` resizes, canonical indices address slots,
    /// anything else is dropped.
    pub fn set_key(&self, name: &str, value: Value) {
        if name == "length" {
            let len = value.to_number();
            if len.is_finite() && len >= 0.0 {
                self.set_len(len as usize);
            }
            return;
        }
        if let Some(index) = parse_index_key(name) {
            self.set(index, value);
        }
    }

    /// Appends and returns the new length. Reports from the old length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let (old_len, new_len) = {
            let mut items = self.inner.items.borrow_mut();
            let old = items.len();
            items.push(value.into());
            (old, items.len())
        };
        self.report_range(old_len);
        new_len
    }

    /// Removes and returns the last element. Reports from the new length.
    pub fn pop(&self) -> Value {
        let (removed, new_len) = {
            let mut items = self.inner.items.borrow_mut();
            let removed = items.pop();
            (removed, items.len())
        };
        match removed {
            Some(value) => {
                self.report_range(new_len);
                value
            }
            None => Value::Undefined,
        }
    }

    /// Removes and returns the first element. Reports from index 0.
    pub fn shift(&self) -> Value {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        match removed {
            Some(value) => {
                self.report_range(0);
                value
            }
            None => Value::Undefined,
        }
    }

    /// Prepends and returns the new length. Reports from index 0.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let new_len = {
            let mut items = self.inner.items.borrow_mut();
            items.insert(0, value.into());
            items.len()
        };
        self.report_range(0);
        new_len
    }

    /// Removes `delete_count` elements at `start` (negative counts from the
    /// end, both clamped) and inserts `insert` in their place. Returns the
    /// removed elements; reports from the normalized start.
    pub fn splice(&self, start: isize, delete_count: usize, insert: Vec<Value>) -> ReactiveList {
        let inserted = insert.len();
        let (removed, norm) = {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            let norm = if start < 0 {
                len.saturating_sub(start.unsigned_abs())
            } else {
                (start as usize).min(len)
            };
            let del = delete_count.min(len - norm);
            let removed: Vec<Value> = items.splice(norm..norm + del, insert).collect();
            (removed, norm)
        };
        if inserted > 0 || !removed.is_empty() {
            self.report_range(norm);
        }
        ReactiveList::from_values(removed)
    }

    /// Sorts in place. Without a comparator, elements order by their display
    /// form; a comparator orders by the sign of its numeric result. A
    /// failing comparator treats the pair as equal and the first failure is
    /// returned after the sort completes. Reports from index 0.
    pub fn sort(&self, comparator: Option<&NativeFunc>) -> Result<(), EvalError> {
        // Sort a snapshot so a comparator reading this list cannot alias the
        // interior borrow.
        let mut items: Vec<Value> = self.inner.items.borrow().clone();
        let mut first_err = None;
        match comparator {
            None => items.sort_by(|a, b| a.to_display().cmp(&b.to_display())),
            Some(cmp) => items.sort_by(|a, b| match cmp.call(&[a.clone(), b.clone()]) {
                Ok(v) => {
                    let n = v.to_number();
                    if n < 0.0 {
                        Ordering::Less
                    } else if n > 0.0 {
                        Ordering::Greater
                    } else {
                        Ordering::Equal
                    }
                }
                Err(err) => {
                    first_err.get_or_insert(err);
                    Ordering::Equal
                }
            }),
        }
        *self.inner.items.borrow_mut() = items;
        self.report_range(0);
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Named presence: `length`, in-range canonical indices. Tracked.
    #[must_use]
    pub fn has_key(&self, name: &str) -> bool {
        if name == "length" {
            self.track_read(PropKey::Length, &Value::Undefined);
            return true;
        }
        match parse_index_key(name) {
            Some(index) => {
                self.track_read(PropKey::Index(index), &Value::Undefined);
                index < self.len()
            }
            None => {
                self.track_read(PropKey::Name(Rc::from(name)), &Value::Undefined);
                false
            }
        }
    }

    /// Removing an index leaves an `Undefined` hole; later elements keep
    /// their positions.
    pub(crate) fn delete_key(&self, name: &str) {
        if let Some(index) = parse_index_key(name) {
            if index < self.len() {
                self.set(index, Value::Undefined);
            }
        }
    }

    /// First position whose element is identical to `needle`, scanning
    /// through tracked reads.
    #[must_use]
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        let len = self.tracked_len();
        (0..len).find(|i| self.get(*i).identical(needle))
    }

    /// Tracked membership scan; NaN finds NaN, unlike `index_of`.
    #[must_use]
    pub fn includes(&self, needle: &Value) -> bool {
        let len = self.tracked_len();
        (0..len).any(|i| {
            let v = self.get(i);
            v.identical(needle) || both_nan(&v, needle)
        })
    }

    /// Joins element display forms; nullish elements render empty. Tracked.
    #[must_use]
    pub fn join(&self, sep: &str) -> String {
        let len = self.tracked_len();
        let mut out = String::new();
        for i in 0..len {
            if i > 0 {
                out.push_str(sep);
            }
            let v = self.get(i);
            if !v.is_nullish() {
                out.push_str(&v.to_display());
            }
        }
        out
    }

    /// Copies the `start..end` range into a new list (negative bounds count
    /// from the end). Tracked element reads.
    #[must_use]
    pub fn slice(&self, start: isize, end: Option<isize>) -> ReactiveList {
        let len = self.tracked_len();
        let from = clamp_bound(start, len);
        let to = end.map_or(len, |e| clamp_bound(e, len));
        let mut out = Vec::new();
        for i in from..to.max(from) {
            out.push(self.get(i));
        }
        ReactiveList::from_values(out)
    }

    /// Untracked snapshot of the elements, for enumeration.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    pub(crate) fn ensure_observer(&self, scheduler: &Scheduler) -> Rc<Observer> {
        let mut slot = self.inner.observer.borrow_mut();
        match slot.as_ref() {
            Some(observer) => observer.clone(),
            None => {
                let observer = Observer::new(
                    scheduler.next_observer_id(),
                    scheduler.clone(),
                    TargetRef::List(Rc::downgrade(&self.inner)),
                );
                *slot = Some(observer.clone());
                observer
            }
        }
    }

    pub(crate) fn observer(&self) -> Option<Rc<Observer>> {
        self.inner.observer.borrow().clone()
    }

    /// Length read that records a `Length` edge when tracking.
    fn tracked_len(&self) -> usize {
        let len = self.len();
        self.track_read(PropKey::Length, &Value::Undefined);
        len
    }

    fn report_range(&self, start: usize) {
        if let Some(observer) = self.observer() {
            observer.report_range(start);
        }
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

fn both_nan(a: &Value, b: &Value) -> bool {
    matches!((a, b), (Value::Num(x), Value::Num(y)) if x.is_nan() && y.is_nan())
}

fn clamp_bound(bound: isize, len: usize) -> usize {
    if bound < 0 {
        len.saturating_sub(bound.unsigned_abs())
    } else {
        (bound as usize).min(len)
    }
}

impl Clone for ReactiveList {
    fn clone(&self) -> Self {
        ReactiveList {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for ReactiveList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReactiveList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveList")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[f64]) -> ReactiveList {
        ReactiveList::from_values(values.iter().map(|n| Value::Num(*n)).collect())
    }

    #[test]
    fn set_past_the_end_grows_with_undefined_holes() {
        let l = ReactiveList::new();
        l.set(2, Value::Num(9.0));
        assert_eq!(l.len(), 3);
        assert!(matches!(l.get(0), Value::Undefined));
        assert_eq!(l.get(2), Value::Num(9.0));
    }

    #[test]
    fn splice_normalizes_negative_and_overlong_ranges() {
        let l = nums(&[1.0, 2.0, 3.0, 4.0]);
        let removed = l.splice(-2, 10, vec![Value::Num(9.0)]);
        assert_eq!(removed.len(), 2, "negative start counts from the end");
        assert_eq!(l.values(), vec![
            Value::Num(1.0),
            Value::Num(2.0),
            Value::Num(9.0)
        ]);

        let none = l.splice(99, 1, Vec::new());
        assert!(none.is_empty(), "start past the end removes nothing");
    }

    #[test]
    fn default_sort_orders_by_display_form() {
        let l = nums(&[10.0, 9.0, 1.0]);
        l.sort(None).unwrap();
        // String ordering: "1" < "10" < "9".
        assert_eq!(l.values(), vec![
            Value::Num(1.0),
            Value::Num(10.0),
            Value::Num(9.0)
        ]);
    }

    #[test]
    fn comparator_sort_orders_by_numeric_sign() {
        let l = nums(&[10.0, 9.0, 1.0]);
        let cmp = NativeFunc::new("asc", |args| {
            Ok(Value::Num(args[0].to_number() - args[1].to_number()))
        });
        l.sort(Some(&cmp)).unwrap();
        assert_eq!(l.values(), vec![
            Value::Num(1.0),
            Value::Num(9.0),
            Value::Num(10.0)
        ]);
    }

    #[test]
    fn join_renders_nullish_elements_empty() {
        let l = ReactiveList::from_values(vec![
            Value::Num(1.0),
            Value::Null,
            Value::Undefined,
            Value::str("x"),
        ]);
        assert_eq!(l.join(","), "1,,,x");
    }

    #[test]
    fn index_of_uses_strict_identity() {
        let l = ReactiveList::from_values(vec![Value::str("5"), Value::Num(5.0)]);
        assert_eq!(l.index_of(&Value::Num(5.0)), Some(1));
        assert_eq!(l.index_of(&Value::Num(f64::NAN)), None);
    }

    #[test]
    fn includes_finds_nan() {
        let l = ReactiveList::from_values(vec![Value::Num(f64::NAN)]);
        assert!(l.includes(&Value::Num(f64::NAN)));
    }

    #[test]
    fn slice_handles_negative_bounds() {
        let l = nums(&[1.0, 2.0, 3.0, 4.0]);
        let s = l.slice(-3, Some(-1));
        assert_eq!(s.values(), vec![Value::Num(2.0), Value::Num(3.0)]);
    }

    #[test]
    fn pop_on_empty_is_quiet() {
        let l = ReactiveList::new();
        assert!(matches!(l.pop(), Value::Undefined));
        assert!(matches!(l.shift(), Value::Undefined));
    }
}

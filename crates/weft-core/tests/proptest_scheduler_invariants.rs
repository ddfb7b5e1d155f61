//! Property-based invariant tests for dependency tracking and the flush
//! cycle.
//!
//! Verifies structural guarantees that must hold for any mix of mutations:
//!
//! 1. Any pattern of enqueues drains each pending watcher exactly once, in
//!    ascending id order.
//! 2. A batch of writes wakes exactly the watchers whose key actually
//!    changed; identical rewrites stay silent.
//! 3. A watcher's edge set always equals exactly the keys its last
//!    evaluation read.
//! 4. Any sequence of list mutations coalesces into one notification from
//!    the minimum touched index; watchers below it stay asleep.

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;

use proptest::prelude::*;
use weft_core::reactive::{Evaluator, Watcher, WatcherFlags};
use weft_core::{ReactiveList, Scheduler, Scope, Value};

// ── Strategy helpers ──────────────────────────────────────────────────

#[derive(Clone, Debug)]
enum ListOp {
    Push(f64),
    Pop,
    Shift,
    Unshift(f64),
    Splice {
        start: isize,
        delete: usize,
        insert: usize,
    },
}

fn arb_list_op() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        (0.0f64..100.0).prop_map(ListOp::Push),
        Just(ListOp::Pop),
        Just(ListOp::Shift),
        (0.0f64..100.0).prop_map(ListOp::Unshift),
        (-8isize..8, 0usize..4, 0usize..3).prop_map(|(start, delete, insert)| ListOp::Splice {
            start,
            delete,
            insert
        }),
    ]
}

/// Applies `op` to the real list and a shadow model, returning the index the
/// mutation reports from (`None` when it must stay silent).
fn apply_list_op(list: &ReactiveList, shadow: &mut Vec<f64>, op: &ListOp) -> Option<usize> {
    match op {
        ListOp::Push(v) => {
            list.push(Value::Num(*v));
            shadow.push(*v);
            Some(shadow.len() - 1)
        }
        ListOp::Pop => {
            list.pop();
            if shadow.is_empty() {
                None
            } else {
                shadow.pop();
                Some(shadow.len())
            }
        }
        ListOp::Shift => {
            list.shift();
            if shadow.is_empty() {
                None
            } else {
                shadow.remove(0);
                Some(0)
            }
        }
        ListOp::Unshift(v) => {
            list.unshift(Value::Num(*v));
            shadow.insert(0, *v);
            Some(0)
        }
        ListOp::Splice {
            start,
            delete,
            insert,
        } => {
            let len = shadow.len();
            let norm = if *start < 0 {
                len.saturating_sub(start.unsigned_abs())
            } else {
                (*start as usize).min(len)
            };
            let del = (*delete).min(len - norm);
            let fill: Vec<f64> = vec![1.0; *insert];
            list.splice(
                *start,
                *delete,
                fill.iter().map(|v| Value::Num(*v)).collect(),
            );
            shadow.splice(norm..norm + del, fill);
            if del > 0 || *insert > 0 {
                Some(norm)
            } else {
                None
            }
        }
    }
}

fn counting_reader(
    counts: &Rc<RefCell<Vec<usize>>>,
    slot: usize,
    key: &'static str,
) -> Evaluator {
    let counts = counts.clone();
    Rc::new(move |scope: &Scope| {
        counts.borrow_mut()[slot] += 1;
        Ok(scope.read(key))
    })
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Enqueue patterns drain once each, sorted by id
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn enqueues_drain_once_each_in_ascending_id_order(
        order in prop::collection::vec(0usize..8, 0..24),
    ) {
        let scheduler = Scheduler::new();
        let scope = Scope::root();
        let log: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let watchers: Vec<_> = (0..8)
            .map(|j| {
                let log = log.clone();
                let eval: Evaluator = Rc::new(move |_: &Scope| {
                    log.borrow_mut().push(j);
                    Ok(Value::Num(j as f64))
                });
                Watcher::new(
                    scope.clone(),
                    eval,
                    Box::new(|_, _| {}),
                    WatcherFlags::empty(),
                    &scheduler,
                    format!("w{j}"),
                )
            })
            .collect();
        log.borrow_mut().clear();

        for &j in &order {
            watchers[j].update();
        }
        scheduler.flush();

        let expected: Vec<usize> = order
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        prop_assert_eq!(log.borrow().clone(), expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Writes wake exactly the changed keys
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn writes_wake_exactly_the_watchers_whose_key_changed(
        writes in prop::collection::vec((0usize..6, 0i64..5), 0..12),
    ) {
        const KEYS: [&str; 6] = ["k0", "k1", "k2", "k3", "k4", "k5"];
        let scheduler = Scheduler::new();
        let scope = Scope::root();
        let mut shadow = [0.0f64; 6];
        for (i, key) in KEYS.iter().enumerate() {
            shadow[i] = (i * 10) as f64;
            scope.frame().set(key, Value::Num(shadow[i]));
        }

        let counts: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(vec![0; 6]));
        let _watchers: Vec<_> = KEYS
            .iter()
            .enumerate()
            .map(|(i, key)| {
                Watcher::new(
                    scope.clone(),
                    counting_reader(&counts, i, key),
                    Box::new(|_, _| {}),
                    WatcherFlags::empty(),
                    &scheduler,
                    *key,
                )
            })
            .collect();
        counts.borrow_mut().iter_mut().for_each(|c| *c = 0);

        let mut dirty = [false; 6];
        for (idx, raw) in &writes {
            let value = *raw as f64;
            scope.frame().set(KEYS[*idx], Value::Num(value));
            if shadow[*idx] != value {
                shadow[*idx] = value;
                dirty[*idx] = true;
            }
        }
        scheduler.flush();

        for i in 0..6 {
            let expected = usize::from(dirty[i]);
            prop_assert_eq!(
                counts.borrow()[i],
                expected,
                "watcher {} expected {} evaluations",
                KEYS[i],
                expected
            );
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Edge sets equal exactly the keys read
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn edge_set_matches_exactly_the_keys_read(first in 0u8..64, second in 0u8..64) {
        const KEYS: [&str; 6] = ["k0", "k1", "k2", "k3", "k4", "k5"];
        let scheduler = Scheduler::new();
        let scope = Scope::root();
        for (i, key) in KEYS.iter().enumerate() {
            scope.frame().set(key, Value::Num(i as f64));
        }

        let mask = Rc::new(Cell::new(first));
        let inner = mask.clone();
        let eval: Evaluator = Rc::new(move |scope: &Scope| {
            let mut sum = 0.0;
            for (i, key) in KEYS.iter().enumerate() {
                if inner.get() & (1 << i) != 0 {
                    sum += scope.read(key).to_number();
                }
            }
            Ok(Value::Num(sum))
        });
        let w = Watcher::new(
            scope,
            eval,
            Box::new(|_, _| {}),
            WatcherFlags::empty(),
            &scheduler,
            "masked sum",
        );

        let expected_keys = |m: u8| -> Vec<String> {
            KEYS.iter()
                .enumerate()
                .filter(|(i, _)| m & (1 << i) != 0)
                .map(|(_, k)| (*k).to_string())
                .collect()
        };
        let edge_names = |w: &Rc<Watcher>| -> Vec<String> {
            let mut names: Vec<String> =
                w.edge_keys().iter().map(|(_, k)| k.to_string()).collect();
            names.sort();
            names
        };

        prop_assert_eq!(edge_names(&w), expected_keys(first));

        mask.set(second);
        w.evaluate();
        prop_assert_eq!(edge_names(&w), expected_keys(second));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. List mutations coalesce from the minimum touched index
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn list_mutations_coalesce_from_the_minimum_index(
        initial_len in 0usize..6,
        ops in prop::collection::vec(arb_list_op(), 0..8),
    ) {
        let scheduler = Scheduler::new();
        let scope = Scope::root();
        let mut shadow: Vec<f64> = (0..initial_len).map(|i| i as f64).collect();
        let list =
            ReactiveList::from_values(shadow.iter().map(|v| Value::Num(*v)).collect());
        scope.frame().set("items", Value::List(list.clone()));

        let index_slots = initial_len + 3;
        let counts: Rc<RefCell<Vec<usize>>> =
            Rc::new(RefCell::new(vec![0; index_slots + 1]));
        let mut watchers = Vec::new();
        for j in 0..index_slots {
            let counts = counts.clone();
            let eval: Evaluator = Rc::new(move |scope: &Scope| {
                counts.borrow_mut()[j] += 1;
                match scope.read("items") {
                    Value::List(l) => Ok(l.get(j)),
                    other => Ok(other),
                }
            });
            watchers.push(Watcher::new(
                scope.clone(),
                eval,
                Box::new(|_, _| {}),
                WatcherFlags::empty(),
                &scheduler,
                format!("items[{j}]"),
            ));
        }
        let len_counts = counts.clone();
        let len_eval: Evaluator = Rc::new(move |scope: &Scope| {
            len_counts.borrow_mut()[index_slots] += 1;
            match scope.read("items") {
                Value::List(l) => Ok(l.get_key("length")),
                other => Ok(other),
            }
        });
        watchers.push(Watcher::new(
            scope.clone(),
            len_eval,
            Box::new(|_, _| {}),
            WatcherFlags::empty(),
            &scheduler,
            "items.length",
        ));
        counts.borrow_mut().iter_mut().for_each(|c| *c = 0);

        let mut min_start: Option<usize> = None;
        for op in &ops {
            if let Some(start) = apply_list_op(&list, &mut shadow, op) {
                min_start = Some(min_start.map_or(start, |m| m.min(start)));
            }
        }
        scheduler.flush();

        prop_assert_eq!(list.len(), shadow.len(), "shadow model diverged");
        for j in 0..index_slots {
            let expected =
                usize::from(min_start.is_some_and(|m| j >= m));
            prop_assert_eq!(
                counts.borrow()[j],
                expected,
                "index watcher {} expected {} evaluations (min start {:?})",
                j,
                expected,
                min_start
            );
        }
        prop_assert_eq!(
            counts.borrow()[index_slots],
            usize::from(min_start.is_some()),
            "length watcher mismatch (min start {:?})",
            min_start
        );
    }
}

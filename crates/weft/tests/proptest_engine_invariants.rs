//! Property-based invariant tests for the engine facade.
//!
//! Verifies guarantees that must hold for any data and any expression an
//! embedding host pushes through an [`Engine`]:
//!
//! 1. Root values survive a set/get round trip.
//! 2. Writer assignments read back through `eval`.
//! 3. Coalesced mutations fire a watcher exactly once per flush.
//! 4. Unwatch succeeds exactly once per id.
//! 5. Destroy empties the registry regardless of watcher count.
//! 6. Arbitrary expression soup never panics through the engine.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use weft::{Engine, ReactiveMap, Value};

// ── Strategy helpers ──────────────────────────────────────────────────

fn arb_soup() -> impl Strategy<Value = String> {
    let chars: Vec<char> = "ab01 .?()[]{}'\"`+-*/%&|^!<>=,;:$_".chars().collect();
    prop::collection::vec(prop::sample::select(chars), 0..24)
        .prop_map(|cs| cs.into_iter().collect())
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        Just(Value::Undefined),
        any::<bool>().prop_map(Value::Bool),
        (-1.0e6f64..1.0e6).prop_map(Value::Num),
        "[a-z0-9]{0,6}".prop_map(|s| Value::str(s)),
    ]
}

/// Root names that cannot collide with expression keywords.
fn arb_name() -> impl Strategy<Value = String> {
    "[a-z]{1,8}".prop_filter("keyword", |s| {
        !matches!(
            s.as_str(),
            "true" | "false" | "null" | "undefined" | "this" | "new" | "delete" | "typeof"
                | "void" | "in" | "instanceof"
        )
    })
}

// ═════════════════════════════════════════════════════════════════════════
// Root data and writers
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn root_values_round_trip(name in arb_name(), value in arb_scalar()) {
        let engine = Engine::new();
        engine.set(&name, value.clone());
        prop_assert_eq!(&engine.get_value(&name), &value);
    }

    #[test]
    fn writer_assignments_read_back(name in arb_name(), value in arb_scalar()) {
        let engine = Engine::new();
        engine.set(&name, Value::Map(ReactiveMap::new()));
        let path = format!("{name}.slot");
        let stored = engine.assign(&path, value.clone()).unwrap();
        prop_assert_eq!(&stored, &value);
        prop_assert_eq!(&engine.eval(&path).unwrap(), &value);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Watcher lifecycle
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn coalesced_mutations_fire_once_per_flush(
        name in arb_name(),
        values in prop::collection::vec(0u32..1000, 1..8),
    ) {
        let engine = Engine::new();
        engine.set(&name, Value::Num(-1.0));
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        engine
            .watch(&name, move |new, _| sink.borrow_mut().push(new.clone()))
            .unwrap();

        for v in &values {
            engine.set(&name, Value::Num(f64::from(*v)));
        }
        engine.settle();

        let last = Value::Num(f64::from(*values.last().unwrap()));
        prop_assert_eq!(&*seen.borrow(), &vec![last]);
    }

    #[test]
    fn unwatch_succeeds_exactly_once(name in arb_name(), extra in 0usize..4) {
        let engine = Engine::new();
        engine.set(&name, Value::Num(0.0));
        let mut ids = Vec::new();
        for _ in 0..=extra {
            ids.push(engine.watch(&name, |_, _| {}).unwrap());
        }
        for id in &ids {
            prop_assert!(engine.unwatch(*id));
            prop_assert!(!engine.unwatch(*id));
        }
        prop_assert_eq!(engine.watcher_count(), 0);
    }

    #[test]
    fn destroy_always_empties_the_registry(count in 0usize..6) {
        let engine = Engine::new();
        engine.set("n", Value::Num(0.0));
        for i in 0..count {
            let expr = format!("n + {i}");
            engine.watch(&expr, |_, _| {}).unwrap();
        }
        engine.destroy();
        prop_assert_eq!(engine.watcher_count(), 0);

        engine.set("n", Value::Num(9.0));
        engine.settle();
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Robustness: malformed input must not panic
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn engine_survives_expression_soup(src in arb_soup()) {
        let engine = Engine::new();
        let _ = engine.eval(&src);
        let _ = engine.watch(&src, |_, _| {});
        let _ = engine.assign(&src, Value::Num(1.0));
        engine.settle();
        engine.destroy();
    }
}

//! Property-based invariant tests for expression compilation.
//!
//! Verifies guarantees that must hold for any text a template might hand
//! the compiler:
//!
//! 1. Compiling arbitrary character soup never panics.
//! 2. Programs compiled from soup evaluate without panicking.
//! 3. Loop headers parse and iterate without panicking.
//! 4. Numeric literals evaluate to themselves.
//! 5. Arithmetic and comparisons mirror float semantics.
//! 6. Ternaries always pick an arm.
//! 7. Safe chains never error on scalar bases.
//! 8. Recompiling shares the cached program.
//! 9. Writers store scalars verbatim.

use proptest::prelude::*;
use weft_core::value::format_number;
use weft_core::{ReactiveList, ReactiveMap, Scope, Value};
use weft_expr::Compiler;

// ── Strategy helpers ──────────────────────────────────────────────────

fn arb_soup() -> impl Strategy<Value = String> {
    let chars: Vec<char> = "ab01 .?()[]{}'\"`+-*/%&|^!<>=,;:$_".chars().collect();
    prop::collection::vec(prop::sample::select(chars), 0..24)
        .prop_map(|cs| cs.into_iter().collect())
}

fn arb_header() -> impl Strategy<Value = String> {
    let words = vec![
        "k", "v, i", "x", "=", "in", "of", "to", "step", "1", "3", "items", "a.b", "'q in q'",
    ];
    prop::collection::vec(prop::sample::select(words), 1..6).prop_map(|ws| ws.join(" "))
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

/// Scope names that cannot collide with expression keywords.
fn arb_name() -> impl Strategy<Value = String> {
    "[a-z]{1,8}".prop_filter("keyword", |s| {
        !matches!(
            s.as_str(),
            "true" | "false" | "null" | "undefined" | "this" | "new" | "delete" | "typeof"
                | "void" | "in" | "instanceof"
        )
    })
}

fn sample_scope() -> Scope {
    let map = ReactiveMap::new();
    map.set("a", Value::Map(ReactiveMap::new()));
    map.set("b", Value::List(ReactiveList::new()));
    map.set("x", Value::Num(7.0));
    Scope::with_frame(map)
}

// ═════════════════════════════════════════════════════════════════════════
// Robustness: malformed input must not panic
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn compiling_soup_never_panics(src in arb_soup()) {
        let compiler = Compiler::new();
        let _ = compiler.compile_reader(&src, &[]);
        let _ = compiler.compile_writer(&src);
        let _ = compiler.compile_handler(&src);
        let _ = compiler.compile_delimiter_template(&src);
    }

    #[test]
    fn soup_programs_evaluate_without_panicking(src in arb_soup()) {
        let compiler = Compiler::new();
        if let Ok(reader) = compiler.compile_reader(&src, &[]) {
            let _ = reader.evaluate(&sample_scope());
        }
    }

    #[test]
    fn loop_headers_parse_and_iterate_without_panicking(header in arb_header()) {
        let compiler = Compiler::new();
        if let Ok(parsed) = compiler.parse_loop_header(&header) {
            let scope = sample_scope();
            if let Ok(items) = parsed.items(&scope) {
                for item in &items {
                    let _ = parsed.bind(&scope.child(), item);
                }
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Numeric semantics
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn numeric_literals_evaluate_to_themselves(n in 0.0f64..1.0e9) {
        let compiler = Compiler::new();
        let reader = compiler.compile_reader(&format_number(n), &[]).unwrap();
        let scope = Scope::with_frame(ReactiveMap::new());
        prop_assert_eq!(reader.evaluate(&scope).unwrap(), Value::Num(n));
    }

    #[test]
    fn addition_matches_float_semantics(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
        let compiler = Compiler::new();
        let src = format!("({}) + ({})", format_number(a), format_number(b));
        let reader = compiler.compile_reader(&src, &[]).unwrap();
        let scope = Scope::with_frame(ReactiveMap::new());
        prop_assert_eq!(reader.evaluate(&scope).unwrap(), Value::Num(a + b));
    }

    #[test]
    fn comparisons_mirror_numeric_order(a in -1.0e6f64..1.0e6, b in -1.0e6f64..1.0e6) {
        let compiler = Compiler::new();
        let src = format!("({}) < ({})", format_number(a), format_number(b));
        let reader = compiler.compile_reader(&src, &[]).unwrap();
        let scope = Scope::with_frame(ReactiveMap::new());
        prop_assert_eq!(reader.evaluate(&scope).unwrap(), Value::Bool(a < b));
    }

    #[test]
    fn ternaries_always_pick_an_arm(flag in any::<bool>()) {
        let compiler = Compiler::new();
        let reader = compiler.compile_reader("flag ? 'y' : 'n'", &[]).unwrap();
        let map = ReactiveMap::new();
        map.set("flag", Value::Bool(flag));
        let scope = Scope::with_frame(map);
        let expected = if flag { "y" } else { "n" };
        prop_assert_eq!(reader.evaluate(&scope).unwrap(), Value::str(expected));
    }

    #[test]
    fn safe_chains_never_error_on_scalar_bases(base in arb_scalar()) {
        let compiler = Compiler::new();
        let reader = compiler.compile_reader("x?.p?.q", &[]).unwrap();
        let map = ReactiveMap::new();
        map.set("x", base);
        let scope = Scope::with_frame(map);
        prop_assert!(reader.evaluate(&scope).is_ok());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Caching and writers
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn recompiling_shares_the_cached_program(name in arb_name()) {
        let compiler = Compiler::new();
        let first = compiler.compile_reader(&name, &[]).unwrap();
        let second = compiler.compile_reader(&name, &[]).unwrap();
        prop_assert!(first.ptr_eq(&second));
    }

    #[test]
    fn writers_store_scalars_verbatim(name in arb_name(), value in arb_scalar()) {
        let compiler = Compiler::new();
        let writer = compiler.compile_writer(&name).unwrap();
        let scope = Scope::with_frame(ReactiveMap::new());
        writer.assign(&scope, value.clone()).unwrap();
        prop_assert_eq!(scope.read(&name), value);
    }
}

//! Property-based invariant tests for value coercion and equality.
//!
//! Verifies guarantees that must hold for any value the expression layer can
//! produce:
//!
//! 1. Loose equality is symmetric.
//! 2. Every generated scalar loose-equals a clone of itself.
//! 3. Strict identity implies loose equality.
//! 4. Display/parse round-trips every finite number.
//! 5. Integer-valued numbers display without a decimal point.
//! 6. A number loose-equals its own display string.
//! 7. Numeric truthiness follows the zero/NaN rule.
//! 8. Hex strings coerce to their numeric value.

use proptest::prelude::*;
use weft_core::value::{format_number, parse_number};
use weft_core::Value;

// ── Strategy helpers ──────────────────────────────────────────────────

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        Just(Value::Undefined),
        any::<bool>().prop_map(Value::Bool),
        (-1.0e6f64..1.0e6).prop_map(Value::Num),
        "[a-z0-9]{0,6}".prop_map(|s| Value::str(s)),
    ]
}

fn arb_number() -> impl Strategy<Value = f64> {
    prop_oneof![
        (-1.0e6f64..1.0e6),
        Just(0.0),
        Just(-0.0),
        Just(f64::NAN),
        Just(f64::INFINITY),
    ]
}

// ═════════════════════════════════════════════════════════════════════════
// Equality
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn loose_equality_is_symmetric(a in arb_scalar(), b in arb_scalar()) {
        prop_assert_eq!(a.loose_eq(&b), b.loose_eq(&a));
    }

    #[test]
    fn scalars_loose_equal_their_own_clone(a in arb_scalar()) {
        prop_assert!(a.loose_eq(&a.clone()));
    }

    #[test]
    fn strict_identity_implies_loose_equality(a in arb_scalar(), b in arb_scalar()) {
        prop_assert!(!a.identical(&b) || a.loose_eq(&b));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Numeric display and parsing
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn display_round_trips_finite_numbers(n in -9.0e15f64..9.0e15) {
        prop_assert_eq!(parse_number(&format_number(n)), n);
    }

    #[test]
    fn integer_display_has_no_decimal_point(i in -1_000_000_000i64..1_000_000_000) {
        let shown = format_number(i as f64);
        prop_assert_eq!(&shown, &i.to_string());
        prop_assert!(!shown.contains('.'));
    }

    #[test]
    fn a_number_loose_equals_its_display_string(n in -1.0e6f64..1.0e6) {
        let as_string = Value::str(format_number(n));
        prop_assert!(Value::Num(n).loose_eq(&as_string));
    }

    #[test]
    fn numeric_truthiness_follows_the_zero_nan_rule(n in arb_number()) {
        let expected = n != 0.0 && !n.is_nan();
        prop_assert_eq!(Value::Num(n).is_truthy(), expected);
    }

    #[test]
    fn hex_strings_coerce_to_their_numeric_value(v in 0u32..0xFFFF) {
        prop_assert_eq!(parse_number(&format!("0x{v:x}")), f64::from(v));
        prop_assert_eq!(parse_number(&format!("0X{v:X}")), f64::from(v));
    }
}

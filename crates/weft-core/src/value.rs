//! Dynamic value model for expression evaluation.
//!
//! Every value an expression can produce or a scope can hold is a [`Value`].
//! Mappings and sequences appear only as reactive handles
//! ([`ReactiveMap`]/[`ReactiveList`]); there is no raw container variant, so
//! every structural read and write flows through the interception layer.
//!
//! # Design
//!
//! - `Null` and `Undefined` are distinct: safe navigation yields `Undefined`,
//!   while `Null` is an ordinary user-assignable value. Both are nullish.
//! - [`Value::identical`] is the strict comparison used for write suppression
//!   and handler firing: NaN is not identical to NaN, strings compare by
//!   content, handles and functions by pointer.
//! - [`Value::loose_eq`] backs the `==`/`!=` operators with the usual
//!   null/undefined unification and numeric/string coercion.
//! - Member access helpers live here so the op-list evaluator has a single
//!   dispatch point; they delegate to the reactive handles, which record
//!   dependency edges whenever a watcher is actively evaluating.

use std::fmt;
use std::rc::Rc;

use crate::error::EvalError;
use crate::reactive::{ReactiveList, ReactiveMap};

/// A dynamically typed runtime value.
#[derive(Clone, Default)]
pub enum Value {
    /// Explicit user-level "no value".
    Null,
    /// Absence of a value: unresolved reads, short-circuited safe chains.
    #[default]
    Undefined,
    Bool(bool),
    Num(f64),
    Str(Rc<str>),
    /// Reactive ordered sequence; cloning shares the underlying target.
    List(ReactiveList),
    /// Reactive insertion-ordered mapping; cloning shares the target.
    Map(ReactiveMap),
    /// Host-provided callable; compared by pointer identity.
    Func(NativeFunc),
}

/// A callable provided by the host (builtins, registered helpers).
#[derive(Clone)]
pub struct NativeFunc {
    name: Rc<str>,
    f: Rc<dyn Fn(&[Value]) -> Result<Value, EvalError>>,
}

impl NativeFunc {
    pub fn new(
        name: impl Into<Rc<str>>,
        f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Rc::new(f),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.f)(args)
    }

    /// Identity comparison; two handles to the same closure are identical.
    #[must_use]
    pub fn ptr_eq(&self, other: &NativeFunc) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for NativeFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunc")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Value {
    /// Shorthand for building a string value.
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(_) | Value::Map(_) | Value::Func(_) => true,
        }
    }

    /// Diagnostic type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Func(_) => "function",
        }
    }

    /// Tag returned by the `typeof` operator. `Null` reports `"object"`.
    #[must_use]
    pub fn typeof_tag(&self) -> &'static str {
        match self {
            Value::Null | Value::List(_) | Value::Map(_) => "object",
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Func(_) => "function",
        }
    }

    /// Strict identity: the comparison behind write suppression and handler
    /// firing. NaN is never identical to anything, including itself.
    #[must_use]
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Func(a), Value::Func(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Loose equality backing the `==` operator: nullish values unify,
    /// numbers and strings cross-coerce, booleans coerce to numbers,
    /// containers coerce through their display form.
    #[must_use]
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null | Value::Undefined, Value::Null | Value::Undefined) => true,
            (Value::Bool(b), _) => Value::Num(f64::from(*b)).loose_eq(other),
            (_, Value::Bool(b)) => self.loose_eq(&Value::Num(f64::from(*b))),
            (Value::Num(n), Value::Str(_)) => *n == other.to_number(),
            (Value::Str(_), Value::Num(n)) => self.to_number() == *n,
            (Value::List(_) | Value::Map(_), Value::Str(_) | Value::Num(_)) => {
                Value::str(self.to_display()).loose_eq(other)
            }
            (Value::Str(_) | Value::Num(_), Value::List(_) | Value::Map(_)) => {
                other.loose_eq(self)
            }
            _ => self.identical(other),
        }
    }

    /// Numeric coercion: `Null` → 0, `Undefined` → NaN, strings parse
    /// (decimal or `0x` hex, empty/whitespace → 0), containers coerce
    /// through their display form.
    #[must_use]
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Undefined | Value::Map(_) | Value::Func(_) => f64::NAN,
            Value::Bool(b) => f64::from(*b),
            Value::Num(n) => *n,
            Value::Str(s) => parse_number(s),
            Value::List(_) => parse_number(&self.to_display()),
        }
    }

    /// Human-readable form used by string coercion, template interpolation
    /// and list joining.
    #[must_use]
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Undefined => "undefined".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::List(l) => l.join(","),
            Value::Map(_) => "[object Object]".to_string(),
            Value::Func(f) => format!("function {}() {{ [native code] }}", f.name()),
        }
    }

    /// Named member read. Nullish bases error; scalar bases yield
    /// `Undefined` for unknown names. Records a dependency edge when a
    /// watcher is evaluating.
    pub fn get_member(&self, name: &str) -> Result<Value, EvalError> {
        match self {
            Value::Null | Value::Undefined => Err(EvalError::NilAccess {
                key: name.to_string(),
            }),
            Value::Map(m) => Ok(m.get(name)),
            Value::List(l) => Ok(l.get_key(name)),
            Value::Str(s) => Ok(string_member(s, name)),
            Value::Bool(_) | Value::Num(_) | Value::Func(_) => Ok(Value::Undefined),
        }
    }

    /// Computed member read (`base[index]`). Numeric indices address
    /// sequence elements; everything else behaves like a named read of the
    /// index's display form.
    pub fn get_index(&self, index: &Value) -> Result<Value, EvalError> {
        match (self, index) {
            (Value::List(l), Value::Num(n)) if is_index(*n) => Ok(l.get(*n as usize)),
            (Value::Str(s), Value::Num(n)) if is_index(*n) => {
                Ok(string_char_at(s, *n as usize))
            }
            _ => self.get_member(&index.to_display()),
        }
    }

    /// Named member write. Writes to scalars are silently dropped; writes
    /// through a nullish base error.
    pub fn set_member(&self, name: &str, value: Value) -> Result<(), EvalError> {
        match self {
            Value::Null | Value::Undefined => Err(EvalError::NilAccess {
                key: name.to_string(),
            }),
            Value::Map(m) => {
                m.set(name, value);
                Ok(())
            }
            Value::List(l) => {
                l.set_key(name, value);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn set_index(&self, index: &Value, value: Value) -> Result<(), EvalError> {
        match (self, index) {
            (Value::List(l), Value::Num(n)) if is_index(*n) => {
                l.set(*n as usize, value);
                Ok(())
            }
            _ => self.set_member(&index.to_display(), value),
        }
    }

    /// Presence check backing the `in` operator. Errors on nullish bases.
    /// Records a dependency edge when a watcher is evaluating.
    pub fn has_member(&self, name: &str) -> Result<bool, EvalError> {
        match self {
            Value::Null | Value::Undefined => Err(EvalError::NilAccess {
                key: name.to_string(),
            }),
            Value::Map(m) => Ok(m.has(name)),
            Value::List(l) => Ok(l.has_key(name)),
            Value::Str(s) => Ok(name == "length" || index_of_key(name, s.chars().count()).is_some()),
            _ => Ok(false),
        }
    }

    /// Member removal backing the `delete` operator. Deleting a sequence
    /// index leaves a hole rather than shifting later elements.
    pub fn delete_member(&self, name: &str) -> Result<(), EvalError> {
        match self {
            Value::Null | Value::Undefined => Err(EvalError::NilAccess {
                key: name.to_string(),
            }),
            Value::Map(m) => {
                m.delete(name);
                Ok(())
            }
            Value::List(l) => {
                l.delete_key(name);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Invokes the value as a function.
    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        match self {
            Value::Func(f) => f.call(args),
            other => Err(EvalError::NotCallable {
                found: other.type_name(),
            }),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Undefined => f.write_str("Undefined"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Num(n) => write!(f, "Num({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(l) => write!(f, "List(len={})", l.len()),
            Value::Map(m) => write!(f, "Map(len={})", m.len()),
            Value::Func(func) => write!(f, "Func({})", func.name()),
        }
    }
}

/// Equality is strict identity; use [`Value::loose_eq`] for `==` semantics.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.identical(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Num(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Num(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<Rc<str>> for Value {
    fn from(s: Rc<str>) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(ReactiveList::from_values(items))
    }
}

impl From<ReactiveMap> for Value {
    fn from(map: ReactiveMap) -> Self {
        Value::Map(map)
    }
}

impl From<ReactiveList> for Value {
    fn from(list: ReactiveList) -> Self {
        Value::List(list)
    }
}

impl From<NativeFunc> for Value {
    fn from(f: NativeFunc) -> Self {
        Value::Func(f)
    }
}

/// Formats a number the way expressions stringify them: integers without a
/// decimal point, `NaN`/`Infinity` spelled out.
#[must_use]
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// String-to-number coercion: trimmed, empty → 0, `0x` hex accepted,
/// otherwise a full decimal parse or NaN.
#[must_use]
pub fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return match i64::from_str_radix(hex, 16) {
            Ok(v) => v as f64,
            Err(_) => f64::NAN,
        };
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => t.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// True when `n` is usable as a sequence index.
fn is_index(n: f64) -> bool {
    n >= 0.0 && n.fract() == 0.0 && n <= usize::MAX as f64
}

/// Parses a member name as a sequence index. Only canonical decimal
/// spellings address slots; "01" and "-1" are ordinary names.
pub(crate) fn parse_index_key(name: &str) -> Option<usize> {
    let idx: usize = name.parse().ok()?;
    (idx.to_string() == name).then_some(idx)
}

/// Like [`parse_index_key`], additionally bounded by `len`.
pub(crate) fn index_of_key(name: &str, len: usize) -> Option<usize> {
    parse_index_key(name).filter(|idx| *idx < len)
}

fn string_member(s: &str, name: &str) -> Value {
    if name == "length" {
        return Value::Num(s.chars().count() as f64);
    }
    match name.parse::<usize>() {
        Ok(idx) => string_char_at(s, idx),
        Err(_) => Value::Undefined,
    }
}

fn string_char_at(s: &str, idx: usize) -> Value {
    match s.chars().nth(idx) {
        Some(c) => Value::str(c.to_string()),
        None => Value::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_not_identical_to_itself() {
        let nan = Value::Num(f64::NAN);
        assert!(!nan.identical(&nan), "NaN must not suppress writes");
    }

    #[test]
    fn strings_are_identical_by_content() {
        assert!(Value::str("abc").identical(&Value::str(String::from("abc"))));
    }

    #[test]
    fn handles_are_identical_by_pointer() {
        let a = ReactiveMap::new();
        let b = a.clone();
        assert!(Value::Map(a.clone()).identical(&Value::Map(b)));
        assert!(!Value::Map(a).identical(&Value::Map(ReactiveMap::new())));
    }

    #[test]
    fn nullish_values_unify_loosely_but_not_strictly() {
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.identical(&Value::Undefined));
        assert!(!Value::Null.loose_eq(&Value::Num(0.0)));
    }

    #[test]
    fn loose_eq_coerces_numbers_and_strings() {
        assert!(Value::Num(5.0).loose_eq(&Value::str("5")));
        assert!(Value::Bool(true).loose_eq(&Value::str("1")));
        assert!(!Value::Num(5.0).loose_eq(&Value::str("5x")));
    }

    #[test]
    fn truthiness_follows_the_usual_falsy_set() {
        for falsy in [
            Value::Null,
            Value::Undefined,
            Value::Bool(false),
            Value::Num(0.0),
            Value::Num(f64::NAN),
            Value::str(""),
        ] {
            assert!(!falsy.is_truthy(), "{falsy:?} should be falsy");
        }
        assert!(Value::Num(-1.0).is_truthy());
        assert!(Value::str("0").is_truthy());
        assert!(Value::Map(ReactiveMap::new()).is_truthy());
    }

    #[test]
    fn display_prints_integers_without_decimal_point() {
        assert_eq!(Value::Num(3.0).to_display(), "3");
        assert_eq!(Value::Num(3.5).to_display(), "3.5");
        assert_eq!(Value::Num(-0.0).to_display(), "0");
        assert_eq!(Value::Num(f64::NAN).to_display(), "NaN");
        assert_eq!(Value::Num(f64::INFINITY).to_display(), "Infinity");
    }

    #[test]
    fn to_number_parses_hex_and_treats_blank_as_zero() {
        assert_eq!(Value::str("0x10").to_number(), 16.0);
        assert_eq!(Value::str("  ").to_number(), 0.0);
        assert_eq!(Value::str("2.5").to_number(), 2.5);
        assert!(Value::str("two").to_number().is_nan());
        assert!(Value::Undefined.to_number().is_nan());
        assert_eq!(Value::Null.to_number(), 0.0);
    }

    #[test]
    fn member_access_through_nullish_base_errors() {
        let err = Value::Null.get_member("x").unwrap_err();
        assert_eq!(
            err,
            EvalError::NilAccess {
                key: "x".to_string()
            }
        );
    }

    #[test]
    fn scalar_member_reads_yield_undefined() {
        assert!(matches!(
            Value::Num(3.0).get_member("x"),
            Ok(Value::Undefined)
        ));
        assert_eq!(Value::str("abc").get_member("length").unwrap(), Value::Num(3.0));
        assert_eq!(Value::str("abc").get_member("1").unwrap(), Value::str("b"));
    }

    #[test]
    fn index_keys_must_be_canonical_decimal() {
        assert_eq!(index_of_key("2", 5), Some(2));
        assert_eq!(index_of_key("02", 5), None);
        assert_eq!(index_of_key("7", 5), None);
        assert_eq!(index_of_key("-1", 5), None);
    }
}

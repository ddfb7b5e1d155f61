//! Builtin globals and method dispatch.
//!
//! The global namespaces (`Math`, `JSON`) are inert maps: they resolve like
//! any other member access but never mint observers, so reading `Math.floor`
//! inside a watcher records no edge. The table is built once per thread and
//! handles are shared, so repeated reads of the same global stay identical
//! and never look like a change.
//!
//! `JSON.stringify` deliberately walks containers through their reactive
//! handles: stringifying a tracked map inside a watcher records an edge on
//! every reachable key, which is the cheapest way to express a deep watch.

use std::cell::{Cell, OnceCell};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::EvalError;
use crate::reactive::{ReactiveList, ReactiveMap};
use crate::value::{format_number, NativeFunc, Value};

thread_local! {
    static GLOBALS: OnceCell<HashMap<&'static str, Value>> = const { OnceCell::new() };
    static RNG_STATE: Cell<u64> = const { Cell::new(0) };
}

/// Names the expression tokenizer classifies as keyword functions.
#[must_use]
pub fn is_global(name: &str) -> bool {
    matches!(
        name,
        "Math"
            | "JSON"
            | "Number"
            | "String"
            | "Boolean"
            | "parseInt"
            | "parseFloat"
            | "isNaN"
            | "isFinite"
    )
}

/// Resolves a builtin global to its shared per-thread handle.
#[must_use]
pub fn global(name: &str) -> Option<Value> {
    GLOBALS.with(|cell| cell.get_or_init(build_globals).get(name).cloned())
}

/// Invokes `name` as a method of `recv`. Sequence, string and number
/// methods dispatch natively; everything else falls through to a member
/// read followed by a call, so user functions stored on maps keep working.
pub fn call_method(recv: &Value, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match recv {
        Value::List(list) => list_method(list, name, args),
        Value::Str(s) => str_method(s, name, args),
        Value::Num(n) if name == "toFixed" => Ok(num_to_fixed(*n, args)),
        _ => generic_call(recv, name, args),
    }
}

/// True when a method call on `recv` with this name would dispatch, either
/// natively or to a stored function member. Safe calls bail out to
/// `Undefined` instead of erroring when this is false.
#[must_use]
pub fn has_method(recv: &Value, name: &str) -> bool {
    const LIST_METHODS: [&str; 10] = [
        "push", "pop", "shift", "unshift", "splice", "sort", "indexOf", "includes", "join",
        "slice",
    ];
    const STR_METHODS: [&str; 7] = [
        "trim", "toUpperCase", "toLowerCase", "slice", "indexOf", "includes", "split",
    ];
    match recv {
        Value::List(_) if LIST_METHODS.contains(&name) => true,
        Value::Str(_) if STR_METHODS.contains(&name) => true,
        Value::Num(_) if name == "toFixed" => true,
        _ => matches!(recv.get_member(name), Ok(Value::Func(_))),
    }
}

fn build_globals() -> HashMap<&'static str, Value> {
    let mut g = HashMap::new();
    g.insert("Math", math_namespace());
    g.insert("JSON", json_namespace());
    g.insert(
        "Number",
        func("Number", |args| {
            Ok(Value::Num(args.first().map_or(0.0, Value::to_number)))
        }),
    );
    g.insert(
        "String",
        func("String", |args| {
            Ok(Value::str(
                args.first().map_or_else(String::new, Value::to_display),
            ))
        }),
    );
    g.insert(
        "Boolean",
        func("Boolean", |args| {
            Ok(Value::Bool(args.first().is_some_and(Value::is_truthy)))
        }),
    );
    g.insert("parseInt", func("parseInt", |args| Ok(Value::Num(parse_int(args)))));
    g.insert(
        "parseFloat",
        func("parseFloat", |args| Ok(Value::Num(parse_float(args)))),
    );
    g.insert(
        "isNaN",
        func("isNaN", |args| {
            Ok(Value::Bool(
                args.first().map_or(f64::NAN, Value::to_number).is_nan(),
            ))
        }),
    );
    g.insert(
        "isFinite",
        func("isFinite", |args| {
            Ok(Value::Bool(
                args.first().map_or(f64::NAN, Value::to_number).is_finite(),
            ))
        }),
    );
    g
}

fn func(
    name: &'static str,
    f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
) -> Value {
    Value::Func(NativeFunc::new(name, f))
}

fn math_namespace() -> Value {
    let m = ReactiveMap::inert();
    m.set("floor", unary("floor", f64::floor));
    m.set("ceil", unary("ceil", f64::ceil));
    m.set("round", unary("round", js_round));
    m.set("abs", unary("abs", f64::abs));
    m.set("sqrt", unary("sqrt", f64::sqrt));
    m.set(
        "min",
        func("min", |args| Ok(Value::Num(fold_extreme(args, true)))),
    );
    m.set(
        "max",
        func("max", |args| Ok(Value::Num(fold_extreme(args, false)))),
    );
    m.set(
        "pow",
        func("pow", |args| {
            let base = args.first().map_or(f64::NAN, Value::to_number);
            let exp = args.get(1).map_or(f64::NAN, Value::to_number);
            Ok(Value::Num(base.powf(exp)))
        }),
    );
    m.set("random", func("random", |_| Ok(Value::Num(next_random()))));
    Value::Map(m)
}

fn json_namespace() -> Value {
    let m = ReactiveMap::inert();
    m.set(
        "stringify",
        func("stringify", |args| {
            stringify(args.first().unwrap_or(&Value::Undefined))
        }),
    );
    Value::Map(m)
}

fn unary(name: &'static str, f: fn(f64) -> f64) -> Value {
    func(name, move |args| {
        Ok(Value::Num(f(args.first().map_or(f64::NAN, Value::to_number))))
    })
}

/// Half-up rounding: `-2.5` rounds to `-2`, not away from zero.
fn js_round(n: f64) -> f64 {
    if n.is_finite() {
        (n + 0.5).floor()
    } else {
        n
    }
}

fn fold_extreme(args: &[Value], min: bool) -> f64 {
    let mut best = if min { f64::INFINITY } else { f64::NEG_INFINITY };
    for arg in args {
        let n = arg.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        if (min && n < best) || (!min && n > best) {
            best = n;
        }
    }
    best
}

/// splitmix64 over a per-thread counter, seeded from the clock on first use.
fn next_random() -> f64 {
    RNG_STATE.with(|state| {
        let mut s = state.get();
        if s == 0 {
            s = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9e37_79b9_7f4a_7c15)
                | 1;
        }
        s = s.wrapping_add(0x9e37_79b9_7f4a_7c15);
        state.set(s);
        let mut z = s;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        // 53 significant bits, uniform in [0, 1).
        (z >> 11) as f64 / (1u64 << 53) as f64
    })
}

fn stringify(value: &Value) -> Result<Value, EvalError> {
    if matches!(value, Value::Undefined | Value::Func(_)) {
        return Ok(Value::Undefined);
    }
    let mut out = String::new();
    let mut visited = Vec::new();
    write_json(value, &mut out, &mut visited)?;
    Ok(Value::str(out))
}

fn write_json(value: &Value, out: &mut String, visited: &mut Vec<usize>) -> Result<(), EvalError> {
    match value {
        Value::Null | Value::Undefined | Value::Func(_) => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Num(n) => {
            if n.is_finite() {
                out.push_str(&format_number(*n));
            } else {
                out.push_str("null");
            }
        }
        Value::Str(s) => write_json_string(s, out),
        Value::List(list) => {
            let addr = list.addr();
            if visited.contains(&addr) {
                return Err(EvalError::native("converting circular structure to JSON"));
            }
            visited.push(addr);
            out.push('[');
            let len = list.get_key("length").to_number() as usize;
            for i in 0..len {
                if i > 0 {
                    out.push(',');
                }
                write_json(&list.get(i), out, visited)?;
            }
            out.push(']');
            visited.pop();
        }
        Value::Map(map) => {
            let addr = map.addr();
            if visited.contains(&addr) {
                return Err(EvalError::native("converting circular structure to JSON"));
            }
            visited.push(addr);
            out.push('{');
            let mut first = true;
            for key in map.keys() {
                let entry = map.get(&key);
                // Skipped entries still recorded an edge above.
                if matches!(entry, Value::Undefined | Value::Func(_)) {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                write_json_string(&key, out);
                out.push(':');
                write_json(&entry, out, visited)?;
            }
            out.push('}');
            visited.pop();
        }
    }
    Ok(())
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn parse_int(args: &[Value]) -> f64 {
    let text = args.first().map_or_else(String::new, Value::to_display);
    let t = text.trim();
    let radix = match args.get(1).map(Value::to_number) {
        Some(r) if r.is_finite() && r != 0.0 => r as u32,
        _ => 0,
    };
    if radix != 0 && !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let (neg, rest) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let (radix, rest) = if (radix == 0 || radix == 16)
        && (rest.starts_with("0x") || rest.starts_with("0X"))
    {
        (16, &rest[2..])
    } else if radix == 0 {
        (10, rest)
    } else {
        (radix, rest)
    };
    let mut n = f64::NAN;
    for c in rest.chars() {
        let Some(digit) = c.to_digit(radix) else {
            break;
        };
        let acc = if n.is_nan() { 0.0 } else { n };
        n = acc * f64::from(radix) + f64::from(digit);
    }
    if neg {
        -n
    } else {
        n
    }
}

/// Longest numeric prefix, the way a lenient form field would read it.
fn parse_float(args: &[Value]) -> f64 {
    let text = args.first().map_or_else(String::new, Value::to_display);
    let t = text.trim_start();
    let (neg, rest) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    if rest.starts_with("Infinity") {
        return if neg { f64::NEG_INFINITY } else { f64::INFINITY };
    }
    let bytes = rest.as_bytes();
    let mut i = 0;
    let mut digits = false;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits = true;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
            digits = true;
        }
    }
    if !digits {
        return f64::NAN;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    let n: f64 = rest[..i].parse().unwrap_or(f64::NAN);
    if neg {
        -n
    } else {
        n
    }
}

fn num_to_fixed(n: f64, args: &[Value]) -> Value {
    let requested = args.first().map_or(0.0, Value::to_number);
    let digits = if requested.is_finite() && requested > 0.0 {
        (requested as usize).min(100)
    } else {
        0
    };
    if n.is_finite() {
        Value::str(format!("{n:.digits$}"))
    } else {
        Value::str(format_number(n))
    }
}

fn list_method(list: &ReactiveList, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "push" => {
            let mut len = list.len();
            for arg in args {
                len = list.push(arg.clone());
            }
            Ok(Value::Num(len as f64))
        }
        "pop" => Ok(list.pop()),
        "shift" => Ok(list.shift()),
        "unshift" => {
            // Prepend as a block: unshift(a, b) yields [a, b, ...rest].
            for arg in args.iter().rev() {
                list.unshift(arg.clone());
            }
            Ok(Value::Num(list.len() as f64))
        }
        "splice" => {
            let start = to_index(args.first());
            let delete = match args.get(1) {
                Some(v) => {
                    let n = v.to_number();
                    if n.is_nan() || n < 0.0 {
                        0
                    } else {
                        n as usize
                    }
                }
                None => list.len(),
            };
            let insert: Vec<Value> = args.iter().skip(2).cloned().collect();
            Ok(Value::List(list.splice(start, delete, insert)))
        }
        "sort" => {
            let cmp = match args.first() {
                Some(Value::Func(f)) => Some(f.clone()),
                _ => None,
            };
            list.sort(cmp.as_ref())?;
            Ok(Value::List(list.clone()))
        }
        "indexOf" => {
            let needle = args.first().cloned().unwrap_or_default();
            Ok(Value::Num(list.index_of(&needle).map_or(-1.0, |i| i as f64)))
        }
        "includes" => {
            let needle = args.first().cloned().unwrap_or_default();
            Ok(Value::Bool(list.includes(&needle)))
        }
        "join" => {
            let sep = match args.first() {
                Some(v) if !v.is_nullish() => v.to_display(),
                _ => ",".to_string(),
            };
            Ok(Value::str(list.join(&sep)))
        }
        "slice" => {
            let start = to_index(args.first());
            let end = match args.get(1) {
                Some(v) if !v.is_nullish() => Some(to_index(Some(v))),
                _ => None,
            };
            Ok(Value::List(list.slice(start, end)))
        }
        _ => generic_call(&Value::List(list.clone()), name, args),
    }
}

fn str_method(s: &Rc<str>, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    match name {
        "trim" => Ok(Value::str(s.trim())),
        "toUpperCase" => Ok(Value::str(s.to_uppercase())),
        "toLowerCase" => Ok(Value::str(s.to_lowercase())),
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len();
            let from = clamp_char_bound(to_index(args.first()), len);
            let to = match args.get(1) {
                Some(v) if !v.is_nullish() => clamp_char_bound(to_index(Some(v)), len),
                _ => len,
            };
            let out: String = chars[from..to.max(from)].iter().collect();
            Ok(Value::str(out))
        }
        "indexOf" => {
            let needle = args.first().map_or_else(String::new, Value::to_display);
            match s.find(&needle) {
                Some(pos) => Ok(Value::Num(s[..pos].chars().count() as f64)),
                None => Ok(Value::Num(-1.0)),
            }
        }
        "includes" => {
            let needle = args.first().map_or_else(String::new, Value::to_display);
            Ok(Value::Bool(s.contains(&needle)))
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::Str(s.clone())],
                Some(sep) => {
                    let sep = sep.to_display();
                    if sep.is_empty() {
                        s.chars().map(|c| Value::str(c.to_string())).collect()
                    } else {
                        s.split(sep.as_str()).map(Value::str).collect()
                    }
                }
            };
            Ok(Value::List(ReactiveList::from_values(parts)))
        }
        _ => generic_call(&Value::Str(s.clone()), name, args),
    }
}

fn generic_call(recv: &Value, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    recv.get_member(name)?.call(args)
}

fn to_index(arg: Option<&Value>) -> isize {
    match arg {
        Some(v) => {
            let n = v.to_number();
            if n.is_nan() {
                0
            } else {
                n as isize
            }
        }
        None => 0,
    }
}

fn clamp_char_bound(bound: isize, len: usize) -> usize {
    if bound < 0 {
        len.saturating_sub(bound.unsigned_abs())
    } else {
        (bound as usize).min(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::watcher::{Evaluator, Watcher, WatcherFlags};
    use crate::scheduler::Scheduler;
    use crate::scope::Scope;

    fn call_global(name: &str, args: &[Value]) -> Value {
        global(name)
            .and_then(|v| v.call(args).ok())
            .unwrap_or_default()
    }

    fn math_fn(name: &str, args: &[Value]) -> Value {
        let math = global("Math").unwrap_or_default();
        call_method(&math, name, args).unwrap_or_default()
    }

    #[test]
    fn globals_resolve_to_shared_handles() {
        let a = global("Math").unwrap_or_default();
        let b = global("Math").unwrap_or_default();
        assert!(a.identical(&b), "repeated reads must not look like changes");
        assert!(global("nope").is_none());
    }

    #[test]
    fn round_goes_half_up_for_negative_values() {
        assert_eq!(math_fn("round", &[Value::Num(-2.5)]), Value::Num(-2.0));
        assert_eq!(math_fn("round", &[Value::Num(2.5)]), Value::Num(3.0));
        assert!(math_fn("round", &[Value::Undefined]).to_number().is_nan());
    }

    #[test]
    fn min_and_max_propagate_nan_and_default_to_infinities() {
        assert_eq!(
            math_fn("min", &[Value::Num(3.0), Value::Num(1.0), Value::Num(2.0)]),
            Value::Num(1.0)
        );
        assert!(math_fn("min", &[Value::Num(1.0), Value::str("x")])
            .to_number()
            .is_nan());
        assert_eq!(math_fn("min", &[]), Value::Num(f64::INFINITY));
        assert_eq!(math_fn("max", &[]), Value::Num(f64::NEG_INFINITY));
    }

    #[test]
    fn random_stays_in_unit_range() {
        let mut last = -1.0;
        let mut varied = false;
        for _ in 0..32 {
            let n = math_fn("random", &[]).to_number();
            assert!((0.0..1.0).contains(&n));
            if last >= 0.0 && (n - last).abs() > f64::EPSILON {
                varied = true;
            }
            last = n;
        }
        assert!(varied, "successive draws should differ");
    }

    #[test]
    fn parse_int_handles_radix_prefix_and_garbage() {
        assert_eq!(call_global("parseInt", &[Value::str("  42px")]), Value::Num(42.0));
        assert_eq!(call_global("parseInt", &[Value::str("0xff")]), Value::Num(255.0));
        assert_eq!(
            call_global("parseInt", &[Value::str("101"), Value::Num(2.0)]),
            Value::Num(5.0)
        );
        assert_eq!(call_global("parseInt", &[Value::str("-7")]), Value::Num(-7.0));
        assert!(call_global("parseInt", &[Value::str("px")]).to_number().is_nan());
    }

    #[test]
    fn parse_float_reads_the_longest_numeric_prefix() {
        assert_eq!(
            call_global("parseFloat", &[Value::str("3.25rem")]),
            Value::Num(3.25)
        );
        assert_eq!(
            call_global("parseFloat", &[Value::str("1e2x")]),
            Value::Num(100.0)
        );
        assert_eq!(
            call_global("parseFloat", &[Value::str("-Infinity")]),
            Value::Num(f64::NEG_INFINITY)
        );
        assert!(call_global("parseFloat", &[Value::str(".")]).to_number().is_nan());
    }

    #[test]
    fn coercion_globals_follow_value_semantics() {
        assert_eq!(call_global("Number", &[Value::str(" 12 ")]), Value::Num(12.0));
        assert_eq!(call_global("Number", &[]), Value::Num(0.0));
        assert_eq!(call_global("String", &[Value::Num(1.5)]), Value::str("1.5"));
        assert_eq!(call_global("Boolean", &[Value::str("")]), Value::Bool(false));
        assert_eq!(call_global("isNaN", &[Value::str("x")]), Value::Bool(true));
        assert_eq!(call_global("isFinite", &[Value::Num(1.0)]), Value::Bool(true));
    }

    #[test]
    fn stringify_preserves_insertion_order_and_skips_undefined_entries() {
        let m = ReactiveMap::new();
        m.set("b", Value::Num(2.0));
        m.set("a", Value::str("x\"y"));
        // Overwritten with Undefined: the entry exists but must not render.
        m.set("gone", Value::Num(0.0));
        m.set("gone", Value::Undefined);
        m.set("fn", Value::Func(NativeFunc::new("noop", |_| Ok(Value::Undefined))));
        m.set("items", Value::List(ReactiveList::from_values(vec![
            Value::Num(1.0),
            Value::Undefined,
            Value::Num(f64::NAN),
        ])));
        let json = stringify(&Value::Map(m)).map(|v| v.to_display());
        assert_eq!(
            json.as_deref(),
            Ok(r#"{"b":2,"a":"x\"y","items":[1,null,null]}"#)
        );
    }

    #[test]
    fn stringify_rejects_cycles() {
        let m = ReactiveMap::new();
        m.set("self", Value::Map(m.clone()));
        assert!(stringify(&Value::Map(m)).is_err());
    }

    #[test]
    fn stringify_of_undefined_is_undefined() {
        assert!(matches!(stringify(&Value::Undefined), Ok(Value::Undefined)));
        assert_eq!(
            stringify(&Value::Num(f64::INFINITY)).map(|v| v.to_display()),
            Ok("null".to_string())
        );
    }

    #[test]
    fn stringify_inside_a_watcher_acts_as_a_deep_watch() {
        let scheduler = Scheduler::new();
        let scope = Scope::root();
        let nested = ReactiveMap::new();
        nested.set("leaf", Value::Num(1.0));
        let root = ReactiveMap::new();
        root.set("nested", Value::Map(nested.clone()));
        scope.frame().set("data", Value::Map(root));

        let eval: Evaluator = Rc::new(|scope: &Scope| {
            let json = global("JSON").unwrap_or_default();
            call_method(&json, "stringify", &[scope.read("data")])
        });
        let fired = Rc::new(Cell::new(0));
        let count = fired.clone();
        let _w = Watcher::new(
            scope,
            eval,
            Box::new(move |_, _| count.set(count.get() + 1)),
            WatcherFlags::empty(),
            &scheduler,
            "JSON.stringify(data)",
        );

        nested.set("leaf", Value::Num(2.0));
        scheduler.flush();
        assert_eq!(fired.get(), 1, "a nested write must reach the watcher");
    }

    #[test]
    fn push_returns_the_new_length_and_unshift_prepends_in_order() {
        let l = ReactiveList::from_values(vec![Value::Num(3.0)]);
        let recv = Value::List(l.clone());
        let len = call_method(
            &recv,
            "push",
            &[Value::Num(4.0), Value::Num(5.0)],
        );
        assert_eq!(len, Ok(Value::Num(3.0)));
        call_method(&recv, "unshift", &[Value::Num(1.0), Value::Num(2.0)]).unwrap();
        assert_eq!(
            l.values(),
            vec![
                Value::Num(1.0),
                Value::Num(2.0),
                Value::Num(3.0),
                Value::Num(4.0),
                Value::Num(5.0)
            ]
        );
    }

    #[test]
    fn splice_without_a_count_deletes_through_the_end() {
        let l = ReactiveList::from_values(vec![
            Value::Num(1.0),
            Value::Num(2.0),
            Value::Num(3.0),
        ]);
        let removed = call_method(&Value::List(l.clone()), "splice", &[Value::Num(1.0)]);
        match removed {
            Ok(Value::List(r)) => assert_eq!(r.len(), 2),
            other => panic!("expected removed list, got {other:?}"),
        }
        assert_eq!(l.values(), vec![Value::Num(1.0)]);
    }

    #[test]
    fn join_defaults_to_a_comma() {
        let l = ReactiveList::from_values(vec![Value::Num(1.0), Value::Num(2.0)]);
        assert_eq!(
            call_method(&Value::List(l), "join", &[]),
            Ok(Value::str("1,2"))
        );
    }

    #[test]
    fn string_methods_cover_slice_split_and_case() {
        let s = Value::str("  Hello,World  ");
        assert_eq!(call_method(&s, "trim", &[]), Ok(Value::str("Hello,World")));
        let hello = Value::str("hello");
        assert_eq!(
            call_method(&hello, "toUpperCase", &[]),
            Ok(Value::str("HELLO"))
        );
        assert_eq!(
            call_method(&hello, "slice", &[Value::Num(-3.0)]),
            Ok(Value::str("llo"))
        );
        assert_eq!(
            call_method(&hello, "indexOf", &[Value::str("ll")]),
            Ok(Value::Num(2.0))
        );
        match call_method(&Value::str("a,b,c"), "split", &[Value::str(",")]) {
            Ok(Value::List(parts)) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts.get(1), Value::str("b"));
            }
            other => panic!("expected parts list, got {other:?}"),
        }
    }

    #[test]
    fn to_fixed_formats_with_the_requested_precision() {
        assert_eq!(
            call_method(&Value::Num(1.005), "toFixed", &[Value::Num(2.0)]),
            Ok(Value::str("1.00"))
        );
        assert_eq!(
            call_method(&Value::Num(2.0), "toFixed", &[]),
            Ok(Value::str("2"))
        );
        assert_eq!(
            call_method(&Value::Num(f64::NAN), "toFixed", &[Value::Num(2.0)]),
            Ok(Value::str("NaN"))
        );
    }

    #[test]
    fn unknown_method_reports_not_callable() {
        let err = call_method(&Value::Num(1.0), "frobnicate", &[]);
        assert!(matches!(err, Err(EvalError::NotCallable { .. })));
    }

    #[test]
    fn map_stored_functions_dispatch_through_the_fallback() {
        let m = ReactiveMap::new();
        m.set(
            "double",
            Value::Func(NativeFunc::new("double", |args| {
                Ok(Value::Num(args.first().map_or(f64::NAN, Value::to_number) * 2.0))
            })),
        );
        assert_eq!(
            call_method(&Value::Map(m), "double", &[Value::Num(21.0)]),
            Ok(Value::Num(42.0))
        );
    }
}

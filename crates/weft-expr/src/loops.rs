//! Loop headers: the left-hand syntax of a repeat binding.
//!
//! Three forms are recognized:
//!
//! - `key[, value[, index]] in expr` iterates entries: list positions or
//!   map keys in insertion order.
//! - `value[, index] of expr` iterates values only.
//! - `var = from to until [step n]` counts inclusively, downward when
//!   `from` exceeds `until`.
//!
//! # Invariants
//!
//! - Keyword splitting (`in`, `of`, `to`, `step`) only fires on
//!   whitespace-delimited words at bracket depth zero outside string
//!   literals, so a source like `pick('a of b')` stays whole.
//! - A range whose bounds or step are non-finite, or whose step is zero
//!   or negative, yields no items rather than spinning.

use std::rc::Rc;

use weft_core::{EvalError, Scope, Value};

use crate::compiler::{Compiler, Reader, Writer};
use crate::error::CompileError;
use crate::token::split_top_level;

/// Which header form matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    In,
    Of,
    Range,
}

/// Where each iteration's value lands.
#[derive(Debug, Clone)]
enum AssignTarget {
    /// A bare name, defined directly on the iteration frame.
    Local(Rc<str>),
    /// A property path, written through the iteration scope.
    Path(Writer),
}

/// A parsed repeat header. The source reader stays watchable; `items`
/// materializes the current iteration set and `bind` populates one
/// iteration's scope frame.
#[derive(Debug, Clone)]
pub struct LoopHeader {
    kind: LoopKind,
    key: Option<Rc<str>>,
    value: Option<AssignTarget>,
    index: Option<Rc<str>>,
    source: Reader,
}

/// One materialized iteration.
#[derive(Debug, Clone)]
pub struct LoopItem {
    pub key: Value,
    pub value: Value,
    pub index: usize,
}

impl LoopHeader {
    pub(crate) fn parse(compiler: &Compiler, header: &str) -> Result<Self, CompileError> {
        let invalid = || CompileError::InvalidLoopSyntax {
            header: header.trim().to_string(),
        };
        if let Some((left, kind, right)) = split_iteration(header) {
            let parts = split_top_level(left, b',');
            let limit = if kind == LoopKind::In { 3 } else { 2 };
            if parts.len() > limit {
                return Err(invalid());
            }
            let mut slots = parts.iter().map(|p| p.trim());
            let key = if kind == LoopKind::In {
                match slots.next() {
                    None | Some("") => None,
                    Some(name) if is_single_name(name) => Some(Rc::<str>::from(name)),
                    Some(_) => return Err(invalid()),
                }
            } else {
                None
            };
            let value = match slots.next() {
                None | Some("") => None,
                Some(text) => Some(parse_target(compiler, text)?),
            };
            let index = match slots.next() {
                None | Some("") => None,
                Some(name) if is_single_name(name) => Some(Rc::<str>::from(name)),
                Some(_) => return Err(invalid()),
            };
            Ok(LoopHeader {
                kind,
                key,
                value,
                index,
                source: compiler.compile_reader(right, &[])?,
            })
        } else if let Some((var, from, until, step)) = split_range(header) {
            let bounds = format!("[{from}, {until}, {}]", step.unwrap_or("1"));
            Ok(LoopHeader {
                kind: LoopKind::Range,
                key: None,
                value: Some(AssignTarget::Local(Rc::from(var))),
                index: None,
                source: compiler.compile_reader(&bounds, &[])?,
            })
        } else {
            Err(invalid())
        }
    }

    #[must_use]
    pub fn kind(&self) -> LoopKind {
        self.kind
    }

    /// The reader whose value drives the loop. Watch this to re-render.
    #[must_use]
    pub fn source(&self) -> &Reader {
        &self.source
    }

    /// Evaluates the source and materializes one item per iteration.
    /// Non-iterable sources yield an empty set.
    pub fn items(&self, scope: &Scope) -> Result<Vec<LoopItem>, EvalError> {
        let source = self.source.evaluate(scope)?;
        let mut items = Vec::new();
        match self.kind {
            LoopKind::In => match &source {
                Value::List(list) => {
                    for (index, value) in list.values().into_iter().enumerate() {
                        items.push(LoopItem {
                            key: Value::Num(index as f64),
                            value,
                            index,
                        });
                    }
                }
                Value::Map(map) => {
                    for (index, (key, value)) in map.entries().into_iter().enumerate() {
                        items.push(LoopItem {
                            key: Value::Str(key),
                            value,
                            index,
                        });
                    }
                }
                _ => {}
            },
            LoopKind::Of => {
                let values = match &source {
                    Value::List(list) => list.values(),
                    Value::Map(map) => map.entries().into_iter().map(|(_, v)| v).collect(),
                    _ => Vec::new(),
                };
                for (index, value) in values.into_iter().enumerate() {
                    items.push(LoopItem {
                        key: Value::Num(index as f64),
                        value,
                        index,
                    });
                }
            }
            LoopKind::Range => {
                let Value::List(bounds) = &source else {
                    return Ok(items);
                };
                let from = bounds.get(0).to_number();
                let until = bounds.get(1).to_number();
                let step = bounds.get(2).to_number();
                if !from.is_finite() || !until.is_finite() || !step.is_finite() || step <= 0.0 {
                    return Ok(items);
                }
                let mut current = from;
                let mut index = 0;
                loop {
                    let done = if from <= until {
                        current > until
                    } else {
                        current < until
                    };
                    if done {
                        break;
                    }
                    items.push(LoopItem {
                        key: Value::Num(index as f64),
                        value: Value::Num(current),
                        index,
                    });
                    current = if from <= until {
                        current + step
                    } else {
                        current - step
                    };
                    index += 1;
                }
            }
        }
        Ok(items)
    }

    /// Populates one iteration's names in `scope`, normally a fresh child
    /// frame. Key and index bind as locals; the value goes through its
    /// assign target.
    pub fn bind(&self, scope: &Scope, item: &LoopItem) -> Result<(), EvalError> {
        if let Some(key) = &self.key {
            scope.define_local(key, item.key.clone());
        }
        match &self.value {
            Some(AssignTarget::Local(name)) => scope.define_local(name, item.value.clone()),
            Some(AssignTarget::Path(writer)) => {
                writer.assign(scope, item.value.clone())?;
            }
            None => {}
        }
        if let Some(index) = &self.index {
            scope.define_local(index, Value::Num(item.index as f64));
        }
        Ok(())
    }
}

fn parse_target(compiler: &Compiler, text: &str) -> Result<AssignTarget, CompileError> {
    if is_single_name(text) {
        Ok(AssignTarget::Local(Rc::from(text)))
    } else {
        Ok(AssignTarget::Path(compiler.compile_writer(text)?))
    }
}

fn is_single_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn split_iteration(header: &str) -> Option<(&str, LoopKind, &str)> {
    let in_at = keyword_at_depth_zero(header, "in");
    let of_at = keyword_at_depth_zero(header, "of");
    let (at, kind) = match (in_at, of_at) {
        (Some(a), Some(b)) if a <= b => (a, LoopKind::In),
        (Some(a), None) => (a, LoopKind::In),
        (_, Some(b)) => (b, LoopKind::Of),
        (None, None) => return None,
    };
    let left = header[..at].trim();
    let right = header[at + 2..].trim();
    if left.is_empty() || right.is_empty() {
        return None;
    }
    Some((left, kind, right))
}

fn split_range(header: &str) -> Option<(&str, &str, &str, Option<&str>)> {
    let trimmed = header.trim();
    let bytes = trimmed.as_bytes();
    if !bytes
        .first()
        .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_' || *b == b'$')
    {
        return None;
    }
    let mut var_end = 1;
    while var_end < bytes.len()
        && (bytes[var_end].is_ascii_alphanumeric()
            || bytes[var_end] == b'_'
            || bytes[var_end] == b'$')
    {
        var_end += 1;
    }
    let var = &trimmed[..var_end];
    let rest = trimmed[var_end..].trim_start().strip_prefix('=')?;
    if rest.starts_with('=') {
        return None;
    }
    let to_at = keyword_at_depth_zero(rest, "to")?;
    let from = rest[..to_at].trim();
    let tail = &rest[to_at + 2..];
    let (until, step) = match keyword_at_depth_zero(tail, "step") {
        Some(p) => (tail[..p].trim(), Some(tail[p + 4..].trim())),
        None => (tail.trim(), None),
    };
    if from.is_empty() || until.is_empty() || step.is_some_and(str::is_empty) {
        return None;
    }
    Some((var, from, until, step))
}

/// First whitespace-delimited occurrence of `word` at bracket depth zero
/// outside string literals.
fn keyword_at_depth_zero(src: &str, word: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if depth == 0
            && i > 0
            && bytes[i - 1].is_ascii_whitespace()
            && src[i..].starts_with(word)
            && bytes.get(i + word.len()).is_some_and(u8::is_ascii_whitespace)
        {
            return Some(i);
        }
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }
    None
}

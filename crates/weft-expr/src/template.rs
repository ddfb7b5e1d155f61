//! Delimiter templates: literal text interleaved with `{{ … }}` markers.
//!
//! Splitting is lazy per marker, with one wrinkle: a `}}` immediately
//! followed by another `}` does not close, so `{{a}}}` reads the marker
//! `a}`. Text without any marker is static.
//!
//! # Invariants
//!
//! - A template that is exactly one marker passes the evaluated value
//!   through untouched. Everything else renders to a string, with nullish
//!   segments spelled `undefined`/`null`.

use std::rc::Rc;

use weft_core::{EvalError, Evaluator, Scope, Value};

use crate::compiler::Reader;

/// Raw split output: literal text or the inside of one `{{ … }}` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Piece {
    Lit(String),
    Marker(String),
}

/// Splits `text` on `{{ … }}` markers. A `{{` with no valid close stays
/// literal text.
pub(crate) fn split_markers(text: &str) -> Vec<Piece> {
    let bytes = text.as_bytes();
    let mut pieces = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let Some(open_off) = memchr::memmem::find(&bytes[pos..], b"{{") else {
            pieces.push(Piece::Lit(text[pos..].to_string()));
            break;
        };
        let open = pos + open_off;
        let Some(close) = find_close(bytes, open + 2) else {
            pieces.push(Piece::Lit(text[pos..].to_string()));
            break;
        };
        if open > pos {
            pieces.push(Piece::Lit(text[pos..open].to_string()));
        }
        pieces.push(Piece::Marker(text[open + 2..close].to_string()));
        pos = close + 2;
    }
    pieces
}

/// First `}}` at or after `from` that is not followed by a third `}`.
fn find_close(bytes: &[u8], from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(off) = memchr::memmem::find(&bytes[at..], b"}}") {
        let p = at + off;
        if bytes.get(p + 2) != Some(&b'}') {
            return Some(p);
        }
        at = p + 1;
    }
    None
}

#[derive(Debug, Clone)]
pub(crate) enum Segment {
    Literal(Rc<str>),
    Expr(Reader),
}

/// A compiled delimiter template.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
    /// Exactly one marker and nothing else: the value passes through raw.
    pure: bool,
}

impl Template {
    pub(crate) fn new(segments: Vec<Segment>) -> Self {
        let pure = segments.len() == 1 && matches!(segments[0], Segment::Expr(_));
        Template { segments, pure }
    }

    /// True when the text contained no markers; nothing to watch.
    #[must_use]
    pub fn is_static(&self) -> bool {
        !self
            .segments
            .iter()
            .any(|s| matches!(s, Segment::Expr(_)))
    }

    /// Evaluates every marker and assembles the result. A pure template
    /// yields the marker's value unchanged; mixed content renders to a
    /// string of display forms.
    pub fn render(&self, scope: &Scope) -> Result<Value, EvalError> {
        if self.pure {
            if let Segment::Expr(reader) = &self.segments[0] {
                return reader.evaluate(scope);
            }
        }
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(reader) => out.push_str(&reader.evaluate(scope)?.to_display()),
            }
        }
        Ok(Value::str(out))
    }

    /// The render wrapped for watcher construction.
    #[must_use]
    pub fn evaluator(&self) -> Evaluator {
        let template = self.clone();
        Rc::new(move |scope: &Scope| template.render(scope))
    }
}

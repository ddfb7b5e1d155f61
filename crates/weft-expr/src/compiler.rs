//! Compilation entry points and the expression caches.
//!
//! One `Compiler` owns a filter registry and four memo tables. Compiling
//! the same text against the same binding names returns a handle to the
//! same shared program, so two bindings on the same expression can be
//! compared by pointer and compile exactly once.
//!
//! # Invariants
//!
//! - Cache keys join source text and binding names; `x` plain and `x`
//!   with an `event` binding compile separately.
//! - Filter chains apply left to right: `v | a | b c` computes
//!   `b(a(v), "c")`.
//! - Writer filters transform the incoming value before the store runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use weft_core::{EvalError, Evaluator, Scope, Value};

use crate::error::CompileError;
use crate::filters::FilterRegistry;
use crate::ir::{Op, Program};
use crate::loops::LoopHeader;
use crate::parser;
use crate::template::{self, Piece, Segment, Template};
use crate::token::{self, split_top_level, tokenize};

/// The binding name inline handlers see their first argument under.
const EVENT_BINDING: &str = "event";

/// A compiled read-only expression, bound to the registry its filters
/// resolve from.
#[derive(Debug)]
pub struct Reader {
    source: Rc<str>,
    program: Rc<Program>,
    filters: FilterRegistry,
}

impl Reader {
    /// The text this reader was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs the program with no binding slots.
    pub fn evaluate(&self, scope: &Scope) -> Result<Value, EvalError> {
        self.program.run(scope, &[], &self.filters)
    }

    /// Runs the program with positional binding values.
    pub fn evaluate_with(&self, scope: &Scope, bindings: &[Value]) -> Result<Value, EvalError> {
        self.program.run(scope, bindings, &self.filters)
    }

    /// The reader wrapped for watcher construction.
    #[must_use]
    pub fn evaluator(&self) -> Evaluator {
        let reader = self.clone();
        Rc::new(move |scope: &Scope| reader.evaluate(scope))
    }

    /// True when both readers share one compiled program.
    #[must_use]
    pub fn ptr_eq(&self, other: &Reader) -> bool {
        Rc::ptr_eq(&self.program, &other.program)
    }
}

impl Clone for Reader {
    fn clone(&self) -> Self {
        Reader {
            source: Rc::clone(&self.source),
            program: Rc::clone(&self.program),
            filters: self.filters.clone(),
        }
    }
}

/// A compiled write target. `assign` stores a value through the scope,
/// after any filter chain transforms it.
#[derive(Debug)]
pub struct Writer {
    source: Rc<str>,
    program: Rc<Program>,
    filters: FilterRegistry,
}

impl Writer {
    /// The text this writer was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Stores `value` through the target path and returns what was
    /// written, filters applied.
    pub fn assign(&self, scope: &Scope, value: Value) -> Result<Value, EvalError> {
        self.program.run(scope, &[value], &self.filters)
    }

    /// True when both writers share one compiled program.
    #[must_use]
    pub fn ptr_eq(&self, other: &Writer) -> bool {
        Rc::ptr_eq(&self.program, &other.program)
    }
}

impl Clone for Writer {
    fn clone(&self) -> Self {
        Writer {
            source: Rc::clone(&self.source),
            program: Rc::clone(&self.program),
            filters: self.filters.clone(),
        }
    }
}

/// A compiled event handler.
#[derive(Debug, Clone)]
pub struct Handler {
    inner: HandlerImpl,
}

#[derive(Debug, Clone)]
enum HandlerImpl {
    /// Empty text; invoking does nothing.
    NoOp,
    /// The text was one property path: resolve it and forward every
    /// argument to the callable it names.
    Forward(Reader),
    /// An inline body, compiled with `event` bound to the first argument.
    Inline(Reader),
}

impl Handler {
    /// Runs the handler. Forwarders pass `args` through whole; inline
    /// bodies see the first argument as `event`.
    pub fn invoke(&self, scope: &Scope, args: &[Value]) -> Result<Value, EvalError> {
        match &self.inner {
            HandlerImpl::NoOp => Ok(Value::Undefined),
            HandlerImpl::Forward(reader) => reader.evaluate(scope)?.call(args),
            HandlerImpl::Inline(reader) => reader.evaluate_with(scope, args),
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self.inner, HandlerImpl::NoOp)
    }
}

/// An if/else-if guard sequence. Evaluation picks the first truthy
/// branch.
#[derive(Debug, Clone)]
pub struct ConditionChain {
    guards: Vec<Reader>,
    has_else: bool,
}

impl ConditionChain {
    /// Index of the branch to show: the first truthy guard, the else
    /// branch when every guard is falsy, or -1 without one. A guard that
    /// fails to evaluate counts as falsy.
    #[must_use]
    pub fn evaluate(&self, scope: &Scope) -> isize {
        for (index, guard) in self.guards.iter().enumerate() {
            match guard.evaluate(scope) {
                Ok(value) => {
                    if value.is_truthy() {
                        return index as isize;
                    }
                }
                Err(err) => {
                    warn!(
                        guard = guard.source(),
                        error = %err,
                        "condition guard failed; treating as false"
                    );
                }
            }
        }
        if self.has_else {
            self.guards.len() as isize
        } else {
            -1
        }
    }

    /// The branch index as a watchable value.
    #[must_use]
    pub fn evaluator(&self) -> Evaluator {
        let chain = self.clone();
        Rc::new(move |scope: &Scope| Ok(Value::Num(chain.evaluate(scope) as f64)))
    }

    /// Total branches, the else arm included.
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.guards.len() + usize::from(self.has_else)
    }
}

/// Compiles expressions into shared programs, memoized per source text
/// and binding names.
pub struct Compiler {
    filters: FilterRegistry,
    readers: RefCell<HashMap<Rc<str>, Reader>>,
    writers: RefCell<HashMap<Rc<str>, Writer>>,
    handlers: RefCell<HashMap<Rc<str>, Handler>>,
    templates: RefCell<HashMap<Rc<str>, Template>>,
}

impl Compiler {
    #[must_use]
    pub fn new() -> Self {
        Compiler {
            filters: FilterRegistry::new(),
            readers: RefCell::new(HashMap::new()),
            writers: RefCell::new(HashMap::new()),
            handlers: RefCell::new(HashMap::new()),
            templates: RefCell::new(HashMap::new()),
        }
    }

    /// The registry every compiled program resolves filters from.
    #[must_use]
    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Registers a named filter. Already-compiled programs see it on
    /// their next run.
    pub fn register_filter(
        &self,
        name: impl Into<Rc<str>>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, EvalError> + 'static,
    ) {
        self.filters.register(name, f);
    }

    /// Compiles a read-only expression. `bindings` name positional slots
    /// the caller fills at evaluation time.
    pub fn compile_reader(&self, expr: &str, bindings: &[&str]) -> Result<Reader, CompileError> {
        let key = cache_key(expr, bindings);
        if let Some(hit) = self.readers.borrow().get(&key) {
            return Ok(hit.clone());
        }
        debug!(expr, "compiling reader");
        let tokenized = tokenize(expr, bindings);
        let mut ops = parser::parse(&tokenized.tokens, bindings)?;
        if let Some(start) = tokenized.filter_start {
            self.append_filter_ops(&mut ops, &expr[start..], bindings)?;
        }
        let reader = Reader {
            source: Rc::from(expr),
            program: Rc::new(Program::new(ops)),
            filters: self.filters.clone(),
        };
        self.readers.borrow_mut().insert(key, reader.clone());
        Ok(reader)
    }

    /// Compiles a write target: one property path, optionally followed by
    /// a filter chain that transforms the incoming value.
    pub fn compile_writer(&self, expr: &str) -> Result<Writer, CompileError> {
        let key: Rc<str> = Rc::from(expr);
        if let Some(hit) = self.writers.borrow().get(&key) {
            return Ok(hit.clone());
        }
        debug!(expr, "compiling writer");
        let tokenized = tokenize(expr, &[]);
        if !token::is_property_path(&tokenized.tokens) {
            return Err(CompileError::InvalidWriteTarget {
                expr: expr.to_string(),
            });
        }
        let mut value_ops = vec![Op::ReadBinding(0)];
        if let Some(start) = tokenized.filter_start {
            self.append_filter_ops(&mut value_ops, &expr[start..], &[])?;
        }
        let ops = parser::parse_write(&tokenized.tokens, &[], value_ops, expr)?;
        let writer = Writer {
            source: Rc::from(expr),
            program: Rc::new(Program::new(ops)),
            filters: self.filters.clone(),
        };
        self.writers.borrow_mut().insert(key, writer.clone());
        Ok(writer)
    }

    /// Compiles an event handler. Empty text is a no-op; a bare property
    /// path forwards its arguments to the callable it names; anything
    /// else is an inline body with the first argument bound as `event`.
    pub fn compile_handler(&self, expr: &str) -> Result<Handler, CompileError> {
        let key: Rc<str> = Rc::from(expr);
        if let Some(hit) = self.handlers.borrow().get(&key) {
            return Ok(hit.clone());
        }
        let handler = self.build_handler(expr)?;
        self.handlers.borrow_mut().insert(key, handler.clone());
        Ok(handler)
    }

    fn build_handler(&self, expr: &str) -> Result<Handler, CompileError> {
        if expr.trim().is_empty() {
            return Ok(Handler {
                inner: HandlerImpl::NoOp,
            });
        }
        let tokenized = tokenize(expr, &[]);
        if tokenized.filter_start.is_none() && token::is_property_path(&tokenized.tokens) {
            return Ok(Handler {
                inner: HandlerImpl::Forward(self.compile_reader(expr, &[])?),
            });
        }
        Ok(Handler {
            inner: HandlerImpl::Inline(self.compile_reader(expr, &[EVENT_BINDING])?),
        })
    }

    /// Compiles literal text with `{{ … }}` markers into a template.
    pub fn compile_delimiter_template(&self, text: &str) -> Result<Template, CompileError> {
        let key: Rc<str> = Rc::from(text);
        if let Some(hit) = self.templates.borrow().get(&key) {
            return Ok(hit.clone());
        }
        let mut segments = Vec::new();
        for piece in template::split_markers(text) {
            match piece {
                Piece::Lit(lit) => segments.push(Segment::Literal(Rc::from(lit.as_str()))),
                Piece::Marker(marker) => {
                    segments.push(Segment::Expr(self.compile_reader(marker.trim(), &[])?));
                }
            }
        }
        let template = Template::new(segments);
        self.templates.borrow_mut().insert(key, template.clone());
        Ok(template)
    }

    /// Compiles an if/else-if guard sequence.
    pub fn compile_condition_chain(
        &self,
        guards: &[&str],
        has_else: bool,
    ) -> Result<ConditionChain, CompileError> {
        let mut compiled = Vec::with_capacity(guards.len());
        for guard in guards {
            compiled.push(self.compile_reader(guard, &[])?);
        }
        Ok(ConditionChain {
            guards: compiled,
            has_else,
        })
    }

    /// Parses a repeat header (`k, v in items`, `v of items`,
    /// `i = 1 to n step 2`) into a watchable loop description.
    pub fn parse_loop_header(&self, header: &str) -> Result<LoopHeader, CompileError> {
        LoopHeader::parse(self, header)
    }

    /// Parses the filter suffix (just past the first `|`) and appends one
    /// argument-then-apply sequence per filter, left to right.
    fn append_filter_ops(
        &self,
        ops: &mut Vec<Op>,
        suffix: &str,
        bindings: &[&str],
    ) -> Result<(), CompileError> {
        for segment in split_top_level(suffix, b'|') {
            let segment = segment.trim();
            let name_end = segment
                .char_indices()
                .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
                .map_or(segment.len(), |(i, _)| i);
            if name_end == 0 {
                continue;
            }
            let name = &segment[..name_end];
            let rest = segment[name_end..].trim();
            let mut argc = 0usize;
            if let Some(inner) = rest.strip_prefix('(') {
                let inner = match matching_paren(inner) {
                    Some(close) => &inner[..close],
                    None => inner,
                };
                for piece in split_top_level(inner, b',') {
                    if piece.trim().is_empty() {
                        continue;
                    }
                    ops.extend(parser::compile_fragment(piece, bindings)?);
                    argc += 1;
                }
            } else {
                for word in rest.split_whitespace() {
                    ops.push(Op::PushLit(Value::str(word)));
                    argc += 1;
                }
            }
            ops.push(Op::ApplyFilter(Rc::from(name), argc));
        }
        Ok(())
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(expr: &str, bindings: &[&str]) -> Rc<str> {
    if bindings.is_empty() {
        return Rc::from(expr);
    }
    let mut key = String::with_capacity(expr.len() + 8);
    key.push_str(expr);
    key.push(';');
    key.push_str(&bindings.join(","));
    Rc::from(key)
}

/// Offset of the `)` matching an already-consumed opener, quote aware.
fn matching_paren(src: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut depth = 1usize;
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
        } else {
            match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

//! Expression tokenizer.
//!
//! One pass over the source text, classifying each token against an
//! expectation state so that a bare word after `.` is a property, a word
//! inside `{…}` is an object key, and a keyword immediately followed by `(`
//! degrades to a plain identifier. The output is a flat stream; structure
//! is the parser's job.
//!
//! A single `|` (never `||`) anywhere ends the main expression; the text
//! after it is the filter suffix, handed back untokenized for the filter
//! parser. An unrecognized character ends the scan, truncating the tail.
//!
//! # Invariants
//!
//! - Token text for string literals is the decoded content; for everything
//!   else it is the raw spelling.
//! - Binding names supplied by the caller always classify as bindings,
//!   never as scope reads, whatever follows them.

use std::rc::Rc;

use weft_core::builtins;

/// Token classification produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// String literal. Text is the decoded content.
    Str,
    /// Numeric literal. Text is the raw spelling.
    Num,
    /// Template literal. Text is the raw body between the backticks.
    Template,
    /// Free identifier, resolved through the scope chain.
    Ident,
    /// Extra binding name; the payload is its slot in the binding list.
    Binding(usize),
    /// Builtin global: `Math`, `JSON`, `Number`, `parseInt`, ...
    Builtin,
    /// `true false null undefined NaN Infinity this`.
    KeywordValue,
    /// `delete new typeof void in instanceof`.
    KeywordOp,
    /// Property name following `.` or `?.`.
    Prop,
    /// Object-literal key.
    ObjKey,
    /// Operator from the segmentation table.
    Op,
    Semi,
    Colon,
    Comma,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
}

/// One token of expression text.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: Rc<str>,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<Rc<str>>) -> Self {
        Token {
            kind,
            text: text.into(),
        }
    }

    /// True when this token is the operator `text`.
    #[must_use]
    pub fn is_op(&self, text: &str) -> bool {
        self.kind == TokenKind::Op && &*self.text == text
    }
}

/// Result of tokenizing one expression.
#[derive(Debug, Clone)]
pub struct Tokenized {
    pub tokens: Vec<Token>,
    /// Byte offset of the filter suffix (just past the `|`), when present.
    pub filter_start: Option<usize>,
}

const KEYWORD_VALUES: [&str; 7] = [
    "true",
    "false",
    "null",
    "undefined",
    "NaN",
    "Infinity",
    "this",
];

const UNARY_KEYWORD_OPS: [&str; 4] = ["delete", "new", "typeof", "void"];
const BINARY_KEYWORD_OPS: [&str; 2] = ["in", "instanceof"];

/// Multi-character operators, tried longest first within a run.
const OPS3: [&str; 2] = ["===", "!=="];
const OPS2: [&str; 15] = [
    "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "<<", ">>", "+=", "-=", "*=", "/=", "%=",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    Postfix,
    Prop,
    ObjKey,
    ObjColon,
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn is_op_char(b: u8) -> bool {
    matches!(
        b,
        b'.' | b'+'
            | b'-'
            | b'~'
            | b'!'
            | b'*'
            | b'/'
            | b'%'
            | b'<'
            | b'>'
            | b'='
            | b'&'
            | b'^'
            | b'|'
            | b'?'
            | b':'
            | b','
    )
}

/// Tokenizes `src`, classifying words in `bindings` as positional bindings.
#[must_use]
pub fn tokenize(src: &str, bindings: &[&str]) -> Tokenized {
    let bytes = src.as_bytes();
    let mut tokens: Vec<Token> = Vec::new();
    let mut expect = Expect::Value;
    // Open-bracket stack; the innermost entry decides what a comma means.
    let mut stack: Vec<u8> = Vec::new();
    let mut filter_start = None;
    let mut i = 0;

    'scan: while i < bytes.len() {
        let b = bytes[i];

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if b == b'\'' || b == b'"' {
            let (text, next) = scan_string(src, i);
            let kind = if expect == Expect::ObjKey {
                expect = Expect::ObjColon;
                TokenKind::ObjKey
            } else {
                expect = Expect::Postfix;
                TokenKind::Str
            };
            tokens.push(Token::new(kind, text));
            i = next;
            continue;
        }

        if b == b'`' {
            let (body, next) = scan_template(src, i);
            tokens.push(Token::new(TokenKind::Template, body));
            expect = Expect::Postfix;
            i = next;
            continue;
        }

        let leading_dot_number = b == b'.'
            && expect == Expect::Value
            && bytes.get(i + 1).is_some_and(u8::is_ascii_digit);
        if b.is_ascii_digit() || leading_dot_number {
            let next = scan_number(bytes, i);
            let kind = if expect == Expect::ObjKey {
                expect = Expect::ObjColon;
                TokenKind::ObjKey
            } else {
                expect = Expect::Postfix;
                TokenKind::Num
            };
            tokens.push(Token::new(kind, &src[i..next]));
            i = next;
            continue;
        }

        if is_ident_start(b) {
            let mut end = i + 1;
            while end < bytes.len() && is_ident_continue(bytes[end]) {
                end += 1;
            }
            let word = &src[i..end];
            let token = match expect {
                Expect::Prop => {
                    expect = Expect::Postfix;
                    Token::new(TokenKind::Prop, word)
                }
                Expect::ObjKey => {
                    expect = Expect::ObjColon;
                    Token::new(TokenKind::ObjKey, word)
                }
                _ => {
                    let kind = if KEYWORD_VALUES.contains(&word) {
                        TokenKind::KeywordValue
                    } else if let Some(slot) = bindings.iter().position(|name| *name == word) {
                        TokenKind::Binding(slot)
                    } else if UNARY_KEYWORD_OPS.contains(&word)
                        || BINARY_KEYWORD_OPS.contains(&word)
                    {
                        TokenKind::KeywordOp
                    } else if builtins::is_global(word) {
                        TokenKind::Builtin
                    } else {
                        TokenKind::Ident
                    };
                    expect = if kind == TokenKind::KeywordOp {
                        Expect::Value
                    } else {
                        Expect::Postfix
                    };
                    Token::new(kind, word)
                }
            };
            tokens.push(token);
            i = end;
            continue;
        }

        if b == b';' {
            tokens.push(Token::new(TokenKind::Semi, ";"));
            expect = Expect::Value;
            i += 1;
            continue;
        }

        if is_op_char(b) {
            let mut run_end = i + 1;
            while run_end < bytes.len() && is_op_char(bytes[run_end]) {
                run_end += 1;
            }
            let mut p = i;
            while p < run_end {
                let seg = match_operator(&src[p..run_end]);
                if seg == "|" {
                    filter_start = Some(p + 1);
                    break 'scan;
                }
                match seg {
                    "." | "?." => {
                        tokens.push(Token::new(TokenKind::Op, seg));
                        expect = Expect::Prop;
                    }
                    "," => {
                        tokens.push(Token::new(TokenKind::Comma, ","));
                        expect = if stack.last() == Some(&b'{') {
                            Expect::ObjKey
                        } else {
                            Expect::Value
                        };
                    }
                    ":" => {
                        tokens.push(Token::new(TokenKind::Colon, ":"));
                        expect = Expect::Value;
                    }
                    _ => {
                        tokens.push(Token::new(TokenKind::Op, seg));
                        expect = Expect::Value;
                    }
                }
                p += seg.len();
            }
            i = run_end;
            continue;
        }

        match b {
            b'(' => {
                // A keyword actually used as a function is a plain name.
                if let Some(last) = tokens.last_mut()
                    && matches!(last.kind, TokenKind::KeywordValue | TokenKind::KeywordOp)
                {
                    last.kind = TokenKind::Ident;
                }
                tokens.push(Token::new(TokenKind::OpenParen, "("));
                stack.push(b'(');
                expect = Expect::Value;
            }
            b')' => {
                if stack.last() == Some(&b'(') {
                    stack.pop();
                }
                tokens.push(Token::new(TokenKind::CloseParen, ")"));
                expect = Expect::Postfix;
            }
            b'[' => {
                tokens.push(Token::new(TokenKind::OpenBracket, "["));
                stack.push(b'[');
                expect = Expect::Value;
            }
            b']' => {
                if stack.last() == Some(&b'[') {
                    stack.pop();
                }
                tokens.push(Token::new(TokenKind::CloseBracket, "]"));
                expect = Expect::Postfix;
            }
            b'{' => {
                tokens.push(Token::new(TokenKind::OpenBrace, "{"));
                stack.push(b'{');
                expect = Expect::ObjKey;
            }
            b'}' => {
                if stack.last() == Some(&b'{') {
                    stack.pop();
                }
                tokens.push(Token::new(TokenKind::CloseBrace, "}"));
                expect = Expect::Postfix;
            }
            _ => break,
        }
        i += 1;
    }

    // An expression ending in a keyword operator meant it as a name.
    if let Some(last) = tokens.last_mut()
        && last.kind == TokenKind::KeywordOp
    {
        last.kind = TokenKind::Ident;
    }

    Tokenized {
        tokens,
        filter_start,
    }
}

fn match_operator(rest: &str) -> &'static str {
    for op in OPS3 {
        if rest.starts_with(op) {
            return op;
        }
    }
    for op in OPS2 {
        if rest.starts_with(op) {
            return op;
        }
    }
    match rest.as_bytes()[0] {
        b'.' => ".",
        b'+' => "+",
        b'-' => "-",
        b'~' => "~",
        b'!' => "!",
        b'*' => "*",
        b'/' => "/",
        b'%' => "%",
        b'<' => "<",
        b'>' => ">",
        b'=' => "=",
        b'&' => "&",
        b'^' => "^",
        b'|' => "|",
        b'?' => "?",
        b':' => ":",
        _ => ",",
    }
}

/// Scans a quoted string starting at `start`; returns the decoded content
/// and the index past the closing quote. An unterminated literal consumes
/// the rest of the source.
fn scan_string(src: &str, start: usize) -> (String, usize) {
    let quote = src.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();
    while let Some((off, c)) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some((_, esc)) => out.push(decode_escape(esc)),
                None => break,
            }
        } else if c == quote {
            return (out, start + 1 + off + 1);
        } else {
            out.push(c);
        }
    }
    (out, src.len())
}

/// Scans a template literal; returns the raw body (escapes intact) and the
/// index past the closing backtick.
fn scan_template(src: &str, start: usize) -> (&str, usize) {
    let mut chars = src[start + 1..].char_indices();
    while let Some((off, c)) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == '`' {
            let body_end = start + 1 + off;
            return (&src[start + 1..body_end], body_end + 1);
        }
    }
    (&src[start + 1..], src.len())
}

fn scan_number(bytes: &[u8], start: usize) -> usize {
    let len = bytes.len();
    if bytes[start] == b'0'
        && start + 2 < len
        && (bytes[start + 1] == b'x' || bytes[start + 1] == b'X')
        && bytes[start + 2].is_ascii_hexdigit()
    {
        let mut i = start + 2;
        while i < len && bytes[i].is_ascii_hexdigit() {
            i += 1;
        }
        return i;
    }

    let mut i = start;
    while i < len && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < len && bytes[i] == b'.' && i + 1 < len && bytes[i + 1].is_ascii_digit() {
        i += 1;
        while i < len && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    // Exponent only counts when digits actually follow.
    if i < len && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < len && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < len && bytes[j].is_ascii_digit() {
            i = j;
            while i < len && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

pub(crate) fn decode_escape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        other => other,
    }
}

/// Decodes backslash escapes in template literal text.
pub(crate) fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(esc) => out.push(decode_escape(esc)),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Splits `src` on `delim` bytes at bracket depth zero outside string
/// literals. Filter chains split on `|`, loop prop lists on `,`.
pub(crate) fn split_top_level(src: &str, delim: u8) -> Vec<&str> {
    let bytes = src.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
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
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ if b == delim && depth == 0 => {
                parts.push(&src[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&src[start..]);
    parts
}

/// True when the tokens form exactly one property-access path: a leading
/// name followed by nothing but `.`/`?.` members and `[…]` index steps.
/// Writer targets and handler forwarders are validated with this shape.
#[must_use]
pub(crate) fn is_property_path(tokens: &[Token]) -> bool {
    let mut iter = tokens.iter();
    match iter.next() {
        Some(t) if matches!(t.kind, TokenKind::Ident | TokenKind::Binding(_)) => {}
        _ => return false,
    }
    let mut depth = 0usize;
    let mut expect_prop = false;
    for token in iter {
        if depth > 0 {
            match token.kind {
                TokenKind::OpenBracket => depth += 1,
                TokenKind::CloseBracket => depth -= 1,
                _ => {}
            }
            continue;
        }
        if expect_prop {
            if token.kind != TokenKind::Prop {
                return false;
            }
            expect_prop = false;
            continue;
        }
        if token.is_op(".") || token.is_op("?.") {
            expect_prop = true;
        } else if token.kind == TokenKind::OpenBracket {
            depth = 1;
        } else {
            return false;
        }
    }
    depth == 0 && !expect_prop
}

/// One piece of a template literal: literal text or a `${…}` interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TemplatePiece {
    Lit(String),
    Expr(String),
}

/// Splits a raw template body on `${…}` interpolations. Each interpolation
/// scans lazily to the first `}`; a `${` with no closing brace stays
/// literal text.
pub(crate) fn split_template(raw: &str) -> Vec<TemplatePiece> {
    let mut pieces = Vec::new();
    let bytes = raw.as_bytes();
    let mut pos = 0;
    while pos < raw.len() {
        match memchr::memmem::find(&bytes[pos..], b"${") {
            Some(off) => {
                let open = pos + off;
                match memchr::memchr(b'}', &bytes[open + 2..]) {
                    Some(close_off) => {
                        if open > pos {
                            pieces.push(TemplatePiece::Lit(decode_escapes(&raw[pos..open])));
                        }
                        let close = open + 2 + close_off;
                        pieces.push(TemplatePiece::Expr(raw[open + 2..close].to_string()));
                        pos = close + 1;
                    }
                    None => {
                        pieces.push(TemplatePiece::Lit(decode_escapes(&raw[pos..])));
                        pos = raw.len();
                    }
                }
            }
            None => {
                pieces.push(TemplatePiece::Lit(decode_escapes(&raw[pos..])));
                pos = raw.len();
            }
        }
    }
    pieces
}

//! Expression parser: token stream in, op list out.
//!
//! A precedence-climbing pass with a postfix-chain tracker. The tracker
//! remembers how a chain ended (bare name, member, index) so that an
//! assignment operator can rewrite the final read into the matching write,
//! and it collects the guard jumps of `?.` chains so they can all be
//! patched to one shared nullish tail.
//!
//! Parsing is deliberately forgiving: a missing operand evaluates as
//! `undefined`, an unparseable tail is dropped, and only bracket imbalance
//! is a hard error. Malformed input must still produce a runnable program.
//!
//! # Invariants
//!
//! - Every complete sub-expression nets exactly one value on the stack, so
//!   spliced fragments (template interpolations, writer values) compose.
//! - Once a `?.` step is taken, every later step of the same chain is
//!   guarded; a nullish intermediate short-circuits to `undefined`.
//! - The parser consumes a token or stops. No input loops forever.

use std::rc::Rc;

use weft_core::builtins;
use weft_core::Value;

use crate::error::CompileError;
use crate::ir::{BinOp, Op, UnOp};
use crate::token::{self, tokenize, Token, TokenKind};

const PREC_ASSIGN: u8 = 2;

/// Lowers a tokenized expression to ops. Statement separators (`;` and
/// top-level `,`) chain expressions; the last value is the result.
pub(crate) fn parse(tokens: &[Token], bindings: &[&str]) -> Result<Vec<Op>, CompileError> {
    Parser::new(tokens, bindings).parse_program()
}

/// Tokenizes and lowers a nested source fragment (template interpolations).
/// A `|` inside a fragment is ignored rather than starting a filter chain.
pub(crate) fn compile_fragment(src: &str, bindings: &[&str]) -> Result<Vec<Op>, CompileError> {
    let tokenized = tokenize(src, bindings);
    parse(&tokenized.tokens, bindings)
}

/// Lowers a write target: the whole token stream must be one assignable
/// property path. `value_ops` produce the value to store; they are spliced
/// in where an assignment's right-hand side would go.
pub(crate) fn parse_write(
    tokens: &[Token],
    bindings: &[&str],
    value_ops: Vec<Op>,
    source: &str,
) -> Result<Vec<Op>, CompileError> {
    let mut parser = Parser::new(tokens, bindings);
    let chain = parser.parse_unary()?;
    if parser.pos != tokens.len() || matches!(chain.kind, ChainKind::Other) {
        return Err(CompileError::InvalidWriteTarget {
            expr: source.to_string(),
        });
    }
    parser.finish_assignment(chain, None, AssignRhs::Ops(value_ops))?;
    Ok(parser.ops)
}

/// How a postfix chain ended; decides what an assignment rewrites.
enum ChainKind {
    /// A bare name, still a plain tracked read.
    ScopeRead(Rc<str>),
    /// Ends in a member read of this name.
    Prop(Rc<str>),
    /// Ends in an index read.
    Index,
    /// Not assignable (literal, call result, computed value).
    Other,
}

struct Chain {
    kind: ChainKind,
    /// A `?.` has been taken; later steps are guarded.
    safe: bool,
    /// Placeholder jump indices waiting for the shared nullish tail.
    nil_jumps: Vec<usize>,
}

impl Chain {
    fn other() -> Self {
        Chain {
            kind: ChainKind::Other,
            safe: false,
            nil_jumps: Vec::new(),
        }
    }
}

enum Access {
    Scope(Rc<str>),
    Prop(Rc<str>),
    Index,
}

enum AssignRhs {
    /// Parse the right-hand side from the token stream.
    FromTokens,
    /// Splice pre-lowered ops (writer value slots).
    Ops(Vec<Op>),
}

enum JumpKind {
    Always,
    IfFalsy,
    IfTruthy,
}

enum BinaryKind {
    Plain(BinOp),
    In,
    And,
    Or,
    Nullish,
    Ternary,
    Assign(Option<BinOp>),
}

fn classify_binary(token: &Token) -> Option<(u8, BinaryKind)> {
    let out = match token.kind {
        TokenKind::Op => match &*token.text {
            "*" => (13, BinaryKind::Plain(BinOp::Mul)),
            "/" => (13, BinaryKind::Plain(BinOp::Div)),
            "%" => (13, BinaryKind::Plain(BinOp::Rem)),
            "+" => (12, BinaryKind::Plain(BinOp::Add)),
            "-" => (12, BinaryKind::Plain(BinOp::Sub)),
            "<<" => (11, BinaryKind::Plain(BinOp::Shl)),
            ">>" => (11, BinaryKind::Plain(BinOp::Shr)),
            "<" => (10, BinaryKind::Plain(BinOp::Lt)),
            "<=" => (10, BinaryKind::Plain(BinOp::Le)),
            ">" => (10, BinaryKind::Plain(BinOp::Gt)),
            ">=" => (10, BinaryKind::Plain(BinOp::Ge)),
            "==" => (9, BinaryKind::Plain(BinOp::Eq)),
            "!=" => (9, BinaryKind::Plain(BinOp::Ne)),
            "===" => (9, BinaryKind::Plain(BinOp::StrictEq)),
            "!==" => (9, BinaryKind::Plain(BinOp::StrictNe)),
            "&" => (8, BinaryKind::Plain(BinOp::BitAnd)),
            "^" => (7, BinaryKind::Plain(BinOp::BitXor)),
            "&&" => (5, BinaryKind::And),
            "||" => (4, BinaryKind::Or),
            "??" => (4, BinaryKind::Nullish),
            "?" => (3, BinaryKind::Ternary),
            "=" => (PREC_ASSIGN, BinaryKind::Assign(None)),
            "+=" => (PREC_ASSIGN, BinaryKind::Assign(Some(BinOp::Add))),
            "-=" => (PREC_ASSIGN, BinaryKind::Assign(Some(BinOp::Sub))),
            "*=" => (PREC_ASSIGN, BinaryKind::Assign(Some(BinOp::Mul))),
            "/=" => (PREC_ASSIGN, BinaryKind::Assign(Some(BinOp::Div))),
            "%=" => (PREC_ASSIGN, BinaryKind::Assign(Some(BinOp::Rem))),
            _ => return None,
        },
        TokenKind::KeywordOp => match &*token.text {
            "in" => (10, BinaryKind::In),
            "instanceof" => (10, BinaryKind::Plain(BinOp::InstanceOf)),
            _ => return None,
        },
        _ => return None,
    };
    Some(out)
}

fn parse_number(text: &str) -> f64 {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64)
    } else {
        text.parse().unwrap_or(f64::NAN)
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    bindings: &'a [&'a str],
    pos: usize,
    ops: Vec<Op>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], bindings: &'a [&'a str]) -> Self {
        Parser {
            tokens,
            bindings,
            pos: 0,
            ops: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|t| t.kind.clone())
    }

    fn parse_program(mut self) -> Result<Vec<Op>, CompileError> {
        let mut produced = false;
        while self.pos < self.tokens.len() {
            match self.peek_kind() {
                Some(TokenKind::Semi | TokenKind::Comma) => {
                    self.pos += 1;
                    continue;
                }
                Some(TokenKind::CloseParen) => {
                    return Err(CompileError::UnbalancedBrackets { bracket: ')' })
                }
                Some(TokenKind::CloseBracket) => {
                    return Err(CompileError::UnbalancedBrackets { bracket: ']' })
                }
                Some(TokenKind::CloseBrace) => {
                    return Err(CompileError::UnbalancedBrackets { bracket: '}' })
                }
                _ => {}
            }
            if produced {
                self.ops.push(Op::PopDiscard);
            }
            self.parse_expr(PREC_ASSIGN)?;
            produced = true;
            match self.peek_kind() {
                None | Some(TokenKind::Semi | TokenKind::Comma) => {}
                Some(TokenKind::CloseParen) => {
                    return Err(CompileError::UnbalancedBrackets { bracket: ')' })
                }
                Some(TokenKind::CloseBracket) => {
                    return Err(CompileError::UnbalancedBrackets { bracket: ']' })
                }
                Some(TokenKind::CloseBrace) => {
                    return Err(CompileError::UnbalancedBrackets { bracket: '}' })
                }
                // Anything else is an unparseable tail; keep what we have.
                Some(_) => break,
            }
        }
        Ok(self.ops)
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<(), CompileError> {
        let chain = self.parse_unary()?;

        if min_prec <= PREC_ASSIGN
            && let Some((_, BinaryKind::Assign(op))) = self.peek().and_then(classify_binary)
        {
            self.pos += 1;
            return self.finish_assignment(chain, op, AssignRhs::FromTokens);
        }

        self.finalize_rvalue(chain);
        loop {
            let Some((prec, kind)) = self.peek().and_then(classify_binary) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            match kind {
                BinaryKind::Plain(op) => {
                    self.parse_expr(prec + 1)?;
                    self.ops.push(Op::Binary(op));
                }
                BinaryKind::In => {
                    self.parse_expr(prec + 1)?;
                    self.ops.push(Op::HasKey);
                }
                BinaryKind::And => {
                    let guard = self.push_placeholder();
                    self.ops.push(Op::PopDiscard);
                    self.parse_expr(prec + 1)?;
                    self.patch_jump(guard, JumpKind::IfFalsy);
                }
                BinaryKind::Or => {
                    let guard = self.push_placeholder();
                    self.ops.push(Op::PopDiscard);
                    self.parse_expr(prec + 1)?;
                    self.patch_jump(guard, JumpKind::IfTruthy);
                }
                BinaryKind::Nullish => {
                    // Nullish falls through to the replacement; anything else
                    // jumps past it.
                    self.ops.push(Op::JumpIfNullish(1));
                    let skip = self.push_placeholder();
                    self.ops.push(Op::PopDiscard);
                    self.parse_expr(prec + 1)?;
                    self.patch_jump(skip, JumpKind::Always);
                }
                BinaryKind::Ternary => {
                    let to_else = self.push_placeholder();
                    self.ops.push(Op::PopDiscard);
                    self.parse_expr(PREC_ASSIGN)?;
                    let has_colon = matches!(self.peek_kind(), Some(TokenKind::Colon));
                    if has_colon {
                        self.pos += 1;
                    }
                    let to_end = self.push_placeholder();
                    self.patch_jump(to_else, JumpKind::IfFalsy);
                    self.ops.push(Op::PopDiscard);
                    if has_colon {
                        self.parse_expr(PREC_ASSIGN)?;
                    } else {
                        self.ops.push(Op::PushLit(Value::Undefined));
                    }
                    self.patch_jump(to_end, JumpKind::Always);
                }
                BinaryKind::Assign(_) => {
                    // The accumulated value is no write target; the result is
                    // just the right-hand side.
                    self.ops.push(Op::PopDiscard);
                    self.parse_expr(PREC_ASSIGN)?;
                }
            }
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> Result<Chain, CompileError> {
        let Some(tok) = self.peek() else {
            return self.parse_postfix();
        };
        if tok.kind == TokenKind::Op {
            let un = match &*tok.text {
                "!" => Some(UnOp::Not),
                "-" => Some(UnOp::Neg),
                "+" => Some(UnOp::Plus),
                "~" => Some(UnOp::BitNot),
                _ => None,
            };
            if let Some(op) = un {
                self.pos += 1;
                let operand = self.parse_unary()?;
                self.finalize_rvalue(operand);
                self.ops.push(Op::Unary(op));
                return Ok(Chain::other());
            }
            return self.parse_postfix();
        }
        if tok.kind == TokenKind::KeywordOp {
            match &*tok.text {
                "typeof" => {
                    self.pos += 1;
                    let operand = self.parse_unary()?;
                    self.finalize_rvalue(operand);
                    self.ops.push(Op::TypeOf);
                    return Ok(Chain::other());
                }
                "void" => {
                    self.pos += 1;
                    let operand = self.parse_unary()?;
                    self.finalize_rvalue(operand);
                    self.ops.push(Op::Void);
                    return Ok(Chain::other());
                }
                "new" => {
                    self.pos += 1;
                    let operand = self.parse_unary()?;
                    self.finalize_rvalue(operand);
                    self.ops.push(Op::Unary(UnOp::New));
                    return Ok(Chain::other());
                }
                "delete" => {
                    self.pos += 1;
                    return self.parse_delete_operand();
                }
                // A binary keyword with no left operand.
                _ => {
                    self.ops.push(Op::PushLit(Value::Undefined));
                    return Ok(Chain::other());
                }
            }
        }
        self.parse_postfix()
    }

    fn parse_delete_operand(&mut self) -> Result<Chain, CompileError> {
        let mut chain = self.parse_unary()?;
        match self.strip_final_access(&mut chain) {
            Some(Access::Scope(name)) => self.ops.push(Op::DeleteScope(name)),
            Some(Access::Prop(name)) => self.ops.push(Op::DeleteProp(name)),
            Some(Access::Index) => self.ops.push(Op::DeleteIndex),
            None => {
                self.finalize_rvalue(chain);
                self.ops.push(Op::PopDiscard);
                self.ops.push(Op::PushLit(Value::Bool(true)));
                return Ok(Chain::other());
            }
        }
        self.emit_nil_tail(&chain, vec![Op::PushLit(Value::Bool(true))]);
        Ok(Chain::other())
    }

    fn parse_postfix(&mut self) -> Result<Chain, CompileError> {
        let mut chain = self.parse_primary()?;
        let mut pending_guard = false;
        loop {
            let Some(tok) = self.peek() else { break };
            let mut was_call = false;
            if tok.is_op(".") {
                // A dot with no property after it truncates the chain.
                let Some(name) = self.prop_name_at(self.pos + 1) else {
                    break;
                };
                self.pos += 2;
                self.flush_guard(&mut chain, &mut pending_guard);
                was_call = self.member_step(&mut chain, name, false)?;
            } else if tok.is_op("?.") {
                match self.tokens.get(self.pos + 1).map(|t| t.kind.clone()) {
                    Some(TokenKind::Prop) => {
                        let name = self.tokens[self.pos + 1].text.clone();
                        self.pos += 2;
                        self.flush_guard(&mut chain, &mut pending_guard);
                        was_call = self.member_step(&mut chain, name, true)?;
                    }
                    Some(TokenKind::OpenBracket) => {
                        self.pos += 2;
                        self.flush_guard(&mut chain, &mut pending_guard);
                        self.index_step(&mut chain, true)?;
                    }
                    Some(TokenKind::OpenParen) => {
                        self.pos += 2;
                        self.flush_guard(&mut chain, &mut pending_guard);
                        chain.safe = true;
                        let argc = self.parse_args()?;
                        self.ops.push(Op::SafeCall(argc));
                        chain.kind = ChainKind::Other;
                        was_call = true;
                    }
                    _ => break,
                }
            } else if tok.kind == TokenKind::OpenParen {
                self.pos += 1;
                self.flush_guard(&mut chain, &mut pending_guard);
                // A direct call on a bare name binds through the write frame.
                if let ChainKind::ScopeRead(name) = &chain.kind {
                    let name = name.clone();
                    let at = self.ops.len() - 1;
                    self.ops[at] = Op::ReadScopeForWrite(name);
                }
                let argc = self.parse_args()?;
                self.ops.push(if chain.safe {
                    Op::SafeCall(argc)
                } else {
                    Op::Call(argc)
                });
                chain.kind = ChainKind::Other;
                was_call = true;
            } else if tok.kind == TokenKind::OpenBracket {
                self.pos += 1;
                self.flush_guard(&mut chain, &mut pending_guard);
                self.index_step(&mut chain, false)?;
            } else {
                break;
            }
            // A call's own guard waits until we know another step follows.
            pending_guard = was_call && chain.safe;
        }
        Ok(chain)
    }

    fn member_step(
        &mut self,
        chain: &mut Chain,
        name: Rc<str>,
        guarded: bool,
    ) -> Result<bool, CompileError> {
        let fused = matches!(self.peek_kind(), Some(TokenKind::OpenParen));
        if guarded && !chain.safe {
            chain.safe = true;
            // A safe method call checks its receiver itself, so the prefix
            // guard is only needed for plain member reads.
            if !fused {
                self.push_nil_guard(chain);
            }
        }
        if fused {
            self.pos += 1;
            let argc = self.parse_args()?;
            self.ops.push(if chain.safe {
                Op::SafeCallMethod(name, argc)
            } else {
                Op::CallMethod(name, argc)
            });
            chain.kind = ChainKind::Other;
            return Ok(true);
        }
        self.ops.push(Op::GetProp(name.clone()));
        if chain.safe {
            self.push_nil_guard(chain);
        }
        chain.kind = ChainKind::Prop(name);
        Ok(false)
    }

    fn index_step(&mut self, chain: &mut Chain, guarded: bool) -> Result<(), CompileError> {
        if guarded && !chain.safe {
            chain.safe = true;
            self.push_nil_guard(chain);
        }
        self.parse_index_body()?;
        self.ops.push(Op::GetIndex);
        if chain.safe {
            self.push_nil_guard(chain);
        }
        chain.kind = ChainKind::Index;
        Ok(())
    }

    fn parse_primary(&mut self) -> Result<Chain, CompileError> {
        let Some(tok) = self.peek() else {
            self.ops.push(Op::PushLit(Value::Undefined));
            return Ok(Chain::other());
        };
        match tok.kind {
            TokenKind::Num => {
                self.pos += 1;
                self.ops.push(Op::PushLit(Value::Num(parse_number(&tok.text))));
                Ok(Chain::other())
            }
            TokenKind::Str => {
                self.pos += 1;
                self.ops.push(Op::PushLit(Value::Str(tok.text.clone())));
                Ok(Chain::other())
            }
            TokenKind::Template => {
                self.pos += 1;
                self.compile_template(&tok.text)?;
                Ok(Chain::other())
            }
            TokenKind::Ident => {
                self.pos += 1;
                self.ops.push(Op::ReadScope(tok.text.clone()));
                Ok(Chain {
                    kind: ChainKind::ScopeRead(tok.text.clone()),
                    safe: false,
                    nil_jumps: Vec::new(),
                })
            }
            TokenKind::Binding(slot) => {
                self.pos += 1;
                self.ops.push(Op::ReadBinding(slot));
                Ok(Chain::other())
            }
            TokenKind::Builtin => {
                self.pos += 1;
                self.ops.push(Op::ReadBuiltin(tok.text.clone()));
                Ok(Chain::other())
            }
            TokenKind::KeywordValue => {
                self.pos += 1;
                let op = self.word_value_op(&tok.text);
                self.ops.push(op);
                Ok(Chain::other())
            }
            TokenKind::OpenParen => {
                self.pos += 1;
                self.parse_group()?;
                Ok(Chain::other())
            }
            TokenKind::OpenBracket => {
                self.pos += 1;
                self.parse_array()?;
                Ok(Chain::other())
            }
            TokenKind::OpenBrace => {
                self.pos += 1;
                self.parse_object()?;
                Ok(Chain::other())
            }
            // A missing operand evaluates as undefined; the token stays put
            // for the caller to deal with.
            _ => {
                self.ops.push(Op::PushLit(Value::Undefined));
                Ok(Chain::other())
            }
        }
    }

    /// Template literal: lower each piece, then join the display forms.
    fn compile_template(&mut self, raw: &str) -> Result<(), CompileError> {
        let pieces = token::split_template(raw);
        let n = pieces.len();
        for piece in pieces {
            match piece {
                token::TemplatePiece::Lit(text) => {
                    self.ops.push(Op::PushLit(Value::str(text)));
                }
                token::TemplatePiece::Expr(src) => {
                    let sub = compile_fragment(&src, self.bindings)?;
                    if sub.is_empty() {
                        self.ops.push(Op::PushLit(Value::Undefined));
                    } else {
                        self.ops.extend(sub);
                    }
                }
            }
        }
        self.ops.push(Op::ConcatN(n));
        Ok(())
    }

    /// Resolves a bare word the way a value position would: keyword
    /// literals, bindings, builtins, then scope reads. Object-literal
    /// shorthand goes through here.
    fn word_value_op(&self, word: &str) -> Op {
        match word {
            "true" => Op::PushLit(Value::Bool(true)),
            "false" => Op::PushLit(Value::Bool(false)),
            "null" => Op::PushLit(Value::Null),
            "undefined" => Op::PushLit(Value::Undefined),
            "NaN" => Op::PushLit(Value::Num(f64::NAN)),
            "Infinity" => Op::PushLit(Value::Num(f64::INFINITY)),
            "this" => Op::ReadThis,
            _ => {
                if let Some(slot) = self.bindings.iter().position(|b| *b == word) {
                    Op::ReadBinding(slot)
                } else if builtins::is_global(word) {
                    Op::ReadBuiltin(Rc::from(word))
                } else {
                    Op::ReadScope(Rc::from(word))
                }
            }
        }
    }

    fn parse_group(&mut self) -> Result<(), CompileError> {
        if matches!(self.peek_kind(), Some(TokenKind::CloseParen)) {
            self.pos += 1;
            self.ops.push(Op::PushLit(Value::Undefined));
            return Ok(());
        }
        self.parse_expr(PREC_ASSIGN)?;
        while matches!(self.peek_kind(), Some(TokenKind::Comma)) {
            self.pos += 1;
            self.ops.push(Op::PopDiscard);
            self.parse_expr(PREC_ASSIGN)?;
        }
        self.expect_closer(TokenKind::CloseParen, '(')
    }

    fn parse_index_body(&mut self) -> Result<(), CompileError> {
        self.parse_expr(PREC_ASSIGN)?;
        while matches!(self.peek_kind(), Some(TokenKind::Comma)) {
            self.pos += 1;
            self.ops.push(Op::PopDiscard);
            self.parse_expr(PREC_ASSIGN)?;
        }
        self.expect_closer(TokenKind::CloseBracket, '[')
    }

    /// Call arguments; the opening paren is already consumed.
    fn parse_args(&mut self) -> Result<usize, CompileError> {
        let mut argc = 0;
        loop {
            match self.peek_kind() {
                Some(TokenKind::CloseParen) => {
                    self.pos += 1;
                    return Ok(argc);
                }
                None => return Err(CompileError::UnbalancedBrackets { bracket: '(' }),
                _ => {}
            }
            self.parse_expr(PREC_ASSIGN)?;
            argc += 1;
            match self.peek_kind() {
                Some(TokenKind::Comma) => self.pos += 1,
                Some(TokenKind::CloseParen) => {
                    self.pos += 1;
                    return Ok(argc);
                }
                _ => return Err(CompileError::UnbalancedBrackets { bracket: '(' }),
            }
        }
    }

    fn parse_array(&mut self) -> Result<(), CompileError> {
        let mut n = 0;
        loop {
            match self.peek_kind() {
                Some(TokenKind::CloseBracket) => {
                    self.pos += 1;
                    break;
                }
                None => return Err(CompileError::UnbalancedBrackets { bracket: '[' }),
                _ => {}
            }
            self.parse_expr(PREC_ASSIGN)?;
            n += 1;
            match self.peek_kind() {
                Some(TokenKind::Comma) => self.pos += 1,
                Some(TokenKind::CloseBracket) => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(CompileError::UnbalancedBrackets { bracket: '[' }),
            }
        }
        self.ops.push(Op::MakeList(n));
        Ok(())
    }

    fn parse_object(&mut self) -> Result<(), CompileError> {
        let mut keys: Vec<Rc<str>> = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::CloseBrace) => {
                    self.pos += 1;
                    break;
                }
                Some(TokenKind::ObjKey) => {}
                None => return Err(CompileError::UnbalancedBrackets { bracket: '{' }),
                // Junk between entries: skip a token and carry on.
                _ => {
                    self.pos += 1;
                    continue;
                }
            }
            let key = self.tokens[self.pos].text.clone();
            self.pos += 1;
            if matches!(self.peek_kind(), Some(TokenKind::Colon)) {
                self.pos += 1;
                self.parse_expr(PREC_ASSIGN)?;
            } else {
                // Shorthand entry reads the key's own name.
                let op = self.word_value_op(&key);
                self.ops.push(op);
            }
            keys.push(key);
            if matches!(self.peek_kind(), Some(TokenKind::Comma)) {
                self.pos += 1;
            }
        }
        self.ops.push(Op::MakeMap(keys));
        Ok(())
    }

    fn expect_closer(&mut self, kind: TokenKind, opener: char) -> Result<(), CompileError> {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(CompileError::UnbalancedBrackets { bracket: opener })
        }
    }

    fn prop_name_at(&self, at: usize) -> Option<Rc<str>> {
        self.tokens
            .get(at)
            .filter(|t| t.kind == TokenKind::Prop)
            .map(|t| t.text.clone())
    }

    fn flush_guard(&mut self, chain: &mut Chain, pending: &mut bool) {
        if *pending {
            self.push_nil_guard(chain);
            *pending = false;
        }
    }

    fn push_nil_guard(&mut self, chain: &mut Chain) {
        chain.nil_jumps.push(self.ops.len());
        self.ops.push(Op::JumpIfNullish(0));
    }

    fn push_placeholder(&mut self) -> usize {
        let at = self.ops.len();
        self.ops.push(Op::Jump(0));
        at
    }

    fn patch_jump(&mut self, at: usize, kind: JumpKind) {
        let rel = (self.ops.len() - at - 1) as isize;
        self.ops[at] = match kind {
            JumpKind::Always => Op::Jump(rel),
            JumpKind::IfFalsy => Op::JumpIfFalsy(rel),
            JumpKind::IfTruthy => Op::JumpIfTruthy(rel),
        };
    }

    /// Emits the shared nullish tail and points every collected guard at
    /// it. `tail_value` is what a short-circuited chain leaves behind.
    fn emit_nil_tail(&mut self, chain: &Chain, tail_value: Vec<Op>) {
        if chain.nil_jumps.is_empty() {
            return;
        }
        self.ops.push(Op::Jump(1 + tail_value.len() as isize));
        let nil_at = self.ops.len();
        self.ops.push(Op::PopDiscard);
        self.ops.extend(tail_value);
        for idx in &chain.nil_jumps {
            self.ops[*idx] = Op::JumpIfNullish((nil_at - idx - 1) as isize);
        }
    }

    fn finalize_rvalue(&mut self, chain: Chain) {
        self.emit_nil_tail(&chain, vec![Op::PushLit(Value::Undefined)]);
    }

    /// Removes the chain's final read so a write can take its place.
    /// Returns `None` when the chain never was assignable.
    fn strip_final_access(&mut self, chain: &mut Chain) -> Option<Access> {
        let access = match &chain.kind {
            ChainKind::ScopeRead(name) => Access::Scope(name.clone()),
            ChainKind::Prop(name) => Access::Prop(name.clone()),
            ChainKind::Index => Access::Index,
            ChainKind::Other => return None,
        };
        if chain.safe {
            // The guard that followed the final read goes with it.
            self.ops.pop();
            chain.nil_jumps.pop();
        }
        self.ops.pop();
        Some(access)
    }

    fn emit_rhs(&mut self, rhs: AssignRhs) -> Result<(), CompileError> {
        match rhs {
            AssignRhs::FromTokens => self.parse_expr(PREC_ASSIGN),
            AssignRhs::Ops(ops) => {
                self.ops.extend(ops);
                Ok(())
            }
        }
    }

    /// Rewrites a parsed chain into the matching write. `op` is the
    /// compound operator, or `None` for plain `=`.
    fn finish_assignment(
        &mut self,
        mut chain: Chain,
        op: Option<BinOp>,
        rhs: AssignRhs,
    ) -> Result<(), CompileError> {
        // Compound assignment to a bare name keeps its tracked read and
        // writes back to the owning frame.
        if let (Some(bin), ChainKind::ScopeRead(name)) = (op, &chain.kind) {
            let name = name.clone();
            self.emit_rhs(rhs)?;
            self.ops.push(Op::Binary(bin));
            self.ops.push(Op::AssignScope(name));
            return Ok(());
        }

        let Some(access) = self.strip_final_access(&mut chain) else {
            // Not a write target: the value is just the right-hand side.
            self.finalize_rvalue(chain);
            self.ops.push(Op::PopDiscard);
            return self.emit_rhs(rhs);
        };

        match (&access, op) {
            (Access::Prop(name), Some(_)) => {
                self.ops.push(Op::Dup);
                self.ops.push(Op::GetProp(name.clone()));
            }
            (Access::Index, Some(_)) => {
                self.ops.push(Op::Dup2);
                self.ops.push(Op::GetIndex);
            }
            _ => {}
        }

        let value_start = self.ops.len();
        self.emit_rhs(rhs)?;
        // A guarded plain assignment still produces the value when the walk
        // short-circuits, so the nil tail reproduces it.
        let tail_value = if op.is_none() && chain.safe {
            self.ops[value_start..].to_vec()
        } else {
            vec![Op::PushLit(Value::Undefined)]
        };
        if let Some(bin) = op {
            self.ops.push(Op::Binary(bin));
        }
        self.ops.push(match access {
            Access::Scope(name) => Op::SetScope(name),
            Access::Prop(name) => Op::SetProp(name),
            Access::Index => Op::SetIndex,
        });
        self.emit_nil_tail(&chain, tail_value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use weft_core::reactive::{ReactiveList, ReactiveMap};
    use weft_core::{EvalError, NativeFunc, Scope, Value};

    use super::*;
    use crate::filters::FilterRegistry;
    use crate::ir::Program;

    fn eval(src: &str, scope: &Scope) -> Result<Value, EvalError> {
        let tokenized = tokenize(src, &[]);
        let ops = parse(&tokenized.tokens, &[]).expect("expression should compile");
        Program::new(ops).run(scope, &[], &FilterRegistry::new())
    }

    fn eval_ok(src: &str, scope: &Scope) -> Value {
        eval(src, scope).expect("expression should evaluate")
    }

    fn compile(src: &str) -> Result<Vec<Op>, CompileError> {
        let tokenized = tokenize(src, &[]);
        parse(&tokenized.tokens, &[])
    }

    #[test]
    fn arithmetic_precedence_groups_products_before_sums() {
        let scope = Scope::root();
        assert_eq!(eval_ok("1 + 2 * 3", &scope), Value::Num(7.0));
        assert_eq!(eval_ok("(1 + 2) * 3", &scope), Value::Num(9.0));
        assert_eq!(eval_ok("2 < 3 === true", &scope), Value::Bool(true));
    }

    #[test]
    fn bare_assignment_defines_in_the_write_frame() {
        let scope = Scope::root();
        assert_eq!(eval_ok("x = 5", &scope), Value::Num(5.0));
        assert_eq!(scope.read("x"), Value::Num(5.0));
        assert_eq!(eval_ok("x += 2", &scope), Value::Num(7.0));
        assert_eq!(scope.read("x"), Value::Num(7.0));
    }

    #[test]
    fn member_and_index_assignments_write_through() {
        let scope = Scope::root();
        let map = ReactiveMap::new();
        map.set("n", Value::Num(1.0));
        scope.frame().set("m", Value::Map(map.clone()));
        let list = ReactiveList::from_values(vec![Value::Num(10.0)]);
        scope.frame().set("arr", Value::List(list.clone()));

        assert_eq!(eval_ok("m.n = 3", &scope), Value::Num(3.0));
        assert_eq!(map.get("n"), Value::Num(3.0));

        assert_eq!(eval_ok("m.n += 4", &scope), Value::Num(7.0));
        assert_eq!(map.get("n"), Value::Num(7.0));

        assert_eq!(eval_ok("arr[0] += 2", &scope), Value::Num(12.0));
        assert_eq!(list.get(0), Value::Num(12.0));
    }

    #[test]
    fn short_circuit_skips_the_right_operand() {
        let scope = Scope::root();
        // `missing()` would be a NotCallable error if it ever ran.
        assert_eq!(eval_ok("'' && missing()", &scope), Value::str(""));
        assert_eq!(eval_ok("1 || missing()", &scope), Value::Num(1.0));
        assert_eq!(eval_ok("0 ?? missing()", &scope), Value::Num(0.0));
        assert_eq!(eval_ok("null ?? 'fallback'", &scope), Value::str("fallback"));
    }

    #[test]
    fn ternary_picks_by_truthiness() {
        let scope = Scope::root();
        assert_eq!(eval_ok("1 ? 'a' : 'b'", &scope), Value::str("a"));
        assert_eq!(eval_ok("0 ? 'a' : 'b'", &scope), Value::str("b"));
        assert_eq!(
            eval_ok("0 ? 'a' : 1 ? 'b' : 'c'", &scope),
            Value::str("b"),
            "ternaries nest to the right"
        );
    }

    #[test]
    fn safe_chains_swallow_nullish_prefixes() {
        let scope = Scope::root();
        assert_eq!(eval_ok("ghost?.name", &scope), Value::Undefined);
        assert_eq!(eval_ok("ghost?.deep.further[0]", &scope), Value::Undefined);
        assert!(
            matches!(eval("ghost.name", &scope), Err(EvalError::NilAccess { .. })),
            "an unguarded chain still errors"
        );

        let map = ReactiveMap::new();
        map.set("x", Value::Null);
        scope.frame().set("m", Value::Map(map));
        assert_eq!(
            eval_ok("m?.x", &scope),
            Value::Undefined,
            "a nullish result normalizes to undefined"
        );
    }

    #[test]
    fn safe_assignment_produces_the_value_either_way() {
        let scope = Scope::root();
        assert_eq!(eval_ok("ghost?.deep = 4", &scope), Value::Num(4.0));

        let map = ReactiveMap::new();
        scope.frame().set("m", Value::Map(map.clone()));
        assert_eq!(eval_ok("m?.n = 9", &scope), Value::Num(9.0));
        assert_eq!(map.get("n"), Value::Num(9.0));
    }

    #[test]
    fn safe_calls_bail_instead_of_erroring() {
        let scope = Scope::root();
        assert_eq!(eval_ok("ghost?.frob()", &scope), Value::Undefined);
        scope.frame().set("n", Value::Num(1.0));
        assert_eq!(eval_ok("n?.()", &scope), Value::Undefined);

        let list = ReactiveList::from_values(vec![Value::Num(1.0)]);
        scope.frame().set("items", Value::List(list));
        assert_eq!(eval_ok("items?.includes(1)", &scope), Value::Bool(true));
    }

    #[test]
    fn method_calls_dispatch_natively() {
        let scope = Scope::root();
        let list = ReactiveList::from_values(vec![Value::Num(1.0)]);
        scope.frame().set("items", Value::List(list.clone()));
        assert_eq!(eval_ok("items.push(4)", &scope), Value::Num(2.0));
        assert_eq!(list.len(), 2);
        assert_eq!(eval_ok("items.includes(4)", &scope), Value::Bool(true));
        assert_eq!(eval_ok("'  pad  '.trim()", &scope), Value::str("pad"));
    }

    #[test]
    fn direct_calls_bind_through_the_write_frame() {
        let scope = Scope::root();
        scope.frame().set(
            "twice",
            Value::Func(NativeFunc::new("twice", |args| {
                let n = args.first().map_or(0.0, Value::to_number);
                Ok(Value::Num(n * 2.0))
            })),
        );
        assert_eq!(eval_ok("twice(21)", &scope), Value::Num(42.0));

        let ops = compile("twice(21)").expect("compiles");
        assert!(
            matches!(ops[0], Op::ReadScopeForWrite(_)),
            "call targets resolve against the write frame"
        );
    }

    #[test]
    fn builtin_globals_resolve_without_scope_reads() {
        let scope = Scope::root();
        assert_eq!(eval_ok("Math.max(1, 5, 3)", &scope), Value::Num(5.0));
        assert_eq!(eval_ok("parseInt('42px')", &scope), Value::Num(42.0));
    }

    #[test]
    fn statements_chain_with_the_last_value_winning() {
        let scope = Scope::root();
        assert_eq!(eval_ok("a = 1; b = 2; a + b", &scope), Value::Num(3.0));
        assert_eq!(eval_ok("c = 1, c + 9", &scope), Value::Num(10.0));
        assert_eq!(eval_ok("(d = 1, d + 1)", &scope), Value::Num(2.0));
    }

    #[test]
    fn object_and_array_literals_build_reactive_containers() {
        let scope = Scope::root();
        scope.frame().set("x", Value::Num(7.0));
        match eval_ok("{n: 1, x, 'two words': 2}", &scope) {
            Value::Map(m) => {
                assert_eq!(m.get("n"), Value::Num(1.0));
                assert_eq!(m.get("x"), Value::Num(7.0), "shorthand reads the name");
                assert_eq!(m.get("two words"), Value::Num(2.0));
            }
            other => panic!("expected a map, got {other:?}"),
        }
        match eval_ok("[1, 'b', [2]]", &scope) {
            Value::List(l) => {
                assert_eq!(l.len(), 3);
                assert_eq!(l.get(1), Value::str("b"));
            }
            other => panic!("expected a list, got {other:?}"),
        }
    }

    #[test]
    fn delete_and_in_cover_member_presence() {
        let scope = Scope::root();
        let map = ReactiveMap::new();
        map.set("k", Value::Num(1.0));
        scope.frame().set("m", Value::Map(map));
        assert_eq!(eval_ok("'k' in m", &scope), Value::Bool(true));
        assert_eq!(eval_ok("delete m.k", &scope), Value::Bool(true));
        assert_eq!(eval_ok("'k' in m", &scope), Value::Bool(false));
    }

    #[test]
    fn typeof_reports_value_tags() {
        let scope = Scope::root();
        assert_eq!(eval_ok("typeof 1", &scope), Value::str("number"));
        assert_eq!(eval_ok("typeof 'x'", &scope), Value::str("string"));
        assert_eq!(
            eval_ok("typeof ghost", &scope),
            Value::str("undefined"),
            "an unresolved name does not error under typeof"
        );
    }

    #[test]
    fn template_literals_interpolate_display_forms() {
        let scope = Scope::root();
        scope.frame().set("x", Value::Num(2.0));
        assert_eq!(eval_ok("`a${x}b`", &scope), Value::str("a2b"));
        assert_eq!(eval_ok("`${ghost}`", &scope), Value::str("undefined"));
        assert_eq!(eval_ok("``", &scope), Value::str(""));
    }

    #[test]
    fn unary_operators_coerce_their_operand() {
        let scope = Scope::root();
        assert_eq!(eval_ok("-'3'", &scope), Value::Num(-3.0));
        assert_eq!(eval_ok("+'3'", &scope), Value::Num(3.0));
        assert_eq!(eval_ok("!0", &scope), Value::Bool(true));
        assert_eq!(eval_ok("~0", &scope), Value::Num(-1.0));
        assert_eq!(eval_ok("void 7", &scope), Value::Undefined);
    }

    #[test]
    fn unbalanced_brackets_are_the_only_hard_errors() {
        assert_eq!(
            compile("(a"),
            Err(CompileError::UnbalancedBrackets { bracket: '(' })
        );
        assert_eq!(
            compile("a)"),
            Err(CompileError::UnbalancedBrackets { bracket: ')' })
        );
        assert_eq!(
            compile("items[0"),
            Err(CompileError::UnbalancedBrackets { bracket: '[' })
        );
    }

    #[test]
    fn unparseable_tails_truncate() {
        let scope = Scope::root();
        scope.frame().set("x", Value::Num(2.0));
        // The tokenizer stops at `@`; what parsed still runs.
        assert_eq!(eval_ok("x + 1 @ nonsense", &scope), Value::Num(3.0));
        // A stray trailing operand is dropped.
        assert_eq!(eval_ok("x + 1 zzz", &scope), Value::Num(3.0));
    }

    #[test]
    fn missing_operands_evaluate_as_undefined() {
        let scope = Scope::root();
        assert!(eval_ok("1 +", &scope).to_number().is_nan());
        assert!(eval_ok("2 *", &scope).to_number().is_nan());
        assert_eq!(eval_ok("!", &scope), Value::Bool(true));
    }

    #[test]
    fn binding_slots_read_positionally() {
        let scope = Scope::root();
        let tokenized = tokenize("event.key + suffix", &["event"]);
        let ops = parse(&tokenized.tokens, &["event"]).expect("compiles");
        let event = ReactiveMap::new();
        event.set("key", Value::str("Enter"));
        scope.frame().set("suffix", Value::str("!"));
        let out = Program::new(ops)
            .run(&scope, &[Value::Map(event)], &FilterRegistry::new())
            .expect("evaluates");
        assert_eq!(out, Value::str("Enter!"));
    }

    #[test]
    fn write_targets_compile_to_assignments() {
        let scope = Scope::root();
        let map = ReactiveMap::new();
        scope.frame().set("m", Value::Map(map.clone()));

        let tokenized = tokenize("m.n", &[]);
        let ops = parse_write(&tokenized.tokens, &[], vec![Op::ReadBinding(0)], "m.n")
            .expect("path target compiles");
        Program::new(ops)
            .run(&scope, &[Value::Num(42.0)], &FilterRegistry::new())
            .expect("write runs");
        assert_eq!(map.get("n"), Value::Num(42.0));

        let tokenized = tokenize("bare", &[]);
        let ops = parse_write(&tokenized.tokens, &[], vec![Op::ReadBinding(0)], "bare")
            .expect("bare target compiles");
        Program::new(ops)
            .run(&scope, &[Value::str("v")], &FilterRegistry::new())
            .expect("write runs");
        assert_eq!(scope.read("bare"), Value::str("v"));
    }

    #[test]
    fn non_path_write_targets_are_rejected() {
        let tokenized = tokenize("a + b", &[]);
        assert_eq!(
            parse_write(&tokenized.tokens, &[], vec![Op::ReadBinding(0)], "a + b"),
            Err(CompileError::InvalidWriteTarget {
                expr: "a + b".into()
            })
        );
    }
}

//! Join predicate language.
//!
//! ```text
//! expr       := or
//! or         := and ( OR and )*
//! and        := not ( AND not )*
//! not        := NOT not | '(' expr ')' | comparison
//! comparison := operand ( cmp operand | IS [NOT] NULL )
//! operand    := alias '.' attribute | 'string' | number | true | false | null
//! cmp        := = | <> | != | < | <= | > | >=
//! ```
//!
//! Keywords are case-insensitive; identifiers may be backtick-quoted.

use std::cmp::Ordering;

use serde_json::{Number, Value};
use thiserror::Error;

use graphloom_core::{key_component, Row};

use super::alias::{AliasTable, Side};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PredicateError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unknown alias '{0}'")]
    UnknownAlias(String),

    #[error("alias '{0}' is ambiguous")]
    AmbiguousAlias(String),
}

/// A resolved `alias.attribute` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrRef {
    pub side: Side,
    pub attribute: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Attr(AttrRef),
    Literal(Value),
}

impl Operand {
    fn as_attr(&self) -> Option<&AttrRef> {
        match self {
            Self::Attr(attr) => Some(attr),
            Self::Literal(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Or(Box<Predicate>, Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Compare {
        op: CmpOp,
        left: Operand,
        right: Operand,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
}

/// Rows bound to each side of a mapping during evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binding<'a> {
    slots: [Option<&'a Row>; 3],
}

impl<'a> Binding<'a> {
    pub fn bind(mut self, side: Side, row: &'a Row) -> Self {
        self.slots[side.index()] = Some(row);
        self
    }

    pub fn row(&self, side: Side) -> Option<&'a Row> {
        self.slots[side.index()]
    }

    pub fn value(&self, attr: &AttrRef) -> &'a Value {
        match self.row(attr.side) {
            Some(row) => row.get(&attr.attribute),
            None => &NULL,
        }
    }
}

static NULL: Value = Value::Null;

impl Predicate {
    pub fn parse(text: &str, aliases: &AliasTable) -> Result<Self, PredicateError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            aliases,
        };
        let predicate = parser.or()?;
        match parser.peek() {
            Token::Eof => Ok(predicate),
            _ => Err(parser.error("unexpected trailing input")),
        }
    }

    pub fn evaluate(&self, binding: &Binding<'_>) -> bool {
        match self {
            Self::Or(a, b) => a.evaluate(binding) || b.evaluate(binding),
            Self::And(a, b) => a.evaluate(binding) && b.evaluate(binding),
            Self::Not(inner) => !inner.evaluate(binding),
            Self::Compare { op, left, right } => {
                compare(*op, resolve(left, binding), resolve(right, binding))
            }
            Self::IsNull { operand, negated } => resolve(operand, binding).is_null() != *negated,
        }
    }

    /// Every attribute reference in the predicate.
    pub fn references(&self) -> Vec<&AttrRef> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'p>(&'p self, out: &mut Vec<&'p AttrRef>) {
        match self {
            Self::Or(a, b) | Self::And(a, b) => {
                a.collect_refs(out);
                b.collect_refs(out);
            }
            Self::Not(inner) => inner.collect_refs(out),
            Self::Compare { left, right, .. } => {
                out.extend([left, right].into_iter().filter_map(Operand::as_attr));
            }
            Self::IsNull { operand, .. } => out.extend(operand.as_attr()),
        }
    }

    /// Top-level `a.x = b.y` conjuncts between two different sides.
    pub fn equi_joins(&self) -> Vec<(&AttrRef, &AttrRef)> {
        let mut out = Vec::new();
        self.collect_equi(&mut out);
        out
    }

    fn collect_equi<'p>(&'p self, out: &mut Vec<(&'p AttrRef, &'p AttrRef)>) {
        match self {
            Self::And(a, b) => {
                a.collect_equi(out);
                b.collect_equi(out);
            }
            Self::Compare {
                op: CmpOp::Eq,
                left: Operand::Attr(l),
                right: Operand::Attr(r),
            } if l.side != r.side => out.push((l, r)),
            _ => {}
        }
    }
}

fn resolve<'a>(operand: &'a Operand, binding: &Binding<'a>) -> &'a Value {
    match operand {
        Operand::Attr(attr) => binding.value(attr),
        Operand::Literal(value) => value,
    }
}

/// Null never compares. Equality is type-tolerant (`1` equals `"1"`);
/// ordering applies to number pairs and string pairs only.
fn compare(op: CmpOp, left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    match op {
        CmpOp::Eq => key_component(left) == key_component(right),
        CmpOp::Ne => key_component(left) != key_component(right),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(o) => match op {
                    CmpOp::Lt => o == Ordering::Less,
                    CmpOp::Le => o != Ordering::Greater,
                    CmpOp::Gt => o == Ordering::Greater,
                    _ => o != Ordering::Less,
                },
                None => false,
            }
        }
    }
}

// ── Lexer ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word { text: String, quoted: bool },
    Str(String),
    Num(Number),
    Dot,
    LParen,
    RParen,
    Cmp(CmpOp),
    Eof,
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, PredicateError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let syntax = |offset: usize, message: &str| PredicateError::Syntax {
        offset,
        message: message.to_string(),
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push((offset, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((offset, Token::RParen));
                i += 1;
            }
            '.' => {
                tokens.push((offset, Token::Dot));
                i += 1;
            }
            '=' => {
                tokens.push((offset, Token::Cmp(CmpOp::Eq)));
                i += 1;
            }
            '!' | '<' | '>' => {
                let next = chars.get(i + 1).map(|(_, c)| *c);
                let (op, width) = match (c, next) {
                    ('!', Some('=')) | ('<', Some('>')) => (CmpOp::Ne, 2),
                    ('<', Some('=')) => (CmpOp::Le, 2),
                    ('>', Some('=')) => (CmpOp::Ge, 2),
                    ('<', _) => (CmpOp::Lt, 1),
                    ('>', _) => (CmpOp::Gt, 1),
                    _ => return Err(syntax(offset, "expected '!='")),
                };
                tokens.push((offset, Token::Cmp(op)));
                i += width;
            }
            '\'' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i).map(|(_, c)| *c) {
                        None => return Err(syntax(offset, "unterminated string")),
                        Some('\\') => {
                            match chars.get(i + 1).map(|(_, c)| *c) {
                                Some(escaped) => value.push(escaped),
                                None => return Err(syntax(offset, "unterminated string")),
                            }
                            i += 2;
                        }
                        Some('\'') if chars.get(i + 1).map(|(_, c)| *c) == Some('\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            value.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push((offset, Token::Str(value)));
            }
            '`' => {
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i).map(|(_, c)| *c) {
                        None => return Err(syntax(offset, "unterminated quoted identifier")),
                        Some('`') => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            value.push(other);
                            i += 1;
                        }
                    }
                }
                tokens.push((
                    offset,
                    Token::Word {
                        text: value,
                        quoted: true,
                    },
                ));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|(_, d)| d.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while chars
                    .get(i)
                    .is_some_and(|(_, d)| d.is_ascii_digit() || *d == '.')
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push((offset, Token::Num(parse_number(&literal, offset)?)));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|(_, d)| d.is_alphanumeric() || *d == '_')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                tokens.push((offset, Token::Word { text, quoted: false }));
            }
            other => {
                return Err(PredicateError::Syntax {
                    offset,
                    message: format!("unexpected character '{other}'"),
                })
            }
        }
    }

    tokens.push((text.len(), Token::Eof));
    Ok(tokens)
}

fn parse_number(literal: &str, offset: usize) -> Result<Number, PredicateError> {
    if let Ok(i) = literal.parse::<i64>() {
        return Ok(Number::from(i));
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| PredicateError::Syntax {
            offset,
            message: format!("invalid number '{literal}'"),
        })
}

// ── Parser ────────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    aliases: &'a AliasTable,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|(_, t)| t)
            .unwrap_or(&Token::Eof)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: &str) -> PredicateError {
        PredicateError::Syntax {
            offset: self.offset(),
            message: message.to_string(),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Word { text, quoted: false } if text.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or(&mut self) -> Result<Predicate, PredicateError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Predicate, PredicateError> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            let right = self.not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Predicate, PredicateError> {
        if self.eat_keyword("not") {
            return Ok(Predicate::Not(Box::new(self.not()?)));
        }
        if *self.peek() == Token::LParen {
            self.advance();
            let inner = self.or()?;
            if self.advance() != Token::RParen {
                return Err(self.error("expected ')'"));
            }
            return Ok(inner);
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Predicate, PredicateError> {
        let left = self.operand()?;

        if self.eat_keyword("is") {
            let negated = self.eat_keyword("not");
            if !self.eat_keyword("null") {
                return Err(self.error("expected NULL"));
            }
            return Ok(Predicate::IsNull {
                operand: left,
                negated,
            });
        }

        match self.advance() {
            Token::Cmp(op) => {
                let right = self.operand()?;
                Ok(Predicate::Compare { op, left, right })
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected comparison operator"))
            }
        }
    }

    fn operand(&mut self) -> Result<Operand, PredicateError> {
        let offset = self.offset();
        match self.advance() {
            Token::Str(s) => Ok(Operand::Literal(Value::String(s))),
            Token::Num(n) => Ok(Operand::Literal(Value::Number(n))),
            Token::Word { text, quoted } => {
                if *self.peek() == Token::Dot {
                    self.advance();
                    let attribute = match self.advance() {
                        Token::Word { text, .. } => text,
                        _ => return Err(self.error("expected attribute name after '.'")),
                    };
                    let side = self.aliases.resolve(&text)?;
                    return Ok(Operand::Attr(AttrRef { side, attribute }));
                }
                if !quoted {
                    match text.to_ascii_lowercase().as_str() {
                        "true" => return Ok(Operand::Literal(Value::Bool(true))),
                        "false" => return Ok(Operand::Literal(Value::Bool(false))),
                        "null" => return Ok(Operand::Literal(Value::Null)),
                        _ => {}
                    }
                }
                Err(PredicateError::Syntax {
                    offset,
                    message: format!("expected alias.attribute, found '{text}'"),
                })
            }
            _ => Err(PredicateError::Syntax {
                offset,
                message: "expected operand".to_string(),
            }),
        }
    }
}

//! Rule evaluation.
//!
//! The full rule language belongs to the host. [`BasicRuleEvaluator`]
//! covers the subset realtime deployments use most: comparisons between
//! record fields, `@request.*` values and literals, joined with `&&`, `||`
//! and parentheses.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

use livebase_core::error::AppError;
use livebase_core::result::AppResult;
use livebase_entity::record::Record;

use crate::connection::options::normalize_header;

use super::context::RequestInfo;

/// Evaluates a non-locked access rule or filter expression.
pub trait RuleEvaluator: Send + Sync + fmt::Debug {
    /// Whether `record` satisfies `expression` for the requester in `info`.
    fn evaluate(&self, expression: &str, record: &Record, info: &RequestInfo) -> AppResult<bool>;
}

/// Built-in evaluator for simple comparison rules.
///
/// Supported operands: `@request.auth.<field>`, `@request.query.<key>`,
/// `@request.headers.<name>`, `@request.context`, record field paths
/// (`author`, `meta.tier`), quoted strings, numbers, `true`, `false`,
/// `null`. Operators: `=`, `!=`, `>`, `>=`, `<`, `<=`, `~` (contains,
/// case-insensitive) and `!~`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRuleEvaluator;

impl RuleEvaluator for BasicRuleEvaluator {
    fn evaluate(&self, expression: &str, record: &Record, info: &RequestInfo) -> AppResult<bool> {
        if expression.trim().is_empty() {
            return Ok(true);
        }
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            record,
            info,
        };
        let result = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(AppError::rule(format!(
                "Unexpected trailing input in rule '{expression}'"
            )));
        }
        Ok(result)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Op(CmpOp),
    Str(String),
    Num(f64),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
}

fn tokenize(input: &str) -> AppResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '!' if next == Some('~') => {
                tokens.push(Token::Op(CmpOp::NotLike));
                i += 2;
            }
            '~' => {
                tokens.push(Token::Op(CmpOp::Like));
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Op(CmpOp::Gt));
                i += 1;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Op(CmpOp::Lt));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(AppError::rule("Unterminated string literal")),
                        Some('\\') => {
                            if let Some(escaped) = chars.get(i + 1) {
                                value.push(*escaped);
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            value.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let number = raw
                    .parse::<f64>()
                    .map_err(|_| AppError::rule(format!("Invalid number '{raw}'")))?;
                tokens.push(Token::Num(number));
            }
            c if is_ident_char(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(AppError::rule(format!("Unexpected character '{other}' in rule")));
            }
        }
    }

    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | ':')
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    record: &'a Record,
    info: &'a RequestInfo,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> AppResult<bool> {
        let mut result = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            result = result || rhs;
        }
        Ok(result)
    }

    fn parse_and(&mut self) -> AppResult<bool> {
        let mut result = self.parse_primary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_primary()?;
            result = result && rhs;
        }
        Ok(result)
    }

    fn parse_primary(&mut self) -> AppResult<bool> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            if self.advance() != Some(Token::RParen) {
                return Err(AppError::rule("Missing closing parenthesis"));
            }
            return Ok(inner);
        }

        let left = self.parse_operand()?;
        let op = match self.advance() {
            Some(Token::Op(op)) => op,
            other => {
                return Err(AppError::rule(format!(
                    "Expected comparison operator, found {other:?}"
                )));
            }
        };
        let right = self.parse_operand()?;
        Ok(compare(&left, op, &right))
    }

    fn parse_operand(&mut self) -> AppResult<Value> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Num(n)) => Ok(serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null)),
            Some(Token::Ident(ident)) => self.resolve(&ident),
            other => Err(AppError::rule(format!("Expected operand, found {other:?}"))),
        }
    }

    fn resolve(&self, ident: &str) -> AppResult<Value> {
        match ident {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "null" => return Ok(Value::Null),
            "@request.context" => return Ok(Value::String(self.info.context.to_string())),
            _ => {}
        }

        if let Some(path) = ident.strip_prefix("@request.auth.") {
            return Ok(match &self.info.auth {
                Some(auth) => lookup_record(auth, path),
                None => Value::Null,
            });
        }
        if let Some(key) = ident.strip_prefix("@request.query.") {
            return Ok(self.info.query.get(key).cloned().unwrap_or(Value::Null));
        }
        if let Some(name) = ident.strip_prefix("@request.headers.") {
            return Ok(self
                .info
                .headers
                .get(&normalize_header(name))
                .cloned()
                .unwrap_or(Value::Null));
        }
        if ident.starts_with('@') {
            return Err(AppError::rule(format!("Unsupported rule identifier '{ident}'")));
        }

        Ok(lookup_record(self.record, ident))
    }
}

fn lookup_record(record: &Record, path: &str) -> Value {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return Value::Null;
    };
    let mut current = record.get(first).unwrap_or(Value::Null);
    for segment in segments {
        current = current.get(segment).cloned().unwrap_or(Value::Null);
    }
    current
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    // Multi-value fields match when any element matches.
    if let Value::Array(items) = left {
        return match op {
            CmpOp::Ne | CmpOp::NotLike => items.iter().all(|item| compare_scalar(item, op, right)),
            _ => items.iter().any(|item| compare_scalar(item, op, right)),
        };
    }
    compare_scalar(left, op, right)
}

fn compare_scalar(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq => loosely_equal(left, right),
        CmpOp::Ne => !loosely_equal(left, right),
        CmpOp::Like => text(left)
            .to_lowercase()
            .contains(&text(right).to_lowercase()),
        CmpOp::NotLike => !text(left)
            .to_lowercase()
            .contains(&text(right).to_lowercase()),
        CmpOp::Gt => order(left, right) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::Lt => order(left, right) == Some(Ordering::Less),
        CmpOp::Le => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            s == if *b { "true" } else { "false" }
        }
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (number(left), number(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

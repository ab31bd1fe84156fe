//! Match-filter boolean expression language.
//!
//! Grammar (informal):
//!   expr       := or_expr
//!   or_expr    := and_expr ( '|' and_expr )*
//!   and_expr   := unary ( '&' unary )*
//!   unary      := '!' unary | '(' or_expr ')' | comparison | presence
//!   presence   := identifier '?'
//!   comparison := identifier op value | identifier
//!   op         := '=' | '!=' | '>' | '<' | '>=' | '<=' | '~='
//!   value      := quoted string | bare number/identifier
//!
//! A small hand-written recursive-descent parser over a `&str`; no
//! parser-combinator crate pulled in for a grammar this size. `regex` backs
//! the `~=` operator only.

use regex::Regex;
use serde_json::Value;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Not(Box<Ast>),
    Presence(String),
    Truthy(String),
    Compare { key: String, op: CompareOp, value: Literal },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    RegexMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
}

#[derive(Debug, thiserror::Error)]
#[error("match-filter parse error at byte {pos}: {message}")]
pub struct ParseError {
    pub pos: usize,
    pub message: String,
}

struct Parser<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, chars: src.char_indices().peekable() }
    }

    fn pos(&mut self) -> usize {
        self.chars.peek().map(|(i, _)| *i).unwrap_or(self.src.len())
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.peek().map(|(_, c)| *c)
    }

    fn err(&mut self, message: impl Into<String>) -> ParseError {
        ParseError { pos: self.pos(), message: message.into() }
    }

    fn parse_or(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.peek_char() == Some('|') {
                self.chars.next();
                let right = self.parse_and()?;
                left = Ast::Or(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            if self.peek_char() == Some('&') {
                self.chars.next();
                let right = self.parse_unary()?;
                left = Ast::And(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Ast, ParseError> {
        match self.peek_char() {
            Some('!') => {
                self.chars.next();
                self.skip_ws();
                // `!key` (truthiness negation) vs `!(expr)`.
                if self.peek_char() == Some('(') {
                    let inner = self.parse_paren()?;
                    Ok(Ast::Not(Box::new(inner)))
                } else {
                    let ident = self.parse_identifier()?;
                    Ok(Ast::Not(Box::new(Ast::Truthy(ident))))
                }
            }
            Some('(') => self.parse_paren(),
            _ => self.parse_comparison(),
        }
    }

    fn parse_paren(&mut self) -> Result<Ast, ParseError> {
        self.skip_ws();
        if self.chars.next().map(|(_, c)| c) != Some('(') {
            return Err(self.err("expected '('"));
        }
        let inner = self.parse_or()?;
        self.skip_ws();
        if self.chars.next().map(|(_, c)| c) != Some(')') {
            return Err(self.err("expected ')'"));
        }
        Ok(inner)
    }

    fn parse_identifier(&mut self) -> Result<String, ParseError> {
        self.skip_ws();
        let mut ident = String::new();
        while let Some((_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '-' {
                ident.push(*c);
                self.chars.next();
            } else {
                break;
            }
        }
        if ident.is_empty() {
            return Err(self.err("expected identifier"));
        }
        Ok(ident)
    }

    fn parse_comparison(&mut self) -> Result<Ast, ParseError> {
        let key = self.parse_identifier()?;
        self.skip_ws();
        if self.peek_char() == Some('?') {
            self.chars.next();
            return Ok(Ast::Presence(key));
        }
        let op = match self.peek_two() {
            (Some('='), _) => {
                self.chars.next();
                CompareOp::Eq
            }
            (Some('!'), Some('=')) => {
                self.chars.next();
                self.chars.next();
                CompareOp::Ne
            }
            (Some('>'), Some('=')) => {
                self.chars.next();
                self.chars.next();
                CompareOp::Ge
            }
            (Some('<'), Some('=')) => {
                self.chars.next();
                self.chars.next();
                CompareOp::Le
            }
            (Some('>'), _) => {
                self.chars.next();
                CompareOp::Gt
            }
            (Some('<'), _) => {
                self.chars.next();
                CompareOp::Lt
            }
            (Some('~'), Some('=')) => {
                self.chars.next();
                self.chars.next();
                CompareOp::RegexMatch
            }
            _ => return Ok(Ast::Truthy(key)),
        };
        self.skip_ws();
        let value = self.parse_value()?;
        Ok(Ast::Compare { key, op, value })
    }

    fn peek_two(&mut self) -> (Option<char>, Option<char>) {
        self.skip_ws();
        let mut iter = self.chars.clone();
        let first = iter.next().map(|(_, c)| c);
        let second = iter.next().map(|(_, c)| c);
        (first, second)
    }

    fn parse_value(&mut self) -> Result<Literal, ParseError> {
        self.skip_ws();
        if self.peek_char() == Some('\'') {
            self.chars.next();
            let mut s = String::new();
            loop {
                match self.chars.next() {
                    Some((_, '\'')) => break,
                    Some((_, c)) => s.push(c),
                    None => return Err(self.err("unterminated string literal")),
                }
            }
            return Ok(Literal::Str(s));
        }
        let mut raw = String::new();
        while let Some((_, c)) = self.chars.peek() {
            if c.is_whitespace() || *c == '&' || *c == '|' || *c == ')' {
                break;
            }
            raw.push(*c);
            self.chars.next();
        }
        if raw.is_empty() {
            return Err(self.err("expected a value"));
        }
        match raw.parse::<f64>() {
            Ok(n) => Ok(Literal::Num(n)),
            Err(_) => Ok(Literal::Str(raw)),
        }
    }
}

pub fn parse(expr: &str) -> Result<Ast, ParseError> {
    let mut parser = Parser::new(expr);
    let ast = parser.parse_or()?;
    parser.skip_ws();
    if parser.chars.peek().is_some() {
        return Err(parser.err("trailing input"));
    }
    Ok(ast)
}

/// Evaluates a parsed filter against an info mapping. Unknown keys are
/// "absent"; comparisons against absent keys are false.
pub fn evaluate(ast: &Ast, info: &serde_json::Map<String, Value>) -> bool {
    match ast {
        Ast::And(a, b) => evaluate(a, info) && evaluate(b, info),
        Ast::Or(a, b) => evaluate(a, info) || evaluate(b, info),
        Ast::Not(a) => !evaluate(a, info),
        Ast::Presence(key) => info.contains_key(key),
        Ast::Truthy(key) => truthy(info.get(key)),
        Ast::Compare { key, op, value } => compare(info.get(key), *op, value),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn compare(found: Option<&Value>, op: CompareOp, expected: &Literal) -> bool {
    let Some(found) = found else {
        return false;
    };
    match op {
        CompareOp::Eq => values_equal(found, expected),
        CompareOp::Ne => !values_equal(found, expected),
        CompareOp::RegexMatch => {
            let Literal::Str(pattern) = expected else { return false };
            let Some(s) = found.as_str() else { return false };
            Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false)
        }
        CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le => {
            match (as_number(found), numeric_literal(expected)) {
                (Some(a), Some(b)) => match op {
                    CompareOp::Gt => a > b,
                    CompareOp::Lt => a < b,
                    CompareOp::Ge => a >= b,
                    CompareOp::Le => a <= b,
                    _ => unreachable!(),
                },
                _ => match (found.as_str(), expected) {
                    (Some(a), Literal::Str(b)) => match op {
                        CompareOp::Gt => a > b.as_str(),
                        CompareOp::Lt => a < b.as_str(),
                        CompareOp::Ge => a >= b.as_str(),
                        CompareOp::Le => a <= b.as_str(),
                        _ => unreachable!(),
                    },
                    _ => false,
                },
            }
        }
    }
}

fn values_equal(found: &Value, expected: &Literal) -> bool {
    match expected {
        Literal::Str(s) => found.as_str().map(|f| f == s).unwrap_or(false),
        Literal::Num(n) => as_number(found).map(|f| f == *n).unwrap_or(false),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn numeric_literal(literal: &Literal) -> Option<f64> {
    match literal {
        Literal::Num(n) => Some(*n),
        Literal::Str(s) => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn info(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn equality_and_and() {
        let ast = parse("channel_id = 'X' & availability = 'needs_auth'").unwrap();
        let matching = info(&[("channel_id", json!("X")), ("availability", json!("needs_auth"))]);
        assert!(evaluate(&ast, &matching));
        let other = info(&[("channel_id", json!("Y")), ("availability", json!("needs_auth"))]);
        assert!(!evaluate(&ast, &other));
    }

    #[test]
    fn presence_and_absence() {
        let ast = parse("thumbnail?").unwrap();
        assert!(evaluate(&ast, &info(&[("thumbnail", json!("x"))])));
        assert!(!evaluate(&ast, &info(&[])));
    }

    #[test]
    fn unknown_key_comparisons_are_false() {
        let ast = parse("duration > 100").unwrap();
        assert!(!evaluate(&ast, &info(&[])));
    }

    #[test]
    fn unknown_key_not_equal_is_false() {
        let ast = parse("extractor != 'youtube'").unwrap();
        assert!(!evaluate(&ast, &info(&[])));
    }

    #[test]
    fn not_and_parens() {
        let ast = parse("!(is_live & age < 1)").unwrap();
        assert!(evaluate(&ast, &info(&[("is_live", json!(false))])));
        assert!(!evaluate(&ast, &info(&[("is_live", json!(true)), ("age", json!(0))])));
    }

    #[test]
    fn regex_match_operator() {
        let ast = parse("title ~= '^Official'").unwrap();
        assert!(evaluate(&ast, &info(&[("title", json!("Official Trailer"))])));
        assert!(!evaluate(&ast, &info(&[("title", json!("Fan Trailer"))])));
    }

    #[test]
    fn or_operator() {
        let ast = parse("ext = 'mp4' | ext = 'mkv'").unwrap();
        assert!(evaluate(&ast, &info(&[("ext", json!("mkv"))])));
        assert!(!evaluate(&ast, &info(&[("ext", json!("webm"))])));
    }

    #[test]
    fn numeric_comparison() {
        let ast = parse("view_count >= 1000").unwrap();
        assert!(evaluate(&ast, &info(&[("view_count", json!(2500))])));
        assert!(!evaluate(&ast, &info(&[("view_count", json!(10))])));
    }

    #[test]
    fn bare_identifier_is_truthiness() {
        let ast = parse("is_live").unwrap();
        assert!(evaluate(&ast, &info(&[("is_live", json!(true))])));
        assert!(!evaluate(&ast, &info(&[("is_live", json!(false))])));
        assert!(!evaluate(&ast, &info(&[])));
    }

    #[test]
    fn trailing_garbage_is_a_parse_error() {
        assert!(parse("a = 'b' )").is_err());
    }
}

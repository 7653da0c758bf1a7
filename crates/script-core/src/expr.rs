//! Fixed-precision decimal arithmetic for `expr` and `index`
//!
//! Values are scaled integers. An operation is carried out at the widest
//! scale of its operands, capped by the interpreter's `decimals` setting, and
//! truncates toward zero. Division and modulo by zero return
//! [`ScriptError::DivideByZero`] so the caller can route it through the
//! script error path.

use crate::error::{Result, ScriptError};
use std::cmp::Ordering;
use std::fmt;

const MAX_SCALE: u8 = 9;

#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    units: i128,
    scale: u8,
}

fn pow10(scale: u8) -> i128 {
    10i128.pow(scale as u32)
}

impl Decimal {
    pub fn zero() -> Self {
        Self { units: 0, scale: 0 }
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    /// Parse `[-+]digits[.digits]`. Empty text reads as zero.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::zero());
        }
        let (negative, body) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        let digits_ok = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !digits_ok(whole) || !digits_ok(frac) {
            return Err(ScriptError::invalid_number(text));
        }
        let frac = &frac[..frac.len().min(MAX_SCALE as usize)];
        let mut units: i128 = 0;
        for b in whole.bytes().chain(frac.bytes()) {
            units = units
                .checked_mul(10)
                .and_then(|u| u.checked_add((b - b'0') as i128))
                .ok_or(ScriptError::Overflow)?;
        }
        Ok(Self {
            units: if negative { -units } else { units },
            scale: frac.len() as u8,
        })
    }

    /// Re-express at `scale`, truncating extra digits
    pub fn rescale(self, scale: u8) -> Result<Self> {
        let units = match scale.cmp(&self.scale) {
            Ordering::Equal => self.units,
            Ordering::Greater => self
                .units
                .checked_mul(pow10(scale - self.scale))
                .ok_or(ScriptError::Overflow)?,
            Ordering::Less => self.units / pow10(self.scale - scale),
        };
        Ok(Self { units, scale })
    }

    fn binary(self, op: BinOp, rhs: Decimal, cap: u8) -> Result<Decimal> {
        let scale = self.scale.max(rhs.scale).min(cap);
        let a = self.rescale(scale)?.units;
        let b = rhs.rescale(scale)?.units;
        let units = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b).map(|p| p / pow10(scale)),
            BinOp::Div => {
                if b == 0 {
                    return Err(ScriptError::DivideByZero);
                }
                a.checked_mul(pow10(scale)).map(|n| n / b)
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(ScriptError::DivideByZero);
                }
                Some(a % b)
            }
        }
        .ok_or(ScriptError::Overflow)?;
        Ok(Decimal { units, scale })
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        let lhs = self.units.saturating_mul(pow10(scale - self.scale));
        let rhs = other.units.saturating_mul(pow10(scale - other.scale));
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.units);
        }
        let factor = pow10(self.scale);
        let sign = if self.units < 0 { "-" } else { "" };
        let abs = self.units.unsigned_abs();
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            abs / factor as u128,
            abs % factor as u128,
            width = self.scale as usize
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Decimal),
    Op(BinOp),
    Open,
    Close,
}

fn tokenize(text: &str, tokens: &mut Vec<Token>) -> Result<()> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            b')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            b'+' | b'-' | b'*' | b'/' | b'#' => {
                let op = match c {
                    b'+' => BinOp::Add,
                    b'-' => BinOp::Sub,
                    b'*' => BinOp::Mul,
                    b'/' => BinOp::Div,
                    _ => BinOp::Mod,
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
            b'0'..=b'9' | b'.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push(Token::Number(Decimal::parse(&text[start..i])?));
            }
            _ => {
                return Err(ScriptError::invalid_expression(format!(
                    "unexpected '{}' in '{}'",
                    &text[i..].chars().next().unwrap_or('?'),
                    text
                )))
            }
        }
    }
    Ok(())
}

/// Recursive-descent evaluator over the token list
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    cap: u8,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn sum(&mut self) -> Result<Decimal> {
        let mut value = self.product()?;
        while let Some(Token::Op(op @ (BinOp::Add | BinOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.product()?;
            value = value.binary(op, rhs, self.cap)?;
        }
        Ok(value)
    }

    fn product(&mut self) -> Result<Decimal> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ (BinOp::Mul | BinOp::Div | BinOp::Mod))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = value.binary(op, rhs, self.cap)?;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<Decimal> {
        match self.peek().cloned() {
            Some(Token::Op(BinOp::Sub)) => {
                self.pos += 1;
                let value = self.unary()?;
                Decimal::zero().binary(BinOp::Sub, value, self.cap.max(value.scale))
            }
            Some(Token::Op(BinOp::Add)) => {
                self.pos += 1;
                self.unary()
            }
            Some(Token::Number(value)) => {
                self.pos += 1;
                value.rescale(value.scale.min(self.cap))
            }
            Some(Token::Open) => {
                self.pos += 1;
                let value = self.sum()?;
                match self.peek() {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err(ScriptError::invalid_expression("missing ')'")),
                }
            }
            Some(other) => Err(ScriptError::invalid_expression(format!("unexpected {:?}", other))),
            None => Err(ScriptError::invalid_expression("unexpected end of expression")),
        }
    }
}

/// Evaluate already-substituted expression fragments. Each fragment is
/// tokenized separately so `"-1"` from a symbol stays a single operand.
pub fn evaluate<S: AsRef<str>>(fragments: &[S], decimals: u8) -> Result<Decimal> {
    let mut tokens = Vec::new();
    for fragment in fragments {
        let text = fragment.as_ref();
        // A whole fragment that parses as a number is one operand
        match Decimal::parse(text) {
            Ok(value) if !text.trim().is_empty() => tokens.push(Token::Number(value)),
            _ => tokenize(text, &mut tokens)?,
        }
    }
    if tokens.is_empty() {
        return Err(ScriptError::invalid_expression("empty expression"));
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        cap: decimals.min(MAX_SCALE),
    };
    let value = parser.sum()?;
    if parser.pos != tokens.len() {
        return Err(ScriptError::invalid_expression("trailing tokens"));
    }
    Ok(value)
}

/// Apply a compound assignment to the current value of the target
pub fn apply(current: &str, op: crate::image::AssignOp, value: Decimal, decimals: u8) -> Result<Decimal> {
    use crate::image::AssignOp;
    let cap = decimals.min(MAX_SCALE);
    let current = || -> Result<Decimal> {
        let d = Decimal::parse(current)?;
        d.rescale(d.scale.min(cap))
    };
    match op {
        AssignOp::Set | AssignOp::IfEmpty => Ok(value),
        AssignOp::Add => current()?.binary(BinOp::Add, value, cap),
        AssignOp::Sub => current()?.binary(BinOp::Sub, value, cap),
        AssignOp::Mul => current()?.binary(BinOp::Mul, value, cap),
        AssignOp::Div => current()?.binary(BinOp::Div, value, cap),
        AssignOp::Mod => current()?.binary(BinOp::Mod, value, cap),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::AssignOp;
    use proptest::prelude::*;

    fn eval(text: &str, decimals: u8) -> Result<String> {
        evaluate(&[text], decimals).map(|d| d.to_string())
    }

    #[test]
    fn test_precedence_and_parentheses() {
        assert_eq!(eval("1 + 2 * 3", 2).unwrap(), "7");
        assert_eq!(eval("(1 + 2) * 3", 2).unwrap(), "9");
        assert_eq!(eval("10 # 4", 2).unwrap(), "2");
        assert_eq!(eval("-3 + 1", 2).unwrap(), "-2");
    }

    #[test]
    fn test_scale_follows_operands() {
        assert_eq!(eval("7 / 2", 2).unwrap(), "3");
        assert_eq!(eval("7.0 / 2", 2).unwrap(), "3.5");
        assert_eq!(eval("1.25 * 2", 2).unwrap(), "2.50");
        assert_eq!(eval("1.255 + 0", 2).unwrap(), "1.25");
        assert_eq!(eval("2.5 * 2", 0).unwrap(), "4");
    }

    #[test]
    fn test_divide_by_zero_is_reported() {
        assert_eq!(eval("1 / 0", 2), Err(ScriptError::DivideByZero));
        assert_eq!(eval("1 # 0", 2), Err(ScriptError::DivideByZero));
        let zero = Decimal::zero();
        assert_eq!(apply("5", AssignOp::Div, zero, 2), Err(ScriptError::DivideByZero));
    }

    #[test]
    fn test_fragments_keep_negative_operands() {
        assert_eq!(evaluate(&["10", "-", "-4"], 0).unwrap().to_string(), "14");
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(eval("1 + abc", 2), Err(ScriptError::InvalidExpression { .. })));
        assert!(matches!(eval("(1 + 2", 2), Err(ScriptError::InvalidExpression { .. })));
        assert!(matches!(Decimal::parse("1.2.3"), Err(ScriptError::InvalidNumber { .. })));
    }

    proptest! {
        #[test]
        fn prop_integer_arithmetic_matches_i64(a in -100_000i64..100_000, b in -100_000i64..100_000) {
            let add = evaluate(&[a.to_string(), "+".to_string(), b.to_string()], 2).unwrap();
            prop_assert_eq!(add.to_string(), (a + b).to_string());
            let mul = evaluate(&[a.to_string(), "*".to_string(), b.to_string()], 2).unwrap();
            prop_assert_eq!(mul.to_string(), (a * b).to_string());
            if b != 0 {
                let div = evaluate(&[a.to_string(), "/".to_string(), b.to_string()], 0).unwrap();
                prop_assert_eq!(div.to_string(), (a / b).to_string());
            }
        }
    }
}

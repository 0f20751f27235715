//! Expression evaluation.
//!
//! Conditions and assignments are written in a deliberately small language.
//! Before parsing, every `{name}` placeholder is replaced by the literal value
//! of the attribute `name`. The remaining text supports:
//!
//! - numeric literals: `42`, `-3`, `0.5`, `1e3`
//! - `true`, `false` and double-quoted strings (`"idle"`)
//! - arithmetic: `+ - * /`
//! - comparison: `== != > >= < <=`
//! - logic: `!expr`, `expr && expr`, `expr || expr`
//! - `(expr)` grouping
//!
//! There are no identifiers, function calls or control flow, so every
//! expression that parses terminates with exactly one value.
//!
//! Examples:
//! - `{sleepiness} - 15`
//! - `{hunger} >= 50 && {thirst} < 10`
//! - `({happiness} + {boredom}) / 2 > 30`

use crate::attributes::Attributes;
use crate::error::CoreError;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// Deepest allowed nesting of parentheses and unary operators.
const MAX_DEPTH: usize = 64;

/// Most operators a single expression may contain.
const MAX_OPERATORS: usize = 1024;

/// Binary operators, excluding the short-circuiting `&&` and `||`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
        }
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value.
    Literal(Value),
    /// Arithmetic negation.
    Neg(Box<Expr>),
    /// Logical NOT.
    Not(Box<Expr>),
    /// Arithmetic or comparison.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Logical AND.
    And(Box<Expr>, Box<Expr>),
    /// Logical OR.
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parses an expression that has already had its placeholders replaced.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CoreError::syntax(s, "empty expression"));
        }

        let mut parser = Parser::new(trimmed);
        let expr = parser.parse_expr()?;
        parser.skip_whitespace();
        if parser.pos < trimmed.len() {
            return Err(CoreError::syntax(
                trimmed,
                format!("unexpected input '{}'", &trimmed[parser.pos..]),
            ));
        }
        Ok(expr)
    }

    /// Evaluates the expression.
    pub fn evaluate(&self) -> Result<Value, CoreError> {
        self.eval()
            .map_err(|reason| CoreError::evaluation(&self.to_string(), reason))
    }

    fn eval(&self) -> Result<Value, String> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Neg(inner) => match inner.eval()? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| "integer overflow".to_string()),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(format!("cannot negate {}", other.type_name())),
            },
            Expr::Not(inner) => Ok(Value::Bool(!inner.eval()?.is_truthy())),
            Expr::And(left, right) => {
                if !left.eval()?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(right.eval()?.is_truthy()))
            }
            Expr::Or(left, right) => {
                if left.eval()?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(right.eval()?.is_truthy()))
            }
            Expr::Binary(op, left, right) => apply(*op, left.eval()?, right.eval()?),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => f.write_str(&v.to_literal()),
            Expr::Neg(inner) => write!(f, "-{}", inner),
            Expr::Not(inner) => write!(f, "!{}", inner),
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::And(l, r) => write!(f, "({} && {})", l, r),
            Expr::Or(l, r) => write!(f, "({} || {})", l, r),
        }
    }
}

fn apply(op: BinaryOp, a: Value, b: Value) -> Result<Value, String> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => arithmetic(op, a, b),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&a, &b))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&a, &b))),
        BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le => {
            let ord = compare(&a, &b).ok_or_else(|| {
                format!(
                    "cannot compare {} {} {}",
                    a.type_name(),
                    op.symbol(),
                    b.type_name()
                )
            })?;
            let result = match op {
                BinaryOp::Gt => ord == Ordering::Greater,
                BinaryOp::Ge => ord != Ordering::Less,
                BinaryOp::Lt => ord == Ordering::Less,
                _ => ord != Ordering::Greater,
            };
            Ok(Value::Bool(result))
        }
    }
}

fn arithmetic(op: BinaryOp, a: Value, b: Value) -> Result<Value, String> {
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => int_arithmetic(op, *x, *y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => float_arithmetic(op, x, y),
            _ => Err(format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                a.type_name(),
                b.type_name()
            )),
        },
    }
}

fn int_arithmetic(op: BinaryOp, x: i64, y: i64) -> Result<Value, String> {
    let result = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Sub => x.checked_sub(y),
        BinaryOp::Mul => x.checked_mul(y),
        _ => {
            if y == 0 {
                return Err("division by zero".to_string());
            }
            // Exact quotients stay integral, everything else becomes a float.
            if x.checked_rem(y) == Some(0) {
                x.checked_div(y)
            } else {
                return Ok(Value::Float(x as f64 / y as f64));
            }
        }
    };
    result
        .map(Value::Int)
        .ok_or_else(|| "integer overflow".to_string())
}

fn float_arithmetic(op: BinaryOp, x: f64, y: f64) -> Result<Value, String> {
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        _ => {
            if y == 0.0 {
                return Err("division by zero".to_string());
            }
            x / y
        }
    };
    if !result.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(Value::Float(result))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// Returns whether the text contains a `{...}` placeholder.
pub fn has_placeholder(text: &str) -> bool {
    text.contains('{')
}

/// Replaces every `{name}` with the literal value of attribute `name`.
pub fn substitute(text: &str, attributes: &Attributes) -> Result<String, CoreError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| CoreError::syntax(text, "unterminated '{' placeholder"))?;

        let name = after[..close].trim();
        let value = attributes.require(name)?;
        out.push_str(&value.to_literal());
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Substitutes placeholders, then parses and evaluates the result.
pub fn evaluate(text: &str, attributes: &Attributes) -> Result<Value, CoreError> {
    let substituted = substitute(text, attributes)?;
    let value = Expr::parse(&substituted)?.evaluate()?;
    tracing::trace!(expression = text, substituted = %substituted, result = %value, "evaluated");
    Ok(value)
}

/// Recursive descent parser for expressions.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
            operators: 0,
        }
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn operator(&mut self, expr: Expr) -> Result<Expr, CoreError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(self.error("expression has too many operators"));
        }
        Ok(expr)
    }

    fn parse_expr(&mut self) -> Result<Expr, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_and()?;
        self.skip_whitespace();

        while self.peek_str("||") {
            self.pos += 2;
            let right = self.parse_and()?;
            left = self.operator(Expr::Or(Box::new(left), Box::new(right)))?;
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_equality()?;
        self.skip_whitespace();

        while self.peek_str("&&") {
            self.pos += 2;
            let right = self.parse_equality()?;
            left = self.operator(Expr::And(Box::new(left), Box::new(right)))?;
            self.skip_whitespace();
        }

        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_comparison()?;

        loop {
            self.skip_whitespace();
            let op = if self.peek_str("==") {
                BinaryOp::Eq
            } else if self.peek_str("!=") {
                BinaryOp::Ne
            } else {
                break;
            };
            self.pos += 2;
            let right = self.parse_comparison()?;
            left = self.operator(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_additive()?;

        loop {
            self.skip_whitespace();
            let (op, width) = if self.peek_str(">=") {
                (BinaryOp::Ge, 2)
            } else if self.peek_str("<=") {
                (BinaryOp::Le, 2)
            } else if self.peek_char() == Some('>') {
                (BinaryOp::Gt, 1)
            } else if self.peek_char() == Some('<') {
                (BinaryOp::Lt, 1)
            } else {
                break;
            };
            self.pos += width;
            let right = self.parse_additive()?;
            left = self.operator(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_term()?;

        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('+') => BinaryOp::Add,
                Some('-') => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = self.operator(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }

        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, CoreError> {
        let mut left = self.parse_unary()?;

        loop {
            self.skip_whitespace();
            let op = match self.peek_char() {
                Some('*') => BinaryOp::Mul,
                Some('/') => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = self.operator(Expr::Binary(op, Box::new(left), Box::new(right)))?;
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CoreError> {
        self.skip_whitespace();

        if self.peek_char() == Some('-') {
            // A sign directly before a digit belongs to the literal, so
            // i64::MIN reads back as an integer.
            if self.input[self.pos + 1..]
                .starts_with(|c: char| c.is_ascii_digit() || c == '.')
            {
                return self.parse_number();
            }
            self.pos += 1;
            let inner = self.nested(Self::parse_unary)?;
            return self.operator(Expr::Neg(Box::new(inner)));
        }

        if self.peek_char() == Some('!') && !self.peek_str("!=") {
            self.pos += 1;
            let inner = self.nested(Self::parse_unary)?; // Recursive to allow !!x
            return self.operator(Expr::Not(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, CoreError> {
        self.skip_whitespace();

        match self.peek_char() {
            Some('(') => {
                self.pos += 1;
                let expr = self.nested(Self::parse_expr)?;
                self.skip_whitespace();
                if self.peek_char() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(expr)
            }
            Some('"') => self.parse_string(),
            Some(c) if c.is_ascii_digit() || c == '.' => self.parse_number(),
            Some(_) if self.peek_keyword("true") => {
                self.pos += 4;
                Ok(Expr::Literal(Value::Bool(true)))
            }
            Some(_) if self.peek_keyword("false") => {
                self.pos += 5;
                Ok(Expr::Literal(Value::Bool(false)))
            }
            Some(c) => Err(self.error(format!("unexpected character '{}'", c))),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_string(&mut self) -> Result<Expr, CoreError> {
        self.pos += 1; // opening quote
        let mut out = String::new();

        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            match c {
                '"' => return Ok(Expr::Literal(Value::Str(out))),
                '\\' => match self.peek_char() {
                    Some(escaped) => {
                        self.pos += escaped.len_utf8();
                        out.push(escaped);
                    }
                    None => break,
                },
                _ => out.push(c),
            }
        }

        Err(self.error("unterminated string"))
    }

    fn parse_number(&mut self) -> Result<Expr, CoreError> {
        let start = self.pos;
        let mut is_float = false;

        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        self.consume_digits();

        if self.peek_char() == Some('.') {
            is_float = true;
            self.pos += 1;
            self.consume_digits();
        }

        if matches!(self.peek_char(), Some('e' | 'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.pos += 1;
            }
            let exp_start = self.pos;
            self.consume_digits();
            if self.pos == exp_start {
                return Err(self.error("missing exponent digits"));
            }
        }

        let num_str = &self.input[start..self.pos];
        if !is_float {
            if let Ok(i) = num_str.parse::<i64>() {
                return Ok(Expr::Literal(Value::Int(i)));
            }
        }

        num_str
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| Expr::Literal(Value::Float(f)))
            .ok_or_else(|| self.error(format!("invalid number: '{}'", num_str)))
    }

    fn consume_digits(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.pos..].starts_with(s)
    }

    fn peek_keyword(&self, word: &str) -> bool {
        self.peek_str(word)
            && !self.input[self.pos + word.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn error(&self, reason: impl Into<String>) -> CoreError {
        CoreError::syntax(self.input, reason)
    }
}

//! Sandboxed statement language for text commands
//!
//! The wire surface accepts opaque command strings; this module gives the
//! built-in executor something safe to run them with. The language is
//! deliberately tiny: assignments, arithmetic expressions, string
//! concatenation, `print(...)`, and the distinguished `quit()` builtin
//! that requests intentional process shutdown. Variables persist in the
//! caller-supplied environment across commands, which is what lets a
//! submitted sequence like `a = 1`, `b = 0`, `c = a / b` share state.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::info;

// ─────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────

/// A runtime value in the command language
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    None,
    Int(i64),
    Float(f64),
    Str(String),
}

impl ScriptValue {
    /// Convert to a JSON value for the wire
    pub fn to_json(&self) -> Value {
        match self {
            ScriptValue::None => Value::Null,
            ScriptValue::Int(i) => Value::from(*i),
            ScriptValue::Float(f) => Value::from(*f),
            ScriptValue::Str(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::None => write!(f, "None"),
            ScriptValue::Int(i) => write!(f, "{i}"),
            ScriptValue::Float(v) => write!(f, "{v}"),
            ScriptValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Variable environment shared across commands within one node
pub type Env = HashMap<String, ScriptValue>;

/// How a script finished, short of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// All statements ran
    Done,
    /// A `quit()` was reached; remaining statements were skipped
    Shutdown,
}

/// A runtime or parse error inside a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScriptError {}

// ─────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────

/// Run a command's statements against the environment
pub fn run(env: &mut Env, source: &str) -> Result<ExecOutcome, ScriptError> {
    for statement in split_statements(source) {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }

        if is_quit(statement) {
            return Ok(ExecOutcome::Shutdown);
        }

        if let Some(inner) = statement
            .strip_prefix("print(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let value = eval(env, inner)?;
            info!(target: "neurobridge::script", "{value}");
            continue;
        }

        if let Some((name, expr)) = split_assignment(statement) {
            let value = eval(env, expr)?;
            env.insert(name.to_string(), value);
            continue;
        }

        // Bare expression: evaluate for effect/validation, discard value
        eval(env, statement)?;
    }

    Ok(ExecOutcome::Done)
}

/// Recognize the `quit()` builtin with any interior whitespace,
/// e.g. `quit ()` or `quit( )`
fn is_quit(statement: &str) -> bool {
    let Some(rest) = statement.strip_prefix("quit") else {
        return false;
    };
    rest.trim_start()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .is_some_and(|inner| inner.trim().is_empty())
}

/// Split statements on `;` and newlines, honoring string literals
fn split_statements(source: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in source.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ';' | '\n' => {
                    statements.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    statements.push(current);
    statements
}

/// Detect `name = expr` (but not `==`), returning the two sides
fn split_assignment(statement: &str) -> Option<(&str, &str)> {
    let idx = statement.find('=')?;
    if statement[idx + 1..].starts_with('=') {
        return None;
    }

    let name = statement[..idx].trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    valid.then(|| (name, &statement[idx + 1..]))
}

// ─────────────────────────────────────────────────────────────────
// Tokenizer
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ScriptError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => text.push(c),
                        None => return Err(ScriptError::new("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if text.contains('.') {
                    let value: f64 = text
                        .parse()
                        .map_err(|_| ScriptError::new(format!("invalid number '{text}'")))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value: i64 = text
                        .parse()
                        .map_err(|_| ScriptError::new(format!("invalid number '{text}'")))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            other => {
                return Err(ScriptError::new(format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

// ─────────────────────────────────────────────────────────────────
// Parser / evaluator
// ─────────────────────────────────────────────────────────────────

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    env: &'a Env,
}

/// Evaluate a single expression against the environment
pub fn eval(env: &Env, expr: &str) -> Result<ScriptValue, ScriptError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(ScriptError::new("empty expression"));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        env,
    };
    let value = parser.expression()?;

    if parser.pos != parser.tokens.len() {
        return Err(ScriptError::new(format!(
            "unexpected trailing input in '{}'",
            expr.trim()
        )));
    }

    Ok(value)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<ScriptValue, ScriptError> {
        let mut left = self.term()?;

        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    let right = self.term()?;
                    left = add(left, right)?;
                }
                Token::Minus => {
                    self.pos += 1;
                    let right = self.term()?;
                    left = numeric_op(left, right, "-")?;
                }
                _ => break,
            }
        }

        Ok(left)
    }

    fn term(&mut self) -> Result<ScriptValue, ScriptError> {
        let mut left = self.unary()?;

        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    let right = self.unary()?;
                    left = numeric_op(left, right, "*")?;
                }
                Token::Slash => {
                    self.pos += 1;
                    let right = self.unary()?;
                    left = numeric_op(left, right, "/")?;
                }
                _ => break,
            }
        }

        Ok(left)
    }

    fn unary(&mut self) -> Result<ScriptValue, ScriptError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.pos += 1;
            let value = self.unary()?;
            return match value {
                ScriptValue::Int(i) => {
                    i.checked_neg().map(ScriptValue::Int).ok_or_else(overflow)
                }
                ScriptValue::Float(f) => Ok(ScriptValue::Float(-f)),
                other => Err(ScriptError::new(format!("cannot negate {other:?}"))),
            };
        }

        self.primary()
    }

    fn primary(&mut self) -> Result<ScriptValue, ScriptError> {
        match self.next() {
            Some(Token::Int(i)) => Ok(ScriptValue::Int(i)),
            Some(Token::Float(f)) => Ok(ScriptValue::Float(f)),
            Some(Token::Str(s)) => Ok(ScriptValue::Str(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "None" => Ok(ScriptValue::None),
                _ => self
                    .env
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| ScriptError::new(format!("undefined variable '{name}'"))),
            },
            Some(Token::LParen) => {
                let value = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(ScriptError::new("expected ')'")),
                }
            }
            other => Err(ScriptError::new(format!(
                "expected a value, found {other:?}"
            ))),
        }
    }
}

fn add(left: ScriptValue, right: ScriptValue) -> Result<ScriptValue, ScriptError> {
    if let (ScriptValue::Str(a), ScriptValue::Str(b)) = (&left, &right) {
        return Ok(ScriptValue::Str(format!("{a}{b}")));
    }
    numeric_op(left, right, "+")
}

fn numeric_op(left: ScriptValue, right: ScriptValue, op: &str) -> Result<ScriptValue, ScriptError> {
    match (&left, &right) {
        (ScriptValue::Int(a), ScriptValue::Int(b)) => match op {
            // Checked arithmetic: overflow is a command error, never a
            // panic that would take the drain loop down with it
            "+" => a
                .checked_add(*b)
                .map(ScriptValue::Int)
                .ok_or_else(overflow),
            "-" => a
                .checked_sub(*b)
                .map(ScriptValue::Int)
                .ok_or_else(overflow),
            "*" => a
                .checked_mul(*b)
                .map(ScriptValue::Int)
                .ok_or_else(overflow),
            "/" => {
                if *b == 0 {
                    Err(ScriptError::new("division by zero"))
                } else if a % b == 0 {
                    Ok(ScriptValue::Int(a / b))
                } else {
                    Ok(ScriptValue::Float(*a as f64 / *b as f64))
                }
            }
            _ => unreachable!(),
        },
        (ScriptValue::Int(_) | ScriptValue::Float(_), ScriptValue::Int(_) | ScriptValue::Float(_)) =>
        {
            let a = as_f64(&left);
            let b = as_f64(&right);
            match op {
                "+" => Ok(ScriptValue::Float(a + b)),
                "-" => Ok(ScriptValue::Float(a - b)),
                "*" => Ok(ScriptValue::Float(a * b)),
                "/" => {
                    if b == 0.0 {
                        Err(ScriptError::new("division by zero"))
                    } else {
                        Ok(ScriptValue::Float(a / b))
                    }
                }
                _ => unreachable!(),
            }
        }
        _ => Err(ScriptError::new(format!(
            "unsupported operands for '{op}': {left:?} and {right:?}"
        ))),
    }
}

fn overflow() -> ScriptError {
    ScriptError::new("integer overflow")
}

fn as_f64(value: &ScriptValue) -> f64 {
    match value {
        ScriptValue::Int(i) => *i as f64,
        ScriptValue::Float(f) => *f,
        _ => 0.0,
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn run_fresh(source: &str) -> (Env, Result<ExecOutcome, ScriptError>) {
        let mut env = Env::new();
        let outcome = run(&mut env, source);
        (env, outcome)
    }

    #[test]
    fn test_assignment_and_arithmetic() {
        let (env, outcome) = run_fresh("return_value = 1+3");
        assert_eq!(outcome.unwrap(), ExecOutcome::Done);
        assert_eq!(env.get("return_value"), Some(&ScriptValue::Int(4)));
    }

    #[test]
    fn test_precedence_and_parens() {
        let (env, _) = run_fresh("x = 2 + 3 * 4; y = (2 + 3) * 4");
        assert_eq!(env.get("x"), Some(&ScriptValue::Int(14)));
        assert_eq!(env.get("y"), Some(&ScriptValue::Int(20)));
    }

    #[test]
    fn test_variables_persist_across_runs() {
        let mut env = Env::new();
        run(&mut env, "a = 1").unwrap();
        run(&mut env, "b = 2").unwrap();
        run(&mut env, "c = a + b").unwrap();
        assert_eq!(env.get("c"), Some(&ScriptValue::Int(3)));
    }

    #[test]
    fn test_division_by_zero() {
        let mut env = Env::new();
        run(&mut env, "a = 1; b = 0").unwrap();
        let err = run(&mut env, "c = a/b").unwrap_err();
        assert!(err.message.contains("division by zero"));
        assert!(!env.contains_key("c"));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let (_, outcome) = run_fresh("x = 9223372036854775807 + 1");
        assert!(outcome.unwrap_err().message.contains("integer overflow"));

        let (_, outcome) = run_fresh("x = -9223372036854775807 - 2");
        assert!(outcome.unwrap_err().message.contains("integer overflow"));

        let (_, outcome) = run_fresh("x = 9223372036854775807 * 2");
        assert!(outcome.unwrap_err().message.contains("integer overflow"));

        // Negating i64::MIN has no i64 representation
        let (env, outcome) = run_fresh("a = -9223372036854775807 - 1; b = -a");
        assert!(outcome.unwrap_err().message.contains("integer overflow"));
        assert!(!env.contains_key("b"));
    }

    #[test]
    fn test_string_concat_and_literals() {
        let (env, _) = run_fresh("s = 'ab' + \"cd\"");
        assert_eq!(env.get("s"), Some(&ScriptValue::Str("abcd".to_string())));
    }

    #[test]
    fn test_semicolons_inside_strings() {
        let (env, _) = run_fresh("s = 'a;b'");
        assert_eq!(env.get("s"), Some(&ScriptValue::Str("a;b".to_string())));
    }

    #[test]
    fn test_print_produces_no_binding() {
        let (env, outcome) = run_fresh("print('x')");
        assert_eq!(outcome.unwrap(), ExecOutcome::Done);
        assert!(env.is_empty());
    }

    #[test]
    fn test_quit_requests_shutdown_and_skips_rest() {
        let (env, outcome) = run_fresh("a = 1; quit(); b = 2");
        assert_eq!(outcome.unwrap(), ExecOutcome::Shutdown);
        assert_eq!(env.get("a"), Some(&ScriptValue::Int(1)));
        assert!(!env.contains_key("b"));
    }

    #[test]
    fn test_quit_tolerates_interior_whitespace() {
        for source in ["quit()", "quit ()", "quit( )", "quit (  )"] {
            let (_, outcome) = run_fresh(source);
            assert_eq!(outcome.unwrap(), ExecOutcome::Shutdown, "source: {source}");
        }

        // A longer identifier is an ordinary (failing) expression
        let (_, outcome) = run_fresh("quite()");
        assert!(outcome.is_err());
    }

    #[test]
    fn test_undefined_variable() {
        let (_, outcome) = run_fresh("x = missing + 1");
        let err = outcome.unwrap_err();
        assert!(err.message.contains("undefined variable 'missing'"));
    }

    #[test]
    fn test_unary_minus_and_floats() {
        let (env, _) = run_fresh("x = -2.5 * 2");
        assert_eq!(env.get("x"), Some(&ScriptValue::Float(-5.0)));
    }

    #[test]
    fn test_int_division_promotes_when_inexact() {
        let (env, _) = run_fresh("x = 7 / 2; y = 6 / 2");
        assert_eq!(env.get("x"), Some(&ScriptValue::Float(3.5)));
        assert_eq!(env.get("y"), Some(&ScriptValue::Int(3)));
    }

    #[test]
    fn test_to_json() {
        assert_eq!(ScriptValue::None.to_json(), Value::Null);
        assert_eq!(ScriptValue::Int(4).to_json(), Value::from(4));
        assert_eq!(
            ScriptValue::Str("hi".to_string()).to_json(),
            Value::from("hi")
        );
    }
}

//! The expression micro-language used in node configs and edge mappings.
//!
//! Forms, tried in order:
//! - `$input.<path>`        lookup in the node's input
//! - `$var.<name>`          lookup in the execution's variables (single level)
//! - `$node.<id>.<path>`    lookup in another node's stored output
//! - digits, whitespace and `+ - * / ( ) .` only: arithmetic
//! - anything else is a literal string
//!
//! Missing paths resolve to `null`; they never fail.

use serde_json::{Map, Number, Value};

use crate::ExpressionError;

const MAX_DEPTH: usize = 64;

/// Read-only view over the execution state an expression may reference.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub variables: &'a Map<String, Value>,
    pub node_outputs: &'a Map<String, Value>,
}

/// Evaluate a single expression string.
pub fn evaluate(expr: &str, input: &Value, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    let trimmed = expr.trim();

    if let Some(rest) = trimmed.strip_prefix("$input") {
        if rest.is_empty() {
            return Ok(input.clone());
        }
        if let Some(path) = rest.strip_prefix('.') {
            return Ok(lookup_path(input, path).cloned().unwrap_or(Value::Null));
        }
    }

    if let Some(name) = trimmed.strip_prefix("$var.") {
        return Ok(scope.variables.get(name).cloned().unwrap_or(Value::Null));
    }

    if let Some(rest) = trimmed.strip_prefix("$node.") {
        let (node_id, path) = match rest.split_once('.') {
            Some((id, path)) => (id, Some(path)),
            None => (rest, None),
        };
        let output = scope.node_outputs.get(node_id);
        let found = match (output, path) {
            (Some(out), Some(path)) => lookup_path(out, path),
            (out, None) => out,
            (None, Some(_)) => None,
        };
        return Ok(found.cloned().unwrap_or(Value::Null));
    }

    if is_arithmetic(trimmed) {
        return evaluate_arithmetic(trimmed);
    }

    Ok(Value::String(expr.to_owned()))
}

/// Evaluate a config value: strings go through [`evaluate`], everything
/// else is returned as-is.
pub fn evaluate_value(
    value: &Value,
    input: &Value,
    scope: &Scope<'_>,
) -> Result<Value, ExpressionError> {
    match value {
        Value::String(expr) => evaluate(expr, input, scope),
        other => Ok(other.clone()),
    }
}

/// Walk a dotted path (`a.b.0.c`) through objects and arrays.
pub fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_arithmetic(expr: &str) -> bool {
    !expr.is_empty()
        && expr.chars().any(|c| c.is_ascii_digit())
        && expr
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_whitespace() || "+-*/().".contains(c))
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' => { tokens.push(Token::Plus); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::Malformed(expr.to_owned()))?;
                tokens.push(Token::Num(n));
            }
            other => {
                return Err(ExpressionError::UnexpectedChar {
                    expr: expr.to_owned(),
                    ch: other,
                    offset: i,
                })
            }
        }
    }

    Ok(tokens)
}

/// Recursive-descent parser over `expr := term (('+'|'-') term)*`,
/// `term := unary (('*'|'/') unary)*`, `unary := '-'? unary | atom`,
/// `atom := number | '(' expr ')'`.
struct Parser<'e> {
    source: &'e str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'e> Parser<'e> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn malformed(&self) -> ExpressionError {
        ExpressionError::Malformed(self.source.to_owned())
    }

    fn expr(&mut self) -> Result<f64, ExpressionError> {
        let mut acc = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == Token::Plus { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<f64, ExpressionError> {
        let mut acc = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if op == Token::Star {
                acc *= rhs;
            } else {
                if rhs == 0.0 {
                    return Err(ExpressionError::DivisionByZero(self.source.to_owned()));
                }
                acc /= rhs;
            }
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<f64, ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep(self.source.to_owned()));
        }
        let value = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                -self.unary()?
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()?
            }
            _ => self.atom()?,
        };
        self.depth -= 1;
        Ok(value)
    }

    fn atom(&mut self) -> Result<f64, ExpressionError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.malformed()),
                }
            }
            _ => Err(self.malformed()),
        }
    }
}

fn evaluate_arithmetic(expr: &str) -> Result<Value, ExpressionError> {
    let mut parser = Parser {
        source: expr,
        tokens: tokenize(expr)?,
        pos: 0,
        depth: 0,
    };
    let result = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.malformed());
    }
    number_to_value(result).ok_or_else(|| ExpressionError::Malformed(expr.to_owned()))
}

/// Whole numbers come back as JSON integers so `"7"` evaluates to `7`, not `7.0`.
pub(crate) fn number_to_value(n: f64) -> Option<Value> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Some(Value::Number(Number::from(n as i64)))
    } else {
        Number::from_f64(n).map(Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_with(expr: &str, input: Value, vars: Value, outputs: Value) -> Value {
        let variables = vars.as_object().cloned().unwrap_or_default();
        let node_outputs = outputs.as_object().cloned().unwrap_or_default();
        let scope = Scope { variables: &variables, node_outputs: &node_outputs };
        evaluate(expr, &input, &scope).expect("expression should evaluate")
    }

    fn eval(expr: &str, input: Value) -> Value {
        eval_with(expr, input, json!({}), json!({}))
    }

    #[test]
    fn input_paths_resolve_through_objects_and_arrays() {
        let input = json!({ "player": { "items": [{ "name": "diamond" }] } });
        assert_eq!(eval("$input.player.items.0.name", input.clone()), json!("diamond"));
        assert_eq!(eval("$input", input.clone()), input);
    }

    #[test]
    fn missing_paths_are_null_not_errors() {
        assert_eq!(eval("$input.a.b.c", json!({ "a": null })), Value::Null);
        assert_eq!(eval("$input.x", Value::Null), Value::Null);
    }

    #[test]
    fn var_lookup_is_single_level() {
        let vars = json!({ "total": 7, "a.b": "dotted" });
        assert_eq!(eval_with("$var.total", json!({}), vars.clone(), json!({})), json!(7));
        assert_eq!(eval_with("$var.a.b", json!({}), vars, json!({})), json!("dotted"));
    }

    #[test]
    fn node_lookup_reads_other_outputs() {
        let outputs = json!({ "n1": { "status": 200, "body": { "ok": true } } });
        assert_eq!(eval_with("$node.n1.body.ok", json!({}), json!({}), outputs.clone()), json!(true));
        assert_eq!(eval_with("$node.n1", json!({}), json!({}), outputs.clone())["status"], json!(200));
        assert_eq!(eval_with("$node.missing.x", json!({}), json!({}), outputs), Value::Null);
    }

    #[test]
    fn arithmetic_respects_precedence_and_parens() {
        assert_eq!(eval("2 + 3 * 4", json!({})), json!(14));
        assert_eq!(eval("(2 + 3) * 4", json!({})), json!(20));
        assert_eq!(eval("-3 + 10", json!({})), json!(7));
        assert_eq!(eval("7 / 2", json!({})), json!(3.5));
        assert_eq!(eval("5", json!({})), json!(5));
    }

    #[test]
    fn arithmetic_errors_are_reported() {
        let empty = Map::new();
        let scope = Scope { variables: &empty, node_outputs: &empty };
        assert!(matches!(
            evaluate("1 / 0", &json!({}), &scope),
            Err(ExpressionError::DivisionByZero(_))
        ));
        assert!(matches!(
            evaluate("(1 + 2", &json!({}), &scope),
            Err(ExpressionError::Malformed(_))
        ));
        assert!(matches!(
            evaluate("1 2", &json!({}), &scope),
            Err(ExpressionError::Malformed(_))
        ));
    }

    #[test]
    fn everything_else_is_a_literal() {
        assert_eq!(eval("health_low", json!({})), json!("health_low"));
        assert_eq!(eval("$inputs.x", json!({})), json!("$inputs.x"));
        assert_eq!(eval("()", json!({})), json!("()"));
    }
}

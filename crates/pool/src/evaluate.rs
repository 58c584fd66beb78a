//! Minimal cell evaluation used by the bundled workers.
//!
//! `value` fields pass through (numeric strings become numbers). `formula`
//! fields hold arithmetic over decimal numbers: `+ - * /`, unary minus and
//! parentheses, with an optional leading `=`. Anything else is reported as
//! an application-level failure.

use serde_json::{Number, Value};

use gridcalc_core::{FORMULA_FIELD, VALUE_FIELD};

use crate::messages::TaskResult;

/// Deepest nesting of parentheses and unary minus a formula may use.
const MAX_DEPTH: usize = 256;

pub fn evaluate(field_name: &str, payload: &Value) -> TaskResult {
    let computed = match field_name {
        VALUE_FIELD => Ok(evaluate_value(payload)),
        FORMULA_FIELD => match payload {
            Value::String(formula) => evaluate_formula(formula).and_then(number_value),
            other => Err(format!("formula must be a string, got {other}")),
        },
        other => Err(format!("unknown field '{other}'")),
    };
    match computed {
        Ok(computed_value) => TaskResult::Success { computed_value },
        Err(error_message) => TaskResult::Failure { error_message },
    }
}

fn evaluate_value(payload: &Value) -> Value {
    match payload {
        Value::String(s) => match s.trim().parse::<f64>() {
            Ok(n) => Number::from_f64(n).map(Value::Number).unwrap_or_else(|| payload.clone()),
            Err(_) => payload.clone(),
        },
        other => other.clone(),
    }
}

fn number_value(n: f64) -> Result<Value, String> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| format!("result {n} is not a finite number"))
}

/// Evaluate an arithmetic formula.
pub fn evaluate_formula(formula: &str) -> Result<f64, String> {
    let source = formula.trim();
    let source = source.strip_prefix('=').unwrap_or(source);
    let mut parser = Parser {
        chars: source.chars().collect(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(format!(
            "unexpected '{}' at position {}",
            parser.chars[parser.pos], parser.pos
        ));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '/' {
                if rhs == 0.0 {
                    return Err("division by zero".into());
                }
                acc /= rhs;
            } else {
                acc *= rhs;
            }
        }
        Ok(acc)
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("formula nested too deeply".into());
        }
        Ok(())
    }

    // factor := '-' factor | '(' expr ')' | number
    fn factor(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                self.descend()?;
                let value = -self.factor()?;
                self.depth -= 1;
                Ok(value)
            }
            Some('(') => {
                self.pos += 1;
                self.descend()?;
                let value = self.expr()?;
                if self.peek() != Some(')') {
                    return Err("missing closing parenthesis".into());
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(format!("unexpected '{c}' at position {}", self.pos)),
            None => Err("unexpected end of formula".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self.pos < self.chars.len()
            && (self.chars[self.pos].is_ascii_digit() || self.chars[self.pos] == '.')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| format!("invalid number '{text}'"))
    }
}

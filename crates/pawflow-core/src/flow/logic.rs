//! JSON logic interpreter.
//!
//! A small, pure interpreter for JSON-logic rule trees. Rules are JSON values:
//! an object with exactly one key is an operation and must name a known
//! operator, arrays evaluate element-wise, every other value is a literal.
//! `var` reads dotted paths from the supplied data only.

use serde_json::{Value, json};

use super::expression::{ExpressionError, lookup_path, truthy};

/// Operators the interpreter understands.
pub const OPERATORS: &[&str] = &[
    "==", "===", "!=", "!==", ">", ">=", "<", "<=", "and", "or", "!", "!!", "if", "var",
    "missing", "in", "+", "-", "*", "/", "%", "min", "max", "cat",
];

/// Whether `value` looks like a logic operation (single known operator key).
pub fn is_logic_object(value: &Value) -> bool {
    match value.as_object() {
        Some(map) if map.len() == 1 => map.keys().all(|k| OPERATORS.contains(&k.as_str())),
        _ => false,
    }
}

/// Apply a rule to `data`.
pub fn apply(rule: &Value, data: &Value) -> Result<Value, ExpressionError> {
    match rule {
        Value::Object(map) if map.len() == 1 => {
            match map.iter().next() {
                Some((op, args)) if OPERATORS.contains(&op.as_str()) => {
                    apply_operator(op, args, data)
                }
                Some((op, _)) => Err(ExpressionError::UnknownOperator(op.clone())),
                None => Ok(rule.clone()),
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| apply(item, data))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn args_of(args: &Value) -> Vec<Value> {
    match args {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn apply_operator(op: &str, raw_args: &Value, data: &Value) -> Result<Value, ExpressionError> {
    let args = args_of(raw_args);

    // Short-circuiting operators evaluate their arguments lazily.
    match op {
        "and" => {
            let mut last = Value::Bool(true);
            for arg in &args {
                last = apply(arg, data)?;
                if !truthy(&last) {
                    return Ok(last);
                }
            }
            return Ok(last);
        }
        "or" => {
            let mut last = Value::Bool(false);
            for arg in &args {
                last = apply(arg, data)?;
                if truthy(&last) {
                    return Ok(last);
                }
            }
            return Ok(last);
        }
        "if" => {
            let mut i = 0;
            while i + 1 < args.len() {
                if truthy(&apply(&args[i], data)?) {
                    return apply(&args[i + 1], data);
                }
                i += 2;
            }
            return match args.get(i) {
                Some(otherwise) => apply(otherwise, data),
                None => Ok(Value::Null),
            };
        }
        _ => {}
    }

    let values = args
        .iter()
        .map(|a| apply(a, data))
        .collect::<Result<Vec<_>, _>>()?;
    let arg = |i: usize| values.get(i).cloned().unwrap_or(Value::Null);

    let result = match op {
        "var" => {
            let default = arg(1);
            match values.first() {
                None | Some(Value::Null) => data.clone(),
                Some(path) => {
                    let path = scalar_string(path);
                    if path.is_empty() {
                        data.clone()
                    } else {
                        lookup_path(data, &path).cloned().unwrap_or(default)
                    }
                }
            }
        }
        "missing" => {
            let keys: Vec<Value> = match values.first() {
                Some(Value::Array(list)) => list.clone(),
                _ => values.clone(),
            };
            let missing: Vec<Value> = keys
                .into_iter()
                .filter(|k| match lookup_path(data, &scalar_string(k)) {
                    None | Some(Value::Null) => true,
                    Some(Value::String(s)) => s.is_empty(),
                    Some(_) => false,
                })
                .collect();
            Value::Array(missing)
        }
        "==" => json!(loose_eq(&arg(0), &arg(1))),
        "!=" => json!(!loose_eq(&arg(0), &arg(1))),
        "===" => json!(arg(0) == arg(1)),
        "!==" => json!(arg(0) != arg(1)),
        ">" | ">=" | "<" | "<=" => {
            // Three arguments form a range check: a < b < c.
            if values.len() >= 3 {
                json!(compare(op, &arg(0), &arg(1)) && compare(op, &arg(1), &arg(2)))
            } else {
                json!(compare(op, &arg(0), &arg(1)))
            }
        }
        "!" => json!(!truthy(&arg(0))),
        "!!" => json!(truthy(&arg(0))),
        "in" => {
            let needle = arg(0);
            match arg(1) {
                Value::Array(items) => json!(items.iter().any(|i| loose_eq(i, &needle))),
                Value::String(haystack) => json!(haystack.contains(&scalar_string(&needle))),
                _ => json!(false),
            }
        }
        "+" => number(values.iter().filter_map(to_number).sum()),
        "*" => number(values.iter().filter_map(to_number).product()),
        "-" => match values.len() {
            0 => Value::Null,
            1 => to_number(&arg(0)).map(|n| number(-n)).unwrap_or(Value::Null),
            _ => match (to_number(&arg(0)), to_number(&arg(1))) {
                (Some(a), Some(b)) => number(a - b),
                _ => Value::Null,
            },
        },
        "/" => match (to_number(&arg(0)), to_number(&arg(1))) {
            (Some(_), Some(b)) if b == 0.0 => Value::Null,
            (Some(a), Some(b)) => number(a / b),
            _ => Value::Null,
        },
        "%" => match (to_number(&arg(0)), to_number(&arg(1))) {
            (Some(_), Some(b)) if b == 0.0 => Value::Null,
            (Some(a), Some(b)) => number(a % b),
            _ => Value::Null,
        },
        "min" => values
            .iter()
            .filter_map(to_number)
            .reduce(f64::min)
            .map(number)
            .unwrap_or(Value::Null),
        "max" => values
            .iter()
            .filter_map(to_number)
            .reduce(f64::max)
            .map(number)
            .unwrap_or(Value::Null),
        "cat" => Value::String(values.iter().map(scalar_string).collect()),
        other => return Err(ExpressionError::UnknownOperator(other.to_string())),
    };
    Ok(result)
}

/// Render a scalar the way `cat` and `var` paths expect.
fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        _ => None,
    }
}

/// Integral results stay integers so `{"+": [1, 2]} == 3` compares strictly.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Equality with numeric/string/bool coercion.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Number(_) | Value::Bool(_) | Value::String(_), Value::Number(_) | Value::Bool(_) | Value::String(_)) => {
            match (to_number(a), to_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => a == b,
    }
}

fn compare(op: &str, a: &Value, b: &Value) -> bool {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return match op {
            ">" => x > y,
            ">=" => x >= y,
            "<" => x < y,
            _ => x <= y,
        };
    }
    match (to_number(a), to_number(b)) {
        (Some(x), Some(y)) => match op {
            ">" => x > y,
            ">=" => x >= y,
            "<" => x < y,
            _ => x <= y,
        },
        _ => false,
    }
}

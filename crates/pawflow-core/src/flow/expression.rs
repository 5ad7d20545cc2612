//! Condition evaluator for condition and branch steps.
//!
//! A step config selects one of three forms, tried in order:
//!
//! 1. **JSON logic** under `logic` (or a config that is itself a logic object).
//! 2. **Textual expression** under `expression`, e.g. `owner.balance > 100`,
//!    evaluated by a sandboxed JEXL interpreter.
//! 3. **Path check** under `path`, with optional `equals`.
//!
//! Every form reads only the run context it is handed. An absent or empty
//! config evaluates to `true`.
//!
//! **Security note:** context values are always passed as data, NEVER
//! interpolated into expression strings.

use serde_json::{Value, json};

use super::logic;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during condition evaluation.
///
/// Runtime failures of textual expressions are not errors (they evaluate to
/// `false`); these variants describe malformed configs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression contains disallowed character '{found}'")]
    DisallowedCharacter { found: char },

    #[error("expression must be a string")]
    NotAString,

    #[error("unknown logic operator '{0}'")]
    UnknownOperator(String),

    #[error("condition config has no logic, expression or path")]
    UnrecognizedForm,
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// Stateless condition evaluator.
///
/// The JEXL interpreter is built per textual evaluation, so the evaluator is
/// freely shareable between worker tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a condition config against a context object.
    pub fn evaluate(&self, config: &Value, context: &Value) -> Result<bool, ExpressionError> {
        let map = match config {
            Value::Null => return Ok(true),
            Value::Object(map) if map.is_empty() => return Ok(true),
            Value::Object(map) => map,
            _ => return Err(ExpressionError::UnrecognizedForm),
        };

        if let Some(rule) = map.get("logic") {
            return Ok(truthy(&logic::apply(rule, context)?));
        }
        if logic::is_logic_object(config) {
            return Ok(truthy(&logic::apply(config, context)?));
        }

        if let Some(expression) = map.get("expression") {
            let expression = expression.as_str().ok_or(ExpressionError::NotAString)?;
            return self.evaluate_text(expression, context);
        }

        if let Some(path) = map.get("path") {
            let path = path.as_str().ok_or(ExpressionError::NotAString)?;
            let found = lookup_path(context, path);
            return Ok(match map.get("equals") {
                Some(expected) => found == Some(expected),
                None => found.is_some_and(truthy),
            });
        }

        Err(ExpressionError::UnrecognizedForm)
    }

    /// Evaluate a textual expression.
    ///
    /// The expression must pass the character whitelist; evaluation errors
    /// and unresolvable identifiers yield `false`.
    pub fn evaluate_text(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        check_whitelist(expression)?;
        if expression.trim().is_empty() {
            return Ok(true);
        }

        let context = if context.is_object() {
            context.clone()
        } else {
            json!({})
        };

        match jexl().eval_in_context(expression, &context) {
            Ok(result) => Ok(truthy(&result)),
            Err(e) => {
                tracing::debug!(expression, error = %e, "expression evaluation failed; treating as false");
                Ok(false)
            }
        }
    }
}

/// Characters a textual expression may contain.
fn check_whitelist(expression: &str) -> Result<(), ExpressionError> {
    const ALLOWED_SYMBOLS: &str = "._'\"()[],=!<>&|+-*/%";
    match expression
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || c.is_whitespace() || ALLOWED_SYMBOLS.contains(*c)))
    {
        Some(found) => Err(ExpressionError::DisallowedCharacter { found }),
        None => Ok(()),
    }
}

/// JEXL interpreter with the string/length transforms conditions commonly need.
fn jexl() -> jexl_eval::Evaluator<'static> {
    jexl_eval::Evaluator::new()
        .with_transform("lower", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_lowercase()))
        })
        .with_transform("upper", |args: &[Value]| {
            let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(s.to_uppercase()))
        })
        .with_transform("length", |args: &[Value]| {
            let len = match args.first() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            };
            Ok(json!(len as f64))
        })
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Resolve a dotted path (`owner.pets.0.name`) inside a JSON value.
///
/// Numeric segments index into arrays.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Value {
        json!({
            "owner": { "balance": 150, "name": "Ann", "tier": "gold" },
            "payload": { "petId": "p-1", "nights": 3 },
            "triggerType": "event",
            "actions": []
        })
    }

    fn eval(config: Value) -> Result<bool, ExpressionError> {
        ExpressionEvaluator::new().evaluate(&config, &ctx())
    }

    #[test]
    fn test_empty_config_is_true() {
        assert_eq!(eval(Value::Null), Ok(true));
        assert_eq!(eval(json!({})), Ok(true));
    }

    #[test]
    fn test_logic_form() {
        assert_eq!(eval(json!({ "logic": { ">": [{ "var": "owner.balance" }, 100] } })), Ok(true));
        assert_eq!(eval(json!({ "logic": { "<": [{ "var": "owner.balance" }, 100] } })), Ok(false));
    }

    #[test]
    fn test_logic_form_rejects_unknown_operator() {
        assert_eq!(
            eval(json!({ "logic": { "matches": [{ "var": "owner.tier" }, "g.*"] } })),
            Err(ExpressionError::UnknownOperator("matches".to_string()))
        );
    }

    #[test]
    fn test_bare_logic_object() {
        assert_eq!(eval(json!({ "==": [{ "var": "owner.tier" }, "gold"] })), Ok(true));
    }

    #[test]
    fn test_text_expression() {
        assert_eq!(eval(json!({ "expression": "owner.balance > 100" })), Ok(true));
        assert_eq!(
            eval(json!({ "expression": "owner.tier == 'gold' && payload.nights >= 3" })),
            Ok(true)
        );
        assert_eq!(eval(json!({ "expression": "owner.balance < 100" })), Ok(false));
    }

    #[test]
    fn test_text_expression_unknown_identifier_is_false() {
        assert_eq!(eval(json!({ "expression": "nobody.here == 'x'" })), Ok(false));
        assert_eq!(eval(json!({ "expression": "missing" })), Ok(false));
    }

    #[test]
    fn test_text_expression_runtime_error_is_false() {
        assert_eq!(eval(json!({ "expression": "owner.balance >" })), Ok(false));
    }

    #[test]
    fn test_text_expression_whitelist() {
        assert_eq!(
            eval(json!({ "expression": "owner.balance > 100; process.exit()" })),
            Err(ExpressionError::DisallowedCharacter { found: ';' })
        );
        assert_eq!(
            eval(json!({ "expression": "`whoami`" })),
            Err(ExpressionError::DisallowedCharacter { found: '`' })
        );
        assert_eq!(
            eval(json!({ "expression": "{a: 1}" })),
            Err(ExpressionError::DisallowedCharacter { found: '{' })
        );
        assert_eq!(eval(json!({ "expression": 42 })), Err(ExpressionError::NotAString));
    }

    #[test]
    fn test_path_existence_and_equality() {
        assert_eq!(eval(json!({ "path": "payload.petId" })), Ok(true));
        assert_eq!(eval(json!({ "path": "payload.bookingId" })), Ok(false));
        assert_eq!(eval(json!({ "path": "owner.tier", "equals": "gold" })), Ok(true));
        assert_eq!(eval(json!({ "path": "owner.tier", "equals": "silver" })), Ok(false));
        assert_eq!(eval(json!({ "path": "payload.nights", "equals": 3 })), Ok(true));
    }

    #[test]
    fn test_logic_takes_priority_over_other_forms() {
        let config = json!({
            "logic": false,
            "expression": "true",
            "path": "owner.name"
        });
        assert_eq!(eval(config), Ok(false));
    }

    #[test]
    fn test_unrecognized_form() {
        assert_eq!(eval(json!({ "foo": "bar" })), Err(ExpressionError::UnrecognizedForm));
        assert_eq!(eval(json!("owner.balance")), Err(ExpressionError::UnrecognizedForm));
    }

    #[test]
    fn test_lookup_path_indexes_arrays() {
        let value = json!({ "pets": [{ "name": "rex" }] });
        assert_eq!(lookup_path(&value, "pets.0.name"), Some(&json!("rex")));
        assert_eq!(lookup_path(&value, "pets.3.name"), None);
        assert_eq!(lookup_path(&value, ""), Some(&value));
    }

    #[test]
    fn test_truthy() {
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));
    }
}

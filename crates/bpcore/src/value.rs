use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dynamic value carried by process results and run variables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Json(serde_json::Value),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whole, non-negative numbers only; fractions, NaN and infinities are `None`
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && (0.0..u64::MAX as f64).contains(n) => {
                Some(*n as u64)
            }
            Value::Json(j) => j.as_u64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Loose truthiness used by the default condition evaluator.
    ///
    /// `Null`, `false`, `0`, `NaN`, the empty string and empty collections are
    /// falsy; everything else is truthy. Embedded JSON follows the same rules.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::Json(json) => Value::from_json(json.clone()).is_truthy(),
        }
    }

    /// Convert plain JSON into the structured variants.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(obj) => Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_loose_rules() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(!Value::from(0.0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Array(vec![]).is_truthy());

        assert!(Value::from(true).is_truthy());
        assert!(Value::from(3i64).is_truthy());
        assert!(Value::from("yes").is_truthy());
        assert!(Value::from(json!({"a": 1})).is_truthy());
        assert!(!Value::from(json!([])).is_truthy());
    }

    #[test]
    fn from_json_builds_structured_values() {
        let value = Value::from_json(json!({"n": 2, "tags": ["a"], "ok": true}));
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        assert_eq!(map["n"], Value::Number(2.0));
        assert_eq!(map["tags"], Value::Array(vec![Value::from("a")]));
        assert_eq!(map["ok"], Value::Bool(true));
    }

    #[test]
    fn as_u64_reads_numbers_and_json() {
        assert_eq!(Value::from(250i64).as_u64(), Some(250));
        assert_eq!(Value::from(json!(40)).as_u64(), Some(40));
        assert_eq!(Value::from(-1.0).as_u64(), None);
        assert_eq!(Value::from(3.0).as_u64(), Some(3));
        assert_eq!(Value::from(1.9).as_u64(), None);
        assert_eq!(Value::from(f64::NAN).as_u64(), None);
        assert_eq!(Value::from(f64::INFINITY).as_u64(), None);
        assert_eq!(Value::from(1e20).as_u64(), None);
        assert_eq!(Value::from("x").as_u64(), None);
    }
}

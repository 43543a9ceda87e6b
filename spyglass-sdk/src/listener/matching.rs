//! Partial structural matching of JSON payloads.
//!
//! `expected` matches `actual` when every field present in `expected` is
//! present in `actual` with a matching value. Objects match recursively
//! and may carry extra fields; arrays must have the same length and match
//! element-wise; scalars must be equal.

use serde_json::Value;
use std::fmt;

/// First point at which a payload diverged from the expected shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Mismatch {
    /// JSON path of the diverging value, rooted at `$`.
    pub path: String,
    pub expected: Value,
    /// `None` when the field is missing.
    pub actual: Option<Value>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "at {}: expected {}, found {}",
                self.path, self.expected, actual
            ),
            None => write!(
                f,
                "at {}: expected {}, field is missing",
                self.path, self.expected
            ),
        }
    }
}

impl std::error::Error for Mismatch {}

pub fn match_object(actual: &Value, expected: &Value) -> Result<(), Mismatch> {
    walk(actual, expected, "$")
}

fn walk(actual: &Value, expected: &Value, path: &str) -> Result<(), Mismatch> {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => {
            for (field, expected) in expected {
                let child = format!("{path}.{field}");
                match actual.get(field) {
                    Some(actual) => walk(actual, expected, &child)?,
                    None => {
                        return Err(Mismatch {
                            path: child,
                            expected: expected.clone(),
                            actual: None,
                        });
                    }
                }
            }
            Ok(())
        }
        (Value::Array(expected_items), Value::Array(actual_items))
            if expected_items.len() == actual_items.len() =>
        {
            for (index, (actual, expected)) in actual_items.iter().zip(expected_items).enumerate() {
                walk(actual, expected, &format!("{path}[{index}]"))?;
            }
            Ok(())
        }
        _ if expected == actual => Ok(()),
        _ => Err(Mismatch {
            path: path.to_owned(),
            expected: expected.clone(),
            actual: Some(actual.clone()),
        }),
    }
}

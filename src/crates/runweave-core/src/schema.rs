//! Declarative value schemas
//!
//! The engine consumes schema validation purely as a capability:
//! `validate(value)` either succeeds or yields a list of field errors. This
//! module provides a small object-shape schema sufficient for workflow
//! inputs, leaf inputs, suspend/resume payloads, and time-travel inputs.
//! Schemas describe object fields by name, kind, and requiredness; unknown
//! fields are allowed.
//!
//! # Example
//!
//! ```rust
//! use runweave_core::schema::{FieldKind, Schema};
//! use serde_json::json;
//!
//! let schema = Schema::object()
//!     .field("value", FieldKind::String)
//!     .optional("count", FieldKind::Number);
//!
//! assert!(schema.validate(&json!({"value": "test"})).is_ok());
//!
//! let errors = schema.validate(&json!({"count": "three"})).unwrap_err();
//! assert_eq!(errors.len(), 2); // missing `value`, wrong kind for `count`
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of value a schema field accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// Accepts any non-missing value
    Any,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Any => "any",
        }
    }
}

/// A single missing or invalid field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Path of the offending field
    pub path: String,
    /// What was wrong with it
    pub message: String,
}

impl FieldError {
    /// Create a field error
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FieldSpec {
    name: String,
    kind: FieldKind,
    required: bool,
}

/// Object-shape schema with named, kinded, optionally required fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldSpec>,
}

impl Schema {
    /// Schema for an object value with no declared fields (accepts any object)
    pub fn object() -> Self {
        Self::default()
    }

    /// Add a required field
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Add an optional field (kind-checked only when present)
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Validate a value against this schema
    ///
    /// Returns every missing required field and every present field whose
    /// kind does not match, not just the first.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        let map = match value.as_object() {
            Some(map) => map,
            None => {
                return Err(vec![FieldError::new(
                    "$",
                    format!("expected an object, got {}", kind_of(value)),
                )]);
            }
        };

        for spec in &self.fields {
            match map.get(&spec.name) {
                None => {
                    if spec.required {
                        errors.push(FieldError::new(&spec.name, "required field is missing"));
                    }
                }
                Some(field) => {
                    if !spec.kind.matches(field) {
                        errors.push(FieldError::new(
                            &spec.name,
                            format!("expected {}, got {}", spec.kind.name(), kind_of(field)),
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_matching_object() {
        let schema = Schema::object()
            .field("value", FieldKind::String)
            .field("count", FieldKind::Number);

        assert!(schema.validate(&json!({"value": "a", "count": 3})).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let schema = Schema::object()
            .field("value", FieldKind::String)
            .field("flag", FieldKind::Boolean);

        let errors = schema.validate(&json!({"flag": "yes"})).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].path, "value");
        assert!(errors[1].message.contains("expected boolean"));
    }

    #[test]
    fn test_optional_field_checked_when_present() {
        let schema = Schema::object().optional("count", FieldKind::Number);

        assert!(schema.validate(&json!({})).is_ok());
        assert!(schema.validate(&json!({"count": 1})).is_ok());
        assert!(schema.validate(&json!({"count": "one"})).is_err());
    }

    #[test]
    fn test_rejects_non_object() {
        let schema = Schema::object();
        let errors = schema.validate(&json!([1, 2])).unwrap_err();
        assert_eq!(errors[0].path, "$");
    }

    #[test]
    fn test_unknown_fields_allowed() {
        let schema = Schema::object().field("a", FieldKind::Any);
        assert!(schema.validate(&json!({"a": 1, "extra": true})).is_ok());
    }
}

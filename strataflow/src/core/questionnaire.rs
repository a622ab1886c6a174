//! The questionnaire payload that seeds every stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat key-value questionnaire answers supplied by the CRUD layer.
///
/// Values are kept as JSON so the engine never depends on the form schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Questionnaire {
    fields: Map<String, Value>,
}

impl Questionnaire {
    /// Creates a questionnaire from a field map.
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Creates a questionnaire from a JSON value, if it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Adds or replaces a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns all fields in key order.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no fields are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Renders a JSON value for inclusion in a stage message.
///
/// Strings are emitted raw, arrays are joined with `", "`, and null becomes
/// `"not specified"`.
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "not specified".to_string(),
        Value::String(s) if s.trim().is_empty() => "not specified".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) if items.is_empty() => "none".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_requires_object() {
        assert!(Questionnaire::from_value(json!({"secteur": "Agro"})).is_some());
        assert!(Questionnaire::from_value(json!(["a"])).is_none());
    }

    #[test]
    fn test_transparent_serde() {
        let q = Questionnaire::default().with_field("pays", json!("Senegal"));
        assert_eq!(serde_json::to_value(&q).unwrap(), json!({"pays": "Senegal"}));
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!(null)), "not specified");
        assert_eq!(render_value(&json!("  ")), "not specified");
        assert_eq!(render_value(&json!(["ODD 7", "ODD 13"])), "ODD 7, ODD 13");
        assert_eq!(render_value(&json!([])), "none");
        assert_eq!(render_value(&json!(42)), "42");
        assert_eq!(render_value(&json!({"a": 1})), r#"{"a":1}"#);
    }
}

//! Typed variable values and their kind classification.
//!
//! Every agent-scope and global-scope variable holds a [`Value`]. The enum is
//! closed: the engine, the validator, and the observation pipeline all match
//! on it exhaustively, so adding a variant is a deliberate, compiler-guided
//! change rather than a runtime discovery.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A single variable value in agent or global state.
///
/// Serialized untagged, so configuration and state files use natural
/// literals: `42.5`, `true`, `"text"`, lists, and nested mappings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean flag.
    Bool(bool),
    /// Continuous numeric quantity. The only variant observation noise
    /// ever touches.
    Number(f64),
    /// Free-form text.
    Text(String),
    /// Ordered collection of nested values.
    List(Vec<Value>),
    /// Nested mapping of named values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short lowercase name of the variant, for error messages and logs.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// The numeric payload, when this is a [`Value::Number`].
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// The declared kind of a variable in the schema.
///
/// `Structured` admits both lists and maps; the other kinds map one to one
/// onto [`Value`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// Continuous numeric quantity; the only kind that takes bounds.
    Number,
    /// Boolean flag.
    Bool,
    /// Free-form text.
    Text,
    /// Nested list or mapping.
    Structured,
}

impl VariableKind {
    /// Whether `value` is admissible under this declared kind.
    pub const fn admits(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Number, Value::Number(_))
                | (Self::Bool, Value::Bool(_))
                | (Self::Text, Value::Text(_))
                | (Self::Structured, Value::List(_) | Value::Map(_))
        )
    }

    /// The zero value used when a schema omits an explicit initial value.
    pub const fn default_value(self) -> Value {
        match self {
            Self::Number => Value::Number(0.0),
            Self::Bool => Value::Bool(false),
            Self::Text => Value::Text(String::new()),
            Self::Structured => Value::Map(BTreeMap::new()),
        }
    }

    /// Lowercase kind name, matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Text => "text",
            Self::Structured => "structured",
        }
    }
}

impl core::fmt::Display for VariableKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn untagged_serde_uses_natural_literals() {
        let number: Value = serde_json::from_str("42.5").unwrap();
        assert_eq!(number, Value::Number(42.5));

        let flag: Value = serde_json::from_str("true").unwrap();
        assert_eq!(flag, Value::Bool(true));

        let text: Value = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(text, Value::Text("hello".to_owned()));

        let map: Value = serde_json::from_str(r#"{"inner": 1.0}"#).unwrap();
        assert!(matches!(map, Value::Map(_)));
    }

    #[test]
    fn integer_literals_parse_as_numbers() {
        let value: Value = serde_json::from_str("100").unwrap();
        assert_eq!(value.as_number(), Some(100.0));
    }

    #[test]
    fn kind_admits_matching_values_only() {
        assert!(VariableKind::Number.admits(&Value::Number(1.0)));
        assert!(!VariableKind::Number.admits(&Value::Bool(true)));
        assert!(VariableKind::Structured.admits(&Value::List(vec![])));
        assert!(VariableKind::Structured.admits(&Value::Map(BTreeMap::new())));
        assert!(!VariableKind::Structured.admits(&Value::Text(String::new())));
    }

    #[test]
    fn default_values_match_their_kind() {
        for kind in [
            VariableKind::Number,
            VariableKind::Bool,
            VariableKind::Text,
            VariableKind::Structured,
        ] {
            assert!(kind.admits(&kind.default_value()), "kind {kind} default");
        }
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(VariableKind::Number.to_string(), "number");
        assert_eq!(Value::Text(String::new()).kind_name(), "text");
    }
}

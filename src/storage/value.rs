//! Column values and field-value encoding.
//!
//! [`Value`] is the single currency passed between callers, the statement
//! renderer and the drivers. A [`Value::List`] never reaches a driver: it is
//! flattened by [`encode_field_value`] before binding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delimiter used when flattening list values into a single column.
pub const LIST_DELIMITER: char = ',';

/// A single column value.
///
/// Serializes untagged, so JSON `null`, numbers, strings and arrays map
/// directly onto the variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Signed 64-bit integer.
    Integer(i64),
    /// Double precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// A sequence of values, stored as delimiter-joined text.
    List(Vec<Value>),
    /// Raw bytes. JSON arrays always deserialize as [`Value::List`].
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => f.write_str(s),
            Self::Blob(b) => f.write_str(&String::from_utf8_lossy(b)),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{LIST_DELIMITER}")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Self::List(v.into_iter().map(Self::from).collect())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Self::List(v.into_iter().map(Self::from).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::from(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Real(n.as_f64().unwrap_or_default()), Self::Integer),
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            },
            obj @ serde_json::Value::Object(_) => Self::Text(obj.to_string()),
        }
    }
}

/// Encodes a field value for storage.
///
/// Lists are joined with [`LIST_DELIMITER`] into a single text value; every
/// other value is returned unchanged. Elements that themselves contain the
/// delimiter lose their boundaries, so the encoding is not reversible for
/// them.
///
/// # Examples
///
/// ```
/// use recstore::{Value, encode_field_value};
///
/// let tags = Value::from(vec!["a", "b", "c"]);
/// assert_eq!(encode_field_value(tags), Value::Text("a,b,c".to_string()));
/// assert_eq!(encode_field_value(Value::Integer(3)), Value::Integer(3));
/// ```
#[must_use]
pub fn encode_field_value(value: Value) -> Value {
    match value {
        list @ Value::List(_) => Value::Text(list.to_string()),
        other => other,
    }
}

/// Splits a column written by [`encode_field_value`] back into its elements.
///
/// An empty string decodes to an empty list.
///
/// # Examples
///
/// ```
/// use recstore::decode_field_list;
///
/// assert_eq!(decode_field_list("a,b"), vec!["a".to_string(), "b".to_string()]);
/// assert!(decode_field_list("").is_empty());
/// ```
#[must_use]
pub fn decode_field_list(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split(LIST_DELIMITER).map(str::to_string).collect()
}

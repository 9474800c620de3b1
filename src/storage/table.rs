//! Table references and identifier validation.
//!
//! Table and column names are interpolated into SQL text (values never are),
//! so every identifier is checked against a conservative grammar before a
//! statement is rendered.

use crate::{Error, Result};
use std::fmt;

/// Returns true if `name` is a plain SQL identifier.
///
/// Accepted: an ASCII letter or underscore followed by ASCII letters, digits
/// or underscores. No quoting, no dots, no whitespace.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates an identifier, naming its role in the error.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `name` is not a plain identifier.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid {kind} name '{name}'")))
    }
}

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    schema: Option<String>,
    name: String,
}

impl TableRef {
    /// Creates a validated table reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the schema or table is not a plain
    /// identifier.
    pub fn new(schema: Option<&str>, name: &str) -> Result<Self> {
        if let Some(schema) = schema {
            validate_identifier("schema", schema)?;
        }
        validate_identifier("table", name)?;
        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

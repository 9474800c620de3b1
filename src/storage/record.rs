//! Records, filter maps and field maps.
//!
//! All three are ordered column/value lists. Order matters for rendering
//! (placeholders are numbered in iteration order) but never for meaning.

use super::value::{Value, decode_field_list};
use serde::Serialize;
use serde::ser::SerializeMap;

/// Ordered column/value pairs with last-write-wins insertion.
#[derive(Debug, Clone, Default, PartialEq)]
struct Columns(Vec<(String, Value)>);

impl Columns {
    fn insert(&mut self, column: String, value: Value) {
        if let Some(slot) = self.0.iter_mut().find(|(c, _)| *c == column) {
            slot.1 = value;
        } else {
            self.0.push((column, value));
        }
    }

    fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }
}

macro_rules! column_map {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name(Columns);

        impl $name {
            /// Creates an empty map.
            #[must_use]
            pub fn new() -> Self {
                Self::default()
            }

            /// Adds a column, replacing an earlier entry with the same name.
            #[must_use]
            pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
                self.insert(column, value);
                self
            }

            /// Adds a column in place, replacing an earlier entry with the same name.
            pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
                self.0.insert(column.into(), value.into());
            }

            /// Returns the value for `column`.
            #[must_use]
            pub fn get(&self, column: &str) -> Option<&Value> {
                self.0.get(column)
            }

            /// Iterates entries in insertion order.
            pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
                self.0.0.iter().map(|(c, v)| (c.as_str(), v))
            }

            /// Returns the number of entries.
            #[must_use]
            pub fn len(&self) -> usize {
                self.0.0.len()
            }

            /// Returns true if there are no entries.
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.0.is_empty()
            }
        }

        impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for $name {
            fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
                let mut map = Self::new();
                for (k, v) in iter {
                    map.insert(k, v);
                }
                map
            }
        }
    };
}

column_map!(
    /// Equality-AND predicate set applied to a read.
    Filter
);

column_map!(
    /// Column values applied by a create or update.
    Fields
);

column_map!(
    /// One row, as column name to value.
    Record
);

impl Record {
    /// Builds a record from a fetched row.
    ///
    /// Columns whose name is purely numeric are positional duplicates and are
    /// dropped; named columns are kept in fetch order.
    pub fn from_row<'a>(columns: impl IntoIterator<Item = &'a str>, values: Vec<Value>) -> Self {
        columns
            .into_iter()
            .zip(values)
            .filter(|(name, _)| !is_positional(name))
            .collect()
    }

    /// Returns the `id` column as an integer.
    #[must_use]
    pub fn id(&self) -> Option<i64> {
        self.get("id").and_then(Value::as_i64)
    }

    /// Decodes a list-valued column written through field encoding.
    #[must_use]
    pub fn get_list(&self, column: &str) -> Option<Vec<String>> {
        self.get(column)
            .and_then(Value::as_str)
            .map(decode_field_list)
    }
}

impl Serialize for Record {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

fn is_positional(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_preserves_order_and_replaces() {
        let fields = Fields::new()
            .with("name", "alice")
            .with("age", 30)
            .with("name", "bob");

        let keys: Vec<&str> = fields.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["name", "age"]);
        assert_eq!(fields.get("name"), Some(&Value::from("bob")));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_record_drops_positional_columns() {
        let record = Record::from_row(
            ["id", "0", "name", "1"],
            vec![
                Value::Integer(7),
                Value::Integer(7),
                Value::from("alice"),
                Value::from("alice"),
            ],
        );

        assert_eq!(record.len(), 2);
        assert_eq!(record.id(), Some(7));
        assert_eq!(record.get("name"), Some(&Value::from("alice")));
        assert!(record.get("0").is_none());
    }

    #[test]
    fn test_record_get_list() {
        let record = Record::new().with("tags", "a,b");
        assert_eq!(
            record.get_list("tags"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(record.get_list("missing"), None);
    }

    #[test]
    fn test_record_serializes_as_object() {
        let record = Record::new().with("id", 7).with("name", "alice");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"id":7,"name":"alice"}"#);
    }

    #[test]
    fn test_filter_from_iter() {
        let filter: Filter = vec![("a", 1), ("b", 2)].into_iter().collect();
        assert_eq!(filter.len(), 2);
        assert!(!filter.is_empty());
        assert!(Filter::new().is_empty());
    }
}

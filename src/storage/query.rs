//! Statement recipes and SQL rendering.
//!
//! A [`Query`] describes *what* to run (operation, table, filter or fields)
//! without being tied to a connection. It is rendered into a [`Statement`]
//! for a specific [`Dialect`] on every attempt, so a statement can be rebuilt
//! against a fresh connection after the previous one died.
//!
//! Every value is bound as a parameter, ids included. Only validated
//! identifiers are interpolated into SQL text.

use super::record::{Fields, Filter};
use super::table::{TableRef, validate_identifier};
use super::value::{Value, encode_field_value};
use crate::{Error, Result};
use std::fmt::Write as _;

/// Placeholder and insert-id conventions of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `SQLite`: `?N` placeholders, rowid read from the connection.
    Sqlite,
    /// PostgreSQL: `$N` placeholders, generated id read via `RETURNING id`.
    Postgres,
}

impl Dialect {
    /// Renders the placeholder for the 1-based parameter `index`.
    #[must_use]
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Sqlite => format!("?{index}"),
            Self::Postgres => format!("${index}"),
        }
    }

    /// Returns the clause appended to inserts to surface the generated id.
    #[must_use]
    pub const fn insert_id_suffix(self) -> Option<&'static str> {
        match self {
            Self::Sqlite => None,
            Self::Postgres => Some(" RETURNING id"),
        }
    }
}

/// A rendered SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Value>,
}

impl Statement {
    /// Creates a statement with no parameters.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Binds the next positional parameter.
    ///
    /// Lists are flattened by field encoding.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(encode_field_value(value.into()));
        self
    }

    /// Returns the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the bound parameters in placeholder order.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// A repeatable recipe for a statement.
///
/// Implementations must produce an equivalent statement each time they are
/// asked, since recovery renders the recipe again after reconnecting.
pub trait StatementSource {
    /// Short operation name used in logs, metrics and errors.
    fn operation(&self) -> &'static str;

    /// Renders the statement for `dialect`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the recipe cannot be rendered.
    fn render(&self, dialect: Dialect) -> Result<Statement>;
}

impl StatementSource for Statement {
    fn operation(&self) -> &'static str {
        "statement"
    }

    fn render(&self, _dialect: Dialect) -> Result<Statement> {
        Ok(self.clone())
    }
}

/// The table-generic operations the record store issues.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// `SELECT *` with an optional equality-AND filter.
    Select {
        /// Target table.
        table: TableRef,
        /// Filter; empty means every row.
        filter: Filter,
    },
    /// `SELECT id`.
    SelectIds {
        /// Target table.
        table: TableRef,
    },
    /// `SELECT COUNT(*)`.
    Count {
        /// Target table.
        table: TableRef,
    },
    /// `INSERT`.
    Insert {
        /// Target table.
        table: TableRef,
        /// Column values.
        fields: Fields,
    },
    /// `UPDATE ... WHERE id = ?`.
    Update {
        /// Target table.
        table: TableRef,
        /// Row id.
        id: i64,
        /// Columns to change.
        fields: Fields,
    },
    /// `DELETE ... WHERE id = ?`.
    Delete {
        /// Target table.
        table: TableRef,
        /// Row id.
        id: i64,
    },
}

impl StatementSource for Query {
    fn operation(&self) -> &'static str {
        match self {
            Self::Select { .. } => "get_objects",
            Self::SelectIds { .. } => "get_object_ids",
            Self::Count { .. } => "get_object_count",
            Self::Insert { .. } => "create_object",
            Self::Update { .. } => "update_object",
            Self::Delete { .. } => "delete_object",
        }
    }

    fn render(&self, dialect: Dialect) -> Result<Statement> {
        match self {
            Self::Select { table, filter } => render_select(dialect, table, filter),
            Self::SelectIds { table } => Ok(Statement::new(format!("SELECT id FROM {table}"))),
            Self::Count { table } => Ok(Statement::new(format!("SELECT COUNT(*) FROM {table}"))),
            Self::Insert { table, fields } => render_insert(dialect, table, fields),
            Self::Update { table, id, fields } => render_update(dialect, table, *id, fields),
            Self::Delete { table, id } => {
                let sql = format!("DELETE FROM {table} WHERE id = {}", dialect.placeholder(1));
                Ok(Statement::new(sql).bind(*id))
            },
        }
    }
}

fn render_select(dialect: Dialect, table: &TableRef, filter: &Filter) -> Result<Statement> {
    let mut stmt = Statement::new(format!("SELECT * FROM {table}"));

    for (i, (column, value)) in filter.iter().enumerate() {
        validate_identifier("column", column)?;
        stmt.sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        let _ = write!(stmt.sql, "{column} = {}", dialect.placeholder(i + 1));
        stmt = stmt.bind(value.clone());
    }

    Ok(stmt)
}

fn render_insert(dialect: Dialect, table: &TableRef, fields: &Fields) -> Result<Statement> {
    let suffix = dialect.insert_id_suffix().unwrap_or_default();
    if fields.is_empty() {
        return Ok(Statement::new(format!(
            "INSERT INTO {table} DEFAULT VALUES{suffix}"
        )));
    }

    let mut columns = Vec::with_capacity(fields.len());
    let mut placeholders = Vec::with_capacity(fields.len());
    let mut stmt = Statement::new(String::new());
    for (i, (column, value)) in fields.iter().enumerate() {
        validate_identifier("column", column)?;
        columns.push(column);
        placeholders.push(dialect.placeholder(i + 1));
        stmt = stmt.bind(value.clone());
    }

    stmt.sql = format!(
        "INSERT INTO {table}({}) VALUES({}){suffix}",
        columns.join(","),
        placeholders.join(",")
    );
    Ok(stmt)
}

fn render_update(dialect: Dialect, table: &TableRef, id: i64, fields: &Fields) -> Result<Statement> {
    if fields.is_empty() {
        return Err(Error::InvalidInput(format!(
            "update of {table} id {id} has no fields"
        )));
    }

    let mut assignments = Vec::with_capacity(fields.len());
    let mut stmt = Statement::new(String::new());
    for (i, (column, value)) in fields.iter().enumerate() {
        validate_identifier("column", column)?;
        assignments.push(format!("{column} = {}", dialect.placeholder(i + 1)));
        stmt = stmt.bind(value.clone());
    }

    stmt.sql = format!(
        "UPDATE {table} SET {} WHERE id = {}",
        assignments.join(", "),
        dialect.placeholder(fields.len() + 1)
    );
    Ok(stmt.bind(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableRef {
        TableRef::new(None, "users").unwrap()
    }

    #[test]
    fn test_select_without_filter() {
        let query = Query::Select {
            table: users(),
            filter: Filter::new(),
        };
        let stmt = query.render(Dialect::Sqlite).unwrap();
        assert_eq!(stmt.sql(), "SELECT * FROM users");
        assert!(stmt.params().is_empty());
    }

    #[test]
    fn test_select_with_filter_keeps_order() {
        let query = Query::Select {
            table: TableRef::new(Some("main"), "users").unwrap(),
            filter: Filter::new().with("name", "alice").with("age", 30),
        };

        let stmt = query.render(Dialect::Sqlite).unwrap();
        assert_eq!(
            stmt.sql(),
            "SELECT * FROM main.users WHERE name = ?1 AND age = ?2"
        );
        assert_eq!(stmt.params(), &[Value::from("alice"), Value::Integer(30)]);

        let stmt = query.render(Dialect::Postgres).unwrap();
        assert_eq!(
            stmt.sql(),
            "SELECT * FROM main.users WHERE name = $1 AND age = $2"
        );
    }

    #[test]
    fn test_select_rejects_bad_column() {
        let query = Query::Select {
            table: users(),
            filter: Filter::new().with("1=1 OR name", "x"),
        };
        assert!(matches!(
            query.render(Dialect::Sqlite),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_ids_and_count() {
        let ids = Query::SelectIds { table: users() };
        assert_eq!(
            ids.render(Dialect::Sqlite).unwrap().sql(),
            "SELECT id FROM users"
        );
        let count = Query::Count { table: users() };
        assert_eq!(
            count.render(Dialect::Postgres).unwrap().sql(),
            "SELECT COUNT(*) FROM users"
        );
    }

    #[test]
    fn test_insert_encodes_lists() {
        let query = Query::Insert {
            table: users(),
            fields: Fields::new()
                .with("name", "alice")
                .with("tags", vec!["a", "b"]),
        };

        let stmt = query.render(Dialect::Sqlite).unwrap();
        assert_eq!(stmt.sql(), "INSERT INTO users(name,tags) VALUES(?1,?2)");
        assert_eq!(stmt.params(), &[Value::from("alice"), Value::from("a,b")]);

        let stmt = query.render(Dialect::Postgres).unwrap();
        assert_eq!(
            stmt.sql(),
            "INSERT INTO users(name,tags) VALUES($1,$2) RETURNING id"
        );
    }

    #[test]
    fn test_insert_without_fields_uses_defaults() {
        let query = Query::Insert {
            table: users(),
            fields: Fields::new(),
        };
        assert_eq!(
            query.render(Dialect::Sqlite).unwrap().sql(),
            "INSERT INTO users DEFAULT VALUES"
        );
    }

    #[test]
    fn test_update_binds_id_last() {
        let query = Query::Update {
            table: users(),
            id: 7,
            fields: Fields::new().with("age", 31).with("id", 9),
        };

        let stmt = query.render(Dialect::Sqlite).unwrap();
        assert_eq!(stmt.sql(), "UPDATE users SET age = ?1, id = ?2 WHERE id = ?3");
        assert_eq!(
            stmt.params(),
            &[Value::Integer(31), Value::Integer(9), Value::Integer(7)]
        );
    }

    #[test]
    fn test_update_without_fields_is_invalid() {
        let query = Query::Update {
            table: users(),
            id: 7,
            fields: Fields::new(),
        };
        assert!(matches!(
            query.render(Dialect::Sqlite),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_delete_binds_id() {
        let query = Query::Delete {
            table: users(),
            id: 7,
        };
        let stmt = query.render(Dialect::Postgres).unwrap();
        assert_eq!(stmt.sql(), "DELETE FROM users WHERE id = $1");
        assert_eq!(stmt.params(), &[Value::Integer(7)]);
        assert_eq!(query.operation(), "delete_object");
    }

    #[test]
    fn test_raw_statement_renders_itself() {
        let stmt = Statement::new("SELECT * FROM users WHERE id = ?1").bind(3);
        assert_eq!(stmt.render(Dialect::Sqlite).unwrap(), stmt);
    }
}

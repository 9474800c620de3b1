//! Table-generic record operations.
//!
//! [`RecordStore`] turns a table name plus a filter or field map into a
//! [`Query`], runs it through [`ConnectionManager::execute_with_recovery`]
//! and normalizes the result.
//!
//! Every operation comes in two forms:
//!
//! | Sentinel | Fallible | Failure |
//! |----------|----------|---------|
//! | `get_objects` | `try_get_objects` | `None` |
//! | `get_object_ids` | `try_get_object_ids` | `None` |
//! | `get_object_count` | `try_get_object_count` | `None` |
//! | `create_object` | `try_create_object` | `None` |
//! | `update_object` | `try_update_object` | `false` |
//! | `delete_object` | `try_delete_object` | `false` |
//!
//! The sentinel forms never return an error; they log a warning with the
//! `record_store` target and return the sentinel.

use super::connection::ConnectionManager;
use super::driver::{Outcome, RowSet};
use super::metrics::record_operation_metrics;
use super::query::{Query, StatementSource};
use super::record::{Fields, Filter, Record};
use super::table::{TableRef, validate_identifier};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Table-generic create, read, update, delete and count.
#[derive(Debug, Clone)]
pub struct RecordStore {
    manager: Arc<ConnectionManager>,
    schema: Option<String>,
}

impl RecordStore {
    /// Creates a store over a shared connection manager.
    #[must_use]
    pub const fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            schema: None,
        }
    }

    /// Qualifies every table with `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `schema` is not a plain identifier.
    pub fn with_schema(mut self, schema: &str) -> Result<Self> {
        validate_identifier("schema", schema)?;
        self.schema = Some(schema.to_string());
        Ok(self)
    }

    /// Returns the connection manager.
    #[must_use]
    pub const fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    fn table(&self, name: &str) -> Result<TableRef> {
        TableRef::new(self.schema.as_deref(), name)
    }

    fn run(&self, query: &Query) -> Result<Outcome> {
        let start = Instant::now();
        let result = self.manager.execute_with_recovery(query);
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(self.manager.backend(), query.operation(), start, status);
        result
    }

    /// Fetches every row matching `filter`, or every row without one.
    ///
    /// An empty filter is the same as no filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid, no connection is
    /// available, or the database rejects the query.
    #[instrument(skip(self, filter), fields(operation = "get_objects", filter_len = filter.map_or(0, Filter::len)))]
    pub fn try_get_objects(&self, table: &str, filter: Option<&Filter>) -> Result<Vec<Record>> {
        let query = Query::Select {
            table: self.table(table)?,
            filter: filter.cloned().unwrap_or_default(),
        };
        let RowSet { columns, rows } = self.run(&query)?.into_rows();
        Ok(rows
            .into_iter()
            .map(|values| Record::from_row(columns.iter().map(String::as_str), values))
            .collect())
    }

    /// Fetches the ids of every row.
    ///
    /// # Errors
    ///
    /// See [`Self::try_get_objects`].
    #[instrument(skip(self), fields(operation = "get_object_ids"))]
    pub fn try_get_object_ids(&self, table: &str) -> Result<Vec<i64>> {
        let query = Query::SelectIds {
            table: self.table(table)?,
        };
        self.run(&query)?
            .into_rows()
            .rows
            .into_iter()
            .map(|row| {
                row.first()
                    .and_then(super::value::Value::as_i64)
                    .ok_or_else(|| Error::Statement {
                        operation: "get_object_ids".to_string(),
                        cause: "id column is not an integer".to_string(),
                    })
            })
            .collect()
    }

    /// Counts the rows of a table.
    ///
    /// # Errors
    ///
    /// See [`Self::try_get_objects`].
    #[instrument(skip(self), fields(operation = "get_object_count"))]
    pub fn try_get_object_count(&self, table: &str) -> Result<i64> {
        let query = Query::Count {
            table: self.table(table)?,
        };
        self.run(&query)?
            .into_rows()
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(super::value::Value::as_i64)
            .ok_or_else(|| Error::Statement {
                operation: "get_object_count".to_string(),
                cause: "count returned no integer".to_string(),
            })
    }

    /// Inserts a row and returns its generated id.
    ///
    /// List values are encoded before binding. An empty field map inserts a
    /// row of defaults.
    ///
    /// # Errors
    ///
    /// See [`Self::try_get_objects`].
    #[instrument(skip(self, fields), fields(operation = "create_object", fields_len = fields.len()))]
    pub fn try_create_object(&self, table: &str, fields: &Fields) -> Result<i64> {
        let query = Query::Insert {
            table: self.table(table)?,
            fields: fields.clone(),
        };
        let id = self.run(&query)?.inserted_id().ok_or_else(|| Error::Statement {
            operation: "create_object".to_string(),
            cause: "insert did not report a generated id".to_string(),
        })?;
        tracing::debug!(table, id, "Created object");
        Ok(id)
    }

    /// Updates the given columns of the row with `id`.
    ///
    /// Succeeds when the statement executes, whether or not a row matched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an empty field map, otherwise see
    /// [`Self::try_get_objects`].
    #[instrument(skip(self, fields), fields(operation = "update_object", fields_len = fields.len()))]
    pub fn try_update_object(&self, table: &str, id: i64, fields: &Fields) -> Result<()> {
        let query = Query::Update {
            table: self.table(table)?,
            id,
            fields: fields.clone(),
        };
        let affected = self.run(&query)?.affected();
        tracing::debug!(table, id, affected, "Updated object");
        Ok(())
    }

    /// Deletes the row with `id`.
    ///
    /// # Errors
    ///
    /// See [`Self::try_get_objects`].
    #[instrument(skip(self), fields(operation = "delete_object"))]
    pub fn try_delete_object(&self, table: &str, id: i64) -> Result<()> {
        let query = Query::Delete {
            table: self.table(table)?,
            id,
        };
        let affected = self.run(&query)?.affected();
        tracing::debug!(table, id, affected, "Deleted object");
        Ok(())
    }

    /// Fetches matching rows, or `None` on failure.
    pub fn get_objects(&self, table: &str, filter: Option<&Filter>) -> Option<Vec<Record>> {
        sentinel("get_objects", table, self.try_get_objects(table, filter))
    }

    /// Fetches all ids, or `None` on failure.
    pub fn get_object_ids(&self, table: &str) -> Option<Vec<i64>> {
        sentinel("get_object_ids", table, self.try_get_object_ids(table))
    }

    /// Counts rows, or `None` on failure.
    pub fn get_object_count(&self, table: &str) -> Option<i64> {
        sentinel("get_object_count", table, self.try_get_object_count(table))
    }

    /// Inserts a row, returning its id or `None` on failure.
    pub fn create_object(&self, table: &str, fields: &Fields) -> Option<i64> {
        sentinel("create_object", table, self.try_create_object(table, fields))
    }

    /// Updates a row, returning whether the statement succeeded.
    pub fn update_object(&self, table: &str, id: i64, fields: &Fields) -> bool {
        sentinel("update_object", table, self.try_update_object(table, id, fields)).is_some()
    }

    /// Deletes a row, returning whether the statement succeeded.
    pub fn delete_object(&self, table: &str, id: i64) -> bool {
        sentinel("delete_object", table, self.try_delete_object(table, id)).is_some()
    }
}

fn sentinel<T>(operation: &'static str, table: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(target: "record_store", operation, table, error = %e, "Operation failed");
            None
        },
    }
}

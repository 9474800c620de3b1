//! `SQLite` driver.
//!
//! The database name from [`ConnectParams`] is the file path (or
//! `:memory:`). Host, port and credentials are ignored.
//!
//! Note that an in-memory database does not survive a reconnect: recovery
//! opens a fresh, empty database.

use super::{Driver, DriverError, DriverResult, Outcome, RowSet, Session};
use crate::storage::connection::ConnectParams;
use crate::storage::query::{Dialect, Statement};
use crate::storage::value::Value;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, OpenFlags, ToSql, params_from_iter};
use std::time::Duration;

/// Opens `SQLite` sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl SqliteDriver {
    /// Creates the driver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self, params: &ConnectParams) -> DriverResult<Box<dyn Session>> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&params.database, flags)
            .map_err(|e| DriverError::Connect(format!("{}: {e}", params.database)))?;

        configure_connection(&conn, params.statement_timeout)
            .map_err(|e| DriverError::Connect(e.to_string()))?;

        Ok(Box::new(SqliteSession {
            conn: Some(conn),
            last_insert_id: 0,
        }))
    }
}

/// Applies pragmas to a freshly opened connection.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: the per-statement deadline while waiting on locks
fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    // journal_mode returns a row ("wal" or "memory"), so the result is ignored
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    conn.busy_timeout(busy_timeout)
}

/// Maps a rusqlite error onto the recovery taxonomy.
fn classify(e: rusqlite::Error) -> DriverError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::CannotOpen | ErrorCode::SystemIoFailure | ErrorCode::NotADatabase
            ) =>
        {
            DriverError::ConnectionLost(e.to_string())
        },
        _ => DriverError::Statement(e.to_string()),
    }
}

struct SqliteSession {
    conn: Option<Connection>,
    last_insert_id: i64,
}

impl SqliteSession {
    fn conn(&self) -> DriverResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("session closed".to_string()))
    }
}

impl Session for SqliteSession {
    fn prepare(&mut self, sql: &str) -> DriverResult<()> {
        self.conn()?.prepare(sql).map(drop).map_err(classify)
    }

    fn execute(&mut self, statement: &Statement) -> DriverResult<Outcome> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(statement.sql()).map_err(classify)?;
        let params = params_from_iter(statement.params().iter().map(SqlParam));

        if stmt.column_count() > 0 {
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            let width = columns.len();
            let mut rows = stmt.query(params).map_err(classify)?;
            let mut set = RowSet {
                columns,
                rows: Vec::new(),
            };
            while let Some(row) = rows.next().map_err(classify)? {
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(from_value_ref(row.get_ref(i).map_err(classify)?));
                }
                set.rows.push(values);
            }
            return Ok(Outcome::Rows(set));
        }

        let affected = stmt.execute(params).map_err(classify)?;
        drop(stmt);
        let rowid = conn.last_insert_rowid();
        self.last_insert_id = rowid;
        Ok(Outcome::Changed {
            affected: u64::try_from(affected).unwrap_or(u64::MAX),
            last_insert_id: Some(rowid),
        })
    }

    fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }

    fn close(mut self: Box<Self>) -> DriverResult<()> {
        match self.conn.take() {
            Some(conn) => conn
                .close()
                .map_err(|(_, e)| DriverError::Statement(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Borrowed parameter adapter; lists never reach here (encoded on bind).
struct SqlParam<'a>(&'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            list @ Value::List(_) => ToSqlOutput::from(list.to_string()),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

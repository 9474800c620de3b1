//! Database drivers.
//!
//! A [`Driver`] knows how to open a [`Session`] for a set of
//! [`ConnectParams`]; a session executes rendered [`Statement`]s. The
//! connection manager only ever talks to these two traits, which is also the
//! seam tests use to inject failing connections.
//!
//! | Driver | Feature | Dialect |
//! |--------|---------|---------|
//! | [`SqliteDriver`] | always | [`Dialect::Sqlite`] |
//! | [`PostgresDriver`] | `postgres` | [`Dialect::Postgres`] |

mod postgres;
mod sqlite;

pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

use super::connection::ConnectParams;
use super::query::{Dialect, Statement};
use super::value::Value;
use crate::config::{Backend, DatabaseConfig};
use crate::{Error, Result};
use thiserror::Error as ThisError;

/// Errors reported by a driver.
///
/// The split between [`DriverError::ConnectionLost`] and
/// [`DriverError::Statement`] drives recovery: only the former is retried.
#[derive(Debug, Clone, ThisError, PartialEq, Eq)]
pub enum DriverError {
    /// Opening a session failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The session died underneath a statement.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The database rejected the statement.
    #[error("{0}")]
    Statement(String),
}

impl DriverError {
    /// Returns true if the error means the session is unusable.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Column names and row values returned by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Row values, each aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

/// What executing a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The statement returned rows.
    Rows(RowSet),
    /// The statement changed rows.
    Changed {
        /// Number of rows affected.
        affected: u64,
        /// Id generated by an insert, if any.
        last_insert_id: Option<i64>,
    },
}

impl Outcome {
    /// Returns the row set, or an empty one for a change outcome.
    #[must_use]
    pub fn into_rows(self) -> RowSet {
        match self {
            Self::Rows(rows) => rows,
            Self::Changed { .. } => RowSet::default(),
        }
    }

    /// Returns how many rows the statement touched.
    ///
    /// For a row-returning statement this is the number of rows returned.
    #[must_use]
    pub fn affected(&self) -> u64 {
        match self {
            Self::Changed { affected, .. } => *affected,
            Self::Rows(set) => u64::try_from(set.rows.len()).unwrap_or(u64::MAX),
        }
    }

    /// Returns the generated id.
    ///
    /// For dialects that surface the id through `RETURNING id`, this is the
    /// first cell of the first row.
    #[must_use]
    pub fn inserted_id(&self) -> Option<i64> {
        match self {
            Self::Changed { last_insert_id, .. } => *last_insert_id,
            Self::Rows(set) => set.rows.first()?.first()?.as_i64(),
        }
    }
}

/// Opens sessions against one kind of database.
pub trait Driver: Send + Sync {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Placeholder conventions of this database.
    fn dialect(&self) -> Dialect;

    /// Opens a new session.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Connect`] if the database is unreachable or
    /// rejects the credentials.
    fn connect(&self, params: &ConnectParams) -> DriverResult<Box<dyn Session>>;
}

/// A live connection.
pub trait Session: Send {
    /// Compiles `sql` without executing it.
    fn prepare(&mut self, sql: &str) -> DriverResult<()>;

    /// Executes a statement.
    fn execute(&mut self, statement: &Statement) -> DriverResult<Outcome>;

    /// Id generated by the most recent insert on this session.
    fn last_insert_id(&self) -> i64;

    /// Closes the session.
    fn close(self: Box<Self>) -> DriverResult<()>;
}

/// Builds the driver selected by configuration.
///
/// # Errors
///
/// Returns [`Error::FeatureNotEnabled`] if PostgreSQL is configured but the
/// crate was built without the `postgres` feature.
pub fn driver_for(config: &DatabaseConfig) -> Result<Box<dyn Driver>> {
    match config.backend {
        Backend::Sqlite => Ok(Box::new(SqliteDriver::new())),
        Backend::Postgres if cfg!(feature = "postgres") => Ok(Box::new(PostgresDriver::new())),
        Backend::Postgres => Err(Error::FeatureNotEnabled("postgres".to_string())),
    }
}

//! # Recstore
//!
//! Table-agnostic record access over a single, self-recovering database
//! connection.
//!
//! Recstore gives callers a uniform way to create, read, update, delete,
//! filter and count rows in arbitrary tables without building SQL by hand.
//!
//! ## Features
//!
//! - One lazily opened connection per [`ConnectionManager`], recreated
//!   transparently after a dropped connection (one retry per statement)
//! - Equality-AND filters and field maps rendered to parameterized SQL
//! - Pluggable drivers: `SQLite` (always built), PostgreSQL (`postgres` feature)
//! - Sentinel API (`Option` / `bool`) plus `try_*` variants returning [`Result`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use recstore::{ConnectionManager, Fields, Filter, RecordStore};
//! use recstore::storage::driver::SqliteDriver;
//!
//! let manager = Arc::new(ConnectionManager::new(Box::new(SqliteDriver::new()), params));
//! let store = RecordStore::new(manager);
//!
//! let id = store.create_object("users", &Fields::new().with("name", "alice").with("age", 30));
//! let rows = store.get_objects("users", Some(&Filter::new().with("name", "alice")));
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod observability;
pub mod storage;

pub use config::{Backend, DatabaseConfig, LoggingSettings, RecstoreConfig};
pub use storage::{
    ConnectParams, ConnectionManager, Fields, Filter, Outcome, Query, Record, RecordStore,
    Statement, StatementSource, TableRef, Value, decode_field_list, encode_field_value,
};

/// Error type for recstore operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Table or column name is not a plain identifier, empty update |
/// | `ConnectionUnavailable` | No live connection and connecting (or reconnecting) failed |
/// | `Statement` | The database rejected a statement (syntax, constraint, type) |
/// | `OperationFailed` | Config file I/O, logging initialization |
/// | `FeatureNotEnabled` | PostgreSQL requested without the `postgres` feature |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No live connection could be obtained.
    ///
    /// Raised when:
    /// - The initial connect fails
    /// - A connection loss was detected and the single reconnect failed
    /// - The retried statement failed again after reconnecting
    #[error("connection unavailable: {cause}")]
    ConnectionUnavailable {
        /// The underlying cause.
        cause: String,
    },

    /// A statement failed for a reason other than connectivity.
    #[error("statement '{operation}' failed: {cause}")]
    Statement {
        /// The operation that issued the statement.
        operation: String,
        /// The driver's message.
        cause: String,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),
}

impl Error {
    /// Returns true if the error is a connectivity failure.
    #[must_use]
    pub const fn is_connection_unavailable(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable { .. })
    }
}

/// Result type alias for recstore operations.
pub type Result<T> = std::result::Result<T, Error>;

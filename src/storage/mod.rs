//! Storage layer.
//!
//! Layered bottom-up:
//! - **Drivers** ([`driver`]): open sessions and execute rendered statements
//! - **Connection** ([`ConnectionManager`]): one live session, recovered once
//!   per statement after a dropped connection
//! - **Store** ([`RecordStore`]): table-generic operations built from filter
//!   and field maps

// Holding the connection guard for the whole unit of work is intended.
#![allow(clippy::significant_drop_tightening)]

mod connection;
pub mod driver;
mod metrics;
mod query;
mod record;
mod store;
mod table;
mod value;

pub use connection::{
    ConnectParams, ConnectionManager, DEFAULT_CONNECT_TIMEOUT, DEFAULT_STATEMENT_TIMEOUT,
    acquire_lock,
};
pub use driver::{Driver, DriverError, Outcome, RowSet, Session};
pub use query::{Dialect, Query, Statement, StatementSource};
pub use record::{Fields, Filter, Record};
pub use store::RecordStore;
pub use table::{TableRef, is_identifier, validate_identifier};
pub use value::{LIST_DELIMITER, Value, decode_field_list, encode_field_value};

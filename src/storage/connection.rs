//! Connection lifecycle and statement recovery.
//!
//! A [`ConnectionManager`] owns at most one live [`Session`]. It is created
//! lazily, reused until [`ConnectionManager::disconnect`] or until it is found
//! dead, and recreated at most once per unit of work.

use super::driver::{Driver, DriverError, Outcome, Session};
use super::query::{Dialect, Statement, StatementSource};
use crate::{Error, Result};
use secrecy::SecretString;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Default statement deadline (5 seconds).
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default connect deadline (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters for opening a session.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Server host. Ignored by `SQLite`.
    pub host: String,
    /// Server port. Ignored by `SQLite`.
    pub port: u16,
    /// Database name, or the file path for `SQLite`.
    pub database: String,
    /// Login user.
    pub user: Option<String>,
    /// Login password.
    pub password: Option<SecretString>,
    /// Per-statement deadline.
    pub statement_timeout: Duration,
    /// Deadline for establishing a session.
    pub connect_timeout: Duration,
}

impl ConnectParams {
    /// Creates parameters for `database` on the default local server.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: database.into(),
            user: None,
            password: None,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the server address.
    #[must_use]
    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the login credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: SecretString) -> Self {
        self.user = Some(user.into());
        self.password = Some(password);
        self
    }

    /// Sets the per-statement deadline.
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Sets the connect deadline.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Acquires the mutex, recovering from poisoning.
///
/// If a previous holder panicked the session state is still coherent (at
/// worst the session is dead, which recovery handles), so the guard is
/// taken over with a warning.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Connection mutex was poisoned, recovering");
            metrics::counter!("record_store_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

struct State {
    params: ConnectParams,
    session: Option<Box<dyn Session>>,
}

impl State {
    fn open(&mut self, driver: &dyn Driver) -> std::result::Result<(), DriverError> {
        let session = driver.connect(&self.params)?;
        self.session = Some(session);
        Ok(())
    }

    /// Drops a dead session without waiting on it.
    fn discard(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::debug!(error = %e, "Closing dead session failed");
            }
        }
    }
}

/// Owns the single live session and recovers it on loss.
///
/// # Concurrency Model
///
/// Access is serialized by a `Mutex`. The lock is held across render,
/// execute and the single retry, so an insert and the id it generated are
/// observed together.
pub struct ConnectionManager {
    driver: Box<dyn Driver>,
    state: Mutex<State>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("driver", &self.driver.name())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a disconnected manager.
    #[must_use]
    pub fn new(driver: Box<dyn Driver>, params: ConnectParams) -> Self {
        Self {
            driver,
            state: Mutex::new(State {
                params,
                session: None,
            }),
        }
    }

    /// Returns the driver's backend name.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.driver.name()
    }

    /// Returns the driver's dialect.
    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    /// Returns true if a session is open.
    ///
    /// The session may still turn out dead on next use.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        acquire_lock(&self.state).session.is_some()
    }

    /// Opens a session with the stored parameters.
    ///
    /// Returns true if a session is live afterwards. Idempotent.
    pub fn connect(&self) -> bool {
        let mut state = acquire_lock(&self.state);
        self.ensure_connected(&mut state).is_ok()
    }

    /// Stores `params` and opens a session with them.
    ///
    /// If a session is already live it is kept and `params` is ignored.
    pub fn connect_with(&self, params: &ConnectParams) -> bool {
        let mut state = acquire_lock(&self.state);
        if state.session.is_some() {
            return true;
        }
        state.params = params.clone();
        self.ensure_connected(&mut state).is_ok()
    }

    /// Closes the session.
    ///
    /// Returns false if there was no session, otherwise whether the close
    /// succeeded. State is cleared either way.
    pub fn disconnect(&self) -> bool {
        let mut state = acquire_lock(&self.state);
        let Some(session) = state.session.take() else {
            return false;
        };
        match session.close() {
            Ok(()) => {
                tracing::debug!(backend = self.backend(), "Disconnected");
                true
            },
            Err(e) => {
                tracing::warn!(backend = self.backend(), error = %e, "Disconnect failed");
                false
            },
        }
    }

    /// Validates `sql` against the live session.
    ///
    /// The returned statement carries no parameters; bind them with
    /// [`Statement::bind`] and run it with [`Self::execute_with_recovery`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionUnavailable`] if there is no session, or
    /// [`Error::Statement`] if the database rejects the SQL.
    pub fn prepare_statement(&self, sql: &str) -> Result<Statement> {
        let mut state = acquire_lock(&self.state);
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| Error::ConnectionUnavailable {
                cause: "not connected".to_string(),
            })?;
        session.prepare(sql).map_err(|e| {
            if e.is_connection_lost() {
                Error::ConnectionUnavailable {
                    cause: e.to_string(),
                }
            } else {
                statement_error("prepare_statement", &e)
            }
        })?;
        Ok(Statement::new(sql))
    }

    /// Runs a statement recipe, recovering once from connection loss.
    ///
    /// 1. Ensure a session (connect if needed).
    /// 2. Render `source` for the dialect and execute.
    /// 3. If the session was lost, drop it, reconnect, render again and
    ///    execute once more.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionUnavailable`] if no session could be established,
    ///   or the reconnect or the retry failed.
    /// - [`Error::Statement`] if the database rejected the statement. Not
    ///   retried.
    /// - [`Error::InvalidInput`] if the recipe cannot be rendered.
    pub fn execute_with_recovery<S>(&self, source: &S) -> Result<Outcome>
    where
        S: StatementSource + ?Sized,
    {
        let operation = source.operation();
        let mut state = acquire_lock(&self.state);
        self.ensure_connected(&mut state)?;

        let statement = source.render(self.dialect())?;
        let first = match state.session.as_mut() {
            Some(session) => session.execute(&statement),
            None => Err(DriverError::ConnectionLost("no session".to_string())),
        };

        let cause = match first {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_connection_lost() => e.to_string(),
            Err(e) => return Err(statement_error(operation, &e)),
        };

        tracing::warn!(
            backend = self.backend(),
            operation,
            cause = %cause,
            "Connection lost, reconnecting"
        );
        metrics::counter!(
            "record_store_reconnects_total",
            "backend" => self.backend()
        )
        .increment(1);

        state.discard();
        if let Err(e) = state.open(self.driver.as_ref()) {
            tracing::error!(backend = self.backend(), error = %e, "Reconnect failed");
            return Err(Error::ConnectionUnavailable {
                cause: e.to_string(),
            });
        }

        let statement = source.render(self.dialect())?;
        let retry = match state.session.as_mut() {
            Some(session) => session.execute(&statement),
            None => Err(DriverError::ConnectionLost("no session".to_string())),
        };
        match retry {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_connection_lost() => {
                state.discard();
                Err(Error::ConnectionUnavailable {
                    cause: e.to_string(),
                })
            },
            Err(e) => Err(statement_error(operation, &e)),
        }
    }

    /// Returns the id generated by the last insert on the current session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionUnavailable`] if there is no session.
    pub fn last_insert_id(&self) -> Result<i64> {
        let state = acquire_lock(&self.state);
        state
            .session
            .as_ref()
            .map(|s| s.last_insert_id())
            .ok_or_else(|| Error::ConnectionUnavailable {
                cause: "not connected".to_string(),
            })
    }

    fn ensure_connected(&self, state: &mut State) -> Result<()> {
        if state.session.is_some() {
            return Ok(());
        }
        match state.open(self.driver.as_ref()) {
            Ok(()) => {
                tracing::debug!(
                    backend = self.backend(),
                    database = %state.params.database,
                    "Connected"
                );
                Ok(())
            },
            Err(e) => {
                tracing::error!(
                    backend = self.backend(),
                    database = %state.params.database,
                    error = %e,
                    "Failed to connect"
                );
                Err(Error::ConnectionUnavailable {
                    cause: e.to_string(),
                })
            },
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.discard();
    }
}

fn statement_error(operation: &str, e: &DriverError) -> Error {
    Error::Statement {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::driver::SqliteDriver;
    use crate::storage::value::Value;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Box::new(SqliteDriver::new()), ConnectParams::new(":memory:"))
    }

    #[test]
    fn test_connect_is_idempotent() {
        let manager = manager();
        assert!(!manager.is_connected());
        assert!(manager.connect());
        manager
            .execute_with_recovery(&Statement::new("CREATE TABLE t (id INTEGER PRIMARY KEY)"))
            .unwrap();
        // A second connect keeps the session, so the in-memory table survives.
        assert!(manager.connect());
        assert!(manager.connect_with(&ConnectParams::new(":memory:")));
        let outcome = manager
            .execute_with_recovery(&Statement::new("SELECT COUNT(*) FROM t"))
            .unwrap();
        assert_eq!(outcome.into_rows().rows, vec![vec![Value::Integer(0)]]);
    }

    #[test]
    fn test_disconnect_twice() {
        let manager = manager();
        assert!(manager.connect());
        assert!(manager.disconnect());
        assert!(!manager.disconnect());
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_connect_failure_returns_false() {
        let manager = ConnectionManager::new(
            Box::new(SqliteDriver::new()),
            ConnectParams::new("/nonexistent-dir/for/sure/db.sqlite"),
        );
        assert!(!manager.connect());
        assert!(!manager.is_connected());

        let err = manager
            .execute_with_recovery(&Statement::new("SELECT 1"))
            .unwrap_err();
        assert!(err.is_connection_unavailable());
    }

    #[test]
    fn test_execute_connects_lazily() {
        let manager = manager();
        let outcome = manager
            .execute_with_recovery(&Statement::new("SELECT ?1").bind(5))
            .unwrap();
        assert!(manager.is_connected());
        assert_eq!(outcome.into_rows().rows, vec![vec![Value::Integer(5)]]);
    }

    #[test]
    fn test_statement_error_not_retried() {
        let manager = manager();
        let err = manager
            .execute_with_recovery(&Statement::new("SELECT * FROM nope"))
            .unwrap_err();
        assert!(matches!(err, Error::Statement { ref operation, .. } if operation == "statement"));
        assert!(manager.is_connected());
    }

    #[test]
    fn test_prepare_statement() {
        let manager = manager();
        assert!(matches!(
            manager.prepare_statement("SELECT 1"),
            Err(Error::ConnectionUnavailable { .. })
        ));

        assert!(manager.connect());
        let stmt = manager.prepare_statement("SELECT ?1").unwrap();
        assert_eq!(stmt.sql(), "SELECT ?1");
        assert!(matches!(
            manager.prepare_statement("SELEKT"),
            Err(Error::Statement { .. })
        ));
    }

    #[test]
    fn test_last_insert_id() {
        let manager = manager();
        assert!(manager.last_insert_id().is_err());

        manager
            .execute_with_recovery(&Statement::new(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)",
            ))
            .unwrap();
        manager
            .execute_with_recovery(&Statement::new("INSERT INTO t(v) VALUES(?1)").bind("x"))
            .unwrap();
        assert_eq!(manager.last_insert_id().unwrap(), 1);
    }

    #[test]
    fn test_changed_outcome_reports_affected_rows() {
        let manager = manager();
        manager
            .execute_with_recovery(&Statement::new(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)",
            ))
            .unwrap();
        for v in ["a", "a", "b"] {
            manager
                .execute_with_recovery(&Statement::new("INSERT INTO t(v) VALUES(?1)").bind(v))
                .unwrap();
        }
        let outcome = manager
            .execute_with_recovery(&Statement::new("DELETE FROM t WHERE v = ?1").bind("a"))
            .unwrap();
        assert_eq!(outcome.affected(), 2);

        let outcome = manager
            .execute_with_recovery(&Statement::new("DELETE FROM t WHERE v = ?1").bind("zzz"))
            .unwrap();
        assert_eq!(outcome.affected(), 0);
    }

    #[test]
    fn test_poisoned_lock_recovers() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let clone = std::sync::Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock(&mutex), 1);
    }

    #[test]
    fn test_params_builders() {
        let params = ConnectParams::new("db")
            .with_server("db.internal", 6543)
            .with_credentials("app", SecretString::from("pw"))
            .with_statement_timeout(Duration::from_millis(250))
            .with_connect_timeout(Duration::from_secs(1));
        assert_eq!(params.host, "db.internal");
        assert_eq!(params.port, 6543);
        assert_eq!(params.user.as_deref(), Some("app"));
        assert!(params.password.is_some());
        assert_eq!(params.statement_timeout, Duration::from_millis(250));
        assert_eq!(params.connect_timeout, Duration::from_secs(1));
    }
}

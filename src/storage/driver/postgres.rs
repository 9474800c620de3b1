//! PostgreSQL driver.
//!
//! Each session owns a single-threaded tokio runtime that drives the
//! `tokio-postgres` connection task; every call blocks on it. Sessions must
//! therefore not be used from inside another tokio runtime.

#[cfg(feature = "postgres")]
mod implementation {
    use super::super::{Driver, DriverError, DriverResult, Outcome, RowSet, Session};
    use crate::storage::connection::ConnectParams;
    use crate::storage::query::{Dialect, Statement};
    use crate::storage::value::Value;
    use secrecy::ExposeSecret;
    use std::collections::BTreeMap;
    use tokio::runtime::Runtime;
    use tokio_postgres::error::SqlState;
    use tokio_postgres::types::{ToSql, Type};
    use tokio_postgres::{Client, NoTls, Row};

    /// Opens PostgreSQL sessions.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PostgresDriver;

    impl PostgresDriver {
        /// Creates the driver.
        #[must_use]
        pub const fn new() -> Self {
            Self
        }

        fn build_config(params: &ConnectParams) -> tokio_postgres::Config {
            let mut config = tokio_postgres::Config::new();
            config
                .host(&params.host)
                .port(params.port)
                .dbname(&params.database)
                .connect_timeout(params.connect_timeout)
                .options(format!(
                    "-c statement_timeout={}",
                    params.statement_timeout.as_millis()
                ));
            if let Some(user) = &params.user {
                config.user(user);
            }
            if let Some(password) = &params.password {
                config.password(password.expose_secret());
            }
            config
        }
    }

    impl Driver for PostgresDriver {
        fn name(&self) -> &'static str {
            "postgres"
        }

        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        fn connect(&self, params: &ConnectParams) -> DriverResult<Box<dyn Session>> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| DriverError::Connect(format!("runtime: {e}")))?;

            let config = Self::build_config(params);
            let (client, connection) = runtime
                .block_on(config.connect(NoTls))
                .map_err(|e| DriverError::Connect(e.to_string()))?;

            runtime.spawn(async move {
                if let Err(e) = connection.await {
                    tracing::debug!(error = %e, "PostgreSQL connection task ended");
                }
            });

            Ok(Box::new(PostgresSession {
                runtime,
                client,
                last_insert_id: 0,
            }))
        }
    }

    struct PostgresSession {
        runtime: Runtime,
        client: Client,
        last_insert_id: i64,
    }

    /// Maps a client error onto the recovery taxonomy.
    ///
    /// A closed client, connection exceptions (class 08) and server-side
    /// terminations (57P01..57P03) mean the session is gone.
    fn classify(e: &tokio_postgres::Error) -> DriverError {
        let lost = e.is_closed()
            || e.code().is_some_and(|code| {
                code.code().starts_with("08")
                    || *code == SqlState::ADMIN_SHUTDOWN
                    || *code == SqlState::CRASH_SHUTDOWN
                    || *code == SqlState::CANNOT_CONNECT_NOW
            });
        if lost {
            DriverError::ConnectionLost(e.to_string())
        } else {
            DriverError::Statement(e.to_string())
        }
    }

    impl PostgresSession {
        fn prepare_checked(&self, sql: &str) -> DriverResult<tokio_postgres::Statement> {
            if self.client.is_closed() {
                return Err(DriverError::ConnectionLost("client closed".to_string()));
            }
            self.runtime
                .block_on(self.client.prepare(sql))
                .map_err(|e| classify(&e))
        }
    }

    impl Session for PostgresSession {
        fn prepare(&mut self, sql: &str) -> DriverResult<()> {
            self.prepare_checked(sql).map(drop)
        }

        fn execute(&mut self, statement: &Statement) -> DriverResult<Outcome> {
            let mut prepared = self.prepare_checked(statement.sql())?;

            // Parameters and columns without a native mapping are converted by
            // the server through their text form.
            let mut casts = BTreeMap::new();
            for (i, (value, ty)) in statement.params().iter().zip(prepared.params()).enumerate() {
                if is_native(ty) {
                    continue;
                }
                if matches!(value, Value::Blob(_)) {
                    return Err(mismatch(value, ty));
                }
                casts.insert(i + 1, type_name(ty));
            }
            let columns: Vec<(&str, bool)> = prepared
                .columns()
                .iter()
                .map(|c| (c.name(), is_native(c.type_())))
                .collect();
            if !casts.is_empty() || columns.iter().any(|(_, native)| !native) {
                let sql = text_projection(&cast_placeholders(statement.sql(), &casts), &columns);
                tracing::trace!(sql = %sql, "Bridging non-native types through text");
                prepared = self.prepare_checked(&sql)?;
            }

            let params = statement
                .params()
                .iter()
                .zip(prepared.params())
                .map(|(value, ty)| to_param(value, ty))
                .collect::<DriverResult<Vec<_>>>()?;
            let refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

            if prepared.columns().is_empty() {
                let affected = self
                    .runtime
                    .block_on(self.client.execute(&prepared, &refs))
                    .map_err(|e| classify(&e))?;
                return Ok(Outcome::Changed {
                    affected,
                    last_insert_id: None,
                });
            }

            let rows = self
                .runtime
                .block_on(self.client.query(&prepared, &refs))
                .map_err(|e| classify(&e))?;

            let set = RowSet {
                columns: prepared
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect(),
                rows: rows.iter().map(row_values).collect::<DriverResult<_>>()?,
            };

            if statement.sql().ends_with(" RETURNING id") {
                if let Some(id) = Outcome::Rows(set.clone()).inserted_id() {
                    self.last_insert_id = id;
                }
            }
            Ok(Outcome::Rows(set))
        }

        fn last_insert_id(&self) -> i64 {
            self.last_insert_id
        }

        fn close(self: Box<Self>) -> DriverResult<()> {
            let Self {
                runtime, client, ..
            } = *self;
            drop(client);
            runtime.shutdown_timeout(std::time::Duration::from_secs(1));
            Ok(())
        }
    }

    type Param = Box<dyn ToSql + Sync + Send>;

    fn mismatch(value: &Value, ty: &Type) -> DriverError {
        DriverError::Statement(format!("cannot bind {value:?} to a {ty} parameter"))
    }

    /// Returns true for types [`to_param`] and [`column_value`] map directly.
    fn is_native(ty: &Type) -> bool {
        matches!(
            *ty,
            Type::INT2
                | Type::INT4
                | Type::INT8
                | Type::BOOL
                | Type::FLOAT4
                | Type::FLOAT8
                | Type::BYTEA
                | Type::TEXT
                | Type::VARCHAR
                | Type::BPCHAR
                | Type::NAME
                | Type::UNKNOWN
        )
    }

    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn type_name(ty: &Type) -> String {
        format!("{}.{}", quote_ident(ty.schema()), quote_ident(ty.name()))
    }

    /// Rewrites `$N` as `($N::text::<type>)` for every `N` in `casts`.
    ///
    /// Quoted literals and identifiers are copied untouched.
    fn cast_placeholders(sql: &str, casts: &BTreeMap<usize, String>) -> String {
        if casts.is_empty() {
            return sql.to_string();
        }
        let mut out = String::with_capacity(sql.len() + casts.len() * 32);
        let mut quote: Option<char> = None;
        let mut chars = sql.char_indices().peekable();
        while let Some((start, c)) = chars.next() {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (None, '\'' | '"') => quote = Some(c),
                (None, '$') => {
                    let mut end = start + 1;
                    while let Some(&(i, d)) = chars.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        end = i + 1;
                        chars.next();
                    }
                    let cast = sql[start + 1..end]
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| casts.get(&n));
                    match cast {
                        Some(ty) => {
                            out.push('(');
                            out.push_str(&sql[start..end]);
                            out.push_str("::text::");
                            out.push_str(ty);
                            out.push(')');
                        },
                        None => out.push_str(&sql[start..end]),
                    }
                    continue;
                },
                _ => {},
            }
            out.push(c);
        }
        out
    }

    /// Wraps a row-returning statement so non-native columns come back as text.
    fn text_projection(sql: &str, columns: &[(&str, bool)]) -> String {
        if columns.iter().all(|(_, native)| *native) {
            return sql.to_string();
        }
        let projection = columns
            .iter()
            .map(|(name, native)| {
                let quoted = quote_ident(name);
                if *native {
                    quoted
                } else {
                    format!("{quoted}::text AS {quoted}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let inner = sql.trim_end().trim_end_matches(';');
        format!("WITH bridged AS ({inner}) SELECT {projection} FROM bridged")
    }

    /// Converts a value to the concrete Rust type the server expects.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn to_param(value: &Value, ty: &Type) -> DriverResult<Param> {
        let param: Param = match (value, ty) {
            (Value::Null, &Type::INT2) => Box::new(Option::<i16>::None),
            (Value::Null, &Type::INT4) => Box::new(Option::<i32>::None),
            (Value::Null, &Type::INT8) => Box::new(Option::<i64>::None),
            (Value::Null, &Type::BOOL) => Box::new(Option::<bool>::None),
            (Value::Null, &Type::FLOAT4) => Box::new(Option::<f32>::None),
            (Value::Null, &Type::FLOAT8) => Box::new(Option::<f64>::None),
            (Value::Null, &Type::BYTEA) => Box::new(Option::<Vec<u8>>::None),
            (Value::Null, _) => Box::new(Option::<String>::None),
            (Value::Integer(i), &Type::INT2) => {
                Box::new(i16::try_from(*i).map_err(|_| mismatch(value, ty))?)
            },
            (Value::Integer(i), &Type::INT4) => {
                Box::new(i32::try_from(*i).map_err(|_| mismatch(value, ty))?)
            },
            (Value::Integer(i), &Type::INT8) => Box::new(*i),
            (Value::Integer(i), &Type::BOOL) => Box::new(*i != 0),
            (Value::Integer(i), &Type::FLOAT4) => Box::new(*i as f32),
            (Value::Integer(i), &Type::FLOAT8) => Box::new(*i as f64),
            (Value::Real(r), &Type::FLOAT4) => Box::new(*r as f32),
            (Value::Real(r), &Type::FLOAT8) => Box::new(*r),
            (Value::Blob(b), &Type::BYTEA) => Box::new(b.clone()),
            (Value::Text(s), &Type::INT2) => {
                Box::new(s.parse::<i16>().map_err(|_| mismatch(value, ty))?)
            },
            (Value::Text(s), &Type::INT4) => {
                Box::new(s.parse::<i32>().map_err(|_| mismatch(value, ty))?)
            },
            (Value::Text(s), &Type::INT8) => {
                Box::new(s.parse::<i64>().map_err(|_| mismatch(value, ty))?)
            },
            (
                other,
                &Type::TEXT | &Type::VARCHAR | &Type::BPCHAR | &Type::NAME | &Type::UNKNOWN,
            ) => Box::new(other.to_string()),
            _ => return Err(mismatch(value, ty)),
        };
        Ok(param)
    }

    fn row_values(row: &Row) -> DriverResult<Vec<Value>> {
        row.columns()
            .iter()
            .enumerate()
            .map(|(i, column)| column_value(row, i, column.type_()))
            .collect()
    }

    fn column_value(row: &Row, i: usize, ty: &Type) -> DriverResult<Value> {
        let value = match *ty {
            Type::INT2 => row
                .try_get::<_, Option<i16>>(i)
                .map(|v| Value::from(v.map(i64::from))),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(i)
                .map(|v| Value::from(v.map(i64::from))),
            Type::INT8 => row.try_get::<_, Option<i64>>(i).map(Value::from),
            Type::BOOL => row.try_get::<_, Option<bool>>(i).map(Value::from),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(i)
                .map(|v| Value::from(v.map(f64::from))),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(i).map(Value::from),
            Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(i).map(Value::from),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                row.try_get::<_, Option<String>>(i).map(Value::from)
            },
            _ => {
                return Err(DriverError::Statement(format!(
                    "unsupported column type {ty} at position {i}"
                )));
            },
        };
        value.map_err(|e| {
            DriverError::Statement(format!("cannot decode {ty} column at position {i}: {e}"))
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_to_param_rejects_mismatch() {
            assert!(to_param(&Value::from("abc"), &Type::INT4).is_err());
            assert!(to_param(&Value::Integer(i64::MAX), &Type::INT4).is_err());
            assert!(to_param(&Value::Integer(1), &Type::INT4).is_ok());
            assert!(to_param(&Value::Integer(1), &Type::TEXT).is_ok());
            assert!(to_param(&Value::Null, &Type::INT8).is_ok());
            assert!(to_param(&Value::from(1.5), &Type::INT4).is_err());
        }

        #[test]
        fn test_is_native() {
            assert!(is_native(&Type::INT8));
            assert!(is_native(&Type::VARCHAR));
            assert!(!is_native(&Type::NUMERIC));
            assert!(!is_native(&Type::TIMESTAMP));
            assert!(!is_native(&Type::UUID));
            assert!(!is_native(&Type::JSONB));
        }

        #[test]
        fn test_type_name_is_schema_qualified() {
            assert_eq!(type_name(&Type::NUMERIC), "\"pg_catalog\".\"numeric\"");
            assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        }

        #[test]
        fn test_cast_placeholders() {
            let casts = BTreeMap::from([(2, "numeric".to_string()), (10, "date".to_string())]);
            assert_eq!(
                cast_placeholders("SELECT * FROM t WHERE a = $1 AND b = $2", &casts),
                "SELECT * FROM t WHERE a = $1 AND b = ($2::text::numeric)"
            );
            assert_eq!(
                cast_placeholders("UPDATE t SET a = $1, d = $10 WHERE id = $11", &casts),
                "UPDATE t SET a = $1, d = ($10::text::date) WHERE id = $11"
            );
            assert_eq!(
                cast_placeholders("SELECT '$2', \"$2\" FROM t WHERE b = $2", &casts),
                "SELECT '$2', \"$2\" FROM t WHERE b = ($2::text::numeric)"
            );
            assert_eq!(cast_placeholders("SELECT $2", &BTreeMap::new()), "SELECT $2");
        }

        #[test]
        fn test_text_projection() {
            let sql = "INSERT INTO t (price) VALUES ($1) RETURNING id";
            assert_eq!(text_projection(sql, &[("id", true)]), sql);
            assert_eq!(
                text_projection("SELECT * FROM t;", &[("id", true), ("price", false)]),
                "WITH bridged AS (SELECT * FROM t) SELECT \"id\", \"price\"::text AS \"price\" FROM bridged"
            );
        }

        #[test]
        fn test_connect_refused_is_connect_error() {
            let params = ConnectParams {
                host: "127.0.0.1".to_string(),
                port: 1,
                connect_timeout: std::time::Duration::from_millis(200),
                ..ConnectParams::new("recstore")
            };
            let err = PostgresDriver::new().connect(&params).err();
            assert!(matches!(err, Some(DriverError::Connect(_))));
        }
    }
}

#[cfg(feature = "postgres")]
pub use implementation::PostgresDriver;

#[cfg(not(feature = "postgres"))]
mod stub {
    use super::super::{Driver, DriverError, DriverResult, Session};
    use crate::storage::connection::ConnectParams;
    use crate::storage::query::Dialect;

    /// Stub PostgreSQL driver when the feature is not enabled.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct PostgresDriver;

    impl PostgresDriver {
        /// Creates the driver (stub).
        #[must_use]
        pub const fn new() -> Self {
            Self
        }
    }

    impl Driver for PostgresDriver {
        fn name(&self) -> &'static str {
            "postgres"
        }

        fn dialect(&self) -> Dialect {
            Dialect::Postgres
        }

        fn connect(&self, _params: &ConnectParams) -> DriverResult<Box<dyn Session>> {
            Err(DriverError::Connect(
                "PostgreSQL support requires the 'postgres' feature".to_string(),
            ))
        }
    }
}

#[cfg(not(feature = "postgres"))]
pub use stub::PostgresDriver;

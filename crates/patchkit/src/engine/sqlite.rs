//! `SQLite`-backed engine implementation over `rusqlite`.
//!
//! The connection is held behind `Arc<Mutex<_>>` and every operation is a
//! short synchronous call made inside the returned future. `SQLite` work is
//! fast enough that this keeps the adapter simple; statements expected to
//! run for long periods should live behind an engine that makes them
//! cancellable, since timeouts cannot interrupt a call that is already
//! inside `SQLite`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

use super::{BoxFuture, Engine, EngineError};
use crate::model::{SqlArg, SqlScalar};

/// An [`Engine`] over one `rusqlite` connection.
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEngine {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sqlite`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database, useful for tests.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Sqlite`] when the database cannot be created.
    pub fn in_memory() -> Result<Self, EngineError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wraps an existing connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Wraps a connection that the caller keeps shared access to.
    #[must_use]
    pub const fn from_shared(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, EngineError> {
        self.conn.lock().map_err(|_| EngineError::ConnectionPoisoned)
    }

    fn bind_values(args: &[SqlArg]) -> Vec<Value> {
        args.iter()
            .map(|arg| match arg {
                SqlArg::Null => Value::Null,
                SqlArg::Int64(value) => Value::Integer(*value),
                SqlArg::Real(value) => Value::Real(*value),
                SqlArg::Text(value) => Value::Text(value.clone()),
                SqlArg::Blob(bytes) => Value::Blob(bytes.clone()),
            })
            .collect()
    }

    fn scalar_from(value: Value) -> SqlScalar {
        match value {
            Value::Null => SqlScalar::Null,
            Value::Integer(v) => SqlScalar::Int64(v),
            Value::Real(v) => SqlScalar::Real(v),
            Value::Text(v) => SqlScalar::Text(v),
            Value::Blob(v) => SqlScalar::Blob(v),
        }
    }

    fn query_scalar_sync(&self, sql: &str, args: &[SqlArg]) -> Result<SqlScalar, EngineError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(Self::bind_values(args)))?;
        match rows.next()? {
            Some(row) => Ok(Self::scalar_from(row.get::<_, Value>(0)?)),
            None => Ok(SqlScalar::Null),
        }
    }

    fn execute_sync(&self, sql: &str, args: &[SqlArg]) -> Result<i32, EngineError> {
        let conn = self.lock()?;
        let changes = conn.execute(sql, params_from_iter(Self::bind_values(args)))?;
        Ok(i32::try_from(changes).unwrap_or(i32::MAX))
    }

    fn batch_sync(&self, sql: &str) -> Result<(), EngineError> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Engine for SqliteEngine {
    fn query_scalar<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [SqlArg],
    ) -> BoxFuture<'a, Result<SqlScalar, EngineError>> {
        Box::pin(async move { self.query_scalar_sync(sql, args) })
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [SqlArg],
    ) -> BoxFuture<'a, Result<i32, EngineError>> {
        Box::pin(async move { self.execute_sync(sql, args) })
    }

    fn begin(&self, immediate: bool) -> BoxFuture<'_, Result<(), EngineError>> {
        let sql = if immediate { "BEGIN IMMEDIATE" } else { "BEGIN" };
        Box::pin(async move { self.batch_sync(sql) })
    }

    fn commit(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move { self.batch_sync("COMMIT") })
    }

    fn rollback(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move { self.batch_sync("ROLLBACK") })
    }
}

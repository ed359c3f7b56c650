//! Shared fixtures for the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchkit::engine::{BoxFuture, Engine, EngineError, SqliteEngine};
use patchkit::model::{SqlArg, SqlScalar};
use patchkit::{PatchKit, PatchKitConfig};
use rusqlite::Connection;

/// Opens an in-memory database seeded with the canonical `users` fixture:
/// `(1,'Alice',0)` and `(2,'Bob',0)`.
pub fn seeded_users_conn() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    seed_users(&conn);
    Arc::new(Mutex::new(conn))
}

pub fn seed_users(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, active INTEGER);
         INSERT INTO users (id, name, active) VALUES (1, 'Alice', 0), (2, 'Bob', 0);",
    )
    .unwrap();
}

/// Builds a kit with a single target `main` over the given engine.
pub fn kit_for_engine(engine: Arc<dyn Engine>, config: PatchKitConfig) -> PatchKit {
    let provider = move || -> Result<Arc<dyn Engine>, EngineError> { Ok(Arc::clone(&engine)) };
    PatchKit::builder()
        .target("main", Arc::new(provider))
        .config(config)
        .build()
}

/// Builds a kit whose target `main` shares the given connection.
pub fn kit_for_conn(conn: Arc<Mutex<Connection>>, config: PatchKitConfig) -> PatchKit {
    kit_for_engine(Arc::new(SqliteEngine::from_shared(conn)), config)
}

/// Reads a single scalar from the shared connection for assertions.
pub fn query_i64(conn: &Arc<Mutex<Connection>>, sql: &str) -> i64 {
    let guard = conn.lock().unwrap();
    guard.query_row(sql, [], |row| row.get(0)).unwrap()
}

/// An engine that sleeps before every `execute`, for timeout scenarios.
pub struct SlowEngine {
    pub inner: SqliteEngine,
    pub delay: Duration,
}

impl Engine for SlowEngine {
    fn query_scalar<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [SqlArg],
    ) -> BoxFuture<'a, Result<SqlScalar, EngineError>> {
        self.inner.query_scalar(sql, args)
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [SqlArg],
    ) -> BoxFuture<'a, Result<i32, EngineError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.execute(sql, args).await
        })
    }

    fn begin(&self, immediate: bool) -> BoxFuture<'_, Result<(), EngineError>> {
        self.inner.begin(immediate)
    }

    fn commit(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        self.inner.commit()
    }

    fn rollback(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        self.inner.rollback()
    }
}

/// An engine that counts `execute` calls, for never-called assertions.
pub struct CountingEngine {
    pub inner: SqliteEngine,
    pub executes: Arc<AtomicUsize>,
}

impl Engine for CountingEngine {
    fn query_scalar<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [SqlArg],
    ) -> BoxFuture<'a, Result<SqlScalar, EngineError>> {
        self.inner.query_scalar(sql, args)
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [SqlArg],
    ) -> BoxFuture<'a, Result<i32, EngineError>> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(sql, args)
    }

    fn begin(&self, immediate: bool) -> BoxFuture<'_, Result<(), EngineError>> {
        self.inner.begin(immediate)
    }

    fn commit(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        self.inner.commit()
    }

    fn rollback(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        self.inner.rollback()
    }
}

/// The canonical activation patch from the scenario suite.
pub fn activate_users_patch() -> String {
    r#"{
        "version": 1,
        "id": "activate-users-1",
        "target": "main",
        "description": "activate Alice and rename Bob",
        "preconditions": [
            {"sql": "SELECT COUNT(*) FROM users", "expected": 2}
        ],
        "actions": [
            {
                "type": "ParameterizedSqlAction",
                "sql": "UPDATE users SET active = ? WHERE id = ?",
                "parameters": [{"type": "Int64", "v": 1}, {"type": "Int64", "v": 1}]
            },
            {
                "type": "SqlAction",
                "sql": "UPDATE users SET name = 'Bobby' WHERE id = 2"
            }
        ],
        "postconditions": [
            {"sql": "SELECT COUNT(*) FROM users WHERE active = 1", "expected": 1},
            {"sql": "SELECT COUNT(*) FROM users WHERE name = 'Bobby'", "expected": 1}
        ]
    }"#
    .to_string()
}

//! The engine abstraction isolating SQLite specifics.
//!
//! An [`Engine`] exposes exactly what the executor and the idempotency
//! ledger need: a scalar query, a single-statement execute returning the
//! change count, and raw transaction controls. The higher-order scope
//! [`in_transaction`] wraps the controls so rollback runs on any early exit
//! of the block.
//!
//! # Async Pattern
//!
//! All trait methods return [`BoxFuture`] to support async execution while
//! maintaining object safety. Engine operations are the library's
//! suspension points: timeouts are enforced around them, so engines whose
//! calls may block for long periods must wrap those calls in cancellable
//! scopes for the timeouts to be effective.
//!
//! # Contract
//!
//! - `query_scalar` returns the first column of the first row, or
//!   [`SqlScalar::Null`] when the statement yields no rows.
//! - `execute` runs one statement and returns SQLite `changes()` for it.
//! - Transactions are **not reentrant**: a begin while a transaction is
//!   open is a caller bug and surfaces as an engine error.
//! - An engine instance must be exclusively owned by one in-flight apply
//!   from its first operation to the final ledger write.

pub mod sqlite;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::warn;

use crate::model::{SqlArg, SqlScalar};

pub use sqlite::SqliteEngine;

/// A boxed future for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Registry mapping a target alias to the provider that produces its
/// engine. Providers stay cold until the first apply for their target.
pub type EngineRegistry = HashMap<String, Arc<dyn EngineProvider>>;

/// Errors raised by engine operations and engine resolution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The connection mutex was poisoned by a panic elsewhere.
    #[error("connection lock poisoned")]
    ConnectionPoisoned,

    /// No provider is registered under the requested target alias.
    #[error("no engine registered for target {target:?}")]
    UnknownTarget {
        /// The alias that failed to resolve.
        target: String,
    },

    /// A provider failed to produce an engine.
    #[error("engine provider failed: {message}")]
    Provider {
        /// What went wrong.
        message: String,
    },
}

impl EngineError {
    /// Stable kind name recorded in `detail.exception` of failure events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTarget { .. } => "UnknownTarget",
            Self::Sqlite(_) | Self::ConnectionPoisoned | Self::Provider { .. } => "EngineError",
        }
    }
}

/// Scalar query, DML execute, and transaction controls over one database.
///
/// Object-safe: usable as `Arc<dyn Engine>`.
pub trait Engine: Send + Sync {
    /// Runs a query and returns the first column of the first row, or
    /// [`SqlScalar::Null`] when the statement yields no rows.
    fn query_scalar<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [SqlArg],
    ) -> BoxFuture<'a, Result<SqlScalar, EngineError>>;

    /// Runs a single DML/DDL statement and returns SQLite `changes()`.
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [SqlArg],
    ) -> BoxFuture<'a, Result<i32, EngineError>>;

    /// Opens a transaction: `BEGIN IMMEDIATE` when `immediate`, deferred
    /// `BEGIN` otherwise.
    fn begin(&self, immediate: bool) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Commits the open transaction.
    fn commit(&self) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Rolls back the open transaction.
    fn rollback(&self) -> BoxFuture<'_, Result<(), EngineError>>;
}

/// Runs `block` inside a transaction on `engine`.
///
/// Commits when the block resolves to `Ok`; rolls back and propagates the
/// error on any `Err`. The block future should be built over the same
/// engine reference so its queries run inside the scope.
///
/// Not reentrant: do not call this from within an open transaction.
///
/// # Errors
///
/// Returns the block's error after rolling back, or the engine's error if
/// begin/commit themselves fail.
pub async fn in_transaction<T, E, F>(
    engine: &dyn Engine,
    immediate: bool,
    block: F,
) -> Result<T, E>
where
    E: From<EngineError>,
    F: Future<Output = Result<T, E>>,
{
    engine.begin(immediate).await?;
    match block.await {
        Ok(value) => {
            engine.commit().await?;
            Ok(value)
        },
        Err(err) => {
            if let Err(rollback_err) = engine.rollback().await {
                warn!(error = %rollback_err, "rollback failed after aborted transaction");
            }
            Err(err)
        },
    }
}

/// A zero-argument factory producing the engine for one target.
///
/// Providers are invoked on demand — the first apply for a target — and
/// may return a cached engine on subsequent calls.
pub trait EngineProvider: Send + Sync {
    /// Produces (or returns the cached) engine for this target.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine cannot be produced, e.g. the
    /// database file cannot be opened.
    fn provide(&self) -> Result<Arc<dyn Engine>, EngineError>;
}

impl<F> EngineProvider for F
where
    F: Fn() -> Result<Arc<dyn Engine>, EngineError> + Send + Sync,
{
    fn provide(&self) -> Result<Arc<dyn Engine>, EngineError> {
        self()
    }
}

/// A provider that memoizes the first successfully produced engine.
///
/// The factory stays cold until the first apply for the target; later
/// applies reuse the same engine instance.
pub struct CachedProvider {
    factory: Box<dyn Fn() -> Result<Arc<dyn Engine>, EngineError> + Send + Sync>,
    cached: OnceLock<Arc<dyn Engine>>,
}

impl CachedProvider {
    /// Wraps a factory in a memoizing provider.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Engine>, EngineError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            cached: OnceLock::new(),
        }
    }
}

impl EngineProvider for CachedProvider {
    fn provide(&self) -> Result<Arc<dyn Engine>, EngineError> {
        if let Some(engine) = self.cached.get() {
            return Ok(Arc::clone(engine));
        }
        let engine = (self.factory)()?;
        // A racing provide() may have won; get_or_init returns the winner.
        Ok(Arc::clone(self.cached.get_or_init(|| engine)))
    }
}

impl std::fmt::Debug for CachedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedProvider")
            .field("cached", &self.cached.get().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    // The trait must stay object-safe.
    fn _assert_object_safety(_: &dyn Engine) {}

    #[tokio::test]
    async fn in_transaction_commits_on_ok() {
        let engine = SqliteEngine::in_memory().unwrap();
        engine
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, x INTEGER)", &[])
            .await
            .unwrap();

        let rows: Result<i32, EngineError> = in_transaction(&engine, true, async {
            engine
                .execute("INSERT INTO t (x) VALUES (?)", &[SqlArg::Int64(1)])
                .await
        })
        .await;
        assert_eq!(rows.unwrap(), 1);

        let count = engine
            .query_scalar("SELECT COUNT(*) FROM t", &[])
            .await
            .unwrap();
        assert_eq!(count.as_long(), 1);
    }

    #[tokio::test]
    async fn in_transaction_rolls_back_on_err() {
        let engine = SqliteEngine::in_memory().unwrap();
        engine
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, x INTEGER)", &[])
            .await
            .unwrap();

        let result: Result<(), EngineError> = in_transaction(&engine, true, async {
            engine
                .execute("INSERT INTO t (x) VALUES (?)", &[SqlArg::Int64(1)])
                .await?;
            // A bad statement aborts the block; the insert must not survive.
            engine.execute("INSERT INTO missing_table VALUES (1)", &[]).await?;
            Ok(())
        })
        .await;
        assert!(result.is_err());

        let count = engine
            .query_scalar("SELECT COUNT(*) FROM t", &[])
            .await
            .unwrap();
        assert_eq!(count.as_long(), 0);
    }

    #[tokio::test]
    async fn cached_provider_invokes_factory_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let provider = CachedProvider::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(SqliteEngine::in_memory()?) as Arc<dyn Engine>)
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0, "factory must stay cold");
        let first = provider.provide().unwrap();
        let second = provider.provide().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn closure_provider_via_blanket_impl() {
        let resolve =
            |provider: &dyn EngineProvider| -> Result<Arc<dyn Engine>, EngineError> {
                provider.provide()
            };
        let factory = || -> Result<Arc<dyn Engine>, EngineError> {
            Ok(Arc::new(SqliteEngine::in_memory()?))
        };
        let engine = resolve(&factory).unwrap();
        let scalar = engine.query_scalar("SELECT 41 + 1", &[]).await.unwrap();
        assert_eq!(scalar.as_long(), 42);
    }

    #[test]
    fn unknown_target_kind() {
        let err = EngineError::UnknownTarget {
            target: "reporting".to_string(),
        };
        assert_eq!(err.kind(), "UnknownTarget");
        assert!(err.to_string().contains("reporting"));
    }
}

//! The idempotency ledger: exactly-once application per patch id.
//!
//! The ledger is a table in the target database that records the ids of
//! successfully applied patches. The orchestrator consults it before
//! executing (`IDEMPOTENT_SKIP` when a row exists) and writes to it after
//! the write transaction commits.
//!
//! All ledger SQL runs through the [`Engine`], outside the mutating
//! transaction and outside the validator chain — the DML-only policy never
//! sees the ledger's DDL.

use std::sync::Arc;
use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::engine::{BoxFuture, Engine, EngineError};
use crate::model::SqlArg;

/// Default name of the applied-patches table.
pub const DEFAULT_LEDGER_TABLE: &str = "_patchkit_applied";

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The underlying engine operation failed.
    #[error("ledger operation failed: {0}")]
    Engine(#[from] EngineError),

    /// The configured table name is not a plain identifier.
    ///
    /// The name is interpolated into ledger SQL, so anything beyond
    /// `[A-Za-z_][A-Za-z0-9_]*` is rejected.
    #[error("invalid ledger table name {name:?}")]
    InvalidTableName {
        /// The rejected name.
        name: String,
    },
}

impl LedgerError {
    /// Stable kind name recorded in `detail.exception` of failure events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Engine(_) | Self::InvalidTableName { .. } => "LedgerError",
        }
    }
}

/// Persistent record of applied patch ids.
///
/// Object-safe so embedders can substitute their own store. A row for a
/// patch id must exist iff a run previously reported `PATCH_SUCCESS`; see
/// `record_application` for the one documented exception.
pub trait IdempotencyLedger: Send + Sync {
    /// Creates the ledger table and index if they do not exist.
    ///
    /// Runs outside the mutating transaction and is safe to call on every
    /// apply.
    fn initialize<'a>(&'a self, engine: &'a dyn Engine) -> BoxFuture<'a, Result<(), LedgerError>>;

    /// Whether `patch_id` has already been applied.
    fn has_been_applied<'a>(
        &'a self,
        patch_id: &'a str,
        engine: &'a dyn Engine,
    ) -> BoxFuture<'a, Result<bool, LedgerError>>;

    /// Records `patch_id` as applied.
    ///
    /// Called after the write transaction commits. A failure here leaves
    /// the mutations in place but the ledger unwritten, so the patch will
    /// re-apply on the next invocation; the orchestrator surfaces the
    /// failure as a `PATCH_FAILURE` event.
    fn record_application<'a>(
        &'a self,
        patch_id: &'a str,
        engine: &'a dyn Engine,
        metadata: Option<String>,
    ) -> BoxFuture<'a, Result<(), LedgerError>>;
}

/// The default ledger: one SQLite table in the target database.
///
/// Schema: `(patch_id TEXT PRIMARY KEY, applied_at INTEGER NOT NULL,
/// metadata TEXT)` plus a unique index on `patch_id`.
pub struct SqliteAppliedLedger {
    table: String,
    clock: Arc<dyn Clock>,
}

impl SqliteAppliedLedger {
    /// Creates a ledger over the default table name.
    #[must_use]
    pub fn new() -> Self {
        Self::with_table(DEFAULT_LEDGER_TABLE)
    }

    /// Creates a ledger over a custom table name.
    ///
    /// The name is checked at first use; an invalid name surfaces as
    /// [`LedgerError::InvalidTableName`] from `initialize`.
    #[must_use]
    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source used for `applied_at` stamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The table name this ledger writes to.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn checked_table(&self) -> Result<&str, LedgerError> {
        let mut chars = self.table.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            Ok(&self.table)
        } else {
            Err(LedgerError::InvalidTableName {
                name: self.table.clone(),
            })
        }
    }
}

impl Default for SqliteAppliedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SqliteAppliedLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteAppliedLedger")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl IdempotencyLedger for SqliteAppliedLedger {
    fn initialize<'a>(&'a self, engine: &'a dyn Engine) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(async move {
            let table = self.checked_table()?;
            engine
                .execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS {table} (
                            patch_id TEXT PRIMARY KEY,
                            applied_at INTEGER NOT NULL,
                            metadata TEXT
                        )"
                    ),
                    &[],
                )
                .await?;
            engine
                .execute(
                    &format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{table}_patch_id \
                         ON {table} (patch_id)"
                    ),
                    &[],
                )
                .await?;
            debug!(table = %table, "idempotency ledger ready");
            Ok(())
        })
    }

    fn has_been_applied<'a>(
        &'a self,
        patch_id: &'a str,
        engine: &'a dyn Engine,
    ) -> BoxFuture<'a, Result<bool, LedgerError>> {
        Box::pin(async move {
            let table = self.checked_table()?;
            let count = engine
                .query_scalar(
                    &format!("SELECT COUNT(*) FROM {table} WHERE patch_id = ?"),
                    &[SqlArg::Text(patch_id.to_string())],
                )
                .await?;
            Ok(count.as_long() > 0)
        })
    }

    fn record_application<'a>(
        &'a self,
        patch_id: &'a str,
        engine: &'a dyn Engine,
        metadata: Option<String>,
    ) -> BoxFuture<'a, Result<(), LedgerError>> {
        Box::pin(async move {
            let table = self.checked_table()?;
            let applied_at = self.clock.now_ms();
            engine
                .execute(
                    &format!(
                        "INSERT INTO {table} (patch_id, applied_at, metadata) VALUES (?, ?, ?)"
                    ),
                    &[
                        SqlArg::Text(patch_id.to_string()),
                        SqlArg::Int64(applied_at),
                        metadata.map_or(SqlArg::Null, SqlArg::Text),
                    ],
                )
                .await?;
            info!(patch_id = %patch_id, applied_at, "recorded applied patch");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqliteEngine;

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let engine = SqliteEngine::in_memory().unwrap();
        let ledger = SqliteAppliedLedger::new();
        ledger.initialize(&engine).await.unwrap();
        ledger.initialize(&engine).await.unwrap();

        let count = engine
            .query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = ?",
                &[SqlArg::Text(DEFAULT_LEDGER_TABLE.to_string())],
            )
            .await
            .unwrap();
        assert_eq!(count.as_long(), 1);
    }

    #[tokio::test]
    async fn record_then_check() {
        let engine = SqliteEngine::in_memory().unwrap();
        let ledger = SqliteAppliedLedger::new();
        ledger.initialize(&engine).await.unwrap();

        assert!(!ledger.has_been_applied("p-1", &engine).await.unwrap());
        ledger
            .record_application("p-1", &engine, Some("{\"sha256\":\"abc\"}".to_string()))
            .await
            .unwrap();
        assert!(ledger.has_been_applied("p-1", &engine).await.unwrap());
        assert!(!ledger.has_been_applied("p-2", &engine).await.unwrap());

        let applied_at = engine
            .query_scalar(
                &format!("SELECT applied_at FROM {DEFAULT_LEDGER_TABLE} WHERE patch_id = ?"),
                &[SqlArg::Text("p-1".to_string())],
            )
            .await
            .unwrap();
        assert!(applied_at.as_long() > 0);
    }

    #[tokio::test]
    async fn duplicate_record_is_rejected_by_primary_key() {
        let engine = SqliteEngine::in_memory().unwrap();
        let ledger = SqliteAppliedLedger::new();
        ledger.initialize(&engine).await.unwrap();

        ledger.record_application("p-1", &engine, None).await.unwrap();
        let err = ledger.record_application("p-1", &engine, None).await.unwrap_err();
        assert_eq!(err.kind(), "LedgerError");
    }

    #[tokio::test]
    async fn custom_table_name() {
        let engine = SqliteEngine::in_memory().unwrap();
        let ledger = SqliteAppliedLedger::with_table("ops_applied");
        ledger.initialize(&engine).await.unwrap();
        ledger.record_application("p-9", &engine, None).await.unwrap();
        assert!(ledger.has_been_applied("p-9", &engine).await.unwrap());
    }

    #[tokio::test]
    async fn hostile_table_name_is_rejected() {
        let engine = SqliteEngine::in_memory().unwrap();
        for name in ["applied; DROP TABLE users", "", "1table", "a-b"] {
            let ledger = SqliteAppliedLedger::with_table(name);
            let err = ledger.initialize(&engine).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidTableName { .. }), "{name}");
        }
    }
}

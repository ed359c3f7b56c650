//! # patchkit
//!
//! An embeddable library that applies declarative, JSON-encoded patches
//! against a `SQLite` database with transactional safety, integrity
//! checks, preconditions/postconditions, and exactly-once (idempotent)
//! application.
//!
//! A patch is a bundle of parameterized SQL mutations plus numeric guard
//! queries. The library decides whether to run it, runs it atomically, and
//! emits a detailed audit timeline:
//!
//! - **Validator chain**: size/count budgets, a single-statement gate, a
//!   SHA-256 content check, and a DML-only policy — all pure, all before
//!   any database access.
//! - **Idempotency ledger**: a table in the target database recording
//!   applied patch ids; re-applying a recorded patch is a no-op skip.
//! - **Transactional executor**: preconditions, then every action inside
//!   one `BEGIN IMMEDIATE` transaction with per-action timeouts, then
//!   postconditions — with rollback on any failure in the write phase.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use patchkit::engine::{CachedProvider, SqliteEngine};
//! use patchkit::{PatchKit, PatchKitConfig};
//!
//! # async fn demo() {
//! let kit = PatchKit::builder()
//!     .target(
//!         "main",
//!         Arc::new(CachedProvider::new(|| {
//!             Ok(Arc::new(SqliteEngine::open("app.db")?) as _)
//!         })),
//!     )
//!     .config(PatchKitConfig::default())
//!     .build();
//!
//! let raw = std::fs::read("patches/activate-users-1.json").unwrap();
//! let report = kit.apply(&raw).await;
//! assert!(report.success(), "{:?}", report.events);
//! # }
//! ```
//!
//! `apply` never returns an error: every outcome — parse failure, policy
//! rejection, idempotent skip, rollback, success — is an
//! [`ExecutionReport`] with a complete event timeline.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod model;
mod orchestrator;
pub mod report;
pub mod validate;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::PatchKitConfig;
    pub use crate::engine::{CachedProvider, Engine, EngineProvider, SqliteEngine};
    pub use crate::model::{Action, Condition, Patch, SqlArg};
    pub use crate::orchestrator::{PatchKit, PatchKitBuilder};
    pub use crate::report::{EventCode, ExecutionReport};
}

/// Re-export commonly used types at the crate root.
pub use config::PatchKitConfig;
pub use orchestrator::{PatchKit, PatchKitBuilder};
pub use report::{EventCode, ExecutionEvent, ExecutionReport};

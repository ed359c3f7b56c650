//! Audit timeline records produced by a patch application.
//!
//! Every [`apply`](crate::PatchKit::apply) call yields an
//! [`ExecutionReport`]: a timestamped sequence of [`ExecutionEvent`]s plus
//! derived outcome data. The report is the complete user-visible record of
//! what happened; there is no other success channel.
//!
//! # Invariants
//!
//! - A successful report contains exactly one [`EventCode::PatchSuccess`]
//!   and no failure events.
//! - Every [`EventCode::TxBegin`] is followed by [`EventCode::TxCommit`] or
//!   by the failure events that terminated the run.
//! - `affected_rows` sums the per-action row counts on success and is 0 on
//!   any failure.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of audit event codes.
///
/// Wire form (and `Display`) is the SCREAMING_SNAKE name, e.g.
/// `PATCH_SUCCESS`. [`EventCode::TxRollback`] and
/// [`EventCode::VerificationFail`] are reserved for engine implementations
/// and external verifiers; the core never emits them (terminal failure
/// events subsume rollback, and hash verification reports through
/// [`EventCode::ValidationFail`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCode {
    /// A validator rejected the patch before execution.
    ValidationFail,
    /// Reserved for external content verifiers.
    VerificationFail,
    /// The patch id was already recorded as applied; nothing ran.
    IdempotentSkip,
    /// The write transaction opened.
    TxBegin,
    /// The write transaction committed.
    TxCommit,
    /// Reserved for engines that surface rollbacks explicitly.
    TxRollback,
    /// Precondition phase entered.
    PrecheckStart,
    /// A precondition held.
    PrecheckOk,
    /// A precondition did not hold.
    PrecheckFail,
    /// An action is about to execute.
    ActionStart,
    /// An action executed; `detail.rows` carries its change count.
    ActionOk,
    /// An action failed or timed out; `detail.exception` names the kind.
    ActionFail,
    /// Postcondition phase entered.
    PostcheckStart,
    /// A postcondition held.
    PostcheckOk,
    /// A postcondition did not hold.
    PostcheckFail,
    /// Terminal: the patch applied fully.
    PatchSuccess,
    /// Terminal: the run failed; `detail.exception` names the kind.
    PatchFailure,
}

impl EventCode {
    /// The wire name of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFail => "VALIDATION_FAIL",
            Self::VerificationFail => "VERIFICATION_FAIL",
            Self::IdempotentSkip => "IDEMPOTENT_SKIP",
            Self::TxBegin => "TX_BEGIN",
            Self::TxCommit => "TX_COMMIT",
            Self::TxRollback => "TX_ROLLBACK",
            Self::PrecheckStart => "PRECHECK_START",
            Self::PrecheckOk => "PRECHECK_OK",
            Self::PrecheckFail => "PRECHECK_FAIL",
            Self::ActionStart => "ACTION_START",
            Self::ActionOk => "ACTION_OK",
            Self::ActionFail => "ACTION_FAIL",
            Self::PostcheckStart => "POSTCHECK_START",
            Self::PostcheckOk => "POSTCHECK_OK",
            Self::PostcheckFail => "POSTCHECK_FAIL",
            Self::PatchSuccess => "PATCH_SUCCESS",
            Self::PatchFailure => "PATCH_FAILURE",
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped entry in the audit timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Epoch milliseconds from the injected clock.
    pub ts: i64,
    /// What happened.
    pub code: EventCode,
    /// Human-readable summary.
    pub message: String,
    /// Structured context (`actual`, `expected`, `operator`, `rows`,
    /// `exception`, `code`). Ordered map for deterministic serialization.
    #[serde(default)]
    pub detail: BTreeMap<String, String>,
}

impl ExecutionEvent {
    /// Creates an event with an empty detail map.
    #[must_use]
    pub fn new(ts: i64, code: EventCode, message: impl Into<String>) -> Self {
        Self {
            ts,
            code,
            message: message.into(),
            detail: BTreeMap::new(),
        }
    }

    /// Adds one detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

/// The aggregate outcome of one `apply` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Id of the patch, or `"unknown"` when parsing never produced one.
    pub patch_id: String,
    /// The full audit timeline, in emission order.
    pub events: Vec<ExecutionEvent>,
    /// Epoch millis when `apply` started.
    pub start_time: i64,
    /// Epoch millis when the report was sealed.
    pub end_time: i64,
    /// Sum of `changes()` across successful actions; 0 on failure.
    pub affected_rows: i32,
}

impl ExecutionReport {
    /// The binary verdict: did the run emit [`EventCode::PatchSuccess`]?
    #[must_use]
    pub fn success(&self) -> bool {
        self.contains(EventCode::PatchSuccess)
    }

    /// Wall-clock duration of the run.
    #[must_use]
    pub const fn duration_ms(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// Whether the timeline contains an event with the given code.
    #[must_use]
    pub fn contains(&self, code: EventCode) -> bool {
        self.events.iter().any(|e| e.code == code)
    }

    /// All events with the given code, in timeline order.
    pub fn events_with(&self, code: EventCode) -> impl Iterator<Item = &ExecutionEvent> {
        self.events.iter().filter(move |e| e.code == code)
    }
}

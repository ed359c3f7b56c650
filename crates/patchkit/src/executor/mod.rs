//! The transactional executor.
//!
//! Drives exactly one patch against exactly one engine under an overall
//! deadline, emitting the audit timeline as it goes:
//!
//! ```text
//! PRECHECK   [PRECHECK_START, PRECHECK_OK*/PRECHECK_FAIL]
//!   -> WRITE_TX   [TX_BEGIN, (ACTION_START, ACTION_OK/ACTION_FAIL)*, TX_COMMIT]
//!   -> POSTCHECK  [POSTCHECK_START, POSTCHECK_OK*/POSTCHECK_FAIL]
//!   -> DONE       [PATCH_SUCCESS]
//! ```
//!
//! Preconditions, actions, and postconditions run strictly in input order;
//! the first failure short-circuits its phase, rolls back the write
//! transaction if one is open, and terminates the run with a single
//! `PATCH_FAILURE` event whose `detail.exception` names the error kind.
//!
//! Postconditions evaluate after the commit: a postcondition failure is an
//! alarm, not a gate — committed changes remain and the failure is
//! reported.
//!
//! # Timeouts
//!
//! Every engine operation is awaited under `tokio::time::timeout`. Actions
//! are bounded by the per-action budget (clamped to the remaining total
//! budget); check queries are bounded by the remaining total budget. A
//! timeout inside an action surfaces as `ACTION_FAIL` and rolls the write
//! transaction back; a timeout elsewhere terminates the run directly.


use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::PatchKitConfig;
use crate::engine::{Engine, EngineError};
use crate::model::{ComparisonOperator, Condition, Patch};
use crate::report::{EventCode, ExecutionEvent, ExecutionReport};

/// Failure modes of one execution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecError {
    /// A precondition did not hold.
    #[error("precondition failed: {label}: expected {operator} {expected}, observed {actual}")]
    Precondition {
        /// Condition label.
        label: String,
        /// Observed value.
        actual: i64,
        /// Expected value.
        expected: i64,
        /// Comparison applied.
        operator: ComparisonOperator,
    },

    /// A postcondition did not hold (after the commit).
    #[error("postcondition failed: {label}: expected {operator} {expected}, observed {actual}")]
    Postcondition {
        /// Condition label.
        label: String,
        /// Observed value.
        actual: i64,
        /// Expected value.
        expected: i64,
        /// Comparison applied.
        operator: ComparisonOperator,
    },

    /// An action's statement failed.
    #[error("action failed: {label}: {message}")]
    Action {
        /// Action label.
        label: String,
        /// Engine error text.
        message: String,
    },

    /// An action exceeded its time budget.
    #[error("action timed out: {label} exceeded {timeout_ms} ms")]
    ActionTimeout {
        /// Action label.
        label: String,
        /// Budget that was exceeded.
        timeout_ms: u64,
    },

    /// The total time budget ran out outside an action.
    #[error("execution timed out after {timeout_ms} ms")]
    Timeout {
        /// The whole-run budget.
        timeout_ms: u64,
    },

    /// An engine operation failed outside an action.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ExecError {
    /// Stable kind name recorded in `detail.exception` of failure events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Precondition { .. } => "PreconditionFailed",
            Self::Postcondition { .. } => "PostconditionFailed",
            Self::Action { .. } => "ActionFailed",
            Self::ActionTimeout { .. } | Self::Timeout { .. } => "TimeoutExceeded",
            Self::Engine(err) => err.kind(),
        }
    }
}

/// Which check phase is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckPhase {
    Pre,
    Post,
}

impl CheckPhase {
    const fn start_code(self) -> EventCode {
        match self {
            Self::Pre => EventCode::PrecheckStart,
            Self::Post => EventCode::PostcheckStart,
        }
    }

    const fn ok_code(self) -> EventCode {
        match self {
            Self::Pre => EventCode::PrecheckOk,
            Self::Post => EventCode::PostcheckOk,
        }
    }

    const fn fail_code(self) -> EventCode {
        match self {
            Self::Pre => EventCode::PrecheckFail,
            Self::Post => EventCode::PostcheckFail,
        }
    }

    const fn noun(self) -> &'static str {
        match self {
            Self::Pre => "precondition",
            Self::Post => "postcondition",
        }
    }

    fn violation(
        self,
        label: String,
        actual: i64,
        expected: i64,
        operator: ComparisonOperator,
    ) -> ExecError {
        match self {
            Self::Pre => ExecError::Precondition {
                label,
                actual,
                expected,
                operator,
            },
            Self::Post => ExecError::Postcondition {
                label,
                actual,
                expected,
                operator,
            },
        }
    }
}

/// Runs one patch against one engine.
///
/// The engine must be exclusively owned by this execution from the first
/// operation until the report is sealed.
pub struct Executor<'a> {
    engine: &'a dyn Engine,
    clock: &'a dyn Clock,
    config: &'a PatchKitConfig,
}

impl<'a> Executor<'a> {
    /// Creates an executor over borrowed collaborators.
    #[must_use]
    pub const fn new(
        engine: &'a dyn Engine,
        clock: &'a dyn Clock,
        config: &'a PatchKitConfig,
    ) -> Self {
        Self {
            engine,
            clock,
            config,
        }
    }

    /// Runs the patch and returns the sealed report.
    ///
    /// `start_time` is the orchestrator's epoch-millis stamp from before
    /// parsing, so the report covers the whole apply call.
    pub async fn run(&self, patch: &Patch, start_time: i64) -> ExecutionReport {
        let mut events = Vec::new();
        let deadline = Instant::now() + self.config.total_timeout();

        let affected_rows = match self.drive(patch, deadline, &mut events).await {
            Ok(total) => {
                debug!(patch_id = %patch.id, rows = total, "patch applied");
                events.push(
                    self.event(EventCode::PatchSuccess, format!("patch {} applied", patch.id))
                        .with_detail("rows", total.to_string()),
                );
                total
            },
            Err(err) => {
                warn!(patch_id = %patch.id, error = %err, "patch application failed");
                events.push(
                    self.event(EventCode::PatchFailure, err.to_string())
                        .with_detail("exception", err.kind()),
                );
                0
            },
        };

        ExecutionReport {
            patch_id: patch.id.clone(),
            events,
            start_time,
            end_time: self.clock.now_ms(),
            affected_rows,
        }
    }

    async fn drive(
        &self,
        patch: &Patch,
        deadline: Instant,
        events: &mut Vec<ExecutionEvent>,
    ) -> Result<i32, ExecError> {
        self.run_checks(CheckPhase::Pre, &patch.preconditions, deadline, events)
            .await?;
        let total = self.write_phase(patch, deadline, events).await?;
        self.run_checks(CheckPhase::Post, &patch.postconditions, deadline, events)
            .await?;
        Ok(total)
    }

    /// The write phase: `BEGIN IMMEDIATE`, every action in order, commit.
    /// Any failure rolls back before propagating.
    async fn write_phase(
        &self,
        patch: &Patch,
        deadline: Instant,
        events: &mut Vec<ExecutionEvent>,
    ) -> Result<i32, ExecError> {
        self.engine.begin(true).await?;
        events.push(self.event(EventCode::TxBegin, "write transaction opened"));

        match self.run_actions(patch, deadline, events).await {
            Ok(total) => match self.engine.commit().await {
                Ok(()) => {
                    events.push(self.event(EventCode::TxCommit, "write transaction committed"));
                    Ok(total)
                },
                Err(err) => {
                    self.rollback_best_effort().await;
                    Err(err.into())
                },
            },
            Err(err) => {
                self.rollback_best_effort().await;
                Err(err)
            },
        }
    }

    async fn run_actions(
        &self,
        patch: &Patch,
        deadline: Instant,
        events: &mut Vec<ExecutionEvent>,
    ) -> Result<i32, ExecError> {
        let mut total: i32 = 0;
        for action in &patch.actions {
            let label = action.label();
            events.push(self.event(EventCode::ActionStart, label.clone()));

            let budget = self.config.per_action_timeout().min(self.remaining(deadline)?);
            let outcome =
                tokio::time::timeout(budget, self.engine.execute(action.sql(), action.parameters()))
                    .await;
            match outcome {
                Ok(Ok(rows)) => {
                    total = total.saturating_add(rows);
                    events.push(
                        self.event(EventCode::ActionOk, label)
                            .with_detail("rows", rows.to_string()),
                    );
                },
                Ok(Err(engine_err)) => {
                    let err = ExecError::Action {
                        label: label.clone(),
                        message: engine_err.to_string(),
                    };
                    events.push(
                        self.event(EventCode::ActionFail, err.to_string())
                            .with_detail("exception", err.kind()),
                    );
                    return Err(err);
                },
                Err(_elapsed) => {
                    let err = ExecError::ActionTimeout {
                        label: label.clone(),
                        timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                    };
                    events.push(
                        self.event(EventCode::ActionFail, err.to_string())
                            .with_detail("exception", err.kind()),
                    );
                    return Err(err);
                },
            }
        }
        Ok(total)
    }

    /// Runs one check phase, optionally inside a deferred read transaction.
    async fn run_checks(
        &self,
        phase: CheckPhase,
        conditions: &[Condition],
        deadline: Instant,
        events: &mut Vec<ExecutionEvent>,
    ) -> Result<(), ExecError> {
        events.push(self.event(
            phase.start_code(),
            format!("evaluating {} {}(s)", conditions.len(), phase.noun()),
        ));

        if !self.config.checks_in_read_tx {
            return self.eval_conditions(phase, conditions, deadline, events).await;
        }

        self.engine.begin(false).await?;
        let result = self.eval_conditions(phase, conditions, deadline, events).await;
        match &result {
            Ok(()) => self.engine.commit().await?,
            Err(_) => self.rollback_best_effort().await,
        }
        result
    }

    async fn eval_conditions(
        &self,
        phase: CheckPhase,
        conditions: &[Condition],
        deadline: Instant,
        events: &mut Vec<ExecutionEvent>,
    ) -> Result<(), ExecError> {
        for condition in conditions {
            let remaining = self.remaining(deadline)?;
            let scalar =
                match tokio::time::timeout(remaining, self.engine.query_scalar(&condition.sql, &[]))
                    .await
                {
                    Ok(Ok(scalar)) => scalar,
                    Ok(Err(engine_err)) => return Err(engine_err.into()),
                    Err(_elapsed) => {
                        return Err(ExecError::Timeout {
                            timeout_ms: self.config.total_timeout_ms,
                        });
                    },
                };

            let actual = scalar.as_long();
            if condition.operator.evaluate(actual, condition.expected) {
                events.push(
                    self.event(phase.ok_code(), condition.label().to_string())
                        .with_detail("actual", actual.to_string()),
                );
            } else {
                let err = phase.violation(
                    condition.label().to_string(),
                    actual,
                    condition.expected,
                    condition.operator,
                );
                events.push(
                    self.event(phase.fail_code(), err.to_string())
                        .with_detail("actual", actual.to_string())
                        .with_detail("expected", condition.expected.to_string())
                        .with_detail("operator", condition.operator.to_string()),
                );
                return Err(err);
            }
        }
        Ok(())
    }

    async fn rollback_best_effort(&self) {
        if let Err(err) = self.engine.rollback().await {
            warn!(error = %err, "rollback failed");
        }
    }

    fn remaining(&self, deadline: Instant) -> Result<Duration, ExecError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            Err(ExecError::Timeout {
                timeout_ms: self.config.total_timeout_ms,
            })
        } else {
            Ok(remaining)
        }
    }

    fn event(&self, code: EventCode, message: impl Into<String>) -> ExecutionEvent {
        ExecutionEvent::new(self.clock.now_ms(), code, message)
    }
}

//! The end-to-end application lifecycle.
//!
//! [`PatchKit::apply`] takes raw document bytes and returns an
//! [`ExecutionReport`] — always. The pipeline is: parse → validate →
//! resolve target → idempotency gate → execute → record. Every failure
//! along the way is converted into a report; nothing escapes as an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::PatchKitConfig;
use crate::engine::{EngineError, EngineProvider, EngineRegistry};
use crate::executor::Executor;
use crate::ledger::{IdempotencyLedger, SqliteAppliedLedger};
use crate::model::Patch;
use crate::report::{EventCode, ExecutionEvent, ExecutionReport};
use crate::validate::{Validator, build_chain, run_chain};

/// Patch id used in reports when parsing never produced one.
const UNKNOWN_PATCH_ID: &str = "unknown";

/// The patch application entry point.
///
/// Holds the target registry, the validator chain, the idempotency ledger,
/// and the clock. One `PatchKit` serves any number of sequential
/// [`apply`](Self::apply) calls; engines for a target are produced lazily
/// on its first use.
pub struct PatchKit {
    registry: EngineRegistry,
    config: PatchKitConfig,
    chain: Vec<Box<dyn Validator>>,
    ledger: Option<Arc<dyn IdempotencyLedger>>,
    clock: Arc<dyn Clock>,
}

impl PatchKit {
    /// Creates a kit with the default clock and, when the config enables
    /// idempotency, the default SQLite ledger.
    #[must_use]
    pub fn new(registry: EngineRegistry, config: PatchKitConfig) -> Self {
        Self::builder().registry(registry).config(config).build()
    }

    /// Creates a builder.
    #[must_use]
    pub fn builder() -> PatchKitBuilder {
        PatchKitBuilder::default()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &PatchKitConfig {
        &self.config
    }

    /// Applies one JSON-encoded patch document.
    ///
    /// Must be called inside a Tokio runtime (timeouts use its timer). The
    /// returned report is the complete audit record; `report.success()` is
    /// the verdict.
    pub async fn apply(&self, raw: &[u8]) -> ExecutionReport {
        let start_time = self.clock.now_ms();

        // Parse. Without an id there is no patch to speak of; the report
        // carries the placeholder id.
        let patch = match Patch::from_slice(raw) {
            Ok(patch) => patch,
            Err(err) => {
                warn!(error = %err, "patch parse failed");
                return self.failure_report(
                    UNKNOWN_PATCH_ID,
                    start_time,
                    err.kind(),
                    err.to_string(),
                );
            },
        };
        debug!(patch_id = %patch.id, target = %patch.target, "parsed patch");

        // Validate. The report for a rejected patch is exactly one event.
        if let Some(failure) = run_chain(&self.chain, &patch, Some(raw)) {
            warn!(patch_id = %patch.id, code = %failure.code, "patch validation failed");
            let now = self.clock.now_ms();
            let event = ExecutionEvent::new(now, EventCode::ValidationFail, failure.message)
                .with_detail("code", failure.code.to_string());
            return ExecutionReport {
                patch_id: patch.id,
                events: vec![event],
                start_time,
                end_time: now,
                affected_rows: 0,
            };
        }

        // Resolve the target engine.
        let engine = match self.registry.get(&patch.target) {
            Some(provider) => match provider.provide() {
                Ok(engine) => engine,
                Err(err) => {
                    warn!(patch_id = %patch.id, target = %patch.target, error = %err, "engine provider failed");
                    return self.failure_report(&patch.id, start_time, err.kind(), err.to_string());
                },
            },
            None => {
                let err = EngineError::UnknownTarget {
                    target: patch.target.clone(),
                };
                warn!(patch_id = %patch.id, target = %patch.target, "unknown target");
                return self.failure_report(&patch.id, start_time, err.kind(), err.to_string());
            },
        };

        // Idempotency gate.
        if let Some(ledger) = &self.ledger {
            if let Err(err) = ledger.initialize(engine.as_ref()).await {
                warn!(patch_id = %patch.id, error = %err, "ledger initialization failed");
                return self.failure_report(&patch.id, start_time, err.kind(), err.to_string());
            }
            match ledger.has_been_applied(&patch.id, engine.as_ref()).await {
                Ok(true) => {
                    info!(patch_id = %patch.id, "patch already applied, skipping");
                    let now = self.clock.now_ms();
                    let event = ExecutionEvent::new(
                        now,
                        EventCode::IdempotentSkip,
                        format!("patch {} was already applied", patch.id),
                    );
                    return ExecutionReport {
                        patch_id: patch.id,
                        events: vec![event],
                        start_time,
                        end_time: now,
                        affected_rows: 0,
                    };
                },
                Ok(false) => {},
                Err(err) => {
                    warn!(patch_id = %patch.id, error = %err, "ledger lookup failed");
                    return self.failure_report(&patch.id, start_time, err.kind(), err.to_string());
                },
            }
        }

        // Execute.
        let executor = Executor::new(engine.as_ref(), self.clock.as_ref(), &self.config);
        let mut report = executor.run(&patch, start_time).await;

        // Record, outside the mutating transaction. The mutations are
        // durable at this point: a recording failure is surfaced in the
        // timeline but cannot retract the success already achieved.
        if report.success() {
            if let Some(ledger) = &self.ledger {
                let metadata = serde_json::to_string(&patch.metadata).ok();
                if let Err(err) = ledger
                    .record_application(&patch.id, engine.as_ref(), metadata)
                    .await
                {
                    warn!(patch_id = %patch.id, error = %err, "failed to record applied patch");
                    let now = self.clock.now_ms();
                    report.events.push(
                        ExecutionEvent::new(now, EventCode::PatchFailure, err.to_string())
                            .with_detail("exception", err.kind()),
                    );
                    report.end_time = now;
                }
            }
        }
        report
    }

    fn failure_report(
        &self,
        patch_id: &str,
        start_time: i64,
        kind: &str,
        message: String,
    ) -> ExecutionReport {
        let now = self.clock.now_ms();
        let event = ExecutionEvent::new(now, EventCode::PatchFailure, message)
            .with_detail("exception", kind);
        ExecutionReport {
            patch_id: patch_id.to_string(),
            events: vec![event],
            start_time,
            end_time: now,
            affected_rows: 0,
        }
    }
}

impl std::fmt::Debug for PatchKit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchKit")
            .field("targets", &self.registry.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .field("validators", &self.chain.len())
            .field("ledger", &self.ledger.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`PatchKit`].
#[derive(Default)]
pub struct PatchKitBuilder {
    registry: EngineRegistry,
    config: PatchKitConfig,
    clock: Option<Arc<dyn Clock>>,
    ledger: Option<Arc<dyn IdempotencyLedger>>,
    extra_validators: Vec<Box<dyn Validator>>,
}

impl PatchKitBuilder {
    /// Replaces the whole target registry.
    #[must_use]
    pub fn registry(mut self, registry: EngineRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers one target alias.
    #[must_use]
    pub fn target(mut self, alias: impl Into<String>, provider: Arc<dyn EngineProvider>) -> Self {
        self.registry.insert(alias.into(), provider);
        self
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: PatchKitConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the idempotency ledger (the config's `idempotency` flag is
    /// ignored when an explicit ledger is installed).
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<dyn IdempotencyLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Appends a custom validator after the standard chain.
    #[must_use]
    pub fn validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.extra_validators.push(validator);
        self
    }

    /// Builds the kit.
    #[must_use]
    pub fn build(self) -> PatchKit {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ledger = self.ledger.or_else(|| {
            self.config.idempotency.then(|| {
                Arc::new(
                    SqliteAppliedLedger::with_table(&self.config.ledger_table)
                        .with_clock(Arc::clone(&clock)),
                ) as Arc<dyn IdempotencyLedger>
            })
        });
        let mut chain = build_chain(&self.config);
        chain.extend(self.extra_validators);
        PatchKit {
            registry: self.registry,
            config: self.config,
            chain,
            ledger,
            clock,
        }
    }
}

impl std::fmt::Debug for PatchKitBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchKitBuilder")
            .field("targets", &self.registry.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

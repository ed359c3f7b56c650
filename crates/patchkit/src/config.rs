//! Library configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::DEFAULT_LEDGER_TABLE;

/// Default raw-document byte budget.
pub const DEFAULT_MAX_BYTES: usize = 512_000;

/// Default per-patch action budget.
pub const DEFAULT_MAX_ACTIONS: usize = 200;

/// Default per-action timeout in milliseconds.
pub const DEFAULT_PER_ACTION_TIMEOUT_MS: u64 = 10_000;

/// Default whole-run timeout in milliseconds.
pub const DEFAULT_TOTAL_TIMEOUT_MS: u64 = 60_000;

/// Knobs governing validation, execution, and idempotency.
///
/// The defaults are safe for production use: DDL rejected, content hashes
/// verified, idempotency ledger enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchKitConfig {
    /// Permit CREATE/DROP/ALTER/TRUNCATE actions.
    pub allow_ddl: bool,
    /// Maximum raw document size in bytes.
    pub max_bytes: usize,
    /// Maximum number of actions per patch.
    pub max_actions: usize,
    /// Upper bound for each action's execution.
    pub per_action_timeout_ms: u64,
    /// Upper bound for the whole execution (checks included).
    pub total_timeout_ms: u64,
    /// Verify `metadata.sha256` against the raw bytes when declared.
    pub verify_hash: bool,
    /// Wrap the pre/post check phases in a deferred read transaction for a
    /// snapshot-consistent view.
    pub checks_in_read_tx: bool,
    /// Gate and record patch application in the idempotency ledger.
    pub idempotency: bool,
    /// Table name used by the default idempotency ledger.
    pub ledger_table: String,
}

impl Default for PatchKitConfig {
    fn default() -> Self {
        Self {
            allow_ddl: false,
            max_bytes: DEFAULT_MAX_BYTES,
            max_actions: DEFAULT_MAX_ACTIONS,
            per_action_timeout_ms: DEFAULT_PER_ACTION_TIMEOUT_MS,
            total_timeout_ms: DEFAULT_TOTAL_TIMEOUT_MS,
            verify_hash: true,
            checks_in_read_tx: false,
            idempotency: true,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl PatchKitConfig {
    /// Creates a builder seeded with the defaults.
    #[must_use]
    pub fn builder() -> PatchKitConfigBuilder {
        PatchKitConfigBuilder::new()
    }

    /// Per-action timeout as a [`Duration`].
    #[must_use]
    pub const fn per_action_timeout(&self) -> Duration {
        Duration::from_millis(self.per_action_timeout_ms)
    }

    /// Whole-run timeout as a [`Duration`].
    #[must_use]
    pub const fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

/// Builder for [`PatchKitConfig`].
#[derive(Debug, Clone, Default)]
pub struct PatchKitConfigBuilder {
    config: PatchKitConfig,
}

impl PatchKitConfigBuilder {
    /// Creates a builder seeded with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits or rejects DDL actions.
    #[must_use]
    pub const fn allow_ddl(mut self, allow: bool) -> Self {
        self.config.allow_ddl = allow;
        self
    }

    /// Sets the raw-document byte budget.
    #[must_use]
    pub const fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.config.max_bytes = max_bytes;
        self
    }

    /// Sets the per-patch action budget.
    #[must_use]
    pub const fn max_actions(mut self, max_actions: usize) -> Self {
        self.config.max_actions = max_actions;
        self
    }

    /// Sets the per-action timeout in milliseconds.
    #[must_use]
    pub const fn per_action_timeout_ms(mut self, ms: u64) -> Self {
        self.config.per_action_timeout_ms = ms;
        self
    }

    /// Sets the whole-run timeout in milliseconds.
    #[must_use]
    pub const fn total_timeout_ms(mut self, ms: u64) -> Self {
        self.config.total_timeout_ms = ms;
        self
    }

    /// Enables or disables content-hash verification.
    #[must_use]
    pub const fn verify_hash(mut self, verify: bool) -> Self {
        self.config.verify_hash = verify;
        self
    }

    /// Wraps check phases in a deferred read transaction.
    #[must_use]
    pub const fn checks_in_read_tx(mut self, enabled: bool) -> Self {
        self.config.checks_in_read_tx = enabled;
        self
    }

    /// Enables or disables the idempotency ledger.
    #[must_use]
    pub const fn idempotency(mut self, enabled: bool) -> Self {
        self.config.idempotency = enabled;
        self
    }

    /// Overrides the ledger table name.
    #[must_use]
    pub fn ledger_table(mut self, table: impl Into<String>) -> Self {
        self.config.ledger_table = table.into();
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> PatchKitConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PatchKitConfig::default();
        assert!(!config.allow_ddl);
        assert_eq!(config.max_bytes, 512_000);
        assert_eq!(config.max_actions, 200);
        assert_eq!(config.per_action_timeout_ms, 10_000);
        assert_eq!(config.total_timeout_ms, 60_000);
        assert!(config.verify_hash);
        assert!(!config.checks_in_read_tx);
        assert!(config.idempotency);
        assert_eq!(config.ledger_table, DEFAULT_LEDGER_TABLE);
    }

    #[test]
    fn builder_overrides() {
        let config = PatchKitConfig::builder()
            .allow_ddl(true)
            .max_actions(5)
            .per_action_timeout_ms(10)
            .checks_in_read_tx(true)
            .ledger_table("applied_patches")
            .build();
        assert!(config.allow_ddl);
        assert_eq!(config.max_actions, 5);
        assert_eq!(config.per_action_timeout(), Duration::from_millis(10));
        assert!(config.checks_in_read_tx);
        assert_eq!(config.ledger_table, "applied_patches");
    }

    #[test]
    fn config_serde_round_trip_rejects_unknown_fields() {
        let config = PatchKitConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PatchKitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let tainted = json.replacen('{', "{\"strict_mode\":true,", 1);
        assert!(serde_json::from_str::<PatchKitConfig>(&tainted).is_err());
    }
}

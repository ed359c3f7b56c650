//! The patch document model and its JSON wire codec.
//!
//! A [`Patch`] is a versioned bundle of guard [`Condition`]s and SQL
//! [`Action`]s with a stable id and a target alias. Parsing is strict:
//! unknown keys anywhere in the document are rejected, `Int64` values must
//! be JSON integers, and the constructor guards (`version == 1`, non-blank
//! `id` and `target`) run before a patch reaches the validator chain.
//!
//! Serialization emits defaults rather than omitting fields, so encoded
//! documents are self-describing.

mod action;
mod value;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use action::{Action, ParameterizedSqlAction, SqlAction};
pub use value::{SqlArg, SqlScalar};

use crate::error::PatchError;

/// The only patch document version this library understands.
pub const PATCH_VERSION: i32 = 1;

/// Metadata key carrying the expected SHA-256 of the raw document bytes.
pub const METADATA_SHA256_KEY: &str = "sha256";

/// How a condition's observed value is compared against its expectation.
///
/// Wire form is the SCREAMING_SNAKE name (`GREATER_OR_EQUAL`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComparisonOperator {
    /// `actual == expected` (the default).
    #[default]
    Equals,
    /// `actual != expected`.
    NotEquals,
    /// `actual > expected`.
    GreaterThan,
    /// `actual >= expected`.
    GreaterOrEqual,
    /// `actual < expected`.
    LessThan,
    /// `actual <= expected`.
    LessOrEqual,
}

impl ComparisonOperator {
    /// Applies the comparison.
    #[must_use]
    pub const fn evaluate(self, actual: i64, expected: i64) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::NotEquals => actual != expected,
            Self::GreaterThan => actual > expected,
            Self::GreaterOrEqual => actual >= expected,
            Self::LessThan => actual < expected,
            Self::LessOrEqual => actual <= expected,
        }
    }

    /// The wire name of this operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "EQUALS",
            Self::NotEquals => "NOT_EQUALS",
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterOrEqual => "GREATER_OR_EQUAL",
            Self::LessThan => "LESS_THAN",
            Self::LessOrEqual => "LESS_OR_EQUAL",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A numeric guard query.
///
/// The query must yield a single row with a single column; its value is
/// coerced via [`SqlScalar::as_long`] and compared against `expected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    /// The guard query.
    pub sql: String,
    /// The comparison to apply. Defaults to [`ComparisonOperator::Equals`].
    #[serde(default)]
    pub operator: ComparisonOperator,
    /// The literal the observed value is compared against.
    pub expected: i64,
    /// Optional human-readable label for the audit timeline.
    #[serde(default)]
    pub description: Option<String>,
}

impl Condition {
    /// Timeline label: the description or the SQL itself.
    #[must_use]
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.sql)
    }
}

/// A versioned, JSON-encoded bundle of preconditions, SQL actions, and
/// postconditions with a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patch {
    /// Document version; must equal [`PATCH_VERSION`].
    pub version: i32,
    /// Stable identifier; uniqueness is enforced by the idempotency ledger.
    pub id: String,
    /// Alias of the target database in the engine registry.
    pub target: String,
    /// Optional human-readable summary.
    #[serde(default)]
    pub description: Option<String>,
    /// Guards evaluated before the write transaction opens.
    #[serde(default)]
    pub preconditions: Vec<Condition>,
    /// Mutations executed inside the write transaction, in order.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Guards evaluated after the write transaction commits.
    #[serde(default)]
    pub postconditions: Vec<Condition>,
    /// Free-form string metadata. The key [`METADATA_SHA256_KEY`] is
    /// recognized by the hash validator.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Patch {
    /// Decodes a patch from raw UTF-8 JSON bytes and runs the constructor
    /// guards.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError`] on malformed JSON, unknown keys, unsupported
    /// version, or blank `id`/`target`.
    pub fn from_slice(raw: &[u8]) -> Result<Self, PatchError> {
        let patch: Self = serde_json::from_slice(raw)?;
        patch.check_guards()?;
        Ok(patch)
    }

    /// Encodes the patch to wire JSON, defaults included.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError::Parse`] if serialization fails.
    pub fn to_vec(&self) -> Result<Vec<u8>, PatchError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The expected document hash from metadata, if declared.
    #[must_use]
    pub fn expected_sha256(&self) -> Option<&str> {
        self.metadata.get(METADATA_SHA256_KEY).map(String::as_str)
    }

    fn check_guards(&self) -> Result<(), PatchError> {
        if self.version != PATCH_VERSION {
            return Err(PatchError::UnsupportedVersion {
                version: self.version,
                expected: PATCH_VERSION,
            });
        }
        if self.id.trim().is_empty() {
            return Err(PatchError::BlankField { field: "id" });
        }
        if self.target.trim().is_empty() {
            return Err(PatchError::BlankField { field: "target" });
        }
        Ok(())
    }
}

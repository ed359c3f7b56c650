//! The validator chain.
//!
//! Validators are pure predicates over `(patch, raw_bytes)` — no database
//! access. The chain runs in fixed order and short-circuits on the first
//! failure; the orchestrator turns that failure into a single
//! `VALIDATION_FAIL` event.
//!
//! Built-in order: size/count → single-statement → content hash (when
//! enabled) → DML-only gate (when DDL is disallowed). Embedders can append
//! further checks through [`Validator`].

pub mod statement;

use std::fmt;

use sha2::{Digest, Sha256};

use crate::config::PatchKitConfig;
use crate::model::{METADATA_SHA256_KEY, Patch};

/// Stable failure codes, one per built-in check.
///
/// Wire form (and `Display`) is the SCREAMING_SNAKE name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    /// The raw document exceeds the configured byte budget.
    SizeExceeded,
    /// The patch carries more actions than allowed.
    TooManyActions,
    /// An action contains more than one top-level statement.
    MultiStatement,
    /// The patch declares a hash but no raw bytes were supplied.
    HashMissingBytes,
    /// The raw bytes do not hash to the declared value.
    HashMismatch,
    /// An action starts with a DDL keyword while DDL is disallowed.
    DdlNotAllowed,
}

impl ValidationCode {
    /// The wire name of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SizeExceeded => "SIZE_EXCEEDED",
            Self::TooManyActions => "TOO_MANY_ACTIONS",
            Self::MultiStatement => "MULTI_STATEMENT",
            Self::HashMissingBytes => "HASH_MISSING_BYTES",
            Self::HashMismatch => "HASH_MISMATCH",
            Self::DdlNotAllowed => "DDL_NOT_ALLOWED",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected patch: which check failed and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// The failing check's code.
    pub code: ValidationCode,
    /// Human-readable explanation.
    pub message: String,
}

/// Outcome of one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The check passed.
    Success,
    /// The check failed; the chain stops here.
    Failure(ValidationFailure),
}

impl ValidationResult {
    fn failure(code: ValidationCode, message: impl Into<String>) -> Self {
        Self::Failure(ValidationFailure {
            code,
            message: message.into(),
        })
    }
}

/// A pure check over a parsed patch and (optionally) its raw bytes.
pub trait Validator: Send + Sync {
    /// Judges the patch. Must not touch the database.
    fn validate(&self, patch: &Patch, raw: Option<&[u8]>) -> ValidationResult;
}

/// Enforces the byte and action-count budgets.
#[derive(Debug, Clone, Copy)]
pub struct SizeValidator {
    /// Maximum raw document size in bytes.
    pub max_bytes: usize,
    /// Maximum number of actions per patch.
    pub max_actions: usize,
}

impl Validator for SizeValidator {
    fn validate(&self, patch: &Patch, raw: Option<&[u8]>) -> ValidationResult {
        if let Some(bytes) = raw {
            if bytes.len() > self.max_bytes {
                return ValidationResult::failure(
                    ValidationCode::SizeExceeded,
                    format!(
                        "patch is {} bytes, limit is {}",
                        bytes.len(),
                        self.max_bytes
                    ),
                );
            }
        }
        if patch.actions.len() > self.max_actions {
            return ValidationResult::failure(
                ValidationCode::TooManyActions,
                format!(
                    "patch has {} actions, limit is {}",
                    patch.actions.len(),
                    self.max_actions
                ),
            );
        }
        ValidationResult::Success
    }
}

/// Rejects actions containing more than one top-level statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiStatementValidator;

impl Validator for MultiStatementValidator {
    fn validate(&self, patch: &Patch, _raw: Option<&[u8]>) -> ValidationResult {
        for (index, action) in patch.actions.iter().enumerate() {
            if !statement::is_single_statement(action.sql()) {
                return ValidationResult::failure(
                    ValidationCode::MultiStatement,
                    format!("action {index} contains multiple SQL statements"),
                );
            }
        }
        ValidationResult::Success
    }
}

/// Verifies the declared SHA-256 of the raw document bytes.
///
/// A patch without a declared hash always passes; verification only kicks
/// in when `metadata` carries the hash key.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashValidator;

impl Validator for HashValidator {
    fn validate(&self, patch: &Patch, raw: Option<&[u8]>) -> ValidationResult {
        let Some(expected) = patch.expected_sha256() else {
            return ValidationResult::Success;
        };
        let Some(bytes) = raw else {
            return ValidationResult::failure(
                ValidationCode::HashMissingBytes,
                format!("metadata declares {METADATA_SHA256_KEY} but no raw bytes were supplied"),
            );
        };
        let digest = hex::encode(Sha256::digest(bytes));
        if digest.eq_ignore_ascii_case(expected) {
            ValidationResult::Success
        } else {
            ValidationResult::failure(
                ValidationCode::HashMismatch,
                format!("document hash {digest} does not match declared {expected}"),
            )
        }
    }
}

/// Keywords that mark a statement as DDL.
const DDL_PREFIXES: [&str; 4] = ["CREATE", "DROP", "ALTER", "TRUNCATE"];

/// Rejects DDL statements when the policy disallows them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DmlOnlyValidator;

impl Validator for DmlOnlyValidator {
    fn validate(&self, patch: &Patch, _raw: Option<&[u8]>) -> ValidationResult {
        for (index, action) in patch.actions.iter().enumerate() {
            let head = action.sql().trim_start().to_uppercase();
            if let Some(prefix) = DDL_PREFIXES.iter().find(|p| head.starts_with(*p)) {
                return ValidationResult::failure(
                    ValidationCode::DdlNotAllowed,
                    format!("action {index} is DDL ({prefix}) and DDL is not allowed"),
                );
            }
        }
        ValidationResult::Success
    }
}

/// Builds the standard chain for a configuration.
#[must_use]
pub fn build_chain(config: &PatchKitConfig) -> Vec<Box<dyn Validator>> {
    let mut chain: Vec<Box<dyn Validator>> = vec![
        Box::new(SizeValidator {
            max_bytes: config.max_bytes,
            max_actions: config.max_actions,
        }),
        Box::new(MultiStatementValidator),
    ];
    if config.verify_hash {
        chain.push(Box::new(HashValidator));
    }
    if !config.allow_ddl {
        chain.push(Box::new(DmlOnlyValidator));
    }
    chain
}

/// Runs the chain in order, returning the first failure.
#[must_use]
pub fn run_chain(
    chain: &[Box<dyn Validator>],
    patch: &Patch,
    raw: Option<&[u8]>,
) -> Option<ValidationFailure> {
    for validator in chain {
        if let ValidationResult::Failure(failure) = validator.validate(patch, raw) {
            return Some(failure);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, SqlAction};

    fn patch_with_actions(sqls: &[&str]) -> Patch {
        let actions = sqls
            .iter()
            .map(|sql| {
                Action::SqlAction(SqlAction {
                    sql: (*sql).to_string(),
                    description: None,
                })
            })
            .collect();
        Patch {
            version: 1,
            id: "p-1".to_string(),
            target: "main".to_string(),
            description: None,
            preconditions: vec![],
            actions,
            postconditions: vec![],
            metadata: std::collections::BTreeMap::new(),
        }
    }

    fn code_of(result: ValidationResult) -> Option<ValidationCode> {
        match result {
            ValidationResult::Success => None,
            ValidationResult::Failure(failure) => Some(failure.code),
        }
    }

    #[test]
    fn size_validator_byte_boundary() {
        let validator = SizeValidator {
            max_bytes: 8,
            max_actions: 10,
        };
        let patch = patch_with_actions(&[]);
        assert_eq!(code_of(validator.validate(&patch, Some(&[0u8; 8]))), None);
        assert_eq!(
            code_of(validator.validate(&patch, Some(&[0u8; 9]))),
            Some(ValidationCode::SizeExceeded)
        );
        // Without raw bytes the byte budget cannot apply.
        assert_eq!(code_of(validator.validate(&patch, None)), None);
    }

    #[test]
    fn size_validator_action_boundary() {
        let validator = SizeValidator {
            max_bytes: 1024,
            max_actions: 2,
        };
        let at_limit = patch_with_actions(&["SELECT 1", "SELECT 2"]);
        assert_eq!(code_of(validator.validate(&at_limit, None)), None);

        let over = patch_with_actions(&["SELECT 1", "SELECT 2", "SELECT 3"]);
        assert_eq!(
            code_of(validator.validate(&over, None)),
            Some(ValidationCode::TooManyActions)
        );
    }

    #[test]
    fn multi_statement_validator_accepts_quoted_semicolons() {
        let accepted = patch_with_actions(&["UPDATE t SET note='a; b';"]);
        assert_eq!(code_of(MultiStatementValidator.validate(&accepted, None)), None);

        let rejected = patch_with_actions(&["UPDATE t SET x=1; DELETE FROM t;"]);
        assert_eq!(
            code_of(MultiStatementValidator.validate(&rejected, None)),
            Some(ValidationCode::MultiStatement)
        );
    }

    #[test]
    fn hash_validator_pass_mismatch_and_missing_bytes() {
        let raw = br#"{"k":"v"}"#;
        let digest = hex::encode(Sha256::digest(raw));

        let mut patch = patch_with_actions(&[]);
        assert_eq!(code_of(HashValidator.validate(&patch, None)), None, "no hash declared");

        patch
            .metadata
            .insert(METADATA_SHA256_KEY.to_string(), digest.clone());
        assert_eq!(code_of(HashValidator.validate(&patch, Some(raw))), None);

        // Case-insensitive comparison.
        patch
            .metadata
            .insert(METADATA_SHA256_KEY.to_string(), digest.to_uppercase());
        assert_eq!(code_of(HashValidator.validate(&patch, Some(raw))), None);

        // One wrong hex character.
        let mut wrong = digest.clone();
        let flipped = if wrong.starts_with('0') { "1" } else { "0" };
        wrong.replace_range(0..1, flipped);
        patch.metadata.insert(METADATA_SHA256_KEY.to_string(), wrong);
        assert_eq!(
            code_of(HashValidator.validate(&patch, Some(raw))),
            Some(ValidationCode::HashMismatch)
        );

        patch.metadata.insert(METADATA_SHA256_KEY.to_string(), digest);
        assert_eq!(
            code_of(HashValidator.validate(&patch, None)),
            Some(ValidationCode::HashMissingBytes)
        );
    }

    #[test]
    fn dml_only_validator_rejects_ddl_prefixes() {
        for sql in [
            "CREATE TABLE z (id INTEGER)",
            "  drop table payments",
            "\tAlTeR TABLE payments ADD COLUMN z INTEGER",
            "TRUNCATE TABLE audit",
        ] {
            let patch = patch_with_actions(&[sql]);
            assert_eq!(
                code_of(DmlOnlyValidator.validate(&patch, None)),
                Some(ValidationCode::DdlNotAllowed),
                "{sql}"
            );
        }

        let dml = patch_with_actions(&["UPDATE payments SET z = 1", "DELETE FROM audit"]);
        assert_eq!(code_of(DmlOnlyValidator.validate(&dml, None)), None);
    }

    #[test]
    fn chain_short_circuits_in_fixed_order() {
        let config = PatchKitConfig {
            max_bytes: 4,
            ..PatchKitConfig::default()
        };
        let chain = build_chain(&config);

        // Oversized *and* multi-statement: the size check fires first.
        let patch = patch_with_actions(&["UPDATE t SET x=1; DELETE FROM t"]);
        let failure = run_chain(&chain, &patch, Some(&[0u8; 100])).unwrap();
        assert_eq!(failure.code, ValidationCode::SizeExceeded);
    }

    #[test]
    fn chain_composition_follows_config() {
        let default_chain = build_chain(&PatchKitConfig::default());
        // size + multi-statement + hash + dml gate
        assert_eq!(default_chain.len(), 4);

        let permissive = PatchKitConfig {
            allow_ddl: true,
            verify_hash: false,
            ..PatchKitConfig::default()
        };
        assert_eq!(build_chain(&permissive).len(), 2);

        let ddl_patch = patch_with_actions(&["CREATE TABLE t (id INTEGER)"]);
        assert!(run_chain(&build_chain(&permissive), &ddl_patch, None).is_none());
    }
}

//! Parse-layer error types.
//!
//! Everything that can go wrong between raw bytes and a well-formed
//! [`Patch`](crate::model::Patch) lives here. These errors never escape
//! [`PatchKit::apply`](crate::PatchKit::apply); the orchestrator converts
//! them into a failure report.

use thiserror::Error;

/// Errors produced while decoding and guarding a patch document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PatchError {
    /// The raw bytes were not valid JSON, contained unknown keys, or a
    /// field had the wrong shape.
    #[error("patch decode failed: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document carried a version this library does not understand.
    #[error("unsupported patch version {version}: expected {expected}")]
    UnsupportedVersion {
        /// Version found in the document.
        version: i32,
        /// Version this library accepts.
        expected: i32,
    },

    /// A required identifier field was empty or whitespace-only.
    #[error("patch field `{field}` must not be blank")]
    BlankField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A tagged value on the wire could not be converted to its model type
    /// (bad Base64, a float where an integer is required, unknown tag).
    #[error("invalid {context}: {message}")]
    InvalidValue {
        /// Which wire construct was being decoded.
        context: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

impl PatchError {
    /// Stable kind name recorded in `detail.exception` of failure events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        // Guard violations are parse-stage failures as far as callers are
        // concerned: the document never became a usable patch.
        match self {
            Self::Parse(_)
            | Self::UnsupportedVersion { .. }
            | Self::BlankField { .. }
            | Self::InvalidValue { .. } => "ParseError",
        }
    }
}

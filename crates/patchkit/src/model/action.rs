//! SQL mutation actions.
//!
//! An action is a single SQL statement executed inside the write
//! transaction: either raw SQL or SQL with positional `?` placeholders and
//! a parameter list. On the wire actions are tagged objects, discriminator
//! field `type`, values `SqlAction` and `ParameterizedSqlAction`.

use serde::{Deserialize, Serialize};

use super::value::SqlArg;

/// Maximum number of SQL characters used when deriving an action label.
const LABEL_SNIPPET_CHARS: usize = 50;

/// One SQL statement to run inside the write transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Raw SQL, no parameters.
    SqlAction(SqlAction),
    /// SQL with positional `?` placeholders, 1-based binding.
    ParameterizedSqlAction(ParameterizedSqlAction),
}

/// Payload of [`Action::SqlAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqlAction {
    /// The statement to execute.
    pub sql: String,
    /// Optional human-readable label for the audit timeline.
    #[serde(default)]
    pub description: Option<String>,
}

/// Payload of [`Action::ParameterizedSqlAction`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterizedSqlAction {
    /// The statement to execute, with `?` placeholders.
    pub sql: String,
    /// Values bound to the placeholders in order.
    #[serde(default)]
    pub parameters: Vec<SqlArg>,
    /// Optional human-readable label for the audit timeline.
    #[serde(default)]
    pub description: Option<String>,
}

impl Action {
    /// The SQL text of this action.
    #[must_use]
    pub fn sql(&self) -> &str {
        match self {
            Self::SqlAction(action) => &action.sql,
            Self::ParameterizedSqlAction(action) => &action.sql,
        }
    }

    /// The bind parameters (empty for raw actions).
    #[must_use]
    pub fn parameters(&self) -> &[SqlArg] {
        match self {
            Self::SqlAction(_) => &[],
            Self::ParameterizedSqlAction(action) => &action.parameters,
        }
    }

    /// The optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        match self {
            Self::SqlAction(action) => action.description.as_deref(),
            Self::ParameterizedSqlAction(action) => action.description.as_deref(),
        }
    }

    /// Timeline label: the description, or the leading characters of the
    /// SQL when no description was given.
    #[must_use]
    pub fn label(&self) -> String {
        self.description().map_or_else(
            || self.sql().chars().take(LABEL_SNIPPET_CHARS).collect(),
            ToOwned::to_owned,
        )
    }
}

//! Single-statement scanner.
//!
//! A lightweight character scanner that rejects SQL containing more than
//! one top-level statement. "Top-level" means outside single-quoted and
//! double-quoted strings; a backslash escapes the character after it. One
//! trailing `;` after right-trim is permitted.
//!
//! This is deliberately not a SQL tokenizer: it does not understand SQL
//! comments (`--`, `/* */`), so a semicolon inside a comment is treated as
//! a statement separator and rejected.

/// Returns `true` when `sql` contains at most one top-level statement.
#[must_use]
pub fn is_single_statement(sql: &str) -> bool {
    let trimmed = sql.trim_end();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for (idx, ch) in trimmed.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => {
                // Only a single trailing semicolon is allowed.
                if idx + 1 != trimmed.len() {
                    return false;
                }
            },
            _ => {},
        }
    }
    true
}

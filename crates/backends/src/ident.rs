//! Identifier checks for names interpolated into DDL

use crate::error::{BackendsError, BackendsResult};

/// PostgreSQL truncates longer identifiers
const MAX_IDENTIFIER_LEN: usize = 63;

/// Accept only plain `[A-Za-z_][A-Za-z0-9_]*` identifiers
pub fn validate_identifier(identifier: &str) -> BackendsResult<()> {
    let invalid = |reason: &str| BackendsError::InvalidIdentifier {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    };

    let Some(first) = identifier.chars().next() else {
        return Err(invalid("cannot be empty"));
    };
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid("longer than 63 characters"));
    }
    if first.is_ascii_digit() {
        return Err(invalid("cannot start with a number"));
    }
    if let Some(c) = identifier
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(invalid(&format!("contains invalid character '{}'", c)));
    }
    Ok(())
}

//! Validation utilities

use crate::types::*;

/// Longest accepted company, account or category name, in characters
pub const MAX_NAME_LEN: usize = 100;

/// Longest accepted transaction description, in characters
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Validate an entity name and return it trimmed
pub fn validate_name(entity: EntityKind, name: &str) -> LedgerResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!(
            "{} name cannot be empty",
            entity
        )));
    }

    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(LedgerError::Validation(format!(
            "{} name cannot exceed {} characters",
            entity, MAX_NAME_LEN
        )));
    }

    Ok(trimmed.to_string())
}

/// Validate a transaction description; empty descriptions are allowed
pub fn validate_description(description: &str) -> LedgerResult<String> {
    let trimmed = description.trim();
    if trimmed.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(LedgerError::Validation(format!(
            "Transaction description cannot exceed {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }

    Ok(trimmed.to_string())
}

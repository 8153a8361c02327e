//! Validation utilities

use std::collections::HashSet;

use crate::types::*;

/// Validate that a column name is usable
pub fn validate_column_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Column name cannot be empty".to_string());
    }

    if name.len() > 256 {
        return Err(format!(
            "Column name '{}...' cannot exceed 256 characters",
            name.chars().take(32).collect::<String>()
        ));
    }

    if name.chars().any(char::is_control) {
        return Err(format!(
            "Column name '{}' cannot contain control characters",
            name.escape_debug()
        ));
    }

    Ok(())
}

/// Validate a list of column names: non-empty, each valid, no duplicates
pub fn validate_column_list(names: &[String], what: &str) -> Result<(), String> {
    if names.is_empty() {
        return Err(format!("{} cannot be empty", what));
    }

    let mut seen = HashSet::new();
    for name in names {
        validate_column_name(name)?;
        if !seen.insert(name.as_str()) {
            return Err(format!("{} lists column '{}' more than once", what, name));
        }
    }

    Ok(())
}

/// Validate join key columns before matching
pub fn validate_key_columns(keys: &[String]) -> ReconResult<()> {
    if keys.is_empty() {
        return Err(ReconError::NoKeyColumns);
    }
    validate_column_list(keys, "key_columns").map_err(ReconError::Config)
}

/// Validate a batch size for row processing
pub fn validate_batch_size(batch_size: usize) -> ReconResult<()> {
    if batch_size == 0 {
        return Err(ReconError::Config(
            "batch_size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

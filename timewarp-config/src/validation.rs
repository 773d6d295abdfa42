//! Custom validation functions for configuration.

use validator::ValidationError;

/// Validate that a log filter directive is non-empty and uses only the
/// characters `EnvFilter` understands.
pub fn validate_filter(filter: &str) -> Result<(), ValidationError> {
    let valid = !filter.trim().is_empty()
        && filter
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-:=,.[]{}\"".contains(c));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_filter"))
    }
}

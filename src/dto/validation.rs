//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted session key.
pub const SESSION_KEY_MAX_LEN: usize = 128;

/// Validates that a session key is 1 to 128 characters of `[A-Za-z0-9_:-]`.
///
/// # Examples
///
/// ```ignore
/// validate_session_key("couple:42")   // Ok
/// validate_session_key("")            // Err - empty
/// validate_session_key("couple 42")   // Err - space
/// ```
pub fn validate_session_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() || key.len() > SESSION_KEY_MAX_LEN {
        let mut err = ValidationError::new("session_key_length");
        err.message = Some(
            format!(
                "Session key must be between 1 and {SESSION_KEY_MAX_LEN} characters (got {})",
                key.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-'))
    {
        let mut err = ValidationError::new("session_key_format");
        err.message =
            Some("Session key may only contain letters, digits, '_', ':' and '-'".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_key_valid() {
        assert!(validate_session_key("couple-42").is_ok());
        assert!(validate_session_key("couple:7f3a_round-2").is_ok());
        assert!(validate_session_key(&"k".repeat(SESSION_KEY_MAX_LEN)).is_ok());
    }

    #[test]
    fn test_validate_session_key_invalid_length() {
        assert!(validate_session_key("").is_err());
        assert!(validate_session_key(&"k".repeat(SESSION_KEY_MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_session_key_invalid_format() {
        assert!(validate_session_key("couple 42").is_err()); // space
        assert!(validate_session_key("couple/42").is_err()); // slash
        assert!(validate_session_key("cöuple").is_err()); // non-ascii
    }
}

//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_USER_ID_LEN: usize = 64;

/// Validates a user identifier supplied by the identity layer.
///
/// Accepts 1 to 64 characters of ASCII letters, digits, `_` and `-`.
///
/// ```ignore
/// validate_user_id("player_01") // Ok
/// validate_user_id("")          // Err - empty
/// validate_user_id("a b")       // Err - space
/// ```
pub fn validate_user_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_USER_ID_LEN {
        let mut err = ValidationError::new("user_id_length");
        err.message = Some(
            format!(
                "User ID must be between 1 and {MAX_USER_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        let mut err = ValidationError::new("user_id_format");
        err.message =
            Some("User ID may only contain ASCII letters, digits, '_' and '-'".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        assert!(validate_user_id("u1").is_ok());
        assert!(validate_user_id("player_01-b").is_ok());
        assert!(validate_user_id(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn rejects_bad_characters() {
        assert!(validate_user_id("a b").is_err());
        assert!(validate_user_id("user@example").is_err());
        assert!(validate_user_id("é").is_err());
    }
}

use crate::error::CoreError;

/// Task identifiers are UUIDv7 so that byte order matches creation order.
pub type TaskId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Maximum length of a client identifier.
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Validate a client identifier supplied by a worker.
///
/// Identifiers must be non-empty, at most [`MAX_CLIENT_ID_LEN`] bytes,
/// and restricted to ASCII alphanumerics plus `.`, `_`, and `-` so they
/// are safe to embed in log lines and URLs.
pub fn validate_client_id(client_id: &str) -> Result<(), CoreError> {
    if client_id.is_empty() {
        return Err(CoreError::Validation("client_id must not be empty".into()));
    }
    if client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(CoreError::Validation(format!(
            "client_id exceeds {MAX_CLIENT_ID_LEN} characters"
        )));
    }
    if !client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(CoreError::Validation(format!(
            "client_id '{client_id}' contains characters outside [A-Za-z0-9._-]"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        assert!(validate_client_id("mac-studio.01").is_ok());
        assert!(validate_client_id("agent_7f3a").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_client_id("").is_err());
    }

    #[test]
    fn rejects_overlong() {
        let id = "a".repeat(MAX_CLIENT_ID_LEN + 1);
        assert!(validate_client_id(&id).is_err());
    }

    #[test]
    fn rejects_unsafe_characters() {
        assert!(validate_client_id("bad id").is_err());
        assert!(validate_client_id("bad/id").is_err());
        assert!(validate_client_id("bad\nid").is_err());
    }
}

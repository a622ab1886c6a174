//! Identifier helpers.

use uuid::Uuid;

/// Generates a session id.
///
/// UUID v7 ids sort by creation time, which keeps listings chronological.
#[must_use]
pub fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Returns true if `value` is a well-formed session id.
#[must_use]
pub fn is_session_id(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique_and_ordered() {
        let first = new_session_id();
        let second = new_session_id();
        assert_ne!(first, second);
        assert!(is_session_id(&first));
        assert_eq!(Uuid::parse_str(&first).unwrap().get_version_num(), 7);
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!(!is_session_id("session-1"));
        assert!(!is_session_id(""));
    }
}

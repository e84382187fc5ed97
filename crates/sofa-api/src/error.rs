use serde::{Deserialize, Serialize};

/// Error body returned by CouchDB for failed requests.
///
/// CouchDB reports failures as `{"error": "...", "reason": "..."}`, both on
/// plain requests and inline in change feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}: {reason}")]
pub struct CouchError {
    pub error: String,
    #[serde(default)]
    pub reason: String,
}

impl CouchError {
    pub fn new(error: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.error == "not_found"
    }
}

/// Raised when parsing a feed type name that CouchDB does not know
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown feed type: {0} (expected normal, longpoll or continuous)")]
pub struct UnknownFeedType(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_couch_error_without_reason() {
        let err: CouchError = serde_json::from_str(r#"{"error":"not_found"}"#).unwrap();
        assert!(err.is_not_found());
        assert_eq!(err.reason, "");
    }

    #[test]
    fn test_couch_error_display() {
        let err = CouchError::new("conflict", "Document update conflict.");
        assert_eq!(err.to_string(), "conflict: Document update conflict.");
    }
}

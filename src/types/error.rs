//! Error types for the graph store
//!
//! Document-store failures keep the server's error labels so the
//! transaction engine can tell transient failures from fatal ones.

/// Main error type for graph store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid reference: [{0}] is not a valid reference!")]
    InvalidReference(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {message}")]
    Database { message: String, labels: Vec<String> },

    #[error("Schedule queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Database error without any server labels
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            labels: Vec::new(),
        }
    }

    /// Database error carrying server error labels
    pub fn labeled(message: impl Into<String>, labels: &[&str]) -> Self {
        Self::Database {
            message: message.into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Check whether the store attached `label` to this error
    pub fn has_error_label(&self, label: &str) -> bool {
        match self {
            Self::Database { labels, .. } => labels.iter().any(|l| l == label),
            _ => false,
        }
    }

    /// HTTP status the request layer should surface for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidReference(_) => 400,
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Database { .. } => 503,
            Self::Queue(_) => 503,
            Self::Config(_) => 500,
            Self::Internal(_) => 500,
        }
    }
}

// Implement From conversions for common error types

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        let labels = err.labels().iter().cloned().collect();
        Self::Database {
            message: err.to_string(),
            labels,
        }
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Validation(format!("BSON serialization failed: {}", err))
    }
}

impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        Self::Validation(format!("BSON deserialization failed: {}", err))
    }
}

impl From<bson::document::ValueAccessError> for StoreError {
    fn from(err: bson::document::ValueAccessError) -> Self {
        Self::Validation(format!("Malformed document: {}", err))
    }
}

impl From<bson::oid::Error> for StoreError {
    fn from(err: bson::oid::Error) -> Self {
        Self::Validation(format!("Invalid object id: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

/// Result type alias for graph store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_labels() {
        let err = StoreError::labeled("write conflict", &["TransientTransactionError"]);
        assert!(err.has_error_label("TransientTransactionError"));
        assert!(!err.has_error_label("UnknownTransactionCommitResult"));

        let plain = StoreError::database("boom");
        assert!(!plain.has_error_label("TransientTransactionError"));
        assert!(!StoreError::Validation("x".into()).has_error_label("TransientTransactionError"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StoreError::InvalidReference("n:x".into()).status_code(), 400);
        assert_eq!(StoreError::NotFound("x".into()).status_code(), 404);
        assert_eq!(StoreError::database("x").status_code(), 503);
        assert_eq!(StoreError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn test_invalid_reference_message() {
        let err = StoreError::InvalidReference("n:Foo:zz".into());
        assert_eq!(err.to_string(), "Invalid reference: [n:Foo:zz] is not a valid reference!");
    }
}

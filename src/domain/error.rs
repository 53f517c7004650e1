//! Domain-level error types for sippa-sync.
//!
//! All errors are typed with `thiserror`. Sync preconditions that are not met
//! (offline, busy, inactive store) are not errors; see `domain::sync::SkipReason`.

use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    /// Failed to open, query or write the local database.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The local store could not be initialized and is permanently inactive.
    #[error("Local store is inactive")]
    StoreInactive,

    /// The remote store rejected a request or could not be reached.
    #[error("Remote store error: {message}")]
    Remote {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The operation is only available while the remote store is reachable.
    #[error("{operation} needs a connection to the remote store")]
    OnlineOnly { operation: String },

    /// Invalid or corrupted data.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// JSON encoding or decoding failed.
    #[error("JSON parse error: {message}")]
    JsonParse {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Configuration or environment error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO operation failed.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

impl AppError {
    /// Create a database error from rusqlite error.
    pub fn database(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    /// Create a remote error from an HTTP client error.
    pub fn remote(context: impl Into<String>, err: reqwest::Error) -> Self {
        let context = context.into();
        Self::Remote {
            message: format!("{context}: {err}"),
            source: Some(Box::new(err)),
        }
    }

    /// Create a remote error without an underlying source.
    pub fn remote_message(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            source: None,
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse(err: serde_json::Error) -> Self {
        Self::JsonParse {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create an IO error with context.
    pub fn io(message: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(err),
        }
    }
}

/// Result type alias using `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::remote_message("HTTP 503 /rest/v1/clients");
        assert_eq!(
            err.to_string(),
            "Remote store error: HTTP 503 /rest/v1/clients"
        );
        assert_eq!(AppError::StoreInactive.to_string(), "Local store is inactive");
        assert_eq!(
            AppError::OnlineOnly {
                operation: "Adding an ingredient".into()
            }
            .to_string(),
            "Adding an ingredient needs a connection to the remote store"
        );
    }

    #[test]
    fn test_json_parse_keeps_source() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let app = AppError::json_parse(err);
        assert!(std::error::Error::source(&app).is_some());
    }
}

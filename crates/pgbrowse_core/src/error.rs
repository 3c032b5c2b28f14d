//! Error types for pgbrowse.
//!
//! Every I/O-bound operation returns a [`BrowseResult`]. Driver errors keep their
//! PostgreSQL detail (SQLSTATE code, detail, hint) so the UI can render
//! actionable messages. Cancellation is a distinct variant and must never be
//! displayed as a failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for pgbrowse.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// Malformed input caught before any I/O.
    #[error("{message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },

    /// Network, TLS, or pool failure while connecting.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// PostgreSQL error code, when the server sent one.
        code: Option<String>,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication failed.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// PostgreSQL error code (28000 or 28P01).
        code: Option<String>,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// The connection attempt was superseded or cancelled by the user.
    #[error("Connection cancelled")]
    Cancelled,

    /// An operation needed a live connection but the session is not connected.
    #[error("No active database connection")]
    NotConnected,

    /// Statement execution error with PostgreSQL-specific details.
    #[error("{message}")]
    Query {
        /// PostgreSQL error message.
        message: String,
        /// Additional detail from PostgreSQL.
        detail: Option<String>,
        /// PostgreSQL hint.
        hint: Option<String>,
        /// Position in query (1-indexed).
        position: Option<usize>,
        /// PostgreSQL error code (e.g., "42P01").
        code: Option<String>,
    },

    /// Local storage error.
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// OS keychain error.
    #[error("Keyring error: {message}")]
    Keyring {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result alias used throughout the crate.
pub type BrowseResult<T> = Result<T, BrowseError>;

impl BrowseError {
    // ========== Constructors ==========

    /// Create a new validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), code: None, detail: None, hint: None, source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            code: None,
            detail: None,
            hint: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a new connection error with a custom hint.
    pub fn connection_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            code: None,
            detail: None,
            hint: Some(hint.into()),
            source: None,
        }
    }

    /// Create a new query error with full PostgreSQL details.
    pub fn query(
        message: impl Into<String>,
        detail: Option<String>,
        hint: Option<String>,
        position: Option<usize>,
        code: Option<String>,
    ) -> Self {
        Self::Query { message: message.into(), detail, hint, position, code }
    }

    /// Create a new storage error.
    pub fn storage(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::Storage { message: message.into(), hint: hint.map(String::from), source: None }
    }

    /// Create a new keyring error.
    pub fn keyring(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::Keyring { message: message.into(), hint: hint.map(String::from) }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    // ========== Methods ==========

    /// Check if this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error was raised because the session is not connected.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }

    /// Check if this error is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Validation",
            Self::Connection { .. } => "Connection",
            Self::Authentication { .. } => "Authentication",
            Self::Cancelled => "Cancellation",
            Self::NotConnected => "Connection",
            Self::Query { .. } => "Query",
            Self::Storage { .. } => "Storage",
            Self::Keyring { .. } => "Keyring",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Validation { .. } => None,
            Self::Connection { hint, .. } => {
                hint.as_deref().or(Some("Check that the database server is running"))
            }
            Self::Authentication { hint, .. } => hint.as_deref(),
            Self::Cancelled => None,
            Self::NotConnected => Some("Connect to a database first"),
            Self::Query { hint, .. } => hint.as_deref(),
            Self::Storage { hint, .. } => hint.as_deref(),
            Self::Keyring { hint, .. } => hint.as_deref(),
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get PostgreSQL error code (if applicable).
    pub fn pg_code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. }
            | Self::Connection { code, .. }
            | Self::Authentication { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get PostgreSQL detail (if applicable).
    pub fn pg_detail(&self) -> Option<&str> {
        match self {
            Self::Query { detail, .. } | Self::Connection { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }

    /// Convert to user-displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let error_type = format!("{} Error", self.category());
        let message = self.to_string();
        let hint = self.hint().map(String::from);
        let code = self.pg_code().map(String::from);
        let detail = self.pg_detail().map(String::from);

        let technical_detail = match self {
            Self::Query { detail, code, position, .. } => {
                let mut parts = Vec::new();
                if let Some(code) = code {
                    parts.push(format!("Code: {code}"));
                }
                if let Some(pos) = position {
                    parts.push(format!("Position: {pos}"));
                }
                if let Some(detail) = detail {
                    parts.push(format!("Detail: {detail}"));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            Self::Connection { code: Some(code), .. } => Some(format!("Code: {code}")),
            _ => None,
        };

        ErrorInfo { error_type, message, code, detail, hint, technical_detail }
    }
}

/// User-displayable error information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Category name (e.g., "Connection Error").
    pub error_type: String,
    /// User-friendly message.
    pub message: String,
    /// Machine-readable SQLSTATE code.
    pub code: Option<String>,
    /// Server-provided detail.
    pub detail: Option<String>,
    /// Actionable suggestion.
    pub hint: Option<String>,
    /// Technical detail for "Show Details" expansion.
    pub technical_detail: Option<String>,
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to BrowseError.
impl From<tokio_postgres::Error> for BrowseError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let detail = db_err.detail().map(String::from);
            let hint = db_err.hint().map(String::from);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let code_str = db_err.code().code();
            let code = Some(code_str.to_string());

            return match code_str {
                "28P01" => BrowseError::Authentication {
                    message,
                    code,
                    hint: Some("Invalid password - check your credentials".to_string()),
                },
                _ if code_str.starts_with("28") => BrowseError::Authentication {
                    message,
                    code,
                    hint: Some("Authentication failed - check username and permissions".to_string()),
                },
                _ if code_str.starts_with("08") => BrowseError::Connection {
                    message,
                    code,
                    detail,
                    hint,
                    source: Some(Box::new(err)),
                },
                _ => BrowseError::Query { message, detail, hint, position, code },
            };
        }

        if err.is_closed() {
            return BrowseError::Connection {
                message: "Connection closed".to_string(),
                code: None,
                detail: None,
                hint: None,
                source: Some(Box::new(err)),
            };
        }

        BrowseError::Connection {
            message: err.to_string(),
            code: None,
            detail: None,
            hint: None,
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from rusqlite::Error to BrowseError.
impl From<rusqlite::Error> for BrowseError {
    fn from(err: rusqlite::Error) -> Self {
        BrowseError::Storage {
            message: err.to_string(),
            hint: Some("The local database may be corrupted".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from std::io::Error to BrowseError.
impl From<std::io::Error> for BrowseError {
    fn from(err: std::io::Error) -> Self {
        BrowseError::Storage {
            message: err.to_string(),
            hint: Some("Check file permissions and disk space".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from serde_json::Error to BrowseError.
impl From<serde_json::Error> for BrowseError {
    fn from(err: serde_json::Error) -> Self {
        BrowseError::Storage {
            message: format!("JSON error: {err}"),
            hint: Some("Data may be corrupted".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from keyring::Error to BrowseError.
impl From<keyring::Error> for BrowseError {
    fn from(err: keyring::Error) -> Self {
        BrowseError::Keyring {
            message: err.to_string(),
            hint: Some("Grant pgbrowse access in system preferences".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_a_failure_category() {
        let err = BrowseError::Cancelled;
        assert!(err.is_cancelled());
        assert_eq!(err.category(), "Cancellation");
        assert_eq!(err.hint(), None);
    }

    #[test]
    fn test_query_error_info_keeps_driver_detail() {
        let err = BrowseError::query(
            "relation \"nope\" does not exist",
            Some("some detail".to_string()),
            Some("check the table name".to_string()),
            Some(15),
            Some("42P01".to_string()),
        );
        let info = err.to_error_info();
        assert_eq!(info.error_type, "Query Error");
        assert_eq!(info.message, "relation \"nope\" does not exist");
        assert_eq!(info.code.as_deref(), Some("42P01"));
        assert_eq!(info.detail.as_deref(), Some("some detail"));
        assert_eq!(info.hint.as_deref(), Some("check the table name"));
        let technical = info.technical_detail.unwrap();
        assert!(technical.contains("Code: 42P01"));
        assert!(technical.contains("Position: 15"));
        assert!(technical.contains("Detail: some detail"));
    }

    #[test]
    fn test_connection_error_has_default_hint() {
        let err = BrowseError::connection("refused");
        assert_eq!(err.hint(), Some("Check that the database server is running"));
        let err = BrowseError::connection_with_hint("refused", "Is the port right?");
        assert_eq!(err.hint(), Some("Is the port right?"));
    }

    #[test]
    fn test_not_connected_is_recoverable() {
        let err = BrowseError::NotConnected;
        assert!(err.is_not_connected());
        assert_eq!(err.to_string(), "No active database connection");
        assert_eq!(err.hint(), Some("Connect to a database first"));
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = BrowseError::validation("Hostname is required.");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Hostname is required.");
    }
}

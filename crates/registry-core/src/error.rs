//! Error types for the registry core.
//!
//! Every failure the core can report is a variant of [`RegistryError`].
//! Callers branch on the variant, never on the rendered message, and the HTTP
//! surface derives its status code from [`RegistryError::http_status`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the registry core.
#[derive(Debug, Error)]
pub enum RegistryError {
    // Lookup errors
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("registry not found: {name}")]
    RegistryNotFound { name: String },

    // Mutation policy errors
    #[error("registry '{name}' is not a managed registry")]
    NotManagedRegistry { name: String },

    #[error("version {version} of '{name}' already exists")]
    VersionAlreadyExists { name: String, version: String },

    #[error("registry '{name}' was created from configuration and cannot be modified via the API")]
    ConfigRegistry { name: String },

    #[error("invalid registry configuration: {message}")]
    InvalidRegistryConfig { message: String },

    #[error("registry '{name}' already exists")]
    RegistryAlreadyExists { name: String },

    #[error("registry '{name}': changing source type from {from} to {to} is not allowed")]
    SourceTypeChangeNotAllowed {
        name: String,
        from: String,
        to: String,
    },

    #[error("not implemented: {feature}")]
    NotImplemented { feature: String },

    // Client input errors
    #[error("invalid cursor: {message}")]
    InvalidCursor { message: String },

    #[error("invalid cursor format: expected 2 fields, got {fields}")]
    InvalidCursorFormat { fields: usize },

    #[error("invalid value for option '{option}': {message}")]
    InvalidOption { option: String, message: String },

    #[error("option '{option}' is not compatible with operation '{operation}'")]
    IncompatibleOption { option: String, operation: String },

    #[error("{message}")]
    Validation { message: String },

    // Construction and backend errors
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("data provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RegistryError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        RegistryError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a validation failure with a caller-facing message.
    pub fn validation(message: impl Into<String>) -> Self {
        RegistryError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a database failure without an underlying rusqlite error.
    pub fn database(message: impl Into<String>) -> Self {
        RegistryError::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Map to the HTTP status code the routing layer must return.
    ///
    /// - 404: NotFound, RegistryNotFound
    /// - 403: NotManagedRegistry, ConfigRegistry
    /// - 409: VersionAlreadyExists, RegistryAlreadyExists
    /// - 400: validation, option, cursor and registry-definition errors
    /// - 500: everything else, including NotImplemented
    pub fn http_status(&self) -> u16 {
        match self {
            RegistryError::NotFound { .. } | RegistryError::RegistryNotFound { .. } => 404,

            RegistryError::NotManagedRegistry { .. } | RegistryError::ConfigRegistry { .. } => 403,

            RegistryError::VersionAlreadyExists { .. }
            | RegistryError::RegistryAlreadyExists { .. } => 409,

            RegistryError::InvalidCursor { .. }
            | RegistryError::InvalidCursorFormat { .. }
            | RegistryError::InvalidOption { .. }
            | RegistryError::IncompatibleOption { .. }
            | RegistryError::Validation { .. }
            | RegistryError::InvalidRegistryConfig { .. }
            | RegistryError::SourceTypeChangeNotAllowed { .. } => 400,

            _ => 500,
        }
    }

    /// True when the failure was caused by caller input rather than the backend.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// The core never retries; every error is terminal for the call that saw it.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::VersionAlreadyExists {
            name: "io.github.acme/fetch".into(),
            version: "1.0.0".into(),
        };
        assert_eq!(
            err.to_string(),
            "version 1.0.0 of 'io.github.acme/fetch' already exists"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            RegistryError::NotFound { what: "x".into() }.http_status(),
            404
        );
        assert_eq!(
            RegistryError::RegistryNotFound { name: "x".into() }.http_status(),
            404
        );
        assert_eq!(
            RegistryError::NotManagedRegistry { name: "x".into() }.http_status(),
            403
        );
        assert_eq!(
            RegistryError::VersionAlreadyExists {
                name: "x".into(),
                version: "1".into()
            }
            .http_status(),
            409
        );
        assert_eq!(RegistryError::validation("name is required").http_status(), 400);
        assert_eq!(
            RegistryError::InvalidCursorFormat { fields: 3 }.http_status(),
            400
        );
        assert_eq!(RegistryError::database("boom").http_status(), 500);
    }

    #[test]
    fn test_client_errors_are_never_retryable() {
        let err = RegistryError::IncompatibleOption {
            option: "cursor".into(),
            operation: "get_server_version".into(),
        };
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
        assert!(!RegistryError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
    }
}

//! Error types for database and authentication operations
//!
//! Uses thiserror for ergonomic error definitions. Module-specific errors
//! (`ConfigError`, `StateError`) convert into `FirebaseError` via `From`,
//! so façade methods can propagate everything with `?`.

use thiserror::Error;

/// Top-level error type
///
/// Every façade operation resolves to exactly one `Result` carrying this type.
/// Backend failures are passed through verbatim in [`FirebaseError::Backend`].
///
/// # Example
/// ```
/// use firebase_kit::{ConfigError, FirebaseError};
///
/// let err: FirebaseError = ConfigError::MissingOrderKey.into();
/// assert!(err.is_config_error());
/// ```
#[derive(Debug, Error)]
pub enum FirebaseError {
    /// Failure reported by the backend, message unchanged
    #[error("Backend error: {0}")]
    Backend(String),

    /// Caller-side misconfiguration detected before touching the backend
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A node could not be decoded into the requested model type
    #[error("Failed to decode '{key}': {source}")]
    Decoding {
        /// Backend key of the offending node
        key: String,
        /// Underlying serde error
        #[source]
        source: serde_json::Error,
    },

    /// Operation is not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(#[from] StateError),

    /// Network/HTTP errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration and parameter errors
///
/// Raised before any backend call is issued.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A path segment was empty
    #[error("Path segment {index} is empty")]
    EmptyPathSegment {
        /// Zero-based position of the empty segment
        index: usize,
    },

    /// A path segment contains a character the backend forbids in keys
    #[error("Path segment {index} ('{segment}') contains a forbidden character")]
    InvalidPathSegment {
        /// Zero-based position of the segment
        index: usize,
        /// The rejected segment
        segment: String,
    },

    /// Ordered listing requested without an order key
    #[error("An order key is required for listing")]
    MissingOrderKey,

    /// Ordered listing requested without a filter
    #[error("A filter is required for listing")]
    MissingFilter,

    /// Language code must be set before phone verification
    #[error("Language code is not set")]
    LanguageCodeNotSet,

    /// Phone country-code prefix must be set before phone verification
    #[error("Phone code is not set")]
    PhoneCodeNotSet,

    /// Phone country-code prefix must start with '+'
    #[error("Phone code '{0}' must start with '+'")]
    InvalidPhoneCode(String),

    /// Phone number is empty
    #[error("Phone number is empty")]
    EmptyPhoneNumber,

    /// One-time verification code is empty
    #[error("Verification code is empty")]
    EmptyVerificationCode,

    /// A multi-path update named the database root
    #[error("Multi-path updates cannot target the database root")]
    RootUpdatePath,

    /// A multi-path update named two paths where one contains the other
    #[error("Update paths '{first}' and '{second}' overlap")]
    OverlappingPaths {
        /// The containing path
        first: String,
        /// The contained path
        second: String,
    },

    /// A model value did not encode to a key-value map
    #[error("Value does not encode to a key-value map")]
    NotAnObject,

    /// API key not configured
    #[error("API key not configured")]
    ApiKeyNotConfigured,

    /// Database URL could not be used as a REST base
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
}

/// State machine violations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// OTP confirmation attempted before a verification was requested
    #[error("No pending phone verification")]
    NoPendingVerification,

    /// Session operation attempted while signed out
    #[error("No user is signed in")]
    NotSignedIn,

    /// The session carries no refresh token to renew its ID token
    #[error("Session has no refresh token")]
    MissingRefreshToken,
}

impl FirebaseError {
    /// Create an internal error from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a backend error from the backend's own message
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Check if error was raised by parameter/precondition validation
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if error came from the backend
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Network(_))
    }

    /// The backend's message, if this is a backend error
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::Backend(msg) => Some(msg),
            _ => None,
        }
    }
}

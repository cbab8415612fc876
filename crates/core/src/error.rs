//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Context provider errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Room errors ---
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors raised by the external memory/context service.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Rate limited by context service")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Context API request failed: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Context service unreachable: {0}")]
    Network(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Malformed context response: {0}")]
    Decode(String),
}

impl ContextError {
    /// Only rate limits are worth retrying; everything else is terminal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum RoomError {
    #[error("Connection is not registered: {0}")]
    NotRegistered(String),

    #[error("Display name '{name}' is taken, try '{suggestion}'")]
    NameTaken { name: String, suggestion: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        });
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[test]
    fn only_rate_limit_is_retryable() {
        assert!(ContextError::RateLimited { retry_after_secs: None }.is_rate_limited());
        assert!(!ContextError::Network("reset".into()).is_rate_limited());
        assert!(!ContextError::Api { status: 500, message: "boom".into() }.is_rate_limited());
    }

    #[test]
    fn name_taken_mentions_suggestion() {
        let err = Error::Room(RoomError::NameTaken {
            name: "alice".into(),
            suggestion: "alice_2".into(),
        });
        assert!(err.to_string().contains("alice_2"));
    }
}

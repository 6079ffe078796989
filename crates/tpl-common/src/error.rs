//! Error types for the tap
//!
//! Every variant is fatal to a run: the engine never retries or swallows an
//! error, it propagates to the process boundary with state already durable
//! up to the last committed page.

use thiserror::Error;

/// Result type alias for tap operations
pub type Result<T> = std::result::Result<T, TapError>;

/// Main error type for the tap
#[derive(Error, Debug)]
pub enum TapError {
    /// The transport collaborator failed; surfaced unchanged
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response could not be normalized (missing data key, unexpected shape)
    #[error("Malformed payload for stream '{stream}': {message}")]
    MalformedPayload { stream: String, message: String },

    /// Invalid stream tree or tap configuration, raised before any I/O
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persisted state does not have the expected shape
    #[error("Malformed state: {0}")]
    MalformedState(String),

    /// Catalog is missing or inconsistent with the stream tree
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TapError {
    /// Create a malformed payload error
    pub fn malformed_payload(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a malformed state error
    pub fn malformed_state(msg: impl Into<String>) -> Self {
        Self::MalformedState(msg.into())
    }

    /// Create a catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }
}

/// Failure kinds reported by the transport collaborator
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection, TLS or body decoding failure
    #[error("network failure: {0}")]
    Network(String),

    /// The API asked us to slow down and retries were exhausted
    #[error("rate limited by the API (HTTP 429)")]
    RateLimited,

    /// Token acquisition failed or credentials were rejected
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// The API answered with a fault status code
    #[error("API fault {status}: {message}")]
    ApiFault { status: u16, message: String },
}

impl TransportError {
    /// Whether the transport may retry the request on its own
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::ApiFault { status, .. } => *status >= 500,
            TransportError::RateLimited | TransportError::Unauthorized(_) => false,
        }
    }
}

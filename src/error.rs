//! Error types for rabbitwire.

use thiserror::Error;

/// Main error type for all rabbitwire operations.
#[derive(Debug, Error)]
pub enum RabbitwireError {
    /// Invalid or unsupported connection/option values.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Payload could not be represented as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation attempted before its preconditions hold (e.g. send before queue).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Endpoint used after `close()`.
    #[error("Endpoint is closed")]
    Closed,

    /// A delivered body was not a valid envelope.
    #[error("Malformed delivery on queue '{queue}': {source}")]
    DeliveryDecode {
        queue: String,
        #[source]
        source: serde_json::Error,
    },

    /// Failure reported by the transport collaborator.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The consumer ended before delivering the expected message.
    #[error("Consumer on queue '{0}' ended without a delivery")]
    ConsumerCancelled(String),
}

/// Result type alias using RabbitwireError.
pub type Result<T> = std::result::Result<T, RabbitwireError>;

/// Boxed error cause carried by a failed handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a route handler that did not produce a value.
///
/// Intentional failures, including input the handler cannot decode, map to
/// a 500 reply. Infrastructure failures (the handler tried to talk to the
/// broker, or its result could not be encoded) map to 503 so callers can
/// tell the two apart.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler itself reported a failure.
    #[error("handler failed: {0}")]
    Failed(BoxError),

    /// A transport or result-encoding failure surfaced inside the handler.
    #[error("infrastructure failure: {0}")]
    Infrastructure(#[source] RabbitwireError),
}

impl HandlerError {
    /// Wrap any error as an intentional handler failure.
    pub fn failed<E: Into<BoxError>>(cause: E) -> Self {
        Self::Failed(cause.into())
    }

    /// Whether this failure came from the infrastructure rather than the handler.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }
}

impl From<RabbitwireError> for HandlerError {
    fn from(err: RabbitwireError) -> Self {
        Self::Infrastructure(err)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(Box::new(err))
    }
}

//! Error types for the fanout pipeline

use crate::registry::SubscriberId;

/// Result type alias using the fanout Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for fanout operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An event could not be represented in the wire payload format.
    /// Fatal to the broadcast loop.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Writing to one subscriber's response sink failed.
    /// Only ever affects that subscriber.
    #[error("transport write error: {0}")]
    TransportWrite(#[source] std::io::Error),

    /// The response sink cannot flush incrementally
    #[error("streaming unsupported")]
    StreamingUnsupported,

    /// The registry has been torn down and accepts no new subscribers
    #[error("server closed")]
    Closed,

    /// `start` was called on a server that is already running or stopped
    #[error("server already started")]
    AlreadyStarted,

    /// A subscriber with this id is already registered
    #[error("subscriber {0} already registered")]
    DuplicateSubscriber(SubscriberId),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

//! Error types for the event bus and its wire protocol.

use thiserror::Error;

/// Errors raised while publishing, encoding, or decoding events.
#[derive(Debug, Error)]
pub enum BusError {
    /// An event could not be serialized to JSON at publish time.
    #[error("failed to serialize event '{kind}': {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A payload could not be reconstructed into its registered type.
    #[error("failed to decode event '{kind}': {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// A line on the wire was not a valid `{"type", "event"}` envelope.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;

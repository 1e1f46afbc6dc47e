//! Error types for quarry-proto.

use thiserror::Error;

/// Result type for quarry-proto operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while framing or unframing peer messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The wrapped message does not fit in one datagram.
    #[error("message of {len} bytes exceeds datagram bound of {max} bytes")]
    Oversized { len: usize, max: usize },
}

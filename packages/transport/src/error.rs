//! Error types for the transport.

use thiserror::Error;

/// Errors from the datagram transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket I/O failed.
    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),

    /// A frame failed to parse or its signature did not verify.
    #[error("bad frame: {0}")]
    BadFrame(String),

    /// An artifact's bytes disagree with their content address.
    #[error("corrupt artifact: {0}")]
    CorruptArtifact(String),

    /// The encoded frame exceeds one datagram.
    #[error("artifact too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// The receiver's inbound queue is full; the message was shed.
    #[error("inbound queue full")]
    Backpressure,
}

//! Error types for the kernel peer-to-peer layer.

use {crate::types::PeerId, thiserror::Error};

/// Errors that can occur in the peer-to-peer layer.
///
/// Every variant except [`P2pError::QueueFull`] is fatal to the connection
/// that produced it: the connection is closed and, for relayer links, redialed
/// by the reconnect loop.
#[derive(Error, Debug)]
pub enum P2pError {
    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// No complete frame arrived before the read deadline.
    #[error("read timeout after {0}ms")]
    ReadTimeout(u64),

    /// A frame could not be flushed before the write deadline.
    #[error("write timeout after {0}ms")]
    WriteTimeout(u64),

    /// The frame header carried a protocol version we do not speak.
    #[error("unsupported transport version {actual} (expected {expected})")]
    UnsupportedVersion {
        /// Version this node speaks.
        expected: u8,
        /// Version found in the frame header.
        actual: u8,
    },

    /// Message exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Zero-length payloads are never valid on the wire.
    #[error("empty message")]
    EmptyMessage,

    /// The leading type tag does not name a known message.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// The payload length or content does not match the layout of its kind.
    #[error("malformed {kind} message: {reason}")]
    Malformed {
        /// Message kind being decoded.
        kind: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The remote did not authenticate within the handshake deadline.
    #[error("authentication timeout after {0}ms")]
    AuthenticationTimeout(u64),

    /// The remote's authentication message was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The peer sent a message kind that is not valid at this point.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Kind we were waiting for.
        expected: &'static str,
        /// Kind we received.
        actual: &'static str,
    },

    /// The external handle rejected the message or failed to serve a read.
    #[error("handle error: {0}")]
    Handle(String),

    /// No direct or relayed route is known for the peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// The peer's outbound queue is full; the message was dropped.
    #[error("send queue full for peer {0}")]
    QueueFull(PeerId),

    /// An internal channel was closed by its other end.
    #[error("channel closed")]
    ChannelClosed,

    /// A relayer endpoint string could not be parsed.
    #[error("invalid relayer endpoint: {0}")]
    InvalidEndpoint(String),

    /// The node is shutting down.
    #[error("node shutting down")]
    Shutdown,
}

impl P2pError {
    /// Shorthand for a [`P2pError::Malformed`] error.
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Convenience result type for peer-to-peer operations.
pub type Result<T> = std::result::Result<T, P2pError>;

//! Error types for the protocol layer.
//!
//! Each crate in Emberlink defines its own error enum. A `ProtocolError`
//! always means the bytes themselves were wrong: too few of them, or a
//! string that isn't valid UTF-16.

/// Errors that can occur while encoding or decoding packet fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes remain than the field being read needs.
    ///
    /// On the inbound path this means the client sent a truncated or
    /// malformed frame, and the session is disconnected.
    #[error("short buffer: needed {needed} bytes, {remaining} remaining")]
    ShortBuffer {
        /// Width of the field that was being read.
        needed: usize,
        /// Bytes that were left in the buffer.
        remaining: usize,
    },

    /// A string field was not valid UTF-16.
    #[error("string is not valid UTF-16")]
    InvalidString,

    /// The message is well-formed but violates a protocol rule.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

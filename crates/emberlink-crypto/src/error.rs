//! Error types for the cipher layer.

/// Errors produced while framing, encrypting, or decrypting.
///
/// Every variant is fatal for the session: the cipher's key state has
/// already moved, so the stream cannot be resynchronised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    /// The decrypted body's checksum does not match its payload.
    ///
    /// Either the stream is corrupt or the peer is not using the key we
    /// issued. Treated as a protocol violation.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum computed over the decrypted payload.
        expected: u32,
        /// Checksum carried by the frame.
        actual: u32,
    },

    /// The body is too short to carry a checksum.
    #[error("malformed frame body: {0} bytes")]
    Malformed(usize),

    /// The framed packet would not fit the 16-bit length prefix.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
}

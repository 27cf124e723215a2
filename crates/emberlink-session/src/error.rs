//! Error types for the session layer.

use std::time::Duration;

use emberlink_crypto::CipherError;
use emberlink_protocol::ProtocolError;
use emberlink_transport::{ConnectionId, TransportError};

use crate::{CharacterId, SessionState};

/// Errors returned to code that pushes packets into a session or moves it
/// through its lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The outbound queue was full. The session has been disconnected.
    ///
    /// Never retried: a peer that stops reading gives up its backlog
    /// rather than growing it.
    #[error("outbound queue full, session disconnected")]
    QueueFull,

    /// `send_sync` could not enqueue within its deadline. The session is
    /// still open; the caller may retry or drop the packet.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    /// The session is disconnected, or closed while the call was waiting.
    #[error("session closed")]
    Closed,

    /// The payload does not fit in a single frame.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// A packet needs at least an opcode.
    #[error("empty payload")]
    EmptyPayload,

    /// The requested state change is not a forward step from the current
    /// state.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// State the session was actually in.
        from: SessionState,
        /// State that was requested.
        to: SessionState,
    },

    /// No session is registered under this id.
    #[error("session not found: {0}")]
    NotFound(ConnectionId),

    /// Another live session already plays this character.
    #[error("{0} is already in the world")]
    CharacterInUse(CharacterId),

    /// A packet could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Errors from reading an inbound frame. Every variant disconnects the
/// session.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The socket read failed or hit EOF mid-frame.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Decryption failed its integrity check.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// A length prefix smaller than the prefix itself.
    #[error("frame length {0} is shorter than its header")]
    FrameTooShort(u16),

    /// Nothing arrived within the idle limit.
    #[error("no inbound frame within {0:?}")]
    ReadTimeout(Duration),
}

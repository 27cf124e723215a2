//! Unified error type for Emberlink.

use emberlink_crypto::CipherError;
use emberlink_protocol::ProtocolError;
use emberlink_session::{FrameError, SessionError};
use emberlink_transport::TransportError;

use crate::DispatchError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum EmberlinkError {
    /// Socket-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Malformed packet bytes.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Frame integrity failure.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// Send, lifecycle, or registry failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Inbound framing failure.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Routing or handler failure.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

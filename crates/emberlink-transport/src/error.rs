use std::time::Duration;

/// Errors that can occur in the transport layer.
///
/// Any of these ends the session it happens on. Nothing at this layer
/// retries: once bytes of an encrypted stream are lost or half-written,
/// the stream cannot be resumed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// A write did not complete within its deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
}

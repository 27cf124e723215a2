//! Inbound framing: length-prefixed frames off the socket read half,
//! decrypted and checked.

use emberlink_crypto::{FRAME_HEADER_LEN, InboundCipher};
use emberlink_pool::{BufferPool, PooledBuffer};
use emberlink_transport::TransportError;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::FrameError;

/// Reads frames from one connection.
///
/// Not cancellation safe: dropping `next_frame` part way through a frame
/// leaves the stream misaligned. Callers that race it against a timeout
/// or a close signal disconnect when the race is lost.
pub struct FrameReader<R> {
    reader: R,
    cipher: InboundCipher,
    pool: BufferPool,
    frames_read: u64,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wraps the read half of a connection.
    pub fn new(reader: R, cipher: InboundCipher, pool: BufferPool) -> Self {
        Self {
            reader,
            cipher,
            pool,
            frames_read: 0,
        }
    }

    /// Frames read so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Reads, decrypts and verifies the next frame, returning its payload.
    ///
    /// Returns `Ok(None)` on a clean EOF between frames.
    ///
    /// # Errors
    /// - [`FrameError::FrameTooShort`] for a length prefix below 2
    /// - [`FrameError::Cipher`] if the checksum does not match
    /// - [`FrameError::Transport`] for socket errors and EOF inside a frame
    pub async fn next_frame(&mut self) -> Result<Option<PooledBuffer>, FrameError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let n = self
            .reader
            .read(&mut header[..1])
            .await
            .map_err(TransportError::ReceiveFailed)?;
        if n == 0 {
            return Ok(None);
        }
        self.reader
            .read_exact(&mut header[1..])
            .await
            .map_err(TransportError::ReceiveFailed)?;

        let len = u16::from_le_bytes(header);
        let body_len = usize::from(len)
            .checked_sub(FRAME_HEADER_LEN)
            .ok_or(FrameError::FrameTooShort(len))?;

        let mut body = self.pool.get(body_len);
        body.resize(body_len, 0);
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(TransportError::ReceiveFailed)?;

        let payload_len = self.cipher.decrypt_in_place(&mut body)?;
        body.truncate(payload_len);
        self.frames_read += 1;
        Ok(Some(body))
    }

    /// Returns the read half.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

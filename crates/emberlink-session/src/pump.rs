//! The write pump: the only task that touches a session's socket write
//! half and its outbound cipher.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use emberlink_crypto::OutboundCipher;
use emberlink_pool::{BufferPool, PooledBuffer};
use emberlink_transport::TransportError;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::session::{Counters, Shared};
use crate::{CloseReason, SessionConfig};

/// How a write pump finished.
#[derive(Debug)]
pub enum PumpExit {
    /// Every handle was dropped and the whole queue was written.
    Drained,
    /// The session was closed; this many queued packets were dropped
    /// unsent, including any batch cut off mid-write.
    Closed {
        /// Packets discarded since the close.
        discarded: u64,
    },
    /// A socket write failed or timed out. The session is disconnected.
    Failed(TransportError),
}

enum Wake {
    Packet(PooledBuffer),
    Closed,
    Drained,
}

pub(crate) struct WritePump<W> {
    shared: Arc<Shared>,
    rx: mpsc::Receiver<PooledBuffer>,
    writer: W,
    cipher: OutboundCipher,
    pool: BufferPool,
    write_timeout: Duration,
    max_batch_bytes: usize,
}

impl<W> WritePump<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(
        shared: Arc<Shared>,
        rx: mpsc::Receiver<PooledBuffer>,
        writer: W,
        cipher: OutboundCipher,
        pool: BufferPool,
        config: &SessionConfig,
    ) -> Self {
        Self {
            shared,
            rx,
            writer,
            cipher,
            pool,
            write_timeout: config.write_timeout,
            max_batch_bytes: config.max_batch_bytes.max(1),
        }
    }

    pub(crate) async fn run(mut self) -> PumpExit {
        let conn_id = self.shared.id;
        let exit = loop {
            let wake = tokio::select! {
                biased;
                () = self.shared.closed() => Wake::Closed,
                next = self.rx.recv() => next.map_or(Wake::Drained, Wake::Packet),
            };

            match wake {
                Wake::Packet(first) => {
                    if let Err(e) = self.write_batch(first).await {
                        let reason = match e {
                            TransportError::WriteTimeout(_) => CloseReason::WriteTimeout,
                            _ => CloseReason::WriteFailed,
                        };
                        tracing::warn!(%conn_id, error = %e, "write failed, disconnecting");
                        self.shared.close(reason);
                        // Whatever is still queued can never be written.
                        let _ = self.discard_remaining().await;
                        break PumpExit::Failed(e);
                    }
                }
                Wake::Closed => {
                    self.discard_remaining().await;
                    let discarded = self.shared.counters.discarded.load(Ordering::Relaxed);
                    break PumpExit::Closed { discarded };
                }
                Wake::Drained => {
                    self.shared.close(CloseReason::Released);
                    break PumpExit::Drained;
                }
            }
        };

        if !matches!(exit, PumpExit::Failed(_)) {
            let _ = tokio::time::timeout(self.write_timeout, self.writer.shutdown()).await;
        }
        tracing::debug!(%conn_id, ?exit, "write pump stopped");
        exit
    }

    /// Encrypts `first` plus whatever else is already queued, up to the
    /// batch limit, and writes it all with one socket write.
    async fn write_batch(&mut self, first: PooledBuffer) -> Result<(), TransportError> {
        let mut batch = self.pool.get(self.max_batch_bytes);
        let mut frames = 0u64;
        let mut next = Some(first);

        while let Some(plain) = next.take() {
            match self.cipher.encrypt_to_pooled(&plain) {
                Ok(frame) => {
                    batch.extend_from_slice(&frame);
                    frames += 1;
                }
                Err(e) => {
                    tracing::warn!(conn_id = %self.shared.id, error = %e, "dropping unframeable packet");
                }
            }
            if batch.len() >= self.max_batch_bytes {
                break;
            }
            next = self.rx.try_recv().ok();
        }

        if frames == 0 {
            return Ok(());
        }
        if !self.shared.state().is_open() {
            Counters::add(&self.shared.counters.discarded, frames);
            return Ok(());
        }

        let deadline = self.write_timeout;
        let writer = &mut self.writer;
        let write = async {
            writer.write_all(&batch).await?;
            writer.flush().await
        };
        let written = tokio::select! {
            biased;
            () = self.shared.closed() => None,
            written = tokio::time::timeout(deadline, write) => Some(written),
        };
        match written {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => return Err(TransportError::SendFailed(e)),
            Some(Err(_)) => return Err(TransportError::WriteTimeout(deadline)),
            None => {
                // Closed mid-write: the rest of the batch never reaches the wire.
                Counters::add(&self.shared.counters.discarded, frames);
                tracing::debug!(conn_id = %self.shared.id, frames, "write abandoned on close");
                return Ok(());
            }
        }

        let counters = &self.shared.counters;
        Counters::add(&counters.written, frames);
        Counters::add(&counters.bytes_written, batch.len() as u64);
        Counters::add(&counters.flushes, 1);
        tracing::trace!(conn_id = %self.shared.id, frames, bytes = batch.len(), "flushed");
        Ok(())
    }

    /// Closes the queue and drops everything in it, returning every buffer
    /// to the pool. Waits out senders that already hold a slot.
    async fn discard_remaining(&mut self) -> u64 {
        self.rx.close();
        let mut discarded = 0u64;
        while let Some(buf) = self.rx.recv().await {
            drop(buf);
            discarded += 1;
        }
        if discarded > 0 {
            Counters::add(&self.shared.counters.discarded, discarded);
            tracing::debug!(conn_id = %self.shared.id, discarded, "discarded queued packets");
        }
        discarded
    }
}

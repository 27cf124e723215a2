//! TCP transport implementation.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A TCP [`Transport`] that listens for incoming game clients.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self { listener })
    }
}

impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;
    type Error = TransportError;

    async fn accept(
        &mut self,
    ) -> Result<Connection<Self::Reader, Self::Writer>, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        // Packets are small and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%addr, error = %e, "failed to set TCP_NODELAY");
        }

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %addr, "accepted TCP connection");

        let (reader, writer) = stream.into_split();
        Ok(Connection {
            id,
            peer: Some(addr),
            reader,
            writer,
        })
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.listener
            .local_addr()
            .map_err(TransportError::AcceptFailed)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

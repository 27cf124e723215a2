//! Transport abstraction layer for Emberlink.
//!
//! Provides the [`Transport`] trait that hands out accepted connections as
//! a pair of independent byte-stream halves. The session layer gives the
//! write half to its write pump and the read half to its read task, so
//! the two directions never share a lock.
//!
//! [`TcpTransport`] is the production implementation.

#![allow(async_fn_in_trait)]

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::TcpTransport;

use std::fmt;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An accepted connection, split into its read and write halves.
pub struct Connection<R, W> {
    /// Unique id assigned at accept time.
    pub id: ConnectionId,
    /// Remote address, when the transport has one.
    pub peer: Option<SocketAddr>,
    /// Inbound byte stream.
    pub reader: R,
    /// Outbound byte stream.
    pub writer: W,
}

impl<R, W> fmt::Debug for Connection<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// Read half of an accepted connection.
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// Write half of an accepted connection.
    type Writer: AsyncWrite + Unpin + Send + 'static;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(
        &mut self,
    ) -> Result<Connection<Self::Reader, Self::Writer>, Self::Error>;

    /// Address the transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "alice");
        map.insert(ConnectionId::new(2), "bob");
        assert_eq!(map[&ConnectionId::new(1)], "alice");
    }
}

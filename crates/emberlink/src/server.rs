//! Server builder and accept loop.
//!
//! This is the entry point for running an Emberlink server. It ties the
//! layers together: transport → session → framing → dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use emberlink_pool::BufferPool;
use emberlink_session::{CloseReason, SessionRegistry};
use emberlink_transport::{TcpTransport, Transport};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::handler::handle_connection;
use crate::{Dispatcher, EmberlinkError, ServerConfig, SharedRegistry};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    pub(crate) pool: BufferPool,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) registry: SharedRegistry,
    pub(crate) shutdown: watch::Sender<bool>,
}

/// Builder for configuring and starting a server.
///
/// # Example
///
/// ```rust,no_run
/// use emberlink::prelude::*;
///
/// # async fn run() -> Result<(), EmberlinkError> {
/// let mut dispatcher = Dispatcher::new();
/// dispatcher.route(PacketId::Primary(0x01), StateSet::ANY_OPEN, |ctx, _packet| {
///     ctx.session.send(&[0x81])?;
///     Ok(())
/// })?;
///
/// let server = Server::builder()
///     .bind("0.0.0.0:7777")
///     .dispatcher(dispatcher)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    dispatcher: Dispatcher,
}

impl ServerBuilder {
    /// Creates a builder with default configuration and no routes.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: Dispatcher::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the routing table.
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Validates the configuration and binds the listener.
    ///
    /// # Errors
    /// [`EmberlinkError::Config`] for invalid settings,
    /// [`EmberlinkError::Transport`] if the address cannot be bound.
    pub async fn build(self) -> Result<Server, EmberlinkError> {
        self.config.validate_strict()?;
        let transport = TcpTransport::bind(&self.config.bind_addr).await?;
        let pool = BufferPool::new(self.config.pool.clone());
        let (shutdown, _) = watch::channel(false);

        let state = Arc::new(ServerState {
            config: self.config,
            pool,
            dispatcher: self.dispatcher,
            registry: Arc::new(Mutex::new(SessionRegistry::new())),
            shutdown,
        });
        Ok(Server { transport, state })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound server. Call [`run`](Self::run) to start accepting.
pub struct Server {
    transport: TcpTransport,
    state: Arc<ServerState>,
}

impl Server {
    /// Creates a new builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, EmberlinkError> {
        Ok(self.transport.local_addr()?)
    }

    /// A handle for broadcasting to and stopping the server from other
    /// tasks.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the accept loop until [`ServerHandle::shutdown`] is called.
    ///
    /// Each accepted connection is handled on its own task. Accept errors
    /// are logged and the loop carries on.
    pub async fn run(mut self) -> Result<(), EmberlinkError> {
        let addr = self.transport.local_addr()?;
        tracing::info!(%addr, "emberlink server running");
        let mut shutdown = self.state.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                accepted = self.transport.accept() => accepted,
            };
            match accepted {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(handle_connection(conn, state));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }

        self.transport.shutdown().await?;
        tracing::info!(%addr, "emberlink server stopped");
        Ok(())
    }
}

/// Cloneable handle to a running server.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Every live session.
    pub fn registry(&self) -> &SharedRegistry {
        &self.state.registry
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.state.registry.lock().len()
    }

    /// The buffer pool shared by every session.
    pub fn pool(&self) -> &BufferPool {
        &self.state.pool
    }

    /// Stops accepting and closes every session.
    pub fn shutdown(&self) {
        self.state.shutdown.send_replace(true);
        let closed = self
            .state
            .registry
            .lock()
            .close_all(CloseReason::ServerShutdown);
        tracing::info!(closed, "server shutting down");
    }
}

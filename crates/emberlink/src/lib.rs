//! # Emberlink
//!
//! Encrypted session transport for multiplayer game servers.
//!
//! Emberlink owns everything between the socket and the game: accepting
//! connections, the unencrypted key handshake, per-session encryption,
//! a bounded outbound queue drained by one write pump per client, and
//! two-level opcode routing of inbound packets. Game code supplies
//! handlers and pushes packets with [`ClientSession::send`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use emberlink::prelude::*;
//!
//! # async fn run() -> Result<(), EmberlinkError> {
//! let config = ServerConfig::from_toml(r#"bind_addr = "0.0.0.0:7777""#)?;
//! emberlink::logging::init(&config.log_filter);
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.route(PacketId::Extended(0x0001), StateSet::ANY_OPEN, |ctx, packet| {
//!     let name = packet.reader().read_string()?;
//!     ctx.session.authenticate(name)?;
//!     Ok(())
//! })?;
//!
//! Server::builder()
//!     .config(config)
//!     .dispatcher(dispatcher)
//!     .build()
//!     .await?
//!     .run()
//!     .await
//! # }
//! ```

mod config;
mod dispatch;
mod error;
mod handler;
pub mod logging;
mod server;

use std::sync::Arc;

pub use config::ServerConfig;
pub use dispatch::{Context, DispatchError, Dispatcher, HandlerResult};
pub use error::EmberlinkError;
pub use server::{Server, ServerBuilder, ServerHandle};

pub use emberlink_crypto as crypto;
pub use emberlink_pool as pool;
pub use emberlink_protocol as protocol;
pub use emberlink_session as session;
pub use emberlink_transport as transport;

pub use emberlink_session::ClientSession;

/// The session registry as shared by the server and its handlers.
pub type SharedRegistry = Arc<parking_lot::Mutex<emberlink_session::SessionRegistry>>;

/// Everything a game server usually needs.
pub mod prelude {
    pub use crate::{
        Context, DispatchError, Dispatcher, EmberlinkError, HandlerResult, Server,
        ServerConfig, ServerHandle, SharedRegistry,
    };
    pub use emberlink_pool::{BufferPool, PoolConfig};
    pub use emberlink_protocol::{
        InboundPacket, KeyPacket, PacketId, PacketReader, PacketWriter, ProtocolError,
        ServerPacket,
    };
    pub use emberlink_session::{
        CharacterId, ClientSession, CloseReason, SessionConfig, SessionError, SessionState,
        StateSet,
    };
}

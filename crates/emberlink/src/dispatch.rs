//! Two-level opcode routing for inbound packets.
//!
//! Primary opcodes index a fixed 256-slot table. Opcode `0xFE` never has
//! a slot of its own; its packets are routed by sub-opcode through a
//! second, sparse table.
//!
//! Each route also names the session states in which it is accepted, so
//! a handler for an in-game action never sees a client that has not
//! logged in yet.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use emberlink_protocol::{InboundPacket, PacketId, ProtocolError};
use emberlink_session::{ClientSession, CloseReason, SessionError, SessionState, StateSet};

use crate::SharedRegistry;

/// Errors from routing a packet or running its handler.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No route for this id.
    #[error("no handler for packet {0}")]
    UnknownOpcode(PacketId),

    /// A route exists but not for the session's current state.
    #[error("packet {id} not accepted while {state}")]
    WrongState {
        /// The packet that arrived.
        id: PacketId,
        /// The state the session was in.
        state: SessionState,
    },

    /// The packet body did not decode. Disconnects the session.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session operation inside the handler failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The handler rejected the packet.
    #[error("handler failed: {0}")]
    Handler(String),

    /// `Primary(0xFE)` cannot be routed.
    #[error("packet id {0} cannot be routed")]
    InvalidRoute(PacketId),

    /// A route for this id is already registered.
    #[error("packet {0} already has a handler")]
    DuplicateRoute(PacketId),
}

impl DispatchError {
    /// `true` for errors that mean the client's byte stream can no longer
    /// be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

/// What a handler can reach.
pub struct Context<'a> {
    /// The session the packet arrived on.
    pub session: &'a Arc<ClientSession>,
    /// Every live session.
    pub registry: &'a SharedRegistry,
}

/// Return type of packet handlers.
pub type HandlerResult = Result<(), DispatchError>;

type Handler = Box<dyn Fn(&Context<'_>, InboundPacket<'_>) -> HandlerResult + Send + Sync>;
type DisconnectHook = Box<dyn Fn(&ClientSession, CloseReason) + Send + Sync>;

struct Route {
    states: StateSet,
    handler: Handler,
}

/// Routing table from packet id to handler.
///
/// Built once before the server starts and shared read-only by every
/// connection's read loop.
pub struct Dispatcher {
    primary: Vec<Option<Route>>,
    extended: HashMap<u16, Route>,
    on_disconnect: Option<DisconnectHook>,
}

impl Dispatcher {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            primary: (0..256).map(|_| None).collect(),
            extended: HashMap::new(),
            on_disconnect: None,
        }
    }

    /// Registers `handler` for `id`, accepted while the session is in any
    /// of `states`.
    ///
    /// # Errors
    /// [`DispatchError::InvalidRoute`] for `Primary(0xFE)`,
    /// [`DispatchError::DuplicateRoute`] if `id` already has a handler.
    pub fn route<F>(
        &mut self,
        id: PacketId,
        states: impl Into<StateSet>,
        handler: F,
    ) -> Result<&mut Self, DispatchError>
    where
        F: Fn(&Context<'_>, InboundPacket<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        if !id.is_valid() {
            return Err(DispatchError::InvalidRoute(id));
        }
        let route = Route {
            states: states.into(),
            handler: Box::new(handler),
        };
        let slot = match id {
            PacketId::Primary(op) => &mut self.primary[usize::from(op)],
            PacketId::Extended(sub) => {
                if self.extended.contains_key(&sub) {
                    return Err(DispatchError::DuplicateRoute(id));
                }
                self.extended.insert(sub, route);
                return Ok(self);
            }
        };
        if slot.is_some() {
            return Err(DispatchError::DuplicateRoute(id));
        }
        *slot = Some(route);
        Ok(self)
    }

    /// Sets a hook that runs once per session after it disconnects and
    /// its write pump has stopped.
    pub fn on_disconnect<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&ClientSession, CloseReason) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Box::new(hook));
        self
    }

    /// `true` if `id` has a handler.
    pub fn has_route(&self, id: PacketId) -> bool {
        self.lookup(id).is_some()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.primary.iter().flatten().count() + self.extended.len()
    }

    /// `true` if no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, id: PacketId) -> Option<&Route> {
        match id {
            PacketId::Primary(op) => self.primary[usize::from(op)].as_ref(),
            PacketId::Extended(sub) => self.extended.get(&sub),
        }
    }

    /// Routes one packet to its handler.
    ///
    /// # Errors
    /// [`DispatchError::UnknownOpcode`], [`DispatchError::WrongState`], or
    /// whatever the handler returns.
    pub fn dispatch(&self, ctx: &Context<'_>, packet: InboundPacket<'_>) -> HandlerResult {
        let route = self
            .lookup(packet.id)
            .ok_or(DispatchError::UnknownOpcode(packet.id))?;

        let state = ctx.session.state();
        if !route.states.contains(state) {
            return Err(DispatchError::WrongState {
                id: packet.id,
                state,
            });
        }

        tracing::trace!(
            conn_id = %ctx.session.id(),
            id = %packet.id,
            len = packet.body.len(),
            "dispatching packet"
        );
        (route.handler)(ctx, packet)
    }

    /// Parses a decrypted frame payload and dispatches it.
    ///
    /// # Errors
    /// [`DispatchError::Protocol`] if the payload has no valid id,
    /// otherwise as [`dispatch`](Self::dispatch).
    pub fn dispatch_frame(&self, ctx: &Context<'_>, payload: &[u8]) -> HandlerResult {
        let packet = InboundPacket::parse(payload)?;
        self.dispatch(ctx, packet)
    }

    pub(crate) fn disconnected(&self, session: &ClientSession, reason: CloseReason) {
        if let Some(hook) = &self.on_disconnect {
            hook(session, reason);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("primary", &self.primary.iter().flatten().count())
            .field("extended", &self.extended.len())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .finish()
    }
}

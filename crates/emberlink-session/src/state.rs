//! Session lifecycle states.
//!
//! ```text
//! Connected ──→ Authenticated ──→ InGame
//!     │               │              │
//!     └───────────────┴──────────────┴──→ Disconnected (terminal)
//! ```
//!
//! Transitions only move forward. `Disconnected` is reachable from every
//! state (transport failure, queue overflow, explicit close) and nothing
//! leaves it.

use std::fmt;
use std::ops::BitOr;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Socket accepted, key sent, client not yet logged in.
    Connected = 0,
    /// Account verified; the client is choosing a character.
    Authenticated = 1,
    /// A character is selected and in the world.
    InGame = 2,
    /// Terminal. The session accepts no more packets.
    Disconnected = 3,
}

impl SessionState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connected,
            1 => Self::Authenticated,
            2 => Self::InGame,
            _ => Self::Disconnected,
        }
    }

    /// `true` for every state except `Disconnected`.
    pub fn is_open(self) -> bool {
        self != Self::Disconnected
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::InGame => "in-game",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// A set of [`SessionState`]s, used to say where a packet is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct StateSet(u8);

impl StateSet {
    /// No states.
    pub const EMPTY: Self = Self(0);
    /// Every open state.
    pub const ANY_OPEN: Self = Self(0b0111);

    /// A set holding exactly `state`.
    pub fn only(state: SessionState) -> Self {
        Self(state.bit())
    }

    /// Returns a copy with `state` added.
    pub fn with(self, state: SessionState) -> Self {
        Self(self.0 | state.bit())
    }

    /// Membership test.
    pub fn contains(self, state: SessionState) -> bool {
        self.0 & state.bit() != 0
    }
}

impl From<SessionState> for StateSet {
    fn from(state: SessionState) -> Self {
        Self::only(state)
    }
}

impl BitOr<SessionState> for SessionState {
    type Output = StateSet;

    fn bitor(self, rhs: SessionState) -> StateSet {
        StateSet::only(self).with(rhs)
    }
}

impl BitOr<SessionState> for StateSet {
    type Output = StateSet;

    fn bitor(self, rhs: SessionState) -> StateSet {
        self.with(rhs)
    }
}

/// Id of a player character, as assigned by the game's persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacterId(pub u32);

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "char-{}", self.0)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Someone called `close`.
    Requested,
    /// `send` found the outbound queue full.
    QueueFull,
    /// A socket write failed.
    WriteFailed,
    /// A socket write missed its deadline.
    WriteTimeout,
    /// The peer closed its side or a socket read failed.
    ReadFailed,
    /// The peer sent bytes that break the protocol.
    ProtocolViolation,
    /// No inbound traffic within the idle limit.
    IdleTimeout,
    /// Every handle was dropped and the queue drained.
    Released,
    /// The server is shutting down.
    ServerShutdown,
    /// A packet handler panicked on this session's read task.
    HandlerPanicked,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Requested => "requested",
            Self::QueueFull => "outbound queue full",
            Self::WriteFailed => "write failed",
            Self::WriteTimeout => "write timed out",
            Self::ReadFailed => "read failed",
            Self::ProtocolViolation => "protocol violation",
            Self::IdleTimeout => "idle timeout",
            Self::Released => "released",
            Self::ServerShutdown => "server shutdown",
            Self::HandlerPanicked => "handler panicked",
        };
        f.write_str(text)
    }
}

//! The session registry: every live session, by connection and by
//! character.
//!
//! `SessionRegistry` is a plain map, not a concurrent one. The server
//! wraps it in a mutex; nothing here blocks or awaits, so holding the
//! lock across a broadcast is cheap.

use std::collections::HashMap;
use std::sync::Arc;

use emberlink_transport::ConnectionId;

use crate::{CharacterId, ClientSession, CloseReason, SessionError, SessionState};

/// Outcome of a [`SessionRegistry::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the packet was queued on.
    pub delivered: usize,
    /// Sessions that were skipped or disconnected by the send.
    pub dropped: usize,
}

/// Tracks live sessions.
///
/// ```text
/// register() ──→ enter_world() ──→ remove() / sweep_closed()
///     │               │
///     ▼               ▼
///  by conn id    + by character
/// ```
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<ConnectionId, Arc<ClientSession>>,
    characters: HashMap<CharacterId, ConnectionId>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session. Returns the session previously registered under the
    /// same id, if any.
    pub fn register(&mut self, session: Arc<ClientSession>) -> Option<Arc<ClientSession>> {
        let id = session.id();
        tracing::debug!(conn_id = %id, "session registered");
        self.sessions.insert(id, session)
    }

    /// Removes a session and its character binding.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Arc<ClientSession>> {
        let session = self.sessions.remove(&id)?;
        if let Some(character) = session.character() {
            if self.characters.get(&character) == Some(&id) {
                self.characters.remove(&character);
            }
        }
        tracing::debug!(conn_id = %id, "session removed");
        Some(session)
    }

    /// Looks up a session by connection id.
    pub fn get(&self, id: ConnectionId) -> Option<&Arc<ClientSession>> {
        self.sessions.get(&id)
    }

    /// Moves a registered session into the world as `character` and
    /// indexes it.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`] if `id` is not registered
    /// - [`SessionError::CharacterInUse`] if another open session plays
    ///   `character`
    /// - [`SessionError::InvalidTransition`] if the session is not
    ///   `Authenticated`
    pub fn enter_world(
        &mut self,
        id: ConnectionId,
        character: CharacterId,
    ) -> Result<Arc<ClientSession>, SessionError> {
        let session = self
            .sessions
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))?;

        if let Some(&holder) = self.characters.get(&character) {
            let holder_open = self.sessions.get(&holder).is_some_and(|s| s.is_open());
            if holder != id && holder_open {
                return Err(SessionError::CharacterInUse(character));
            }
        }

        session.enter_world(character)?;
        self.characters.insert(character, id);
        Ok(session)
    }

    /// Finds the session playing `character`.
    pub fn find_by_character(&self, character: CharacterId) -> Option<&Arc<ClientSession>> {
        self.characters
            .get(&character)
            .and_then(|id| self.sessions.get(id))
    }

    /// Queues `payload` on every open session in `InGame`.
    ///
    /// Uses the non-blocking send, so a client with a full queue is
    /// disconnected rather than holding up the rest.
    pub fn broadcast(&self, payload: &[u8]) -> BroadcastReport {
        self.broadcast_where(payload, |s| s.state() == SessionState::InGame)
    }

    /// Queues `payload` on every open session for which `filter` returns
    /// `true`.
    pub fn broadcast_where<F>(&self, payload: &[u8], filter: F) -> BroadcastReport
    where
        F: Fn(&ClientSession) -> bool,
    {
        let mut report = BroadcastReport::default();
        for session in self.sessions.values().filter(|s| filter(s)) {
            match session.send(payload) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(conn_id = %session.id(), error = %e, "broadcast skipped session");
                    report.dropped += 1;
                }
            }
        }
        report
    }

    /// Drops every disconnected session. Returns the ids removed.
    pub fn sweep_closed(&mut self) -> Vec<ConnectionId> {
        let closed: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_open())
            .map(|(id, _)| *id)
            .collect();
        for id in &closed {
            self.remove(*id);
        }
        if !closed.is_empty() {
            tracing::debug!(count = closed.len(), "swept closed sessions");
        }
        closed
    }

    /// Closes every session with `reason`. Sessions stay registered until
    /// removed or swept.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.sessions
            .values()
            .filter(|s| s.close_with(reason))
            .count()
    }

    /// Number of registered sessions, open or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Iterates over registered sessions in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ClientSession>> {
        self.sessions.values()
    }
}

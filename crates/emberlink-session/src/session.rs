//! The per-connection session handle.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use emberlink_crypto::{MAX_PAYLOAD_LEN, OutboundCipher};
use emberlink_pool::{BufferPool, PooledBuffer};
use emberlink_protocol::ServerPacket;
use emberlink_transport::ConnectionId;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::pump::{PumpExit, WritePump};
use crate::{CharacterId, CloseReason, SessionConfig, SessionError, SessionState};

const NO_CHARACTER: u64 = u64::MAX;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between a session handle and its write pump.
pub(crate) struct Shared {
    pub(crate) id: ConnectionId,
    state: AtomicU8,
    close_reason: OnceLock<CloseReason>,
    close_tx: watch::Sender<bool>,
    pub(crate) counters: Counters,
}

impl Shared {
    fn new(id: ConnectionId) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            id,
            state: AtomicU8::new(SessionState::Connected as u8),
            close_reason: OnceLock::new(),
            close_tx,
            counters: Counters::default(),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn advance(&self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| SessionError::InvalidTransition {
                from: SessionState::from_u8(actual),
                to,
            })
    }

    /// Moves to `Disconnected`. Only the call that performs the transition
    /// returns `true`, records its reason and wakes the pump.
    pub(crate) fn close(&self, reason: CloseReason) -> bool {
        let previous = self
            .state
            .swap(SessionState::Disconnected as u8, Ordering::AcqRel);
        if previous == SessionState::Disconnected as u8 {
            return false;
        }
        let _ = self.close_reason.set(reason);
        self.close_tx.send_replace(true);
        tracing::debug!(
            conn_id = %self.id,
            from = %SessionState::from_u8(previous),
            %reason,
            "session disconnected"
        );
        true
    }

    /// Resolves once the session is disconnected.
    pub(crate) async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) queued: AtomicU64,
    pub(crate) written: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) discarded: AtomicU64,
}

impl Counters {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time outbound counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetrics {
    /// Packets accepted into the outbound queue.
    pub packets_queued: u64,
    /// Packets encrypted and written to the socket.
    pub packets_written: u64,
    /// Frame bytes written to the socket.
    pub bytes_written: u64,
    /// Socket writes. Fewer than `packets_written` when batching kicks in.
    pub flushes: u64,
    /// Queued packets dropped unsent because the session closed.
    pub packets_discarded: u64,
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// One connected client.
///
/// Shared as `Arc<ClientSession>` between the read task and any game code
/// that talks to the client. Outbound packets go through a bounded queue
/// to a dedicated write pump that encrypts them in order and writes them
/// to the socket; callers never block on the network.
///
/// Dropping every handle lets the pump flush what is queued and then
/// disconnect. [`close`](Self::close) disconnects at once and discards
/// the queue.
pub struct ClientSession {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<PooledBuffer>,
    pool: BufferPool,
    peer: Option<SocketAddr>,
    account: OnceLock<String>,
    character: AtomicU64,
    queue_capacity: usize,
}

impl ClientSession {
    /// Creates a session and spawns its write pump on the current tokio
    /// runtime.
    ///
    /// `cipher` must be the outbound half for this connection's key. The
    /// first packet sent is written in the clear, so the caller sends the
    /// key packet before anything else.
    pub fn start<W>(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        writer: W,
        cipher: OutboundCipher,
        pool: BufferPool,
        config: &SessionConfig,
    ) -> (Arc<Self>, JoinHandle<PumpExit>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared::new(id));

        let pump = WritePump::new(
            Arc::clone(&shared),
            rx,
            writer,
            cipher,
            pool.clone(),
            config,
        );
        let handle = tokio::spawn(pump.run());

        let session = Arc::new(Self {
            shared,
            outbound: tx,
            pool,
            peer,
            account: OnceLock::new(),
            character: AtomicU64::new(NO_CHARACTER),
            queue_capacity: capacity,
        });
        tracing::debug!(conn_id = %id, ?peer, capacity, "session started");
        (session, handle)
    }

    /// Connection id assigned at accept time.
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Remote address, if the transport reported one.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// `true` until the session is disconnected.
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Account name set by [`authenticate`](Self::authenticate).
    pub fn account(&self) -> Option<&str> {
        self.account.get().map(String::as_str)
    }

    /// Character set by [`enter_world`](Self::enter_world).
    pub fn character(&self) -> Option<CharacterId> {
        match self.character.load(Ordering::Acquire) {
            NO_CHARACTER => None,
            raw => u32::try_from(raw).ok().map(CharacterId),
        }
    }

    /// Why the session closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason.get().copied()
    }

    /// Outbound queue depth.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Snapshot of this session's outbound counters.
    pub fn metrics(&self) -> SessionMetrics {
        let c = &self.shared.counters;
        SessionMetrics {
            packets_queued: c.queued.load(Ordering::Relaxed),
            packets_written: c.written.load(Ordering::Relaxed),
            bytes_written: c.bytes_written.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            packets_discarded: c.discarded.load(Ordering::Relaxed),
        }
    }

    // -- lifecycle ----------------------------------------------------------

    /// `Connected` → `Authenticated`, recording the account name.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] from any other state.
    pub fn authenticate(&self, account: impl Into<String>) -> Result<(), SessionError> {
        self.shared
            .advance(SessionState::Connected, SessionState::Authenticated)?;
        let account = account.into();
        tracing::info!(conn_id = %self.id(), %account, "session authenticated");
        let _ = self.account.set(account);
        Ok(())
    }

    /// `Authenticated` → `InGame`, recording the selected character.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] from any other state.
    pub fn enter_world(&self, character: CharacterId) -> Result<(), SessionError> {
        self.character
            .store(u64::from(character.0), Ordering::Release);
        if let Err(e) = self
            .shared
            .advance(SessionState::Authenticated, SessionState::InGame)
        {
            self.character.store(NO_CHARACTER, Ordering::Release);
            return Err(e);
        }
        tracing::info!(conn_id = %self.id(), %character, "entered world");
        Ok(())
    }

    /// Disconnects the session. Idempotent; returns `true` only for the
    /// call that performed the transition.
    ///
    /// Packets still queued are discarded unsent and nothing more is
    /// written to the socket.
    pub fn close(&self) -> bool {
        self.close_with(CloseReason::Requested)
    }

    /// [`close`](Self::close) with an explicit reason.
    pub fn close_with(&self, reason: CloseReason) -> bool {
        self.shared.close(reason)
    }

    /// Resolves once the session is disconnected, for whatever reason.
    pub async fn closed(&self) {
        self.shared.closed().await;
    }

    // -- sending ------------------------------------------------------------

    /// Queues a packet without waiting.
    ///
    /// The payload is copied into a pooled buffer; the caller keeps
    /// ownership of `payload`. Encryption happens later, on the write
    /// pump, in queue order.
    ///
    /// # Errors
    /// - [`SessionError::Closed`] if the session is disconnected
    /// - [`SessionError::QueueFull`] if the queue is full; the session is
    ///   disconnected before this returns
    /// - [`SessionError::EmptyPayload`] / [`SessionError::PayloadTooLarge`]
    ///   for payloads that cannot be framed
    pub fn send(&self, payload: &[u8]) -> Result<(), SessionError> {
        check_payload(payload)?;
        if !self.is_open() {
            return Err(SessionError::Closed);
        }

        match self.outbound.try_send(self.pool.copy_from(payload)) {
            Ok(()) => {
                Counters::add(&self.shared.counters.queued, 1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    conn_id = %self.id(),
                    capacity = self.queue_capacity,
                    "outbound queue full, disconnecting"
                );
                self.shared.close(CloseReason::QueueFull);
                Err(SessionError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionError::Closed),
        }
    }

    /// Queues a packet, waiting up to `timeout` for room in the queue.
    ///
    /// A timeout leaves the session open. Closing the session while this
    /// waits wakes it with [`SessionError::Closed`].
    ///
    /// # Errors
    /// [`SessionError::Timeout`], [`SessionError::Closed`], or the payload
    /// errors of [`send`](Self::send).
    pub async fn send_sync(&self, payload: &[u8], timeout: Duration) -> Result<(), SessionError> {
        check_payload(payload)?;
        if !self.is_open() {
            return Err(SessionError::Closed);
        }

        let permit = tokio::select! {
            biased;
            () = self.shared.closed() => return Err(SessionError::Closed),
            reserved = tokio::time::timeout(timeout, self.outbound.reserve()) => match reserved {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(SessionError::Closed),
                Err(_) => {
                    tracing::debug!(conn_id = %self.id(), ?timeout, "send_sync timed out");
                    return Err(SessionError::Timeout(timeout));
                }
            },
        };

        // The permit is released unused if the session closed meanwhile.
        if !self.is_open() {
            return Err(SessionError::Closed);
        }
        permit.send(self.pool.copy_from(payload));
        Counters::add(&self.shared.counters.queued, 1);
        Ok(())
    }

    /// Encodes `packet` and queues it with [`send`](Self::send).
    ///
    /// # Errors
    /// [`SessionError::Protocol`] if encoding fails, otherwise as `send`.
    pub fn send_packet<P: ServerPacket>(&self, packet: &P) -> Result<(), SessionError> {
        let bytes = packet.write()?;
        self.send(&bytes)
    }

    /// Encodes `packet` and queues it with [`send_sync`](Self::send_sync).
    ///
    /// # Errors
    /// [`SessionError::Protocol`] if encoding fails, otherwise as
    /// `send_sync`.
    pub async fn send_packet_sync<P: ServerPacket>(
        &self,
        packet: &P,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let bytes = packet.write()?;
        self.send_sync(&bytes, timeout).await
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id())
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("account", &self.account())
            .field("character", &self.character())
            .finish_non_exhaustive()
    }
}

fn check_payload(payload: &[u8]) -> Result<(), SessionError> {
    if payload.is_empty() {
        return Err(SessionError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(SessionError::PayloadTooLarge(payload.len()));
    }
    Ok(())
}

//! Per-connection handler: key exchange, read loop, and teardown.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Generate a session key, start the session and its write pump
//!   2. Queue the key packet (the first frame, sent in the clear)
//!   3. Loop: read a frame → decrypt and verify → dispatch
//!   4. On EOF, error, idle timeout, or close: disconnect, wait for the
//!      pump, then unregister and run the disconnect hook (also on panic)

use std::sync::Arc;
use std::time::Duration;

use emberlink_crypto::{SessionCipher, SessionKey};
use emberlink_pool::PooledBuffer;
use emberlink_protocol::KeyPacket;
use emberlink_session::{ClientSession, CloseReason, FrameError, FrameReader, PumpExit};
use emberlink_transport::Connection;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::dispatch::{Context, DispatchError};
use crate::server::ServerState;

/// Drop guard that unregisters a session and runs the disconnect hook when
/// its handler exits.
///
/// This covers a handler that panics inside a packet route: the session is
/// closed and unregistered during the unwind. The user hook then runs on a
/// fresh task, since a second panic while unwinding would abort.
struct SessionGuard {
    session: Arc<ClientSession>,
    state: Arc<ServerState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let id = self.session.id();
        if std::thread::panicking() {
            tracing::error!(conn_id = %id, "connection handler panicked, disconnecting");
            self.session.close_with(CloseReason::HandlerPanicked);
        }
        self.state.registry.lock().remove(id);

        let reason = self
            .session
            .close_reason()
            .unwrap_or(CloseReason::Requested);
        if std::thread::panicking() {
            let session = Arc::clone(&self.session);
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                state.dispatcher.disconnected(&session, reason);
            });
        } else {
            self.state.dispatcher.disconnected(&self.session, reason);
        }
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<R, W>(conn: Connection<R, W>, state: Arc<ServerState>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Connection {
        id,
        peer,
        reader,
        writer,
    } = conn;

    let key = SessionKey::generate();
    let (outbound, inbound) = SessionCipher::new(&key, state.pool.clone()).split();
    let (session, pump) = ClientSession::start(
        id,
        peer,
        writer,
        outbound,
        state.pool.clone(),
        &state.config.session,
    );

    let hello = KeyPacket {
        version: state.config.protocol_version,
        key: *key.as_bytes(),
    };
    if let Err(e) = session.send_packet(&hello) {
        tracing::warn!(conn_id = %id, error = %e, "failed to queue key packet");
        session.close();
    }

    {
        let mut registry = state.registry.lock();
        registry.register(Arc::clone(&session));
        // Shutdown sets its flag before sweeping the registry, so a session
        // registered after the sweep sees the flag here.
        if *state.shutdown.borrow() {
            session.close_with(CloseReason::ServerShutdown);
        }
    }
    let guard = SessionGuard {
        session: Arc::clone(&session),
        state: Arc::clone(&state),
    };
    tracing::info!(conn_id = %id, ?peer, "client connected");

    let mut framer = FrameReader::new(reader, inbound, state.pool.clone());
    let reason = read_loop(&session, &mut framer, &state).await;
    session.close_with(reason);
    let reason = session.close_reason().unwrap_or(reason);

    match pump.await {
        Ok(PumpExit::Failed(e)) => {
            tracing::debug!(conn_id = %id, error = %e, "write pump failed");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(conn_id = %id, error = %e, "write pump task panicked"),
    }
    drop(guard);

    let metrics = session.metrics();
    tracing::info!(
        conn_id = %id,
        %reason,
        frames_read = framer.frames_read(),
        packets_written = metrics.packets_written,
        packets_discarded = metrics.packets_discarded,
        "client disconnected"
    );
}

/// Reads and dispatches frames until the session should end. Returns why.
async fn read_loop<R>(
    session: &Arc<ClientSession>,
    framer: &mut FrameReader<R>,
    state: &ServerState,
) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    let conn_id = session.id();
    let idle = state.config.read_timeout;

    loop {
        let next = tokio::select! {
            biased;
            () = session.closed() => {
                return session.close_reason().unwrap_or(CloseReason::Requested);
            }
            next = next_frame_within(framer, idle) => next,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!(%conn_id, "peer closed the connection");
                return CloseReason::ReadFailed;
            }
            Err(e) => return close_reason_for(session, &e),
        };

        let ctx = Context {
            session,
            registry: &state.registry,
        };
        match state.dispatcher.dispatch_frame(&ctx, &frame) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                tracing::warn!(%conn_id, error = %e, "malformed packet, disconnecting");
                return CloseReason::ProtocolViolation;
            }
            Err(e @ (DispatchError::UnknownOpcode(_) | DispatchError::WrongState { .. })) => {
                tracing::debug!(%conn_id, error = %e, "packet ignored");
            }
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "handler error");
            }
        }
    }
}

async fn next_frame_within<R>(
    framer: &mut FrameReader<R>,
    idle: Duration,
) -> Result<Option<PooledBuffer>, FrameError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(idle, framer.next_frame())
        .await
        .map_err(|_| FrameError::ReadTimeout(idle))?
}

fn close_reason_for(session: &ClientSession, e: &FrameError) -> CloseReason {
    let conn_id = session.id();
    match e {
        FrameError::ReadTimeout(idle) => {
            tracing::info!(%conn_id, ?idle, "idle timeout");
            CloseReason::IdleTimeout
        }
        FrameError::Transport(e) => {
            tracing::debug!(%conn_id, error = %e, "read failed");
            CloseReason::ReadFailed
        }
        FrameError::Cipher(_) | FrameError::FrameTooShort(_) => {
            tracing::warn!(%conn_id, error = %e, "protocol violation, disconnecting");
            CloseReason::ProtocolViolation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emberlink_pool::BufferPool;
    use emberlink_session::SessionRegistry;
    use emberlink_transport::ConnectionId;
    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::sync::watch;

    use crate::{Dispatcher, ServerConfig};

    fn server_state(dispatcher: Dispatcher, shutting_down: bool) -> Arc<ServerState> {
        let (shutdown, _) = watch::channel(shutting_down);
        Arc::new(ServerState {
            config: ServerConfig::default(),
            pool: BufferPool::default(),
            dispatcher,
            registry: Arc::new(Mutex::new(SessionRegistry::new())),
            shutdown,
        })
    }

    #[tokio::test]
    async fn test_connection_registered_after_shutdown_is_closed() {
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        let seen = Arc::clone(&reasons);
        dispatcher.on_disconnect(move |_, reason| seen.lock().push(reason));
        let state = server_state(dispatcher, true);

        let (server, mut client) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let conn = Connection {
            id: ConnectionId::new(42),
            peer: None,
            reader,
            writer,
        };
        tokio::time::timeout(
            Duration::from_secs(1),
            handle_connection(conn, Arc::clone(&state)),
        )
        .await
        .expect("handler should exit without waiting for the peer");

        assert!(state.registry.lock().is_empty());
        assert_eq!(*reasons.lock(), [CloseReason::ServerShutdown]);
        let mut wire = Vec::new();
        client.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_read_loop_ends_when_peer_hangs_up() {
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        let seen = Arc::clone(&reasons);
        dispatcher.on_disconnect(move |_, reason| seen.lock().push(reason));
        let state = server_state(dispatcher, false);

        let (server, client) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let conn = Connection {
            id: ConnectionId::new(43),
            peer: None,
            reader,
            writer,
        };
        drop(client);
        handle_connection(conn, Arc::clone(&state)).await;

        assert!(state.registry.lock().is_empty());
        assert_eq!(reasons.lock().len(), 1);
    }
}

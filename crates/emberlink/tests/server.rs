//! End-to-end tests: a real server on a loopback port and hand-rolled
//! clients that speak the wire protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use emberlink::crypto::{OutboundCipher, SessionCipher, SessionKey};
use emberlink::prelude::*;
use emberlink::session::FrameReader;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

// =========================================================================
// Test server
// =========================================================================

const ECHO: PacketId = PacketId::Primary(0x01);
const ENTER_WORLD: PacketId = PacketId::Primary(0x02);
const IN_GAME_PING: PacketId = PacketId::Primary(0x10);
const BUGGY: PacketId = PacketId::Primary(0x07);
const LOGIN: PacketId = PacketId::Extended(0x0001);

fn dispatcher(disconnects: Arc<AtomicUsize>) -> Dispatcher {
    let mut d = Dispatcher::new();
    d.route(ECHO, StateSet::ANY_OPEN, |ctx, packet| {
        let mut w = PacketWriter::new();
        w.write_u8(0x81).write_bytes(packet.body);
        ctx.session.send(w.as_slice())?;
        Ok(())
    })
    .unwrap()
    .route(LOGIN, SessionState::Connected, |ctx, packet| {
        let account = packet.reader().read_string()?;
        ctx.session.authenticate(account)?;
        ctx.session.send(&[0x82])?;
        Ok(())
    })
    .unwrap()
    .route(ENTER_WORLD, SessionState::Authenticated, |ctx, packet| {
        let character = CharacterId(packet.reader().read_u32()?);
        ctx.registry.lock().enter_world(ctx.session.id(), character)?;
        ctx.session.send(&[0x83])?;
        Ok(())
    })
    .unwrap()
    .route(IN_GAME_PING, SessionState::InGame, |ctx, _| {
        ctx.session.send(&[0x90])?;
        Ok(())
    })
    .unwrap()
    .route(BUGGY, StateSet::ANY_OPEN, |_, _| panic!("game bug"))
    .unwrap();
    d.on_disconnect(move |_, _| {
        disconnects.fetch_add(1, Ordering::SeqCst);
    });
    d
}

struct TestServer {
    addr: SocketAddr,
    handle: ServerHandle,
    disconnects: Arc<AtomicUsize>,
}

async fn start_server(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let mut config = ServerConfig::default();
    config.bind_addr = "127.0.0.1:0".into();
    configure(&mut config);

    let disconnects = Arc::new(AtomicUsize::new(0));
    let server = Server::builder()
        .config(config)
        .dispatcher(dispatcher(Arc::clone(&disconnects)))
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    tokio::spawn(server.run());
    TestServer {
        addr,
        handle,
        disconnects,
    }
}

// =========================================================================
// Test client
// =========================================================================

struct TestClient {
    key: KeyPacket,
    frames: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    out: OutboundCipher,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.expect("should connect");
        let mut hello = [0u8; 2 + KeyPacket::ENCODED_LEN];
        stream.read_exact(&mut hello).await.unwrap();
        assert_eq!(usize::from(u16::from_le_bytes([hello[0], hello[1]])), hello.len());
        let key = KeyPacket::parse(&hello[2..]).unwrap();

        let pool = BufferPool::default();
        let session_key = SessionKey::from_bytes(key.key);
        let (out, inbound) = SessionCipher::for_client(&session_key, pool.clone()).split();
        let (reader, writer) = stream.into_split();
        Self {
            key,
            frames: FrameReader::new(reader, inbound, pool),
            writer,
            out,
        }
    }

    async fn send(&mut self, payload: &[u8]) {
        let frame = self.out.encrypt_to_pooled(payload).unwrap();
        self.writer.write_all(&frame).await.unwrap();
    }

    async fn recv(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(2), self.frames.next_frame())
            .await
            .expect("reply should arrive")
            .expect("frame should verify")
            .expect("connection should be open")
            .to_vec()
    }

    /// `true` once the server has closed the connection.
    async fn sees_eof(&mut self) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(2), self.frames.next_frame()).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }

    async fn login(&mut self, account: &str, character: u32) {
        let mut w = PacketWriter::new();
        w.write_packet_id(LOGIN).write_string(account);
        self.send(w.as_slice()).await;
        assert_eq!(self.recv().await, [0x82]);

        let mut w = PacketWriter::new();
        w.write_packet_id(ENTER_WORLD).write_u32(character);
        self.send(w.as_slice()).await;
        assert_eq!(self.recv().await, [0x83]);
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_key_packet_is_first_and_unencrypted() {
    let server = start_server(|c| c.protocol_version = 7).await;
    let client = TestClient::connect(server.addr).await;
    assert_eq!(client.key.version, 7);
    assert_ne!(client.key.key, [0u8; 16]);
}

#[tokio::test]
async fn test_each_connection_gets_its_own_key() {
    let server = start_server(|_| {}).await;
    let a = TestClient::connect(server.addr).await;
    let b = TestClient::connect(server.addr).await;
    assert_ne!(a.key.key, b.key.key);
}

#[tokio::test]
async fn test_echo_round_trips_through_the_cipher() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(server.addr).await;
    for i in 0..10u8 {
        client.send(&[0x01, i, i.wrapping_mul(3), 0xFF]).await;
        assert_eq!(client.recv().await, [0x81, i, i.wrapping_mul(3), 0xFF]);
    }
}

#[tokio::test]
async fn test_wrong_state_and_unknown_packets_are_ignored() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(server.addr).await;

    client.send(&[IN_GAME_PING.opcode()]).await;
    client.send(&[0x77]).await;
    client.send(&[0x01, 0x42]).await;
    // Only the echo answers; the session survived the ignored packets.
    assert_eq!(client.recv().await, [0x81, 0x42]);

    client.login("alice", 11).await;
    client.send(&[IN_GAME_PING.opcode()]).await;
    assert_eq!(client.recv().await, [0x90]);
}

#[tokio::test]
async fn test_checksum_violation_disconnects() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(server.addr).await;
    assert!(eventually(|| server.handle.session_count() == 1).await);

    let mut frame = client.out.encrypt_to_pooled(&[0x01, 1, 2, 3]).unwrap().to_vec();
    frame[3] ^= 0x80;
    client.writer.write_all(&frame).await.unwrap();

    assert!(client.sees_eof().await);
    assert!(eventually(|| server.handle.session_count() == 0).await);
    assert!(eventually(|| server.disconnects.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn test_truncated_packet_body_disconnects() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(server.addr).await;
    // An extended id missing half of its sub-opcode.
    client.send(&[0xFE, 0x01]).await;
    assert!(client.sees_eof().await);
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    let server = start_server(|c| c.read_timeout = Duration::from_millis(100)).await;
    let mut client = TestClient::connect(server.addr).await;
    assert!(client.sees_eof().await);
    assert!(eventually(|| server.disconnects.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn test_client_drop_runs_disconnect_hook_once() {
    let server = start_server(|_| {}).await;
    let client = TestClient::connect(server.addr).await;
    assert!(eventually(|| server.handle.session_count() == 1).await);
    drop(client);

    assert!(eventually(|| server.handle.session_count() == 0).await);
    assert!(eventually(|| server.disconnects.load(Ordering::SeqCst) == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_panicking_handler_still_tears_the_session_down() {
    let server = start_server(|_| {}).await;
    let mut client = TestClient::connect(server.addr).await;
    let mut bystander = TestClient::connect(server.addr).await;
    assert!(eventually(|| server.handle.session_count() == 2).await);

    client.send(&[BUGGY.opcode()]).await;
    assert!(client.sees_eof().await);
    assert!(eventually(|| server.handle.session_count() == 1).await);
    assert!(eventually(|| server.disconnects.load(Ordering::SeqCst) == 1).await);

    // Other sessions are unaffected.
    bystander.send(&[0x01, 0x09]).await;
    assert_eq!(bystander.recv().await, [0x81, 0x09]);
}

#[tokio::test]
async fn test_broadcast_reaches_every_player_in_game() {
    let server = start_server(|_| {}).await;
    let mut alice = TestClient::connect(server.addr).await;
    let mut bob = TestClient::connect(server.addr).await;
    let mut lurker = TestClient::connect(server.addr).await;
    alice.login("alice", 1).await;
    bob.login("bob", 2).await;

    let report = server.handle.registry().lock().broadcast(&[0xA0, 0x01]);
    assert_eq!(report.delivered, 2);
    assert_eq!(alice.recv().await, [0xA0, 0x01]);
    assert_eq!(bob.recv().await, [0xA0, 0x01]);

    // The lurker never entered the world and got nothing.
    lurker.send(&[0x01, 0x05]).await;
    assert_eq!(lurker.recv().await, [0x81, 0x05]);
}

#[tokio::test]
async fn test_same_character_cannot_enter_twice() {
    let server = start_server(|_| {}).await;
    let mut alice = TestClient::connect(server.addr).await;
    alice.login("alice", 9).await;

    let mut imposter = TestClient::connect(server.addr).await;
    let mut w = PacketWriter::new();
    w.write_packet_id(LOGIN).write_string("mallory");
    imposter.send(w.as_slice()).await;
    assert_eq!(imposter.recv().await, [0x82]);

    let mut w = PacketWriter::new();
    w.write_packet_id(ENTER_WORLD).write_u32(9);
    imposter.send(w.as_slice()).await;
    // Handler errors are logged; the session stays open.
    imposter.send(&[0x01, 0x00]).await;
    assert_eq!(imposter.recv().await, [0x81, 0x00]);
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let server = start_server(|_| {}).await;
    let mut a = TestClient::connect(server.addr).await;
    let mut b = TestClient::connect(server.addr).await;
    assert!(eventually(|| server.handle.session_count() == 2).await);

    server.handle.shutdown();
    assert!(a.sees_eof().await);
    assert!(b.sees_eof().await);
    assert!(eventually(|| server.handle.session_count() == 0).await);
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let mut config = ServerConfig::default();
    config.session.queue_capacity = 0;
    let result = Server::builder().config(config).build().await;
    assert!(matches!(result, Err(EmberlinkError::Config(_))));
}

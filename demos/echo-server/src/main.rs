use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use emberlink::prelude::*;

// ---------------------------------------------------------------------------
// Packet ids
// ---------------------------------------------------------------------------

const ECHO: PacketId = PacketId::Primary(0x01);
const ENTER_WORLD: PacketId = PacketId::Primary(0x02);
const SAY: PacketId = PacketId::Primary(0x20);
const LOGIN: PacketId = PacketId::Extended(0x0001);

const ECHO_REPLY: u8 = 0x81;
const LOGIN_OK: u8 = 0x82;
const WORLD_ENTERED: u8 = 0x83;
const CHAT: u8 = 0x4A;

// ---------------------------------------------------------------------------
// Server packets
// ---------------------------------------------------------------------------

struct LoginOk {
    online: u32,
}

impl ServerPacket for LoginOk {
    fn write(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = PacketWriter::with_capacity(5);
        w.write_u8(LOGIN_OK).write_u32(self.online);
        Ok(w.into_vec())
    }
}

struct Chat<'a> {
    from: &'a str,
    text: &'a str,
}

impl ServerPacket for Chat<'_> {
    fn write(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = PacketWriter::with_capacity(5 + 2 * (self.from.len() + self.text.len()));
        w.write_u8(CHAT).write_string(self.from).write_string(self.text);
        Ok(w.into_vec())
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

fn routes(online: Arc<AtomicUsize>) -> Result<Dispatcher, DispatchError> {
    let mut d = Dispatcher::new();

    d.route(ECHO, StateSet::ANY_OPEN, |ctx, packet| {
        let mut w = PacketWriter::with_capacity(1 + packet.body.len());
        w.write_u8(ECHO_REPLY).write_bytes(packet.body);
        ctx.session.send(w.as_slice())?;
        Ok(())
    })?;

    let counter = Arc::clone(&online);
    d.route(LOGIN, SessionState::Connected, move |ctx, packet| {
        let account = packet.reader().read_string()?;
        if account.is_empty() {
            return Err(DispatchError::Handler("empty account name".into()));
        }
        ctx.session.authenticate(account)?;
        let online = counter.fetch_add(1, Ordering::Relaxed) + 1;
        ctx.session.send_packet(&LoginOk {
            online: u32::try_from(online).unwrap_or(u32::MAX),
        })?;
        Ok(())
    })?;

    d.route(ENTER_WORLD, SessionState::Authenticated, |ctx, packet| {
        let character = CharacterId(packet.reader().read_u32()?);
        ctx.registry.lock().enter_world(ctx.session.id(), character)?;
        ctx.session.send(&[WORLD_ENTERED])?;
        Ok(())
    })?;

    d.route(SAY, SessionState::InGame, |ctx, packet| {
        let text = packet.reader().read_string()?;
        let from = ctx.session.account().unwrap_or("?");
        let bytes = Chat { from, text: &text }.write()?;
        let report = ctx.registry.lock().broadcast(&bytes);
        tracing::debug!(from, delivered = report.delivered, "chat");
        Ok(())
    })?;

    d.on_disconnect(move |session, reason| {
        if session.account().is_some() {
            online.fetch_sub(1, Ordering::Relaxed);
        }
        tracing::info!(conn_id = %session.id(), %reason, "player left");
    });

    Ok(d)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    emberlink::logging::init(&config.log_filter);

    let server = Server::builder()
        .config(config)
        .dispatcher(routes(Arc::new(AtomicUsize::new(0)))?)
        .build()
        .await?;
    tracing::info!(addr = %server.local_addr()?, "echo server ready");

    let handle = server.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}

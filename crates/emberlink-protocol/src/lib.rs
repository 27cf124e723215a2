//! Wire protocol primitives for Emberlink.
//!
//! This crate defines how individual packet fields look on the wire:
//!
//! - **Writer / Reader** ([`PacketWriter`], [`PacketReader`]) — fixed-width
//!   little-endian integers, IEEE-754 doubles, and null-terminated UTF-16LE
//!   strings.
//! - **Packet ids** ([`PacketId`]) — a one-byte opcode, or the extended
//!   marker `0xFE` followed by a two-byte sub-opcode.
//! - **Handshake** ([`KeyPacket`]) — the unencrypted first packet that
//!   carries the session key.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets, encryption, or
//! sessions. Game packet encoders (outside this workspace) build their
//! bytes with [`PacketWriter`] and hand them over through the
//! [`ServerPacket`] trait.
//!
//! ```text
//! Packet encoders → Protocol (bytes) → Session (queue, cipher, socket)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod error;
mod packet;
mod reader;
mod writer;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::ProtocolError;
pub use packet::{
    EXTENDED_OPCODE, InboundPacket, KEY_LEN, KEY_PACKET_OPCODE, KeyPacket,
    PacketId, ServerPacket,
};
pub use reader::PacketReader;
pub use writer::PacketWriter;

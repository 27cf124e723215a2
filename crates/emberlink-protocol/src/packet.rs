//! Packet identity and the handshake packet.
//!
//! Every packet starts with a one-byte opcode. The value
//! [`EXTENDED_OPCODE`] (`0xFE`) is not a packet of its own: it says "the
//! real id is the little-endian `u16` that follows". [`PacketId`] models
//! both shapes so routing code never has to re-check the marker.
//!
//! ```text
//! primary:   [opcode: 1] [fields ...]
//! extended:  [0xFE: 1] [sub-opcode: 2 LE] [fields ...]
//! ```

use std::fmt;

use crate::{PacketReader, PacketWriter, ProtocolError};

/// Opcode byte that announces a two-byte sub-opcode.
pub const EXTENDED_OPCODE: u8 = 0xFE;

/// Opcode of the server's handshake [`KeyPacket`].
pub const KEY_PACKET_OPCODE: u8 = 0x00;

/// Length of a session key in bytes.
pub const KEY_LEN: usize = 16;

/// The id of a packet: either a primary opcode or an extended sub-opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketId {
    /// A plain opcode in `0x00..=0xFF`, other than [`EXTENDED_OPCODE`].
    Primary(u8),
    /// A sub-opcode carried behind [`EXTENDED_OPCODE`].
    Extended(u16),
}

impl PacketId {
    /// The leading opcode byte as it appears on the wire.
    pub fn opcode(self) -> u8 {
        match self {
            Self::Primary(op) => op,
            Self::Extended(_) => EXTENDED_OPCODE,
        }
    }

    /// The sub-opcode, for extended ids.
    pub fn sub_opcode(self) -> Option<u16> {
        match self {
            Self::Primary(_) => None,
            Self::Extended(sub) => Some(sub),
        }
    }

    /// Bytes the id occupies on the wire (1 or 3).
    pub fn encoded_len(self) -> usize {
        match self {
            Self::Primary(_) => 1,
            Self::Extended(_) => 3,
        }
    }

    /// `false` for `Primary(0xFE)`, which cannot be encoded unambiguously.
    pub fn is_valid(self) -> bool {
        self != Self::Primary(EXTENDED_OPCODE)
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary(op) => write!(f, "0x{op:02X}"),
            Self::Extended(sub) => {
                write!(f, "0x{EXTENDED_OPCODE:02X}:0x{sub:04X}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound packets
// ---------------------------------------------------------------------------

/// A decrypted client packet, split into its id and its body.
///
/// The body borrows from the frame buffer. Handlers decode it with
/// [`InboundPacket::reader`].
#[derive(Debug, Clone, Copy)]
pub struct InboundPacket<'a> {
    /// Which packet this is.
    pub id: PacketId,
    /// Field bytes after the id.
    pub body: &'a [u8],
}

impl<'a> InboundPacket<'a> {
    /// Splits a decrypted frame payload into id and body.
    ///
    /// # Errors
    /// [`ProtocolError::ShortBuffer`] if the payload is empty or an
    /// extended id is missing its sub-opcode.
    pub fn parse(payload: &'a [u8]) -> Result<Self, ProtocolError> {
        let mut reader = PacketReader::new(payload);
        let id = reader.read_packet_id()?;
        Ok(Self {
            id,
            body: reader.read_rest(),
        })
    }

    /// A reader over the body.
    pub fn reader(&self) -> PacketReader<'a> {
        PacketReader::new(self.body)
    }
}

// ---------------------------------------------------------------------------
// Outbound packets
// ---------------------------------------------------------------------------

/// Anything that can encode itself as a complete packet.
///
/// The returned bytes start at the opcode. The transport treats them as
/// opaque; it never looks inside.
pub trait ServerPacket: Send + Sync {
    /// Encodes the packet.
    ///
    /// # Errors
    /// Implementations return a [`ProtocolError`] if a field cannot be
    /// represented (for example a collection longer than its count
    /// field allows).
    fn write(&self) -> Result<Vec<u8>, ProtocolError>;
}

/// The first packet on every connection: protocol version and the
/// symmetric key for the rest of the session. Sent unencrypted.
///
/// ```text
/// [opcode: 1] [version: 1] [key: 16]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPacket {
    /// Protocol version the server speaks.
    pub version: u8,
    /// Session key.
    pub key: [u8; KEY_LEN],
}

impl KeyPacket {
    /// Size of the encoded packet in bytes.
    pub const ENCODED_LEN: usize = 2 + KEY_LEN;

    /// Decodes a key packet, as a client would.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] for a wrong opcode,
    /// [`ProtocolError::ShortBuffer`] for a truncated packet.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = PacketReader::new(bytes);
        let opcode = reader.read_u8()?;
        if opcode != KEY_PACKET_OPCODE {
            return Err(ProtocolError::InvalidMessage(format!(
                "expected key packet opcode 0x{KEY_PACKET_OPCODE:02X}, got 0x{opcode:02X}"
            )));
        }
        let version = reader.read_u8()?;
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(reader.read_bytes(KEY_LEN)?);
        Ok(Self { version, key })
    }
}

impl ServerPacket for KeyPacket {
    fn write(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = PacketWriter::with_capacity(Self::ENCODED_LEN);
        w.write_u8(KEY_PACKET_OPCODE)
            .write_u8(self.version)
            .write_bytes(&self.key);
        Ok(w.into_vec())
    }
}

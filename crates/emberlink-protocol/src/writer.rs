//! Fixed-width little-endian field writer.
//!
//! Every outbound packet body is built with a [`PacketWriter`]. The wire
//! rules are simple and never vary:
//!
//! - integers are little-endian and fixed width (1, 2, 4 or 8 bytes)
//! - doubles are IEEE-754, little-endian
//! - strings are UTF-16LE followed by a single null code unit
//!
//! The writer is backed by a growable [`BytesMut`]. Callers pre-size it
//! with their best estimate ([`PacketWriter::with_capacity`]); if the
//! estimate is short the buffer grows, it is never truncated.

use bytes::{BufMut, Bytes, BytesMut};

use crate::PacketId;

/// Default capacity for [`PacketWriter::new`].
const DEFAULT_CAPACITY: usize = 64;

/// Builds a packet body field by field.
///
/// Methods return `&mut Self` so fields can be chained:
///
/// ```rust
/// use emberlink_protocol::PacketWriter;
///
/// let mut w = PacketWriter::with_capacity(16);
/// w.write_u8(0x4A).write_i32(-1).write_string("hi");
/// assert_eq!(w.len(), 1 + 4 + 6);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    /// Creates a writer with a small default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a writer pre-sized for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Writes a boolean as one byte (0 or 1).
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    /// Writes an unsigned 16-bit integer.
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    /// Writes a signed 16-bit integer.
    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16_le(value);
        self
    }

    /// Writes an unsigned 32-bit integer.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    /// Writes a signed 32-bit integer.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32_le(value);
        self
    }

    /// Writes an unsigned 64-bit integer.
    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    /// Writes a signed 64-bit integer.
    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64_le(value);
        self
    }

    /// Writes an IEEE-754 double.
    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.buf.put_f64_le(value);
        self
    }

    /// Writes raw bytes with no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    /// Writes `value` as UTF-16LE followed by a null code unit.
    ///
    /// An empty string is exactly two bytes. Interior NUL characters are
    /// written as-is and will terminate the string early on the reading
    /// side.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.buf.reserve((value.len() + 1) * 2);
        for unit in value.encode_utf16() {
            self.buf.put_u16_le(unit);
        }
        self.buf.put_u16_le(0);
        self
    }

    /// Writes a packet id: the opcode byte, then the little-endian
    /// sub-opcode when the id is extended.
    pub fn write_packet_id(&mut self, id: PacketId) -> &mut Self {
        debug_assert!(
            id.is_valid(),
            "primary packet id must not use the extended marker"
        );
        self.write_u8(id.opcode());
        if let Some(sub) = id.sub_opcode() {
            self.write_u16(sub);
        }
        self
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer, returning its bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    /// Consumes the writer, returning its bytes without copying.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

//! Fixed-width little-endian field reader.
//!
//! [`PacketReader`] is the mirror of [`PacketWriter`](crate::PacketWriter).
//! It borrows the frame it reads from and never copies except to build
//! strings. Every read checks the remaining length first and fails with
//! [`ProtocolError::ShortBuffer`] instead of panicking, because inbound
//! bytes come from an untrusted client.

use crate::{EXTENDED_OPCODE, PacketId, ProtocolError};

/// Reads packet fields from a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Current offset from the start of the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(ProtocolError::ShortBuffer {
                needed: n,
                remaining,
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    /// Reads a one-byte boolean. Any non-zero value is `true`.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads an unsigned 16-bit integer.
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.array().map(u16::from_le_bytes)
    }

    /// Reads a signed 16-bit integer.
    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        self.array().map(i16::from_le_bytes)
    }

    /// Reads an unsigned 32-bit integer.
    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.array().map(u32::from_le_bytes)
    }

    /// Reads a signed 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.array().map(i32::from_le_bytes)
    }

    /// Reads an unsigned 64-bit integer.
    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.array().map(u64::from_le_bytes)
    }

    /// Reads a signed 64-bit integer.
    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        self.array().map(i64::from_le_bytes)
    }

    /// Reads an IEEE-754 double.
    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        self.array().map(f64::from_le_bytes)
    }

    /// Reads exactly `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(len)
    }

    /// Consumes and returns everything left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Reads a null-terminated UTF-16LE string.
    ///
    /// A missing terminator is a [`ProtocolError::ShortBuffer`]; the
    /// reader's position is left unchanged in that case.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let start = self.pos;
        let mut units = Vec::new();
        loop {
            let unit = match self.read_u16() {
                Ok(unit) => unit,
                Err(e) => {
                    self.pos = start;
                    return Err(e);
                }
            };
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| ProtocolError::InvalidString)
    }

    /// Reads a packet id: the opcode byte and, under the extended
    /// marker, the little-endian sub-opcode that follows it.
    pub fn read_packet_id(&mut self) -> Result<PacketId, ProtocolError> {
        let opcode = self.read_u8()?;
        if opcode == EXTENDED_OPCODE {
            Ok(PacketId::Extended(self.read_u16()?))
        } else {
            Ok(PacketId::Primary(opcode))
        }
    }
}

//! The per-session stream cipher.
//!
//! Each frame body is `payload || checksum` where the checksum is the XOR
//! of the payload read as little-endian `u32` words. The body is then
//! passed through a rolling XOR keyed by the 16-byte session key, and the
//! `u32` at key bytes 8..12 is advanced by the body length so no two
//! frames share a keystream.
//!
//! ```text
//! frame:  [length: u16 LE, header included] [encrypted(payload || checksum)]
//! ```
//!
//! The very first frame a server sends is the handshake key packet. It
//! goes out as `[length][payload]` with no XOR and no checksum, and does
//! not advance the key.
//!
//! Inbound and outbound directions keep separate key state, so the read
//! task and the write pump can each own one half with no locking.

use std::fmt;

use emberlink_pool::{BufferPool, PooledBuffer};

use crate::{CHECKSUM_LEN, CipherError, FRAME_HEADER_LEN, MAX_FRAME_LEN, SessionKey};

/// XOR of `payload` read as little-endian `u32` words, zero-padded.
pub fn checksum(payload: &[u8]) -> u32 {
    payload.chunks(4).fold(0u32, |acc, chunk| {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        acc ^ u32::from_le_bytes(word)
    })
}

// ---------------------------------------------------------------------------
// Key state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct KeyState {
    key: [u8; 16],
}

impl KeyState {
    fn new(key: &SessionKey) -> Self {
        Self {
            key: *key.as_bytes(),
        }
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        let mut prev = 0u8;
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.key[i & 15] ^ prev;
            prev = *byte;
        }
        self.advance(data.len());
    }

    fn decrypt(&mut self, data: &mut [u8]) {
        let mut prev = 0u8;
        for (i, byte) in data.iter_mut().enumerate() {
            let cipher = *byte;
            *byte = cipher ^ self.key[i & 15] ^ prev;
            prev = cipher;
        }
        self.advance(data.len());
    }

    fn advance(&mut self, len: usize) {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.key[8..12]);
        let next = u32::from_le_bytes(word).wrapping_add(len as u32);
        self.key[8..12].copy_from_slice(&next.to_le_bytes());
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Encrypting half of a session cipher. Owned by the write pump.
pub struct OutboundCipher {
    state: KeyState,
    started: bool,
    pool: BufferPool,
}

impl OutboundCipher {
    /// Creates the server-side outbound half. Its first frame is sent in
    /// the clear.
    pub fn new(key: &SessionKey, pool: BufferPool) -> Self {
        Self {
            state: KeyState::new(key),
            started: false,
            pool,
        }
    }

    /// Creates an outbound half that encrypts from the very first frame,
    /// as a client does once it has read the key packet.
    pub fn keyed(key: &SessionKey, pool: BufferPool) -> Self {
        Self {
            started: true,
            ..Self::new(key, pool)
        }
    }

    /// `true` once the clear-text first frame has been produced.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Frames and encrypts `payload` into a buffer taken from the pool.
    ///
    /// `payload` itself is never modified. The returned buffer holds the
    /// complete wire frame, length prefix included.
    ///
    /// # Errors
    /// [`CipherError::FrameTooLarge`] if the frame would exceed 65 535
    /// bytes. The key state is left untouched in that case.
    pub fn encrypt_to_pooled(
        &mut self,
        payload: &[u8],
    ) -> Result<PooledBuffer, CipherError> {
        let trailer = if self.started { CHECKSUM_LEN } else { 0 };
        let frame_len = FRAME_HEADER_LEN + payload.len() + trailer;
        if frame_len > MAX_FRAME_LEN {
            return Err(CipherError::FrameTooLarge(frame_len));
        }

        let mut frame = self.pool.get(frame_len);
        frame.extend_from_slice(&(frame_len as u16).to_le_bytes());
        frame.extend_from_slice(payload);

        if !self.started {
            self.started = true;
            tracing::trace!(len = frame_len, "first frame sent in the clear");
            return Ok(frame);
        }

        frame.extend_from_slice(&checksum(payload).to_le_bytes());
        self.state.encrypt(&mut frame[FRAME_HEADER_LEN..]);
        Ok(frame)
    }
}

impl fmt::Debug for OutboundCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundCipher")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Decrypting half of a session cipher. Owned by the read task.
#[derive(Clone)]
pub struct InboundCipher {
    state: KeyState,
}

impl InboundCipher {
    /// Creates the inbound half for `key`.
    pub fn new(key: &SessionKey) -> Self {
        Self {
            state: KeyState::new(key),
        }
    }

    /// Decrypts a frame body (everything after the length prefix) in
    /// place and verifies its checksum.
    ///
    /// Returns the payload length; the payload is `body[..len]`.
    ///
    /// # Errors
    /// - [`CipherError::Malformed`] if the body cannot hold a checksum
    /// - [`CipherError::ChecksumMismatch`] if the checksum is wrong
    pub fn decrypt_in_place(&mut self, body: &mut [u8]) -> Result<usize, CipherError> {
        if body.len() < CHECKSUM_LEN {
            return Err(CipherError::Malformed(body.len()));
        }
        self.state.decrypt(body);

        let payload_len = body.len() - CHECKSUM_LEN;
        let (payload, trailer) = body.split_at(payload_len);
        let mut carried = [0u8; 4];
        carried.copy_from_slice(trailer);
        let actual = u32::from_le_bytes(carried);
        let expected = checksum(payload);
        if expected != actual {
            return Err(CipherError::ChecksumMismatch { expected, actual });
        }
        Ok(payload_len)
    }
}

impl fmt::Debug for InboundCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundCipher").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SessionCipher
// ---------------------------------------------------------------------------

/// Both halves of a session's cipher, keyed from one [`SessionKey`].
///
/// A session splits this at start-up: the write pump takes the
/// [`OutboundCipher`] and the read task takes the [`InboundCipher`].
#[derive(Debug)]
pub struct SessionCipher {
    outbound: OutboundCipher,
    inbound: InboundCipher,
}

impl SessionCipher {
    /// Server-side cipher: the first outbound frame goes out in the clear.
    pub fn new(key: &SessionKey, pool: BufferPool) -> Self {
        Self {
            outbound: OutboundCipher::new(key, pool),
            inbound: InboundCipher::new(key),
        }
    }

    /// Client-side cipher: encrypts from the first outbound frame.
    pub fn for_client(key: &SessionKey, pool: BufferPool) -> Self {
        Self {
            outbound: OutboundCipher::keyed(key, pool),
            inbound: InboundCipher::new(key),
        }
    }

    /// See [`OutboundCipher::encrypt_to_pooled`].
    pub fn encrypt_to_pooled(
        &mut self,
        payload: &[u8],
    ) -> Result<PooledBuffer, CipherError> {
        self.outbound.encrypt_to_pooled(payload)
    }

    /// See [`InboundCipher::decrypt_in_place`].
    pub fn decrypt_in_place(&mut self, body: &mut [u8]) -> Result<usize, CipherError> {
        self.inbound.decrypt_in_place(body)
    }

    /// Separates the two directions.
    pub fn split(self) -> (OutboundCipher, InboundCipher) {
        (self.outbound, self.inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SessionKey {
        SessionKey::from_bytes(core::array::from_fn(|i| seed.wrapping_mul(31).wrapping_add(i as u8)))
    }

    fn body(frame: &[u8]) -> Vec<u8> {
        frame[FRAME_HEADER_LEN..].to_vec()
    }

    #[test]
    fn test_checksum_xor_folds_padded_words() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 0, 0, 0]), 1);
        assert_eq!(checksum(&[1, 0, 0, 0, 1, 0, 0, 0]), 0);
        // Trailing partial word is zero-padded.
        assert_eq!(checksum(&[0, 0, 0, 0, 0xAB]), 0xAB);
    }

    #[test]
    fn test_first_frame_is_clear_and_unchecksummed() {
        let pool = BufferPool::default();
        let mut out = OutboundCipher::new(&key(1), pool);
        assert!(!out.is_started());

        let frame = out.encrypt_to_pooled(&[0x00, 0x01, 0x02]).unwrap();
        assert_eq!(&frame[..], &[5, 0, 0x00, 0x01, 0x02]);
        assert!(out.is_started());
    }

    #[test]
    fn test_first_frame_does_not_advance_key() {
        let pool = BufferPool::default();
        let k = key(2);
        let mut server = OutboundCipher::new(&k, pool.clone());
        let mut client_in = InboundCipher::new(&k);

        server.encrypt_to_pooled(b"handshake").unwrap();
        let frame = server.encrypt_to_pooled(b"hello").unwrap();
        let mut b = body(&frame);
        let n = client_in.decrypt_in_place(&mut b).unwrap();
        assert_eq!(&b[..n], b"hello");
    }

    #[test]
    fn test_round_trip_many_frames() {
        let pool = BufferPool::default();
        let k = key(3);
        let mut out = OutboundCipher::keyed(&k, pool);
        let mut inb = InboundCipher::new(&k);

        for i in 0..50u8 {
            let payload: Vec<u8> = (0..i).map(|j| j ^ i).collect();
            let frame = out.encrypt_to_pooled(&payload).unwrap();
            let len = u16::from_le_bytes([frame[0], frame[1]]) as usize;
            assert_eq!(len, frame.len());

            let mut b = body(&frame);
            let n = inb.decrypt_in_place(&mut b).unwrap();
            assert_eq!(&b[..n], &payload[..]);
        }
    }

    #[test]
    fn test_identical_payloads_encrypt_differently_as_key_advances() {
        let pool = BufferPool::default();
        let mut out = OutboundCipher::keyed(&key(4), pool);
        let a = out.encrypt_to_pooled(b"same bytes!").unwrap();
        let b = out.encrypt_to_pooled(b"same bytes!").unwrap();
        assert_ne!(&a[..], &b[..]);
    }

    #[test]
    fn test_flipped_bit_is_checksum_mismatch() {
        let pool = BufferPool::default();
        let k = key(5);
        let mut out = OutboundCipher::keyed(&k, pool);
        let mut inb = InboundCipher::new(&k);

        let frame = out.encrypt_to_pooled(b"payload under test").unwrap();
        let mut b = body(&frame);
        let last = b.len() - 1;
        b[last] ^= 0x40;
        assert!(matches!(
            inb.decrypt_in_place(&mut b),
            Err(CipherError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_key_is_checksum_mismatch() {
        let pool = BufferPool::default();
        let mut out = OutboundCipher::keyed(&key(6), pool);
        let mut inb = InboundCipher::new(&key(7));

        let frame = out.encrypt_to_pooled(b"not for you").unwrap();
        let mut b = body(&frame);
        assert!(matches!(
            inb.decrypt_in_place(&mut b),
            Err(CipherError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_body_shorter_than_checksum_is_malformed() {
        let mut inb = InboundCipher::new(&key(8));
        let mut b = [1u8, 2, 3];
        assert_eq!(inb.decrypt_in_place(&mut b), Err(CipherError::Malformed(3)));
    }

    #[test]
    fn test_empty_payload_round_trips() {
        let pool = BufferPool::default();
        let k = key(9);
        let mut out = OutboundCipher::keyed(&k, pool);
        let mut inb = InboundCipher::new(&k);
        let frame = out.encrypt_to_pooled(&[]).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_LEN + CHECKSUM_LEN);
        let mut b = body(&frame);
        assert_eq!(inb.decrypt_in_place(&mut b).unwrap(), 0);
    }

    #[test]
    fn test_oversized_payload_is_rejected_without_advancing() {
        let pool = BufferPool::default();
        let k = key(10);
        let mut out = OutboundCipher::keyed(&k, pool);
        let mut inb = InboundCipher::new(&k);

        let big = vec![0u8; MAX_FRAME_LEN];
        assert!(matches!(
            out.encrypt_to_pooled(&big),
            Err(CipherError::FrameTooLarge(_))
        ));

        // The stream is still in sync.
        let frame = out.encrypt_to_pooled(b"after").unwrap();
        let mut b = body(&frame);
        let n = inb.decrypt_in_place(&mut b).unwrap();
        assert_eq!(&b[..n], b"after");
    }

    #[test]
    fn test_session_cipher_split_halves_interoperate() {
        let pool = BufferPool::default();
        let k = key(11);
        let (mut server_out, mut server_in) = SessionCipher::new(&k, pool.clone()).split();
        let mut client = SessionCipher::for_client(&k, pool);

        // Server handshake frame in the clear, then an encrypted frame.
        server_out.encrypt_to_pooled(b"key").unwrap();
        let frame = server_out.encrypt_to_pooled(b"welcome").unwrap();
        let mut b = body(&frame);
        let n = client.decrypt_in_place(&mut b).unwrap();
        assert_eq!(&b[..n], b"welcome");

        // Client to server.
        let frame = client.encrypt_to_pooled(b"hi server").unwrap();
        let mut b = body(&frame);
        let n = server_in.decrypt_in_place(&mut b).unwrap();
        assert_eq!(&b[..n], b"hi server");
    }

    #[test]
    fn test_debug_does_not_print_key() {
        let out = OutboundCipher::new(&key(12), BufferPool::default());
        let text = format!("{out:?}");
        assert!(!text.contains("key"));
    }
}

//! Session encryption for Emberlink.
//!
//! Every connection is keyed by a 16-byte [`SessionKey`] sent to the client
//! in the handshake [`KeyPacket`](emberlink_protocol::KeyPacket). After
//! that packet, every frame in both directions is encrypted with a
//! [`SessionCipher`] and carries a checksum that the receiver verifies.
//!
//! Encryption always writes into a buffer taken from the shared
//! [`BufferPool`](emberlink_pool::BufferPool); the caller's payload is
//! never touched.
//!
//! ```rust
//! use emberlink_crypto::{SessionCipher, SessionKey};
//! use emberlink_pool::BufferPool;
//!
//! let pool = BufferPool::default();
//! let key = SessionKey::generate();
//! let (mut server_out, _) = SessionCipher::new(&key, pool.clone()).split();
//! let (_, mut client_in) = SessionCipher::for_client(&key, pool).split();
//!
//! // The first server frame (the key packet) is sent in the clear.
//! let hello = server_out.encrypt_to_pooled(b"key packet").unwrap();
//! assert_eq!(&hello[2..], b"key packet");
//!
//! let frame = server_out.encrypt_to_pooled(b"payload").unwrap();
//! let mut body = frame[2..].to_vec();
//! let n = client_in.decrypt_in_place(&mut body).unwrap();
//! assert_eq!(&body[..n], b"payload");
//! ```

mod cipher;
mod error;
mod key;

pub use cipher::{InboundCipher, OutboundCipher, SessionCipher, checksum};
pub use error::CipherError;
pub use key::SessionKey;

/// Bytes in a frame's length prefix.
pub const FRAME_HEADER_LEN: usize = 2;

/// Bytes in the checksum trailer of an encrypted body.
pub const CHECKSUM_LEN: usize = 4;

/// Largest frame the 16-bit length prefix can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Largest payload that fits in an encrypted frame.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - FRAME_HEADER_LEN - CHECKSUM_LEN;

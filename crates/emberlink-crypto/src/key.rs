//! Session keys.

use std::fmt;

use emberlink_protocol::KEY_LEN;
use rand::Rng;

/// The 16-byte symmetric key issued to a client in the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Draws a fresh random key.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        Self(rng.random())
    }

    /// Wraps known key bytes, e.g. ones read from a key packet.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw key.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

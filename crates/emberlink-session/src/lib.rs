//! Client sessions for Emberlink.
//!
//! A session is one connected client. It owns two tasks' worth of state:
//!
//! ```text
//!   game code ──send()──→ [bounded queue] ──→ write pump ──encrypt──→ socket
//!                                                 ▲
//!                           close() ──signal──────┘
//!
//!   socket ──→ FrameReader ──decrypt/verify──→ read loop ──→ dispatch
//! ```
//!
//! - [`ClientSession`] is the shared handle: lifecycle state, identity,
//!   and the non-blocking [`send`](ClientSession::send) /
//!   time-bounded [`send_sync`](ClientSession::send_sync).
//! - The write pump is spawned by [`ClientSession::start`]. It is the only
//!   owner of the outbound cipher, so frames are encrypted in exactly the
//!   order they were queued.
//! - [`FrameReader`] turns the socket read half into verified payloads.
//! - [`SessionRegistry`] indexes live sessions for lookup and broadcast.

mod config;
mod error;
mod framer;
mod pump;
mod registry;
mod session;
mod state;

pub use config::{SessionConfig, duration_ms};
pub use error::{FrameError, SessionError};
pub use framer::FrameReader;
pub use pump::PumpExit;
pub use registry::{BroadcastReport, SessionRegistry};
pub use session::{ClientSession, SessionMetrics};
pub use state::{CharacterId, CloseReason, SessionState, StateSet};

//! Network transports: line-delimited JSON over TCP (data + command ports)
//! and the hand-rolled WebSocket server. Shared-memory access lives in
//! `bridge-core`; this crate is only the socket-facing half of the bridge.

pub mod pacing;
pub mod session;
pub mod tcp;
pub mod ws;

pub use pacing::Pacer;
pub use session::{classify_io_error, resource_backoff, ClientError, ClientSession, ErrorClass, SessionKind, SessionState};

//! Shared per-connection plumbing used by both the TCP and WebSocket
//! servers: parsing an inbound command line and handing it to the command
//! queue, the per-connection session entity both transports track, and the
//! error type connection tasks report up through logging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_core::CommandQueue;
use bridge_protocol::{error_codes, CommandRecord};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("client disconnected")]
    Disconnected,
    #[error("malformed command: {0}")]
    MalformedCommand(String),
    #[error("websocket protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Which transport a session belongs to. Session state is mutated only by
/// the task running that transport's connection loop — no session is ever
/// touched by more than one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    TcpData,
    TcpCommand,
    WebSocket,
}

/// A session's position in its connection lifecycle: a WebSocket session
/// starts in `HttpPending` until the upgrade handshake completes, while a
/// plain TCP session (no handshake) starts directly in `Open`. Every
/// session ends in `Closing`, whether from a clean shutdown, a transport
/// error, or an idle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    HttpPending,
    Open,
    Closing,
}

/// Current wall-clock time in microseconds since the Unix epoch, the same
/// units `ClientSession::last_activity_us` and the idle-timeout check use.
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_micros() as u64
}

fn next_session_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Per-connection bookkeeping: identity, accumulated byte counts, and the
/// timestamp of the last read or write, used to detect an idle client.
/// `recv_buffer` holds whatever partial inbound data a transport's framing
/// hasn't yet resolved into a full line or WebSocket frame.
#[derive(Debug)]
pub struct ClientSession {
    pub id: u64,
    pub kind: SessionKind,
    pub recv_buffer: Vec<u8>,
    pub state: SessionState,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_activity_us: u64,
}

impl ClientSession {
    pub fn new(kind: SessionKind, now_us: u64) -> Self {
        let state = match kind {
            SessionKind::WebSocket => SessionState::HttpPending,
            SessionKind::TcpData | SessionKind::TcpCommand => SessionState::Open,
        };
        Self {
            id: next_session_id(),
            kind,
            recv_buffer: Vec::new(),
            state,
            bytes_sent: 0,
            bytes_received: 0,
            last_activity_us: now_us,
        }
    }

    pub fn mark_open(&mut self, now_us: u64) {
        self.state = SessionState::Open;
        self.last_activity_us = now_us;
    }

    pub fn mark_closing(&mut self) {
        self.state = SessionState::Closing;
    }

    pub fn record_sent(&mut self, bytes: usize, now_us: u64) {
        self.bytes_sent += bytes as u64;
        self.last_activity_us = now_us;
    }

    pub fn record_received(&mut self, bytes: usize, now_us: u64) {
        self.bytes_received += bytes as u64;
        self.last_activity_us = now_us;
    }

    /// Whether this session has gone longer than `timeout_secs` without any
    /// read or write, given the current time.
    pub fn is_idle(&self, now_us: u64, timeout_secs: u64) -> bool {
        let timeout_us = timeout_secs.saturating_mul(1_000_000);
        now_us.saturating_sub(self.last_activity_us) >= timeout_us
    }
}

/// Coarse classification of a connection-level failure, used to decide
/// whether (and how long) to back off before the next accept or retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient, safe to retry immediately (e.g. `WouldBlock`,
    /// `Interrupted`).
    Temporary,
    /// The peer went away; nothing to retry, just close the session.
    Connection,
    /// Local resource exhaustion (e.g. too many open files) — retrying
    /// immediately would just spin, so callers back off first.
    Resource,
    /// Unrecoverable for this session.
    Fatal,
}

/// Classifies a raw I/O error using its `ErrorKind`, the only
/// platform-independent signal `std::io::Error` reliably exposes.
pub fn classify_io_error(error: &std::io::Error) -> ErrorClass {
    use std::io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut => ErrorClass::Temporary,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof => {
            ErrorClass::Connection
        }
        ErrorKind::OutOfMemory => ErrorClass::Resource,
        _ => {
            // `ErrorKind::Other` on Unix covers EMFILE/ENFILE (too many open
            // files), which `std::io::ErrorKind` doesn't name directly; the
            // raw OS error code is the only way to tell it apart from a
            // genuinely fatal failure.
            match error.raw_os_error() {
                Some(24) | Some(23) => ErrorClass::Resource, // EMFILE, ENFILE
                _ => ErrorClass::Fatal,
            }
        }
    }
}

/// Backoff delay before retrying after a `Resource`-classified error:
/// 100ms times the retry attempt number, so repeated exhaustion backs off
/// linearly rather than spinning the accept loop.
pub fn resource_backoff(retry_count: u32) -> Duration {
    Duration::from_millis(100 * u64::from(retry_count.max(1)))
}

/// Parses one line of inbound client input as a `CommandRecord` and enqueues
/// it. Returns the protocol error code to report back to the client on
/// failure, matching the frozen `error_codes` used across every transport.
pub fn accept_command_line(queue: &Arc<CommandQueue>, line: &str) -> Result<(), &'static str> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    let record: CommandRecord = serde_json::from_str(trimmed).map_err(|_| {
        queue.record_reject();
        error_codes::MALFORMED_COMMAND
    })?;
    if record.variable.is_empty() {
        queue.record_reject();
        return Err(error_codes::MALFORMED_COMMAND);
    }
    queue.try_enqueue(record);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_command_line() {
        let queue = Arc::new(CommandQueue::new(4));
        let result = accept_command_line(&queue, r#"{"variable":"Controls.Throttle","value":0.5}"#);
        assert!(result.is_ok());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn ignores_blank_lines() {
        let queue = Arc::new(CommandQueue::new(4));
        assert!(accept_command_line(&queue, "   ").is_ok());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn rejects_malformed_json() {
        let queue = Arc::new(CommandQueue::new(4));
        let result = accept_command_line(&queue, "{not json");
        assert_eq!(result, Err(error_codes::MALFORMED_COMMAND));
        assert_eq!(queue.reject_count(), 1);
    }

    #[test]
    fn rejects_empty_variable_name() {
        let queue = Arc::new(CommandQueue::new(4));
        let result = accept_command_line(&queue, r#"{"variable":"","value":1.0}"#);
        assert_eq!(result, Err(error_codes::MALFORMED_COMMAND));
        assert_eq!(queue.reject_count(), 1);
    }

    #[test]
    fn tcp_session_starts_open_websocket_session_starts_pending() {
        let tcp = ClientSession::new(SessionKind::TcpData, 0);
        assert_eq!(tcp.state, SessionState::Open);
        let ws = ClientSession::new(SessionKind::WebSocket, 0);
        assert_eq!(ws.state, SessionState::HttpPending);
    }

    #[test]
    fn each_session_gets_a_distinct_id() {
        let a = ClientSession::new(SessionKind::TcpCommand, 0);
        let b = ClientSession::new(SessionKind::TcpCommand, 0);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn activity_resets_the_idle_clock() {
        let mut session = ClientSession::new(SessionKind::TcpData, 0);
        assert!(session.is_idle(31_000_000, 30));
        session.record_sent(10, 31_000_000);
        assert!(!session.is_idle(31_000_500, 30));
        assert_eq!(session.bytes_sent, 10);
    }

    #[test]
    fn classifies_common_io_errors() {
        assert_eq!(
            classify_io_error(&std::io::Error::from(std::io::ErrorKind::ConnectionReset)),
            ErrorClass::Connection
        );
        assert_eq!(
            classify_io_error(&std::io::Error::from(std::io::ErrorKind::WouldBlock)),
            ErrorClass::Temporary
        );
        assert_eq!(
            classify_io_error(&std::io::Error::from(std::io::ErrorKind::PermissionDenied)),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn resource_backoff_scales_with_retry_count() {
        assert_eq!(resource_backoff(1), Duration::from_millis(100));
        assert_eq!(resource_backoff(3), Duration::from_millis(300));
    }
}

//! Line-delimited JSON over TCP, on two independent ports: a data port that
//! only ever writes (the latest broadcast payload, one line per message),
//! and a command port that only ever reads (one `CommandRecord` per line).
//! Keeping them on separate sockets means a slow or silent client on one
//! side can never block the other.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{CommandQueue, PayloadArtifact};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::session::{accept_command_line, now_us, ClientSession, SessionKind};

/// Lines longer than this on the command port are dropped mid-read and the
/// connection is closed rather than letting an unbounded line grow the
/// read buffer without limit.
const MAX_COMMAND_LINE_BYTES: usize = 64 * 1024;

const SEND_BUFFER_BYTES: usize = 64 * 1024;
const RECV_BUFFER_BYTES: usize = 16 * 1024;
const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);

fn tune(stream: &TcpStream) -> std::io::Result<()> {
    let sock_ref = SockRef::from(stream);
    sock_ref.set_nodelay(true)?;
    sock_ref.set_send_buffer_size(SEND_BUFFER_BYTES)?;
    sock_ref.set_recv_buffer_size(RECV_BUFFER_BYTES)?;
    sock_ref.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;
    Ok(())
}

/// Accepts data-port clients forever, streaming every payload broadcast on
/// `payload_tx` to each connected client as it is produced. Never returns
/// under normal operation; the caller is expected to run it as a spawned
/// task and drop it on shutdown.
pub async fn run_data_server(
    listener: TcpListener,
    payload_tx: broadcast::Sender<Arc<PayloadArtifact>>,
    idle_timeout_secs: u64,
) {
    let mut retry_count: u32 = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => {
                retry_count = 0;
                pair
            }
            Err(e) => {
                warn!(error = %e, "tcp data port accept failed");
                if crate::session::classify_io_error(&e) == crate::session::ErrorClass::Resource {
                    retry_count += 1;
                    tokio::time::sleep(crate::session::resource_backoff(retry_count)).await;
                }
                continue;
            }
        };
        if let Err(e) = tune(&stream) {
            warn!(error = %e, %peer, "failed to tune tcp data socket");
        }
        let rx = payload_tx.subscribe();
        tokio::spawn(serve_data_client(stream, peer, rx, idle_timeout_secs));
    }
}

async fn serve_data_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    mut rx: broadcast::Receiver<Arc<PayloadArtifact>>,
    idle_timeout_secs: u64,
) {
    debug!(%peer, "tcp data client connected");
    let mut session = ClientSession::new(SessionKind::TcpData, now_us());
    let idle_wait = Duration::from_secs(idle_timeout_secs.max(1));
    loop {
        let payload = match tokio::time::timeout(idle_wait, rx.recv()).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                debug!(%peer, skipped, "tcp data client fell behind, dropping stale frames");
                continue;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_elapsed) => {
                if session.is_idle(now_us(), idle_timeout_secs) {
                    debug!(%peer, session_id = session.id, "tcp data session idle, closing");
                    session.mark_closing();
                    break;
                }
                continue;
            }
        };
        if let Err(e) = stream.write_all(&payload.tcp_line).await {
            debug!(%peer, error = %e, "tcp data client disconnected");
            break;
        }
        session.record_sent(payload.tcp_line.len(), now_us());
    }
}

/// Accepts command-port clients forever. Each connected client's lines are
/// parsed as `CommandRecord` JSON and pushed into `queue`; malformed lines
/// are logged and skipped rather than closing the connection.
pub async fn run_command_server(listener: TcpListener, queue: Arc<CommandQueue>, idle_timeout_secs: u64) {
    let mut retry_count: u32 = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => {
                retry_count = 0;
                pair
            }
            Err(e) => {
                warn!(error = %e, "tcp command port accept failed");
                if crate::session::classify_io_error(&e) == crate::session::ErrorClass::Resource {
                    retry_count += 1;
                    tokio::time::sleep(crate::session::resource_backoff(retry_count)).await;
                }
                continue;
            }
        };
        if let Err(e) = tune(&stream) {
            warn!(error = %e, %peer, "failed to tune tcp command socket");
        }
        let queue = Arc::clone(&queue);
        tokio::spawn(serve_command_client(stream, peer, queue, idle_timeout_secs));
    }
}

async fn serve_command_client(
    stream: TcpStream,
    peer: SocketAddr,
    queue: Arc<CommandQueue>,
    idle_timeout_secs: u64,
) {
    debug!(%peer, "tcp command client connected");
    let mut reader = BufReader::new(stream);
    let mut session = ClientSession::new(SessionKind::TcpCommand, now_us());
    let idle_wait = Duration::from_secs(idle_timeout_secs.max(1));
    loop {
        let outcome = match tokio::time::timeout(idle_wait, read_bounded_line(&mut reader, MAX_COMMAND_LINE_BYTES)).await
        {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                if session.is_idle(now_us(), idle_timeout_secs) {
                    debug!(%peer, session_id = session.id, "tcp command session idle, closing");
                    session.mark_closing();
                    break;
                }
                continue;
            }
        };
        match outcome {
            LineOutcome::Line(bytes) => {
                session.record_received(bytes.len(), now_us());
                let line = String::from_utf8_lossy(&bytes);
                if let Err(code) = accept_command_line(&queue, &line) {
                    debug!(%peer, code, "rejected malformed command line");
                }
            }
            LineOutcome::Eof => break,
            LineOutcome::TooLong => {
                warn!(%peer, limit = MAX_COMMAND_LINE_BYTES, "command line exceeded length limit, closing session");
                session.mark_closing();
                break;
            }
            LineOutcome::Io(e) => {
                debug!(%peer, error = %e, "tcp command client read failed");
                break;
            }
        }
    }
}

enum LineOutcome {
    Line(Vec<u8>),
    Eof,
    TooLong,
    Io(std::io::Error),
}

/// Reads one `\n`-terminated line, never growing the accumulation buffer
/// past `limit` bytes. A line whose length exceeds `limit` is fully
/// consumed from the stream (so the connection doesn't get stuck
/// mid-line) but its content is discarded and `TooLong` is reported so the
/// caller can close the session.
async fn read_bounded_line(reader: &mut BufReader<TcpStream>, limit: usize) -> LineOutcome {
    let mut buf = Vec::new();
    let mut too_long = false;
    loop {
        let available = match reader.fill_buf().await {
            Ok(bytes) => bytes,
            Err(e) => return LineOutcome::Io(e),
        };
        if available.is_empty() {
            return if too_long {
                LineOutcome::TooLong
            } else if buf.is_empty() {
                LineOutcome::Eof
            } else {
                LineOutcome::Line(buf)
            };
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            if !too_long {
                buf.extend_from_slice(&available[..pos]);
            }
            reader.consume(pos + 1);
            return if too_long { LineOutcome::TooLong } else { LineOutcome::Line(buf) };
        }
        if !too_long {
            if buf.len() + available.len() > limit {
                too_long = true;
                buf.clear();
            } else {
                buf.extend_from_slice(available);
            }
        }
        let n = available.len();
        reader.consume(n);
    }
}

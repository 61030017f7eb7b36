//! A minimal RFC 6455 WebSocket server: HTTP upgrade handshake, frame
//! parsing/assembly, and the bidirectional loop that pushes broadcast
//! payloads out while reading commands in. No external WebSocket crate is
//! used here — the upgrade and framing are implemented directly, since that
//! is the one piece of wire protocol this bridge genuinely owns end to end.
//!
//! Only single, unfragmented data frames are read from clients. A
//! conforming JSON command client never needs continuation frames for a
//! message this small, so fragment reassembly is not implemented.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bridge_core::{CommandQueue, PayloadArtifact};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::session::{accept_command_line, now_us, ClientError, ClientSession, SessionKind};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

/// Derives the `Sec-WebSocket-Accept` header value from a client's
/// `Sec-WebSocket-Key`, per RFC 6455 section 1.3.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

struct Frame {
    opcode: u8,
    payload: Vec<u8>,
}

async fn read_frame(stream: &mut (impl AsyncReadExt + Unpin)) -> Result<Frame, ClientError> {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let opcode = header[0] & 0x0F;
    let masked = header[1] & 0x80 != 0;
    let mut len = u64::from(header[1] & 0x7F);

    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await?;
        len = u64::from(u16::from_be_bytes(ext));
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).await?;
        len = u64::from_be_bytes(ext);
    }

    if !masked {
        return Err(ClientError::ProtocolViolation("client frame must be masked".to_owned()));
    }
    let mut mask = [0u8; 4];
    stream.read_exact(&mut mask).await?;

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).await?;
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Frame { opcode, payload })
}

fn encode_server_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(0x80 | opcode); // FIN=1, no RSV bits
    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    // Server-to-client frames are never masked, per RFC 6455 section 5.1.
    out.extend_from_slice(payload);
    out
}

/// Writes a bare `HTTP/1.1 400 Bad Request` response and closes the
/// connection. Used when the upgrade request is missing or malformed;
/// the client gets a real HTTP response rather than a silently dropped
/// socket.
async fn reject_handshake(stream: &mut TcpStream, reason: String) -> Result<(), ClientError> {
    const BODY: &str = "Bad Request";
    let response = format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\r\n{BODY}",
        BODY.len()
    );
    stream.write_all(response.as_bytes()).await?;
    Err(ClientError::ProtocolViolation(reason))
}

async fn perform_handshake(stream: &mut TcpStream) -> Result<(), ClientError> {
    let mut client_key = None;
    let mut has_upgrade_header = false;
    let mut has_connection_upgrade = false;
    {
        let mut reader = BufReader::new(&mut *stream);
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 || line == "\r\n" || line == "\n" {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                let value = value.trim();
                if name.eq_ignore_ascii_case("sec-websocket-key") {
                    client_key = Some(value.to_owned());
                } else if name.eq_ignore_ascii_case("upgrade") {
                    has_upgrade_header = value.eq_ignore_ascii_case("websocket");
                } else if name.eq_ignore_ascii_case("connection") {
                    has_connection_upgrade =
                        value.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
                }
            }
        }
    }

    if !has_upgrade_header {
        return reject_handshake(stream, "missing or invalid Upgrade header".to_owned()).await;
    }
    if !has_connection_upgrade {
        return reject_handshake(stream, "missing or invalid Connection header".to_owned()).await;
    }
    let Some(client_key) = client_key else {
        return reject_handshake(stream, "missing Sec-WebSocket-Key".to_owned()).await;
    };

    let accept = accept_key(&client_key);
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Accepts WebSocket clients forever. Each connection performs the upgrade
/// handshake, then runs a full-duplex loop: outbound broadcast payloads go
/// out as text frames, inbound text frames are parsed as commands. A
/// `Resource`-classified accept failure (e.g. too many open files) backs off
/// before the next accept attempt rather than spinning.
pub async fn run_ws_server(
    listener: TcpListener,
    payload_tx: broadcast::Sender<Arc<PayloadArtifact>>,
    queue: Arc<CommandQueue>,
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
                warn!(error = %e, "websocket port accept failed");
                if crate::session::classify_io_error(&e) == crate::session::ErrorClass::Resource {
                    retry_count += 1;
                    tokio::time::sleep(crate::session::resource_backoff(retry_count)).await;
                }
                continue;
            }
        };
        let rx = payload_tx.subscribe();
        let queue = Arc::clone(&queue);
        tokio::spawn(async move {
            if let Err(e) = serve_ws_client(stream, rx, queue, idle_timeout_secs).await {
                debug!(%peer, error = %e, "websocket client session ended");
            }
        });
    }
}

async fn serve_ws_client(
    mut stream: TcpStream,
    mut rx: broadcast::Receiver<Arc<PayloadArtifact>>,
    queue: Arc<CommandQueue>,
    idle_timeout_secs: u64,
) -> Result<(), ClientError> {
    perform_handshake(&mut stream).await?;
    let mut session = ClientSession::new(SessionKind::WebSocket, now_us());
    session.mark_open(now_us());
    let idle_wait = Duration::from_secs(idle_timeout_secs.max(1));

    loop {
        tokio::select! {
            payload = rx.recv() => {
                match payload {
                    Ok(payload) => {
                        let frame = encode_server_frame(OPCODE_TEXT, payload.ws_text.as_bytes());
                        stream.write_all(&frame).await?;
                        session.record_sent(frame.len(), now_us());
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
            frame = tokio::time::timeout(idle_wait, read_frame(&mut stream)) => {
                let frame = match frame {
                    Ok(frame) => frame?,
                    Err(_elapsed) => {
                        if session.is_idle(now_us(), idle_timeout_secs) {
                            debug!(session_id = session.id, "websocket session idle, closing");
                            session.mark_closing();
                            return Ok(());
                        }
                        continue;
                    }
                };
                session.record_received(frame.payload.len(), now_us());
                match frame.opcode {
                    OPCODE_TEXT | OPCODE_CONTINUATION => {
                        let text = String::from_utf8_lossy(&frame.payload);
                        if let Err(code) = accept_command_line(&queue, &text) {
                            debug!(code, "rejected malformed websocket command");
                        }
                    }
                    OPCODE_BINARY => {
                        debug!("ignoring unsupported binary websocket frame");
                    }
                    OPCODE_PING => {
                        let pong = encode_server_frame(OPCODE_PONG, &frame.payload);
                        stream.write_all(&pong).await?;
                        session.record_sent(pong.len(), now_us());
                    }
                    OPCODE_PONG => {}
                    OPCODE_CLOSE => {
                        let close = encode_server_frame(OPCODE_CLOSE, &frame.payload);
                        stream.write_all(&close).await?;
                        session.mark_closing();
                        return Ok(());
                    }
                    other => {
                        return Err(ClientError::ProtocolViolation(format!(
                            "unsupported opcode {other:#x}"
                        )));
                    }
                }
            }
        }
    }
}

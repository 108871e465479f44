//! TCP session layer: listener + fan-in sessions on the server role, the
//! single outbound connection on the client role.
//!
//! One read-loop task per socket, driven by the TCP reactor; one writer
//! task per session fed through an unbounded channel. Frames are the
//! length-prefixed payloads of `lanchat_core::wire`. End-of-stream is a
//! distinct `Closed` event; failed writes are logged and dropped without
//! removing the session (removal happens only via end-of-stream).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use lanchat_core::wire;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::reactor::Reactor;

/// Reactor key for the listening socket's accept loop.
pub const LISTENER_TASK: &str = "tcp-listener";
/// Backoff between retries when `accept` itself fails.
const ACCEPT_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(100);
/// Reactor key for the client role's single connection.
pub const CLIENT_TASK: &str = "tcp-client";

/// Reactor key for one accepted session.
pub fn session_task(peer: IpAddr) -> String {
    format!("session-{peer}")
}

/// Outbound side of every attached session, keyed by remote IP.
pub type Sessions = Arc<Mutex<HashMap<IpAddr, mpsc::UnboundedSender<String>>>>;

/// What a socket loop reports to the orchestrator.
#[derive(Debug)]
pub enum TcpEvent {
    /// A client connected (server role only).
    Accepted { peer: IpAddr },
    /// One decoded frame arrived from `peer`.
    Frame { peer: IpAddr, text: String },
    /// End-of-stream on the connection to `peer`.
    Closed { peer: IpAddr },
}

/// Bind the chat listener. Errors are returned to the orchestrator.
pub async fn listen(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}

/// Spawn the accept loop on the TCP reactor. Each accepted connection gets
/// a session entry, a writer task, and a read-loop task of its own.
pub fn spawn_accept_loop(
    listener: TcpListener,
    reactor: Arc<Reactor>,
    sessions: Sessions,
    events: mpsc::UnboundedSender<TcpEvent>,
) {
    let loop_reactor = reactor.clone();
    reactor.register(
        LISTENER_TASK,
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let peer = addr.ip();
                        info!(%peer, "accepted client session");
                        let (read_half, write_half) = stream.into_split();

                        let (tx, rx) = mpsc::unbounded_channel();
                        sessions.lock().await.insert(peer, tx);
                        tokio::spawn(write_loop(write_half, rx));

                        let session_events = events.clone();
                        loop_reactor.register(
                            session_task(peer),
                            tokio::spawn(read_loop(read_half, peer, session_events)),
                        );
                        let _ = events.send(TcpEvent::Accepted { peer });
                    }
                    Err(e) => {
                        // A persistent error (e.g. fd exhaustion) would
                        // otherwise retry in a tight loop.
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }),
    );
}

/// Connect to the elected server's chat port.
pub async fn connect(server_ip: IpAddr, port: u16) -> std::io::Result<TcpStream> {
    TcpStream::connect((server_ip, port)).await
}

/// Spawn the client role's read loop and writer task. The caller makes the
/// outbound channel itself and records its sender before the read loop can
/// emit a single event.
pub fn spawn_client(
    stream: TcpStream,
    server_ip: IpAddr,
    reactor: &Reactor,
    events: mpsc::UnboundedSender<TcpEvent>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(write_half, outbound_rx));
    reactor.register(
        CLIENT_TASK,
        tokio::spawn(read_loop(read_half, server_ip, events)),
    );
}

/// Read frames until end-of-stream, forwarding each to the orchestrator.
/// EOF (and any unrecoverable read error) surfaces as one `Closed` event.
async fn read_loop(
    mut reader: OwnedReadHalf,
    peer: IpAddr,
    events: mpsc::UnboundedSender<TcpEvent>,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(text)) => {
                debug!(%peer, %text, "frame received");
                if events.send(TcpEvent::Frame { peer, text }).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, error = %e, "session read failed");
                break;
            }
        }
    }
    let _ = events.send(TcpEvent::Closed { peer });
}

/// Read one length-prefixed frame. `Ok(None)` means the peer closed the
/// stream at a frame boundary.
async fn read_frame(reader: &mut OwnedReadHalf) -> std::io::Result<Option<String>> {
    let mut len_buf = [0u8; wire::LEN_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf);
    if len > wire::MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let text = String::from_utf8(payload)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "frame is not UTF-8"))?;
    Ok(Some(text))
}

/// Encode and write queued payloads, one full frame per send. A failed
/// write is logged and the payload dropped; the session stays attached
/// until its read side observes end-of-stream.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        let frame = match wire::encode_frame(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "payload not sendable");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&frame).await {
            warn!(error = %e, "session write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_one_frame(stream: &mut TcpStream) -> String {
        let mut len_buf = [0u8; wire::LEN_SIZE];
        stream.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.unwrap();
        String::from_utf8(payload).unwrap()
    }

    #[tokio::test]
    async fn server_send_reaches_every_session_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let reactor = Arc::new(Reactor::new());
        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        spawn_accept_loop(listener, reactor.clone(), sessions.clone(), events_tx);

        let mut client_a = TcpStream::connect(addr).await.unwrap();
        // Sessions are keyed by remote IP, so the second client needs its
        // own loopback address.
        let socket_b = tokio::net::TcpSocket::new_v4().unwrap();
        socket_b.bind("127.0.0.2:0".parse().unwrap()).unwrap();
        let mut client_b = socket_b.connect(addr).await.unwrap();
        // Both sessions attach before the server writes.
        let mut accepted = 0;
        while accepted < 2 {
            match events_rx.recv().await.unwrap() {
                TcpEvent::Accepted { .. } => accepted += 1,
                other => panic!("unexpected event {other:?}"),
            }
        }

        let payload = lanchat_core::protocol::encode_chat("10.0.0.1", "hello");
        for tx in sessions.lock().await.values() {
            tx.send(payload.clone()).unwrap();
        }

        assert_eq!(read_one_frame(&mut client_a).await, payload);
        assert_eq!(read_one_frame(&mut client_b).await, payload);
    }

    #[tokio::test]
    async fn session_frames_reach_the_orchestrator() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let reactor = Arc::new(Reactor::new());
        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        spawn_accept_loop(listener, reactor, sessions, events_tx);

        let mut client = TcpStream::connect(addr).await.unwrap();
        let frame = wire::encode_frame("hi from the client").unwrap();
        client.write_all(&frame).await.unwrap();

        loop {
            match events_rx.recv().await.unwrap() {
                TcpEvent::Frame { text, .. } => {
                    assert_eq!(text, "hi from the client");
                    break;
                }
                TcpEvent::Accepted { .. } => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn client_observes_end_of_stream_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_ip = addr.ip();

        let reactor = Reactor::new();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let client_stream = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (_outbound, outbound_rx) = mpsc::unbounded_channel();
        spawn_client(client_stream, server_ip, &reactor, events_tx, outbound_rx);

        // Server goes away: the client read loop must emit exactly one
        // Closed event and nothing after it.
        drop(server_side);
        match events_rx.recv().await.unwrap() {
            TcpEvent::Closed { peer } => assert_eq!(peer, server_ip),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events_rx.recv().await.is_none());
    }
}

//! UDP discovery: broadcast probe/reply send socket plus the well-known-port
//! receive loop feeding datagrams to the orchestrator.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use lanchat_core::DISCOVERY_PROBE;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::reactor::Reactor;

/// Reactor key for the receive-loop task.
pub const RECV_TASK: &str = "udp-recv";
/// Reactor key for the one-shot election timer task.
pub const TIMER_TASK: &str = "election-timer";

/// One UDP datagram is read in full in a single call.
const RECV_BUF_LEN: usize = 65536;

/// The socket pair lives until teardown takes it; every send and the
/// receive loop hold their own `Arc` clone for the duration of one call
/// or task.
struct SocketPair {
    send: Arc<UdpSocket>,
    recv: Arc<UdpSocket>,
}

/// The discovery socket pair. Replies go to the broadcast address, not
/// unicast: every device on the segment receives every reply and filters
/// by content.
pub struct Discovery {
    sockets: std::sync::Mutex<Option<SocketPair>>,
    dest: SocketAddr,
}

impl Discovery {
    /// Bind the receive socket on all local addresses at the discovery
    /// port and create the broadcast-enabled send socket. Errors are
    /// returned so callers (and tests) can observe setup failure.
    pub fn bind(cfg: &Config) -> std::io::Result<Self> {
        let recv = std::net::UdpSocket::bind(("0.0.0.0", cfg.discovery_port))?;
        recv.set_nonblocking(true)?;
        let recv_sock = UdpSocket::from_std(recv)?;

        let send = std::net::UdpSocket::bind(("0.0.0.0", 0))?;
        send.set_broadcast(true)?;
        send.set_nonblocking(true)?;
        let send_sock = UdpSocket::from_std(send)?;

        Ok(Self {
            sockets: std::sync::Mutex::new(Some(SocketPair {
                send: Arc::new(send_sock),
                recv: Arc::new(recv_sock),
            })),
            dest: SocketAddr::new(cfg.broadcast_addr, cfg.discovery_port),
        })
    }

    fn send_sock(&self) -> Option<Arc<UdpSocket>> {
        self.lock_sockets().as_ref().map(|pair| pair.send.clone())
    }

    fn recv_sock(&self) -> Option<Arc<UdpSocket>> {
        self.lock_sockets().as_ref().map(|pair| pair.recv.clone())
    }

    /// Actual port of the receive socket, after an ephemeral bind.
    pub(crate) fn recv_port(&self) -> Option<u16> {
        self.recv_sock()
            .and_then(|sock| sock.local_addr().ok())
            .map(|addr| addr.port())
    }

    fn lock_sockets(&self) -> std::sync::MutexGuard<'_, Option<SocketPair>> {
        self.sockets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Broadcast the discovery probe. The caller arms the election timer.
    pub async fn probe(&self) {
        info!("searching for a server nearby");
        self.send_broadcast(DISCOVERY_PROBE).await;
    }

    /// Best-effort single-call broadcast send; short or failed sends are
    /// logged and dropped.
    pub async fn send_broadcast(&self, text: &str) {
        let Some(sock) = self.send_sock() else {
            warn!(%text, "broadcast dropped, discovery is torn down");
            return;
        };
        match sock.send_to(text.as_bytes(), self.dest).await {
            Ok(n) if n == text.len() => debug!(%text, "sent broadcast"),
            Ok(n) => warn!(sent = n, expected = text.len(), "short broadcast send"),
            Err(e) => warn!(error = %e, "broadcast send failed"),
        }
    }

    /// Spawn the receive loop on the UDP reactor. Each datagram is decoded
    /// to text and forwarded as `(text, sender_ip)`; undecodable or empty
    /// reads are logged and ignored.
    pub fn spawn_recv_loop(
        &self,
        reactor: &Reactor,
        datagram_tx: mpsc::UnboundedSender<(String, IpAddr)>,
    ) {
        let Some(sock) = self.recv_sock() else {
            warn!("receive loop not started, discovery is torn down");
            return;
        };
        reactor.register(
            RECV_TASK,
            tokio::spawn(async move {
                let mut buf = vec![0u8; RECV_BUF_LEN];
                loop {
                    match sock.recv_from(&mut buf).await {
                        Ok((0, from)) => {
                            warn!(%from, "nothing to read from the datagram");
                        }
                        Ok((n, from)) => match std::str::from_utf8(&buf[..n]) {
                            Ok(text) => {
                                if datagram_tx.send((text.to_owned(), from.ip())).is_err() {
                                    return;
                                }
                            }
                            Err(_) => warn!(%from, "datagram is not valid UTF-8"),
                        },
                        Err(e) => {
                            warn!(error = %e, "udp receive failed");
                        }
                    }
                }
            }),
        );
    }

    /// Deregister the discovery tasks and close both sockets, freeing the
    /// well-known receive port. The receive task is awaited after abort so
    /// its socket clone is gone before this returns. Idempotent: a second
    /// teardown is a no-op.
    pub async fn teardown(&self, reactor: &Reactor) {
        for key in [RECV_TASK, TIMER_TASK] {
            if let Some(task) = reactor.take(key) {
                task.abort();
                let _ = task.await;
            }
        }
        self.lock_sockets().take();
    }
}

/// Pick the local address the kernel routes outbound traffic from.
/// Connecting a UDP socket sends nothing; it only resolves the route.
pub fn detect_local_ip() -> std::io::Result<IpAddr> {
    let sock = std::net::UdpSocket::bind(("0.0.0.0", 0))?;
    sock.connect(("8.8.8.8", 80))?;
    Ok(sock.local_addr()?.ip())
}

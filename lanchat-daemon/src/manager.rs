//! Orchestrator: owns the device role, runs the election, routes traffic
//! between the discovery service, the TCP session layer, and the
//! presentation channel.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use lanchat_core::protocol::{self, TcpMessage};
use lanchat_core::{ChatEvent, Election, ElectionAction};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::discovery::{self, Discovery};
use crate::reactor::Reactor;
use crate::transport::{self, Sessions, TcpEvent};

/// The election window: how long to wait for a server response before
/// self-electing.
const ELECTION_WINDOW: Duration = Duration::from_secs(1);

/// Transport attachment for the current role. Transitions are one-way and
/// happen under the state lock shared by the UDP loop and the timer task.
enum RoleState {
    Unaffiliated,
    Client {
        server_ip: IpAddr,
        outbound: mpsc::UnboundedSender<String>,
    },
    Server {
        sessions: Sessions,
        aliases: HashMap<IpAddr, String>,
    },
}

struct Inner {
    election: Election,
    role: RoleState,
}

pub struct Manager {
    cfg: Config,
    self_ip: IpAddr,
    inner: Mutex<Inner>,
    discovery: Discovery,
    udp_reactor: Arc<Reactor>,
    tcp_reactor: Arc<Reactor>,
    events: mpsc::UnboundedSender<ChatEvent>,
    tcp_events: mpsc::UnboundedSender<TcpEvent>,
}

impl Manager {
    /// Bind the discovery sockets, start both socket reactors, send the
    /// probe, and arm the election timer. Returns the manager and the
    /// presentation event stream (single consumer context).
    pub async fn start(cfg: Config) -> anyhow::Result<(Arc<Self>, mpsc::UnboundedReceiver<ChatEvent>)> {
        let self_ip = match cfg.local_ip {
            Some(ip) => ip,
            None => discovery::detect_local_ip()?,
        };
        let discovery = Discovery::bind(&cfg)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (datagram_tx, mut datagram_rx) = mpsc::unbounded_channel();
        let (tcp_tx, mut tcp_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(Self {
            cfg,
            self_ip,
            inner: Mutex::new(Inner {
                election: Election::new(self_ip),
                role: RoleState::Unaffiliated,
            }),
            discovery,
            udp_reactor: Arc::new(Reactor::new()),
            tcp_reactor: Arc::new(Reactor::new()),
            events: events_tx,
            tcp_events: tcp_tx,
        });
        info!(ip = %self_ip, "device ready");

        manager
            .discovery
            .spawn_recv_loop(&manager.udp_reactor, datagram_tx);

        let datagram_manager = manager.clone();
        tokio::spawn(async move {
            while let Some((text, sender)) = datagram_rx.recv().await {
                datagram_manager.on_datagram(text, sender).await;
            }
        });
        let tcp_manager = manager.clone();
        tokio::spawn(async move {
            while let Some(event) = tcp_rx.recv().await {
                tcp_manager.on_tcp_event(event).await;
            }
        });

        manager.inner.lock().await.election.probe_sent();
        manager.discovery.probe().await;

        let timer_manager = manager.clone();
        manager.udp_reactor.register(
            discovery::TIMER_TASK,
            tokio::spawn(async move {
                tokio::time::sleep(ELECTION_WINDOW).await;
                timer_manager.on_election_timer().await;
            }),
        );

        Ok((manager, events_rx))
    }

    /// Send a chat line for whichever transport the current role owns.
    pub async fn send(&self, text: String) {
        let inner = self.inner.lock().await;
        match &inner.role {
            RoleState::Client { outbound, .. } => {
                // Client-to-server frames carry the raw text; the server
                // attributes them by session.
                if outbound.send(text.clone()).is_err() {
                    warn!("session writer is gone; message dropped");
                    return;
                }
                self.present(ChatEvent::Message {
                    text,
                    sender: "Me".to_owned(),
                    is_self: true,
                });
            }
            RoleState::Server { sessions, .. } => {
                // Server text goes to every attached session individually.
                let payload = protocol::encode_chat(&self.self_ip.to_string(), &text);
                for tx in sessions.lock().await.values() {
                    let _ = tx.send(payload.clone());
                }
                self.present(ChatEvent::Message {
                    text,
                    sender: "Me".to_owned(),
                    is_self: true,
                });
            }
            RoleState::Unaffiliated => {
                warn!("no role elected yet; message dropped");
            }
        }
    }

    async fn on_datagram(&self, text: String, sender: IpAddr) {
        let action = self.inner.lock().await.election.on_broadcast(&text, sender);
        match action {
            ElectionAction::None => {}
            ElectionAction::Violation(reason) => {
                warn!(%sender, %text, reason, "broadcast protocol violation");
            }
            ElectionAction::ReplyToProbe {
                response,
                client_ip,
            } => {
                info!(%client_ip, "probe from a new device; announcing myself");
                self.discovery.send_broadcast(&response).await;
            }
            ElectionAction::BecomeClient { server_ip } => {
                self.become_client(server_ip).await;
            }
            ElectionAction::BecomeServer => {
                self.become_server().await;
            }
        }
    }

    async fn on_election_timer(&self) {
        let action = self.inner.lock().await.election.on_timer_elapsed();
        match action {
            ElectionAction::BecomeServer => self.become_server().await,
            _ => {}
        }
    }

    /// A server answered the probe: tear discovery down (a client never
    /// touches UDP again) and open the one TCP session to it.
    async fn become_client(&self, server_ip: IpAddr) {
        info!(%server_ip, "found a server");
        self.discovery.teardown(&self.udp_reactor).await;

        match transport::connect(server_ip, self.cfg.chat_port).await {
            Ok(stream) => {
                let (outbound, outbound_rx) = mpsc::unbounded_channel();
                // Record the role before the read loop exists, so even an
                // immediate frame or close lands on the client arm.
                self.inner.lock().await.role = RoleState::Client {
                    server_ip,
                    outbound,
                };
                transport::spawn_client(
                    stream,
                    server_ip,
                    &self.tcp_reactor,
                    self.tcp_events.clone(),
                    outbound_rx,
                );
                info!(%server_ip, "connected to the server");
                self.present(ChatEvent::Info(format!("connected to server {server_ip}")));
            }
            Err(e) => {
                error!(%server_ip, error = %e, "tcp connect to the server failed");
                self.present(ChatEvent::Info(format!(
                    "could not reach server {server_ip}: {e}"
                )));
            }
        }
    }

    /// Nobody answered within the election window: self-elect, start the
    /// chat listener, and keep answering discovery probes.
    async fn become_server(&self) {
        match transport::listen(self.cfg.chat_port).await {
            Ok(listener) => {
                let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
                // Same ordering as the client side: the role is in place
                // before the first session can report anything.
                self.inner.lock().await.role = RoleState::Server {
                    sessions: sessions.clone(),
                    aliases: HashMap::new(),
                };
                transport::spawn_accept_loop(
                    listener,
                    self.tcp_reactor.clone(),
                    sessions,
                    self.tcp_events.clone(),
                );
                info!(port = self.cfg.chat_port, "elected as server");
                self.present(ChatEvent::Info(
                    "Hello. I'm the server. Start spreading the news".to_owned(),
                ));
            }
            Err(e) => {
                error!(error = %e, "cannot start the chat listener");
                self.present(ChatEvent::Info(format!("cannot start chat listener: {e}")));
            }
        }
    }

    async fn on_tcp_event(&self, event: TcpEvent) {
        match event {
            TcpEvent::Accepted { peer } => {
                info!(%peer, "client attached");
            }
            TcpEvent::Frame { peer, text } => self.on_frame(peer, text).await,
            TcpEvent::Closed { peer } => self.on_closed(peer).await,
        }
    }

    async fn on_frame(&self, peer: IpAddr, text: String) {
        let mut inner = self.inner.lock().await;
        match &mut inner.role {
            RoleState::Server { sessions, aliases } => {
                if let Some(alias) = protocol::parse_alias_command(&text) {
                    aliases.insert(peer, alias.to_owned());
                    let notice = format!("{peer} is now known as {alias}");
                    let payload = protocol::encode_info(&notice);
                    for tx in sessions.lock().await.values() {
                        let _ = tx.send(payload.clone());
                    }
                    self.present(ChatEvent::Info(notice));
                    return;
                }
                let sender = aliases
                    .get(&peer)
                    .cloned()
                    .unwrap_or_else(|| peer.to_string());
                // Relay to every other attached session; the originator
                // already has its local echo.
                let payload = protocol::encode_chat(&sender, &text);
                for (ip, tx) in sessions.lock().await.iter() {
                    if *ip != peer {
                        let _ = tx.send(payload.clone());
                    }
                }
                self.present(ChatEvent::Message {
                    text,
                    sender,
                    is_self: false,
                });
            }
            RoleState::Client { .. } => match protocol::decode_tcp(&text) {
                Ok(TcpMessage::Chat { sender, text }) => {
                    self.present(ChatEvent::Message {
                        text,
                        sender,
                        is_self: false,
                    });
                }
                Ok(TcpMessage::Info { text }) => {
                    self.present(ChatEvent::Info(text));
                }
                Err(e) => {
                    warn!(%peer, error = %e, "undecodable server payload");
                }
            },
            RoleState::Unaffiliated => {
                warn!(%peer, "tcp frame before any role was elected");
            }
        }
    }

    async fn on_closed(&self, peer: IpAddr) {
        let mut inner = self.inner.lock().await;
        match &mut inner.role {
            RoleState::Server { sessions, aliases } => {
                sessions.lock().await.remove(&peer);
                let name = aliases
                    .remove(&peer)
                    .unwrap_or_else(|| peer.to_string());
                self.tcp_reactor.deregister(&transport::session_task(peer));
                info!(%peer, "client session closed");
                self.present(ChatEvent::PeerLost { peer: name });
            }
            RoleState::Client { server_ip, .. } => {
                let server = *server_ip;
                self.tcp_reactor.deregister(transport::CLIENT_TASK);
                info!(%server, "connection to the server lost");
                self.present(ChatEvent::PeerLost {
                    peer: server.to_string(),
                });
            }
            RoleState::Unaffiliated => {}
        }
    }

    fn present(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            warn!("presentation channel closed");
        }
    }
}

//! Role election: the state machine deciding Client vs Server.
//!
//! Host-driven: the daemon feeds broadcast datagrams and the one-shot
//! election timer in; the machine answers with the action to perform.
//! The transition is one-way for the process lifetime:
//! `Unaffiliated -> Discovering -> Client | Server`, never back, never
//! sideways. The daemon serializes all events through one lock, so the
//! check-and-set on the "server found" flag is atomic across the UDP
//! receive loop and the timer task.

use std::net::IpAddr;

use crate::protocol::{self, BroadcastMessage};

/// Current role. At most one terminal role is ever reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initial: UDP discovery only.
    Unaffiliated,
    /// Probe sent, 1 s timer armed, waiting for a server response.
    Discovering,
    /// Bound to one discovered server.
    Client { server_ip: IpAddr },
    /// Self-elected session server.
    Server,
}

/// What the host must do after feeding an event in.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum ElectionAction {
    /// Nothing: event consumed (or filtered) without a transition.
    None,
    /// We are the server and a device probed: broadcast this response.
    ReplyToProbe { response: String, client_ip: IpAddr },
    /// A server answered first: stop discovery, connect to it over TCP.
    BecomeClient { server_ip: IpAddr },
    /// Nobody answered within the election window: start the TCP listener.
    BecomeServer,
    /// Protocol violation: log and discard, no transition.
    Violation(&'static str),
}

/// Election state. One instance per process, owned behind the daemon's lock.
#[derive(Debug)]
pub struct Election {
    self_ip: IpAddr,
    role: Role,
    /// The "is there a server" flag; set at most once per process.
    server_ip: Option<IpAddr>,
}

impl Election {
    pub fn new(self_ip: IpAddr) -> Self {
        Self {
            self_ip,
            role: Role::Unaffiliated,
            server_ip: None,
        }
    }

    pub fn self_ip(&self) -> IpAddr {
        self.self_ip
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn server_ip(&self) -> Option<IpAddr> {
        self.server_ip
    }

    /// Record that the discovery probe went out and the timer is armed.
    pub fn probe_sent(&mut self) {
        if self.role == Role::Unaffiliated {
            self.role = Role::Discovering;
        }
    }

    /// Feed a received broadcast datagram.
    pub fn on_broadcast(&mut self, text: &str, sender: IpAddr) -> ElectionAction {
        // Broadcast echoes our own datagrams back; never act on them.
        if sender == self.self_ip {
            return ElectionAction::None;
        }
        match protocol::classify_broadcast(text, sender) {
            BroadcastMessage::Probe => {
                if self.role == Role::Server {
                    ElectionAction::ReplyToProbe {
                        response: protocol::server_response(self.self_ip),
                        client_ip: sender,
                    }
                } else {
                    // A client or a still-discovering device ignores probes.
                    ElectionAction::None
                }
            }
            BroadcastMessage::ServerResponse { server_ip } => {
                if self.server_ip.is_some() {
                    // Duplicate or late reply; we already settled.
                    ElectionAction::Violation("discovery response but a server is already known")
                } else {
                    self.server_ip = Some(server_ip);
                    self.role = Role::Client { server_ip };
                    ElectionAction::BecomeClient { server_ip }
                }
            }
            BroadcastMessage::Other => {
                ElectionAction::Violation("unknown broadcast message")
            }
        }
    }

    /// Feed the 1-second election timer. If no server answered by now,
    /// this device self-elects.
    pub fn on_timer_elapsed(&mut self) -> ElectionAction {
        if self.server_ip.is_some() {
            // Lost the race (or already elected): the timer is a no-op.
            return ElectionAction::None;
        }
        self.server_ip = Some(self.self_ip);
        self.role = Role::Server;
        ElectionAction::BecomeServer
    }
}

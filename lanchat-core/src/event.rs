//! Notifications toward the presentation layer.

/// One-way events the transport emits for the UI to consume. Delivered on
/// a single consumer context so presentation never races the socket loops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A chat line to display. `is_self` marks the local echo.
    Message {
        text: String,
        sender: String,
        is_self: bool,
    },
    /// Informational notice (alias changes, role announcements).
    Info(String),
    /// A TCP peer went away: the server (client role) or one attached
    /// client (server role). Both directions use this same event.
    PeerLost { peer: String },
}

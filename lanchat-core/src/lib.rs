//! LAN chat protocol core.
//! Host-driven: no I/O; the daemon passes events and receives actions.

pub mod election;
pub mod event;
pub mod protocol;
pub mod wire;

pub use election::{Election, ElectionAction, Role};
pub use event::ChatEvent;
pub use protocol::{BroadcastMessage, TcpMessage, CHAT_PORT, DISCOVERY_PORT, DISCOVERY_PROBE, SERVER_RESPONSE_PREFIX};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};

//! Wire vocabulary: well-known ports, discovery literals, chat grammar.
//!
//! UDP discovery datagrams are raw unframed text and must match the
//! literals below byte for byte. TCP chat frames (see wire module) carry
//! either raw chat text (client to server) or a tagged payload
//! (server to client): `MSG <sender> <text>` for relayed chat,
//! `INFO <text>` for informational notices.

use std::net::IpAddr;

/// UDP port every device binds for discovery.
pub const DISCOVERY_PORT: u16 = 9010;

/// TCP port the elected server listens on.
pub const CHAT_PORT: u16 = 8010;

/// Broadcast probe: "is there a server here?"
pub const DISCOVERY_PROBE: &str = "CHAT-SERVER-DISCOVERY";

/// Prefix of the server's broadcast reply to a probe.
pub const SERVER_RESPONSE_PREFIX: &str = "CHAT-SERVER-RESPONSE-";

const MSG_TAG: &str = "MSG ";
const INFO_TAG: &str = "INFO ";
const ALIAS_COMMAND: &str = "/name: ";

/// Build the discovery response the server broadcasts: prefix + own IP.
/// Receivers take the server address from the datagram sender; the suffix
/// is advisory.
pub fn server_response(ip: IpAddr) -> String {
    format!("{SERVER_RESPONSE_PREFIX}{ip}")
}

/// A decoded UDP broadcast datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastMessage {
    /// A device is looking for a server.
    Probe,
    /// A server announced itself; its address is the datagram sender.
    ServerResponse { server_ip: IpAddr },
    /// Anything else: protocol violation, logged and discarded.
    Other,
}

/// Classify a broadcast datagram. The sender address travels alongside
/// because discovery replies are broadcast, not unicast, and receivers
/// filter by content.
pub fn classify_broadcast(text: &str, sender: IpAddr) -> BroadcastMessage {
    if text == DISCOVERY_PROBE {
        BroadcastMessage::Probe
    } else if text.starts_with(SERVER_RESPONSE_PREFIX) {
        BroadcastMessage::ServerResponse { server_ip: sender }
    } else {
        BroadcastMessage::Other
    }
}

/// A decoded server-to-client TCP payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpMessage {
    /// Relayed chat: who said it (IP or alias) and what.
    Chat { sender: String, text: String },
    /// Informational notice (alias changes and the like).
    Info { text: String },
}

/// Encode a relayed chat payload for the server-to-client direction.
pub fn encode_chat(sender: &str, text: &str) -> String {
    format!("{MSG_TAG}{sender} {text}")
}

/// Encode an informational payload.
pub fn encode_info(text: &str) -> String {
    format!("{INFO_TAG}{text}")
}

/// Decode a server-to-client payload.
pub fn decode_tcp(payload: &str) -> Result<TcpMessage, CodecError> {
    if let Some(rest) = payload.strip_prefix(MSG_TAG) {
        let (sender, text) = rest
            .split_once(' ')
            .ok_or(CodecError::MalformedChat)?;
        if sender.is_empty() {
            return Err(CodecError::MalformedChat);
        }
        Ok(TcpMessage::Chat {
            sender: sender.to_owned(),
            text: text.to_owned(),
        })
    } else if let Some(text) = payload.strip_prefix(INFO_TAG) {
        Ok(TcpMessage::Info {
            text: text.to_owned(),
        })
    } else {
        Err(CodecError::UnknownTag)
    }
}

/// Error decoding a TCP payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("chat payload missing sender")]
    MalformedChat,
    #[error("unknown payload tag")]
    UnknownTag,
}

/// Parse a `/name: <alias>` command from client chat text. Aliases are
/// 4+ word characters; anything else is ordinary chat text.
pub fn parse_alias_command(text: &str) -> Option<&str> {
    let alias = text.strip_prefix(ALIAS_COMMAND)?;
    if alias.len() >= 4 && alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(alias)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn probe_literal_is_exact() {
        assert_eq!(DISCOVERY_PROBE, "CHAT-SERVER-DISCOVERY");
        assert_eq!(
            classify_broadcast("CHAT-SERVER-DISCOVERY", ip("192.168.1.2")),
            BroadcastMessage::Probe
        );
        // Near-misses are violations, not probes.
        assert_eq!(
            classify_broadcast("CHAT-SERVER-DISCOVERY ", ip("192.168.1.2")),
            BroadcastMessage::Other
        );
    }

    #[test]
    fn response_matched_by_prefix() {
        let sender = ip("192.168.1.7");
        let text = server_response(IpAddr::from(Ipv4Addr::new(192, 168, 1, 7)));
        assert!(text.starts_with("CHAT-SERVER-RESPONSE-"));
        assert_eq!(
            classify_broadcast(&text, sender),
            BroadcastMessage::ServerResponse { server_ip: sender }
        );
        // Any suffix is accepted; the sender address is authoritative.
        assert_eq!(
            classify_broadcast("CHAT-SERVER-RESPONSE-whatever", sender),
            BroadcastMessage::ServerResponse { server_ip: sender }
        );
    }

    #[test]
    fn unknown_broadcast_is_other() {
        assert_eq!(
            classify_broadcast("hello there", ip("10.0.0.1")),
            BroadcastMessage::Other
        );
    }

    #[test]
    fn chat_roundtrip() {
        let encoded = encode_chat("192.168.1.5", "hello world");
        let decoded = decode_tcp(&encoded).unwrap();
        assert_eq!(
            decoded,
            TcpMessage::Chat {
                sender: "192.168.1.5".into(),
                text: "hello world".into()
            }
        );
    }

    #[test]
    fn info_roundtrip() {
        let encoded = encode_info("somebody joined");
        let decoded = decode_tcp(&encoded).unwrap();
        assert_eq!(
            decoded,
            TcpMessage::Info {
                text: "somebody joined".into()
            }
        );
    }

    #[test]
    fn chat_text_may_contain_spaces_and_tags() {
        let encoded = encode_chat("bob", "MSG looks like a tag");
        let decoded = decode_tcp(&encoded).unwrap();
        assert_eq!(
            decoded,
            TcpMessage::Chat {
                sender: "bob".into(),
                text: "MSG looks like a tag".into()
            }
        );
    }

    #[test]
    fn malformed_payloads_rejected() {
        assert!(matches!(decode_tcp("MSG "), Err(CodecError::MalformedChat)));
        assert!(matches!(
            decode_tcp("MSG onlysender"),
            Err(CodecError::MalformedChat)
        ));
        assert!(matches!(
            decode_tcp("random text"),
            Err(CodecError::UnknownTag)
        ));
    }

    #[test]
    fn alias_command_parsing() {
        assert_eq!(parse_alias_command("/name: alice"), Some("alice"));
        assert_eq!(parse_alias_command("/name: bob_99"), Some("bob_99"));
        // Too short, bad characters, or not a command at all.
        assert_eq!(parse_alias_command("/name: abc"), None);
        assert_eq!(parse_alias_command("/name: has space"), None);
        assert_eq!(parse_alias_command("plain text"), None);
    }
}

//! Load config from file and environment.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::Deserialize;

/// Daemon configuration. File: ~/.config/lanchat/config.toml or /etc/lanchat/config.toml.
/// Env overrides: LANCHAT_DISCOVERY_PORT, LANCHAT_CHAT_PORT, LANCHAT_BROADCAST_ADDR, LANCHAT_LOCAL_IP.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 9010).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Chat TCP port (default 8010).
    #[serde(default = "default_chat_port")]
    pub chat_port: u16,
    /// Broadcast destination for discovery datagrams.
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: IpAddr,
    /// Fixed local address. When absent the daemon auto-detects it.
    #[serde(default)]
    pub local_ip: Option<IpAddr>,
}

fn default_discovery_port() -> u16 {
    lanchat_core::DISCOVERY_PORT
}
fn default_chat_port() -> u16 {
    lanchat_core::CHAT_PORT
}
fn default_broadcast_addr() -> IpAddr {
    IpAddr::from([255, 255, 255, 255])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            chat_port: default_chat_port(),
            broadcast_addr: default_broadcast_addr(),
            local_ip: None,
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("LANCHAT_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Ok(s) = std::env::var("LANCHAT_CHAT_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.chat_port = p;
        }
    }
    if let Ok(s) = std::env::var("LANCHAT_BROADCAST_ADDR") {
        if let Ok(a) = s.parse::<IpAddr>() {
            c.broadcast_addr = a;
        }
    }
    if let Ok(s) = std::env::var("LANCHAT_LOCAL_IP") {
        if let Ok(a) = s.parse::<IpAddr>() {
            c.local_ip = Some(a);
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lanchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanchat/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<Config>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}

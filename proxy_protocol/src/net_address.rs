//! Destination address and credential types shared across every handshake
//! state machine (SOCKS5, HTTP CONNECT, VMESS).

use base64::Engine as _;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetAddress {
    DomainPort(String, u16),
    SocketAddress(IpAddr, u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAddr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl NetAddress {
    pub fn port(&self) -> u16 {
        match self {
            NetAddress::DomainPort(_, p) => *p,
            NetAddress::SocketAddress(_, p) => *p,
        }
    }

    /// Textual host (domain name, or numeric address) for logging and for
    /// building a `CONNECT host:port` request line.
    pub fn host_text(&self) -> String {
        match self {
            NetAddress::DomainPort(h, _) => h.clone(),
            NetAddress::SocketAddress(IpAddr::V4(v4), _) => v4.to_string(),
            NetAddress::SocketAddress(IpAddr::V6(v6), _) => v6.to_string(),
        }
    }

    pub fn to_host_port_string(&self) -> String {
        format!("{}:{}", self.host_text(), self.port())
    }
}

/// Basic-auth-shaped credential: used for HTTP `Proxy-Authorization` and for
/// SOCKS5 username/password sub-negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub identity: String,
    pub token: String,
}

impl Credential {
    pub fn new(identity: impl Into<String>, token: impl Into<String>) -> Self {
        Credential { identity: identity.into(), token: token.into() }
    }

    /// `base64(identity:token)` for the HTTP `Basic` auth scheme.
    pub fn to_basic_base64(&self) -> String {
        let raw = format!("{}:{}", self.identity, self.token);
        base64::engine::general_purpose::STANDARD.encode(raw.as_bytes())
    }

    pub fn from_basic_base64(encoded: &str) -> Option<Credential> {
        let raw = base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok()?;
        let text = String::from_utf8(raw).ok()?;
        let (identity, token) = text.split_once(':')?;
        Some(Credential::new(identity, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_round_trip() {
        let cred = Credential::new("alice", "s3cret");
        let encoded = cred.to_basic_base64();
        let decoded = Credential::from_basic_base64(&encoded).unwrap();
        assert_eq!(cred, decoded);
    }

    #[test]
    fn host_port_formatting() {
        let addr = NetAddress::DomainPort("example.com".into(), 443);
        assert_eq!(addr.to_host_port_string(), "example.com:443");
    }
}

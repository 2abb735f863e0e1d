//! HTTP CONNECT client and server handshake state machines (§4.2, §4.3).
//!
//! Both sides speak the same wire shape — a request/response head followed
//! by a blank-line terminator and then raw tunnel bytes — so this module
//! keeps them side by side: `ConnectClient` drives the outbound handshake,
//! `ConnectServer` drives the inbound one. Neither re-parses anything once
//! the tunnel is established; from that point bytes pass straight to Glue.

use crate::buffer::{NeedMoreData, ReadBuffer};
use crate::error::ProxyError;
use crate::http_head::{parse_request_head, parse_response_head};
use crate::net_address::{Credential, NetAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectClientState {
    Inactive,
    WaitingForClientGreeting,
    WaitingForHttpHead,
    WaitingForHttpEnd,
    Active,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectClientEvent {
    DeliverOneHead,
    ProxyEstablished,
}

/// Drives a CONNECT request from the dialling side.
pub struct ConnectClient {
    state: ConnectClientState,
    destination: NetAddress,
    credential: Option<Credential>,
}

impl ConnectClient {
    pub fn new(destination: NetAddress, credential: Option<Credential>) -> Self {
        ConnectClient { state: ConnectClientState::Inactive, destination, credential }
    }

    pub fn state(&self) -> ConnectClientState {
        self.state
    }

    /// Precondition: `Inactive`. Returns the request bytes to write and
    /// advances straight to `WaitingForHttpHead` — there is no distinct
    /// wire event for "greeting sent".
    pub fn begin(&mut self) -> Result<Vec<u8>, ProxyError> {
        if self.state != ConnectClientState::Inactive {
            self.state = ConnectClientState::Error;
            return Err(ProxyError::InvalidClientState);
        }
        self.state = ConnectClientState::WaitingForClientGreeting;

        let host_port = self.destination.to_host_port_string();
        let mut out = format!("CONNECT {} HTTP/1.1\r\n", host_port);
        if let Some(cred) = &self.credential {
            out.push_str("Proxy-Authorization: Basic ");
            out.push_str(&cred.to_basic_base64());
            out.push_str("\r\n");
        }
        out.push_str("\r\n");

        self.state = ConnectClientState::WaitingForHttpHead;
        Ok(out.into_bytes())
    }

    /// Feed bytes read from the peer. Returns `Ok(None)` while more data is
    /// needed; otherwise the event for the transition just taken. Call
    /// repeatedly (the caller owns the read loop) until `ProxyEstablished`.
    pub fn on_bytes(&mut self, buf: &mut ReadBuffer) -> Result<Option<ConnectClientEvent>, ProxyError> {
        match self.state {
            ConnectClientState::WaitingForHttpHead => match buf.parse_unwinding(parse_response_head) {
                Ok(head) => {
                    if (200..300).contains(&head.status) {
                        self.state = ConnectClientState::WaitingForHttpEnd;
                        Ok(Some(ConnectClientEvent::DeliverOneHead))
                    } else if head.status == 407 {
                        self.state = ConnectClientState::Error;
                        Err(ProxyError::ProxyAuthenticationRequired)
                    } else {
                        self.state = ConnectClientState::Error;
                        Err(ProxyError::InvalidProxyResponse(head.status))
                    }
                }
                Err(NeedMoreData) => Ok(None),
            },
            ConnectClientState::WaitingForHttpEnd => {
                // CONNECT responses carry no body; the blank line that
                // ended the head already ended the message.
                self.state = ConnectClientState::Active;
                Ok(Some(ConnectClientEvent::ProxyEstablished))
            }
            ConnectClientState::Inactive | ConnectClientState::WaitingForClientGreeting => {
                self.state = ConnectClientState::Error;
                Err(ProxyError::InvalidClientState)
            }
            ConnectClientState::Active | ConnectClientState::Error => {
                self.state = ConnectClientState::Error;
                Err(ProxyError::UnexpectedRead)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectServerState {
    Inactive,
    WaitingForClientGreeting,
    WaitingForClientGreetingEnd,
    WaitingToSendGreeting,
    Active,
    Error,
}

/// Accepts exactly one CONNECT request, then hands off to Glue.
pub struct ConnectServer {
    state: ConnectServerState,
    required_credential: Option<Credential>,
    pending_inbound: Vec<u8>,
}

impl ConnectServer {
    pub fn new(required_credential: Option<Credential>) -> Self {
        ConnectServer {
            state: ConnectServerState::WaitingForClientGreeting,
            required_credential,
            pending_inbound: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectServerState {
        self.state
    }

    /// Parse the request head out of `buf`. On success, returns the
    /// destination to dial and moves to `WaitingToSendGreeting`; any bytes
    /// already pushed to `buf` past the head are preserved for `dial_ok`'s
    /// drain.
    pub fn on_bytes(&mut self, buf: &mut ReadBuffer) -> Result<Option<NetAddress>, ProxyError> {
        if self.state != ConnectServerState::WaitingForClientGreeting {
            self.state = ConnectServerState::Error;
            return Err(ProxyError::InvalidServerState);
        }
        match buf.parse_unwinding(parse_request_head) {
            Ok(head) => {
                if !head.method.eq_ignore_ascii_case("CONNECT") {
                    self.state = ConnectServerState::Error;
                    return Err(ProxyError::UnsupportedHttpProxyMethod);
                }
                if let Some(required) = &self.required_credential {
                    let authorized = head
                        .header("proxy-authorization")
                        .and_then(|v| v.strip_prefix("Basic "))
                        .and_then(Credential::from_basic_base64)
                        .map(|given| given == *required)
                        .unwrap_or(false);
                    if !authorized {
                        self.state = ConnectServerState::Error;
                        return Err(ProxyError::ProxyAuthenticationRequired);
                    }
                }
                let destination = parse_authority(&head.uri)?;
                self.pending_inbound.extend_from_slice(buf.remaining());
                self.state = ConnectServerState::WaitingForClientGreetingEnd;
                self.state = ConnectServerState::WaitingToSendGreeting;
                Ok(Some(destination))
            }
            Err(NeedMoreData) => Ok(None),
        }
    }

    /// Buffer additional inbound bytes that arrive while the server is
    /// dialling (bytes already pipelined past the request head are captured
    /// automatically by `on_bytes`); all of it is replayed, in order, once
    /// the tunnel is spliced.
    pub fn buffer_inbound(&mut self, bytes: &[u8]) {
        self.pending_inbound.extend_from_slice(bytes);
    }

    /// Peer dial succeeded: emit the success response, move to `Active`,
    /// and hand back whatever inbound bytes were buffered during the dial.
    pub fn dial_ok(&mut self) -> Result<(Vec<u8>, Vec<u8>), ProxyError> {
        if self.state != ConnectServerState::WaitingToSendGreeting {
            self.state = ConnectServerState::Error;
            return Err(ProxyError::InvalidServerState);
        }
        self.state = ConnectServerState::Active;
        let response = b"HTTP/1.1 200 Connection Established\r\nContent-Length: 0\r\n\r\n".to_vec();
        Ok((response, std::mem::take(&mut self.pending_inbound)))
    }

    pub fn dial_failed(&mut self) {
        self.state = ConnectServerState::Error;
    }
}

/// Parse `host:port`, preferring a literal IP; domains are kept verbatim.
fn parse_authority(authority: &str) -> Result<NetAddress, ProxyError> {
    let (host, port_str) = authority
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::InvalidUrl(authority.to_string()))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| ProxyError::InvalidUrl(authority.to_string()))?;
    if host.is_empty() {
        return Err(ProxyError::InvalidUrl(authority.to_string()));
    }
    if let Ok(v4) = host.parse::<std::net::Ipv4Addr>() {
        return Ok(NetAddress::SocketAddress(crate::net_address::IpAddr::V4(v4), port));
    }
    if let Ok(v6) = host.parse::<std::net::Ipv6Addr>() {
        return Ok(NetAddress::SocketAddress(crate::net_address::IpAddr::V6(v6), port));
    }
    Ok(NetAddress::DomainPort(host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_happy_path_s1() {
        let mut client = ConnectClient::new(
            NetAddress::SocketAddress(crate::net_address::IpAddr::V4("127.0.0.1".parse().unwrap()), 6152),
            None,
        );
        let request = client.begin().unwrap();
        assert_eq!(request, b"CONNECT 127.0.0.1:6152 HTTP/1.1\r\n\r\n");
        assert_eq!(client.state(), ConnectClientState::WaitingForHttpHead);

        let mut buf = ReadBuffer::new();
        buf.push(b"HTTP/1.1 200 Connection Established\r\nContent-Length: 0\r\n\r\n");
        let ev1 = client.on_bytes(&mut buf).unwrap();
        assert_eq!(ev1, Some(ConnectClientEvent::DeliverOneHead));
        let ev2 = client.on_bytes(&mut buf).unwrap();
        assert_eq!(ev2, Some(ConnectClientEvent::ProxyEstablished));
        assert_eq!(client.state(), ConnectClientState::Active);
    }

    #[test]
    fn client_auth_failure_s2() {
        let mut client = ConnectClient::new(NetAddress::DomainPort("example.com".into(), 443), None);
        client.begin().unwrap();
        let mut buf = ReadBuffer::new();
        buf.push(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n");
        let err = client.on_bytes(&mut buf).unwrap_err();
        assert_eq!(err, ProxyError::ProxyAuthenticationRequired);
        assert_eq!(client.state(), ConnectClientState::Error);
    }

    #[test]
    fn server_rejects_non_connect_method() {
        let mut server = ConnectServer::new(None);
        let mut buf = ReadBuffer::new();
        buf.push(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let err = server.on_bytes(&mut buf).unwrap_err();
        assert_eq!(err, ProxyError::UnsupportedHttpProxyMethod);
    }

    #[test]
    fn server_full_handshake_s1() {
        let mut server = ConnectServer::new(None);
        let mut buf = ReadBuffer::new();
        buf.push(b"CONNECT 127.0.0.1:6152 HTTP/1.1\r\n\r\n");
        let destination = server.on_bytes(&mut buf).unwrap().unwrap();
        assert_eq!(
            destination,
            NetAddress::SocketAddress(crate::net_address::IpAddr::V4("127.0.0.1".parse().unwrap()), 6152)
        );
        server.buffer_inbound(b"ping");
        let (response, replay) = server.dial_ok().unwrap();
        assert_eq!(response, b"HTTP/1.1 200 Connection Established\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(replay, b"ping");
        assert_eq!(server.state(), ConnectServerState::Active);
    }

    #[test]
    fn server_captures_pipelined_bytes_delivered_in_the_same_read() {
        let mut server = ConnectServer::new(None);
        let mut buf = ReadBuffer::new();
        buf.push(b"CONNECT 127.0.0.1:6152 HTTP/1.1\r\n\r\nping");
        let destination = server.on_bytes(&mut buf).unwrap().unwrap();
        assert_eq!(
            destination,
            NetAddress::SocketAddress(crate::net_address::IpAddr::V4("127.0.0.1".parse().unwrap()), 6152)
        );
        let (_response, replay) = server.dial_ok().unwrap();
        assert_eq!(replay, b"ping");
    }

    #[test]
    fn server_requires_matching_credential() {
        let required = Credential::new("user", "pass");
        let mut server = ConnectServer::new(Some(required.clone()));
        let mut buf = ReadBuffer::new();
        buf.push(format!("CONNECT example.com:443 HTTP/1.1\r\nProxy-Authorization: Basic {}\r\n\r\n", required.to_basic_base64()).as_bytes());
        assert!(server.on_bytes(&mut buf).unwrap().is_some());
    }
}

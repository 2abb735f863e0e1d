//! Plain HTTP proxy server (§4.4, C6): absolute-URI requests that are
//! *not* CONNECT. Unlike `ConnectServer`, this stage stays in the
//! pipeline after dialling — it strips hop-by-hop headers and re-emits a
//! relative-form head to the origin, rather than handing off to a byte-
//! transparent tunnel on the first response.

use crate::buffer::{NeedMoreData, ReadBuffer};
use crate::error::ProxyError;
use crate::http_head::{parse_request_head, RequestHead};
use crate::net_address::{Credential, NetAddress};

/// Headers that are meaningful only between a client and its immediate
/// proxy hop and must never be forwarded to the origin.
const HOP_BY_HOP: &[&str] = &[
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "connection",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpProxyServerState {
    WaitingForClientHead,
    WaitingToDial,
    Active,
    Error,
}

/// One forwarded request's worth of buffered body bytes, held while the
/// dial to the origin is in flight and flushed once it completes.
#[derive(Default)]
struct PendingBody {
    chunks: Vec<Vec<u8>>,
}

pub struct HttpProxyServer {
    state: HttpProxyServerState,
    required_credential: Option<Credential>,
    pending: PendingBody,
}

impl HttpProxyServer {
    pub fn new(required_credential: Option<Credential>) -> Self {
        HttpProxyServer {
            state: HttpProxyServerState::WaitingForClientHead,
            required_credential,
            pending: PendingBody::default(),
        }
    }

    pub fn state(&self) -> HttpProxyServerState {
        self.state
    }

    /// Parse the request head. On success the caller must dial the
    /// returned destination; `head` is already stripped of hop-by-hop
    /// headers and ready to re-serialize toward the origin.
    pub fn on_bytes(
        &mut self,
        buf: &mut ReadBuffer,
    ) -> Result<Option<(NetAddress, RequestHead)>, ProxyError> {
        if self.state != HttpProxyServerState::WaitingForClientHead {
            self.state = HttpProxyServerState::Error;
            return Err(ProxyError::InvalidServerState);
        }
        match buf.parse_unwinding(parse_request_head) {
            Ok(mut head) => {
                if head.method.eq_ignore_ascii_case("CONNECT") {
                    self.state = HttpProxyServerState::Error;
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
                        self.state = HttpProxyServerState::Error;
                        return Err(ProxyError::ProxyAuthenticationRequired);
                    }
                }
                let destination = derive_destination(&head)?;
                strip_hop_by_hop(&mut head);
                self.state = HttpProxyServerState::WaitingToDial;
                Ok(Some((destination, head)))
            }
            Err(NeedMoreData) => Ok(None),
        }
    }

    /// Buffer a `body`/`end` part that arrived while the dial to the
    /// origin is still outstanding.
    pub fn buffer_part(&mut self, chunk: &[u8]) {
        self.pending.chunks.push(chunk.to_vec());
    }

    /// Peer dial succeeded: move to `Active` and hand back every buffered
    /// part, in order, for immediate flush onto the now-spliced channel.
    pub fn dial_ok(&mut self) -> Result<Vec<Vec<u8>>, ProxyError> {
        if self.state != HttpProxyServerState::WaitingToDial {
            self.state = HttpProxyServerState::Error;
            return Err(ProxyError::InvalidServerState);
        }
        self.state = HttpProxyServerState::Active;
        Ok(std::mem::take(&mut self.pending.chunks))
    }

    pub fn dial_failed(&mut self) {
        self.state = HttpProxyServerState::Error;
    }
}

/// `host:port`, preferring an absolute URI's own authority, falling back
/// to the `Host` header, with scheme-derived default ports.
fn derive_destination(head: &RequestHead) -> Result<NetAddress, ProxyError> {
    let (scheme, authority) = split_absolute_uri(&head.uri);
    let authority = match authority {
        Some(a) if !a.is_empty() => a.to_string(),
        _ => head
            .header("host")
            .map(|h| h.to_string())
            .ok_or_else(|| ProxyError::InvalidUrl(head.uri.clone()))?,
    };
    if authority.is_empty() {
        return Err(ProxyError::InvalidUrl(head.uri.clone()));
    }
    let default_port = if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 };
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => match p.parse::<u16>() {
            Ok(port) => (h, port),
            Err(_) => (authority.as_str(), default_port),
        },
        None => (authority.as_str(), default_port),
    };
    if host.is_empty() {
        return Err(ProxyError::InvalidUrl(head.uri.clone()));
    }
    if let Ok(v4) = host.parse::<std::net::Ipv4Addr>() {
        return Ok(NetAddress::SocketAddress(crate::net_address::IpAddr::V4(v4), port));
    }
    if let Ok(v6) = host.parse::<std::net::Ipv6Addr>() {
        return Ok(NetAddress::SocketAddress(crate::net_address::IpAddr::V6(v6), port));
    }
    Ok(NetAddress::DomainPort(host.to_string(), port))
}

/// Splits `scheme://authority/path` into `(scheme, Some(authority))`; a
/// relative-form URI (no scheme) yields `("http", None)` so the caller
/// falls back to the `Host` header.
fn split_absolute_uri(uri: &str) -> (&str, Option<&str>) {
    match uri.split_once("://") {
        Some((scheme, rest)) => {
            let authority = rest.split(['/', '?']).next().unwrap_or("");
            (scheme, Some(authority))
        }
        None => ("http", None),
    }
}

fn strip_hop_by_hop(head: &mut RequestHead) {
    head.headers.retain(|(name, _)| !HOP_BY_HOP.contains(&name.to_ascii_lowercase().as_str()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_destination_from_absolute_uri() {
        let mut buf = ReadBuffer::new();
        buf.push(b"GET http://example.com:8080/index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let mut server = HttpProxyServer::new(None);
        let (destination, head) = server.on_bytes(&mut buf).unwrap().unwrap();
        assert_eq!(destination, NetAddress::DomainPort("example.com".into(), 8080));
        assert_eq!(head.method, "GET");
    }

    #[test]
    fn falls_back_to_host_header_with_https_default_port() {
        let mut buf = ReadBuffer::new();
        buf.push(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let mut server = HttpProxyServer::new(None);
        let (destination, _) = server.on_bytes(&mut buf).unwrap().unwrap();
        assert_eq!(destination, NetAddress::DomainPort("example.com".into(), 80));
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut buf = ReadBuffer::new();
        buf.push(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nConnection: keep-alive\r\nTE: trailers\r\n\r\n");
        let mut server = HttpProxyServer::new(None);
        let (_, head) = server.on_bytes(&mut buf).unwrap().unwrap();
        assert!(head.header("connection").is_none());
        assert!(head.header("te").is_none());
        assert!(head.header("host").is_some());
    }

    #[test]
    fn requires_credential_when_configured() {
        let required = Credential::new("user", "pass");
        let mut buf = ReadBuffer::new();
        buf.push(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let mut server = HttpProxyServer::new(Some(required));
        let err = server.on_bytes(&mut buf).unwrap_err();
        assert_eq!(err, ProxyError::ProxyAuthenticationRequired);
    }

    #[test]
    fn rejects_connect_method() {
        let mut buf = ReadBuffer::new();
        buf.push(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n");
        let mut server = HttpProxyServer::new(None);
        let err = server.on_bytes(&mut buf).unwrap_err();
        assert_eq!(err, ProxyError::UnsupportedHttpProxyMethod);
    }
}

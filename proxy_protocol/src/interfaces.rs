//! Collaborator interfaces imported by the core (§6). The handshake state
//! machines in this crate never open a socket, speak TLS, or parse a full
//! HTTP message body themselves — they hand off to whatever the embedding
//! runtime wires up here. Keeping these as traits (rather than concrete
//! types) is what lets `connect`/`socks5`/`vmess` stay pure byte-in,
//! byte/event-out state machines that a property test can drive without a
//! real network.

use crate::net_address::NetAddress;
use std::io;
use std::net::TcpStream;

/// Opens a TCP connection to `address` for the owning state machine's dial
/// step (CONNECT server, plain HTTP proxy server, SOCKS5 server). The event
/// loop in `proxy_server` implements this by spawning a dialer thread and
/// feeding the result back through the same channel accept threads use
/// (`accept::spawn_accept_thread`); the handshake stage only ever sees
/// `Ok`/`Err`, never how the connection was actually established.
pub trait Dial {
    fn dial(&self, address: &NetAddress) -> io::Result<TcpStream>;
}

/// Presents `cert_chain`/`private_key` to a client during the MitM splice's
/// client-facing TLS handshake. A thin wrapper is expected over
/// `rustls::ServerConfig` — this crate only needs "hand me a server config
/// for this leaf cert" at the seam.
pub trait TlsServerHandler {
    type ServerSession;

    fn handshake(&self, cert_der: &[u8], key_der: &[u8]) -> io::Result<Self::ServerSession>;
}

/// Connects onward to the real origin over TLS (the peer side of a MitM
/// splice), verifying or skipping verification per `verify_mode`.
pub trait TlsClientHandler {
    type ClientSession;

    fn handshake(&self, server_hostname: &str, verify: VerifyMode) -> io::Result<Self::ClientSession>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Strict,
    Insecure,
}

/// Optional observer invoked with the plaintext on each side of a MitM
/// splice's inner HTTP pipelines. Never on the direct (non-MitM) relay path.
pub trait TrafficCapture {
    fn observe(&self, direction: Direction, head: Option<&crate::http_head::RequestHead>, chunk: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToPeer,
    PeerToClient,
}

/// No-op capture used when no observer is configured.
pub struct NullCapture;

impl TrafficCapture for NullCapture {
    fn observe(&self, _direction: Direction, _head: Option<&crate::http_head::RequestHead>, _chunk: &[u8]) {}
}

//! Proxy protocol core: the stateful byte-to-message handshake stages for
//! HTTP CONNECT, SOCKS5 and VMESS, plus the glue that splices a completed
//! handshake into a transparent relay and the MitM splice that optionally
//! sits between them.
//!
//! Every handshake stage is pure byte-in, event/byte-out — it never owns a
//! socket, speaks TLS, or parses a full HTTP message body. Those concerns
//! are collaborators imported through `interfaces` (§6 of the design) so
//! this crate can be driven by a property test without a real network, and
//! so a single-threaded cooperative event loop (see `proxy_server`) can
//! compose it with whatever transport it actually has.

pub mod accept;
pub mod buffer;
pub mod cert_pool;
pub mod connect;
pub mod error;
pub mod glue;
pub mod http_head;
pub mod http_proxy;
pub mod interfaces;
pub mod mitm;
pub mod net_address;
pub mod socks5;
pub mod vmess;

pub use error::ProxyError;

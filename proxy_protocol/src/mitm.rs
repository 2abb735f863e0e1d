//! MitM splice (§4.11, C13). On a CONNECT tunnel whose target hostname
//! matches a configured pattern, the glue relay is replaced with a local
//! TLS server (presenting a pool-issued leaf cert) spliced to an outbound
//! TLS client toward the real origin, with inner HTTP/1 codecs and an
//! optional traffic-capture observer between them.
//!
//! This module only decides *whether* to splice and drives the cert
//! lookup; the TLS handshakes themselves and the HTTP/1 codec are
//! external collaborators (§6) — `TlsServerHandler`, `TlsClientHandler`,
//! `TrafficCapture` — because the TLS/HTTP stack is assumed available as
//! a library, not reimplemented here.

use crate::cert_pool::{CertPoolError, CertificatePool, IssuedCert};
use crate::interfaces::{Direction, TlsClientHandler, TlsServerHandler, TrafficCapture, VerifyMode};

/// Decides whether `host` should be intercepted, given the same pattern
/// set backing the certificate pool's `register_keys`.
pub fn should_intercept(patterns: &std::collections::HashSet<String>, host: &str) -> bool {
    patterns.iter().any(|p| crate::cert_pool::host_matches(p, host))
}

#[derive(Debug)]
pub enum MitmError {
    NotIntercepted,
    Cert(CertPoolError),
    ClientTls(String),
    PeerTls(String),
}

/// Result of standing up a splice: both inner TLS sessions, ready for
/// HTTP/1 codecs and Glue to be layered on top by the caller.
pub struct SplicedSessions<SS, CS> {
    pub client_session: SS,
    pub peer_session: CS,
    pub issued_cert: IssuedCert,
}

/// Performs steps 1-3 of §4.11: acquire a leaf cert, present it to the
/// client, and open a verifying (or insecure) TLS connection to the real
/// origin. Step 4 (inner HTTP/1 codecs + capture) and step 5 (Glue
/// cross-connect) are the caller's responsibility once both sessions
/// exist, since this crate does not implement an HTTP/1 body codec.
pub fn splice<T, C>(
    pool: &CertificatePool,
    allowed_patterns: &std::collections::HashSet<String>,
    host: &str,
    tls_server: &T,
    tls_client: &C,
    verify: VerifyMode,
) -> Result<SplicedSessions<T::ServerSession, C::ClientSession>, MitmError>
where
    T: TlsServerHandler,
    C: TlsClientHandler,
{
    if !should_intercept(allowed_patterns, host) {
        return Err(MitmError::NotIntercepted);
    }
    let issued_cert = pool.value(host).map_err(MitmError::Cert)?;
    let client_session = tls_server
        .handshake(issued_cert.cert_der.as_ref(), &issued_cert.key_der)
        .map_err(|e| MitmError::ClientTls(e.to_string()))?;
    let peer_session = tls_client
        .handshake(host, verify)
        .map_err(|e| MitmError::PeerTls(e.to_string()))?;
    Ok(SplicedSessions { client_session, peer_session, issued_cert })
}

/// Wraps a `TrafficCapture` observer so it can be handed a chunk without
/// the caller needing to know whether capture is configured.
pub fn observe(capture: &dyn TrafficCapture, direction: Direction, head: Option<&crate::http_head::RequestHead>, chunk: &[u8]) {
    capture.observe(direction, head, chunk);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn matches_wildcard_like_cert_pool() {
        let mut patterns = HashSet::new();
        patterns.insert("*.example.com".to_string());
        assert!(should_intercept(&patterns, "a.example.com"));
        assert!(!should_intercept(&patterns, "example.com"));
        assert!(!should_intercept(&patterns, "other.com"));
    }

    #[test]
    fn exact_pattern_matches_only_itself() {
        let mut patterns = HashSet::new();
        patterns.insert("example.com".to_string());
        assert!(should_intercept(&patterns, "example.com"));
        assert!(!should_intercept(&patterns, "a.example.com"));
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counters for Prometheus-shaped exposition. No external crate is
/// used; all counters are relaxed atomics, same as the host's request
/// latency counters.
static CONNECTIONS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
static HANDSHAKES_OK: AtomicU64 = AtomicU64::new(0);
static HANDSHAKES_FAILED: AtomicU64 = AtomicU64::new(0);
static BYTES_RELAYED: AtomicU64 = AtomicU64::new(0);

pub fn inc_connections_accepted() {
    CONNECTIONS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_handshake_ok() {
    HANDSHAKES_OK.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_handshake_failed() {
    HANDSHAKES_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn add_bytes_relayed(n: u64) {
    BYTES_RELAYED.fetch_add(n, Ordering::Relaxed);
}

/// Render metrics in Prometheus exposition format.
pub fn render() -> String {
    format!(
        "# TYPE proxy_connections_accepted_total counter\nproxy_connections_accepted_total {}\n\
         # TYPE proxy_handshakes_ok_total counter\nproxy_handshakes_ok_total {}\n\
         # TYPE proxy_handshakes_failed_total counter\nproxy_handshakes_failed_total {}\n\
         # TYPE proxy_bytes_relayed_total counter\nproxy_bytes_relayed_total {}\n",
        CONNECTIONS_ACCEPTED.load(Ordering::Relaxed),
        HANDSHAKES_OK.load(Ordering::Relaxed),
        HANDSHAKES_FAILED.load(Ordering::Relaxed),
        BYTES_RELAYED.load(Ordering::Relaxed),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_contains_all_counters() {
        inc_connections_accepted();
        inc_handshake_ok();
        inc_handshake_failed();
        add_bytes_relayed(128);
        let rendered = render();
        assert!(rendered.contains("proxy_connections_accepted_total"));
        assert!(rendered.contains("proxy_handshakes_ok_total"));
        assert!(rendered.contains("proxy_handshakes_failed_total"));
        assert!(rendered.contains("proxy_bytes_relayed_total"));
    }
}

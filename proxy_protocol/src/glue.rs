//! C12 — Glue: the bidirectional byte-for-byte relay installed once a
//! handshake reaches `Active`. Glue performs no parsing and no buffering
//! beyond what the transport itself needs; it is transparent to arbitrary
//! binary content, including a VMESS-framed stream (the frame codec sits
//! upstream of Glue, not inside it).
//!
//! The event loop drives this the same way it drives everything else:
//! `pump` is called once per readable-event on either side, and returns how
//! many bytes moved so the loop can feed `metrics::add_bytes_relayed`.

use std::io::{self, ErrorKind, Read, Write};

/// One direction of a spliced pair: read from `from`, write to `to`.
/// Holds no protocol state — closing either side must close the other,
/// which is the event loop's job (it owns both file descriptors), not
/// this type's.
pub struct GlueLeg<R, W> {
    from: R,
    to: W,
}

impl<R: Read, W: Write> GlueLeg<R, W> {
    pub fn new(from: R, to: W) -> Self {
        GlueLeg { from, to }
    }

    /// Copy whatever is currently readable from `from` to `to`. Returns
    /// `Ok(0)` on clean EOF (caller should tear down both legs); a
    /// `WouldBlock` error means "nothing to do right now", not failure.
    pub fn pump(&mut self, scratch: &mut [u8]) -> io::Result<usize> {
        let n = match self.from.read(scratch) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(usize::MAX),
            Err(e) => return Err(e),
        };
        if n == 0 {
            return Ok(0);
        }
        self.to.write_all(&scratch[..n])?;
        Ok(n)
    }
}

/// A fully spliced connection pair: client-to-peer and peer-to-client legs,
/// each pumped independently by the event loop as their respective sides
/// become readable.
pub struct Glue<R1, W1, R2, W2> {
    pub client_to_peer: GlueLeg<R1, W1>,
    pub peer_to_client: GlueLeg<R2, W2>,
}

impl<R1: Read, W1: Write, R2: Read, W2: Write> Glue<R1, W1, R2, W2> {
    pub fn new(client_read: R1, peer_write: W1, peer_read: R2, client_write: W2) -> Self {
        Glue {
            client_to_peer: GlueLeg::new(client_read, peer_write),
            peer_to_client: GlueLeg::new(peer_read, client_write),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn pump_relays_available_bytes_verbatim() {
        let mut scratch = [0u8; 4096];
        let src = Cursor::new(b"ping".to_vec());
        let mut dst = Vec::new();
        let mut leg = GlueLeg::new(src, &mut dst);
        let n = leg.pump(&mut scratch).unwrap();
        assert_eq!(n, 4);
        assert_eq!(dst, b"ping");
    }

    #[test]
    fn pump_reports_clean_eof_as_zero() {
        let mut scratch = [0u8; 16];
        let src = Cursor::new(Vec::<u8>::new());
        let mut dst = Vec::new();
        let mut leg = GlueLeg::new(src, &mut dst);
        assert_eq!(leg.pump(&mut scratch).unwrap(), 0);
    }
}

//! SHAKE128, the extendable-output function seeding VMESS's per-connection
//! `mask_hasher`. The frame codec needs to squeeze it incrementally two
//! bytes at a time across many frames, so this wraps `sha3`'s XOF reader
//! rather than exposing a single-shot `shake128(data, out_len)` call.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128 as Sha3Shake128;

pub struct Shake128 {
    reader: Option<<Sha3Shake128 as ExtendableOutput>::Reader>,
    pending: Sha3Shake128,
}

impl Shake128 {
    pub fn new() -> Self {
        Shake128 { reader: None, pending: Sha3Shake128::default() }
    }

    /// Absorb all of `data`. Must be called exactly once before `squeeze`.
    pub fn absorb(&mut self, data: &[u8]) {
        debug_assert!(self.reader.is_none(), "absorb() after squeeze() is not supported");
        self.pending.update(data);
        let hasher = std::mem::take(&mut self.pending);
        self.reader = Some(hasher.finalize_xof());
    }

    /// Squeeze `out.len()` bytes of output, continuing from wherever the
    /// previous `squeeze` call left off.
    pub fn squeeze(&mut self, out: &mut [u8]) {
        let reader = self.reader.as_mut().expect("squeeze() before absorb()");
        reader.read(out);
    }
}

impl Default for Shake128 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot helper: absorb `data` and return exactly `out_len` bytes of
/// SHAKE128 output.
pub fn shake128(data: &[u8], out_len: usize) -> Vec<u8> {
    let mut xof = Shake128::new();
    xof.absorb(data);
    let mut out = vec![0u8; out_len];
    xof.squeeze(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_known_prefix() {
        // NIST SHAKE128("") first 32 bytes.
        let out = shake128(b"", 32);
        let expected: [u8; 32] = [
            0x7f, 0x9c, 0x2b, 0xa4, 0xe8, 0x8f, 0x82, 0x7d, 0x61, 0x60, 0x45, 0x50, 0x76, 0x05,
            0x85, 0x3e, 0xd7, 0x3b, 0x80, 0x93, 0xf6, 0xef, 0xbc, 0x88, 0xeb, 0x1a, 0x6e, 0xac,
            0xfa, 0x66, 0xef, 0x26,
        ];
        assert_eq!(out, expected);
    }

    #[test]
    fn incremental_squeeze_matches_one_shot() {
        let one_shot = shake128(b"vmess-mask-seed", 40);
        let mut xof = Shake128::new();
        xof.absorb(b"vmess-mask-seed");
        let mut incremental = Vec::new();
        for _ in 0..20 {
            let mut chunk = [0u8; 2];
            xof.squeeze(&mut chunk);
            incremental.extend_from_slice(&chunk);
        }
        assert_eq!(one_shot, incremental);
    }
}

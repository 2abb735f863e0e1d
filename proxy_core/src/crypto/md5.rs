//! MD5, used only for VMESS's `cmd_key` derivation and ChaCha20-Poly1305 key
//! expansion (`MD5(k) || MD5(MD5(k))`) — never for anything requiring
//! collision resistance.

use md5::{Digest, Md5};

/// Compute the MD5 digest of `data`.
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

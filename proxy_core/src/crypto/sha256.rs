//! SHA-256, used for VMESS's response-direction key derivation
//! (`resp_key`/`resp_nonce` and the frame codec's `effective_key`/
//! `effective_nonce`) and as the base hash for the cascaded-HMAC KDF.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 digest of `data`.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

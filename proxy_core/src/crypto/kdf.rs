//! Cascaded-HMAC key derivation used to turn a VMESS session's 16-byte IKM
//! into the various AEAD keys/nonces needed for header sealing, header
//! opening, and per-connection length obfuscation.
//!
//! The construction nests HMAC-SHA256 instances inside one another: the
//! "hash function" backing level `i`'s HMAC is level `i-1`'s HMAC keyed by
//! the previous path component, bottoming out at SHA256. Given a path of
//! info strings `[p0, p1, ..., pn]`:
//!
//! ```text
//! H0 = HMAC(key = "VMess AEAD KDF", hash = SHA256)
//! H1 = HMAC(key = p0,               hash = H0)
//! H2 = HMAC(key = p1,               hash = H1)
//! ...
//! Hn+1 = HMAC(key = pn,             hash = Hn)
//! output = Hn+1(IKM)
//! ```
//!
//! This is the same recursive trick the reference VMESS implementations use
//! so that every derived key is bound to the full path of labels that
//! produced it, not just its position in a flat HKDF expansion.

use super::sha256::sha256_digest;

const ROOT_SALT: &[u8] = b"VMess AEAD KDF";

pub const LABEL_AUTH_ID_ENCRYPTION_KEY: &[u8] = b"AES Auth ID Encryption";
pub const LABEL_RESP_HEADER_LEN_KEY: &[u8] = b"AEAD Resp Header Len Key";
pub const LABEL_RESP_HEADER_LEN_IV: &[u8] = b"AEAD Resp Header Len IV";
pub const LABEL_RESP_HEADER_PAYLOAD_KEY: &[u8] = b"AEAD Resp Header Key";
pub const LABEL_RESP_HEADER_PAYLOAD_IV: &[u8] = b"AEAD Resp Header IV";
pub const LABEL_HEADER_PAYLOAD_KEY: &[u8] = b"VMess Header AEAD Key";
pub const LABEL_HEADER_PAYLOAD_IV: &[u8] = b"VMess Header AEAD Nonce";
pub const LABEL_HEADER_LENGTH_KEY: &[u8] = b"VMess Header AEAD Key_Length";
pub const LABEL_HEADER_LENGTH_IV: &[u8] = b"VMess Header AEAD Nonce_Length";

/// Apply the hash function at nesting `level` to `data`. `level == -1` is
/// the base case (plain SHA-256); `level == 0` is HMAC keyed by the root
/// salt over SHA-256; `level >= 1` is HMAC keyed by `path[level - 1]` over
/// the function at `level - 1`. Each level is computed by direct recursion
/// rather than by building a chain of boxed closures, since the "hash
/// function" at level `i` is only ever invoked synchronously while
/// computing level `i + 1` and never needs to outlive that call.
fn apply_level(path: &[&[u8]], level: isize, data: &[u8]) -> [u8; 32] {
    if level < 0 {
        return sha256_digest(data);
    }
    let key: &[u8] = if level == 0 { ROOT_SALT } else { path[(level - 1) as usize] };
    hmac_at_level(path, level - 1, key, data)
}

fn hmac_at_level(path: &[&[u8]], parent_level: isize, key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut block_key = [0u8; 64];
    if key.len() > 64 {
        block_key[..32].copy_from_slice(&apply_level(path, parent_level, key));
    } else {
        block_key[..key.len()].copy_from_slice(key);
    }

    let mut ipad = [0x36u8; 64];
    let mut opad = [0x5cu8; 64];
    for i in 0..64 {
        ipad[i] ^= block_key[i];
        opad[i] ^= block_key[i];
    }

    let mut inner = ipad.to_vec();
    inner.extend_from_slice(data);
    let inner_digest = apply_level(path, parent_level, &inner);

    let mut outer = opad.to_vec();
    outer.extend_from_slice(&inner_digest);
    apply_level(path, parent_level, &outer)
}

/// Derive the 32-byte cascaded-HMAC output for `ikm` given a path of info
/// strings. `path` must be non-empty.
pub fn cascaded_hmac(path: &[&[u8]], ikm: &[u8]) -> [u8; 32] {
    assert!(!path.is_empty(), "KDF path must have at least one label");
    apply_level(path, path.len() as isize, ikm)
}

/// Derive a 16-byte key/IV by truncating the cascaded-HMAC output.
pub fn kdf16(path: &[&[u8]], ikm: &[u8]) -> [u8; 16] {
    let full = cascaded_hmac(path, ikm);
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

/// Derive a 12-byte nonce by truncating the cascaded-HMAC output.
pub fn kdf12(path: &[&[u8]], ikm: &[u8]) -> [u8; 12] {
    let full = cascaded_hmac(path, ikm);
    let mut out = [0u8; 12];
    out.copy_from_slice(&full[..12]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_and_path_sensitive() {
        let ikm = [0x42u8; 16];
        let a = kdf16(&[LABEL_HEADER_PAYLOAD_KEY], &ikm);
        let b = kdf16(&[LABEL_HEADER_PAYLOAD_KEY], &ikm);
        assert_eq!(a, b);

        let c = kdf16(&[LABEL_HEADER_LENGTH_KEY], &ikm);
        assert_ne!(a, c, "different labels must yield different keys");
    }

    #[test]
    fn nested_path_differs_from_single_label() {
        let ikm = [0x07u8; 16];
        let single = kdf16(&[LABEL_HEADER_PAYLOAD_KEY], &ikm);
        let nested = kdf16(&[LABEL_HEADER_PAYLOAD_KEY, LABEL_HEADER_PAYLOAD_IV], &ikm);
        assert_ne!(single, nested);
    }
}

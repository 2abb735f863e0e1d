//! Derivation of the per-user `cmd_key` and the per-request `auth_id` block
//! that opens a VMESS sealed header.

use proxy_core::crypto::aes::aes128_encrypt_block;
use proxy_core::crypto::crc32::crc32_ieee;
use proxy_core::crypto::kdf::{kdf16, LABEL_AUTH_ID_ENCRYPTION_KEY};
use proxy_core::crypto::md5::md5_digest;
use proxy_core::crypto::rand::fill_random;
use uuid::Uuid;

/// Fixed legacy salt appended to the raw user id before hashing. This is a
/// wire-format constant, not a secret.
const CMD_KEY_SALT: &[u8] = b"c48619fe-8f02-49e0-b9e9-edf763e17e21";

pub fn generate_cmd_key(user_id: Uuid) -> [u8; 16] {
    let mut buf = Vec::with_capacity(16 + CMD_KEY_SALT.len());
    buf.extend_from_slice(user_id.as_bytes());
    buf.extend_from_slice(CMD_KEY_SALT);
    md5_digest(&buf)
}

/// Encrypt a fresh 16-byte `auth_id` block: `be_u64(now_s) || rand(4) ||
/// be_u32(crc32(first 12 bytes))`, AES-128-ECB-encrypted under a key
/// derived from `cmd_key`.
pub fn seal_auth_id(cmd_key: &[u8; 16], now_unix_secs: u64) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[0..8].copy_from_slice(&now_unix_secs.to_be_bytes());
    let mut rand_bytes = [0u8; 4];
    fill_random(&mut rand_bytes).expect("CSPRNG must be available");
    block[8..12].copy_from_slice(&rand_bytes);
    let checksum = crc32_ieee(&block[0..12]);
    block[12..16].copy_from_slice(&checksum.to_be_bytes());

    let key = kdf16(&[LABEL_AUTH_ID_ENCRYPTION_KEY], cmd_key);
    aes128_encrypt_block(&key, &mut block);
    block
}

// No `auth_id` decrypt/verify path here: this crate only drives the VMESS
// client side, and a client only ever seals its own `auth_id`, never opens
// one. That direction needs the AES-128 decrypt primitive this crate does
// not expose.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_key_is_deterministic() {
        let uid = Uuid::nil();
        assert_eq!(generate_cmd_key(uid), generate_cmd_key(uid));
    }

    #[test]
    fn auth_id_changes_with_clock() {
        let cmd_key = generate_cmd_key(Uuid::nil());
        let a = seal_auth_id(&cmd_key, 1_700_000_000);
        let b = seal_auth_id(&cmd_key, 1_700_000_001);
        assert_ne!(a, b);
    }
}

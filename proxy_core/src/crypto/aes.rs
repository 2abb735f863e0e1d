//! Single-block AES-128-ECB encryption, used only to seal the VMESS
//! `auth_id` block (a fixed-size timestamp+random+checksum blob, never more
//! than one block). Everything else in this crate that needs AES goes
//! through AEAD (`aes_gcm`) instead.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// Encrypt a single 16-byte block in place under `key`, ECB-style (no
/// chaining — callers must only ever feed this exactly one block).
pub fn aes128_encrypt_block(key: &[u8; 16], block: &mut [u8; 16]) {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    cipher.encrypt_block(GenericArray::from_mut_slice(block));
}

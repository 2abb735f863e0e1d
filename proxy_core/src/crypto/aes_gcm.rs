//! AES-128-GCM, the default VMESS AEAD. `seal`/`open` work in place on a
//! `Vec<u8>` and separate out the tag, matching the shape the header
//! sealer/opener and frame codec build their wire layout around (ciphertext
//! and tag are transmitted as adjacent but distinct fields).

use aes_gcm::aead::{generic_array::GenericArray, AeadInPlace, KeyInit};
use aes_gcm::Aes128Gcm;

/// Encrypt `plaintext` in place and return the 16-byte authentication tag.
pub fn seal(key: &[u8; 16], nonce: &[u8; 12], aad: &[u8], plaintext: &mut Vec<u8>) -> [u8; 16] {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, plaintext)
        .expect("AES-128-GCM seal cannot fail for in-spec inputs");
    tag.into()
}

/// Decrypt `ciphertext` in place if `tag` validates. Returns `true` on
/// success; on failure `ciphertext` is left undefined and must be discarded.
pub fn open(key: &[u8; 16], nonce: &[u8; 12], aad: &[u8], ciphertext: &mut Vec<u8>, tag: &[u8; 16]) -> bool {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    cipher
        .decrypt_in_place_detached(GenericArray::from_slice(nonce), aad, ciphertext, GenericArray::from_slice(tag))
        .is_ok()
}

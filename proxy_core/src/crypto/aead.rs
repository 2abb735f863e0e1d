//! ChaCha20-Poly1305 AEAD (RFC 8439), the alternate VMESS content-security
//! mode. Same in-place `seal`/`open` shape as `aes_gcm` so `frame_codec` can
//! dispatch on `ContentSecurity` without the caller caring which cipher is
//! underneath.

use chacha20poly1305::aead::{generic_array::GenericArray, AeadInPlace, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;

/// Encrypt `plaintext` in place and return the 16-byte authentication tag.
pub fn seal(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], plaintext: &mut Vec<u8>) -> [u8; 16] {
    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key));
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, plaintext)
        .expect("ChaCha20-Poly1305 seal cannot fail for in-spec inputs");
    tag.into()
}

/// Decrypt `ciphertext` in place if `tag` validates. Returns `true` on
/// success; on failure `ciphertext` is left undefined and must be discarded.
pub fn open(key: &[u8; 32], nonce: &[u8; 12], aad: &[u8], ciphertext: &mut Vec<u8>, tag: &[u8; 16]) -> bool {
    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key));
    cipher
        .decrypt_in_place_detached(GenericArray::from_slice(nonce), aad, ciphertext, GenericArray::from_slice(tag))
        .is_ok()
}

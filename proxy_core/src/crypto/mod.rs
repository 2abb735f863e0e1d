//! Cryptographic primitives backing the proxy state machines: AEAD ciphers
//! for VMESS frame payloads, the cascaded-HMAC KDF for the VMESS key
//! schedule, and the odds and ends (MD5, CRC32, SHAKE128) the VMESS wire
//! format happens to need. Built on the RustCrypto stack rather than
//! hand-rolled, since this is the one layer where a subtly wrong
//! from-scratch implementation is a real security bug, not just wasted
//! effort.

pub mod rand;
pub mod sha256;
pub mod aead;
pub mod aes;
pub mod aes_gcm;
pub mod md5;
pub mod crc32;
pub mod shake128;
pub mod kdf;

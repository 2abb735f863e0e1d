//! VMESS client data-stream framing (§1 scope, §4.7-§4.10): AEAD request
//! header sealing, response header opening, and per-frame encryption with
//! optional padding/masking/length-authentication.

pub mod auth_id;
pub mod fnv;
pub mod frame_codec;
pub mod header_open;
pub mod header_seal;
pub mod session;

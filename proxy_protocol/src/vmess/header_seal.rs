//! C9 — VMESS header sealer: turns a session's key material plus a
//! destination into the bytes written first on a new VMESS connection.
//!
//! ```text
//! auth_id(16) || sealed_length(2 + 16 tag) || random_path(8) || sealed_payload(N + 16 tag)
//! ```

use proxy_core::crypto::aes_gcm;
use proxy_core::crypto::kdf::{
    kdf12, kdf16, LABEL_HEADER_LENGTH_IV, LABEL_HEADER_LENGTH_KEY, LABEL_HEADER_PAYLOAD_IV,
    LABEL_HEADER_PAYLOAD_KEY,
};
use proxy_core::crypto::rand::fill_random;

use crate::net_address::NetAddress;
use crate::vmess::auth_id::{generate_cmd_key, seal_auth_id};
use crate::vmess::fnv::fnv1a32;
use crate::vmess::session::{CommandCode, ContentSecurity, VmessSessionKeys};

pub struct SealedHeader {
    pub auth_id: [u8; 16],
    pub sealed_length: [u8; 18],
    pub random_path: [u8; 8],
    pub sealed_payload: Vec<u8>,
}

impl SealedHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 18 + 8 + self.sealed_payload.len());
        out.extend_from_slice(&self.auth_id);
        out.extend_from_slice(&self.sealed_length);
        out.extend_from_slice(&self.random_path);
        out.extend_from_slice(&self.sealed_payload);
        out
    }
}

fn content_security_nibble(security: ContentSecurity) -> u8 {
    match security {
        ContentSecurity::Aes128Gcm => 0x03,
        ContentSecurity::ChaCha20Poly1305 => 0x04,
        ContentSecurity::None => 0x05,
        ContentSecurity::Zero => 0x06,
        ContentSecurity::Auto => 0x00,
    }
}

fn atyp_and_addr(addr: &NetAddress) -> (u8, Vec<u8>) {
    match addr {
        NetAddress::DomainPort(host, _) => {
            let mut bytes = Vec::with_capacity(1 + host.len());
            bytes.push(host.len() as u8);
            bytes.extend_from_slice(host.as_bytes());
            (0x02, bytes)
        }
        NetAddress::SocketAddress(crate::net_address::IpAddr::V4(v4), _) => (0x01, v4.octets().to_vec()),
        NetAddress::SocketAddress(crate::net_address::IpAddr::V6(v6), _) => (0x03, v6.octets().to_vec()),
    }
}

/// Seal a request header for `destination` using `keys`. `now_unix_secs`
/// and the random draws are the only external inputs; everything else is
/// derived deterministically so the same inputs always produce the same
/// sealed bytes (regression-testable per the data model's determinism
/// property).
pub fn seal_request_header(
    keys: &VmessSessionKeys,
    destination: &NetAddress,
    now_unix_secs: u64,
) -> SealedHeader {
    let cmd_key = generate_cmd_key(keys.user_id);
    let auth_id = seal_auth_id(&cmd_key, now_unix_secs);

    let mut random_path = [0u8; 8];
    fill_random(&mut random_path).expect("CSPRNG must be available");

    let mut ikm = Vec::with_capacity(8 + 16);
    ikm.extend_from_slice(&random_path);
    ikm.extend_from_slice(&cmd_key);

    let length_key = kdf16(&[LABEL_HEADER_LENGTH_KEY, &auth_id], &ikm);
    let length_nonce = kdf12(&[LABEL_HEADER_LENGTH_IV, &auth_id], &ikm);
    let payload_key = kdf16(&[LABEL_HEADER_PAYLOAD_KEY, &auth_id], &ikm);
    let payload_nonce = kdf12(&[LABEL_HEADER_PAYLOAD_IV, &auth_id], &ikm);

    let plaintext = build_plaintext_payload(keys, destination);

    let mut length_pt = (plaintext.len() as u16).to_be_bytes().to_vec();
    let length_tag = aes_gcm::seal(&length_key, &length_nonce, &auth_id, &mut length_pt);
    let mut sealed_length = [0u8; 18];
    sealed_length[0..2].copy_from_slice(&length_pt);
    sealed_length[2..18].copy_from_slice(&length_tag);

    let mut payload_ct = plaintext;
    let payload_tag = aes_gcm::seal(&payload_key, &payload_nonce, &auth_id, &mut payload_ct);
    let mut sealed_payload = payload_ct;
    sealed_payload.extend_from_slice(&payload_tag);

    SealedHeader { auth_id, sealed_length, random_path, sealed_payload }
}

fn build_plaintext_payload(keys: &VmessSessionKeys, destination: &NetAddress) -> Vec<u8> {
    let mut body = Vec::with_capacity(64);
    body.push(1u8); // ver
    body.extend_from_slice(&keys.req_nonce);
    body.extend_from_slice(&keys.req_key);
    body.push(keys.auth_code);
    body.push(keys.stream_options.bits());

    let mut padding_len_byte = [0u8; 1];
    fill_random(&mut padding_len_byte).expect("CSPRNG must be available");
    let padding_nibble = padding_len_byte[0] & 0x0f;
    body.push((padding_nibble << 4) | content_security_nibble(keys.content_security));

    body.push(0x00);
    body.push(keys.command_code.to_wire());

    if !matches!(keys.command_code, CommandCode::Mux) {
        body.extend_from_slice(&destination.port().to_be_bytes());
        let (atyp, addr_bytes) = atyp_and_addr(destination);
        body.push(atyp);
        body.extend_from_slice(&addr_bytes);
    }

    if padding_nibble > 0 {
        let mut padding = vec![0u8; padding_nibble as usize];
        fill_random(&mut padding).expect("CSPRNG must be available");
        body.extend_from_slice(&padding);
    }

    let checksum = fnv1a32(&body);
    body.extend_from_slice(&checksum.to_be_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmess::session::StreamOptions;
    use uuid::Uuid;

    #[test]
    fn sealed_header_has_expected_framing_lengths() {
        let keys = VmessSessionKeys::new(
            Uuid::nil(),
            ContentSecurity::Aes128Gcm,
            StreamOptions::empty(),
            CommandCode::Tcp,
        );
        let destination = NetAddress::DomainPort("example.com".into(), 443);
        let sealed = seal_request_header(&keys, &destination, 1_700_000_000);

        assert_eq!(sealed.auth_id.len(), 16);
        assert_eq!(sealed.sealed_length.len(), 18);
        assert_eq!(sealed.random_path.len(), 8);
        assert!(sealed.sealed_payload.len() >= 16);

        let bytes = sealed.to_bytes();
        assert_eq!(bytes.len(), 16 + 18 + 8 + sealed.sealed_payload.len());
    }

    #[test]
    fn distinct_calls_produce_distinct_random_path() {
        let keys = VmessSessionKeys::new(
            Uuid::nil(),
            ContentSecurity::Aes128Gcm,
            StreamOptions::empty(),
            CommandCode::Tcp,
        );
        let destination = NetAddress::DomainPort("example.com".into(), 443);
        let a = seal_request_header(&keys, &destination, 1_700_000_000);
        let b = seal_request_header(&keys, &destination, 1_700_000_000);
        assert_ne!(a.random_path, b.random_path, "random_path must not repeat across calls");
    }
}

//! VMESS per-connection session material: the 16-byte user id, the random
//! key/nonce pair a sealer derives everything else from, and the options
//! bitflags whose normalisation rules are mandatory at construction time.

use proxy_core::crypto::rand::fill_random;
use proxy_core::crypto::sha256::sha256_digest;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSecurity {
    Aes128Gcm,
    ChaCha20Poly1305,
    None,
    Zero,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Tcp,
    Udp,
    Mux,
}

impl CommandCode {
    pub fn to_wire(self) -> u8 {
        match self {
            CommandCode::Tcp => 0x01,
            CommandCode::Udp => 0x02,
            CommandCode::Mux => 0x03,
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamOptions: u8 {
        const CHUNK_STREAM = 0x01;
        const CHUNK_MASKING = 0x04;
        const GLOBAL_PADDING = 0x08;
        const AUTHENTICATED_LENGTH = 0x10;
    }
}

/// Immutable-after-construction VMESS session key material. Construction
/// normalises `options`/`content_security` per the invariants so that every
/// later reader can assume the combination is internally consistent.
#[derive(Debug, Clone)]
pub struct VmessSessionKeys {
    pub user_id: Uuid,
    pub req_key: [u8; 16],
    pub req_nonce: [u8; 16],
    pub resp_key: [u8; 16],
    pub resp_nonce: [u8; 16],
    pub auth_code: u8,
    pub content_security: ContentSecurity,
    pub stream_options: StreamOptions,
    pub command_code: CommandCode,
}

impl VmessSessionKeys {
    /// Build a fresh session: draws `req_key`/`req_nonce`/`auth_code` from
    /// the CSPRNG, derives the response-direction material, and normalises
    /// `stream_options` against `content_security` per the data model's
    /// mandatory invariants.
    pub fn new(
        user_id: Uuid,
        content_security: ContentSecurity,
        mut stream_options: StreamOptions,
        command_code: CommandCode,
    ) -> Self {
        let mut req_key = [0u8; 16];
        let mut req_nonce = [0u8; 16];
        let mut auth_byte = [0u8; 1];
        fill_random(&mut req_key).expect("CSPRNG must be available");
        fill_random(&mut req_nonce).expect("CSPRNG must be available");
        fill_random(&mut auth_byte).expect("CSPRNG must be available");

        let content_security = normalize_options(&mut stream_options, content_security);

        let resp_key = truncate16(&sha256_digest(&req_key));
        let resp_nonce = truncate16(&sha256_digest(&req_nonce));

        VmessSessionKeys {
            user_id,
            req_key,
            req_nonce,
            resp_key,
            resp_nonce,
            auth_code: auth_byte[0],
            content_security,
            stream_options,
            command_code,
        }
    }

    /// Effective key/nonce actually fed to the frame AEAD: the raw
    /// `req_key`/`req_nonce` re-hashed with SHA-256 and truncated to 16
    /// bytes, per the data model.
    pub fn effective_key(&self) -> [u8; 16] {
        truncate16(&sha256_digest(&self.req_key))
    }

    pub fn effective_nonce(&self) -> [u8; 16] {
        truncate16(&sha256_digest(&self.req_nonce))
    }
}

/// Enforce: AEAD content-security forces `CHUNK_MASKING`+`GLOBAL_PADDING`
/// on; `Zero` forces `CHUNK_STREAM`+`CHUNK_MASKING` off and coerces security
/// to `None`; `None` forces `CHUNK_MASKING` on.
fn normalize_options(options: &mut StreamOptions, security: ContentSecurity) -> ContentSecurity {
    match security {
        ContentSecurity::Aes128Gcm | ContentSecurity::ChaCha20Poly1305 | ContentSecurity::Auto => {
            options.insert(StreamOptions::CHUNK_MASKING);
            options.insert(StreamOptions::GLOBAL_PADDING);
            security
        }
        ContentSecurity::Zero => {
            options.remove(StreamOptions::CHUNK_STREAM);
            options.remove(StreamOptions::CHUNK_MASKING);
            ContentSecurity::None
        }
        ContentSecurity::None => {
            options.insert(StreamOptions::CHUNK_MASKING);
            ContentSecurity::None
        }
    }
}

fn truncate16(digest: &[u8; 32]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aead_security_forces_masking_and_padding() {
        let keys = VmessSessionKeys::new(
            Uuid::nil(),
            ContentSecurity::Aes128Gcm,
            StreamOptions::empty(),
            CommandCode::Tcp,
        );
        assert!(keys.stream_options.contains(StreamOptions::CHUNK_MASKING));
        assert!(keys.stream_options.contains(StreamOptions::GLOBAL_PADDING));
    }

    #[test]
    fn zero_security_strips_framing_and_coerces_to_none() {
        let mut opts = StreamOptions::empty();
        opts.insert(StreamOptions::CHUNK_STREAM);
        opts.insert(StreamOptions::CHUNK_MASKING);
        let keys = VmessSessionKeys::new(Uuid::nil(), ContentSecurity::Zero, opts, CommandCode::Tcp);
        assert_eq!(keys.content_security, ContentSecurity::None);
        assert!(!keys.stream_options.contains(StreamOptions::CHUNK_STREAM));
        assert!(!keys.stream_options.contains(StreamOptions::CHUNK_MASKING));
    }

    #[test]
    fn none_security_forces_masking_on() {
        let keys = VmessSessionKeys::new(
            Uuid::nil(),
            ContentSecurity::None,
            StreamOptions::empty(),
            CommandCode::Tcp,
        );
        assert!(keys.stream_options.contains(StreamOptions::CHUNK_MASKING));
    }

    #[test]
    fn response_material_derives_from_request_material() {
        let keys = VmessSessionKeys::new(
            Uuid::nil(),
            ContentSecurity::Aes128Gcm,
            StreamOptions::empty(),
            CommandCode::Tcp,
        );
        let expected_resp_key = truncate16(&sha256_digest(&keys.req_key));
        assert_eq!(keys.resp_key, expected_resp_key);
    }
}

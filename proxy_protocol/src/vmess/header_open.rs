//! C10 — VMESS header opener: parses the response header a server sends
//! back after accepting a sealed request header (§4.8).

use proxy_core::crypto::aes_gcm;
use proxy_core::crypto::kdf::{
    kdf12, kdf16, LABEL_RESP_HEADER_LEN_IV, LABEL_RESP_HEADER_LEN_KEY, LABEL_RESP_HEADER_PAYLOAD_IV,
    LABEL_RESP_HEADER_PAYLOAD_KEY,
};

use crate::buffer::{NeedMoreData, ReadBuffer};
use crate::error::ProxyError;
use crate::net_address::{IpAddr, NetAddress};
use crate::vmess::fnv::fnv1a32;
use crate::vmess::session::VmessSessionKeys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicPortInstruction {
    pub address: Option<NetAddress>,
    pub port: u16,
    pub user_id: [u8; 16],
    pub level: u32,
    pub number_of_alter_ids: u16,
    pub effective_time: u32,
}

#[derive(Debug, Clone)]
pub struct OpenedHeader {
    pub options: u8,
    pub command_code: u8,
    pub instruction: Option<DynamicPortInstruction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenerState {
    WaitingLength,
    WaitingPayload(u16),
    Done,
}

/// Stateful parser driven by repeated `feed`/`poll` calls as bytes arrive
/// on the wire, the same incremental shape as the frame decoder (C11).
pub struct HeaderOpener {
    state: OpenerState,
    length_key: [u8; 16],
    length_nonce: [u8; 12],
    payload_key: [u8; 16],
    payload_nonce: [u8; 12],
    expected_auth_code: u8,
    buf: ReadBuffer,
    failed: bool,
}

impl HeaderOpener {
    pub fn new(keys: &VmessSessionKeys) -> Self {
        HeaderOpener {
            state: OpenerState::WaitingLength,
            length_key: kdf16(&[LABEL_RESP_HEADER_LEN_KEY], &keys.resp_key),
            length_nonce: kdf12(&[LABEL_RESP_HEADER_LEN_IV], &keys.resp_nonce),
            payload_key: kdf16(&[LABEL_RESP_HEADER_PAYLOAD_KEY], &keys.resp_key),
            payload_nonce: kdf12(&[LABEL_RESP_HEADER_PAYLOAD_IV], &keys.resp_nonce),
            expected_auth_code: keys.auth_code,
            buf: ReadBuffer::new(),
            failed: false,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.push(bytes);
    }

    /// Drive the state machine as far as the buffered bytes allow. Returns
    /// `Ok(None)` when more data is needed (mirrors `NeedMoreData` without
    /// exposing the sentinel type at this layer), `Ok(Some(header))` once
    /// the header is fully parsed and validated, or `Err` on a fatal
    /// decode/authentication failure — after which this opener must not be
    /// fed further bytes (§7 policy).
    pub fn poll(&mut self) -> Result<Option<OpenedHeader>, ProxyError> {
        if self.failed {
            return Err(ProxyError::AuthenticationFailure);
        }

        loop {
            match self.state {
                OpenerState::Done => return Ok(None),
                OpenerState::WaitingLength => {
                    let length_key = self.length_key;
                    let length_nonce = self.length_nonce;
                    let result = self.buf.parse_unwinding(|cur| {
                        let sealed = cur.read_slice(18)?;
                        Ok(sealed.to_vec())
                    });
                    let sealed = match result {
                        Ok(v) => v,
                        Err(NeedMoreData) => return Ok(None),
                    };
                    let mut ct = sealed[0..2].to_vec();
                    let mut tag = [0u8; 16];
                    tag.copy_from_slice(&sealed[2..18]);
                    let empty_aad: &[u8] = &[];
                    if !aes_gcm::open(&length_key, &length_nonce, empty_aad, &mut ct, &tag) {
                        self.failed = true;
                        return Err(ProxyError::AuthenticationFailure);
                    }
                    let length = u16::from_be_bytes([ct[0], ct[1]]);
                    self.state = OpenerState::WaitingPayload(length);
                }
                OpenerState::WaitingPayload(length) => {
                    let total = length as usize + 16;
                    let payload_key = self.payload_key;
                    let payload_nonce = self.payload_nonce;
                    let result = self.buf.parse_unwinding(|cur| {
                        let sealed = cur.read_slice(total)?;
                        Ok(sealed.to_vec())
                    });
                    let sealed = match result {
                        Ok(v) => v,
                        Err(NeedMoreData) => return Ok(None),
                    };
                    let mut ct = sealed[0..length as usize].to_vec();
                    let mut tag = [0u8; 16];
                    tag.copy_from_slice(&sealed[length as usize..total]);
                    let empty_aad: &[u8] = &[];
                    if !aes_gcm::open(&payload_key, &payload_nonce, empty_aad, &mut ct, &tag) {
                        self.failed = true;
                        return Err(ProxyError::AuthenticationFailure);
                    }
                    if ct.len() < 4 {
                        self.failed = true;
                        return Err(ProxyError::AuthenticationFailure);
                    }
                    if ct[0] != self.expected_auth_code {
                        self.failed = true;
                        return Err(ProxyError::AuthenticationFailure);
                    }
                    let options = ct[1];
                    let command_code = ct[2];
                    // ct[3] is the reserved zero byte.
                    let instruction = if command_code == 1 && ct.len() > 4 {
                        parse_dynamic_port_instruction(&ct[4..])
                    } else {
                        None
                    };
                    self.state = OpenerState::Done;
                    return Ok(Some(OpenedHeader { options, command_code, instruction }));
                }
            }
        }
    }
}

fn parse_dynamic_port_instruction(body: &[u8]) -> Option<DynamicPortInstruction> {
    if body.len() < 4 {
        return None;
    }
    let checksum_at = body.len() - 4;
    let expected = u32::from_be_bytes([
        body[checksum_at],
        body[checksum_at + 1],
        body[checksum_at + 2],
        body[checksum_at + 3],
    ]);
    if fnv1a32(&body[..checksum_at]) != expected {
        return None;
    }
    let mut idx = 0usize;
    let core = &body[..checksum_at];

    let port = u16::from_be_bytes([*core.get(idx)?, *core.get(idx + 1)?]);
    idx += 2;
    let atyp = *core.get(idx)?;
    idx += 1;
    let address = match atyp {
        0x01 => {
            let octets: [u8; 4] = core.get(idx..idx + 4)?.try_into().ok()?;
            idx += 4;
            Some(NetAddress::SocketAddress(IpAddr::V4(octets.into()), port))
        }
        0x02 => {
            let len = *core.get(idx)? as usize;
            idx += 1;
            let host = std::str::from_utf8(core.get(idx..idx + len)?).ok()?.to_string();
            idx += len;
            Some(NetAddress::DomainPort(host, port))
        }
        0x03 => {
            let octets: [u8; 16] = core.get(idx..idx + 16)?.try_into().ok()?;
            idx += 16;
            Some(NetAddress::SocketAddress(IpAddr::V6(octets.into()), port))
        }
        _ => None,
    };

    let user_id: [u8; 16] = core.get(idx..idx + 16)?.try_into().ok()?;
    idx += 16;
    let level_bytes: [u8; 4] = core.get(idx..idx + 4)?.try_into().ok()?;
    let level = u32::from_be_bytes(level_bytes);
    idx += 4;
    let number_of_alter_ids = u16::from_be_bytes([*core.get(idx)?, *core.get(idx + 1)?]);
    idx += 2;
    let effective_time = u32::from_be_bytes(core.get(idx..idx + 4)?.try_into().ok()?);

    Some(DynamicPortInstruction { address, port, user_id, level, number_of_alter_ids, effective_time })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmess::session::{CommandCode, ContentSecurity, StreamOptions};
    use uuid::Uuid;

    fn make_keys() -> VmessSessionKeys {
        VmessSessionKeys::new(Uuid::nil(), ContentSecurity::Aes128Gcm, StreamOptions::empty(), CommandCode::Tcp)
    }

    #[test]
    fn needs_more_data_until_length_block_complete() {
        let keys = make_keys();
        let mut opener = HeaderOpener::new(&keys);
        opener.feed(&[0u8; 10]);
        assert_eq!(opener.poll().unwrap(), None);
    }

    #[test]
    fn rejects_garbage_length_block() {
        let keys = make_keys();
        let mut opener = HeaderOpener::new(&keys);
        opener.feed(&[0u8; 18]);
        assert!(opener.poll().is_err());
    }

    #[test]
    fn round_trip_with_matching_server_response() {
        let keys = make_keys();

        let payload = vec![keys.auth_code, 0u8, 0u8, 0u8];
        let length_key = kdf16(&[LABEL_RESP_HEADER_LEN_KEY], &keys.resp_key);
        let length_nonce = kdf12(&[LABEL_RESP_HEADER_LEN_IV], &keys.resp_nonce);
        let payload_key = kdf16(&[LABEL_RESP_HEADER_PAYLOAD_KEY], &keys.resp_key);
        let payload_nonce = kdf12(&[LABEL_RESP_HEADER_PAYLOAD_IV], &keys.resp_nonce);

        let mut length_pt = (payload.len() as u16).to_be_bytes().to_vec();
        let empty_aad: &[u8] = &[];
        let length_tag = aes_gcm::seal(&length_key, &length_nonce, empty_aad, &mut length_pt);

        let mut payload_ct = payload.clone();
        let payload_tag = aes_gcm::seal(&payload_key, &payload_nonce, empty_aad, &mut payload_ct);

        let mut wire = Vec::new();
        wire.extend_from_slice(&length_pt);
        wire.extend_from_slice(&length_tag);
        wire.extend_from_slice(&payload_ct);
        wire.extend_from_slice(&payload_tag);

        let mut opener = HeaderOpener::new(&keys);
        opener.feed(&wire);
        let opened = opener.poll().unwrap().expect("header should parse");
        assert_eq!(opened.command_code, 0);
        assert!(opened.instruction.is_none());
    }
}

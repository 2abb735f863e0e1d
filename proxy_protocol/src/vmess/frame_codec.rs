//! C11 — VMESS data-stream frame codec: length-prefixed AEAD frames with
//! optional chunk masking, padding and authenticated length, all keyed off
//! a session's `effective_key`/`effective_nonce` and a per-connection
//! SHAKE128 `mask_hasher`.
//!
//! Encoder and decoder must squeeze the shared mask stream in lock-step:
//! for every frame, the padding word is drawn before the length-mask word
//! (when each applies), never the other way around (invariant 6).

use proxy_core::crypto::aead as chacha_aead;
use proxy_core::crypto::aes_gcm;
use proxy_core::crypto::kdf::kdf16;
use proxy_core::crypto::md5::md5_digest;
use proxy_core::crypto::rand::fill_random;
use proxy_core::crypto::shake128::Shake128;

use crate::buffer::{NeedMoreData, ReadBuffer};
use crate::error::ProxyError;
use crate::vmess::session::{ContentSecurity, StreamOptions, VmessSessionKeys};

pub const TAG_SIZE: usize = 16;
pub const MAX_FRAME_CIPHERTEXT: usize = 2048;
pub const MAX_PLAINTEXT_TOTAL: u64 = 16 * 1024 * 1024;
const MAX_PADDING: usize = 63;
const AUTH_LEN_LABEL: &[u8] = b"auth_len";

fn effective_tag_size(security: ContentSecurity) -> usize {
    match security {
        ContentSecurity::None | ContentSecurity::Zero => 0,
        _ => TAG_SIZE,
    }
}

fn length_field_size(options: StreamOptions) -> usize {
    if options.contains(StreamOptions::AUTHENTICATED_LENGTH) {
        2 + TAG_SIZE
    } else {
        2
    }
}

fn per_call_plaintext(security: ContentSecurity, options: StreamOptions) -> usize {
    MAX_FRAME_CIPHERTEXT - effective_tag_size(security) - length_field_size(options) - MAX_PADDING
}

fn expand_chacha_key(key16: &[u8; 16]) -> [u8; 32] {
    let first = md5_digest(key16);
    let second = md5_digest(&first);
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&first);
    out[16..].copy_from_slice(&second);
    out
}

fn aead_seal(security: ContentSecurity, key: &[u8; 16], nonce: &[u8; 12], aad: &[u8], pt: &mut Vec<u8>) -> [u8; 16] {
    match security {
        ContentSecurity::ChaCha20Poly1305 => {
            let key32 = expand_chacha_key(key);
            chacha_aead::seal(&key32, nonce, aad, pt)
        }
        _ => aes_gcm::seal(key, nonce, aad, pt),
    }
}

fn aead_open(security: ContentSecurity, key: &[u8; 16], nonce: &[u8; 12], aad: &[u8], ct: &mut Vec<u8>, tag: &[u8; 16]) -> bool {
    match security {
        ContentSecurity::ChaCha20Poly1305 => {
            let key32 = expand_chacha_key(key);
            chacha_aead::open(&key32, nonce, aad, ct, tag)
        }
        _ => aes_gcm::open(key, nonce, aad, ct, tag),
    }
}

/// Shared per-connection state: effective key/nonce, frame counter and the
/// SHAKE128 mask generator.
struct Core {
    effective_key: [u8; 16],
    effective_nonce: [u8; 16],
    content_security: ContentSecurity,
    stream_options: StreamOptions,
    frame_counter: u16,
    mask_hasher: Option<Shake128>,
    total_plaintext: u64,
}

impl Core {
    fn new(keys: &VmessSessionKeys) -> Self {
        let mask_hasher = if keys.stream_options.contains(StreamOptions::CHUNK_MASKING) {
            let mut xof = Shake128::new();
            xof.absorb(&keys.effective_nonce());
            Some(xof)
        } else {
            None
        };
        Core {
            effective_key: keys.effective_key(),
            effective_nonce: keys.effective_nonce(),
            content_security: keys.content_security,
            stream_options: keys.stream_options,
            frame_counter: 0,
            mask_hasher,
            total_plaintext: 0,
        }
    }

    /// Track cumulative plaintext across the session's lifetime; §4.9 caps
    /// this at 16 MiB regardless of how many frames it is spread across.
    fn account_plaintext(&mut self, len: usize) -> Result<(), ProxyError> {
        self.total_plaintext += len as u64;
        if self.total_plaintext > MAX_PLAINTEXT_TOTAL {
            return Err(ProxyError::PayloadTooLarge);
        }
        Ok(())
    }

    fn frame_nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[0..2].copy_from_slice(&self.frame_counter.to_be_bytes());
        nonce[2..12].copy_from_slice(&self.effective_nonce[2..12]);
        nonce
    }

    fn advance_counter(&mut self) {
        self.frame_counter = self.frame_counter.wrapping_add(1);
    }

    fn squeeze_mask_word(&mut self) -> u16 {
        let hasher = self.mask_hasher.as_mut().expect("mask_hasher required when CHUNK_MASKING set");
        let mut buf = [0u8; 2];
        hasher.squeeze(&mut buf);
        u16::from_be_bytes(buf)
    }

    /// Draw this frame's padding length. Must be called exactly once per
    /// frame, before `draw_length_mask`.
    fn draw_padding_len(&mut self) -> usize {
        if !self.stream_options.contains(StreamOptions::GLOBAL_PADDING) {
            return 0;
        }
        (self.squeeze_mask_word() % 64) as usize
    }

    /// Draw this frame's length-mask word, only applicable when
    /// `CHUNK_MASKING` is set without `AUTHENTICATED_LENGTH`.
    fn draw_length_mask(&mut self) -> u16 {
        self.squeeze_mask_word()
    }

    fn reset_for_eof(&mut self, keys: &VmessSessionKeys) {
        self.frame_counter = 0;
        if self.stream_options.contains(StreamOptions::CHUNK_MASKING) {
            let mut xof = Shake128::new();
            xof.absorb(&keys.effective_nonce());
            self.mask_hasher = Some(xof);
        }
    }
}

pub struct FrameEncoder {
    core: Core,
}

impl FrameEncoder {
    pub fn new(keys: &VmessSessionKeys) -> Self {
        FrameEncoder { core: Core::new(keys) }
    }

    /// `Zero` is coerced to `None` at construction (`normalize_options`
    /// already stripped `CHUNK_STREAM`), so framing is read off that flag
    /// rather than `content_security` directly — a `None` session with
    /// `CHUNK_STREAM` set is framed, one without is raw passthrough.
    pub fn is_framed(&self) -> bool {
        self.core.stream_options.contains(StreamOptions::CHUNK_STREAM)
    }

    /// Encode `plaintext`, chunking into multiple frames if it exceeds the
    /// per-call budget. All produced frames are concatenated so a single
    /// upper-layer write maps to one atomic wire write, preserving framing
    /// boundaries across partial socket writes.
    pub fn encode(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ProxyError> {
        self.core.account_plaintext(plaintext.len())?;
        if !self.is_framed() {
            return Ok(plaintext.to_vec());
        }
        let chunk_size = per_call_plaintext(self.core.content_security, self.core.stream_options).max(1);
        let mut out = Vec::with_capacity(plaintext.len() + (plaintext.len() / chunk_size + 1) * 32);
        for chunk in plaintext.chunks(chunk_size) {
            out.extend_from_slice(&self.seal_one_frame(chunk)?);
        }
        Ok(out)
    }

    /// Emit the end-of-stream sentinel frame for chunked streams (§4.9).
    pub fn encode_eof(&mut self) -> Vec<u8> {
        if !self.is_framed() {
            return Vec::new();
        }
        self.seal_one_frame(&[]).unwrap_or_default()
    }

    fn seal_one_frame(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, ProxyError> {
        let padding_len = self.core.draw_padding_len();
        let tag_size = effective_tag_size(self.core.content_security);
        let total_len = plaintext.len() + tag_size + padding_len;
        if total_len > MAX_FRAME_CIPHERTEXT {
            return Err(ProxyError::PayloadTooLarge);
        }

        let authenticated = self.core.stream_options.contains(StreamOptions::AUTHENTICATED_LENGTH);
        let masked = self.core.stream_options.contains(StreamOptions::CHUNK_MASKING);

        let nonce = self.core.frame_nonce();
        let key = self.core.effective_key;
        let security = self.core.content_security;

        let mut length_field = Vec::with_capacity(2 + TAG_SIZE);
        if authenticated {
            let auth_len_key = kdf16(&[AUTH_LEN_LABEL], &key);
            let mut len_pt = (total_len as u16).to_be_bytes().to_vec();
            let empty_aad: &[u8] = &[];
            let len_tag = aead_seal(security, &auth_len_key, &nonce, empty_aad, &mut len_pt);
            length_field.extend_from_slice(&len_pt);
            length_field.extend_from_slice(&len_tag);
        } else {
            let raw_len = total_len as u16;
            let transmitted = if masked { raw_len ^ self.core.draw_length_mask() } else { raw_len };
            length_field.extend_from_slice(&transmitted.to_be_bytes());
        }

        let mut ct = plaintext.to_vec();
        let tag = if tag_size > 0 {
            let empty_aad: &[u8] = &[];
            Some(aead_seal(security, &key, &nonce, empty_aad, &mut ct))
        } else {
            None
        };

        let mut padding = vec![0u8; padding_len];
        if padding_len > 0 {
            fill_random(&mut padding).expect("CSPRNG must be available");
        }

        let mut out = Vec::with_capacity(length_field.len() + total_len);
        out.extend_from_slice(&length_field);
        out.extend_from_slice(&ct);
        if let Some(tag) = tag {
            out.extend_from_slice(&tag);
        }
        out.extend_from_slice(&padding);

        self.core.advance_counter();
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
enum DecoderState {
    FrameLengthBegin,
    FrameDataBegin { total_len: usize, padding_len: usize },
}

pub enum DecodedFrame {
    Data(Vec<u8>),
    Eof,
}

pub struct FrameDecoder {
    core: Core,
    state: DecoderState,
    buf: ReadBuffer,
    failed: bool,
}

impl FrameDecoder {
    pub fn new(keys: &VmessSessionKeys) -> Self {
        FrameDecoder { core: Core::new(keys), state: DecoderState::FrameLengthBegin, buf: ReadBuffer::new(), failed: false }
    }

    pub fn is_framed(&self) -> bool {
        self.core.stream_options.contains(StreamOptions::CHUNK_STREAM)
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.push(bytes);
    }

    pub fn poll(&mut self, keys: &VmessSessionKeys) -> Result<Option<DecodedFrame>, ProxyError> {
        if self.failed {
            return Err(ProxyError::AuthenticationFailure);
        }
        if !self.is_framed() {
            if self.buf.remaining_len() == 0 {
                return Ok(None);
            }
            let all = self.buf.remaining().to_vec();
            self.buf = ReadBuffer::new();
            self.core.account_plaintext(all.len())?;
            return Ok(Some(DecodedFrame::Data(all)));
        }

        loop {
            match self.state {
                DecoderState::FrameLengthBegin => {
                    let length_field = length_field_size(self.core.stream_options);
                    let authenticated = self.core.stream_options.contains(StreamOptions::AUTHENTICATED_LENGTH);
                    let masked = self.core.stream_options.contains(StreamOptions::CHUNK_MASKING);

                    // The mask hasher has no rewind, so we must not draw
                    // from it until we know the length field has fully
                    // arrived. Check availability first, then draw padding
                    // before the length mask (the encoder's order), then
                    // consume the bytes — this can no longer unwind.
                    if self.buf.remaining_len() < length_field {
                        return Ok(None);
                    }

                    let padding_len = self.core.draw_padding_len();
                    let length_mask = if !authenticated && masked { Some(self.core.draw_length_mask()) } else { None };

                    let nonce = self.core.frame_nonce();
                    let key = self.core.effective_key;
                    let security = self.core.content_security;

                    let raw = self
                        .buf
                        .parse_unwinding(|cur| Ok(cur.read_slice(length_field)?.to_vec()))
                        .expect("length already checked available above");

                    let total_len: usize = if authenticated {
                        let mut ct = raw[0..2].to_vec();
                        let mut tag = [0u8; 16];
                        tag.copy_from_slice(&raw[2..18]);
                        let auth_len_key = kdf16(&[AUTH_LEN_LABEL], &key);
                        let empty_aad: &[u8] = &[];
                        if !aead_open(security, &auth_len_key, &nonce, empty_aad, &mut ct, &tag) {
                            self.failed = true;
                            return Err(ProxyError::AuthenticationFailure);
                        }
                        u16::from_be_bytes([ct[0], ct[1]]) as usize
                    } else {
                        let raw_val = u16::from_be_bytes([raw[0], raw[1]]);
                        match length_mask {
                            Some(mask) => (raw_val ^ mask) as usize,
                            None => raw_val as usize,
                        }
                    };

                    self.state = DecoderState::FrameDataBegin { total_len, padding_len };
                }
                DecoderState::FrameDataBegin { total_len, padding_len } => {
                    let tag_size = effective_tag_size(self.core.content_security);
                    let ciphertext_len = total_len.saturating_sub(padding_len);
                    let nonce = self.core.frame_nonce();
                    let key = self.core.effective_key;
                    let security = self.core.content_security;

                    let result = self.buf.parse_unwinding(|cur| {
                        let bytes = cur.read_slice(ciphertext_len + padding_len)?;
                        Ok(bytes.to_vec())
                    });
                    let raw = match result {
                        Ok(v) => v,
                        Err(NeedMoreData) => return Ok(None),
                    };

                    self.core.advance_counter();
                    self.state = DecoderState::FrameLengthBegin;

                    if ciphertext_len == tag_size {
                        self.core.reset_for_eof(keys);
                        return Ok(Some(DecodedFrame::Eof));
                    }

                    if tag_size == 0 {
                        let data = raw[..ciphertext_len].to_vec();
                        self.core.account_plaintext(data.len())?;
                        return Ok(Some(DecodedFrame::Data(data)));
                    }

                    let mut ct = raw[0..ciphertext_len - tag_size].to_vec();
                    let mut tag = [0u8; 16];
                    tag.copy_from_slice(&raw[ciphertext_len - tag_size..ciphertext_len]);
                    let empty_aad: &[u8] = &[];
                    if !aead_open(security, &key, &nonce, empty_aad, &mut ct, &tag) {
                        self.failed = true;
                        return Err(ProxyError::AuthenticationFailure);
                    }
                    self.core.account_plaintext(ct.len())?;
                    return Ok(Some(DecodedFrame::Data(ct)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmess::session::{CommandCode, VmessSessionKeys};
    use uuid::Uuid;

    fn roundtrip(security: ContentSecurity, extra_options: StreamOptions, plaintexts: &[&[u8]]) {
        let keys = VmessSessionKeys::new(Uuid::nil(), security, extra_options, CommandCode::Tcp);
        let mut encoder = FrameEncoder::new(&keys);
        let mut decoder = FrameDecoder::new(&keys);

        for pt in plaintexts {
            let wire = encoder.encode(pt).unwrap();
            decoder.feed(&wire);
            let mut recovered = Vec::new();
            while let Some(frame) = decoder.poll(&keys).unwrap() {
                match frame {
                    DecodedFrame::Data(d) => recovered.extend_from_slice(&d),
                    DecodedFrame::Eof => panic!("unexpected eof"),
                }
            }
            assert_eq!(recovered, pt.to_vec());
        }
    }

    #[test]
    fn aes_gcm_masked_padded_roundtrips() {
        roundtrip(ContentSecurity::Aes128Gcm, StreamOptions::CHUNK_STREAM, &[b"hello, origin", b""]);
    }

    #[test]
    fn chacha_roundtrips() {
        roundtrip(ContentSecurity::ChaCha20Poly1305, StreamOptions::CHUNK_STREAM, &[b"chacha payload"]);
    }

    #[test]
    fn authenticated_length_roundtrips() {
        roundtrip(
            ContentSecurity::Aes128Gcm,
            StreamOptions::CHUNK_STREAM | StreamOptions::AUTHENTICATED_LENGTH,
            &[b"authenticated length frame"],
        );
    }

    #[test]
    fn multi_frame_payload_larger_than_per_call_budget_roundtrips() {
        let big = vec![0x42u8; per_call_plaintext(ContentSecurity::Aes128Gcm, StreamOptions::CHUNK_MASKING | StreamOptions::GLOBAL_PADDING) * 3 + 17];
        roundtrip(ContentSecurity::Aes128Gcm, StreamOptions::CHUNK_STREAM, &[&big]);
    }

    #[test]
    fn none_security_without_chunk_stream_passes_through_unframed() {
        let keys = VmessSessionKeys::new(Uuid::nil(), ContentSecurity::None, StreamOptions::empty(), CommandCode::Tcp);
        let mut encoder = FrameEncoder::new(&keys);
        let mut decoder = FrameDecoder::new(&keys);
        let wire = encoder.encode(b"plain bytes").unwrap();
        assert_eq!(wire, b"plain bytes");
        decoder.feed(&wire);
        match decoder.poll(&keys).unwrap().unwrap() {
            DecodedFrame::Data(d) => assert_eq!(d, b"plain bytes"),
            DecodedFrame::Eof => panic!("unexpected eof"),
        }
    }

    #[test]
    fn none_security_with_chunk_stream_uses_plain_length_framing() {
        roundtrip(ContentSecurity::None, StreamOptions::CHUNK_STREAM, &[b"framed but unencrypted"]);
    }

    #[test]
    fn zero_security_passes_through_unframed_regardless_of_requested_options() {
        let mut opts = StreamOptions::empty();
        opts.insert(StreamOptions::CHUNK_STREAM);
        opts.insert(StreamOptions::CHUNK_MASKING);
        let keys = VmessSessionKeys::new(Uuid::nil(), ContentSecurity::Zero, opts, CommandCode::Tcp);
        let mut encoder = FrameEncoder::new(&keys);
        let mut decoder = FrameDecoder::new(&keys);
        let wire = encoder.encode(b"plain bytes").unwrap();
        assert_eq!(wire, b"plain bytes");
        decoder.feed(&wire);
        match decoder.poll(&keys).unwrap().unwrap() {
            DecodedFrame::Data(d) => assert_eq!(d, b"plain bytes"),
            DecodedFrame::Eof => panic!("unexpected eof"),
        }
    }

    #[test]
    fn cumulative_plaintext_over_16mib_fails_payload_too_large() {
        let keys = VmessSessionKeys::new(Uuid::nil(), ContentSecurity::Aes128Gcm, StreamOptions::CHUNK_STREAM, CommandCode::Tcp);
        let mut encoder = FrameEncoder::new(&keys);
        let chunk = vec![0x11u8; 1024 * 1024];
        for _ in 0..16 {
            encoder.encode(&chunk).unwrap();
        }
        let err = encoder.encode(&chunk).unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge));
    }

    #[test]
    fn eof_sentinel_decodes_as_eof() {
        let keys = VmessSessionKeys::new(Uuid::nil(), ContentSecurity::Aes128Gcm, StreamOptions::CHUNK_STREAM, CommandCode::Tcp);
        let mut encoder = FrameEncoder::new(&keys);
        let mut decoder = FrameDecoder::new(&keys);

        let data_frame = encoder.encode(b"last chunk").unwrap();
        decoder.feed(&data_frame);
        assert!(matches!(decoder.poll(&keys).unwrap().unwrap(), DecodedFrame::Data(_)));

        let eof_frame = encoder.encode_eof();
        decoder.feed(&eof_frame);
        assert!(matches!(decoder.poll(&keys).unwrap().unwrap(), DecodedFrame::Eof));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::vmess::session::{CommandCode, VmessSessionKeys};
    use proptest::prelude::*;
    use uuid::Uuid;

    fn security_strategy() -> impl Strategy<Value = ContentSecurity> {
        prop_oneof![
            Just(ContentSecurity::Aes128Gcm),
            Just(ContentSecurity::ChaCha20Poly1305),
            Just(ContentSecurity::None),
        ]
    }

    // `CHUNK_STREAM` is always requested: invariant 3 is stated over framed
    // streams only ("None (with CHUNK_STREAM)"); without it every security
    // variant degenerates to the same unencrypted byte-passthrough already
    // covered by the zero/none unit tests above.
    fn options_strategy() -> impl Strategy<Value = StreamOptions> {
        (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(masking, padding, auth_len)| {
            let mut opts = StreamOptions::CHUNK_STREAM;
            if masking {
                opts.insert(StreamOptions::CHUNK_MASKING);
            }
            if padding {
                opts.insert(StreamOptions::GLOBAL_PADDING);
            }
            if auth_len {
                opts.insert(StreamOptions::AUTHENTICATED_LENGTH);
            }
            opts
        })
    }

    proptest! {
        // Invariant 3: encoder-then-decoder recovers every plaintext exactly,
        // across every content security and option combination, when the
        // wire bytes are delivered as one write.
        #[test]
        fn round_trip_recovers_plaintext_exactly(
            plaintext in prop::collection::vec(any::<u8>(), 0..4096),
            security in security_strategy(),
            extra_options in options_strategy(),
        ) {
            let keys = VmessSessionKeys::new(Uuid::nil(), security, extra_options, CommandCode::Tcp);
            let mut encoder = FrameEncoder::new(&keys);
            let mut decoder = FrameDecoder::new(&keys);

            let wire = encoder.encode(&plaintext).unwrap();
            decoder.feed(&wire);
            let mut recovered = Vec::new();
            while let Some(frame) = decoder.poll(&keys).unwrap() {
                match frame {
                    DecodedFrame::Data(d) => recovered.extend_from_slice(&d),
                    DecodedFrame::Eof => break,
                }
            }
            prop_assert_eq!(recovered, plaintext);
        }

        // Invariant 4: arbitrary byte-level splitting of the same wire bytes
        // must not change the recovered plaintext. The decoder's `feed`
        // accepts each fragment in turn and `poll` is re-driven after every
        // fragment, exactly as a socket read loop would.
        #[test]
        fn partial_delivery_does_not_change_outcome(
            plaintext in prop::collection::vec(any::<u8>(), 0..4096),
            security in security_strategy(),
            extra_options in options_strategy(),
            split_points in prop::collection::vec(1usize..64, 0..16),
        ) {
            let keys = VmessSessionKeys::new(Uuid::nil(), security, extra_options, CommandCode::Tcp);
            let mut encoder = FrameEncoder::new(&keys);
            let wire = encoder.encode(&plaintext).unwrap();

            let mut decoder = FrameDecoder::new(&keys);
            let mut offset = 0usize;
            let mut recovered = Vec::new();
            for chunk_len in &split_points {
                if offset >= wire.len() {
                    break;
                }
                let end = (offset + chunk_len).min(wire.len());
                decoder.feed(&wire[offset..end]);
                offset = end;
                while let Some(frame) = decoder.poll(&keys).unwrap() {
                    match frame {
                        DecodedFrame::Data(d) => recovered.extend_from_slice(&d),
                        DecodedFrame::Eof => break,
                    }
                }
            }
            if offset < wire.len() {
                decoder.feed(&wire[offset..]);
            }
            while let Some(frame) = decoder.poll(&keys).unwrap() {
                match frame {
                    DecodedFrame::Data(d) => recovered.extend_from_slice(&d),
                    DecodedFrame::Eof => break,
                }
            }

            prop_assert_eq!(recovered, plaintext);
        }
    }
}

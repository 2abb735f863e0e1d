#![no_main]
use libfuzzer_sys::fuzz_target;
use proxy_protocol::vmess::frame_codec::FrameDecoder;
use proxy_protocol::vmess::session::{CommandCode, ContentSecurity, StreamOptions, VmessSessionKeys};
use uuid::Uuid;

fuzz_target!(|data: &[u8]| {
    let keys = VmessSessionKeys::new(Uuid::nil(), ContentSecurity::Aes128Gcm, StreamOptions::empty(), CommandCode::Tcp);
    let mut decoder = FrameDecoder::new(&keys);
    decoder.feed(data);
    while let Ok(Some(_frame)) = decoder.poll(&keys) {}
});

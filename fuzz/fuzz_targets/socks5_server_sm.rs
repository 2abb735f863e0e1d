#![no_main]
use libfuzzer_sys::fuzz_target;
use proxy_protocol::buffer::ReadBuffer;
use proxy_protocol::socks5::Socks5Server;

fuzz_target!(|data: &[u8]| {
    let mut server = Socks5Server::new(vec![0x00, 0x02], None);
    let mut buf = ReadBuffer::new();
    buf.push(data);
    loop {
        match server.on_bytes(&mut buf) {
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
});

//! Minimal HTTP/1 request-line / status-line + header parsing shared by the
//! CONNECT and plain-proxy state machines. The real HTTP/1 message-body
//! codec is an external collaborator per the design (chunked/streamed
//! bodies are not this crate's concern); this module only recognises the
//! head, which is all the handshake stages ever need to inspect.

use crate::buffer::{Cursor, NeedMoreData};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl ResponseHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a request head (`METHOD uri HTTP/x.y\r\n(header: value\r\n)*\r\n`)
/// from `cur`. Leaves the cursor positioned just past the terminating blank
/// line on success; restores it (via the caller's `parse_unwinding`) on
/// `NeedMoreData`.
pub fn parse_request_head(cur: &mut Cursor) -> Result<RequestHead, NeedMoreData> {
    let end = cur.find(b"\r\n\r\n").ok_or(NeedMoreData)?;
    let block = cur.read_slice(end)?;
    cur.advance(4)?;

    let text = std::str::from_utf8(block).map_err(|_| NeedMoreData)?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or(NeedMoreData)?;
    let mut parts = request_line.split(' ');
    let method = parts.next().ok_or(NeedMoreData)?.to_string();
    let uri = parts.next().ok_or(NeedMoreData)?.to_string();
    let version = parts.next().unwrap_or("HTTP/1.1").to_string();

    let headers = lines.filter_map(parse_header_line).collect();
    Ok(RequestHead { method, uri, version, headers })
}

/// Parse a status head (`HTTP/x.y NNN reason\r\n(header: value\r\n)*\r\n`).
pub fn parse_response_head(cur: &mut Cursor) -> Result<ResponseHead, NeedMoreData> {
    let end = cur.find(b"\r\n\r\n").ok_or(NeedMoreData)?;
    let block = cur.read_slice(end)?;
    cur.advance(4)?;

    let text = std::str::from_utf8(block).map_err(|_| NeedMoreData)?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().ok_or(NeedMoreData)?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().ok_or(NeedMoreData)?.to_string();
    let status: u16 = parts.next().ok_or(NeedMoreData)?.parse().map_err(|_| NeedMoreData)?;
    let reason = parts.next().unwrap_or("").to_string();

    let headers = lines.filter_map(parse_header_line).collect();
    Ok(ResponseHead { version, status, reason, headers })
}

fn parse_header_line(line: &str) -> Option<(String, String)> {
    if line.is_empty() {
        return None;
    }
    let (name, value) = line.split_once(':')?;
    Some((name.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ReadBuffer;

    #[test]
    fn parses_connect_request_head() {
        let mut buf = ReadBuffer::new();
        buf.push(b"CONNECT example.com:443 HTTP/1.1\r\nProxy-Authorization: Basic YWJj\r\n\r\n");
        let head = buf.parse_unwinding(parse_request_head).unwrap();
        assert_eq!(head.method, "CONNECT");
        assert_eq!(head.uri, "example.com:443");
        assert_eq!(head.header("proxy-authorization"), Some("Basic YWJj"));
    }

    #[test]
    fn reports_need_more_data_until_blank_line_arrives() {
        let mut buf = ReadBuffer::new();
        buf.push(b"CONNECT example.com:443 HTTP/1.1\r\n");
        assert!(buf.parse_unwinding(parse_request_head).is_err());
        buf.push(b"\r\n");
        assert!(buf.parse_unwinding(parse_request_head).is_ok());
    }

    #[test]
    fn parses_200_response_head() {
        let mut buf = ReadBuffer::new();
        buf.push(b"HTTP/1.1 200 Connection Established\r\nContent-Length: 0\r\n\r\n");
        let head = buf.parse_unwinding(parse_response_head).unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.reason, "Connection Established");
    }
}

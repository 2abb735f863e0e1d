//! SOCKS5 client and server handshake state machines (§4.5, §4.6), RFC 1928
//! (base protocol) and RFC 1929 (username/password sub-negotiation).
//!
//! Every transition that needs to put bytes on the wire returns them to the
//! caller rather than writing through an owned socket — the same shape
//! `ConnectClient::begin`/`ConnectServer::dial_ok` use — so the state
//! machine itself stays transport-agnostic and is driven purely by
//! `ReadBuffer`/`Cursor`.

use crate::buffer::{NeedMoreData, ReadBuffer};
use crate::error::ProxyError;
use crate::net_address::{Credential, IpAddr, NetAddress};

const VERSION: u8 = 0x05;
const METHOD_NONE_REQUIRED: u8 = 0x00;
const METHOD_USERNAME_PASSWORD: u8 = 0x02;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;

// ---------------------------------------------------------------- client --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks5ClientState {
    Inactive,
    WaitingForClientGreeting,
    WaitingForAuthenticationMethod,
    WaitingForClientAuthentication,
    WaitingForServerAuthenticationResponse,
    WaitingForClientRequest,
    WaitingForServerResponse,
    Active,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Socks5ClientEvent {
    /// Bytes the caller must write next (sub-negotiation or CONNECT request).
    Send(Vec<u8>),
    ProxyEstablished,
}

pub struct Socks5Client {
    state: Socks5ClientState,
    destination: NetAddress,
    credential: Option<Credential>,
}

impl Socks5Client {
    pub fn new(destination: NetAddress, credential: Option<Credential>) -> Self {
        Socks5Client { state: Socks5ClientState::Inactive, destination, credential }
    }

    pub fn state(&self) -> Socks5ClientState {
        self.state
    }

    /// Precondition: `Inactive`. Returns the greeting bytes.
    pub fn begin(&mut self) -> Result<Vec<u8>, ProxyError> {
        if self.state != Socks5ClientState::Inactive {
            self.state = Socks5ClientState::Error;
            return Err(ProxyError::InvalidClientState);
        }
        self.state = Socks5ClientState::WaitingForClientGreeting;
        let mut methods = vec![METHOD_NONE_REQUIRED];
        if self.credential.is_some() {
            methods.push(METHOD_USERNAME_PASSWORD);
        }
        let mut out = vec![VERSION, methods.len() as u8];
        out.extend_from_slice(&methods);
        self.state = Socks5ClientState::WaitingForAuthenticationMethod;
        Ok(out)
    }

    pub fn on_bytes(&mut self, buf: &mut ReadBuffer) -> Result<Option<Socks5ClientEvent>, ProxyError> {
        match self.state {
            Socks5ClientState::WaitingForAuthenticationMethod => {
                match buf.parse_unwinding(|cur| {
                    let _ver = cur.read_u8()?;
                    cur.read_u8()
                }) {
                    Ok(method) => match method {
                        METHOD_NONE_REQUIRED => {
                            self.state = Socks5ClientState::WaitingForClientRequest;
                            let request = self.build_request();
                            self.state = Socks5ClientState::WaitingForServerResponse;
                            Ok(Some(Socks5ClientEvent::Send(request)))
                        }
                        METHOD_USERNAME_PASSWORD => {
                            let cred = self
                                .credential
                                .as_ref()
                                .ok_or(ProxyError::InvalidAuthenticationSelection(method))?;
                            self.state = Socks5ClientState::WaitingForClientAuthentication;
                            let mut out = vec![0x01, cred.identity.len() as u8];
                            out.extend_from_slice(cred.identity.as_bytes());
                            out.push(cred.token.len() as u8);
                            out.extend_from_slice(cred.token.as_bytes());
                            self.state = Socks5ClientState::WaitingForServerAuthenticationResponse;
                            Ok(Some(Socks5ClientEvent::Send(out)))
                        }
                        other => {
                            self.state = Socks5ClientState::Error;
                            Err(ProxyError::InvalidAuthenticationSelection(other))
                        }
                    },
                    Err(NeedMoreData) => Ok(None),
                }
            }
            Socks5ClientState::WaitingForServerAuthenticationResponse => {
                match buf.parse_unwinding(|cur| {
                    let _ver = cur.read_u8()?;
                    cur.read_u8()
                }) {
                    Ok(0x00) => {
                        self.state = Socks5ClientState::WaitingForClientRequest;
                        let request = self.build_request();
                        self.state = Socks5ClientState::WaitingForServerResponse;
                        Ok(Some(Socks5ClientEvent::Send(request)))
                    }
                    Ok(_) => {
                        self.state = Socks5ClientState::Error;
                        Err(ProxyError::AuthenticationFailure)
                    }
                    Err(NeedMoreData) => Ok(None),
                }
            }
            Socks5ClientState::WaitingForServerResponse => match buf.parse_unwinding(parse_reply) {
                Ok(Ok((rep, _bound))) => {
                    if rep == 0x00 {
                        self.state = Socks5ClientState::Active;
                        Ok(Some(Socks5ClientEvent::ProxyEstablished))
                    } else {
                        self.state = Socks5ClientState::Error;
                        Err(ProxyError::ReplyFailed(rep))
                    }
                }
                Ok(Err(e)) => {
                    self.state = Socks5ClientState::Error;
                    Err(e)
                }
                Err(NeedMoreData) => Ok(None),
            },
            Socks5ClientState::Inactive
            | Socks5ClientState::WaitingForClientGreeting
            | Socks5ClientState::WaitingForClientAuthentication
            | Socks5ClientState::WaitingForClientRequest => {
                self.state = Socks5ClientState::Error;
                Err(ProxyError::InvalidClientState)
            }
            Socks5ClientState::Active | Socks5ClientState::Error => {
                self.state = Socks5ClientState::Error;
                Err(ProxyError::UnexpectedRead)
            }
        }
    }

    fn build_request(&self) -> Vec<u8> {
        let mut out = vec![VERSION, CMD_CONNECT, 0x00];
        encode_address(&mut out, &self.destination);
        out
    }
}

// ---------------------------------------------------------------- server --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Socks5ServerState {
    Inactive,
    WaitingForClientGreeting,
    WaitingForClientAuthentication,
    WaitingForClientRequest,
    WaitingForServerResponse,
    Active,
    Error,
}

pub struct Socks5Server {
    state: Socks5ServerState,
    supported_methods: Vec<u8>,
    credential: Option<Credential>,
    selected_username_password: bool,
}

impl Socks5Server {
    pub fn new(supported_methods: Vec<u8>, credential: Option<Credential>) -> Self {
        Socks5Server {
            state: Socks5ServerState::WaitingForClientGreeting,
            supported_methods,
            credential,
            selected_username_password: false,
        }
    }

    pub fn state(&self) -> Socks5ServerState {
        self.state
    }

    /// Drains the greeting and, if an auth sub-negotiation is needed,
    /// returns the method-selection bytes plus a flag for whether more
    /// bytes (the sub-negotiation) are still expected before the request.
    pub fn on_bytes(&mut self, buf: &mut ReadBuffer) -> Result<Option<Socks5ServerOutcome>, ProxyError> {
        match self.state {
            Socks5ServerState::WaitingForClientGreeting => {
                match buf.parse_unwinding(|cur| {
                    let _ver = cur.read_u8()?;
                    let n = cur.read_u8()? as usize;
                    let methods = cur.read_slice(n)?;
                    Ok(methods.to_vec())
                }) {
                    Ok(offered) => {
                        let chosen = self.supported_methods.iter().find(|m| offered.contains(m)).copied();
                        match chosen {
                            Some(METHOD_USERNAME_PASSWORD) => {
                                self.selected_username_password = true;
                                self.state = Socks5ServerState::WaitingForClientAuthentication;
                                Ok(Some(Socks5ServerOutcome::Send(vec![VERSION, METHOD_USERNAME_PASSWORD])))
                            }
                            Some(METHOD_NONE_REQUIRED) => {
                                self.state = Socks5ServerState::WaitingForClientRequest;
                                Ok(Some(Socks5ServerOutcome::Send(vec![VERSION, METHOD_NONE_REQUIRED])))
                            }
                            _ => {
                                self.state = Socks5ServerState::Error;
                                Ok(Some(Socks5ServerOutcome::Send(vec![VERSION, 0xFF])))
                            }
                        }
                    }
                    Err(NeedMoreData) => Ok(None),
                }
            }
            Socks5ServerState::WaitingForClientAuthentication => {
                match buf.parse_unwinding(|cur| {
                    let _ver = cur.read_u8()?;
                    let ulen = cur.read_u8()? as usize;
                    let uname = cur.read_slice(ulen)?;
                    let plen = cur.read_u8()? as usize;
                    let pass = cur.read_slice(plen)?;
                    Ok((uname.to_vec(), pass.to_vec()))
                }) {
                    Ok((uname, pass)) => {
                        let ok = self.credential.as_ref().map_or(false, |c| {
                            c.identity.as_bytes() == uname.as_slice() && c.token.as_bytes() == pass.as_slice()
                        });
                        if ok {
                            self.state = Socks5ServerState::WaitingForClientRequest;
                            Ok(Some(Socks5ServerOutcome::Send(vec![0x01, 0x00])))
                        } else {
                            self.state = Socks5ServerState::Error;
                            Ok(Some(Socks5ServerOutcome::Send(vec![0x01, 0xFF])))
                        }
                    }
                    Err(NeedMoreData) => Ok(None),
                }
            }
            Socks5ServerState::WaitingForClientRequest => match buf.parse_unwinding(parse_request) {
                Ok(Ok(destination)) => {
                    self.state = Socks5ServerState::WaitingForServerResponse;
                    Ok(Some(Socks5ServerOutcome::DialRequested(destination)))
                }
                Ok(Err(e)) => {
                    self.state = Socks5ServerState::Error;
                    Err(e)
                }
                Err(NeedMoreData) => Ok(None),
            },
            Socks5ServerState::Inactive
            | Socks5ServerState::WaitingForServerResponse
            | Socks5ServerState::Active
            | Socks5ServerState::Error => {
                self.state = Socks5ServerState::Error;
                Err(ProxyError::UnexpectedRead)
            }
        }
    }

    /// Peer dial succeeded: build the success reply and move to `Active`.
    pub fn dial_ok(&mut self, bound: NetAddress) -> Result<Vec<u8>, ProxyError> {
        if self.state != Socks5ServerState::WaitingForServerResponse {
            self.state = Socks5ServerState::Error;
            return Err(ProxyError::InvalidServerState);
        }
        self.state = Socks5ServerState::Active;
        let mut out = vec![VERSION, 0x00, 0x00];
        encode_address(&mut out, &bound);
        Ok(out)
    }

    /// Peer dial failed: build a failure reply carrying `rep` and move to
    /// `Error` (fatal for the connection per §4.6).
    pub fn dial_failed(&mut self, rep: u8) -> Vec<u8> {
        self.state = Socks5ServerState::Error;
        vec![VERSION, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Socks5ServerOutcome {
    Send(Vec<u8>),
    DialRequested(NetAddress),
}

fn encode_address(out: &mut Vec<u8>, addr: &NetAddress) {
    match addr {
        NetAddress::SocketAddress(IpAddr::V4(v4), port) => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&v4.octets());
            out.extend_from_slice(&port.to_be_bytes());
        }
        NetAddress::SocketAddress(IpAddr::V6(v6), port) => {
            out.push(ATYP_IPV6);
            out.extend_from_slice(&v6.octets());
            out.extend_from_slice(&port.to_be_bytes());
        }
        NetAddress::DomainPort(host, port) => {
            out.push(ATYP_DOMAIN);
            out.push(host.len() as u8);
            out.extend_from_slice(host.as_bytes());
            out.extend_from_slice(&port.to_be_bytes());
        }
    }
}

/// Bytes that decode cleanly but name a malformed or unrecognised field (a
/// non-UTF-8 domain, an unknown `atyp`) can never become valid no matter how
/// many more bytes arrive, so they are reported distinctly from
/// `NeedMoreData` — which `parse_unwinding` would otherwise rewind and wait
/// on forever.
fn parse_reply(cur: &mut crate::buffer::Cursor) -> Result<Result<(u8, NetAddress), ProxyError>, NeedMoreData> {
    let _ver = cur.read_u8()?;
    let rep = cur.read_u8()?;
    let _rsv = cur.read_u8()?;
    let addr = match decode_address(cur)? {
        Ok(addr) => addr,
        Err(e) => return Ok(Err(e)),
    };
    Ok(Ok((rep, addr)))
}

fn parse_request(cur: &mut crate::buffer::Cursor) -> Result<Result<NetAddress, ProxyError>, NeedMoreData> {
    let _ver = cur.read_u8()?;
    let _cmd = cur.read_u8()?;
    let _rsv = cur.read_u8()?;
    decode_address(cur)
}

fn decode_address(cur: &mut crate::buffer::Cursor) -> Result<Result<NetAddress, ProxyError>, NeedMoreData> {
    let atyp = cur.read_u8()?;
    match atyp {
        ATYP_IPV4 => {
            let bytes = cur.read_slice(4)?;
            let v4 = std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            let port = cur.read_u16_be()?;
            Ok(Ok(NetAddress::SocketAddress(IpAddr::V4(v4), port)))
        }
        ATYP_IPV6 => {
            let bytes = cur.read_slice(16)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            let v6 = std::net::Ipv6Addr::from(octets);
            let port = cur.read_u16_be()?;
            Ok(Ok(NetAddress::SocketAddress(IpAddr::V6(v6), port)))
        }
        ATYP_DOMAIN => {
            let len = cur.read_u8()? as usize;
            let bytes = cur.read_slice(len)?;
            let host = match String::from_utf8(bytes.to_vec()) {
                Ok(host) => host,
                Err(_) => return Ok(Err(ProxyError::FailedToParseData)),
            };
            let port = cur.read_u16_be()?;
            Ok(Ok(NetAddress::DomainPort(host, port)))
        }
        _ => Ok(Err(ProxyError::FailedToParseData)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_username_password_s3() {
        let credential = Credential::new("user", "pass");
        let mut client = Socks5Client::new(
            NetAddress::SocketAddress(IpAddr::V4("127.0.0.1".parse().unwrap()), 0x50),
            Some(credential.clone()),
        );
        let mut server = Socks5Server::new(vec![METHOD_NONE_REQUIRED, METHOD_USERNAME_PASSWORD], Some(credential));

        let greeting = client.begin().unwrap();
        assert_eq!(greeting, vec![0x05, 0x02, 0x00, 0x02]);

        let mut server_buf = ReadBuffer::new();
        server_buf.push(&greeting);
        let selection = match server.on_bytes(&mut server_buf).unwrap().unwrap() {
            Socks5ServerOutcome::Send(bytes) => bytes,
            _ => panic!("expected method selection"),
        };
        assert_eq!(selection, vec![0x05, 0x02]);

        let mut client_buf = ReadBuffer::new();
        client_buf.push(&selection);
        let auth_req = match client.on_bytes(&mut client_buf).unwrap().unwrap() {
            Socks5ClientEvent::Send(bytes) => bytes,
            _ => panic!("expected auth sub-negotiation"),
        };
        assert_eq!(auth_req, vec![0x01, 4, b'u', b's', b'e', b'r', 4, b'p', b'a', b's', b's']);

        let mut server_buf2 = ReadBuffer::new();
        server_buf2.push(&auth_req);
        let auth_resp = match server.on_bytes(&mut server_buf2).unwrap().unwrap() {
            Socks5ServerOutcome::Send(bytes) => bytes,
            _ => panic!("expected auth response"),
        };
        assert_eq!(auth_resp, vec![0x01, 0x00]);

        let mut client_buf2 = ReadBuffer::new();
        client_buf2.push(&auth_resp);
        let request = match client.on_bytes(&mut client_buf2).unwrap().unwrap() {
            Socks5ClientEvent::Send(bytes) => bytes,
            _ => panic!("expected CONNECT request"),
        };
        assert_eq!(request, vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50]);

        let mut server_buf3 = ReadBuffer::new();
        server_buf3.push(&request);
        let destination = match server.on_bytes(&mut server_buf3).unwrap().unwrap() {
            Socks5ServerOutcome::DialRequested(addr) => addr,
            _ => panic!("expected dial request"),
        };
        assert_eq!(
            destination,
            NetAddress::SocketAddress(IpAddr::V4("127.0.0.1".parse().unwrap()), 0x50)
        );

        let reply = server.dial_ok(destination).unwrap();
        assert_eq!(reply, vec![0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50]);

        let mut client_buf3 = ReadBuffer::new();
        client_buf3.push(&reply);
        let event = client.on_bytes(&mut client_buf3).unwrap();
        assert_eq!(event, Some(Socks5ClientEvent::ProxyEstablished));
        assert_eq!(client.state(), Socks5ClientState::Active);
        assert_eq!(server.state(), Socks5ServerState::Active);
    }

    #[test]
    fn client_rejects_incorrect_credential_s4() {
        let mut client = Socks5Client::new(
            NetAddress::DomainPort("example.com".into(), 80),
            Some(Credential::new("user", "pass")),
        );
        client.begin().unwrap();
        let mut buf = ReadBuffer::new();
        buf.push(&[0x05, METHOD_USERNAME_PASSWORD]);
        client.on_bytes(&mut buf).unwrap();
        let mut buf2 = ReadBuffer::new();
        buf2.push(&[0x01, 0xFF]);
        let err = client.on_bytes(&mut buf2).unwrap_err();
        assert_eq!(err, ProxyError::AuthenticationFailure);
    }

    #[test]
    fn server_rejects_when_no_method_overlaps() {
        let mut server = Socks5Server::new(vec![METHOD_USERNAME_PASSWORD], None);
        let mut buf = ReadBuffer::new();
        buf.push(&[0x05, 0x01, METHOD_NONE_REQUIRED]);
        let outcome = server.on_bytes(&mut buf).unwrap().unwrap();
        assert_eq!(outcome, Socks5ServerOutcome::Send(vec![0x05, 0xFF]));
        assert_eq!(server.state(), Socks5ServerState::Error);
    }

    #[test]
    fn server_fails_fast_on_unknown_atyp_instead_of_stalling() {
        let mut server = Socks5Server::new(vec![METHOD_NONE_REQUIRED], None);
        let mut buf = ReadBuffer::new();
        buf.push(&[0x05, 0x01, METHOD_NONE_REQUIRED]);
        server.on_bytes(&mut buf).unwrap();

        let mut req_buf = ReadBuffer::new();
        // ver, cmd, rsv, atyp=0x02 (unused in RFC 1928) — a complete request
        // whose address type can never become valid, not a truncated one.
        req_buf.push(&[0x05, 0x01, 0x00, 0x02]);
        let err = server.on_bytes(&mut req_buf).unwrap_err();
        assert_eq!(err, ProxyError::FailedToParseData);
        assert_eq!(server.state(), Socks5ServerState::Error);
    }

    #[test]
    fn server_fails_fast_on_non_utf8_domain_instead_of_stalling() {
        let mut server = Socks5Server::new(vec![METHOD_NONE_REQUIRED], None);
        let mut buf = ReadBuffer::new();
        buf.push(&[0x05, 0x01, METHOD_NONE_REQUIRED]);
        server.on_bytes(&mut buf).unwrap();

        let mut req_buf = ReadBuffer::new();
        // ver, cmd, rsv, atyp=domain, len=1, invalid UTF-8 byte, port.
        req_buf.push(&[0x05, 0x01, 0x00, 0x03, 0x01, 0xFF, 0x00, 0x50]);
        let err = server.on_bytes(&mut req_buf).unwrap_err();
        assert_eq!(err, ProxyError::FailedToParseData);
        assert_eq!(server.state(), Socks5ServerState::Error);
    }
}

//! Master/Worker process launcher with hot-reload support, adapted from
//! the static-file server's own launcher: a master process holds no
//! sockets itself, forks N workers that each bind every listener with
//! `SO_REUSEPORT`, and re-execs fresh workers on `SIGHUP`.
//!
//! Worker responsibilities:
//! * Accept inbound connections for every configured listener.
//! * Drive the matching handshake state machine (`ConnectServer` or
//!   `Socks5Server`) to completion.
//! * Dial the requested destination and splice the two sides with Glue.

use proxy_core::config::{FrontEnd, ServerConfig};
use proxy_core::os::{EventLoop, Interest};
use proxy_core::{log_error, log_info, metrics, signals};
use proxy_protocol::buffer::ReadBuffer;
use proxy_protocol::connect::ConnectServer;
use proxy_protocol::glue::GlueLeg;
use proxy_protocol::net_address::{Credential, NetAddress};
use proxy_protocol::socks5::{Socks5Server, Socks5ServerOutcome};
use proxy_protocol::{accept, ProxyError};

use std::collections::HashMap;
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::process::Command;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(unix)]
mod unix_master {
    use super::*;
    use libc::{kill, pid_t, SIGTERM};

    /// Spawn `count` worker processes by re-execing self with env
    /// `PROXY_ROLE=worker`.
    pub fn spawn_workers(count: usize, cfg_path: &str) -> Vec<pid_t> {
        let mut pids = Vec::new();
        for _ in 0..count {
            match unsafe { libc::fork() } {
                -1 => log_error!("fork failed: {}", std::io::Error::last_os_error()),
                0 => {
                    std::env::set_var("PROXY_ROLE", "worker");
                    let exe = env::current_exe().expect("current exe");
                    let _ = Command::new(exe).arg(cfg_path).exec();
                    std::process::exit(1);
                }
                pid => pids.push(pid),
            }
        }
        pids
    }

    pub fn signal_all(pids: &[pid_t], sig: i32) {
        for &pid in pids {
            unsafe { kill(pid, sig) };
        }
    }

    pub fn wait_child() -> Option<pid_t> {
        let mut status: i32 = 0;
        let pid = unsafe { libc::wait(&mut status) };
        if pid > 0 {
            Some(pid)
        } else {
            None
        }
    }
}

fn main() {
    let mut args_iter = env::args().skip(1);
    if let Some(cmd) = args_iter.next() {
        match cmd.as_str() {
            "start" => {}
            "stop" => {
                #[cfg(unix)]
                {
                    if let Ok(pid_str) = std::fs::read_to_string("proxy.pid") {
                        if let Ok(pid) = pid_str.trim().parse::<i32>() {
                            unsafe { libc::kill(pid, libc::SIGTERM) };
                            println!("Sent SIGTERM to {}", pid);
                            return;
                        }
                    }
                }
                println!("stop not supported on this platform or pidfile missing");
                return;
            }
            "reload" => {
                #[cfg(unix)]
                {
                    if let Ok(pid_str) = std::fs::read_to_string("proxy.pid") {
                        if let Ok(pid) = pid_str.trim().parse::<i32>() {
                            unsafe { libc::kill(pid, libc::SIGHUP) };
                            println!("Sent SIGHUP to {}", pid);
                            return;
                        }
                    }
                }
                println!("reload not supported");
                return;
            }
            _ => {}
        }
    }

    let is_worker = env::var("PROXY_ROLE").map_or(false, |v| v == "worker");
    let args: Vec<String> = env::args().collect();
    let cfg_path = if args.len() > 1 { &args[1] } else { "proxy.yaml" };

    let cfg = match ServerConfig::load_from_yaml(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            log_error!("config load failure: {:?}", e);
            std::process::exit(1);
        }
    };

    if is_worker {
        if let Err(e) = run_worker(cfg) {
            log_error!("worker terminated: {}", e);
        }
        return;
    }

    #[cfg(unix)]
    {
        signals::init_term_signals();
        let _ = std::fs::write("proxy.pid", std::process::id().to_string());

        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        log_info!("master pid {} starting {} workers", std::process::id(), worker_count);
        let mut workers = unix_master::spawn_workers(worker_count, cfg_path);

        loop {
            if signals::should_terminate() {
                unix_master::signal_all(&workers, libc::SIGTERM);
                break;
            }
            if signals::take_reload_request() {
                log_info!("hot-reload requested, spawning new workers");
                let new_workers = unix_master::spawn_workers(worker_count, cfg_path);
                unix_master::signal_all(&workers, libc::SIGTERM);
                workers = new_workers;
            }
            while let Some(dead) = unix_master::wait_child() {
                workers.retain(|&pid| pid != dead);
            }
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
        log_info!("master exiting");
    }

    #[cfg(not(unix))]
    {
        log_error!("master/worker hot-reload is Unix-only in this build");
    }
}

/// One inbound handshake in flight, keyed by the `EventLoop` token it was
/// registered under.
enum Handshake {
    Connect(ConnectServer),
    Socks5(Socks5Server),
}

struct PendingSession {
    stream: TcpStream,
    handshake: Handshake,
    read_buf: ReadBuffer,
}

/// Once both sides of a tunnel exist, the worker relays bytes directly
/// rather than driving `Glue` generically over trait objects — the event
/// loop already knows exactly which two raw sockets are paired.
struct ActiveSession {
    client: TcpStream,
    peer: TcpStream,
    client_token: proxy_core::os::Token,
    peer_token: proxy_core::os::Token,
}

enum DialResult {
    Ok(TcpStream),
    Err(std::io::Error),
}

#[cfg(unix)]
fn run_worker(cfg: ServerConfig) -> std::io::Result<()> {
    let required_credential = match (&cfg.credential_identity, &cfg.credential_token) {
        (Some(identity), Some(token)) => Some(Credential::new(identity, token)),
        _ => None,
    };

    let (accept_tx, accept_rx): (Sender<(TcpStream, FrontEnd)>, Receiver<(TcpStream, FrontEnd)>) = channel();
    for listener_cfg in &cfg.listeners {
        let addr = format!("{}:{}", listener_cfg.host, listener_cfg.port);
        let listener = accept::create_reuseport_listener(&addr)?;
        let front_end = listener_cfg.front_end;
        let (tx, rx) = channel();
        accept::spawn_accept_thread(listener, tx);
        let forward = accept_tx.clone();
        thread::spawn(move || {
            while let Ok(stream) = rx.recv() {
                if forward.send((stream, front_end)).is_err() {
                    break;
                }
            }
        });
        log_info!("listening on {} ({:?})", addr, front_end);
    }
    drop(accept_tx);

    let mut event_loop = EventLoop::new()?;
    let mut pending: HashMap<proxy_core::os::Token, PendingSession> = HashMap::new();
    let mut active: HashMap<proxy_core::os::Token, ActiveSession> = HashMap::new();
    let (dial_tx, dial_rx): (Sender<(proxy_core::os::Token, DialResult)>, Receiver<_>) = channel();

    loop {
        if signals::should_terminate() {
            break;
        }

        drain_new_connections(&accept_rx, &mut event_loop, &mut pending, required_credential.clone());
        drain_dial_results(&dial_rx, &mut event_loop, &mut pending, &mut active);

        let events = event_loop.poll(250)?;
        for (token, readable, _writable) in events {
            if !readable {
                continue;
            }
            if let Some(session) = active.remove(&token) {
                relay_one_direction(session, token, &mut event_loop, &mut active);
                continue;
            }
            if let Some(mut session) = pending.remove(&token) {
                match drive_handshake(&mut session) {
                    Ok(Some(destination)) => {
                        spawn_dial(token, destination, dial_tx.clone());
                        pending.insert(token, session);
                    }
                    Ok(None) => {
                        pending.insert(token, session);
                    }
                    Err(e) => {
                        metrics::inc_handshake_failed();
                        log_error!("handshake failed: {}", e);
                        let _ = event_loop.deregister(token);
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn run_worker(_cfg: ServerConfig) -> std::io::Result<()> {
    log_error!("proxy worker loop is implemented for Unix targets only in this build");
    Ok(())
}

fn drain_new_connections(
    accept_rx: &Receiver<(TcpStream, FrontEnd)>,
    event_loop: &mut EventLoop,
    pending: &mut HashMap<proxy_core::os::Token, PendingSession>,
    required_credential: Option<Credential>,
) {
    loop {
        match accept_rx.try_recv() {
            Ok((stream, front_end)) => {
                metrics::inc_connections_accepted();
                let handshake = match front_end {
                    FrontEnd::HttpConnect => Handshake::Connect(ConnectServer::new(required_credential.clone())),
                    FrontEnd::Socks5 => {
                        let methods = if required_credential.is_some() { vec![0x02] } else { vec![0x00] };
                        Handshake::Socks5(Socks5Server::new(methods, required_credential.clone()))
                    }
                };
                match event_loop.register(&stream, Interest::Readable) {
                    Ok(token) => {
                        pending.insert(token, PendingSession { stream, handshake, read_buf: ReadBuffer::new() });
                    }
                    Err(e) => log_error!("failed to register connection: {}", e),
                }
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => break,
        }
    }
}

/// Feed whatever is currently readable on `session.stream` to its
/// handshake state machine. Returns `Ok(Some(destination))` once a dial
/// target has been derived; the caller is then responsible for spawning
/// the dial and re-inserting `session` keyed by the same token.
fn drive_handshake(session: &mut PendingSession) -> Result<Option<NetAddress>, ProxyError> {
    let mut chunk = [0u8; 4096];
    loop {
        let n = match session.stream.read(&mut chunk) {
            Ok(0) => return Err(ProxyError::UnexpectedRead),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(_) => return Err(ProxyError::UnexpectedRead),
        };
        session.read_buf.push(&chunk[..n]);

        match &mut session.handshake {
            Handshake::Connect(server) => {
                if let Some(destination) = server.on_bytes(&mut session.read_buf)? {
                    return Ok(Some(destination));
                }
            }
            Handshake::Socks5(server) => match server.on_bytes(&mut session.read_buf)? {
                Some(Socks5ServerOutcome::Send(bytes)) => {
                    session.stream.write_all(&bytes).map_err(|_| ProxyError::UnexpectedRead)?;
                }
                Some(Socks5ServerOutcome::DialRequested(destination)) => return Ok(Some(destination)),
                None => {}
            },
        }
    }
}

fn spawn_dial(token: proxy_core::os::Token, destination: NetAddress, dial_tx: Sender<(proxy_core::os::Token, DialResult)>) {
    thread::spawn(move || {
        let result = TcpStream::connect(destination.to_host_port_string())
            .map(DialResult::Ok)
            .unwrap_or_else(DialResult::Err);
        let _ = dial_tx.send((token, result));
    });
}

fn drain_dial_results(
    dial_rx: &Receiver<(proxy_core::os::Token, DialResult)>,
    event_loop: &mut EventLoop,
    pending: &mut HashMap<proxy_core::os::Token, PendingSession>,
    active: &mut HashMap<proxy_core::os::Token, ActiveSession>,
) {
    loop {
        match dial_rx.try_recv() {
            Ok((token, result)) => {
                let Some(mut session) = pending.remove(&token) else { continue };
                match result {
                    DialResult::Ok(peer) => {
                        let _ = peer.set_nonblocking(true);
                        let outcome = match &mut session.handshake {
                            Handshake::Connect(server) => server.dial_ok().map(|(resp, replay)| (resp, replay)),
                            Handshake::Socks5(server) => {
                                let bound = NetAddress::SocketAddress(
                                    proxy_protocol::net_address::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                                    0,
                                );
                                server.dial_ok(bound).map(|resp| (resp, Vec::new()))
                            }
                        };
                        match outcome {
                            Ok((response, replay)) => {
                                if session.stream.write_all(&response).is_err() {
                                    let _ = event_loop.deregister(token);
                                    continue;
                                }
                                if !replay.is_empty() && peer_write_all(&peer, &replay).is_err() {
                                    let _ = event_loop.deregister(token);
                                    continue;
                                }
                                metrics::inc_handshake_ok();
                                promote_to_active(token, session.stream, peer, event_loop, active);
                            }
                            Err(e) => {
                                log_error!("dial_ok rejected by handshake: {}", e);
                                let _ = event_loop.deregister(token);
                            }
                        }
                    }
                    DialResult::Err(e) => {
                        log_error!("dial failed: {}", e);
                        if let Handshake::Socks5(server) = &mut session.handshake {
                            let failure = server.dial_failed(0x05);
                            let _ = session.stream.write_all(&failure);
                        }
                        let _ = event_loop.deregister(token);
                    }
                }
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

/// Bytes the client pipelined past the CONNECT request arrive before the
/// dial completes and must be forwarded to the origin once it does,
/// ahead of anything read off the client socket afterward.
fn peer_write_all(mut stream: &TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_all(bytes)
}

fn promote_to_active(
    client_token: proxy_core::os::Token,
    client: TcpStream,
    peer: TcpStream,
    event_loop: &mut EventLoop,
    active: &mut HashMap<proxy_core::os::Token, ActiveSession>,
) {
    let peer_token = match event_loop.register(&peer, Interest::Readable) {
        Ok(t) => t,
        Err(e) => {
            log_error!("failed to register peer connection: {}", e);
            return;
        }
    };
    let client_clone = match client.try_clone() {
        Ok(c) => c,
        Err(e) => {
            log_error!("failed to clone client socket: {}", e);
            return;
        }
    };
    let peer_clone = match peer.try_clone() {
        Ok(p) => p,
        Err(e) => {
            log_error!("failed to clone peer socket: {}", e);
            return;
        }
    };
    active.insert(
        client_token,
        ActiveSession { client, peer: peer_clone, client_token, peer_token },
    );
    active.insert(
        peer_token,
        ActiveSession { client: client_clone, peer, client_token, peer_token },
    );
}

/// Relay whatever is currently readable on the side keyed by `token`
/// toward its counterpart, then re-insert both halves of the pair.
fn relay_one_direction(
    mut session: ActiveSession,
    token: proxy_core::os::Token,
    event_loop: &mut EventLoop,
    active: &mut HashMap<proxy_core::os::Token, ActiveSession>,
) {
    let (client_token, peer_token) = (session.client_token, session.peer_token);
    let mut scratch = [0u8; 16384];
    let outcome = {
        let (reader, writer): (&mut TcpStream, &mut TcpStream) =
            if token == client_token { (&mut session.client, &mut session.peer) } else { (&mut session.peer, &mut session.client) };
        GlueLeg::new(&mut *reader, &mut *writer).pump(&mut scratch)
    };
    match outcome {
        Ok(0) => {
            let _ = event_loop.deregister(client_token);
            let _ = event_loop.deregister(peer_token);
            active.remove(&client_token);
            active.remove(&peer_token);
        }
        Ok(n) if n == usize::MAX => {
            active.insert(token, session);
        }
        Ok(n) => {
            metrics::add_bytes_relayed(n as u64);
            active.insert(token, session);
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => {
            active.insert(token, session);
        }
        Err(_) => {
            let _ = event_loop.deregister(client_token);
            let _ = event_loop.deregister(peer_token);
            active.remove(&client_token);
            active.remove(&peer_token);
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supernode core: sockets, event loop, management port.
//!
//! One thread, three UDP sockets (edges, management, federation), one
//! `mio::Poll` with a 10-second ceiling. All state mutation happens between a
//! `recv_from` return and the next poll; there are no worker threads, no
//! async runtime and no locks. Per iteration the loop runs discovery
//! maintenance (until the federation is ready), drains the ready sockets and
//! sweeps expired registrations.

use crate::config::SupernodeConfig;
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token};
use overmesh::config::{POLL_TIMEOUT, RECV_BUF_SIZE};
use overmesh::federation::{Federation, FederationDirectory};
use overmesh::registry::EdgeRegistry;
use overmesh::stats::SnStats;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

mod dispatch;
mod federation;

const EDGE: Token = Token(0);
const MGMT: Token = Token(1);
const FEDERATION: Token = Token(2);

/// The supernode process state: sockets, directories, counters.
///
/// A single owner struct threaded through every handler; nothing here is
/// shared across threads.
#[derive(Debug)]
pub struct Supernode {
    pub(crate) config: SupernodeConfig,
    pub(crate) edge_sock: UdpSocket,
    pub(crate) mgmt_sock: UdpSocket,
    pub(crate) fed_sock: Option<UdpSocket>,
    pub(crate) registry: EdgeRegistry,
    pub(crate) federation: Option<Federation>,
    pub(crate) stats: SnStats,
    /// Locally-routable address, for advertisements and loopback suppression.
    pub(crate) local_ip: Option<IpAddr>,
    /// Actual federation port (differs from the configured one only when the
    /// config asked for an ephemeral port).
    pub(crate) fed_port: u16,
    /// Edge-facing socket advertised to siblings.
    pub(crate) advertised_sock: SocketAddr,
    running: Arc<AtomicBool>,
}

impl Supernode {
    /// Bind the sockets and load the federation state.
    pub fn new(config: SupernodeConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;
        let start = Instant::now();

        let edge_addr = SocketAddr::new(config.bind_address, config.edge_port);
        let edge_sock = bind_udp(edge_addr).map_err(|source| ServerError::Bind {
            addr: edge_addr,
            source,
        })?;
        let edge_port = edge_sock.local_addr().map_err(ServerError::Io)?.port();
        info!("supernode is listening on UDP {} (edges)", edge_port);

        // Management speaks plaintext without authentication: loopback only.
        let mgmt_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), config.mgmt_port);
        let mgmt_sock = bind_udp(mgmt_addr).map_err(|source| ServerError::Bind {
            addr: mgmt_addr,
            source,
        })?;
        info!(
            "supernode is listening on UDP {} (management, loopback)",
            mgmt_sock.local_addr().map_err(ServerError::Io)?.port()
        );

        let local_ip = local_ip_address::local_ip().ok();

        let (fed_sock, federation_state, fed_port) = match config.federation_port {
            Some(port) => {
                let fed_addr = SocketAddr::new(config.bind_address, port);
                let sock = bind_udp(fed_addr).map_err(|source| ServerError::Bind {
                    addr: fed_addr,
                    source,
                })?;
                let actual = sock.local_addr().map_err(ServerError::Io)?.port();
                let directory =
                    FederationDirectory::load(&config.state_dir, port, &config.seeds)
                        .map_err(|e| ServerError::Startup(e.to_string()))?;
                info!("supernode is listening on UDP {} (federation)", actual);
                (
                    Some(sock),
                    Some(Federation::new(directory, start)),
                    actual,
                )
            }
            None => (None, None, 0),
        };

        let advertised_sock = SocketAddr::new(
            local_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            edge_port,
        );

        Ok(Self {
            config,
            edge_sock,
            mgmt_sock,
            fed_sock,
            registry: EdgeRegistry::new(),
            federation: federation_state,
            stats: SnStats::new(start),
            local_ip,
            fed_port,
            advertised_sock,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Flag flipped (e.g. from a signal handler) to stop the loop at the next
    /// poll return.
    #[must_use]
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Long lived processing entry point.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut poll = Poll::new().map_err(ServerError::Io)?;
        let mut events = Events::with_capacity(16);

        poll.registry()
            .register(&mut self.edge_sock, EDGE, Interest::READABLE)
            .map_err(ServerError::Io)?;
        poll.registry()
            .register(&mut self.mgmt_sock, MGMT, Interest::READABLE)
            .map_err(ServerError::Io)?;
        if let Some(sock) = self.fed_sock.as_mut() {
            poll.registry()
                .register(sock, FEDERATION, Interest::READABLE)
                .map_err(ServerError::Io)?;
        }

        self.federation_bootstrap();
        info!("supernode started");

        let mut buf = [0u8; RECV_BUF_SIZE];
        let mut fatal = false;

        while self.running.load(Ordering::Relaxed) && !fatal {
            let now = Instant::now();
            if self.federation.as_ref().is_some_and(|f| !f.is_ready()) {
                self.run_discovery_maintenance(now);
            }

            if let Err(err) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServerError::Io(err));
            }

            let now = Instant::now();
            for event in events.iter() {
                match event.token() {
                    EDGE => self.drain_edge(&mut buf, now),
                    MGMT => fatal = self.drain_mgmt(&mut buf, now),
                    FEDERATION => fatal = self.drain_federation(&mut buf, now),
                    _ => {}
                }
                if fatal {
                    break;
                }
            }

            self.registry.purge(now, self.config.purge_horizon());
        }

        info!(
            "supernode loop exiting, dropping {} edge registrations",
            self.registry.len()
        );
        Ok(())
    }

    /// Drain the edge socket. Errors here are transient: the supernode keeps
    /// serving its other edges.
    fn drain_edge(&mut self, buf: &mut [u8], now: Instant) {
        loop {
            match self.edge_sock.recv_from(buf) {
                // For UDP a zero read just means an empty datagram.
                Ok((0, sender)) => debug!("empty datagram from {} on edge socket", sender),
                Ok((len, sender)) => self.process_edge_datagram(sender, &buf[..len], now),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.stats.errors += 1;
                    error!("recv_from failed on edge socket: {}", err);
                    break;
                }
            }
        }
    }

    /// Drain the management socket. Returns `true` on a fatal condition.
    fn drain_mgmt(&mut self, buf: &mut [u8], now: Instant) -> bool {
        loop {
            match self.mgmt_sock.recv_from(buf) {
                Ok((0, sender)) => {
                    error!("empty datagram from {} on management socket", sender);
                    return true;
                }
                Ok((_, sender)) => self.process_mgmt_datagram(sender, now),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return false,
                Err(err) => {
                    error!("recv_from failed on management socket: {}", err);
                    return true;
                }
            }
        }
    }

    /// Drain the federation socket. Returns `true` on a fatal condition.
    fn drain_federation(&mut self, buf: &mut [u8], now: Instant) -> bool {
        loop {
            let Some(sock) = self.fed_sock.as_ref() else {
                return false;
            };
            match sock.recv_from(buf) {
                Ok((0, sender)) => {
                    error!("empty datagram from {} on federation socket", sender);
                    return true;
                }
                Ok((len, sender)) => self.process_federation_datagram(sender, &buf[..len], now),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return false,
                Err(err) => {
                    error!("recv_from failed on federation socket: {}", err);
                    return true;
                }
            }
        }
    }

    /// Any management datagram, whatever its content, triggers a snapshot.
    pub(crate) fn process_mgmt_datagram(&mut self, sender: SocketAddr, now: Instant) {
        debug!("management request from {}", sender);
        let reply = self.stats.management_snapshot(self.registry.len(), now);
        if let Err(err) = self.mgmt_sock.send_to(reply.as_bytes(), sender) {
            self.stats.errors += 1;
            error!("management reply to {} failed: {}", sender, err);
        }
    }
}

/// socket2 -> std -> mio: reuse-address, explicit bind, non-blocking.
fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let std_sock: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_sock))
}

/// Server error types.
#[derive(Debug)]
pub enum ServerError {
    Config(String),
    Bind { addr: SocketAddr, source: io::Error },
    Startup(String),
    Io(io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(s) => write!(f, "Configuration error: {}", s),
            Self::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
            Self::Startup(s) => write!(f, "Startup error: {}", s),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

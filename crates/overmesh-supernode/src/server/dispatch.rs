// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-datagram edge protocol dispatch.
//!
//! Every datagram from the edge socket runs through
//! [`Supernode::process_edge_datagram`]: decode the common header, apply the
//! TTL rule, then act on the packet code. Frames travelling onwards carry the
//! decremented TTL; a frame that has not passed through a supernode yet gets
//! `FROM_SUPERNODE|SOCKET` set and the sender's observed public socket
//! inlined, so the receiving edge learns where its peer really lives.

use super::Supernode;
use overmesh::config::{DEFAULT_TTL, MAX_BACKUP_SUPERNODES, RECV_BUF_SIZE, REGISTRATION_LIFETIME_SECS};
use overmesh::types::{Community, Mac};
use overmesh::wire::edge::{
    CommonHeader, PacketBody, PacketCode, RegisterBody, RegisterSuperAckBody, RegisterSuperBody,
    FLAG_FROM_SUPERNODE, FLAG_SOCKET, TTL_OFFSET,
};
use overmesh::wire::Cursor;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, error, warn};

impl Supernode {
    /// Examine one edge datagram and decide what to do with it.
    pub(crate) fn process_edge_datagram(
        &mut self,
        sender: SocketAddr,
        datagram: &[u8],
        now: Instant,
    ) {
        let mut cur = Cursor::new(datagram);
        let mut hdr = match CommonHeader::decode(&mut cur) {
            Ok(hdr) => hdr,
            Err(err) => {
                self.stats.errors += 1;
                warn!("dropping edge datagram from {}: {}", sender, err);
                return;
            }
        };

        if hdr.ttl == 0 {
            debug!("expired TTL from {}", sender);
            return;
        }
        // The decremented value is what every re-emitted frame carries.
        hdr.ttl -= 1;
        let from_supernode = hdr.flags & FLAG_FROM_SUPERNODE != 0;

        match hdr.code {
            PacketCode::Packet => self.handle_packet(&hdr, from_supernode, sender, datagram, cur, now),
            PacketCode::Register => {
                self.handle_register(&hdr, from_supernode, sender, datagram, cur, now);
            }
            PacketCode::RegisterAck => {
                debug!("REGISTER_ACK from {} accepted and ignored", sender);
            }
            PacketCode::RegisterSuper => self.handle_register_super(&hdr, sender, cur, now),
            PacketCode::RegisterSuperAck => {
                debug!("stray REGISTER_SUPER_ACK from {} ignored", sender);
            }
        }
    }

    /// PACKET: edge-to-edge Ethernet frame relayed through us.
    fn handle_packet(
        &mut self,
        hdr: &CommonHeader,
        from_supernode: bool,
        sender: SocketAddr,
        datagram: &[u8],
        mut cur: Cursor<'_>,
        now: Instant,
    ) {
        let body = match PacketBody::decode(&mut cur, hdr.flags) {
            Ok(body) => body,
            Err(err) => {
                self.stats.errors += 1;
                warn!("dropping PACKET from {}: {}", sender, err);
                return;
            }
        };
        let payload = cur.rest();
        let unicast = !body.dst_mac.is_multi_or_broadcast();

        debug!(
            "Rx PACKET ({}) {} -> {} {}",
            if unicast { "unicast" } else { "multicast" },
            body.src_mac,
            body.dst_mac,
            if from_supernode { "from sn" } else { "local" }
        );

        self.stats.last_fwd = now;

        let frame = if from_supernode {
            // Already relayed once: pass through untouched apart from the TTL.
            forward_unmodified(datagram, hdr.ttl)
        } else {
            rewrite_with_sender(hdr, &PacketBody { sock: Some(sender), ..body }, payload)
        };

        if unicast {
            self.try_forward(&body.dst_mac, &frame);
        } else {
            self.try_broadcast(&hdr.community, &body.src_mac, &frame);
        }
    }

    /// REGISTER: P2P introduction relayed to a single destination edge.
    fn handle_register(
        &mut self,
        hdr: &CommonHeader,
        from_supernode: bool,
        sender: SocketAddr,
        datagram: &[u8],
        mut cur: Cursor<'_>,
        now: Instant,
    ) {
        let body = match RegisterBody::decode(&mut cur, hdr.flags) {
            Ok(body) => body,
            Err(err) => {
                self.stats.errors += 1;
                warn!("dropping REGISTER from {}: {}", sender, err);
                return;
            }
        };
        let tail = cur.rest();

        if body.dst_mac.is_multi_or_broadcast() {
            error!("Rx REGISTER from {} with multicast destination", sender);
            return;
        }

        debug!(
            "Rx REGISTER {} -> {} {}",
            body.src_mac,
            body.dst_mac,
            if from_supernode { "from sn" } else { "local" }
        );

        self.stats.last_fwd = now;

        let frame = if from_supernode {
            forward_unmodified(datagram, hdr.ttl)
        } else {
            let mut out = Vec::with_capacity(datagram.len() + 10);
            let mut hdr2 = *hdr;
            hdr2.flags |= FLAG_SOCKET | FLAG_FROM_SUPERNODE;
            hdr2.encode(&mut out);
            RegisterBody {
                sock: Some(sender),
                ..body
            }
            .encode(&mut out);
            out.extend_from_slice(tail);
            out
        };

        // Unicast only; an unknown destination drops silently.
        self.try_forward(&body.dst_mac, &frame);
    }

    /// REGISTER_SUPER: an edge registering with this supernode.
    fn handle_register_super(
        &mut self,
        hdr: &CommonHeader,
        sender: SocketAddr,
        mut cur: Cursor<'_>,
        now: Instant,
    ) {
        self.stats.reg_super += 1;
        self.stats.last_reg_super = now;

        let body = match RegisterSuperBody::decode(&mut cur) {
            Ok(body) => body,
            Err(err) => {
                self.stats.errors += 1;
                warn!("dropping REGISTER_SUPER from {}: {}", sender, err);
                return;
            }
        };

        debug!("Rx REGISTER_SUPER for {} [{}]", body.edge_mac, sender);
        self.registry.upsert(hdr.community, body.edge_mac, sender, now);

        let backups: Vec<SocketAddr> = self
            .federation
            .as_ref()
            .and_then(|fed| fed.directory.community(&hdr.community))
            .map(|info| {
                info.supernodes
                    .iter()
                    .copied()
                    .take(MAX_BACKUP_SUPERNODES)
                    .collect()
            })
            .unwrap_or_default();

        let ack_hdr = CommonHeader {
            ttl: DEFAULT_TTL,
            code: PacketCode::RegisterSuperAck,
            flags: FLAG_SOCKET | FLAG_FROM_SUPERNODE,
            community: hdr.community,
        };
        let ack = RegisterSuperAckBody {
            cookie: body.cookie,
            edge_mac: body.edge_mac,
            lifetime: REGISTRATION_LIFETIME_SECS,
            sock: sender,
            backups,
        };

        let mut out = Vec::with_capacity(64);
        ack_hdr.encode(&mut out);
        ack.encode(&mut out);

        match self.edge_sock.send_to(&out, sender) {
            Ok(n) if n == out.len() => {
                debug!("Tx REGISTER_SUPER_ACK for {} [{}]", body.edge_mac, sender);
            }
            Ok(_) | Err(_) => {
                self.stats.errors += 1;
                error!("REGISTER_SUPER_ACK to {} failed", sender);
            }
        }
    }

    /// Forward to a unicast MAC. An unknown destination is dropped silently:
    /// there is deliberately no broadcast fallback.
    pub(crate) fn try_forward(&mut self, dst_mac: &Mac, frame: &[u8]) {
        match self.registry.find_mac(dst_mac) {
            Some(peer) => {
                let target = peer.sock;
                match self.edge_sock.send_to(frame, target) {
                    Ok(n) if n == frame.len() => {
                        self.stats.fwd += 1;
                        debug!("unicast {} bytes to [{}] {}", frame.len(), target, dst_mac);
                    }
                    Ok(n) => {
                        self.stats.errors += 1;
                        error!(
                            "unicast {} bytes to [{}] {} truncated to {}",
                            frame.len(),
                            target,
                            dst_mac,
                            n
                        );
                    }
                    Err(err) => {
                        self.stats.errors += 1;
                        error!(
                            "unicast {} bytes to [{}] {} failed: {}",
                            frame.len(),
                            target,
                            dst_mac,
                            err
                        );
                    }
                }
            }
            None => debug!("unknown destination {}, dropping", dst_mac),
        }
    }

    /// Send the same datagram to every community member except the source.
    pub(crate) fn try_broadcast(&mut self, community: &Community, src_mac: &Mac, frame: &[u8]) {
        let targets: Vec<(Mac, SocketAddr)> = self
            .registry
            .community_peers(community)
            .filter(|peer| peer.mac != *src_mac)
            .map(|peer| (peer.mac, peer.sock))
            .collect();

        for (mac, target) in targets {
            match self.edge_sock.send_to(frame, target) {
                Ok(n) if n == frame.len() => {
                    self.stats.broadcast += 1;
                    debug!("multicast {} bytes to [{}] {}", frame.len(), target, mac);
                }
                Ok(_) | Err(_) => {
                    self.stats.errors += 1;
                    warn!("multicast {} bytes to [{}] {} failed", frame.len(), target, mac);
                }
            }
        }
    }
}

/// Re-emit the received bytes with only the TTL byte patched.
fn forward_unmodified(datagram: &[u8], decremented_ttl: u8) -> Vec<u8> {
    let mut out = datagram.to_vec();
    out[TTL_OFFSET] = decremented_ttl;
    out
}

/// Re-encode the header and fixed body with `FROM_SUPERNODE|SOCKET` set and
/// the observed sender socket inlined; the opaque payload tail is copied
/// byte-for-byte.
fn rewrite_with_sender(hdr: &CommonHeader, body: &PacketBody, payload: &[u8]) -> Vec<u8> {
    debug_assert!(body.sock.is_some());
    let mut out = Vec::with_capacity(RECV_BUF_SIZE.min(payload.len() + 64));
    let mut hdr2 = *hdr;
    hdr2.flags |= FLAG_SOCKET | FLAG_FROM_SUPERNODE;
    hdr2.encode(&mut out);
    body.encode(&mut out);
    out.extend_from_slice(payload);
    out
}

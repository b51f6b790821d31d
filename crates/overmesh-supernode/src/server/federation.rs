// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Federation I/O: REQ/RSP/ADV handling and discovery maintenance.
//!
//! The state machine and directory live in `overmesh::federation`; this
//! module wires them to the federation socket. All sends go through
//! [`FedCtx`], which owns the loopback suppression and the egress sequence
//! numbering.

use super::Supernode;
use mio::net::UdpSocket;
use overmesh::federation::{is_self_addr, Federation};
use overmesh::stats::SnStats;
use overmesh::types::Community;
use overmesh::wire::federation::{
    SnmAdvertise, SnmHeader, SnmInfo, SnmKind, SnmRequest, FLAG_ADVERTISE, FLAG_ALL_COMMUNITIES,
    FLAG_FROM_EDGE, FLAG_NAMED_COMMUNITIES, FLAG_SUPERNODE,
};
use overmesh::wire::Cursor;
use std::net::{IpAddr, SocketAddr};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Split borrow of the federation-related supernode fields.
struct FedCtx<'a> {
    fed: &'a mut Federation,
    sock: &'a UdpSocket,
    stats: &'a mut SnStats,
    local_ip: Option<IpAddr>,
    fed_port: u16,
    advertised_sock: SocketAddr,
}

impl Supernode {
    fn fed_ctx(&mut self) -> Option<FedCtx<'_>> {
        let fed = self.federation.as_mut()?;
        let sock = self.fed_sock.as_ref()?;
        Some(FedCtx {
            fed,
            sock,
            stats: &mut self.stats,
            local_ip: self.local_ip,
            fed_port: self.fed_port,
            advertised_sock: self.advertised_sock,
        })
    }

    /// Examine one federation datagram.
    pub(crate) fn process_federation_datagram(
        &mut self,
        sender: SocketAddr,
        datagram: &[u8],
        _now: Instant,
    ) {
        let Some(mut ctx) = self.fed_ctx() else {
            return;
        };
        let mut cur = Cursor::new(datagram);
        let hdr = match SnmHeader::decode(&mut cur) {
            Ok(hdr) => hdr,
            Err(err) => {
                ctx.stats.errors += 1;
                warn!("dropping federation datagram from {}: {}", sender, err);
                return;
            }
        };
        debug!(
            "Rx SNM {:?} seq={} flags={:#04x} from {}",
            hdr.kind, hdr.seq, hdr.flags, sender
        );

        match hdr.kind {
            SnmKind::Request => ctx.handle_request(&hdr, sender, &mut cur),
            SnmKind::Response => ctx.handle_response(sender, &mut cur),
            SnmKind::Advertise => ctx.handle_advertisement(&hdr, sender, &mut cur),
        }
    }

    /// Startup burst: query every known sibling (the all-communities form
    /// while discovery has not completed).
    pub(crate) fn federation_bootstrap(&mut self) {
        let Some(mut ctx) = self.fed_ctx() else {
            return;
        };
        let all = !ctx.fed.is_ready();
        let targets: Vec<SocketAddr> = ctx.fed.directory.supernodes().to_vec();
        for target in targets {
            ctx.send_request(target, all, &[]);
        }
    }

    /// Fold discovery results into the persistent state once the startup
    /// delay has elapsed, advertise, and become ready.
    pub(crate) fn run_discovery_maintenance(&mut self, now: Instant) {
        let Some(mut ctx) = self.fed_ctx() else {
            return;
        };
        if !ctx.fed.discovery_due(now) {
            return;
        }
        ctx.fed.directory.absorb_pending();
        // Advertise before flipping to ready so the round still carries the
        // acknowledge-request flag and siblings answer with their own view.
        ctx.advertise_all();
        ctx.fed.complete_discovery();
    }
}

impl FedCtx<'_> {
    fn handle_request(&mut self, hdr: &SnmHeader, sender: SocketAddr, cur: &mut Cursor<'_>) {
        if let Err(err) = self.fed.accept_request() {
            error!("SNM REQ from {} dropped: {}", sender, err);
            return;
        }
        let req = match SnmRequest::decode(cur) {
            Ok(req) => req,
            Err(err) => {
                self.stats.errors += 1;
                warn!("dropping SNM REQ from {}: {}", sender, err);
                return;
            }
        };
        let from_edge = hdr.flags & FLAG_FROM_EDGE != 0;

        if hdr.flags & FLAG_ADVERTISE != 0 {
            if from_edge {
                // An edge bringing a new community into the federation.
                if req.communities.len() != 1 {
                    error!(
                        "SNM REQ from edge {} names {} communities",
                        sender,
                        req.communities.len()
                    );
                    return;
                }
                let name = req.communities[0];
                if self.fed.directory.adopt_community(name) {
                    self.advertise_community(&name);
                }
            }
            self.send_advertisement(sender, &[]);
        } else {
            let all = hdr.flags & FLAG_ALL_COMMUNITIES != 0;
            let info = self.fed.directory.info_for(&req.communities, all);
            self.send_response(sender, &info);
        }

        if !from_edge {
            self.fed.directory.add_supernode(sender);
        }
    }

    fn handle_response(&mut self, sender: SocketAddr, cur: &mut Cursor<'_>) {
        if let Err(err) = self.fed.accept_response() {
            error!("SNM RSP from {} dropped: {}", sender, err);
            return;
        }
        let info = match SnmInfo::decode(cur) {
            Ok(info) => info,
            Err(err) => {
                self.stats.errors += 1;
                warn!("dropping SNM RSP from {}: {}", sender, err);
                return;
            }
        };
        let added = self.fed.directory.merge_info(&info);
        debug!("SNM RSP from {} brought {} new supernodes", sender, added);

        // Widen discovery through the siblings we just learned about.
        let targets: Vec<SocketAddr> = self
            .fed
            .directory
            .newest_supernodes(added)
            .copied()
            .collect();
        for target in targets {
            self.send_request(target, true, &[]);
        }
    }

    fn handle_advertisement(&mut self, hdr: &SnmHeader, sender: SocketAddr, cur: &mut Cursor<'_>) {
        let adv = match SnmAdvertise::decode(cur) {
            Ok(adv) => adv,
            Err(err) => {
                self.stats.errors += 1;
                warn!("dropping SNM ADV from {}: {}", sender, err);
                return;
            }
        };
        let discovering = !self.fed.is_ready();
        let changed = self.fed.directory.merge_advertisement(
            sender,
            adv.sock,
            &adv.communities,
            discovering,
        );

        // The sender asked to hear our side; only answer when it told us
        // something new, or two freshly-booted siblings would ping-pong.
        if changed && hdr.flags & FLAG_ADVERTISE != 0 {
            let ours: Vec<Community> = self
                .fed
                .directory
                .local_communities()
                .iter()
                .map(|c| c.name)
                .collect();
            self.send_advertisement(sender, &ours);
        }
    }

    fn advertise_all(&mut self) {
        let ours: Vec<Community> = self
            .fed
            .directory
            .local_communities()
            .iter()
            .map(|c| c.name)
            .collect();
        if ours.is_empty() {
            return;
        }
        let targets: Vec<SocketAddr> = self.fed.directory.supernodes().to_vec();
        for target in targets {
            self.send_advertisement(target, &ours);
        }
    }

    fn advertise_community(&mut self, name: &Community) {
        let targets: Vec<SocketAddr> = self.fed.directory.supernodes().to_vec();
        for target in targets {
            self.send_advertisement(target, std::slice::from_ref(name));
        }
    }

    fn send_request(&mut self, target: SocketAddr, all_communities: bool, named: &[Community]) {
        if is_self_addr(&target, self.local_ip, self.fed_port) {
            return;
        }
        let mut flags = FLAG_SUPERNODE;
        if all_communities {
            flags |= FLAG_ALL_COMMUNITIES;
        } else if !named.is_empty() {
            flags |= FLAG_NAMED_COMMUNITIES;
        }
        let hdr = SnmHeader {
            kind: SnmKind::Request,
            flags,
            seq: self.fed.next_seq(),
        };
        let req = SnmRequest {
            communities: named.to_vec(),
        };
        let mut out = Vec::new();
        hdr.encode(&mut out);
        req.encode(&mut out);
        info!("send SNM REQ to {}", target);
        self.send(target, &out);
    }

    fn send_response(&mut self, target: SocketAddr, info: &SnmInfo) {
        let hdr = SnmHeader {
            kind: SnmKind::Response,
            flags: FLAG_SUPERNODE,
            seq: self.fed.next_seq(),
        };
        let mut out = Vec::new();
        hdr.encode(&mut out);
        info.encode(&mut out);
        info!("send SNM RSP to {}", target);
        self.send(target, &out);
    }

    fn send_advertisement(&mut self, target: SocketAddr, communities: &[Community]) {
        if is_self_addr(&target, self.local_ip, self.fed_port) {
            return;
        }
        let mut flags = FLAG_SUPERNODE;
        // Until discovery completes we still want the sibling's view back.
        if !self.fed.is_ready() {
            flags |= FLAG_ADVERTISE;
        }
        let hdr = SnmHeader {
            kind: SnmKind::Advertise,
            flags,
            seq: self.fed.next_seq(),
        };
        let adv = SnmAdvertise {
            sock: self.advertised_sock,
            communities: communities.to_vec(),
        };
        let mut out = Vec::new();
        hdr.encode(&mut out);
        adv.encode(&mut out);
        info!("send SNM ADV to {}", target);
        self.send(target, &out);
    }

    fn send(&mut self, target: SocketAddr, frame: &[u8]) {
        match self.sock.send_to(frame, target) {
            Ok(n) if n == frame.len() => {}
            Ok(_) | Err(_) => {
                self.stats.errors += 1;
                error!("federation send to {} failed", target);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testutil::{test_federated_node, TestPeer};
    use overmesh::config::DISCOVERY_STARTUP_DELAY;
    use overmesh::federation::DiscoveryState;
    use overmesh::wire::federation::CommunityRecord;
    use std::time::Duration;

    fn community(name: &str) -> Community {
        Community::parse(name).expect("test community parses")
    }

    fn seed_community_file(dir: &std::path::Path, communities: &str) {
        // The test nodes bind an ephemeral federation port but are
        // configured with port 0, which names the state files.
        std::fs::write(dir.join("SN_COMM_0"), communities).expect("write community file");
    }

    fn snm_frame(kind: SnmKind, flags: u8, seq: u32, payload: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut out = Vec::new();
        SnmHeader { kind, flags, seq }.encode(&mut out);
        payload(&mut out);
        out
    }

    fn state(node: &Supernode) -> DiscoveryState {
        node.federation
            .as_ref()
            .expect("federation enabled")
            .state()
    }

    #[test]
    fn test_boot_without_siblings_is_immediately_ready() {
        let tmp = tempfile::tempdir().expect("tempdir");
        seed_community_file(tmp.path(), "net1\n");

        let node = test_federated_node(tmp.path(), vec![]);
        assert_eq!(state(&node), DiscoveryState::Ready);
    }

    #[test]
    fn test_discovery_widens_and_completes() {
        // S7: seeded boot discovers, queries the new siblings, then settles.
        let tmp = tempfile::tempdir().expect("tempdir");
        seed_community_file(tmp.path(), "net1\n");

        let seed = TestPeer::new();
        let mut node = test_federated_node(tmp.path(), vec![seed.addr()]);
        assert_eq!(state(&node), DiscoveryState::Discovery);

        node.federation_bootstrap();
        let req_bytes = seed.recv().expect("REQ reaches the seed");
        let mut cur = Cursor::new(&req_bytes);
        let hdr = SnmHeader::decode(&mut cur).expect("REQ header decodes");
        assert_eq!(hdr.kind, SnmKind::Request);
        assert_ne!(hdr.flags & FLAG_SUPERNODE, 0);
        assert_ne!(hdr.flags & FLAG_ALL_COMMUNITIES, 0);

        // Synthetic RSP naming two more siblings and a thinly-hosted community.
        let sib2 = TestPeer::new();
        let sib3 = TestPeer::new();
        let rsp = snm_frame(SnmKind::Response, FLAG_SUPERNODE, 1, |out| {
            SnmInfo {
                supernodes: vec![sib2.addr(), sib3.addr()],
                communities: vec![CommunityRecord {
                    name: community("net7"),
                    sn_num: 1,
                }],
            }
            .encode(out);
        });
        node.process_federation_datagram(seed.addr(), &rsp, Instant::now());

        assert_eq!(state(&node), DiscoveryState::Discovery);
        assert!(sib2.recv().is_some(), "newly learned sibling is queried");
        assert!(sib3.recv().is_some(), "newly learned sibling is queried");

        // Before the startup delay nothing happens.
        node.run_discovery_maintenance(Instant::now());
        assert_eq!(state(&node), DiscoveryState::Discovery);

        node.run_discovery_maintenance(
            Instant::now() + DISCOVERY_STARTUP_DELAY + Duration::from_secs(1),
        );
        assert_eq!(state(&node), DiscoveryState::Ready);

        let directory = &node.federation.as_ref().expect("enabled").directory;
        assert!(directory.hosts(&community("net7")), "thin community adopted");

        // Everyone got our advertisement.
        for sibling in [&seed, &sib2, &sib3] {
            let adv_bytes = sibling.recv().expect("ADV reaches sibling");
            let mut cur = Cursor::new(&adv_bytes);
            let hdr = SnmHeader::decode(&mut cur).expect("ADV header decodes");
            assert_eq!(hdr.kind, SnmKind::Advertise);
            let adv = SnmAdvertise::decode(&mut cur).expect("ADV body decodes");
            assert!(adv.communities.contains(&community("net7")));
            assert!(adv.communities.contains(&community("net1")));
        }
    }

    #[test]
    fn test_request_rejected_while_discovering() {
        let tmp = tempfile::tempdir().expect("tempdir");
        seed_community_file(tmp.path(), "net1\n");

        let seed = TestPeer::new();
        let mut node = test_federated_node(tmp.path(), vec![seed.addr()]);

        let req = snm_frame(SnmKind::Request, FLAG_SUPERNODE | FLAG_ALL_COMMUNITIES, 1, |out| {
            SnmRequest {
                communities: Vec::new(),
            }
            .encode(out);
        });
        let asker = TestPeer::new();
        node.process_federation_datagram(asker.addr(), &req, Instant::now());

        assert!(asker.recv().is_none(), "no RSP while not ready");
    }

    #[test]
    fn test_info_request_served_when_ready() {
        let tmp = tempfile::tempdir().expect("tempdir");
        seed_community_file(tmp.path(), "net1\nnet2\n");

        let mut node = test_federated_node(tmp.path(), vec![]);
        let sibling = TestPeer::new();

        let req = snm_frame(SnmKind::Request, FLAG_SUPERNODE | FLAG_ALL_COMMUNITIES, 1, |out| {
            SnmRequest {
                communities: Vec::new(),
            }
            .encode(out);
        });
        node.process_federation_datagram(sibling.addr(), &req, Instant::now());

        let rsp_bytes = sibling.recv().expect("RSP arrives");
        let mut cur = Cursor::new(&rsp_bytes);
        let hdr = SnmHeader::decode(&mut cur).expect("RSP header decodes");
        assert_eq!(hdr.kind, SnmKind::Response);
        let info = SnmInfo::decode(&mut cur).expect("RSP body decodes");
        assert_eq!(info.communities.len(), 2);

        // A non-edge requester becomes a known sibling.
        let directory = &node.federation.as_ref().expect("enabled").directory;
        assert!(directory.supernodes().contains(&sibling.addr()));
    }

    #[test]
    fn test_edge_brings_new_community() {
        let tmp = tempfile::tempdir().expect("tempdir");
        seed_community_file(tmp.path(), "net1\n");

        let mut node = test_federated_node(tmp.path(), vec![]);
        let edge = TestPeer::new();

        let req = snm_frame(SnmKind::Request, FLAG_ADVERTISE | FLAG_FROM_EDGE, 1, |out| {
            SnmRequest {
                communities: vec![community("net9")],
            }
            .encode(out);
        });
        node.process_federation_datagram(edge.addr(), &req, Instant::now());

        let adv_bytes = edge.recv().expect("ADV reaches the edge");
        let mut cur = Cursor::new(&adv_bytes);
        assert_eq!(
            SnmHeader::decode(&mut cur).expect("decodes").kind,
            SnmKind::Advertise
        );

        let directory = &node.federation.as_ref().expect("enabled").directory;
        assert!(directory.hosts(&community("net9")));
        // The edge itself is not a sibling.
        assert!(!directory.supernodes().contains(&edge.addr()));

        // Adoption was persisted.
        let persisted =
            std::fs::read_to_string(tmp.path().join("SN_COMM_0")).expect("file readable");
        assert!(persisted.contains("net9"));
    }

    #[test]
    fn test_edge_request_with_wrong_community_count_dropped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        seed_community_file(tmp.path(), "net1\n");

        let mut node = test_federated_node(tmp.path(), vec![]);
        let edge = TestPeer::new();

        let req = snm_frame(SnmKind::Request, FLAG_ADVERTISE | FLAG_FROM_EDGE, 1, |out| {
            SnmRequest {
                communities: vec![community("a"), community("b")],
            }
            .encode(out);
        });
        node.process_federation_datagram(edge.addr(), &req, Instant::now());

        assert!(edge.recv().is_none());
        let directory = &node.federation.as_ref().expect("enabled").directory;
        assert!(!directory.hosts(&community("a")));
    }

    #[test]
    fn test_advertisement_reciprocated_once() {
        let tmp = tempfile::tempdir().expect("tempdir");
        seed_community_file(tmp.path(), "net1\n");

        let mut node = test_federated_node(tmp.path(), vec![]);
        let sibling = TestPeer::new();
        let sibling_edge_sock: SocketAddr = "198.51.100.7:7654".parse().expect("literal parses");

        let adv = snm_frame(SnmKind::Advertise, FLAG_SUPERNODE | FLAG_ADVERTISE, 1, |out| {
            SnmAdvertise {
                sock: sibling_edge_sock,
                communities: vec![community("net1")],
            }
            .encode(out);
        });

        node.process_federation_datagram(sibling.addr(), &adv, Instant::now());
        let reply = sibling.recv().expect("reciprocal ADV");
        let mut cur = Cursor::new(&reply);
        assert_eq!(
            SnmHeader::decode(&mut cur).expect("decodes").kind,
            SnmKind::Advertise
        );

        // The sibling now backs net1 for REGISTER_SUPER_ACK purposes.
        let directory = &node.federation.as_ref().expect("enabled").directory;
        let info = directory.community(&community("net1")).expect("hosted");
        assert_eq!(info.supernodes, vec![sibling_edge_sock]);

        // A repeat carries no news: no reciprocation, no ping-pong.
        node.process_federation_datagram(sibling.addr(), &adv, Instant::now());
        assert!(sibling.recv().is_none());
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Edge directory: peer records keyed by virtual MAC address.
//!
//! The directory holds at most one record per MAC; the community is verified
//! (and overwritten - edges may move between communities) on each
//! registration. Records are created by REGISTER_SUPER, refreshed by every
//! subsequent one, and removed only by the periodic [`EdgeRegistry::purge`]
//! sweep. There is no explicit deregistration message.

use crate::types::{Community, Mac};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// One registered edge.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub community: Community,
    pub mac: Mac,
    /// Last observed public socket. Changes as the edge roams.
    pub sock: SocketAddr,
    /// Monotonically non-decreasing.
    pub last_seen: Instant,
}

/// Directory of registered edges.
///
/// Keyed by MAC alone; the expected fleet is low thousands, so the linear
/// community scan in [`community_peers`](Self::community_peers) is fine.
#[derive(Debug, Default)]
pub struct EdgeRegistry {
    peers: HashMap<Mac, PeerInfo>,
}

impl EdgeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Look up a peer, verifying the community on hit.
    #[must_use]
    pub fn find(&self, community: &Community, mac: &Mac) -> Option<&PeerInfo> {
        self.peers.get(mac).filter(|p| p.community == *community)
    }

    /// Forwarding lookup: by MAC alone.
    #[must_use]
    pub fn find_mac(&self, mac: &Mac) -> Option<&PeerInfo> {
        self.peers.get(mac)
    }

    /// Create or refresh a registration. The stored community and socket are
    /// rewritten whenever either differs; `last_seen` is always refreshed.
    /// Returns `true` when a new record was created.
    pub fn upsert(
        &mut self,
        community: Community,
        mac: Mac,
        sock: SocketAddr,
        now: Instant,
    ) -> bool {
        match self.peers.get_mut(&mac) {
            None => {
                self.peers.insert(
                    mac,
                    PeerInfo {
                        community,
                        mac,
                        sock,
                        last_seen: now,
                    },
                );
                log::info!("[registry] created {} -> {}", mac, sock);
                true
            }
            Some(peer) => {
                if peer.community != community || peer.sock != sock {
                    peer.community = community;
                    peer.sock = sock;
                    log::info!("[registry] updated {} -> {}", mac, sock);
                } else {
                    log::debug!("[registry] unchanged {} -> {}", mac, sock);
                }
                peer.last_seen = now;
                false
            }
        }
    }

    /// Remove exactly the records with `now - last_seen > horizon`.
    /// Returns the purged MACs.
    pub fn purge(&mut self, now: Instant, horizon: Duration) -> Vec<Mac> {
        let expired: Vec<Mac> = self
            .peers
            .values()
            .filter(|p| now.saturating_duration_since(p.last_seen) > horizon)
            .map(|p| p.mac)
            .collect();
        for mac in &expired {
            if let Some(peer) = self.peers.remove(mac) {
                log::info!("[registry] purged {} [{}]", peer.mac, peer.sock);
            }
        }
        expired
    }

    /// All peers of one community, for broadcast fan-out. Iteration order is
    /// unspecified.
    pub fn community_peers<'a>(
        &'a self,
        community: &'a Community,
    ) -> impl Iterator<Item = &'a PeerInfo> {
        self.peers.values().filter(move |p| p.community == *community)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> Mac {
        Mac([0xaa, 0xbb, 0xcc, 0, 0, last])
    }

    fn community(name: &str) -> Community {
        Community::parse(name).expect("test community parses")
    }

    fn sock(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 10], port))
    }

    #[test]
    fn test_upsert_creates() {
        let mut reg = EdgeRegistry::new();
        let now = Instant::now();
        assert!(reg.upsert(community("net1"), mac(1), sock(40000), now));
        assert_eq!(reg.len(), 1);

        let peer = reg.find(&community("net1"), &mac(1)).expect("record exists");
        assert_eq!(peer.sock, sock(40000));
        assert_eq!(peer.last_seen, now);
    }

    #[test]
    fn test_find_verifies_community() {
        let mut reg = EdgeRegistry::new();
        reg.upsert(community("net1"), mac(1), sock(40000), Instant::now());

        assert!(reg.find(&community("net1"), &mac(1)).is_some());
        assert!(reg.find(&community("net2"), &mac(1)).is_none());
        assert!(reg.find_mac(&mac(1)).is_some());
    }

    #[test]
    fn test_upsert_roaming_edge_updates_socket() {
        let mut reg = EdgeRegistry::new();
        let t0 = Instant::now();
        reg.upsert(community("net1"), mac(1), sock(40000), t0);

        let t1 = t0 + Duration::from_secs(30);
        assert!(!reg.upsert(community("net1"), mac(1), sock(40001), t1));

        let peer = reg.find_mac(&mac(1)).expect("record exists");
        assert_eq!(peer.sock, sock(40001));
        assert_eq!(peer.last_seen, t1);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_upsert_new_community_wins() {
        let mut reg = EdgeRegistry::new();
        let now = Instant::now();
        reg.upsert(community("net1"), mac(1), sock(40000), now);
        reg.upsert(community("net2"), mac(1), sock(40000), now);

        assert!(reg.find(&community("net1"), &mac(1)).is_none());
        assert!(reg.find(&community("net2"), &mac(1)).is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_upsert_refreshes_last_seen_when_unchanged() {
        let mut reg = EdgeRegistry::new();
        let t0 = Instant::now();
        reg.upsert(community("net1"), mac(1), sock(40000), t0);

        let t1 = t0 + Duration::from_secs(60);
        reg.upsert(community("net1"), mac(1), sock(40000), t1);
        assert_eq!(reg.find_mac(&mac(1)).expect("record exists").last_seen, t1);
    }

    #[test]
    fn test_purge_removes_exactly_expired() {
        let mut reg = EdgeRegistry::new();
        let t0 = Instant::now();
        let horizon = Duration::from_secs(180);

        reg.upsert(community("net1"), mac(1), sock(40000), t0);
        reg.upsert(community("net1"), mac(2), sock(40001), t0 + Duration::from_secs(100));

        // mac(1) is 181s stale, mac(2) only 81s.
        let removed = reg.purge(t0 + Duration::from_secs(181), horizon);
        assert_eq!(removed, vec![mac(1)]);
        assert!(reg.find_mac(&mac(1)).is_none());
        assert!(reg.find_mac(&mac(2)).is_some());
    }

    #[test]
    fn test_purge_boundary_is_exclusive() {
        let mut reg = EdgeRegistry::new();
        let t0 = Instant::now();
        let horizon = Duration::from_secs(180);
        reg.upsert(community("net1"), mac(1), sock(40000), t0);

        // now - last_seen == horizon: not yet expired.
        assert!(reg.purge(t0 + horizon, horizon).is_empty());
        assert_eq!(reg.len(), 1);

        assert_eq!(reg.purge(t0 + horizon + Duration::from_millis(1), horizon).len(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_community_peers_filters() {
        let mut reg = EdgeRegistry::new();
        let now = Instant::now();
        reg.upsert(community("net1"), mac(1), sock(40000), now);
        reg.upsert(community("net1"), mac(2), sock(40001), now);
        reg.upsert(community("net2"), mac(3), sock(40002), now);

        let mut macs: Vec<Mac> = reg.community_peers(&community("net1")).map(|p| p.mac).collect();
        macs.sort_by_key(|m| m.octets());
        assert_eq!(macs, vec![mac(1), mac(2)]);
    }
}

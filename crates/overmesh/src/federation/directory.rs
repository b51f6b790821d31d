// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sibling-supernode directory with on-disk persistence.
//!
//! Two line-oriented ASCII files live in the state directory, named after the
//! federation port: `SN_SNM_<port>` (one sibling address per line) and
//! `SN_COMM_<port>` (one community name per line). Writes are whole-file
//! replacements performed inside datagram handling; a failed write is logged
//! and absorbed, the in-memory state stays authoritative.

use crate::config::{MAX_LOCAL_COMMUNITIES, MIN_SUPERNODES_PER_COMMUNITY};
use crate::federation::FederationError;
use crate::types::Community;
use crate::wire::federation::{CommunityRecord, SnmInfo};
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// A community this supernode hosts, with the sibling supernodes known to
/// host it too (used as backup list in REGISTER_SUPER_ACK).
#[derive(Debug, Clone)]
pub struct CommunityInfo {
    pub name: Community,
    pub supernodes: Vec<SocketAddr>,
}

/// A community learned during discovery but not adopted yet.
#[derive(Debug, Clone, Copy)]
pub struct PendingCommunity {
    pub name: Community,
    /// How many supernodes are known to host it, including the reporters.
    pub sn_num: u16,
}

/// Persistent sibling/community knowledge of one supernode.
#[derive(Debug)]
pub struct FederationDirectory {
    supernode_file: PathBuf,
    community_file: PathBuf,
    /// Known siblings, insertion-ordered (newest last).
    supernodes: Vec<SocketAddr>,
    /// Locally hosted communities.
    communities: Vec<CommunityInfo>,
    /// Communities under query during discovery (transient, never persisted).
    pending: Vec<PendingCommunity>,
}

impl FederationDirectory {
    /// Load persisted state and merge the command-line seeds into it.
    ///
    /// A missing supernode file yields the empty set; a missing community
    /// file is a startup error.
    pub fn load(
        state_dir: &Path,
        port: u16,
        seeds: &[SocketAddr],
    ) -> Result<Self, FederationError> {
        let supernode_file = state_dir.join(format!("SN_SNM_{}", port));
        let community_file = state_dir.join(format!("SN_COMM_{}", port));

        let supernodes = match fs::read_to_string(&supernode_file) {
            Ok(text) => parse_supernode_lines(&text, &supernode_file)?,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(FederationError::Io {
                    path: supernode_file,
                    source: err,
                })
            }
        };

        let communities = match fs::read_to_string(&community_file) {
            Ok(text) => parse_community_lines(&text, &community_file)?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FederationError::MissingCommunityFile(community_file))
            }
            Err(err) => {
                return Err(FederationError::Io {
                    path: community_file,
                    source: err,
                })
            }
        };

        let mut dir = Self {
            supernode_file,
            community_file,
            supernodes,
            communities,
            pending: Vec::new(),
        };

        let mut merged = false;
        for seed in seeds {
            merged |= dir.push_supernode(*seed);
        }
        if merged {
            dir.save_supernodes();
        }

        log::info!(
            "[fed] loaded {} supernodes, {} communities",
            dir.supernodes.len(),
            dir.communities.len()
        );
        Ok(dir)
    }

    // ===== Supernode set =====

    #[must_use]
    pub fn supernodes(&self) -> &[SocketAddr] {
        &self.supernodes
    }

    /// The `n` most recently learned siblings, newest first.
    pub fn newest_supernodes(&self, n: usize) -> impl Iterator<Item = &SocketAddr> {
        self.supernodes.iter().rev().take(n)
    }

    /// De-duplicated insert, persisted on change. Returns whether the
    /// address was new.
    pub fn add_supernode(&mut self, sock: SocketAddr) -> bool {
        let added = self.push_supernode(sock);
        if added {
            self.save_supernodes();
        }
        added
    }

    fn push_supernode(&mut self, sock: SocketAddr) -> bool {
        if self.supernodes.contains(&sock) {
            return false;
        }
        log::info!("[fed] learned supernode {}", sock);
        self.supernodes.push(sock);
        true
    }

    // ===== Local communities =====

    #[must_use]
    pub fn local_communities(&self) -> &[CommunityInfo] {
        &self.communities
    }

    #[must_use]
    pub fn community(&self, name: &Community) -> Option<&CommunityInfo> {
        self.communities.iter().find(|c| c.name == *name)
    }

    #[must_use]
    pub fn hosts(&self, name: &Community) -> bool {
        self.community(name).is_some()
    }

    /// Start hosting a community, persisted on change. Refused (with a log)
    /// once the local cap is reached. Returns whether the community was new.
    pub fn adopt_community(&mut self, name: Community) -> bool {
        let added = self.push_community(name);
        if added {
            self.save_communities();
        }
        added
    }

    fn push_community(&mut self, name: Community) -> bool {
        if self.hosts(&name) {
            return false;
        }
        if self.communities.len() >= MAX_LOCAL_COMMUNITIES {
            log::warn!("[fed] community cap reached, not adopting '{}'", name);
            return false;
        }
        log::info!("[fed] hosting community '{}'", name);
        self.communities.push(CommunityInfo {
            name,
            supernodes: Vec::new(),
        });
        true
    }

    /// Record that `sock` also hosts one of our communities. Returns whether
    /// the sibling was new for that community.
    pub fn register_host(&mut self, name: &Community, sock: SocketAddr) -> bool {
        match self.communities.iter_mut().find(|c| c.name == *name) {
            Some(info) if !info.supernodes.contains(&sock) => {
                log::debug!("[fed] {} also hosts '{}'", sock, name);
                info.supernodes.push(sock);
                true
            }
            _ => false,
        }
    }

    // ===== Discovery (transient) =====

    /// Record a community reported during discovery. `sn_num` is the
    /// reporter's view of how many supernodes host it; the larger count wins.
    pub fn note_pending(&mut self, name: Community, sn_num: u16) {
        if self.hosts(&name) {
            return;
        }
        match self.pending.iter_mut().find(|p| p.name == name) {
            Some(p) => p.sn_num = p.sn_num.max(sn_num),
            None => self.pending.push(PendingCommunity { name, sn_num }),
        }
    }

    /// Count one more advertising host for a pending community.
    pub fn bump_pending(&mut self, name: Community) {
        if self.hosts(&name) {
            return;
        }
        match self.pending.iter_mut().find(|p| p.name == name) {
            Some(p) => p.sn_num = p.sn_num.saturating_add(1),
            None => self.pending.push(PendingCommunity { name, sn_num: 1 }),
        }
    }

    #[must_use]
    pub fn pending(&self) -> &[PendingCommunity] {
        &self.pending
    }

    /// Fold pending discoveries into the persistent community set: a
    /// community is adopted only while the local cap leaves room and fewer
    /// supernodes than the redundancy floor already host it. Clears the
    /// pending set; persists when anything was adopted.
    pub fn absorb_pending(&mut self) -> bool {
        let pending = std::mem::take(&mut self.pending);
        let mut changed = false;
        for p in pending {
            if (p.sn_num as usize) < MIN_SUPERNODES_PER_COMMUNITY {
                changed |= self.push_community(p.name);
            }
        }
        if changed {
            self.save_communities();
        }
        changed
    }

    // ===== Message merges =====

    /// Merge an INFO response: learn new siblings, queue their communities
    /// for adoption. Returns how many siblings were new.
    pub fn merge_info(&mut self, info: &SnmInfo) -> usize {
        let mut added = 0;
        for sock in &info.supernodes {
            if self.push_supernode(*sock) {
                added += 1;
            }
        }
        if added > 0 {
            self.save_supernodes();
        }
        for record in &info.communities {
            self.note_pending(record.name, record.sn_num);
        }
        added
    }

    /// Merge an advertisement: learn the sender (by its federation socket),
    /// attach its edge-facing socket to the local communities it hosts, and
    /// (while discovering) count it against the pending ones. Returns whether
    /// our community knowledge changed, which is what triggers a reciprocal
    /// advertisement.
    pub fn merge_advertisement(
        &mut self,
        snm_sender: SocketAddr,
        edge_sock: SocketAddr,
        communities: &[Community],
        discovering: bool,
    ) -> bool {
        self.add_supernode(snm_sender);
        let mut changed = false;
        for name in communities {
            if self.hosts(name) {
                changed |= self.register_host(name, edge_sock);
            } else if discovering {
                self.bump_pending(*name);
                changed = true;
            }
        }
        changed
    }

    /// Build an INFO response: every known sibling, plus either all local
    /// communities or the named ones we host. `sn_num` counts this node too.
    #[must_use]
    pub fn info_for(&self, named: &[Community], all: bool) -> SnmInfo {
        let communities = self
            .communities
            .iter()
            .filter(|c| all || named.contains(&c.name))
            .map(|c| CommunityRecord {
                name: c.name,
                sn_num: (c.supernodes.len() as u16).saturating_add(1),
            })
            .collect();
        SnmInfo {
            supernodes: self.supernodes.clone(),
            communities,
        }
    }

    // ===== Persistence =====

    fn save_supernodes(&self) {
        let mut text = String::new();
        for sock in &self.supernodes {
            let _ = writeln!(text, "{}", sock);
        }
        if let Err(err) = fs::write(&self.supernode_file, text) {
            log::warn!(
                "[fed] failed to write {}: {}",
                self.supernode_file.display(),
                err
            );
        }
    }

    fn save_communities(&self) {
        let mut text = String::new();
        for info in &self.communities {
            let _ = writeln!(text, "{}", info.name);
        }
        if let Err(err) = fs::write(&self.community_file, text) {
            log::warn!(
                "[fed] failed to write {}: {}",
                self.community_file.display(),
                err
            );
        }
    }
}

fn parse_supernode_lines(
    text: &str,
    path: &Path,
) -> Result<Vec<SocketAddr>, FederationError> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let sock: SocketAddr = line.parse().map_err(|_| FederationError::BadLine {
            path: path.to_path_buf(),
            line: idx + 1,
        })?;
        if !out.contains(&sock) {
            out.push(sock);
        }
    }
    Ok(out)
}

fn parse_community_lines(
    text: &str,
    path: &Path,
) -> Result<Vec<CommunityInfo>, FederationError> {
    let mut out: Vec<CommunityInfo> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let name = Community::parse(line).ok_or(FederationError::BadLine {
            path: path.to_path_buf(),
            line: idx + 1,
        })?;
        if out.iter().any(|c| c.name == name) {
            continue;
        }
        if out.len() >= MAX_LOCAL_COMMUNITIES {
            log::warn!(
                "[fed] {} lists more than {} communities, ignoring the rest",
                path.display(),
                MAX_LOCAL_COMMUNITIES
            );
            break;
        }
        out.push(CommunityInfo {
            name,
            supernodes: Vec::new(),
        });
    }
    Ok(out)
}

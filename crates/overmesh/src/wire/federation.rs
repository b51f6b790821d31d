// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Federation protocol codec (supernode <-> supernode).
//!
//! Every federation datagram starts with a 6-byte header:
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     type      |     flags     |         sequence (hi)         |
//! +---------------+---------------+-------------------------------+
//! |         sequence (lo)         |  payload ...
//! +-------------------------------+------------------------------
//! ```
//!
//! Community names travel length-prefixed (u8 length + bytes, at most
//! [`COMMUNITY_SIZE`]); the fixed-width NUL padding is an edge-protocol
//! artifact and never crosses the federation wire.

use super::{decode_sock, encode_sock, Cursor, WireError, WireResult};
use crate::types::{Community, COMMUNITY_SIZE};
use std::net::SocketAddr;

/// Sender is a supernode. Always set on egress.
pub const FLAG_SUPERNODE: u8 = 0x01;
/// Request lists all communities.
pub const FLAG_ALL_COMMUNITIES: u8 = 0x02;
/// Request lists named communities.
pub const FLAG_NAMED_COMMUNITIES: u8 = 0x04;
/// Request (or acknowledge) an advertisement.
pub const FLAG_ADVERTISE: u8 = 0x08;
/// Sender is an edge, not a supernode.
pub const FLAG_FROM_EDGE: u8 = 0x10;

/// Federation message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnmKind {
    Request = 1,
    Response = 2,
    Advertise = 3,
}

impl SnmKind {
    #[must_use]
    pub fn from_u8(kind: u8) -> Option<Self> {
        match kind {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Advertise),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Common federation header: type, flags, per-sender sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnmHeader {
    pub kind: SnmKind,
    pub flags: u8,
    pub seq: u32,
}

impl SnmHeader {
    pub fn decode(cur: &mut Cursor<'_>) -> WireResult<Self> {
        let raw_kind = cur.read_u8()?;
        let flags = cur.read_u8()?;
        let seq = cur.read_u32_be()?;
        let kind = SnmKind::from_u8(raw_kind).ok_or(WireError::Malformed {
            reason: "unknown federation message type",
        })?;
        Ok(Self { kind, flags, seq })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.kind.as_u8());
        out.push(self.flags);
        out.extend_from_slice(&self.seq.to_be_bytes());
    }
}

fn encode_comm_name(out: &mut Vec<u8>, community: &Community) {
    let name = community.name_bytes();
    out.push(name.len() as u8);
    out.extend_from_slice(name);
}

fn decode_comm_name(cur: &mut Cursor<'_>) -> WireResult<Community> {
    let len = cur.read_u8()? as usize;
    if len == 0 || len > COMMUNITY_SIZE {
        return Err(WireError::Malformed {
            reason: "community name length out of range",
        });
    }
    let bytes = cur.read_bytes(len)?;
    let mut raw = [0u8; COMMUNITY_SIZE];
    raw[..len].copy_from_slice(bytes);
    Ok(Community::from_bytes(raw))
}

/// REQ payload: the communities being asked about (empty with
/// [`FLAG_ALL_COMMUNITIES`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmRequest {
    pub communities: Vec<Community>,
}

impl SnmRequest {
    pub fn decode(cur: &mut Cursor<'_>) -> WireResult<Self> {
        let count = cur.read_u16_be()? as usize;
        let mut communities = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            communities.push(decode_comm_name(cur)?);
        }
        Ok(Self { communities })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.communities.len() as u16).to_be_bytes());
        for community in &self.communities {
            encode_comm_name(out, community);
        }
    }
}

/// One community record in an INFO response: name plus how many supernodes
/// are known to host it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunityRecord {
    pub name: Community,
    pub sn_num: u16,
}

/// RSP/INFO payload: known supernodes and community records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmInfo {
    pub supernodes: Vec<SocketAddr>,
    pub communities: Vec<CommunityRecord>,
}

impl SnmInfo {
    pub fn decode(cur: &mut Cursor<'_>) -> WireResult<Self> {
        let sn_count = cur.read_u16_be()? as usize;
        let comm_count = cur.read_u16_be()? as usize;
        let mut supernodes = Vec::with_capacity(sn_count.min(64));
        for _ in 0..sn_count {
            supernodes.push(decode_sock(cur)?);
        }
        let mut communities = Vec::with_capacity(comm_count.min(64));
        for _ in 0..comm_count {
            let name = decode_comm_name(cur)?;
            let sn_num = cur.read_u16_be()?;
            communities.push(CommunityRecord { name, sn_num });
        }
        Ok(Self {
            supernodes,
            communities,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.supernodes.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.communities.len() as u16).to_be_bytes());
        for sock in &self.supernodes {
            encode_sock(out, sock);
        }
        for record in &self.communities {
            encode_comm_name(out, &record.name);
            out.extend_from_slice(&record.sn_num.to_be_bytes());
        }
    }
}

/// ADV payload: the advertising supernode's edge-facing socket and the
/// communities it hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmAdvertise {
    pub sock: SocketAddr,
    pub communities: Vec<Community>,
}

impl SnmAdvertise {
    pub fn decode(cur: &mut Cursor<'_>) -> WireResult<Self> {
        let sock = decode_sock(cur)?;
        let count = cur.read_u16_be()? as usize;
        let mut communities = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            communities.push(decode_comm_name(cur)?);
        }
        Ok(Self { sock, communities })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_sock(out, &self.sock);
        out.extend_from_slice(&(self.communities.len() as u16).to_be_bytes());
        for community in &self.communities {
            encode_comm_name(out, community);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community(name: &str) -> Community {
        Community::parse(name).expect("test community parses")
    }

    fn sock(s: &str) -> SocketAddr {
        s.parse().expect("test socket literal parses")
    }

    fn random_community() -> Community {
        let len = 1 + fastrand::usize(..COMMUNITY_SIZE);
        let mut raw = [0u8; COMMUNITY_SIZE];
        for b in raw.iter_mut().take(len) {
            *b = fastrand::u8(1..=255);
        }
        Community::from_bytes(raw)
    }

    #[test]
    fn test_header_layout() {
        let hdr = SnmHeader {
            kind: SnmKind::Request,
            flags: FLAG_SUPERNODE | FLAG_ALL_COMMUNITIES,
            seq: 0x0102_0304,
        };
        let mut out = Vec::new();
        hdr.encode(&mut out);
        assert_eq!(out, [0x01, 0x03, 0x01, 0x02, 0x03, 0x04]);

        let mut cur = Cursor::new(&out);
        assert_eq!(SnmHeader::decode(&mut cur).expect("decodes"), hdr);
    }

    #[test]
    fn test_header_rejects_unknown_type() {
        let buf = [0x07, 0x00, 0, 0, 0, 1];
        let mut cur = Cursor::new(&buf);
        assert!(matches!(
            SnmHeader::decode(&mut cur),
            Err(WireError::Malformed { .. })
        ));
    }

    #[test]
    fn test_request_roundtrip() {
        let req = SnmRequest {
            communities: vec![community("net1"), community("net2")],
        };
        let mut out = Vec::new();
        req.encode(&mut out);
        assert_eq!(&out[0..2], &2u16.to_be_bytes());
        assert_eq!(out[2], 4); // length prefix of "net1"

        let mut cur = Cursor::new(&out);
        assert_eq!(SnmRequest::decode(&mut cur).expect("decodes"), req);
    }

    #[test]
    fn test_empty_request() {
        let req = SnmRequest {
            communities: Vec::new(),
        };
        let mut out = Vec::new();
        req.encode(&mut out);
        assert_eq!(out.len(), 2);
        let mut cur = Cursor::new(&out);
        assert_eq!(SnmRequest::decode(&mut cur).expect("decodes"), req);
    }

    #[test]
    fn test_comm_name_rejects_oversize() {
        let mut out = vec![17u8];
        out.extend_from_slice(&[b'x'; 17]);
        let mut cur = Cursor::new(&out);
        assert!(matches!(
            decode_comm_name(&mut cur),
            Err(WireError::Malformed { .. })
        ));
    }

    #[test]
    fn test_info_roundtrip() {
        let info = SnmInfo {
            supernodes: vec![sock("198.51.100.1:7655"), sock("198.51.100.2:7655")],
            communities: vec![
                CommunityRecord {
                    name: community("net1"),
                    sn_num: 2,
                },
                CommunityRecord {
                    name: community("net2"),
                    sn_num: 0,
                },
            ],
        };
        let mut out = Vec::new();
        info.encode(&mut out);
        let mut cur = Cursor::new(&out);
        assert_eq!(SnmInfo::decode(&mut cur).expect("decodes"), info);
        assert!(cur.is_eof());
    }

    #[test]
    fn test_advertise_roundtrip() {
        let adv = SnmAdvertise {
            sock: sock("198.51.100.1:7654"),
            communities: vec![community("net1")],
        };
        let mut out = Vec::new();
        adv.encode(&mut out);
        let mut cur = Cursor::new(&out);
        assert_eq!(SnmAdvertise::decode(&mut cur).expect("decodes"), adv);
    }

    #[test]
    fn test_truncated_payloads_fail() {
        let info = SnmInfo {
            supernodes: vec![sock("198.51.100.1:7655")],
            communities: vec![CommunityRecord {
                name: community("net1"),
                sn_num: 1,
            }],
        };
        let mut out = Vec::new();
        info.encode(&mut out);
        for len in 0..out.len() {
            let mut cur = Cursor::new(&out[..len]);
            assert!(SnmInfo::decode(&mut cur).is_err());
        }
    }

    #[test]
    fn test_roundtrip_randomized() {
        for _ in 0..200 {
            let req = SnmRequest {
                communities: (0..fastrand::usize(..8)).map(|_| random_community()).collect(),
            };
            let mut out = Vec::new();
            req.encode(&mut out);
            let mut cur = Cursor::new(&out);
            assert_eq!(SnmRequest::decode(&mut cur).expect("decodes"), req);

            let adv = SnmAdvertise {
                sock: sock("203.0.113.9:7654"),
                communities: (0..fastrand::usize(..8)).map(|_| random_community()).collect(),
            };
            let mut out = Vec::new();
            adv.encode(&mut out);
            let mut cur = Cursor::new(&out);
            assert_eq!(SnmAdvertise::decode(&mut cur).expect("decodes"), adv);
        }
    }
}

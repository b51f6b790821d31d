// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Edge protocol codec (edge <-> supernode frames).
//!
//! Every edge-facing frame starts with the 20-byte common header:
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    version    |      TTL      |  packet code  |   flags (hi)  |
//! +---------------+---------------+---------------+---------------+
//! |   flags (lo)  |                                               |
//! +---------------+                                               |
//! |                  community (16 bytes, NUL padded)             |
//! |                                               +---------------+
//! |                                               |  payload ...
//! +-----------------------------------------------+---------------
//! ```
//!
//! The payload layout depends on the packet code. Flag bits other than the
//! ones named here are preserved verbatim when a frame is re-encoded.

use super::{decode_sock, encode_sock, Cursor, WireError, WireResult};
use crate::types::{Community, Mac, COMMUNITY_SIZE};

/// Wire protocol version carried in every common header.
pub const PROTOCOL_VERSION: u8 = 2;

/// The frame originated at (or was relayed through) a supernode.
pub const FLAG_FROM_SUPERNODE: u16 = 0x0020;
/// A socket record is inlined into the payload.
pub const FLAG_SOCKET: u16 = 0x0040;

/// Packet codes the supernode understands. Unknown codes are logged and
/// dropped by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCode {
    /// Edge-to-edge P2P introduction relayed by the supernode.
    Register = 1,
    /// Encapsulated Ethernet frame.
    Packet = 3,
    /// Reply to REGISTER; accepted but not acted on.
    RegisterAck = 4,
    /// Edge registering with this supernode.
    RegisterSuper = 5,
    /// Supernode's reply to REGISTER_SUPER.
    RegisterSuperAck = 7,
}

impl PacketCode {
    #[must_use]
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Register),
            3 => Some(Self::Packet),
            4 => Some(Self::RegisterAck),
            5 => Some(Self::RegisterSuper),
            7 => Some(Self::RegisterSuperAck),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Common fields present on every edge-facing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    pub ttl: u8,
    pub code: PacketCode,
    pub flags: u16,
    pub community: Community,
}

/// Byte offset of the TTL field, used to patch a frame forwarded unmodified.
pub const TTL_OFFSET: usize = 1;

impl CommonHeader {
    pub fn decode(cur: &mut Cursor<'_>) -> WireResult<Self> {
        let version = cur.read_u8()?;
        if version != PROTOCOL_VERSION {
            return Err(WireError::Malformed {
                reason: "unsupported protocol version",
            });
        }
        let ttl = cur.read_u8()?;
        let raw_code = cur.read_u8()?;
        let flags = cur.read_u16_be()?;
        let mut raw = [0u8; COMMUNITY_SIZE];
        raw.copy_from_slice(cur.read_bytes(COMMUNITY_SIZE)?);
        let community = Community::from_bytes(raw);
        let code = PacketCode::from_u8(raw_code).ok_or(WireError::Malformed {
            reason: "unknown packet code",
        })?;
        Ok(Self {
            ttl,
            code,
            flags,
            community,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(PROTOCOL_VERSION);
        out.push(self.ttl);
        out.push(self.code.as_u8());
        out.extend_from_slice(&self.flags.to_be_bytes());
        out.extend_from_slice(self.community.as_bytes());
    }
}

fn read_mac(cur: &mut Cursor<'_>) -> WireResult<Mac> {
    let mut raw = [0u8; 6];
    raw.copy_from_slice(cur.read_bytes(6)?);
    Ok(Mac(raw))
}

/// PACKET payload: source/destination MACs, optional inline socket, then the
/// opaque Ethernet frame (left in the datagram tail, not part of this struct).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketBody {
    pub src_mac: Mac,
    pub dst_mac: Mac,
    pub sock: Option<std::net::SocketAddr>,
}

impl PacketBody {
    /// Decode the fixed part of a PACKET payload. `flags` decides whether an
    /// inline socket record follows the MACs.
    pub fn decode(cur: &mut Cursor<'_>, flags: u16) -> WireResult<Self> {
        let src_mac = read_mac(cur)?;
        let dst_mac = read_mac(cur)?;
        let sock = if flags & FLAG_SOCKET != 0 {
            Some(decode_sock(cur)?)
        } else {
            None
        };
        Ok(Self {
            src_mac,
            dst_mac,
            sock,
        })
    }

    /// Encode the fixed part. The caller keeps `FLAG_SOCKET` in the header in
    /// sync with `sock`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.src_mac.octets());
        out.extend_from_slice(&self.dst_mac.octets());
        if let Some(sock) = &self.sock {
            encode_sock(out, sock);
        }
    }
}

/// REGISTER payload: cookie, MACs, optional inline socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterBody {
    pub cookie: u32,
    pub src_mac: Mac,
    pub dst_mac: Mac,
    pub sock: Option<std::net::SocketAddr>,
}

impl RegisterBody {
    pub fn decode(cur: &mut Cursor<'_>, flags: u16) -> WireResult<Self> {
        let cookie = cur.read_u32_be()?;
        let src_mac = read_mac(cur)?;
        let dst_mac = read_mac(cur)?;
        let sock = if flags & FLAG_SOCKET != 0 {
            Some(decode_sock(cur)?)
        } else {
            None
        };
        Ok(Self {
            cookie,
            src_mac,
            dst_mac,
            sock,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.cookie.to_be_bytes());
        out.extend_from_slice(&self.src_mac.octets());
        out.extend_from_slice(&self.dst_mac.octets());
        if let Some(sock) = &self.sock {
            encode_sock(out, sock);
        }
    }
}

/// Opaque authentication block carried by REGISTER_SUPER. Preserved
/// byte-for-byte, never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBlock {
    pub scheme: u16,
    pub token: Vec<u8>,
}

/// REGISTER_SUPER payload: cookie, edge MAC, optional auth block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSuperBody {
    pub cookie: u32,
    pub edge_mac: Mac,
    pub auth: Option<AuthBlock>,
}

impl RegisterSuperBody {
    pub fn decode(cur: &mut Cursor<'_>) -> WireResult<Self> {
        let cookie = cur.read_u32_be()?;
        let edge_mac = read_mac(cur)?;
        let auth = if cur.remaining() >= 4 {
            let scheme = cur.read_u16_be()?;
            let token_len = cur.read_u16_be()? as usize;
            let token = cur.read_bytes(token_len)?.to_vec();
            Some(AuthBlock { scheme, token })
        } else {
            None
        };
        Ok(Self {
            cookie,
            edge_mac,
            auth,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.cookie.to_be_bytes());
        out.extend_from_slice(&self.edge_mac.octets());
        if let Some(auth) = &self.auth {
            out.extend_from_slice(&auth.scheme.to_be_bytes());
            out.extend_from_slice(&(auth.token.len() as u16).to_be_bytes());
            out.extend_from_slice(&auth.token);
        }
    }
}

/// REGISTER_SUPER_ACK payload: echoed cookie and MAC, registration lifetime,
/// the edge's observed public socket and the backup supernode list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSuperAckBody {
    pub cookie: u32,
    pub edge_mac: Mac,
    pub lifetime: u16,
    pub sock: std::net::SocketAddr,
    pub backups: Vec<std::net::SocketAddr>,
}

impl RegisterSuperAckBody {
    pub fn decode(cur: &mut Cursor<'_>) -> WireResult<Self> {
        let cookie = cur.read_u32_be()?;
        let edge_mac = read_mac(cur)?;
        let lifetime = cur.read_u16_be()?;
        let sock = decode_sock(cur)?;
        let num_sn = cur.read_u8()? as usize;
        let mut backups = Vec::with_capacity(num_sn);
        for _ in 0..num_sn {
            backups.push(decode_sock(cur)?);
        }
        Ok(Self {
            cookie,
            edge_mac,
            lifetime,
            sock,
            backups,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.cookie.to_be_bytes());
        out.extend_from_slice(&self.edge_mac.octets());
        out.extend_from_slice(&self.lifetime.to_be_bytes());
        encode_sock(out, &self.sock);
        out.push(self.backups.len() as u8);
        for sock in &self.backups {
            encode_sock(out, sock);
        }
    }
}

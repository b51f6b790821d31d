// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supernode federation: sibling directory and the discovery state machine.
//!
//! Federation is a runtime feature: a supernode without a federation port
//! configured never instantiates any of this. When enabled, the node boots
//! into `Discovery` (unless it knows no siblings at all), queries the siblings
//! it was seeded with, folds what it learns into its persistent community set
//! after a short startup delay, advertises itself, and settles into `Ready`.
//! `Ready` is terminal.
//!
//! # State machine
//!
//! ```text
//!             siblings known               siblings unknown
//!                  |                              |
//!                  v                              v
//!             [Discovery] --(startup delay)--> [Ready]
//!                  |                              ^
//!                  +--- REQ rejected              |  REQ/ADV served
//!                  +--- RSP merged ---------------+
//! ```

pub mod directory;

pub use directory::{CommunityInfo, FederationDirectory, PendingCommunity};

use crate::config::DISCOVERY_STARTUP_DELAY;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Instant;

/// Errors raised by the federation subsystem.
#[derive(Debug)]
pub enum FederationError {
    /// A federation message arrived in a state that cannot handle it.
    NotReady { state: DiscoveryState },
    /// The community list file is required and was not found.
    MissingCommunityFile(PathBuf),
    /// A persistence file could not be read.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A persistence file contained an unparsable line.
    BadLine { path: PathBuf, line: usize },
}

impl fmt::Display for FederationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady { state } => {
                write!(f, "message not acceptable in state {:?}", state)
            }
            Self::MissingCommunityFile(path) => {
                write!(f, "required community file {} is missing", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            Self::BadLine { path, line } => {
                write!(f, "unparsable line {} in {}", line, path.display())
            }
        }
    }
}

impl std::error::Error for FederationError {}

/// Discovery progress. `Ready` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Discovery,
    Ready,
}

/// Federation runtime: the sibling directory plus the discovery state and the
/// egress sequence counter.
#[derive(Debug)]
pub struct Federation {
    pub directory: FederationDirectory,
    state: DiscoveryState,
    start_time: Instant,
    seq: u32,
}

impl Federation {
    /// A node that knows no siblings has nobody to discover from and is
    /// immediately ready to serve.
    #[must_use]
    pub fn new(directory: FederationDirectory, start_time: Instant) -> Self {
        let state = if directory.supernodes().is_empty() {
            DiscoveryState::Ready
        } else {
            DiscoveryState::Discovery
        };
        log::info!("[fed] starting in state {:?}", state);
        Self {
            directory,
            state,
            start_time,
            seq: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == DiscoveryState::Ready
    }

    /// Sequence number for the next egress message.
    pub fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    /// REQ is served only once discovery has completed.
    pub fn accept_request(&self) -> Result<(), FederationError> {
        if self.state == DiscoveryState::Ready {
            Ok(())
        } else {
            Err(FederationError::NotReady { state: self.state })
        }
    }

    /// RSP is only meaningful while still discovering.
    pub fn accept_response(&self) -> Result<(), FederationError> {
        if self.state == DiscoveryState::Discovery {
            Ok(())
        } else {
            Err(FederationError::NotReady { state: self.state })
        }
    }

    /// Whether the startup delay has elapsed and discovery should be folded
    /// into the persistent state.
    #[must_use]
    pub fn discovery_due(&self, now: Instant) -> bool {
        self.state == DiscoveryState::Discovery
            && now.saturating_duration_since(self.start_time) >= DISCOVERY_STARTUP_DELAY
    }

    /// Enter `Ready`. The caller folds pending discoveries in (and
    /// advertises) first; there is no way back out of `Ready`.
    pub fn complete_discovery(&mut self) {
        self.state = DiscoveryState::Ready;
        log::info!(
            "[fed] discovery complete, hosting {} communities",
            self.directory.local_communities().len()
        );
    }
}

/// Loopback suppression: a REQ/ADV target that is this supernode itself.
/// Both 127.0.0.0/8 and the explicit local address count, on the configured
/// federation port.
#[must_use]
pub fn is_self_addr(target: &SocketAddr, local_ip: Option<IpAddr>, local_port: u16) -> bool {
    target.port() == local_port
        && (target.ip().is_loopback() || Some(target.ip()) == local_ip)
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide protocol counters and the management snapshot.
//!
//! Counters are monotonic and reset only on restart. The management port
//! exposes them as a fixed 10-line plaintext reply (one separator line plus
//! nine stats); interoperating tooling parses that shape, so it must not
//! drift.

use std::fmt::Write as _;
use std::time::Instant;

/// Protocol counters of one supernode process.
#[derive(Debug, Clone)]
pub struct SnStats {
    /// Errors encountered (codec failures, failed sends).
    pub errors: u64,
    /// REGISTER_SUPER requests received.
    pub reg_super: u64,
    /// REGISTER_SUPER requests declined.
    pub reg_super_nak: u64,
    /// Frames forwarded to a single edge.
    pub fwd: u64,
    /// Frames broadcast to a community.
    pub broadcast: u64,
    /// When the last frame was forwarded.
    pub last_fwd: Instant,
    /// When the last REGISTER_SUPER arrived.
    pub last_reg_super: Instant,
    /// Process start, for uptime.
    pub start_time: Instant,
}

impl SnStats {
    /// Fresh counters; the "last" timestamps start at process start.
    #[must_use]
    pub fn new(start_time: Instant) -> Self {
        Self {
            errors: 0,
            reg_super: 0,
            reg_super_nak: 0,
            fwd: 0,
            broadcast: 0,
            last_fwd: start_time,
            last_reg_super: start_time,
            start_time,
        }
    }

    /// Render the management reply: separator plus nine stat lines, each
    /// `\n`-terminated.
    #[must_use]
    pub fn management_snapshot(&self, edges: usize, now: Instant) -> String {
        let uptime = now.saturating_duration_since(self.start_time).as_secs();
        let last_fwd = now.saturating_duration_since(self.last_fwd).as_secs();
        let last_reg = now.saturating_duration_since(self.last_reg_super).as_secs();

        let mut out = String::with_capacity(256);
        out.push_str("----------------\n");
        let _ = writeln!(out, "uptime    {}", uptime);
        let _ = writeln!(out, "edges     {}", edges);
        let _ = writeln!(out, "errors    {}", self.errors);
        let _ = writeln!(out, "reg_sup   {}", self.reg_super);
        let _ = writeln!(out, "reg_nak   {}", self.reg_super_nak);
        let _ = writeln!(out, "fwd       {}", self.fwd);
        let _ = writeln!(out, "broadcast {}", self.broadcast);
        let _ = writeln!(out, "last fwd  {} sec ago", last_fwd);
        let _ = writeln!(out, "last reg  {} sec ago", last_reg);
        out
    }
}

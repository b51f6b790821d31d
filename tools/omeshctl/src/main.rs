// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::net::UdpSocket;
use std::time::Duration;

/// One snapshot is a separator line plus nine stat lines.
const SNAPSHOT_LINES: usize = 10;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let addr = if args.len() > 1 {
        &args[1]
    } else {
        "127.0.0.1:5645"
    };

    println!("omeshctl: Overmesh Supernode Stats Viewer");
    println!("Querying management port at {}...", addr);
    println!();

    let sock = match UdpSocket::bind("127.0.0.1:0") {
        Ok(sock) => sock,
        Err(e) => {
            eprintln!("[FAIL] Could not bind a local socket: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = sock.set_read_timeout(Some(Duration::from_secs(2))) {
        eprintln!("[FAIL] Could not set socket timeout: {}", e);
        std::process::exit(1);
    }

    // Any datagram triggers a full snapshot reply.
    if let Err(e) = sock.send_to(b"\n", addr) {
        eprintln!("[FAIL] Could not reach {}: {}", addr, e);
        std::process::exit(1);
    }

    let mut buf = [0u8; 2048];
    match sock.recv_from(&mut buf) {
        Ok((len, _)) => {
            let text = String::from_utf8_lossy(&buf[..len]);
            if !is_complete_snapshot(&text) {
                eprintln!("[WARN] Unexpected snapshot shape, printing as-is");
            }
            print!("{}", render(&text));
        }
        Err(e) => {
            eprintln!("[FAIL] No reply from {}: {}", addr, e);
            eprintln!();
            eprintln!("Make sure a supernode is running on this host.");
            eprintln!("Default management port: 5645 (loopback only)");
            std::process::exit(1);
        }
    }
}

/// Separator first, then nine label/value lines.
fn is_complete_snapshot(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().collect();
    lines.len() == SNAPSHOT_LINES
        && lines[0].chars().all(|c| c == '-')
        && lines[1..].iter().all(|l| parse_stat_line(l).is_some())
}

/// Split a `label   value` stat line. Labels may contain one space
/// ("last fwd"), values start at the first digit.
fn parse_stat_line(line: &str) -> Option<(&str, &str)> {
    let digit = line.find(|c: char| c.is_ascii_digit())?;
    let label = line[..digit].trim();
    if label.is_empty() {
        return None;
    }
    Some((label, line[digit..].trim()))
}

/// Re-align the snapshot for display.
fn render(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        match parse_stat_line(line) {
            Some((label, value)) => out.push_str(&format!("{:12} = {}\n", label, value)),
            None => out.push_str(&format!("{}\n", line)),
        }
    }
    out
}

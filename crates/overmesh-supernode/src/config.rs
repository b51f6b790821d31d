// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supernode configuration.

use overmesh::config::{EDGE_PORT_DEFAULT, MGMT_PORT, PURGE_HORIZON, REGISTRATION_LIFETIME_SECS};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supernode configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupernodeConfig {
    /// Address to bind the edge and federation sockets to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// UDP port edges register and exchange traffic on (default: 7654)
    #[serde(default = "default_edge_port")]
    pub edge_port: u16,

    /// Management port, bound to loopback only (default: 5645)
    #[serde(default = "default_mgmt_port")]
    pub mgmt_port: u16,

    /// Federation (supernode-to-supernode) port. Federation is disabled when
    /// unset.
    #[serde(default)]
    pub federation_port: Option<u16>,

    /// Seed sibling supernodes, merged into the persisted supernode set.
    #[serde(default)]
    pub seeds: Vec<SocketAddr>,

    /// Directory holding the federation persistence files.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Inactivity interval after which an edge registration is swept, in
    /// seconds. Must not fall below the registration lifetime edges are told.
    #[serde(default = "default_purge_horizon")]
    pub purge_horizon_secs: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_edge_port() -> u16 {
    EDGE_PORT_DEFAULT
}

fn default_mgmt_port() -> u16 {
    MGMT_PORT
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_purge_horizon() -> u64 {
    PURGE_HORIZON.as_secs()
}

impl Default for SupernodeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            edge_port: default_edge_port(),
            mgmt_port: default_mgmt_port(),
            federation_port: None,
            seeds: Vec::new(),
            state_dir: default_state_dir(),
            purge_horizon_secs: default_purge_horizon(),
        }
    }
}

impl SupernodeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    #[must_use]
    pub fn purge_horizon(&self) -> Duration {
        Duration::from_secs(self.purge_horizon_secs)
    }

    #[must_use]
    pub fn federation_enabled(&self) -> bool {
        self.federation_port.is_some()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mgmt_port != 0 && self.mgmt_port == self.edge_port {
            return Err(ConfigError::InvalidValue(
                "management and edge port collide".into(),
            ));
        }
        if let Some(port) = self.federation_port {
            if port != 0 && port == self.edge_port {
                return Err(ConfigError::InvalidValue(
                    "federation and edge port collide".into(),
                ));
            }
        }
        if !self.seeds.is_empty() && self.federation_port.is_none() {
            return Err(ConfigError::InvalidValue(
                "seed supernodes require a federation port".into(),
            ));
        }
        if self.purge_horizon_secs < u64::from(REGISTRATION_LIFETIME_SECS) {
            return Err(ConfigError::InvalidValue(
                "purge horizon below the advertised registration lifetime".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupernodeConfig::default();
        assert_eq!(config.edge_port, 7654);
        assert_eq!(config.mgmt_port, 5645);
        assert!(!config.federation_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = SupernodeConfig {
            federation_port: Some(7655),
            seeds: vec!["198.51.100.1:7655".parse().expect("literal parses")],
            ..Default::default()
        };
        let json = serde_json::to_string(&config).expect("serializes");
        let parsed: SupernodeConfig = serde_json::from_str(&json).expect("parses");
        assert_eq!(parsed.federation_port, Some(7655));
        assert_eq!(parsed.seeds, config.seeds);
    }

    #[test]
    fn test_validation_seeds_without_federation() {
        let config = SupernodeConfig {
            seeds: vec!["198.51.100.1:7655".parse().expect("literal parses")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_port_collision() {
        let config = SupernodeConfig {
            federation_port: Some(7654),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_short_purge_horizon() {
        let config = SupernodeConfig {
            purge_horizon_secs: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_purge_horizon_conversion() {
        let config = SupernodeConfig {
            purge_horizon_secs: 240,
            ..Default::default()
        };
        assert_eq!(config.purge_horizon(), Duration::from_secs(240));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("supernode.json");
        let config = SupernodeConfig {
            edge_port: 17654,
            ..Default::default()
        };
        config.to_file(&path).expect("writes");
        let loaded = SupernodeConfig::from_file(&path).expect("loads");
        assert_eq!(loaded.edge_port, 17654);
    }
}

//! Node configuration.

use std::net::SocketAddr;
use std::time::Duration;

use quarry_consensus::RetryPolicy;

use crate::error::{Error, Result};

/// Queue capacities for the peer roster actor.
#[derive(Debug, Clone)]
pub struct RosterConfig {
    pub send_capacity: usize,
    pub add_capacity: usize,
    pub remove_capacity: usize,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            send_capacity: 30,
            add_capacity: 10,
            remove_capacity: 5,
        }
    }
}

/// Configuration for a logic node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Directory server RPC address
    pub server_addr: String,

    /// UDP listen address for peer traffic
    pub listen_addr: SocketAddr,

    /// Address announced to peers, if different from the bound one
    pub advertise_addr: Option<String>,

    /// Run as the prey node
    pub prey: bool,

    /// Quorum timing and retry ceiling
    pub quorum: RetryPolicy,

    /// Roster queue capacities
    pub roster: RosterConfig,

    /// Delay between re-registration attempts
    pub reregister_delay: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8081".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertise_addr: None,
            prey: false,
            quorum: RetryPolicy::default(),
            roster: RosterConfig::default(),
            reregister_delay: Duration::from_secs(1),
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let server_addr = std::env::var("QUARRY_SERVER_ADDR").unwrap_or(defaults.server_addr);

        let listen_addr = match std::env::var("QUARRY_LISTEN_ADDR") {
            Ok(s) => s
                .parse()
                .map_err(|e| Error::Config(format!("QUARRY_LISTEN_ADDR={s}: {e}")))?,
            Err(_) => defaults.listen_addr,
        };

        let advertise_addr = std::env::var("QUARRY_ADVERTISE_ADDR")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let prey = std::env::var("QUARRY_PREY")
            .map(|s| matches!(s.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            server_addr,
            listen_addr,
            advertise_addr,
            prey,
            ..defaults
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.server_addr, "127.0.0.1:8081");
        assert!(!config.prey);
        assert_eq!(config.quorum.max_rejections, 3);
        assert_eq!(config.roster.send_capacity, 30);
        assert_eq!(config.roster.add_capacity, 10);
        assert_eq!(config.roster.remove_capacity, 5);
    }
}

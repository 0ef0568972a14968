/// Configuration module for network and node parameters
///
/// This module provides a centralized configuration system that supports:
/// - Hardcoded defaults (the constants in the crate root)
/// - Environment variable overrides
///
/// Configuration priority (highest to lowest):
/// 1. Environment variables
/// 2. Hardcoded defaults
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Global configuration instance
static CONFIG: OnceLock<CoinConfig> = OnceLock::new();

/// Complete node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoinConfig {
    /// Network configuration (consensus rules)
    pub network: NetworkConfig,

    /// Node-specific settings
    pub node: NodeConfig,
}

/// Network consensus parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Base proof-of-work difficulty in leading zero hex digits
    pub base_difficulty: u32,

    /// Number of trailing blocks measured by the difficulty retarget
    pub retarget_window: usize,

    /// Ideal wall-clock duration of one retarget window in seconds
    pub target_window_secs: i64,

    /// Block reward minted by the coinbase transaction
    pub coinbase_reward: u64,
}

/// Node operation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Port to listen on
    pub port: u16,

    /// Chain snapshot file path
    pub chain_file: String,

    /// Initial peer addresses (comma-separated in the environment)
    pub initial_peers: Vec<String>,

    /// Maximum number of peer connections
    pub max_peers: usize,

    /// Seconds between periodic sync rounds
    pub sync_interval_secs: u64,

    /// Per-peer read timeout in seconds
    pub read_timeout_secs: u64,

    /// Chain snapshot save interval in seconds
    pub save_interval_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_difficulty: crate::BASE_DIFFICULTY,
            retarget_window: crate::RETARGET_WINDOW,
            target_window_secs: crate::TARGET_WINDOW_SECS,
            coinbase_reward: crate::COINBASE_REWARD,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            chain_file: "./chain.cbor".to_string(),
            initial_peers: vec![],
            max_peers: crate::MAX_PEERS,
            sync_interval_secs: crate::SYNC_INTERVAL_SECS,
            read_timeout_secs: crate::READ_TIMEOUT_SECS,
            save_interval_secs: 15,
        }
    }
}

impl Default for CoinConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            node: NodeConfig::default(),
        }
    }
}

impl CoinConfig {
    /// Load configuration with environment variables taking priority
    /// over the hardcoded defaults.
    pub fn load() -> Self {
        CoinConfig {
            network: NetworkConfig::from_env(),
            node: NodeConfig::from_env(),
        }
    }

    /// Get or initialize the global configuration
    pub fn global() -> &'static CoinConfig {
        CONFIG.get_or_init(CoinConfig::load)
    }
}

impl NetworkConfig {
    fn from_env() -> Self {
        Self {
            base_difficulty: parse_env("BASE_DIFFICULTY").unwrap_or(crate::BASE_DIFFICULTY),
            retarget_window: parse_env("RETARGET_WINDOW").unwrap_or(crate::RETARGET_WINDOW),
            target_window_secs: parse_env("TARGET_WINDOW_SECS").unwrap_or(crate::TARGET_WINDOW_SECS),
            coinbase_reward: parse_env("COINBASE_REWARD").unwrap_or(crate::COINBASE_REWARD),
        }
    }
}

impl NodeConfig {
    fn from_env() -> Self {
        let initial_peers_str = env_var("INITIAL_PEERS").unwrap_or_default();
        let initial_peers = if initial_peers_str.is_empty() {
            vec![]
        } else {
            initial_peers_str
                .split(',')
                .map(|s| s.trim().to_string())
                .collect()
        };

        Self {
            port: parse_env("NODE_PORT").unwrap_or(9000),
            chain_file: env_var("CHAIN_FILE").unwrap_or_else(|| "./chain.cbor".to_string()),
            initial_peers,
            max_peers: parse_env("MAX_PEERS").unwrap_or(crate::MAX_PEERS),
            sync_interval_secs: parse_env("SYNC_INTERVAL").unwrap_or(crate::SYNC_INTERVAL_SECS),
            read_timeout_secs: parse_env("READ_TIMEOUT").unwrap_or(crate::READ_TIMEOUT_SECS),
            save_interval_secs: parse_env("CHAIN_SAVE_INTERVAL").unwrap_or(15),
        }
    }
}

/// Helper function to get environment variable
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Helper function to parse environment variable
fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key)?.parse().ok()
}

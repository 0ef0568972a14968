//! # CoinLib - Peer-to-Peer Cryptocurrency Core
//!
//! Core library for a small UTXO-based cryptocurrency node: blocks and
//! proof-of-work, ECDSA-signed transactions, the chain engine with fork
//! handling, and the wire protocol spoken between nodes.
//!
//! The node binary in this workspace drives these pieces; wallets and
//! external stores plug in through the hooks in [`crypto`] and
//! [`storage`].

// =============================================================================
// NETWORK PARAMETERS - Default Values
// =============================================================================
// These constants define the default network parameters. They are used
// by the config module when no environment override is provided.
// =============================================================================

/// Base proof-of-work difficulty: required leading zero hex digits
/// **Default value** used when no override is provided
pub const BASE_DIFFICULTY: u32 = 5;

/// Number of trailing blocks measured by the difficulty retarget
/// **Default value** used when no override is provided
pub const RETARGET_WINDOW: usize = 20;

/// Ideal wall-clock duration of one retarget window in seconds
/// **Default value** used when no override is provided
pub const TARGET_WINDOW_SECS: i64 = 1200;

/// Block reward minted by the coinbase transaction
/// **Default value** used when no override is provided
pub const COINBASE_REWARD: u64 = 1;

/// Maximum number of peer connections
/// **Default value** used when no override is provided
pub const MAX_PEERS: usize = 5;

/// Seconds between periodic chain/peer sync rounds
/// **Default value** used when no override is provided
pub const SYNC_INTERVAL_SECS: u64 = 600;

/// Per-peer read timeout bounding stuck connections, in seconds
/// **Default value** used when no override is provided
pub const READ_TIMEOUT_SECS: u64 = 60;

pub mod config;
pub mod crypto;
pub mod error;
pub mod network;
pub mod sha256;
pub mod storage;
pub mod util;

#[path = "../types/mod.rs"]
pub mod types;

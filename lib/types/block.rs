use serde::{Deserialize, Serialize};
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::sha256::double_sha256_hex;
use crate::types::Transaction;
use crate::util::{merkle_root, Saveable};

/// Previous-hash marker carried only by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    pub timestamp: i64,
    pub nonce: u64,
    pub difficulty: u32,
    pub merkle_root: String,
}

// Header fields feeding the block identity hash, declared in the
// sorted key order the canonical form depends on.
#[derive(Serialize)]
struct HeaderDigest<'a> {
    difficulty: u32,
    index: u64,
    merkle_root: &'a str,
    nonce: u64,
    previous_hash: &'a str,
    timestamp: i64,
}

impl Block {
    /// Build a block over the given transactions, committing to them
    /// through the Merkle root.
    pub fn new(
        index: u64,
        previous_hash: impl Into<String>,
        transactions: Vec<Transaction>,
        timestamp: i64,
        nonce: u64,
        difficulty: u32,
    ) -> Self {
        let merkle_root = merkle_root(&transactions);
        Block {
            index,
            previous_hash: previous_hash.into(),
            transactions,
            timestamp,
            nonce,
            difficulty,
            merkle_root,
        }
    }

    /// Block identity: hex of SHA-256 applied twice to the canonical
    /// header serialization.
    pub fn hash(&self) -> String {
        let digest = HeaderDigest {
            difficulty: self.difficulty,
            index: self.index,
            merkle_root: &self.merkle_root,
            nonce: self.nonce,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp,
        };
        let serialized =
            serde_json::to_string(&digest).expect("BUG: digest serialization is infallible");
        double_sha256_hex(serialized.as_bytes())
    }

    /// True when `hash` carries at least `difficulty` leading zero hex
    /// digits.
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let prefix = difficulty as usize;
        hash.len() >= prefix && hash.as_bytes()[..prefix].iter().all(|&b| b == b'0')
    }

    /// Proof-of-work loop: bump the nonce until the block hash meets
    /// the block's own difficulty.
    ///
    /// The preemption flag is polled between hash attempts; once it
    /// flips the candidate is abandoned and `None` comes back.
    pub fn prove(mut self, preempt: &AtomicBool) -> Option<Block> {
        loop {
            if preempt.load(Ordering::Relaxed) {
                return None;
            }
            self.nonce += 1;
            if Block::meets_difficulty(&self.hash(), self.difficulty) {
                return Some(self);
            }
        }
    }
}

impl Saveable for Block {
    fn load<I: Read>(reader: I) -> IoResult<Self> {
        ciborium::de::from_reader(reader)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to deserialize Block"))
    }

    fn save<O: Write>(&self, writer: O) -> IoResult<()> {
        ciborium::ser::into_writer(self, writer)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to serialize Block"))
    }
}

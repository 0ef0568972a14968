//! Storage adapters behind the chain engine.
//!
//! The engine only talks to these traits, so an external key-value
//! cache can hold the UTXO set and an external document store can
//! archive blocks and transactions without any change to validation.
//! The in-memory implementations are the defaults a node runs with.

use std::collections::HashMap;

use crate::error::Result;
use crate::types::{Block, Output, Transaction};

/// Cache key of an unspent output, `"{txid}:{vout}"`.
pub fn utxo_key(txid: &str, vout: u32) -> String {
    format!("{txid}:{vout}")
}

/// Split a cache key back into its transaction id and output index.
pub fn split_utxo_key(key: &str) -> Option<(&str, u32)> {
    let (txid, vout) = key.rsplit_once(':')?;
    Some((txid, vout.parse().ok()?))
}

/// Key-value view of the UTXO set.
pub trait UtxoStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Output>;
    fn set(&mut self, key: String, output: Output);
    fn delete(&mut self, key: &str) -> bool;
    fn scan(&self) -> Box<dyn Iterator<Item = (String, Output)> + '_>;
    fn clear(&mut self);

    fn len(&self) -> usize {
        self.scan().count()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct MemoryUtxoStore {
    entries: HashMap<String, Output>,
}

impl MemoryUtxoStore {
    pub fn new() -> Self {
        MemoryUtxoStore::default()
    }
}

impl UtxoStore for MemoryUtxoStore {
    fn get(&self, key: &str) -> Option<Output> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: String, output: Output) {
        self.entries.insert(key, output);
    }

    fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn scan(&self) -> Box<dyn Iterator<Item = (String, Output)> + '_> {
        Box::new(
            self.entries
                .iter()
                .map(|(key, output)| (key.clone(), output.clone())),
        )
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Archival store for accepted blocks and seen transactions. The chain
/// engine calls it opportunistically; a failing store is logged and
/// never fatal.
pub trait ChainStore: Send + Sync {
    fn store_block(&mut self, block: &Block) -> Result<()>;
    fn load_chain(&self) -> Result<Vec<Block>>;
    fn store_transaction(&mut self, transaction: &Transaction) -> Result<()>;
    fn load_transactions(&self) -> Result<Vec<Transaction>>;
}

#[derive(Default)]
pub struct MemoryChainStore {
    blocks: Vec<Block>,
    transactions: Vec<Transaction>,
}

impl MemoryChainStore {
    pub fn new() -> Self {
        MemoryChainStore::default()
    }
}

impl ChainStore for MemoryChainStore {
    fn store_block(&mut self, block: &Block) -> Result<()> {
        self.blocks.push(block.clone());
        Ok(())
    }

    fn load_chain(&self) -> Result<Vec<Block>> {
        Ok(self.blocks.clone())
    }

    fn store_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.transactions.push(transaction.clone());
        Ok(())
    }

    fn load_transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.transactions.clone())
    }
}

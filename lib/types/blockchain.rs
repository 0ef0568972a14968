use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::config::CoinConfig;
use crate::crypto::{PrivateKey, PublicKey};
use crate::error::{CoinError, Result};
use crate::storage::{split_utxo_key, utxo_key, ChainStore, MemoryUtxoStore, UtxoStore};
use crate::types::{Block, Input, Output, Transaction, GENESIS_PREVIOUS_HASH};
use crate::util::{merkle_root, Saveable};

/// One entry of the chain fingerprint exchanged during consensus
/// negotiation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChainHash {
    pub index: u64,
    pub hash: String,
}

/// Fingerprint plus cumulative work, the fork-resolution payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConsensusData {
    pub chain_hashes: Vec<ChainHash>,
    pub cum_diff: u128,
}

/// The chain engine: accepted blocks, the UTXO set, the mempool and
/// the miner preemption flag.
///
/// All mutation funnels through a handful of operations so that a
/// wrapping lock turns each of them into one critical section:
/// accepting a block validates, appends, rewrites the UTXO set and
/// prunes the mempool before anyone else gets a look.
pub struct Blockchain {
    chain: Vec<Block>,
    mempool: Vec<Transaction>,
    utxos: Box<dyn UtxoStore>,
    archive: Option<Box<dyn ChainStore>>,
    base_difficulty: u32,
    preempt: Arc<AtomicBool>,
}

impl Blockchain {
    pub fn new() -> Self {
        Blockchain::with_base_difficulty(CoinConfig::global().network.base_difficulty)
    }

    pub fn with_base_difficulty(base_difficulty: u32) -> Self {
        Blockchain {
            chain: vec![],
            mempool: vec![],
            utxos: Box::new(MemoryUtxoStore::new()),
            archive: None,
            base_difficulty,
            preempt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Rebuild a chain from stored blocks, replaying the UTXO set.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let mut blockchain = Blockchain::new();
        blockchain.chain = blocks;
        blockchain.rebuild_utxos();
        blockchain
    }

    /// Swap in a different UTXO backend and replay the chain into it.
    pub fn set_utxo_store(&mut self, utxos: Box<dyn UtxoStore>) {
        self.utxos = utxos;
        self.rebuild_utxos();
    }

    /// Attach an archival store; accepted blocks and transactions are
    /// mirrored into it best-effort.
    pub fn set_archive(&mut self, archive: Box<dyn ChainStore>) {
        self.archive = Some(archive);
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.chain.iter()
    }

    // block height
    pub fn block_height(&self) -> u64 {
        self.chain.len() as u64
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    pub fn mempool(&self) -> &[Transaction] {
        &self.mempool
    }

    pub fn utxos(&self) -> &dyn UtxoStore {
        self.utxos.as_ref()
    }

    /// Shared flag the mining loop polls between hash attempts.
    /// Accepting an external block flips it.
    pub fn preempt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.preempt)
    }

    /// Mine the height-0 block: no transactions, previous hash "0",
    /// proven at the given difficulty. Fails on a non-empty chain.
    pub fn create_genesis(&mut self, difficulty: u32) -> Result<()> {
        if !self.chain.is_empty() {
            return Err(CoinError::invalid_block(
                "genesis over a non-empty chain",
            ));
        }
        let genesis = Block::new(
            0,
            GENESIS_PREVIOUS_HASH,
            vec![],
            Utc::now().timestamp(),
            0,
            difficulty,
        );
        let proven = genesis
            .prove(&AtomicBool::new(false))
            .expect("BUG: an unpreempted proof always completes");
        self.apply_block(proven);
        Ok(())
    }

    /// Validate an externally produced block and append it on success.
    ///
    /// Rules run in order and the first failure rejects: previous-hash
    /// linkage, proof-of-work, distinct-block guard, timestamp, Merkle
    /// root, then joint transaction validation. Acceptance preempts
    /// any in-flight mining attempt.
    pub fn receive_block(&mut self, block: Block) -> Result<()> {
        let hash = block.hash();
        let tip_hash = self.chain.last().map(|tip| tip.hash());

        if let Some(tip_hash) = &tip_hash {
            if block.previous_hash != *tip_hash {
                return Err(CoinError::invalid_block(
                    "previous hash does not match the tip",
                ));
            }
        }
        if !Block::meets_difficulty(&hash, block.difficulty) {
            return Err(CoinError::invalid_block(
                "hash does not meet the block's difficulty",
            ));
        }
        if tip_hash.as_deref() == Some(hash.as_str()) {
            return Err(CoinError::invalid_block("block is already the tip"));
        }
        // Present-instant and future stamps are rejected. Comparing at
        // millisecond resolution keeps a block stamped this second
        // acceptable once any time has actually passed.
        if block.timestamp.saturating_mul(1000) >= Utc::now().timestamp_millis() {
            return Err(CoinError::invalid_block("timestamp is in the future"));
        }
        if merkle_root(&block.transactions) != block.merkle_root {
            return Err(CoinError::InvalidMerkleRoot);
        }
        self.validate_block_transactions(&block)?;

        self.apply_block(block);
        self.preempt.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stand-alone validation against the current UTXO set; accepted
    /// transactions wait in the mempool.
    pub fn receive_transaction(&mut self, transaction: Transaction) -> Result<()> {
        if transaction.is_coinbase() {
            return Err(CoinError::invalid_transaction(
                "coinbase transactions are minted by mining, not relayed",
            ));
        }
        let txid = transaction.txid();
        if self.mempool.iter().any(|pending| pending.txid() == txid) {
            return Err(CoinError::invalid_transaction(
                "transaction is already pending",
            ));
        }
        // Outputs claimed by pending transactions stay reserved so the
        // whole mempool remains spendable inside one block.
        let mut used: HashSet<(String, u32)> = self
            .mempool
            .iter()
            .flat_map(|pending| pending.inputs.iter())
            .map(|input| (input.prev_txid.clone(), input.vout))
            .collect();
        self.validate_transaction(&transaction, &mut used)?;

        if let Some(archive) = self.archive.as_mut() {
            if let Err(e) = archive.store_transaction(&transaction) {
                warn!("failed to archive transaction {txid}: {e}");
            }
        }
        self.mempool.push(transaction);
        Ok(())
    }

    // Joint validation: every transaction of a block against the
    // current UTXO set, with one shared used-set so two transactions
    // cannot consume the same output.
    fn validate_block_transactions(&self, block: &Block) -> Result<()> {
        let mut used: HashSet<(String, u32)> = HashSet::new();
        for transaction in &block.transactions {
            self.validate_transaction(transaction, &mut used)?;
        }
        Ok(())
    }

    fn validate_transaction(
        &self,
        transaction: &Transaction,
        used: &mut HashSet<(String, u32)>,
    ) -> Result<()> {
        // A coinbase mints its outputs and has nothing to check here.
        if transaction.is_coinbase() {
            return Ok(());
        }

        let mut input_total: u64 = 0;
        for input in &transaction.inputs {
            let key = utxo_key(&input.prev_txid, input.vout);
            let Some(spent) = self.utxos.get(&key) else {
                return Err(CoinError::invalid_transaction(format!(
                    "input {key} is not an unspent output"
                )));
            };
            if !used.insert((input.prev_txid.clone(), input.vout)) {
                return Err(CoinError::DoubleSpend {
                    txid: input.prev_txid.clone(),
                    vout: input.vout,
                });
            }
            // The signing key must actually own the spent output.
            let public_key = input
                .public_key
                .as_deref()
                .ok_or(CoinError::InvalidSignature)?;
            if PublicKey::from_hex(public_key)?.address() != spent.address {
                return Err(CoinError::invalid_transaction(format!(
                    "input {key} is not owned by the signing key"
                )));
            }
            input_total = input_total
                .checked_add(spent.amount)
                .ok_or_else(|| CoinError::invalid_transaction("input amounts overflow"))?;
        }

        let output_total = transaction
            .outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.amount))
            .ok_or_else(|| CoinError::invalid_transaction("output amounts overflow"))?;
        if input_total < output_total {
            return Err(CoinError::invalid_transaction("outputs exceed inputs"));
        }

        if !transaction.verify() {
            return Err(CoinError::InvalidSignature);
        }
        Ok(())
    }

    // Single mutation point: rewrite the UTXO set, prune confirmed
    // transactions from the mempool, archive, then append.
    fn apply_block(&mut self, block: Block) {
        for transaction in &block.transactions {
            for input in &transaction.inputs {
                self.utxos.delete(&utxo_key(&input.prev_txid, input.vout));
            }
            let txid = transaction.txid();
            for (vout, output) in transaction.outputs.iter().enumerate() {
                self.utxos.set(utxo_key(&txid, vout as u32), output.clone());
            }
        }

        let confirmed: HashSet<String> = block
            .transactions
            .iter()
            .map(|transaction| transaction.txid())
            .collect();
        self.mempool
            .retain(|pending| !confirmed.contains(&pending.txid()));

        if let Some(archive) = self.archive.as_mut() {
            if let Err(e) = archive.store_block(&block) {
                warn!("failed to archive block {}: {e}", block.index);
            }
        }
        self.chain.push(block);
    }

    /// Candidate for the next block: the coinbase first, then the whole
    /// mempool. Resets the preemption flag for the new attempt.
    pub fn prepare_candidate(&mut self, miner_address: &str) -> Result<Block> {
        let tip = self
            .chain
            .last()
            .ok_or_else(|| CoinError::invalid_block("cannot mine on an empty chain"))?;
        let reward = CoinConfig::global().network.coinbase_reward;
        let mut transactions = vec![Transaction::coinbase(miner_address, reward)];
        transactions.extend(self.mempool.iter().cloned());
        let candidate = Block::new(
            tip.index + 1,
            tip.hash(),
            transactions,
            Utc::now().timestamp(),
            0,
            self.dynamic_difficulty(),
        );
        self.preempt.store(false, Ordering::Relaxed);
        Ok(candidate)
    }

    /// Install a block proven by the local miner. The tip may have
    /// moved while the proof ran; a stale candidate is rejected.
    pub fn install_mined_block(&mut self, block: Block) -> Result<u64> {
        let tip = self
            .chain
            .last()
            .ok_or_else(|| CoinError::invalid_block("cannot install on an empty chain"))?;
        if block.previous_hash != tip.hash() {
            return Err(CoinError::invalid_block("tip moved while the proof ran"));
        }
        if !Block::meets_difficulty(&block.hash(), block.difficulty) {
            return Err(CoinError::invalid_block(
                "hash does not meet the block's difficulty",
            ));
        }
        let index = block.index;
        self.apply_block(block);
        Ok(index)
    }

    /// Compose a candidate, run the proof-of-work and install the
    /// result, all in one call.
    ///
    /// Returns the new block's index, or `None` when an externally
    /// accepted block preempted the attempt. Long-running miners split
    /// this into [`Self::prepare_candidate`] / [`Block::prove`] /
    /// [`Self::install_mined_block`] so the proof runs without holding
    /// the chain.
    pub fn mine(&mut self, miner_address: &str) -> Result<Option<u64>> {
        let candidate = self.prepare_candidate(miner_address)?;
        let preempt = Arc::clone(&self.preempt);
        match candidate.prove(&preempt) {
            Some(block) => self.install_mined_block(block).map(Some),
            None => Ok(None),
        }
    }

    /// Sum of unspent output amounts addressed to `address`.
    pub fn balance(&self, address: &str) -> u64 {
        self.utxos
            .scan()
            .filter(|(_, output)| output.address == address)
            .map(|(_, output)| output.amount)
            .sum()
    }

    /// Greedy selection of unspent outputs owned by `sender` totalling
    /// at least `amount`. Outputs reserved by pending mempool
    /// transactions are skipped; candidates are visited in key order so
    /// the selection is deterministic for a given UTXO set.
    pub fn find_inputs(&self, sender: &str, amount: u64) -> (u64, Vec<Input>) {
        let reserved: HashSet<(String, u32)> = self
            .mempool
            .iter()
            .flat_map(|pending| pending.inputs.iter())
            .map(|input| (input.prev_txid.clone(), input.vout))
            .collect();

        let mut candidates: Vec<(String, Output)> = self
            .utxos
            .scan()
            .filter(|(_, output)| output.address == sender)
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut total = 0u64;
        let mut inputs = Vec::new();
        for (key, output) in candidates {
            if total >= amount {
                break;
            }
            let Some((txid, vout)) = split_utxo_key(&key) else {
                continue;
            };
            if reserved.contains(&(txid.to_string(), vout)) {
                continue;
            }
            inputs.push(Input::new(txid, vout));
            total += output.amount;
        }
        (total, inputs)
    }

    /// Build, sign and enqueue a payment from `sender` to `recipient`.
    /// Change above the amount flows back to the sender. Returns `None`
    /// when the sender cannot cover the amount.
    pub fn create_transaction(
        &mut self,
        sender: &str,
        recipient: &str,
        amount: u64,
        private_key: &PrivateKey,
    ) -> Result<Option<Transaction>> {
        let (total, inputs) = self.find_inputs(sender, amount);
        if total < amount {
            return Ok(None);
        }

        let mut outputs = vec![Output {
            address: recipient.to_string(),
            amount,
        }];
        let change = total - amount;
        if change > 0 {
            outputs.push(Output {
                address: sender.to_string(),
                amount: change,
            });
        }

        let mut transaction = Transaction::new(inputs, outputs);
        transaction.sign(private_key);
        if !transaction.verify() {
            return Err(CoinError::InvalidSignature);
        }
        self.receive_transaction(transaction.clone())?;
        Ok(Some(transaction))
    }

    /// Difficulty for the next block. Once the chain outgrows the
    /// retarget window, scale the tip difficulty by how far the window
    /// deviated from its target duration; before that, the base
    /// difficulty.
    pub fn dynamic_difficulty(&self) -> u32 {
        let network = &CoinConfig::global().network;
        let window = network.retarget_window;
        if self.chain.len() > window {
            let tip = self.chain.last().expect("BUG: chain is non-empty here");
            let start = &self.chain[self.chain.len() - 1 - window];
            let actual = (tip.timestamp - start.timestamp).max(1);
            let scaled = (tip.difficulty as i64 * network.target_window_secs) / actual;
            return scaled.max(1) as u32;
        }
        self.base_difficulty
    }

    /// Fork-choice scalar: the sum of 2^difficulty over the chain.
    pub fn cumulative_difficulty(&self) -> u128 {
        self.chain
            .iter()
            .map(|block| 1u128 << block.difficulty.min(127))
            .sum()
    }

    /// Every block's `(index, hash)` pair, the fingerprint peers match
    /// against during fork negotiation.
    pub fn fingerprint(&self) -> Vec<ChainHash> {
        self.chain
            .iter()
            .map(|block| ChainHash {
                index: block.index,
                hash: block.hash(),
            })
            .collect()
    }

    pub fn consensus_data(&self) -> ConsensusData {
        ConsensusData {
            chain_hashes: self.fingerprint(),
            cum_diff: self.cumulative_difficulty(),
        }
    }

    /// Highest `(index, hash)` pair shared with a peer fingerprint, or
    /// `None` when even the genesis differs.
    pub fn last_common_block(&self, remote: &[ChainHash]) -> Option<u64> {
        let mut common = None;
        for (local, claimed) in self.chain.iter().zip(remote) {
            if claimed.index != local.index || claimed.hash != local.hash() {
                break;
            }
            common = Some(local.index);
        }
        common
    }

    /// Rewind to the common ancestor (`None` drops everything) and
    /// rebuild the UTXO set by replaying the surviving chain.
    pub fn truncate_to(&mut self, common: Option<u64>) {
        let keep = common.map_or(0, |index| index as usize + 1);
        self.chain.truncate(keep);
        self.rebuild_utxos();
    }

    /// Replay the whole chain into the UTXO set, then drop pending
    /// transactions the rebuilt set can no longer fund.
    pub fn rebuild_utxos(&mut self) {
        self.utxos.clear();
        for block in &self.chain {
            for transaction in &block.transactions {
                for input in &transaction.inputs {
                    self.utxos.delete(&utxo_key(&input.prev_txid, input.vout));
                }
                let txid = transaction.txid();
                for (vout, output) in transaction.outputs.iter().enumerate() {
                    self.utxos.set(utxo_key(&txid, vout as u32), output.clone());
                }
            }
        }

        let pending = std::mem::take(&mut self.mempool);
        let mut used: HashSet<(String, u32)> = HashSet::new();
        for transaction in pending {
            if self.validate_transaction(&transaction, &mut used).is_ok() {
                self.mempool.push(transaction);
            }
        }
    }

    /// Full-chain audit: linkage, proofs and Merkle roots.
    pub fn is_chain_valid(&self) -> bool {
        for (i, block) in self.chain.iter().enumerate() {
            if !Block::meets_difficulty(&block.hash(), block.difficulty) {
                return false;
            }
            if merkle_root(&block.transactions) != block.merkle_root {
                return false;
            }
            if i > 0 && block.previous_hash != self.chain[i - 1].hash() {
                return false;
            }
        }
        true
    }
}

impl Default for Blockchain {
    fn default() -> Self {
        Blockchain::new()
    }
}

impl Saveable for Blockchain {
    fn load<I: Read>(reader: I) -> IoResult<Self> {
        let blocks: Vec<Block> = ciborium::de::from_reader(reader).map_err(|_| {
            IoError::new(IoErrorKind::InvalidData, "Failed to deserialize Blockchain")
        })?;
        Ok(Blockchain::from_blocks(blocks))
    }

    fn save<O: Write>(&self, writer: O) -> IoResult<()> {
        ciborium::ser::into_writer(&self.chain, writer)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to serialize Blockchain"))
    }
}

use crate::sha256::sha256_hex;
use crate::types::Transaction;
use std::fs::File;
use std::io::{Read, Result as IoResult, Write};
use std::path::Path;

/// Calculates the Merkle root of a block's transactions.
///
/// Leaves are the hex transaction ids. Each level pairs consecutive
/// entries and hashes the concatenation of the two hex strings; the
/// last entry of an odd level is paired with itself.
///
/// ```text
/// For 3 transactions [A, B, C]:
///
///          ROOT = H(H(AB) || H(CC))
///          /                      \
///      H(AB)                    H(CC)   <- C is duplicated
///      /    \                   /    \
///     A      B                 C      C
/// ```
///
/// An empty transaction list hashes the empty string, so even an empty
/// block commits to a well-defined root.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return sha256_hex(b"");
    }

    let mut layer: Vec<String> = transactions.iter().map(|tx| tx.txid()).collect();

    // Combine pairs of hashes until only the root remains
    while layer.len() > 1 {
        let mut next_layer = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let left = &pair[0];
            // If there is an odd number, duplicate the last hash
            let right = pair.get(1).unwrap_or(left);
            next_layer.push(sha256_hex(format!("{left}{right}").as_bytes()));
        }
        layer = next_layer;
    }

    layer.swap_remove(0)
}

pub trait Saveable
where
    Self: Sized,
{
    fn load<I: Read>(reader: I) -> IoResult<Self>;
    fn save<O: Write>(&self, writer: O) -> IoResult<()>;
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> IoResult<()> {
        let file = File::create(&path)?;
        self.save(file)
    }
    fn load_from_file<P: AsRef<Path>>(path: P) -> IoResult<Self> {
        let file = File::open(&path)?;
        Self::load(file)
    }
}

#[cfg(test)]
mod tests;

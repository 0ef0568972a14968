use serde::{Deserialize, Serialize};
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Result as IoResult, Write};

use crate::crypto::{verify_signature, PrivateKey};
use crate::sha256::sha256_hex;
use crate::util::Saveable;

/// A reference to an unspent output of an earlier transaction.
///
/// `signature` and `public_key` stay empty until the transaction is
/// signed. A coinbase transaction carries no inputs at all.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Input {
    pub prev_txid: String,
    pub vout: u32,
    pub signature: Option<String>,
    pub public_key: Option<String>,
}

impl Input {
    pub fn new(prev_txid: impl Into<String>, vout: u32) -> Self {
        Input {
            prev_txid: prev_txid.into(),
            vout,
            signature: None,
            public_key: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Output {
    pub address: String,
    pub amount: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    /// Reserved; the per-input signatures are authoritative.
    #[serde(default)]
    pub signature: Option<String>,
}

// Canonical forms feeding the transaction id. Signatures are excluded
// and field declaration order is the sorted key order the id depends
// on.
#[derive(Serialize)]
struct InputDigest<'a> {
    prev_txid: &'a str,
    vout: u32,
}

#[derive(Serialize)]
struct OutputDigest<'a> {
    address: &'a str,
    amount: u64,
}

#[derive(Serialize)]
struct TransactionDigest<'a> {
    inputs: Vec<InputDigest<'a>>,
    outputs: Vec<OutputDigest<'a>>,
}

impl Transaction {
    pub fn new(inputs: Vec<Input>, outputs: Vec<Output>) -> Self {
        Transaction {
            inputs,
            outputs,
            signature: None,
        }
    }

    /// Reward transaction minting `amount` to the miner. No inputs.
    pub fn coinbase(address: impl Into<String>, amount: u64) -> Self {
        Transaction::new(
            vec![],
            vec![Output {
                address: address.into(),
                amount,
            }],
        )
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Transaction id: SHA-256 over the canonical serialization with
    /// signatures left out, so the id is invariant under re-signing.
    pub fn txid(&self) -> String {
        let digest = TransactionDigest {
            inputs: self
                .inputs
                .iter()
                .map(|input| InputDigest {
                    prev_txid: &input.prev_txid,
                    vout: input.vout,
                })
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|output| OutputDigest {
                    address: &output.address,
                    amount: output.amount,
                })
                .collect(),
        };
        let serialized =
            serde_json::to_string(&digest).expect("BUG: digest serialization is infallible");
        sha256_hex(serialized.as_bytes())
    }

    /// Attach a signature over the transaction id, plus the signing
    /// public key, to every input.
    pub fn sign(&mut self, private_key: &PrivateKey) {
        let txid = self.txid();
        let public_key = private_key.public_key().to_hex();
        for input in &mut self.inputs {
            input.signature = Some(private_key.sign(txid.as_bytes()));
            input.public_key = Some(public_key.clone());
        }
    }

    /// Check every input's signature against this transaction's id.
    /// A coinbase has no inputs and verifies vacuously.
    pub fn verify(&self) -> bool {
        let txid = self.txid();
        self.inputs
            .iter()
            .all(|input| match (&input.signature, &input.public_key) {
                (Some(signature), Some(public_key)) => {
                    verify_signature(public_key, txid.as_bytes(), signature).is_ok()
                }
                _ => false,
            })
    }
}

impl Saveable for Transaction {
    fn load<I: Read>(reader: I) -> IoResult<Self> {
        ciborium::de::from_reader(reader).map_err(|_| {
            IoError::new(IoErrorKind::InvalidData, "Failed to deserialize Transaction")
        })
    }

    fn save<O: Write>(&self, writer: O) -> IoResult<()> {
        ciborium::ser::into_writer(self, writer)
            .map_err(|_| IoError::new(IoErrorKind::InvalidData, "Failed to serialize Transaction"))
    }
}

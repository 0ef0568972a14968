use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoinError {
    #[error("Invalid transaction: {reason}")]
    InvalidTransaction { reason: String },
    #[error("Invalid block: {reason}")]
    InvalidBlock { reason: String },
    #[error("Double spend: output {txid}:{vout} is consumed twice")]
    DoubleSpend { txid: String, vout: u32 },
    #[error("Invalid Merkle root: calculated root does not match block header")]
    InvalidMerkleRoot,
    #[error("Invalid signature: signature verification failed")]
    InvalidSignature,
    #[error("Invalid public key: {reason}")]
    InvalidPublicKey { reason: String },
    #[error("Invalid private key: {reason}")]
    InvalidPrivateKey { reason: String },
    #[error("Storage error: {reason}")]
    Storage { reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

// Convenience methods for creating errors
impl CoinError {
    pub fn invalid_transaction<S: Into<String>>(reason: S) -> Self {
        CoinError::InvalidTransaction {
            reason: reason.into(),
        }
    }

    pub fn invalid_block<S: Into<String>>(reason: S) -> Self {
        CoinError::InvalidBlock {
            reason: reason.into(),
        }
    }

    pub fn invalid_public_key<S: Into<String>>(reason: S) -> Self {
        CoinError::InvalidPublicKey {
            reason: reason.into(),
        }
    }

    pub fn storage<S: Into<String>>(reason: S) -> Self {
        CoinError::Storage {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoinError>;

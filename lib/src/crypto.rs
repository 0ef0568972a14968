//! ECDSA key material, signatures and address derivation.
//!
//! Keys live on secp256k1. The signing message is always a transaction
//! id; signatures and the uncompressed SEC1 public key travel
//! hex-encoded inside the input that carries them, so any peer can
//! verify a spend without extra key metadata.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::{CoinError, Result};
use crate::sha256::checksum4;

#[derive(Clone, Debug)]
pub struct PrivateKey(SigningKey);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PrivateKey {
    /// Generate a fresh random key.
    pub fn new_key() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    /// Sign a message (the transaction id) and return the signature
    /// hex-encoded.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature: EcdsaSignature = self.0.sign(message);
        hex::encode(signature.to_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded).map_err(|e| CoinError::InvalidPrivateKey {
            reason: e.to_string(),
        })?;
        let key = SigningKey::from_slice(&bytes).map_err(|e| CoinError::InvalidPrivateKey {
            reason: e.to_string(),
        })?;
        Ok(PrivateKey(key))
    }
}

impl PublicKey {
    /// Uncompressed SEC1 encoding: the 0x04 prefix followed by X and Y.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded).map_err(|e| CoinError::invalid_public_key(e.to_string()))?;
        let key = VerifyingKey::from_sec1_bytes(&bytes)
            .map_err(|e| CoinError::invalid_public_key(e.to_string()))?;
        Ok(PublicKey(key))
    }

    /// Base58 address for this key.
    pub fn address(&self) -> String {
        address_from_bytes(&self.to_bytes())
    }
}

/// Verify a hex signature over `message` against a hex-encoded public
/// key.
pub fn verify_signature(public_key_hex: &str, message: &[u8], signature_hex: &str) -> Result<()> {
    let key = PublicKey::from_hex(public_key_hex)?;
    let bytes = hex::decode(signature_hex).map_err(|_| CoinError::InvalidSignature)?;
    let signature = EcdsaSignature::from_slice(&bytes).map_err(|_| CoinError::InvalidSignature)?;
    key.0
        .verify(message, &signature)
        .map_err(|_| CoinError::InvalidSignature)
}

// Address pipeline: RIPEMD160(SHA256(key)), then a 4-byte double-SHA
// checksum appended before base58 encoding.
fn address_from_bytes(public_key: &[u8]) -> String {
    let hashed = Ripemd160::digest(Sha256::digest(public_key));
    let mut payload = hashed.to_vec();
    payload.extend_from_slice(&checksum4(&hashed));
    bs58::encode(payload).into_string()
}

/// Wallet hook: a fresh keypair and the address derived from it.
pub fn generate_address() -> (PrivateKey, String) {
    let key = PrivateKey::new_key();
    let address = key.public_key().address();
    (key, address)
}

#[cfg(test)]
mod tests;

//! SHA-256 helpers shared by block identity, transaction ids, message
//! ids and address derivation. Digests travel hex-encoded everywhere
//! they cross the wire.

use sha2::{Digest, Sha256};

/// Hex digest of one SHA-256 pass.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex digest of SHA-256 applied twice, the block identity hash.
pub fn double_sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(Sha256::digest(data)))
}

/// First four bytes of a double SHA-256, the address checksum.
pub fn checksum4(data: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(data));
    [digest[0], digest[1], digest[2], digest[3]]
}

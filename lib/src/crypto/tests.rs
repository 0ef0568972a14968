#[cfg(test)]
mod tests {
    use crate::crypto::{generate_address, verify_signature, PrivateKey, PublicKey};

    #[test]
    fn test_key_generation() {
        let private_key = PrivateKey::new_key();
        let public_key = private_key.public_key();

        // Public key should be derivable from private key, repeatably
        let public_key2 = private_key.public_key();
        assert_eq!(public_key, public_key2);

        // Uncompressed SEC1 encoding carries the 0x04 prefix
        let bytes = public_key.to_bytes();
        assert_eq!(bytes.len(), 65);
        assert_eq!(bytes[0], 0x04);
    }

    #[test]
    fn test_key_hex_round_trip() {
        let private_key = PrivateKey::new_key();
        let restored = PrivateKey::from_hex(&private_key.to_hex()).unwrap();
        assert_eq!(restored.public_key(), private_key.public_key());

        let public_key = private_key.public_key();
        let restored = PublicKey::from_hex(&public_key.to_hex()).unwrap();
        assert_eq!(restored, public_key);
    }

    #[test]
    fn test_signature_creation_and_verification() {
        let private_key = PrivateKey::new_key();
        let public_key_hex = private_key.public_key().to_hex();

        let message = b"test message";
        let signature = private_key.sign(message);

        assert!(verify_signature(&public_key_hex, message, &signature).is_ok());
    }

    #[test]
    fn test_signature_verification_fails_wrong_message() {
        let private_key = PrivateKey::new_key();
        let public_key_hex = private_key.public_key().to_hex();

        let signature = private_key.sign(b"message 1");

        assert!(verify_signature(&public_key_hex, b"message 2", &signature).is_err());
    }

    #[test]
    fn test_signature_verification_fails_wrong_key() {
        let private_key1 = PrivateKey::new_key();
        let private_key2 = PrivateKey::new_key();
        let public_key2_hex = private_key2.public_key().to_hex();

        let signature = private_key1.sign(b"test message");

        assert!(verify_signature(&public_key2_hex, b"test message", &signature).is_err());
    }

    #[test]
    fn test_invalid_public_key_rejected() {
        assert!(PublicKey::from_hex("not hex").is_err());
        assert!(PublicKey::from_hex("0400").is_err());
    }

    #[test]
    fn test_address_derivation_is_deterministic() {
        let private_key = PrivateKey::new_key();
        let address1 = private_key.public_key().address();
        let address2 = private_key.public_key().address();
        assert_eq!(address1, address2);
    }

    #[test]
    fn test_address_carries_valid_checksum() {
        let (_, address) = generate_address();
        let payload = bs58::decode(&address).into_vec().unwrap();

        // RIPEMD160 digest plus four checksum bytes
        assert_eq!(payload.len(), 24);
        let (digest, checksum) = payload.split_at(20);
        assert_eq!(checksum, crate::sha256::checksum4(digest));
    }

    #[test]
    fn test_distinct_keys_distinct_addresses() {
        let (_, address1) = generate_address();
        let (_, address2) = generate_address();
        assert_ne!(address1, address2);
    }
}

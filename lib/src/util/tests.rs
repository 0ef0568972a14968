#[cfg(test)]
mod tests {
    use crate::sha256::sha256_hex;
    use crate::types::Transaction;
    use crate::util::merkle_root;

    fn coinbase(address: &str, amount: u64) -> Transaction {
        Transaction::coinbase(address, amount)
    }

    #[test]
    fn test_merkle_root_empty_transactions() {
        // An empty block commits to the hash of the empty string
        assert_eq!(merkle_root(&[]), sha256_hex(b""));
    }

    #[test]
    fn test_merkle_root_single_transaction() {
        let transactions = vec![coinbase("a", 1)];

        // Single transaction: root is that transaction's id
        assert_eq!(merkle_root(&transactions), transactions[0].txid());
    }

    #[test]
    fn test_merkle_root_two_transactions() {
        let transactions = vec![coinbase("a", 1), coinbase("b", 2)];

        let id1 = transactions[0].txid();
        let id2 = transactions[1].txid();
        let expected = sha256_hex(format!("{id1}{id2}").as_bytes());

        assert_eq!(merkle_root(&transactions), expected);
    }

    #[test]
    fn test_merkle_root_three_transactions() {
        // Tests the odd number duplication behavior
        let transactions = vec![coinbase("a", 1), coinbase("b", 2), coinbase("c", 3)];

        let id1 = transactions[0].txid();
        let id2 = transactions[1].txid();
        let id3 = transactions[2].txid();

        // First level: [(id1, id2), (id3, id3)]
        let left = sha256_hex(format!("{id1}{id2}").as_bytes());
        let right = sha256_hex(format!("{id3}{id3}").as_bytes());

        // Second level: hash of the two results
        let expected = sha256_hex(format!("{left}{right}").as_bytes());

        assert_eq!(merkle_root(&transactions), expected);
    }

    #[test]
    fn test_merkle_root_four_transactions() {
        let transactions = vec![
            coinbase("a", 1),
            coinbase("b", 2),
            coinbase("c", 3),
            coinbase("d", 4),
        ];

        // Structure: H(H(id1 id2), H(id3 id4))
        let id1 = transactions[0].txid();
        let id2 = transactions[1].txid();
        let id3 = transactions[2].txid();
        let id4 = transactions[3].txid();

        let left = sha256_hex(format!("{id1}{id2}").as_bytes());
        let right = sha256_hex(format!("{id3}{id4}").as_bytes());
        let expected = sha256_hex(format!("{left}{right}").as_bytes());

        assert_eq!(merkle_root(&transactions), expected);
    }

    #[test]
    fn test_merkle_root_odd_count_equals_explicit_duplication() {
        // Duplicating the last transaction by hand lands on the same
        // root the odd-count rule produces
        let odd = vec![coinbase("a", 1), coinbase("b", 2), coinbase("c", 3)];
        let duplicated = vec![
            coinbase("a", 1),
            coinbase("b", 2),
            coinbase("c", 3),
            coinbase("c", 3),
        ];

        assert_eq!(merkle_root(&odd), merkle_root(&duplicated));
    }

    #[test]
    fn test_merkle_root_consistency() {
        // Same transactions produce the same root
        let transactions = vec![coinbase("a", 1), coinbase("b", 2)];
        assert_eq!(merkle_root(&transactions), merkle_root(&transactions));
    }

    #[test]
    fn test_merkle_root_order_matters() {
        let forward = vec![coinbase("a", 1), coinbase("b", 2)];
        let reversed = vec![coinbase("b", 2), coinbase("a", 1)];
        assert_ne!(merkle_root(&forward), merkle_root(&reversed));
    }
}

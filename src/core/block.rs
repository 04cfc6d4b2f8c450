use crate::core::{ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    hash: Vec<u8>,
    pre_block_hash: Vec<u8>, // empty only for genesis
    transactions: Vec<Transaction>,
    nonce: u64,
    difficulty: u32, // difficulty the nonce was mined against
}

impl Block {
    /// Builds the block and mines it on the calling thread.
    pub fn new_block(
        pre_block_hash: Vec<u8>,
        transactions: &[Transaction],
        difficulty: u32,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            hash: vec![],
            pre_block_hash,
            transactions: transactions.to_vec(),
            nonce: 0,
            difficulty,
        };

        let pow = ProofOfWork::new_proof_of_work(&block);
        let (nonce, hash) = pow.run()?;
        block.nonce = nonce;
        block.hash = hash;
        info!(
            "Mined block {} with {} transactions (nonce: {nonce}, difficulty: {difficulty})",
            HEXLOWER.encode(&block.hash),
            block.transactions.len()
        );

        Ok(block)
    }

    pub fn generate_genesis_block(coinbase: &Transaction, difficulty: u32) -> Result<Block> {
        Block::new_block(vec![], std::slice::from_ref(coinbase), difficulty)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Replays proof of work against the stored nonce and hash.
    pub fn validate_pow(&self) -> bool {
        ProofOfWork::validate(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// Flat digest over the transaction ids in block order.
    pub fn hash_transactions(&self) -> Vec<u8> {
        let mut txhashs = vec![];
        for transaction in &self.transactions {
            txhashs.extend(transaction.get_id());
        }

        sha256_digest(txhashs.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFFICULTY: u32 = 6;

    fn coinbase(data: &str) -> Transaction {
        Transaction::new_coinbase_tx(&[7u8; 20], data).unwrap()
    }

    #[test]
    fn test_new_block_is_mined() {
        let block = Block::new_block(vec![1u8; 32], &[coinbase("a")], DIFFICULTY).unwrap();
        assert_eq!(block.get_hash().len(), 32);
        assert!(block.validate_pow());
        assert!(!block.is_genesis());
    }

    #[test]
    fn test_empty_block_rejected() {
        let result = Block::new_block(vec![], &[], DIFFICULTY);
        assert!(matches!(result, Err(BlockchainError::InvalidBlock(_))));
    }

    #[test]
    fn test_genesis_has_empty_prev_hash() {
        let genesis = Block::generate_genesis_block(&coinbase("genesis"), DIFFICULTY).unwrap();
        assert!(genesis.is_genesis());
        assert!(genesis.get_pre_block_hash().is_empty());
        assert_eq!(genesis.get_transactions().len(), 1);
    }

    #[test]
    fn test_hash_transactions_is_flat_digest() {
        let txs = vec![coinbase("a"), coinbase("b")];
        let block = Block::new_block(vec![], &txs, DIFFICULTY).unwrap();
        let mut joined = txs[0].get_id().to_vec();
        joined.extend(txs[1].get_id());
        assert_eq!(block.hash_transactions(), sha256_digest(&joined));
    }

    #[test]
    fn test_encoding_round_trip() {
        let block =
            Block::new_block(vec![9u8; 32], &[coinbase("a"), coinbase("b")], DIFFICULTY).unwrap();
        let bytes = block.serialize().unwrap();
        let decoded = Block::deserialize(&bytes).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.get_hash(), block.get_hash());
        assert_eq!(decoded.get_pre_block_hash(), block.get_pre_block_hash());
        assert_eq!(decoded.get_nonce(), block.get_nonce());
        assert_eq!(decoded.get_transactions(), block.get_transactions());
        assert!(ProofOfWork::validate(&decoded));
    }

    #[test]
    fn test_corrupt_bytes_fail_to_decode() {
        let block = Block::new_block(vec![], &[coinbase("a")], DIFFICULTY).unwrap();
        let bytes = block.serialize().unwrap();
        let result = Block::deserialize(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(BlockchainError::Serialization(_))));
    }

    #[test]
    fn test_tampered_block_fails_validation() {
        let block = Block::new_block(vec![], &[coinbase("a")], DIFFICULTY).unwrap();
        let mut tampered = block.clone();
        tampered.nonce += 1;
        assert!(!ProofOfWork::validate(&tampered));

        let mut relinked = block;
        relinked.pre_block_hash = vec![1u8; 32];
        assert!(!ProofOfWork::validate(&relinked));
    }
}

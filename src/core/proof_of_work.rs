use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;

pub struct ProofOfWork {
    pre_block_hash: Vec<u8>,
    tx_digest: Vec<u8>,
    target: BigInt,
    difficulty: u32,
}

const MAX_NONCE: u64 = i64::MAX as u64;

impl ProofOfWork {
    pub fn new(pre_block_hash: &[u8], tx_digest: &[u8], difficulty: u32) -> ProofOfWork {
        ProofOfWork {
            pre_block_hash: pre_block_hash.to_vec(),
            tx_digest: tx_digest.to_vec(),
            target: Self::target(difficulty),
            difficulty,
        }
    }

    pub fn new_proof_of_work(block: &Block) -> ProofOfWork {
        Self::new(
            block.get_pre_block_hash(),
            &block.hash_transactions(),
            block.get_difficulty(),
        )
    }

    /// `2^(256 - difficulty)`; a hash read as a big-endian integer must be
    /// strictly below it.
    pub fn target(difficulty: u32) -> BigInt {
        let mut target = BigInt::from(1);
        target.shl_assign(256u32.saturating_sub(difficulty));
        target
    }

    /// Replays the preimage with the block's stored nonce. Pure: the same
    /// block validates the same way at any later time.
    pub fn validate(block: &Block) -> bool {
        let pow = ProofOfWork::new_proof_of_work(block);
        let hash = pow.hash_with_nonce(block.get_nonce());
        pow.meets_target(&hash) && hash.as_slice() == block.get_hash()
    }

    pub fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    // prev_hash ‖ tx_digest ‖ BE64(nonce) ‖ BE64(difficulty)
    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let mut data_bytes =
            Vec::with_capacity(self.pre_block_hash.len() + self.tx_digest.len() + 16);
        data_bytes.extend(self.pre_block_hash.as_slice());
        data_bytes.extend(self.tx_digest.as_slice());
        data_bytes.extend(nonce.to_be_bytes());
        data_bytes.extend(u64::from(self.difficulty).to_be_bytes());
        data_bytes
    }

    fn hash_with_nonce(&self, nonce: u64) -> Vec<u8> {
        sha256_digest(self.prepare_data(nonce).as_slice())
    }

    /// Sequential search from nonce 0. Blocks the calling thread until a
    /// nonce is found.
    pub fn run(&self) -> Result<(u64, Vec<u8>)> {
        debug!("Mining with difficulty {}", self.difficulty);
        let mut nonce = 0;
        while nonce < MAX_NONCE {
            let hash = self.hash_with_nonce(nonce);
            if self.meets_target(&hash) {
                info!("Found nonce {nonce}: {}", HEXLOWER.encode(hash.as_slice()));
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::Mining(format!(
            "Nonce space exhausted at difficulty {}",
            self.difficulty
        )))
    }
}

//! Core chain functionality
//!
//! Blocks, transactions, the proof-of-work engine and the persistent
//! chain store built from them.

pub mod block;
pub mod blockchain;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{store_exists, Blockchain, BlockchainIterator};
pub use proof_of_work::ProofOfWork;
pub use transaction::{
    TXInput, TXOutput, TXOutputs, Transaction, TransactionLookup, COINBASE_VOUT, GENESIS_DATA,
    SUBSIDY,
};

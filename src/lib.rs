//! # Ledger Chain
//!
//! A single-node proof-of-work ledger with a UTXO transaction model,
//! persisted in an embedded sled store.
//!
//! ## Layout
//! - `core/`: blocks, transactions, mining and the chain store
//! - `storage/`: key layout of the shared tree and the UTXO index
//! - `wallet/`: ECDSA P-256 key pairs and Base58Check addresses
//! - `config/`: the explicit `Config` handed to the chain store
//! - `utils/`: hashing, signatures and bincode helpers
//! - `cli/`: clap definitions for the `ledger-chain` binary
//!
//! ## Where to start
//! 1. `core/blockchain.rs` for `init`, `resume` and `add_block`
//! 2. `core/transaction.rs` for the signing protocol
//! 3. `storage/utxo_set.rs` for `reindex` and `update`
//!
//! Mining blocks the calling thread; `Blockchain::spawn_add_block` moves it
//! onto a worker when the caller needs to stay responsive.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

// Re-export commonly used types for convenience
pub use cli::{Command, Opt};
pub use config::Config;
pub use core::{
    Block, Blockchain, BlockchainIterator, ProofOfWork, TXInput, TXOutput, TXOutputs,
    Transaction, TransactionLookup, GENESIS_DATA, SUBSIDY,
};
pub use error::{BlockchainError, Result};
pub use storage::{OutPoint, UTXOSet};
pub use utils::{
    base58_decode, base58_encode, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, ripemd160_digest, sha256_digest,
};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};

//! Storage layout and the UTXO index
//!
//! The chain store and the UTXO index share one sled tree. `keyspace`
//! defines how their keys are told apart; `utxo_set` maintains the index.

pub mod keyspace;
pub mod utxo_set;

pub use keyspace::{KeySpace, TIP_BLOCK_HASH_KEY, UTXO_PREFIX};
pub use utxo_set::{OutPoint, UTXOSet, DELETE_BATCH_SIZE};

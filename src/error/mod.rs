//! Error handling for the ledger
//!
//! Integrity failures (corrupt bytes, inconsistent store state) and user
//! errors (insufficient funds, bad addresses) share one enum so callers
//! can match on the kind they care about.

use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Error kinds produced by the chain store, transactions and UTXO index
#[derive(Debug, Clone)]
pub enum BlockchainError {
    /// `init` was called against a location that already holds a store
    StoreAlreadyExists(String),
    /// `resume` was called against a location without a store
    StoreNotFound(String),
    /// Database-related errors
    Database(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// A chain scan finished without finding the transaction (hex id)
    TransactionNotFound(String),
    /// A transaction was rejected as malformed or unverifiable
    InvalidTransaction(String),
    /// Insufficient funds for transaction
    InsufficientFunds { required: u64, available: u64 },
    /// Block validation errors
    InvalidBlock(String),
    /// Invalid address format
    InvalidAddress(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Wallet operation errors
    Wallet(String),
    /// Configuration errors
    Config(String),
    /// File I/O errors
    Io(String),
    /// Mining errors
    Mining(String),
}

impl BlockchainError {
    /// Integrity errors abort the enclosing operation; everything else is
    /// something the caller can report and carry on from.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BlockchainError::Database(_)
                | BlockchainError::Serialization(_)
                | BlockchainError::Io(_)
                | BlockchainError::Mining(_)
        )
    }
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::StoreAlreadyExists(path) => {
                write!(f, "Blockchain already exists at {path}")
            }
            BlockchainError::StoreNotFound(path) => {
                write!(f, "No existing blockchain found at {path}")
            }
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::TransactionNotFound(txid) => {
                write!(f, "Transaction not found: {txid}")
            }
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: sled::transaction::TransactionError<BlockchainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => {
                BlockchainError::Database(e.to_string())
            }
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(BlockchainError::Serialization("bad bytes".to_string()).is_fatal());
        assert!(BlockchainError::Database("missing tip".to_string()).is_fatal());
        assert!(!BlockchainError::InsufficientFunds {
            required: 10,
            available: 5
        }
        .is_fatal());
        assert!(!BlockchainError::StoreAlreadyExists("./data".to_string()).is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = BlockchainError::InsufficientFunds {
            required: 1000,
            available: 100,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: required 1000, available 100"
        );
        let err = BlockchainError::TransactionNotFound("abcd".to_string());
        assert_eq!(err.to_string(), "Transaction not found: abcd");
    }

    #[test]
    fn test_sled_abort_unwraps_inner_error() {
        let err: BlockchainError = sled::transaction::TransactionError::Abort(
            BlockchainError::InvalidBlock("empty".to_string()),
        )
        .into();
        assert!(matches!(err, BlockchainError::InvalidBlock(_)));
    }
}

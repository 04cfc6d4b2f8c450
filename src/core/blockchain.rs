// This is the persistent chain store. Every block lives in one sled tree keyed
// by its hash, and the `lh` key names the tip. The UTXO index shares the same
// tree under its own key prefix (see `storage::keyspace`), which lets me check
// spends and write a block inside a single sled transaction.

use crate::config::Config;
use crate::core::{Block, TXOutputs, Transaction, TransactionLookup, GENESIS_DATA};
use crate::error::{BlockchainError, Result};
use crate::storage::{KeySpace, TIP_BLOCK_HASH_KEY};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Db, Tree};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

const CHAIN_TREE: &str = "chain";

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>, // cached copy of `lh`
    db: Db,
    tree: Tree,
    config: Config,
}

/// A store exists when its directory is present and holds at least one entry.
pub fn store_exists(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl Blockchain {
    /// Creates a new store holding only a genesis block that pays
    /// `genesis_address`, together with the genesis entry of the UTXO index.
    /// Fails before touching disk if a store is already present at
    /// `config.db_path`.
    pub fn init(config: &Config, genesis_address: &str) -> Result<Blockchain> {
        config.validate()?;
        let path = config.db_path.as_path();
        if store_exists(path)? {
            return Err(BlockchainError::StoreAlreadyExists(
                path.display().to_string(),
            ));
        }

        info!("Creating genesis block for address: {genesis_address}");
        let coinbase_tx = Transaction::new_coinbase_to_address(genesis_address, GENESIS_DATA)?;
        let genesis = Block::generate_genesis_block(&coinbase_tx, config.difficulty)?;

        let db = sled::open(path)?;
        let tree = db.open_tree(CHAIN_TREE)?;
        let block_data = genesis.serialize()?;
        let genesis_outputs = TXOutputs::from_transaction(&coinbase_tx).serialize()?;
        tree.transaction(|tx_tree| -> ConflictableTransactionResult<(), BlockchainError> {
            tx_tree.insert(genesis.get_hash(), block_data.as_slice())?;
            tx_tree.insert(TIP_BLOCK_HASH_KEY, genesis.get_hash())?;
            // The index starts out consistent with the chain, so the very
            // first spend can be checked against it.
            tx_tree.insert(KeySpace::UTXO.key(coinbase_tx.get_id()), genesis_outputs.as_slice())?;
            Ok(())
        })?;
        db.flush()?;

        info!(
            "Created blockchain at {} with genesis {}",
            path.display(),
            genesis.get_hash_hex()
        );
        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            db,
            tree,
            config: config.clone(),
        })
    }

    /// Opens an existing store and loads its tip.
    pub fn resume(config: &Config) -> Result<Blockchain> {
        config.validate()?;
        let path = config.db_path.as_path();
        if !store_exists(path)? {
            return Err(BlockchainError::StoreNotFound(path.display().to_string()));
        }

        let db = sled::open(path)?;
        let tree = db.open_tree(CHAIN_TREE)?;
        let tip_hash = tree
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| BlockchainError::StoreNotFound(path.display().to_string()))?;

        debug!("Resumed blockchain at tip {}", HEXLOWER.encode(&tip_hash));
        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash.to_vec())),
            db,
            tree,
            config: config.clone(),
        })
    }

    pub fn get_tree(&self) -> &Tree {
        &self.tree
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .expect("Failed to acquire read lock on tip_hash - this should never happen")
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .expect("Failed to acquire write lock on tip_hash - this should never happen");
        *tip_hash = new_tip_hash.to_vec();
    }

    // The persisted tip, which is authoritative over the cached copy.
    fn read_tip(&self) -> Result<Vec<u8>> {
        let tip = self
            .tree
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| BlockchainError::Database("Tip hash not found".to_string()))?;
        Ok(tip.to_vec())
    }

    /// Verifies `transactions`, mines a block on top of the current tip and
    /// commits block and tip together. Mining runs on the calling thread.
    ///
    /// Every input must still be listed in the UTXO index, so the index has
    /// to be brought up to date (`UTXOSet::update`) after each appended block.
    pub fn add_block(&self, transactions: &[Transaction]) -> Result<Block> {
        for (i, transaction) in transactions.iter().enumerate() {
            if !transaction.verify(self)? {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction {i} ({}) failed verification",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
        }
        self.check_for_double_spending(transactions)?;
        // A transaction id may appear only once in the whole chain, otherwise
        // the index would hold two transactions under one key.
        for transaction in transactions {
            match self.find_transaction(transaction.get_id()) {
                Ok(_) => {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Transaction {} is already in the chain",
                        HEXLOWER.encode(transaction.get_id())
                    )))
                }
                Err(BlockchainError::TransactionNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        // Fail fast before mining; the same check runs again in the write.
        self.tree
            .transaction(|tx_tree| -> ConflictableTransactionResult<(), BlockchainError> {
                for transaction in transactions {
                    Self::check_unspent(tx_tree, transaction)?;
                }
                Ok(())
            })?;

        let tip = self.read_tip()?;
        let block = Block::new_block(tip.clone(), transactions, self.config.difficulty)?;
        let block_data = block.serialize()?;

        self.tree
            .transaction(|tx_tree| -> ConflictableTransactionResult<(), BlockchainError> {
                let current = tx_tree.get(TIP_BLOCK_HASH_KEY)?;
                if current.as_deref() != Some(tip.as_slice()) {
                    return Err(ConflictableTransactionError::Abort(
                        BlockchainError::InvalidBlock(
                            "Chain tip moved while the block was being mined".to_string(),
                        ),
                    ));
                }
                for transaction in block.get_transactions() {
                    Self::check_unspent(tx_tree, transaction)?;
                }
                tx_tree.insert(block.get_hash(), block_data.as_slice())?;
                tx_tree.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                Ok(())
            })?;
        self.db.flush()?;
        self.set_tip_hash(block.get_hash());

        info!(
            "Added block {} with {} transactions",
            block.get_hash_hex(),
            block.get_transactions().len()
        );
        Ok(block)
    }

    /// Runs `add_block` on a worker thread.
    pub fn spawn_add_block(&self, transactions: Vec<Transaction>) -> JoinHandle<Result<Block>> {
        let chain = self.clone();
        thread::spawn(move || chain.add_block(&transactions))
    }

    // Runs inside the block write: every input I am about to consume must
    // still be listed in the UTXO index, and the transaction itself must not
    // already own an index entry.
    fn check_unspent(
        tx_tree: &TransactionalTree,
        transaction: &Transaction,
    ) -> ConflictableTransactionResult<(), BlockchainError> {
        let txid_hex = HEXLOWER.encode(transaction.get_id());
        if tx_tree
            .get(KeySpace::UTXO.key(transaction.get_id()))?
            .is_some()
        {
            return Err(ConflictableTransactionError::Abort(
                BlockchainError::InvalidTransaction(format!(
                    "Transaction {txid_hex} already has unspent outputs"
                )),
            ));
        }
        if transaction.is_coinbase() {
            return Ok(());
        }

        for input in transaction.get_vin() {
            let unspent = match tx_tree.get(KeySpace::UTXO.key(input.get_txid()))? {
                Some(bytes) => {
                    let outs = TXOutputs::deserialize(&bytes)
                        .map_err(ConflictableTransactionError::Abort)?;
                    input.output_index().is_some_and(|idx| outs.contains(idx))
                }
                None => false,
            };
            if !unspent {
                return Err(ConflictableTransactionError::Abort(
                    BlockchainError::InvalidTransaction(format!(
                        "Transaction {txid_hex} spends {}:{} which is not unspent",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )),
                ));
            }
        }
        Ok(())
    }

    // The same output may not be spent twice within one block, and the same
    // transaction may not appear twice in it.
    fn check_for_double_spending(&self, transactions: &[Transaction]) -> Result<()> {
        let mut spent_outputs: HashSet<(Vec<u8>, i64)> = HashSet::new();
        let mut seen_ids: HashSet<&[u8]> = HashSet::new();

        for (tx_index, transaction) in transactions.iter().enumerate() {
            if !seen_ids.insert(transaction.get_id()) {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction {tx_index} repeats id {} within the block",
                    HEXLOWER.encode(transaction.get_id())
                )));
            }
            if transaction.is_coinbase() {
                continue;
            }
            for input in transaction.get_vin() {
                let output_reference = (input.get_txid().to_vec(), input.get_vout());
                if !spent_outputs.insert(output_reference) {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Double spend in transaction {tx_index}: output {}:{} already spent in this block",
                        HEXLOWER.encode(input.get_txid()),
                        input.get_vout()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator {
            tree: self.tree.clone(),
            current_hash: Some(self.get_tip_hash()),
        }
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        match self.tree.get(block_hash)? {
            Some(bytes) => Ok(Some(Block::deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Scans the chain tip to genesis for a transaction id.
    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        for block in self.iterator() {
            let block = block?;
            if let Some(tx) = block
                .get_transactions()
                .iter()
                .find(|tx| tx.get_id() == txid)
            {
                return Ok(tx.clone());
            }
        }
        Err(BlockchainError::TransactionNotFound(HEXLOWER.encode(txid)))
    }

    /// Every transaction with at least one unspent output, keyed by id.
    ///
    /// Walks tip to genesis and, inside each block, last transaction to
    /// first, so a spend is always seen before the output it consumes.
    pub fn find_utxo(&self) -> Result<HashMap<Vec<u8>, TXOutputs>> {
        let mut utxo: HashMap<Vec<u8>, TXOutputs> = HashMap::new();
        let mut spent_txos: HashMap<Vec<u8>, HashSet<i64>> = HashMap::new();

        for block in self.iterator() {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                let spent = spent_txos.get(tx.get_id());
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    if spent.is_some_and(|spent| spent.contains(&(idx as i64))) {
                        continue;
                    }
                    utxo.entry(tx.get_id().to_vec())
                        .or_default()
                        .push(idx, out.clone());
                }

                if tx.is_coinbase() {
                    continue;
                }
                for txin in tx.get_vin() {
                    spent_txos
                        .entry(txin.get_txid().to_vec())
                        .or_default()
                        .insert(txin.get_vout());
                }
            }
        }
        Ok(utxo)
    }
}

impl TransactionLookup for Blockchain {
    fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        Blockchain::find_transaction(self, txid)
    }
}

/// Walks from the tip back to genesis.
pub struct BlockchainIterator {
    tree: Tree,
    current_hash: Option<Vec<u8>>, // None once genesis has been yielded
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        let block = match self.tree.get(&hash) {
            Ok(Some(bytes)) => Block::deserialize(bytes.as_ref()),
            Ok(None) => Err(BlockchainError::Database(format!(
                "Block {} not found",
                HEXLOWER.encode(&hash)
            ))),
            Err(e) => Err(e.into()),
        };
        if let Ok(block) = &block {
            if !block.is_genesis() {
                self.current_hash = Some(block.get_pre_block_hash().to_vec());
            }
        }
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SUBSIDY;
    use crate::wallet::{hash_pub_key, Wallet};
    use tempfile::tempdir;

    const DIFFICULTY: u32 = 4;

    #[test]
    fn test_store_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain");
        assert!(!store_exists(&path).unwrap());
        fs::create_dir(&path).unwrap();
        assert!(!store_exists(&path).unwrap());
        fs::write(path.join("marker"), b"x").unwrap();
        assert!(store_exists(&path).unwrap());
    }

    #[test]
    fn test_init_writes_genesis() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), DIFFICULTY);
        let owner = Wallet::new().unwrap();
        let chain = Blockchain::init(&config, &owner.get_address()).unwrap();

        let blocks: Vec<Block> = chain.iterator().map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 1);
        let genesis = &blocks[0];
        assert!(genesis.is_genesis());
        assert_eq!(genesis.get_hash(), chain.get_tip_hash().as_slice());
        assert_eq!(genesis.get_difficulty(), DIFFICULTY);

        let coinbase = &genesis.get_transactions()[0];
        assert!(coinbase.is_coinbase());
        assert_eq!(coinbase.get_vin()[0].get_pub_key(), GENESIS_DATA.as_bytes());
        assert_eq!(coinbase.get_vout()[0].get_value(), SUBSIDY);
        assert!(coinbase.get_vout()[0].is_locked_with_key(&hash_pub_key(owner.get_public_key())));
    }

    #[test]
    fn test_init_rejects_bad_address() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), DIFFICULTY);
        assert!(matches!(
            Blockchain::init(&config, "not-an-address"),
            Err(BlockchainError::InvalidAddress(_))
        ));
        assert!(!store_exists(&config.db_path).unwrap());
    }

    #[test]
    fn test_init_rejects_invalid_difficulty() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), 0);
        let owner = Wallet::new().unwrap();
        assert!(matches!(
            Blockchain::init(&config, &owner.get_address()),
            Err(BlockchainError::Config(_))
        ));
    }

    #[test]
    fn test_find_transaction() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), DIFFICULTY);
        let owner = Wallet::new().unwrap();
        let chain = Blockchain::init(&config, &owner.get_address()).unwrap();

        let genesis = chain.get_block(&chain.get_tip_hash()).unwrap().unwrap();
        let coinbase = &genesis.get_transactions()[0];
        assert_eq!(&chain.find_transaction(coinbase.get_id()).unwrap(), coinbase);
        assert!(matches!(
            chain.find_transaction(&[0u8; 32]),
            Err(BlockchainError::TransactionNotFound(_))
        ));
        assert!(chain.get_block(&[0u8; 32]).unwrap().is_none());
    }

    #[test]
    fn test_add_block_links_to_tip() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), DIFFICULTY);
        let owner = Wallet::new().unwrap();
        let chain = Blockchain::init(&config, &owner.get_address()).unwrap();
        let genesis_hash = chain.get_tip_hash();

        let reward = Transaction::new_coinbase_to_address(&owner.get_address(), "").unwrap();
        let block = chain.add_block(&[reward]).unwrap();
        assert_eq!(block.get_pre_block_hash(), genesis_hash.as_slice());
        assert_eq!(chain.get_tip_hash(), block.get_hash());
        assert_eq!(chain.iterator().count(), 2);
    }

    #[test]
    fn test_add_block_rejects_empty_block() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), DIFFICULTY);
        let owner = Wallet::new().unwrap();
        let chain = Blockchain::init(&config, &owner.get_address()).unwrap();
        let tip = chain.get_tip_hash();

        assert!(matches!(
            chain.add_block(&[]),
            Err(BlockchainError::InvalidBlock(_))
        ));
        assert_eq!(chain.get_tip_hash(), tip);
    }

    #[test]
    fn test_find_utxo_for_genesis_only() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), DIFFICULTY);
        let owner = Wallet::new().unwrap();
        let chain = Blockchain::init(&config, &owner.get_address()).unwrap();

        let utxo = chain.find_utxo().unwrap();
        assert_eq!(utxo.len(), 1);
        let outs = utxo.values().next().unwrap();
        let indices: Vec<usize> = outs.iter().map(|(idx, _)| *idx).collect();
        assert_eq!(indices, vec![0]);
    }

    #[test]
    fn test_init_seeds_genesis_index_entry() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), DIFFICULTY);
        let owner = Wallet::new().unwrap();
        let chain = Blockchain::init(&config, &owner.get_address()).unwrap();

        let genesis = chain.iterator().next().unwrap().unwrap();
        let coinbase_id = genesis.get_transactions()[0].get_id();
        let stored = chain
            .get_tree()
            .get(KeySpace::UTXO.key(coinbase_id))
            .unwrap()
            .unwrap();
        let outs = TXOutputs::deserialize(&stored).unwrap();
        assert!(outs.contains(0));
        assert_eq!(outs, chain.find_utxo().unwrap()[coinbase_id]);
    }
}

use crate::core::{Block, Blockchain, TXOutput, TXOutputs};
use crate::error::{BlockchainError, Result};
use crate::storage::KeySpace;
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::Batch;
use std::collections::BTreeMap;

/// Upper bound on keys removed per atomic batch when clearing the index
pub const DELETE_BATCH_SIZE: usize = 100_000;

/// Reference to one output of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Vec<u8>,
    pub vout: usize,
}

/// Unspent-output index derived from the chain it wraps.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Walks the index in key order picking outputs owned by
    /// `pub_key_hash` until their sum reaches `amount`.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, Vec<OutPoint>)> {
        let mut unspent_outputs = vec![];
        let mut accumulated = 0u64;

        for item in KeySpace::UTXO.scan(self.blockchain.get_tree()) {
            if accumulated >= amount {
                break;
            }
            let (key, value) = item?;
            let txid = KeySpace::UTXO.strip(&key).unwrap_or_default().to_vec();
            let outs = TXOutputs::deserialize(&value)?;

            for (idx, out) in outs.iter() {
                if out.is_locked_with_key(pub_key_hash) && accumulated < amount {
                    accumulated = accumulated.saturating_add(out.get_value());
                    unspent_outputs.push(OutPoint {
                        txid: txid.clone(),
                        vout: *idx,
                    });
                }
            }
        }
        Ok((accumulated, unspent_outputs))
    }

    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        for item in KeySpace::UTXO.scan(self.blockchain.get_tree()) {
            let (_, value) = item?;
            let outs = TXOutputs::deserialize(&value)?;
            for (_, out) in outs.iter() {
                if out.is_locked_with_key(pub_key_hash) {
                    utxos.push(out.clone())
                }
            }
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    pub fn count_transactions(&self) -> Result<u64> {
        let mut counter = 0;
        for item in KeySpace::UTXO.scan(self.blockchain.get_tree()) {
            item?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Current index contents keyed by transaction id.
    pub fn entries(&self) -> Result<BTreeMap<Vec<u8>, TXOutputs>> {
        let mut entries = BTreeMap::new();
        for item in KeySpace::UTXO.scan(self.blockchain.get_tree()) {
            let (key, value) = item?;
            if let Some(txid) = KeySpace::UTXO.strip(&key) {
                entries.insert(txid.to_vec(), TXOutputs::deserialize(&value)?);
            }
        }
        Ok(entries)
    }

    /// Drops the whole index and rebuilds it from one chain traversal.
    pub fn reindex(&self) -> Result<()> {
        // First I clear every `utxo-` key in bounded batches, then I walk the
        // chain once and write all surviving entries in a single batch, so a
        // reader never sees a half-written index.
        let removed = self.delete_by_prefix(DELETE_BATCH_SIZE)?;

        let utxo = self.blockchain.find_utxo()?;
        let mut batch = Batch::default();
        for (txid, outs) in &utxo {
            batch.insert(KeySpace::UTXO.key(txid), outs.serialize()?);
        }
        let tree = self.blockchain.get_tree();
        tree.apply_batch(batch)?;
        tree.flush()?;

        info!(
            "Reindexed UTXO set: {} transactions with unspent outputs ({removed} stale entries removed)",
            utxo.len()
        );
        Ok(())
    }

    // Each batch commits atomically; returns how many keys were removed.
    fn delete_by_prefix(&self, batch_size: usize) -> Result<usize> {
        let tree = self.blockchain.get_tree();
        let mut removed = 0;
        let mut batch = Batch::default();
        let mut collected = 0;

        for item in KeySpace::UTXO.scan(tree) {
            let (key, _) = item?;
            batch.remove(key);
            collected += 1;
            if collected == batch_size {
                tree.apply_batch(std::mem::take(&mut batch))?;
                removed += collected;
                collected = 0;
            }
        }
        if collected > 0 {
            tree.apply_batch(batch)?;
            removed += collected;
        }
        Ok(removed)
    }

    /// Applies one freshly appended block in a single transaction: spent
    /// outputs leave their entries, the block's transactions gain new ones.
    pub fn update(&self, block: &Block) -> Result<()> {
        // Each input removes the index it consumes from its transaction's
        // entry, and the entry goes away once nothing is left in it. Then every
        // transaction in the block gets a fresh entry for its own outputs.
        // Anything missing means the index and chain disagree, so I abort
        // the whole update.
        let tree = self.blockchain.get_tree();
        tree.transaction(|tx_tree| -> ConflictableTransactionResult<(), BlockchainError> {
            for tx in block.get_transactions() {
                if !tx.is_coinbase() {
                    for vin in tx.get_vin() {
                        let key = KeySpace::UTXO.key(vin.get_txid());
                        let outs_bytes = tx_tree.get(&key)?.ok_or_else(|| {
                            ConflictableTransactionError::Abort(BlockchainError::Database(
                                format!(
                                    "UTXO entry for {} not found",
                                    HEXLOWER.encode(vin.get_txid())
                                ),
                            ))
                        })?;
                        let mut outs = TXOutputs::deserialize(&outs_bytes)
                            .map_err(ConflictableTransactionError::Abort)?;

                        let spent = vin.output_index().is_some_and(|idx| outs.remove(idx));
                        if !spent {
                            return Err(ConflictableTransactionError::Abort(
                                BlockchainError::Database(format!(
                                    "Output {}:{} is not unspent",
                                    HEXLOWER.encode(vin.get_txid()),
                                    vin.get_vout()
                                )),
                            ));
                        }

                        if outs.is_empty() {
                            tx_tree.remove(key)?;
                        } else {
                            let bytes = outs
                                .serialize()
                                .map_err(ConflictableTransactionError::Abort)?;
                            tx_tree.insert(key, bytes)?;
                        }
                    }
                }

                let new_outputs = TXOutputs::from_transaction(tx);
                if !new_outputs.is_empty() {
                    let bytes = new_outputs
                        .serialize()
                        .map_err(ConflictableTransactionError::Abort)?;
                    tx_tree.insert(KeySpace::UTXO.key(tx.get_id()), bytes)?;
                }
            }
            Ok(())
        })?;

        debug!("Updated UTXO set for block {}", block.get_hash_hex());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::Transaction;
    use crate::wallet::{hash_pub_key, Wallet};
    use tempfile::{tempdir, TempDir};

    fn setup() -> (UTXOSet, Wallet, TempDir) {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().join("chain"), 4);
        let owner = Wallet::new().unwrap();
        let chain = Blockchain::init(&config, &owner.get_address()).unwrap();
        let utxo_set = UTXOSet::new(chain);
        utxo_set.reindex().unwrap();
        (utxo_set, owner, dir)
    }

    #[test]
    fn test_genesis_index() {
        let (utxo_set, owner, _dir) = setup();
        let owner_hash = hash_pub_key(owner.get_public_key());
        assert_eq!(utxo_set.count_transactions().unwrap(), 1);
        assert_eq!(utxo_set.get_balance(&owner_hash).unwrap(), 100);
        assert!(utxo_set.find_utxo(&[0u8; 20]).unwrap().is_empty());
    }

    #[test]
    fn test_find_spendable_outputs_stops_at_amount() {
        let (utxo_set, owner, _dir) = setup();
        let owner_hash = hash_pub_key(owner.get_public_key());

        let (accumulated, outpoints) = utxo_set.find_spendable_outputs(&owner_hash, 30).unwrap();
        assert_eq!(accumulated, 100);
        assert_eq!(outpoints.len(), 1);
        assert_eq!(outpoints[0].vout, 0);

        let (accumulated, outpoints) = utxo_set.find_spendable_outputs(&[9u8; 20], 30).unwrap();
        assert_eq!(accumulated, 0);
        assert!(outpoints.is_empty());
    }

    #[test]
    fn test_reindex_twice_is_stable() {
        let (utxo_set, _owner, _dir) = setup();
        let before = utxo_set.entries().unwrap();
        utxo_set.reindex().unwrap();
        assert_eq!(utxo_set.entries().unwrap(), before);
    }

    #[test]
    fn test_delete_by_prefix_in_small_batches() {
        let (utxo_set, owner, _dir) = setup();
        let owner_hash = hash_pub_key(owner.get_public_key());
        let tree = utxo_set.get_blockchain().get_tree();
        for i in 0..5u8 {
            let tx = Transaction::new_coinbase_tx(&owner_hash, &format!("extra {i}")).unwrap();
            tree.insert(
                KeySpace::UTXO.key(tx.get_id()),
                TXOutputs::from_transaction(&tx).serialize().unwrap(),
            )
            .unwrap();
        }
        assert_eq!(utxo_set.count_transactions().unwrap(), 6);

        assert_eq!(utxo_set.delete_by_prefix(2).unwrap(), 6);
        assert_eq!(utxo_set.count_transactions().unwrap(), 0);
        // The chain itself is untouched.
        assert!(utxo_set.get_blockchain().iterator().next().is_some());
    }

    #[test]
    fn test_already_spent_output_is_rejected() {
        let (utxo_set, owner, _dir) = setup();
        let chain = utxo_set.get_blockchain();
        let bob = Wallet::new().unwrap();
        let carol = Wallet::new().unwrap();

        // Both spend the genesis output; only the first may be appended.
        let to_bob =
            Transaction::new_utxo_transaction(&owner, &bob.get_address(), 10, &utxo_set).unwrap();
        let to_carol =
            Transaction::new_utxo_transaction(&owner, &carol.get_address(), 10, &utxo_set)
                .unwrap();
        let first = chain.add_block(&[to_bob.clone()]).unwrap();
        utxo_set.update(&first).unwrap();
        let tip = chain.get_tip_hash();
        let entries = utxo_set.entries().unwrap();

        assert!(matches!(
            chain.add_block(&[to_carol]),
            Err(BlockchainError::InvalidTransaction(_))
        ));
        assert!(matches!(
            chain.add_block(&[to_bob]),
            Err(BlockchainError::InvalidTransaction(_))
        ));
        assert_eq!(chain.get_tip_hash(), tip);
        assert_eq!(utxo_set.entries().unwrap(), entries);
    }

    #[test]
    fn test_update_rejects_block_not_matching_index() {
        let (utxo_set, owner, _dir) = setup();
        let chain = utxo_set.get_blockchain();
        let bob = Wallet::new().unwrap();

        let tx =
            Transaction::new_utxo_transaction(&owner, &bob.get_address(), 10, &utxo_set).unwrap();
        let block = chain.add_block(&[tx]).unwrap();
        utxo_set.update(&block).unwrap();
        let after_first = utxo_set.entries().unwrap();

        // Applying the same block twice finds its inputs already consumed.
        assert!(matches!(
            utxo_set.update(&block),
            Err(BlockchainError::Database(_))
        ));
        assert_eq!(utxo_set.entries().unwrap(), after_first);
    }
}

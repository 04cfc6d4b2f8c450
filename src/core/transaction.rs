// Transactions move value by consuming earlier outputs and creating new ones.
// Ownership is a flat public-key-hash comparison; there is no script engine.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Wallet};
use data_encoding::HEXLOWER;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Tokens minted by a coinbase transaction
pub const SUBSIDY: u64 = 100;

/// Output index carried by the single coinbase input
pub const COINBASE_VOUT: i64 = -1;

/// Coinbase data used for the genesis block
pub const GENESIS_DATA: &str = "First transaction from Genesis";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXInput {
    txid: Vec<u8>,      // transaction holding the output being spent
    vout: i64,          // index of that output, -1 for coinbase
    signature: Vec<u8>, // r ‖ s
    pub_key: Vec<u8>,   // X ‖ Y, or the coinbase data
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout: vout as i64,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output index, or `None` for the coinbase marker.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>, // owner
}

impl TXOutput {
    pub fn new(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    /// Locks `value` to the owner of a Base58Check address.
    pub fn lock_to_address(value: u64, address: &str) -> Result<TXOutput> {
        let pub_key_hash = address_to_pub_key_hash(address)?;
        Ok(TXOutput::new(value, &pub_key_hash))
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// The still-unspent outputs of one transaction, each paired with its
/// index in that transaction's output list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutputs {
    outputs: Vec<(usize, TXOutput)>,
}

impl TXOutputs {
    pub fn new() -> TXOutputs {
        TXOutputs::default()
    }

    /// Every output of `tx`, all unspent.
    pub fn from_transaction(tx: &Transaction) -> TXOutputs {
        TXOutputs {
            outputs: tx.get_vout().iter().cloned().enumerate().collect(),
        }
    }

    pub fn push(&mut self, index: usize, output: TXOutput) {
        self.outputs.push((index, output));
    }

    /// Drops the output at `index`; returns whether it was present.
    pub fn remove(&mut self, index: usize) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|(idx, _)| *idx != index);
        before != self.outputs.len()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.outputs.iter().any(|(idx, _)| *idx == index)
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, TXOutput)> {
        self.outputs.iter()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<TXOutputs> {
        deserialize(bytes)
    }
}

/// Resolves the prior transactions that inputs reference.
pub trait TransactionLookup {
    fn find_transaction(&self, txid: &[u8]) -> Result<Transaction>;
}

impl TransactionLookup for HashMap<Vec<u8>, Transaction> {
    fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        self.get(txid)
            .cloned()
            .ok_or_else(|| BlockchainError::TransactionNotFound(HEXLOWER.encode(txid)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Mints `SUBSIDY` to `to`. The data string sits in the input's key
    /// slot so coinbases paying the same owner get distinct ids.
    pub fn new_coinbase_tx(to: &[u8], data: &str) -> Result<Transaction> {
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: data.as_bytes().to_vec(),
        };

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![TXOutput::new(SUBSIDY, to)],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    pub fn new_coinbase_to_address(to: &str, data: &str) -> Result<Transaction> {
        let pub_key_hash = address_to_pub_key_hash(to)?;
        // Without caller data I add a random uuid so two rewards to the same
        // address never share an id.
        let data = if data.is_empty() {
            format!("Coins to {to} ({})", Uuid::new_v4())
        } else {
            data.to_string()
        };
        Self::new_coinbase_tx(&pub_key_hash, &data)
    }

    /// Spends `from`'s outputs to pay `amount` to `to`, returning change to
    /// `from`. Nothing is written: the caller appends the result.
    pub fn new_utxo_transaction(
        from: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }
        let to_pub_key_hash = address_to_pub_key_hash(to)?;
        let from_pub_key_hash = hash_pub_key(from.get_public_key());

        let (accumulated, spendable) =
            utxo_set.find_spendable_outputs(from_pub_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for outpoint in spendable {
            let mut input = TXInput::new(&outpoint.txid, outpoint.vout);
            input.pub_key = from.get_public_key().to_vec();
            inputs.push(input);
        }

        let mut outputs = vec![TXOutput::new(amount, &to_pub_key_hash)];
        if accumulated > amount {
            outputs.push(TXOutput::new(accumulated - amount, &from_pub_key_hash));
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        tx.sign(from.get_pkcs8(), utxo_set.get_blockchain())?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the encoding with `id` cleared.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(tx_copy.serialize()?.as_slice()))
    }

    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    // Digest for input `idx`: only that input's key slot carries the
    // referenced owner hash, every other slot stays empty.
    fn signing_digest(&mut self, idx: usize, owner_hash: &[u8]) -> Result<Vec<u8>> {
        self.vin[idx].signature = vec![];
        self.vin[idx].pub_key = owner_hash.to_vec();
        self.id = self.hash()?;
        self.vin[idx].pub_key = vec![];
        Ok(self.id.clone())
    }

    // Ok(None) when the lookup hands back a transaction whose content no
    // longer hashes to the referenced id.
    fn find_referenced_output<L>(lookup: &L, vin: &TXInput) -> Result<Option<TXOutput>>
    where
        L: TransactionLookup + ?Sized,
    {
        let prev_tx = lookup.find_transaction(vin.get_txid())?;
        if prev_tx.hash()? != vin.get_txid() {
            warn!(
                "Referenced transaction {} does not hash to its id",
                HEXLOWER.encode(vin.get_txid())
            );
            return Ok(None);
        }
        let output = vin
            .output_index()
            .and_then(|idx| prev_tx.vout.get(idx))
            .cloned()
            .ok_or_else(|| {
                BlockchainError::InvalidTransaction(format!(
                    "Output {} does not exist in transaction {}",
                    vin.get_vout(),
                    HEXLOWER.encode(vin.get_txid())
                ))
            })?;
        Ok(Some(output))
    }

    /// Signs every input. No-op for coinbase.
    pub fn sign<L>(&mut self, pkcs8: &[u8], lookup: &L) -> Result<()>
    where
        L: TransactionLookup + ?Sized,
    {
        if self.is_coinbase() {
            return Ok(());
        }

        // I sign a trimmed copy: every signature and key slot is cleared, and
        // for each input only its own key slot carries the owner hash of the
        // output it spends. That digest is what the signature covers, so
        // every input commits to the whole transaction plus its own output.
        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let prev_output = Self::find_referenced_output(lookup, &self.vin[idx])?
                .ok_or_else(|| {
                    BlockchainError::InvalidTransaction(format!(
                        "Referenced transaction {} is corrupt",
                        HEXLOWER.encode(self.vin[idx].get_txid())
                    ))
                })?;
            let digest = tx_copy.signing_digest(idx, prev_output.get_pub_key_hash())?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
        }
        debug!("Signed transaction {}", HEXLOWER.encode(&self.id));
        Ok(())
    }

    /// `Ok(false)` when any input fails its ownership or signature check.
    /// An input pointing at an unknown transaction or output is rejected
    /// with `InvalidTransaction`.
    pub fn verify<L>(&self, lookup: &L) -> Result<bool>
    where
        L: TransactionLookup + ?Sized,
    {
        if self.is_coinbase() {
            return Ok(true);
        }

        // I rebuild exactly the digests `sign` produced, input by input, and
        // stop at the first input that fails.
        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_output = match Self::find_referenced_output(lookup, vin) {
                Ok(Some(output)) => output,
                Ok(None) => return Ok(false),
                Err(BlockchainError::TransactionNotFound(txid)) => {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Input {idx} references unknown transaction {txid}"
                    )))
                }
                Err(e) => return Err(e),
            };

            // The key that signed must also be the key the output is locked to.
            if !vin.uses_key(prev_output.get_pub_key_hash()) {
                debug!("Input {idx} is not signed by the output owner");
                return Ok(false);
            }

            let digest = tx_copy.signing_digest(idx, prev_output.get_pub_key_hash())?;
            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                digest.as_slice(),
            ) {
                debug!("Input {idx} has an invalid signature");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", HEXLOWER.encode(&self.id))?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, "     Input {i}:")?;
            writeln!(f, "       TXID:      {}", HEXLOWER.encode(&input.txid))?;
            writeln!(f, "       Out:       {}", input.vout)?;
            writeln!(f, "       Signature: {}", HEXLOWER.encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", HEXLOWER.encode(&input.pub_key))?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, "     Output {i}:")?;
            writeln!(f, "       Value:  {}", output.value)?;
            write!(f, "       Script: {}", HEXLOWER.encode(&output.pub_key_hash))?;
            if i + 1 < self.vout.len() {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

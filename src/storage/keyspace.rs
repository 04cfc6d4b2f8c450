use crate::error::Result;
use sled::{IVec, Tree};

/// Key holding the hash of the chain's tip block
pub const TIP_BLOCK_HASH_KEY: &[u8] = b"lh";

/// Prefix of every UTXO index key
pub const UTXO_PREFIX: &[u8] = b"utxo-";

// Block hashes and transaction ids are both SHA-256 digests.
const ID_LEN: usize = 32;

/// A logical table inside the shared tree: `prefix ‖ 32-byte id`.
///
/// Membership checks the full key length as well as the prefix, so a
/// bare block hash that happens to start with the prefix bytes is never
/// mistaken for an index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpace {
    prefix: &'static [u8],
}

impl KeySpace {
    pub const UTXO: KeySpace = KeySpace {
        prefix: UTXO_PREFIX,
    };

    pub fn key(&self, id: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.prefix.len() + id.len());
        key.extend_from_slice(self.prefix);
        key.extend_from_slice(id);
        key
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key.len() == self.prefix.len() + ID_LEN && key.starts_with(self.prefix)
    }

    /// The id part of a member key.
    pub fn strip<'a>(&self, key: &'a [u8]) -> Option<&'a [u8]> {
        if self.contains(key) {
            Some(&key[self.prefix.len()..])
        } else {
            None
        }
    }

    /// Every `(key, value)` pair in this space, in key order.
    pub fn scan(self, tree: &Tree) -> impl Iterator<Item = Result<(IVec, IVec)>> {
        tree.scan_prefix(self.prefix)
            .filter(move |item| match item {
                Ok((key, _)) => self.contains(key),
                Err(_) => true,
            })
            .map(|item| item.map_err(Into::into))
    }
}

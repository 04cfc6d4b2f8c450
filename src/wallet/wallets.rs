use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::{info, warn};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Address → wallet map backed by a single bincode file.
pub struct Wallets {
    path: PathBuf,
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    /// Loads `path`; a missing file yields an empty set.
    pub fn load(path: &Path) -> Result<Wallets> {
        let mut wallets = Wallets {
            path: path.to_path_buf(),
            wallets: HashMap::new(),
        };
        if path.exists() {
            let buf = fs::read(path)?;
            wallets.wallets = deserialize(&buf[..]).map_err(|e| {
                warn!("Could not load wallets from {}: {e}", path.display());
                e
            })?;
        }
        Ok(wallets)
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        info!("Created wallet {address}");
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Result<&Wallet> {
        self.wallets
            .get(address)
            .ok_or_else(|| BlockchainError::Wallet(format!("No wallet for address {address}")))
    }

    fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let wallets = Wallets::load(&dir.path().join("wallets.dat")).unwrap();
        assert!(wallets.get_addresses().is_empty());
    }

    #[test]
    fn test_create_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("wallets.dat");
        let mut wallets = Wallets::load(&path).unwrap();
        let first = wallets.create_wallet().unwrap();
        let second = wallets.create_wallet().unwrap();
        assert_ne!(first, second);

        let reloaded = Wallets::load(&path).unwrap();
        assert_eq!(reloaded.get_addresses().len(), 2);
        let wallet = reloaded.get_wallet(&first).unwrap();
        assert_eq!(wallet.get_address(), first);
        assert!(reloaded.get_wallet("unknown").is_err());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallets.dat");
        fs::write(&path, [0xFF, 0xFF, 0xFF]).unwrap();
        assert!(matches!(
            Wallets::load(&path),
            Err(BlockchainError::Serialization(_))
        ));
    }
}

use crate::error::{BlockchainError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_DIFFICULTY: u32 = 16;
pub const MAX_DIFFICULTY: u32 = 255;

static DEFAULT_DB_PATH: &str = "./data/blocks";
static DEFAULT_WALLET_PATH: &str = "./data/wallets.dat";

const DB_PATH_KEY: &str = "LEDGER_DB_PATH";
const WALLET_PATH_KEY: &str = "LEDGER_WALLET_PATH";
const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: PathBuf,
    pub wallet_path: PathBuf,
    pub difficulty: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            wallet_path: PathBuf::from(DEFAULT_WALLET_PATH),
            difficulty: DEFAULT_DIFFICULTY,
        }
    }
}

impl Config {
    pub fn new(db_path: impl Into<PathBuf>, difficulty: u32) -> Config {
        Config {
            db_path: db_path.into(),
            difficulty,
            ..Config::default()
        }
    }

    /// Defaults, then the optional TOML file, then environment overrides.
    pub fn load(file: Option<&Path>) -> Result<Config> {
        let config = match file {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        let config = config.with_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BlockchainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Applies `LEDGER_*` overrides looked up through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DB_PATH_KEY) {
            self.db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(WALLET_PATH_KEY) {
            self.wallet_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup(DIFFICULTY_KEY) {
            self.difficulty = raw.trim().parse().map_err(|e| {
                BlockchainError::Config(format!("{DIFFICULTY_KEY}={raw} is not a number: {e}"))
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty == 0 || self.difficulty > MAX_DIFFICULTY {
            return Err(BlockchainError::Config(format!(
                "difficulty must be between 1 and {MAX_DIFFICULTY}, got {}",
                self.difficulty
            )));
        }
        Ok(())
    }
}

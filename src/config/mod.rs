//! Configuration management
//!
//! The store location, wallet file and mining difficulty travel together
//! in one `Config` value handed to the chain store at open time.

pub mod settings;

pub use settings::{Config, DEFAULT_DIFFICULTY, MAX_DIFFICULTY};

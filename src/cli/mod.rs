//! Command-line interface
//!
//! Argument parsing for the `ledger-chain` binary. The commands
//! themselves run in `main.rs`.

pub mod commands;

pub use commands::{Command, Opt};

//! Key management and addresses
//!
//! A wallet is an ECDSA P-256 key pair. Outputs are locked to
//! `RIPEMD160(SHA256(pubkey))`; addresses are the Base58Check form of
//! that hash and only matter at the presentation edge.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet,
    ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::Wallets;

//! Utility functions and helpers
//!
//! Hashing, signatures and address encoding live in `crypto`; the bincode
//! wrappers every persisted type goes through live in `serialization`.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    base58_decode, base58_encode, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    new_key_pair, public_key_from_pkcs8, ripemd160_digest, sha256_digest, split_halves,
};

pub use serialization::{deserialize, serialize};

//! Cryptographic primitives for the relay.
//!
//! This module provides:
//! - AES-256-CTR stream transforms (one independent instance per direction)
//! - A demotable transform capability for fast-mode key reuse
//! - Secure random number generation
//!
//! Session key material is zeroized on drop to prevent memory leakage.

mod cipher;
mod random;

pub use cipher::{CtrCipher, StreamTransform};
pub use random::SecureRandom;

/// Size of symmetric keys in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the CTR initial counter block in bytes
pub const IV_SIZE: usize = 16;

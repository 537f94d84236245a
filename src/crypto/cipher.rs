//! AES-256-CTR stream transforms.
//!
//! Counter mode turns the block cipher into a byte-addressable keystream:
//! arbitrary-length chunks, no padding, no framing. Encrypt and decrypt are
//! the same XOR; each direction of a connection owns its own cipher
//! instance with independent counter state.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::crypto::{IV_SIZE, KEY_SIZE};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// One directional AES-256-CTR keystream.
///
/// The 16 IV bytes are used directly as the initial big-endian counter
/// block; the counter advances one block per 16 bytes transformed.
pub struct CtrCipher {
    inner: Aes256Ctr,
}

impl CtrCipher {
    /// Create a cipher from a key and an initial counter value.
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> Self {
        Self {
            inner: Aes256Ctr::new(key.into(), iv.into()),
        }
    }

    /// XOR `data` in place with the keystream, advancing the counter.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }
}

/// Per-stream transform capability: either a live CTR keystream or the
/// identity.
///
/// Selected once per stream direction. Fast mode demotes a transform to
/// `Identity` at a well-defined point between operations; `demote` takes
/// `&mut self`, so it can never interleave with an in-flight `apply`.
pub enum StreamTransform {
    /// Pass bytes through unchanged
    Identity,
    /// Apply a counter-mode keystream
    Cipher(CtrCipher),
}

impl StreamTransform {
    /// Transform `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        if let StreamTransform::Cipher(cipher) = self {
            cipher.apply(data);
        }
    }

    /// Replace this transform with the identity for all subsequent calls.
    pub fn demote(&mut self) {
        *self = StreamTransform::Identity;
    }

    /// Check whether this transform has been demoted.
    pub fn is_identity(&self) -> bool {
        matches!(self, StreamTransform::Identity)
    }
}

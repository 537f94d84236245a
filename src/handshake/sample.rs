//! The 64-byte handshake sample and its key schedule.
//!
//! Both directions of a session derive from the same 48 bytes of the
//! sample: the decrypt key+IV is taken as-is, the encrypt key+IV is its
//! exact byte-reverse. A per-user secret folds into each direction's key
//! through a single SHA-256 over `key ‖ secret`; the IVs are never
//! rehashed.

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{CtrCipher, SecureRandom, IV_SIZE, KEY_SIZE};

/// Length of the handshake sample.
pub const SAMPLE_LEN: usize = 64;

/// Length of the ignored random prefix.
pub const SKIP_LEN: usize = 8;

/// Length of the combined key + IV region.
pub const KEY_IV_LEN: usize = KEY_SIZE + IV_SIZE;

/// Offset of the protocol tag.
pub const PROTO_TAG_POS: usize = 56;

/// Offset of the signed little-endian destination index.
pub const DC_IDX_POS: usize = 60;

const PROTO_TAG_LEN: usize = 4;

/// First byte that marks a sample as certainly not a disguised handshake.
const RESERVED_FIRST_BYTE: u8 = 0xef;

/// Known non-protocol preambles (other protocols' handshake starts).
const RESERVED_PREFIXES: [[u8; 4]; 4] = [*b"PVrG", *b"GET ", *b"POST", [0xee; 4]];

/// Protocol tag: one of three stream framing styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtoTag {
    /// Minimal length-prefixed framing
    Abridged,
    /// Four-byte length-prefixed framing
    Intermediate,
    /// Padded intermediate framing; the only tag accepted in
    /// secure-only mode
    Secure,
}

impl ProtoTag {
    /// Wire representation of this tag.
    pub const fn bytes(self) -> [u8; PROTO_TAG_LEN] {
        match self {
            ProtoTag::Abridged => [0xef; 4],
            ProtoTag::Intermediate => [0xee; 4],
            ProtoTag::Secure => [0xdd; 4],
        }
    }

    /// Read the tag out of a decrypted header.
    ///
    /// Returns `None` for unrecognized tags, and for non-secure tags when
    /// `secure_only` is set.
    pub fn from_header(decrypted: &[u8; SAMPLE_LEN], secure_only: bool) -> Option<Self> {
        let raw: [u8; PROTO_TAG_LEN] = decrypted[PROTO_TAG_POS..PROTO_TAG_POS + PROTO_TAG_LEN]
            .try_into()
            .ok()?;
        let tag = match raw {
            t if t == ProtoTag::Abridged.bytes() => ProtoTag::Abridged,
            t if t == ProtoTag::Intermediate.bytes() => ProtoTag::Intermediate,
            t if t == ProtoTag::Secure.bytes() => ProtoTag::Secure,
            _ => return None,
        };
        if secure_only && tag != ProtoTag::Secure {
            return None;
        }
        Some(tag)
    }
}

/// Check a raw (pre-decryption) sample against the reserved patterns.
///
/// A match means the bytes are certainly not a disguised handshake and no
/// decryption attempt should be made: byte 0 equal to the reserved value,
/// a known non-protocol preamble in bytes [0,4), or bytes [4,8) all zero.
pub fn is_reserved_pattern(buf: &[u8; SAMPLE_LEN]) -> bool {
    if buf[0] == RESERVED_FIRST_BYTE {
        return true;
    }
    if RESERVED_PREFIXES.iter().any(|p| buf[..4] == *p) {
        return true;
    }
    buf[4..8].iter().all(|&b| b == 0)
}

/// Directional key material derived from one handshake sample.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for the decrypt direction
    pub dec_key: [u8; KEY_SIZE],
    /// Initial counter block for the decrypt direction
    pub dec_iv: [u8; IV_SIZE],
    /// Key for the encrypt direction
    pub enc_key: [u8; KEY_SIZE],
    /// Initial counter block for the encrypt direction
    pub enc_iv: [u8; IV_SIZE],
}

impl SessionKeys {
    /// Build a fresh decrypt cipher.
    pub fn decryptor(&self) -> CtrCipher {
        CtrCipher::new(&self.dec_key, &self.dec_iv)
    }

    /// Build a fresh encrypt cipher.
    pub fn encryptor(&self) -> CtrCipher {
        CtrCipher::new(&self.enc_key, &self.enc_iv)
    }

    /// Combined encrypt key+IV, as spliced into a fast-mode backend header.
    pub fn enc_key_and_iv(&self) -> [u8; KEY_IV_LEN] {
        let mut out = [0u8; KEY_IV_LEN];
        out[..KEY_SIZE].copy_from_slice(&self.enc_key);
        out[KEY_SIZE..].copy_from_slice(&self.enc_iv);
        out
    }
}

/// An immutable 64-byte handshake sample, captured once per connection.
pub struct HandshakeSample {
    buffer: [u8; SAMPLE_LEN],
    key_material: [u8; KEY_IV_LEN],
}

impl HandshakeSample {
    /// Capture a sample from raw wire bytes.
    pub fn new(buffer: [u8; SAMPLE_LEN]) -> Self {
        let mut key_material = [0u8; KEY_IV_LEN];
        key_material.copy_from_slice(&buffer[SKIP_LEN..SKIP_LEN + KEY_IV_LEN]);
        Self {
            buffer,
            key_material,
        }
    }

    /// The raw sample bytes.
    pub fn buffer(&self) -> &[u8; SAMPLE_LEN] {
        &self.buffer
    }

    /// The raw sample bytes in reverse order, used to lay a synthesized
    /// sample out on the wire.
    pub fn reversed_buffer(&self) -> [u8; SAMPLE_LEN] {
        let mut rev = self.buffer;
        rev.reverse();
        rev
    }

    /// The raw (pre-rehash) key+IV bytes. This is the replay-cache
    /// identity of the sample.
    pub fn key_material(&self) -> &[u8; KEY_IV_LEN] {
        &self.key_material
    }

    /// Derive the directional session keys, optionally folding in a
    /// per-user secret.
    ///
    /// The decrypt key+IV is the raw material; the encrypt key+IV is its
    /// byte-reverse. With a secret, each direction's key becomes
    /// `SHA-256(key ‖ secret)` while the IVs stay untouched. Derivation is
    /// pure: trying several users against one sample never contaminates
    /// later attempts.
    pub fn derive_keys(&self, secret: Option<&[u8]>) -> SessionKeys {
        let mut reversed = self.key_material;
        reversed.reverse();

        let mut dec_key: [u8; KEY_SIZE] = self.key_material[..KEY_SIZE].try_into().unwrap();
        let dec_iv: [u8; IV_SIZE] = self.key_material[KEY_SIZE..].try_into().unwrap();
        let mut enc_key: [u8; KEY_SIZE] = reversed[..KEY_SIZE].try_into().unwrap();
        let enc_iv: [u8; IV_SIZE] = reversed[KEY_SIZE..].try_into().unwrap();

        if let Some(secret) = secret {
            dec_key = rehash(&dec_key, secret);
            enc_key = rehash(&enc_key, secret);
        }

        SessionKeys {
            dec_key,
            dec_iv,
            enc_key,
            enc_iv,
        }
    }

    /// Read the signed destination index out of a decrypted header.
    pub fn dc_index(decrypted: &[u8; SAMPLE_LEN]) -> i16 {
        i16::from_le_bytes([decrypted[DC_IDX_POS], decrypted[DC_IDX_POS + 1]])
    }

    /// Synthesize a sample for the outbound backend leg.
    ///
    /// Random buffers are drawn until one clears the reserved-pattern
    /// filter, then the negotiated tag is spliced in. With `reuse_key`
    /// (fast mode), the client's encrypt key+IV is written into the key
    /// region reversed, so both legs share one symmetric key; otherwise
    /// the backend session gets an independent random key. The sample is
    /// captured from the byte-reverse of the assembled buffer, matching
    /// how the backend will read it.
    pub fn generate(tag: ProtoTag, reuse_key: Option<&[u8; KEY_IV_LEN]>) -> Self {
        let mut rnd: [u8; SAMPLE_LEN] = loop {
            let candidate = SecureRandom::bytes();
            if !is_reserved_pattern(&candidate) {
                break candidate;
            }
        };

        rnd[PROTO_TAG_POS..PROTO_TAG_POS + PROTO_TAG_LEN].copy_from_slice(&tag.bytes());

        if let Some(key) = reuse_key {
            let mut rev_key = *key;
            rev_key.reverse();
            rnd[SKIP_LEN..SKIP_LEN + KEY_IV_LEN].copy_from_slice(&rev_key);
        }

        rnd.reverse();
        Self::new(rnd)
    }

    /// Lay a synthesized sample out as the wire header for the backend
    /// leg, advancing `encryptor` past the full sample.
    ///
    /// Everything before the tag offset goes out as plain reversed random
    /// bytes; the tag-and-after region is taken from the cipher output, so
    /// the peer recovers the logical structure by reversing and
    /// decrypting. The encryptor keystream is consumed for all 64 bytes
    /// regardless, keeping its counter aligned for the stream that
    /// follows.
    pub fn wire_header(&self, encryptor: &mut CtrCipher) -> [u8; SAMPLE_LEN] {
        let mut header = self.reversed_buffer();
        let mut encrypted = header;
        encryptor.apply(&mut encrypted);
        header[PROTO_TAG_POS..].copy_from_slice(&encrypted[PROTO_TAG_POS..]);
        header
    }
}

fn rehash(key: &[u8; KEY_SIZE], secret: &[u8]) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(secret);
    hasher.finalize().into()
}

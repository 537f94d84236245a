//! Disguised handshake parsing, key derivation, and anti-replay.
//!
//! Every connection opens with a 64-byte sample crafted to look like
//! random noise. Fixed offsets inside it carry the per-connection key
//! material, a protocol tag selecting the stream framing, and the index
//! of the destination data center:
//!
//! ```text
//! offset  0        8                                      56      60   62
//!         ├────────┼──────────────────────────────────────┼───────┼────┼──┤
//!         │ random │ 32-byte key ‖ 16-byte CTR IV         │  tag  │ dc │  │
//! ```
//!
//! The prefix is ignored except for reserved-pattern filtering, the tag
//! and index are only meaningful after decryption, and the key material
//! doubles as the replay-cache identity.

mod replay;
mod sample;

pub use replay::ReplayCache;
pub use sample::{
    is_reserved_pattern, HandshakeSample, ProtoTag, SessionKeys, DC_IDX_POS, KEY_IV_LEN,
    PROTO_TAG_POS, SAMPLE_LEN,
};

//! # mtrelay
//!
//! A transparent relay that disguises a binary application protocol's
//! handshake as innocuous random traffic, authenticates it against a set
//! of shared secrets, and relays encrypted bytes bidirectionally between
//! the client and a fixed backend data center.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Relay Server (listeners, one task per connection)       │
//! ├──────────────────────────────────────────────────────────┤
//! │  Connection Orchestrator (handshake → dial → relay)      │
//! ├──────────────────────────────────────────────────────────┤
//! │  Handshake Layer (key derivation, replay cache, filter)  │
//! ├──────────────────────────────────────────────────────────┤
//! │  Crypto Streams (AES-256-CTR wrappers, fast-mode demote) │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Goals
//!
//! 1. **Unobservability**: every handshake looks like 64 random bytes;
//!    rejected peers are starved, never answered
//! 2. **Probe resistance**: replayed handshakes and known sentinel
//!    packets are detected and dropped
//! 3. **Isolation**: no single connection's failure touches the
//!    listeners or any other connection

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod crypto;
pub mod datacenter;
pub mod error;
pub mod handshake;
pub mod proxy;

pub use error::{Error, Result};
pub use proxy::{ProxyConfig, ProxyConfigFile, Relay};

//! Relay configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// A provisioned user: display name plus shared secret.
///
/// The set is tried in order against every new connection's handshake
/// sample; the first secret that yields a structurally valid decrypted
/// header wins. The secret is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct User {
    /// Display name, used only for diagnostics
    #[zeroize(skip)]
    pub name: String,
    /// Shared secret bytes, decoded from hex once at load
    pub secret: Vec<u8>,
}

impl User {
    /// Create a user from a hex-encoded secret.
    pub fn from_hex(name: impl Into<String>, hex_secret: &str) -> Result<Self> {
        let name = name.into();
        let secret = hex::decode(hex_secret)
            .map_err(|e| Error::config(format!("invalid hex secret for user {name}: {e}")))?;
        if secret.is_empty() {
            return Err(Error::config(format!("empty secret for user {name}")));
        }
        Ok(Self { name, secret })
    }
}

/// Runtime relay configuration.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Port the relay listens on
    pub port: u16,
    /// Reuse the client session key on the backend leg, skipping one
    /// cipher pass per direction
    pub fast_mode: bool,
    /// Dial IPv6 data-center entries instead of IPv4
    pub prefer_ipv6: bool,
    /// Accept only the strictest protocol tag
    pub secure_only: bool,
    /// IPv4 listen address
    pub listen_addr_ipv4: String,
    /// IPv6 listen address; no v6 listener is bound when absent
    pub listen_addr_ipv6: Option<String>,
    /// Drop a client that has not completed (or been starved out of) the
    /// handshake within this window
    pub client_handshake_timeout: Duration,
    /// Per-attempt timeout for dialing a data center
    pub dc_connect_timeout: Duration,
    /// Read-chunk size for the backend-to-client direction
    pub to_client_buffer_size: usize,
    /// Read-chunk size for the client-to-backend direction
    pub to_dc_buffer_size: usize,
    /// Halt a relay direction whose first chunk is the probe sentinel
    pub block_mode: bool,
    /// Bound on remembered handshake key materials
    pub replay_cache_capacity: usize,
    /// Public IPv4 address, advertised for display only
    pub advertised_ipv4: Option<String>,
    /// Public IPv6 address, advertised for display only
    pub advertised_ipv6: Option<String>,
    /// Ordered user list
    pub users: Vec<User>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 8585,
            fast_mode: true,
            prefer_ipv6: false,
            secure_only: false,
            listen_addr_ipv4: "0.0.0.0".into(),
            listen_addr_ipv6: Some("::".into()),
            client_handshake_timeout: Duration::from_secs(10),
            dc_connect_timeout: Duration::from_secs(10),
            to_client_buffer_size: 131_072,
            to_dc_buffer_size: 65_536,
            block_mode: true,
            replay_cache_capacity: 32_768,
            advertised_ipv4: None,
            advertised_ipv6: None,
            users: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.users.is_empty() {
            return Err("at least one user must be configured".into());
        }
        if self.replay_cache_capacity == 0 {
            return Err("replay_cache_capacity must be positive".into());
        }
        if self.to_client_buffer_size == 0 || self.to_dc_buffer_size == 0 {
            return Err("buffer sizes must be positive".into());
        }
        if self.prefer_ipv6 && self.listen_addr_ipv6.is_none() {
            return Err("prefer_ipv6 is set but no IPv6 listen address is configured".into());
        }
        Ok(())
    }
}

/// Configuration file format for serialization.
#[derive(Serialize, Deserialize)]
pub struct ProxyConfigFile {
    /// Listen port
    pub port: u16,
    /// Fast-mode flag
    pub fast_mode: bool,
    /// Address-family preference
    pub prefer_ipv6: bool,
    /// Secure-only flag
    pub secure_only: bool,
    /// IPv4 listen address
    pub listen_addr_ipv4: String,
    /// IPv6 listen address (optional)
    pub listen_addr_ipv6: Option<String>,
    /// Client handshake timeout (seconds)
    pub client_handshake_timeout_secs: u64,
    /// Data-center connect timeout (seconds)
    pub dc_connect_timeout_secs: u64,
    /// Buffer size toward the client
    pub to_client_buffer_size: usize,
    /// Buffer size toward the data center
    pub to_dc_buffer_size: usize,
    /// Block-on-bad-first-packet flag
    pub block_mode: bool,
    /// Replay cache capacity
    pub replay_cache_capacity: usize,
    /// Advertised public IPv4 address (display only)
    pub advertised_ipv4: Option<String>,
    /// Advertised public IPv6 address (display only)
    pub advertised_ipv6: Option<String>,
    /// Users: name plus hex-encoded secret
    pub users: Vec<UserEntry>,
}

/// One user line in the configuration file.
#[derive(Serialize, Deserialize)]
pub struct UserEntry {
    /// Display name
    pub name: String,
    /// Hex-encoded secret
    pub secret: String,
}

impl ProxyConfigFile {
    /// Convert to runtime configuration, decoding secrets.
    pub fn to_config(&self) -> Result<ProxyConfig> {
        let mut users = Vec::with_capacity(self.users.len());
        for entry in &self.users {
            users.push(User::from_hex(entry.name.clone(), &entry.secret)?);
        }

        Ok(ProxyConfig {
            port: self.port,
            fast_mode: self.fast_mode,
            prefer_ipv6: self.prefer_ipv6,
            secure_only: self.secure_only,
            listen_addr_ipv4: self.listen_addr_ipv4.clone(),
            listen_addr_ipv6: self.listen_addr_ipv6.clone(),
            client_handshake_timeout: Duration::from_secs(self.client_handshake_timeout_secs),
            dc_connect_timeout: Duration::from_secs(self.dc_connect_timeout_secs),
            to_client_buffer_size: self.to_client_buffer_size,
            to_dc_buffer_size: self.to_dc_buffer_size,
            block_mode: self.block_mode,
            replay_cache_capacity: self.replay_cache_capacity,
            advertised_ipv4: self.advertised_ipv4.clone(),
            advertised_ipv6: self.advertised_ipv6.clone(),
            users,
        })
    }

    /// Create from runtime configuration.
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            port: config.port,
            fast_mode: config.fast_mode,
            prefer_ipv6: config.prefer_ipv6,
            secure_only: config.secure_only,
            listen_addr_ipv4: config.listen_addr_ipv4.clone(),
            listen_addr_ipv6: config.listen_addr_ipv6.clone(),
            client_handshake_timeout_secs: config.client_handshake_timeout.as_secs(),
            dc_connect_timeout_secs: config.dc_connect_timeout.as_secs(),
            to_client_buffer_size: config.to_client_buffer_size,
            to_dc_buffer_size: config.to_dc_buffer_size,
            block_mode: config.block_mode,
            replay_cache_capacity: config.replay_cache_capacity,
            advertised_ipv4: config.advertised_ipv4.clone(),
            advertised_ipv6: config.advertised_ipv6.clone(),
            users: config
                .users
                .iter()
                .map(|u| UserEntry {
                    name: u.name.clone(),
                    secret: hex::encode(&u.secret),
                })
                .collect(),
        }
    }
}

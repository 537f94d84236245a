//! Relay server: listeners, accept loop, and per-connection state.
//!
//! One task per accepted connection; the only state shared between them
//! is the replay cache (behind a mutex) and a monotonically increasing
//! connection counter used for diagnostic correlation.

pub mod config;
pub mod conn;
pub mod stream;

pub use config::{ProxyConfig, ProxyConfigFile, User};
pub use conn::PROBE_SENTINEL;
pub use stream::{CryptoStreamReader, CryptoStreamWriter};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::error::{Error, Result};
use crate::handshake::ReplayCache;

/// The relay server.
pub struct Relay {
    config: Arc<ProxyConfig>,
    replays: Arc<Mutex<ReplayCache>>,
    next_conn_id: AtomicU64,
}

impl Relay {
    /// Create a relay with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let replays = Arc::new(Mutex::new(ReplayCache::new(config.replay_cache_capacity)));
        Self {
            config: Arc::new(config),
            replays,
            next_conn_id: AtomicU64::new(0),
        }
    }

    /// Bind the configured listeners and serve until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        let v4_addr = format!("{}:{}", self.config.listen_addr_ipv4, self.config.port);
        let v4 = TcpListener::bind(&v4_addr)
            .await
            .map_err(|e| Error::config(format!("failed to bind {v4_addr}: {e}")))?;
        tracing::info!("listening on {}", v4_addr);

        let v6 = match &self.config.listen_addr_ipv6 {
            Some(addr) => {
                let v6_addr = format!("[{}]:{}", addr, self.config.port);
                let listener = TcpListener::bind(&v6_addr)
                    .await
                    .map_err(|e| Error::config(format!("failed to bind {v6_addr}: {e}")))?;
                tracing::info!("listening on {}", v6_addr);
                Some(listener)
            }
            None => None,
        };

        match v6 {
            Some(v6) => {
                tokio::try_join!(self.accept_loop(v4), self.accept_loop(v6))?;
            }
            None => self.accept_loop(v4).await?,
        }
        Ok(())
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
                    let config = Arc::clone(&self.config);
                    let replays = Arc::clone(&self.replays);

                    tokio::spawn(async move {
                        conn::handle(conn_id, stream, peer, config, replays).await;
                    });
                }
                Err(e) => {
                    // One failed accept never takes the listener down
                    tracing::warn!("accept error: {}", e);
                }
            }
        }
    }

    /// Number of handshake key materials currently remembered.
    pub fn replay_cache_len(&self) -> usize {
        self.replays.lock().len()
    }
}

//! Crypto-wrapped stream halves.
//!
//! Each wrapper layers exactly one transform over an underlying byte
//! stream: decrypt-on-read or encrypt-on-write. Counter-mode semantics
//! mean chunks of any length, no padding and no framing. Fast mode
//! demotes a wrapper to an identity transform at runtime without touching
//! the underlying stream or its buffered state.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::StreamTransform;

/// A reader that decrypts everything pulled through it.
pub struct CryptoStreamReader<R> {
    inner: R,
    transform: StreamTransform,
    block_size: usize,
}

impl<R: AsyncRead + Unpin> CryptoStreamReader<R> {
    /// Wrap `inner` with a transform and the default 1-byte alignment.
    pub fn new(inner: R, transform: StreamTransform) -> Self {
        Self::with_block_size(inner, transform, 1)
    }

    /// Wrap `inner` requiring reads to align to `block_size`.
    pub fn with_block_size(inner: R, transform: StreamTransform, block_size: usize) -> Self {
        debug_assert!(block_size >= 1);
        Self {
            inner,
            transform,
            block_size,
        }
    }

    /// Read up to `buf.len()` bytes, complete any partial trailing block,
    /// and apply the transform. Returns 0 on orderly EOF.
    ///
    /// `buf.len()` must be a multiple of the block size so block
    /// completion always fits.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        debug_assert_eq!(buf.len() % self.block_size, 0);
        let n = self.inner.read(buf).await?;
        if n == 0 {
            return Ok(0);
        }

        let mut total = n;
        let partial = total % self.block_size;
        if partial != 0 {
            let needed = self.block_size - partial;
            self.inner.read_exact(&mut buf[total..total + needed]).await?;
            total += needed;
        }

        self.transform.apply(&mut buf[..total]);
        Ok(total)
    }

    /// Demote the transform to identity for all subsequent reads.
    pub fn demote(&mut self) {
        self.transform.demote();
    }
}

/// A writer that encrypts everything pushed through it.
pub struct CryptoStreamWriter<W> {
    inner: W,
    transform: StreamTransform,
}

impl<W: AsyncWrite + Unpin> CryptoStreamWriter<W> {
    /// Wrap `inner` with a transform.
    pub fn new(inner: W, transform: StreamTransform) -> Self {
        Self { inner, transform }
    }

    /// Transform and write the whole chunk.
    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut out = data.to_vec();
        self.transform.apply(&mut out);
        self.inner.write_all(&out).await
    }

    /// Flush the underlying stream.
    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    /// Signal EOF downstream (half-close for TCP).
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    /// Demote the transform to identity for all subsequent writes.
    pub fn demote(&mut self) {
        self.transform.demote();
    }
}

//! Per-connection lifecycle orchestration.
//!
//! Every accepted connection walks one path:
//!
//! ```text
//! ACCEPTED → CLIENT_HANDSHAKE → DC_CONNECT → BACKEND_HANDSHAKE → RELAYING → CLOSED
//! ```
//!
//! A failure at any stage drops straight to `CLOSED`: all transports are
//! released with no bytes sent, so malformed or unauthenticated input is
//! never acknowledged. Dropping the halves ends in an ordinary FIN, not a
//! forced reset; linger tuning is left to the operating system. Handshake rejection does
//! not even produce a close — the client is starved (all further input
//! read and discarded) until it gives up, leaving an active prober with
//! nothing to distinguish the relay from a dead port.
//!
//! During `RELAYING` two pump loops run concurrently, one per direction.
//! They are raced: the first to finish cancels the other at its next
//! suspension point, after which the backend writer is closed explicitly.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::crypto::StreamTransform;
use crate::datacenter;
use crate::error::{Error, ErrorDisposition, Result};
use crate::handshake::{
    is_reserved_pattern, HandshakeSample, ProtoTag, ReplayCache, SessionKeys, SAMPLE_LEN,
};
use crate::proxy::config::ProxyConfig;
use crate::proxy::stream::{CryptoStreamReader, CryptoStreamWriter};

/// First relayed chunk that signals an active probe; the direction halts
/// without forwarding it when block mode is on.
pub const PROBE_SENTINEL: [u8; 4] = [0x6c, 0xfe, 0xff, 0xff];

/// Bounded retry for the outbound dial; the last error propagates once
/// attempts are exhausted.
const MAX_DC_CONNECT_ATTEMPTS: u32 = 3;

const DRAIN_BUF_SIZE: usize = 4096;

/// Outcome of the client handshake.
pub(crate) enum ClientHandshake<R, W> {
    /// The sample authenticated and both directions are wrapped
    Established(Box<EstablishedClient<R, W>>),
    /// The sample was a probe, a replay, or matched no user; the peer has
    /// been drained dry
    Rejected,
}

/// The client-facing leg after a successful handshake.
pub(crate) struct EstablishedClient<R, W> {
    pub reader: CryptoStreamReader<R>,
    pub writer: CryptoStreamWriter<W>,
    pub keys: SessionKeys,
    pub tag: ProtoTag,
    pub dc_index: i16,
    pub dc_addr: SocketAddr,
}

/// The backend-facing leg after its synthesized handshake.
pub(crate) struct EstablishedBackend<R, W> {
    pub reader: CryptoStreamReader<R>,
    pub writer: CryptoStreamWriter<W>,
}

/// Entry point for one accepted connection. Never lets an error escape
/// past this boundary: the failure is classified, logged, and resolved by
/// dropping every transport the connection owns.
pub async fn handle(
    conn_id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    config: Arc<ProxyConfig>,
    replays: Arc<Mutex<ReplayCache>>,
) {
    tracing::trace!(conn_id, %peer, "connection accepted");

    if let Err(e) = run(conn_id, stream, peer, &config, &replays).await {
        match e.disposition() {
            ErrorDisposition::Ignore => {
                tracing::trace!(conn_id, error = %e, "ignoring transport error");
            }
            ErrorDisposition::ForceAbort => {
                tracing::debug!(conn_id, %peer, error = %e, "force-aborting connection");
            }
            ErrorDisposition::Abort => {
                tracing::debug!(conn_id, %peer, error = %e, "connection aborted");
            }
        }
    }
}

async fn run(
    conn_id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    config: &ProxyConfig,
    replays: &Mutex<ReplayCache>,
) -> Result<()> {
    let (read_half, write_half) = stream.into_split();

    // CLIENT_HANDSHAKE, starvation included, is bounded by one timeout.
    let handshake = tokio::time::timeout(
        config.client_handshake_timeout,
        client_handshake(read_half, write_half, config, replays),
    )
    .await
    .map_err(|_| Error::Timeout(config.client_handshake_timeout))??;

    let mut client = match handshake {
        ClientHandshake::Established(client) => client,
        ClientHandshake::Rejected => {
            tracing::debug!(conn_id, %peer, "handshake rejected, connection starved");
            return Ok(());
        }
    };
    tracing::debug!(
        conn_id,
        %peer,
        tag = ?client.tag,
        dc_index = client.dc_index,
        "client handshake complete"
    );

    // DC_CONNECT
    let backend_stream = connect_dc(client.dc_addr, config).await?;
    let (backend_read, backend_write) = backend_stream.into_split();

    // BACKEND_HANDSHAKE
    let mut backend = backend_handshake(
        backend_read,
        backend_write,
        client.tag,
        &client.keys,
        config.fast_mode,
    )
    .await?;

    // With one symmetric key on both legs, re-encrypting in the middle is
    // a no-op: drop one cipher pass per direction.
    if config.fast_mode {
        client.writer.demote();
        backend.reader.demote();
    }

    // RELAYING
    let result = relay(
        &mut client.reader,
        &mut client.writer,
        &mut backend.reader,
        &mut backend.writer,
        config,
        conn_id,
    )
    .await;

    tracing::debug!(conn_id, %peer, "connection closed");
    result
}

/// Authenticate a 64-byte handshake sample against the ordered user list
/// and wrap both client directions on success.
///
/// Rejections are silent: the reserved-pattern filter, the replay cache,
/// and per-user validation all funnel into the same drain-and-discard
/// path, so a prober sees no difference between "bad secret" and "not
/// this protocol".
pub(crate) async fn client_handshake<R, W>(
    mut read_half: R,
    write_half: W,
    config: &ProxyConfig,
    replays: &Mutex<ReplayCache>,
) -> Result<ClientHandshake<R, W>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = [0u8; SAMPLE_LEN];
    read_half.read_exact(&mut raw).await?;
    let sample = HandshakeSample::new(raw);

    // Reserved patterns are checked on the raw bytes before any
    // decryption attempt.
    if is_reserved_pattern(sample.buffer()) {
        drain(&mut read_half).await;
        return Ok(ClientHandshake::Rejected);
    }

    if replays.lock().contains(sample.key_material()) {
        tracing::warn!("replayed handshake material, starving connection");
        drain(&mut read_half).await;
        return Ok(ClientHandshake::Rejected);
    }

    for user in &config.users {
        let keys = sample.derive_keys(Some(&user.secret));
        let mut decryptor = keys.decryptor();
        let mut decrypted = *sample.buffer();
        decryptor.apply(&mut decrypted);

        let Some(tag) = ProtoTag::from_header(&decrypted, config.secure_only) else {
            continue;
        };

        let dc_index = HandshakeSample::dc_index(&decrypted);
        let Some(dc_addr) = datacenter::resolve(dc_index, config.prefer_ipv6) else {
            tracing::debug!(dc_index, "destination index out of table range");
            break;
        };

        // The fresh-or-seen decision happens inside this single lock
        // acquisition: of two connections racing identical material, at
        // most one is admitted.
        if !replays.lock().insert(*sample.key_material()) {
            tracing::warn!("replayed handshake material, starving connection");
            drain(&mut read_half).await;
            return Ok(ClientHandshake::Rejected);
        }
        tracing::debug!(user = %user.name, "handshake authenticated");

        // The winning decryptor has already consumed the 64-byte header,
        // leaving its counter aligned with the client's stream.
        return Ok(ClientHandshake::Established(Box::new(EstablishedClient {
            reader: CryptoStreamReader::new(read_half, StreamTransform::Cipher(decryptor)),
            writer: CryptoStreamWriter::new(
                write_half,
                StreamTransform::Cipher(keys.encryptor()),
            ),
            keys,
            tag,
            dc_index,
            dc_addr,
        })));
    }

    drain(&mut read_half).await;
    Ok(ClientHandshake::Rejected)
}

/// Read and discard everything until the peer closes. Never writes a byte.
async fn drain<R: AsyncRead + Unpin>(read_half: &mut R) {
    let mut sink = [0u8; DRAIN_BUF_SIZE];
    while matches!(read_half.read(&mut sink).await, Ok(n) if n > 0) {}
}

/// Dial the selected data center, retrying transient OS-level connect
/// failures up to the attempt bound and propagating the last error.
async fn connect_dc(addr: SocketAddr, config: &ProxyConfig) -> Result<TcpStream> {
    let mut last_err = Error::Timeout(config.dc_connect_timeout);

    for attempt in 1..=MAX_DC_CONNECT_ATTEMPTS {
        match tokio::time::timeout(config.dc_connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) if is_transient_connect_error(&e) => {
                tracing::debug!(%addr, attempt, error = %e, "data-center connect failed");
                last_err = Error::Network(e);
            }
            Ok(Err(e)) => return Err(Error::Network(e)),
            Err(_) => {
                tracing::debug!(%addr, attempt, "data-center connect timed out");
                last_err = Error::Timeout(config.dc_connect_timeout);
            }
        }
    }

    Err(last_err)
}

fn is_transient_connect_error(e: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::TimedOut
    )
}

/// Synthesize and send the disguised header toward the backend, then wrap
/// both backend directions with the backend session keys.
pub(crate) async fn backend_handshake<R, W>(
    read_half: R,
    mut write_half: W,
    tag: ProtoTag,
    client_keys: &SessionKeys,
    fast_mode: bool,
) -> Result<EstablishedBackend<R, W>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let reuse = fast_mode.then(|| client_keys.enc_key_and_iv());
    let sample = HandshakeSample::generate(tag, reuse.as_ref());
    let keys = sample.derive_keys(None);

    let mut encryptor = keys.encryptor();
    let header = sample.wire_header(&mut encryptor);
    write_half.write_all(&header).await?;
    write_half.flush().await?;

    Ok(EstablishedBackend {
        reader: CryptoStreamReader::new(read_half, StreamTransform::Cipher(keys.decryptor())),
        writer: CryptoStreamWriter::new(write_half, StreamTransform::Cipher(encryptor)),
    })
}

/// Race the two relay directions; the first to end cancels the other,
/// then the backend writer is closed.
pub(crate) async fn relay<CR, CW, BR, BW>(
    client_reader: &mut CryptoStreamReader<CR>,
    client_writer: &mut CryptoStreamWriter<CW>,
    backend_reader: &mut CryptoStreamReader<BR>,
    backend_writer: &mut CryptoStreamWriter<BW>,
    config: &ProxyConfig,
    conn_id: u64,
) -> Result<()>
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    BR: AsyncRead + Unpin,
    BW: AsyncWrite + Unpin,
{
    // The losing pump future is dropped when select! resolves, which
    // cancels it at its current suspension point; buffered-but-unflushed
    // bytes in that direction are gone with it.
    let result = tokio::select! {
        r = pump(
            client_reader,
            backend_writer,
            config.to_dc_buffer_size,
            config.block_mode,
            conn_id,
            "client->dc",
        ) => r,
        r = pump(
            backend_reader,
            client_writer,
            config.to_client_buffer_size,
            config.block_mode,
            conn_id,
            "dc->client",
        ) => r,
    };

    let _ = backend_writer.shutdown().await;
    result
}

/// Copy one direction until EOF, probe sentinel, or error.
///
/// Every chunk is flushed after the write. An empty read is orderly EOF:
/// the loop signals it downstream with a half-close and ends.
async fn pump<R, W>(
    reader: &mut CryptoStreamReader<R>,
    writer: &mut CryptoStreamWriter<W>,
    buffer_size: usize,
    block_first: bool,
    conn_id: u64,
    direction: &'static str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut first_chunk = true;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            tracing::trace!(conn_id, direction, "relay direction finished");
            break;
        }

        if std::mem::take(&mut first_chunk) && block_first && buf[..n] == PROBE_SENTINEL {
            tracing::warn!(conn_id, direction, "probe sentinel as first packet, halting");
            break;
        }

        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
    }

    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CtrCipher, SecureRandom};
    use crate::datacenter::{DC_IPV4, DC_PORT};
    use crate::handshake::{DC_IDX_POS, PROTO_TAG_POS};
    use crate::proxy::config::User;
    use std::net::IpAddr;
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    const TEST_SECRET_HEX: &str = "0123456789abcdef0123456789abcdef";

    fn test_config() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.users.push(User::from_hex("tester", TEST_SECRET_HEX).unwrap());
        config
    }

    fn replay_cache() -> Mutex<ReplayCache> {
        Mutex::new(ReplayCache::new(128))
    }

    /// Mirror of a genuine client: build the wire header and the client's
    /// stream ciphers for a given tag, destination index, and secret.
    fn build_client_hello(
        tag: ProtoTag,
        dc_index: i16,
        secret: &[u8],
    ) -> ([u8; SAMPLE_LEN], CtrCipher, CtrCipher) {
        let mut logical: [u8; SAMPLE_LEN] = loop {
            let candidate = SecureRandom::bytes();
            if !is_reserved_pattern(&candidate) {
                break candidate;
            }
        };
        logical[PROTO_TAG_POS..PROTO_TAG_POS + 4].copy_from_slice(&tag.bytes());
        logical[DC_IDX_POS..DC_IDX_POS + 2].copy_from_slice(&dc_index.to_le_bytes());

        // The relay derives its keys from the plain key region of the
        // wire bytes, so the client's encryptor is the relay's decryptor
        // and vice versa.
        let relay_keys = HandshakeSample::new(logical).derive_keys(Some(secret));
        let mut client_enc = relay_keys.decryptor();
        let client_dec = relay_keys.encryptor();

        let mut encrypted = logical;
        client_enc.apply(&mut encrypted);
        let mut wire = logical;
        wire[PROTO_TAG_POS..].copy_from_slice(&encrypted[PROTO_TAG_POS..]);

        // client_enc has consumed all 64 header bytes; it now lines up
        // with the relay-side decryptor for the stream that follows.
        (wire, client_enc, client_dec)
    }

    type Rx = ReadHalf<DuplexStream>;
    type Tx = WriteHalf<DuplexStream>;

    fn pair() -> ((Rx, Tx), (Rx, Tx)) {
        let (a, b) = duplex(1 << 16);
        (split(a), split(b))
    }

    #[tokio::test]
    async fn test_end_to_end_handshake_and_stream() {
        let config = test_config();
        let replays = replay_cache();
        let secret = hex::decode(TEST_SECRET_HEX).unwrap();

        let ((mut client_rx, mut client_tx), (relay_rx, relay_tx)) = pair();

        let (wire, mut client_enc, mut client_dec) =
            build_client_hello(ProtoTag::Abridged, 2, &secret);
        client_tx.write_all(&wire).await.unwrap();

        let mut payload = *b"ping over the disguised stream";
        client_enc.apply(&mut payload);
        client_tx.write_all(&payload).await.unwrap();

        let handshake = client_handshake(relay_rx, relay_tx, &config, &replays)
            .await
            .unwrap();
        let mut client = match handshake {
            ClientHandshake::Established(c) => c,
            ClientHandshake::Rejected => panic!("valid handshake rejected"),
        };

        assert_eq!(client.tag, ProtoTag::Abridged);
        assert_eq!(client.dc_index, 2);
        // abs(2) - 1 selects IPv4 table entry 1
        assert_eq!(client.dc_addr.ip(), IpAddr::V4(DC_IPV4[1]));
        assert_eq!(client.dc_addr.port(), DC_PORT);

        // Post-handshake bytes decrypt through the wrapped reader
        let mut buf = [0u8; 64];
        let n = client.reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping over the disguised stream");

        // And the reply direction is readable with the client's mirror
        client.writer.write_all(b"pong").await.unwrap();
        client.writer.flush().await.unwrap();
        let mut reply = [0u8; 4];
        client_rx.read_exact(&mut reply).await.unwrap();
        client_dec.apply(&mut reply);
        assert_eq!(&reply, b"pong");
    }

    #[tokio::test]
    async fn test_reserved_pattern_is_starved_without_reply() {
        let config = test_config();
        let replays = replay_cache();

        let ((mut client_rx, mut client_tx), (relay_rx, relay_tx)) = pair();

        let mut wire = [0x77u8; SAMPLE_LEN];
        wire[..4].copy_from_slice(b"GET ");
        client_tx.write_all(&wire).await.unwrap();
        // Half-close so the drain loop sees EOF while client_rx stays
        // open to observe the (absent) reply.
        client_tx.shutdown().await.unwrap();

        let handshake = client_handshake(relay_rx, relay_tx, &config, &replays)
            .await
            .unwrap();
        assert!(matches!(handshake, ClientHandshake::Rejected));

        // Nothing was ever written back: the client sees a bare EOF
        let mut buf = [0u8; 16];
        assert_eq!(client_rx.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_starved() {
        let config = test_config();
        let replays = replay_cache();

        let ((_, mut client_tx), (relay_rx, relay_tx)) = pair();

        let (wire, _, _) = build_client_hello(ProtoTag::Abridged, 1, b"wrong secret");
        client_tx.write_all(&wire).await.unwrap();
        drop(client_tx);

        let handshake = client_handshake(relay_rx, relay_tx, &config, &replays)
            .await
            .unwrap();
        assert!(matches!(handshake, ClientHandshake::Rejected));
    }

    #[tokio::test]
    async fn test_replayed_sample_is_starved() {
        let config = test_config();
        let replays = replay_cache();
        let secret = hex::decode(TEST_SECRET_HEX).unwrap();

        let (wire, _, _) = build_client_hello(ProtoTag::Intermediate, 1, &secret);

        let ((_, mut tx1), (rx1, wtx1)) = pair();
        tx1.write_all(&wire).await.unwrap();
        let first = client_handshake(rx1, wtx1, &config, &replays)
            .await
            .unwrap();
        assert!(matches!(first, ClientHandshake::Established(_)));

        // Byte-identical resend: the raw key material is already cached
        let ((_, mut tx2), (rx2, wtx2)) = pair();
        tx2.write_all(&wire).await.unwrap();
        drop(tx2);
        let second = client_handshake(rx2, wtx2, &config, &replays)
            .await
            .unwrap();
        assert!(matches!(second, ClientHandshake::Rejected));
    }

    #[tokio::test]
    async fn test_concurrent_identical_handshakes_admit_at_most_one() {
        let config = Arc::new(test_config());
        let replays = Arc::new(replay_cache());
        let secret = hex::decode(TEST_SECRET_HEX).unwrap();
        let (wire, _, _) = build_client_hello(ProtoTag::Abridged, 1, &secret);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let config = Arc::clone(&config);
            let replays = Arc::clone(&replays);
            tasks.push(tokio::spawn(async move {
                let ((_, mut tx), (rx, wtx)) = pair();
                tx.write_all(&wire).await.unwrap();
                tx.shutdown().await.unwrap();
                matches!(
                    client_handshake(rx, wtx, &config, &replays).await.unwrap(),
                    ClientHandshake::Established(_)
                )
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(replays.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_destination_fails_handshake() {
        let config = test_config();
        let secret = hex::decode(TEST_SECRET_HEX).unwrap();

        for bad_index in [0i16, 6, -6] {
            let replays = replay_cache();
            let ((_, mut tx), (rx, wtx)) = pair();
            let (wire, _, _) = build_client_hello(ProtoTag::Abridged, bad_index, &secret);
            tx.write_all(&wire).await.unwrap();
            drop(tx);

            let handshake = client_handshake(rx, wtx, &config, &replays)
                .await
                .unwrap();
            assert!(matches!(handshake, ClientHandshake::Rejected));
        }
    }

    #[tokio::test]
    async fn test_secure_only_rejects_weaker_tags() {
        let mut config = test_config();
        config.secure_only = true;
        let secret = hex::decode(TEST_SECRET_HEX).unwrap();

        let replays = replay_cache();
        let ((_, mut tx), (rx, wtx)) = pair();
        let (wire, _, _) = build_client_hello(ProtoTag::Abridged, 1, &secret);
        tx.write_all(&wire).await.unwrap();
        drop(tx);
        let handshake = client_handshake(rx, wtx, &config, &replays)
            .await
            .unwrap();
        assert!(matches!(handshake, ClientHandshake::Rejected));

        let replays = replay_cache();
        let ((_, mut tx), (rx, wtx)) = pair();
        let (wire, _, _) = build_client_hello(ProtoTag::Secure, 1, &secret);
        tx.write_all(&wire).await.unwrap();
        let handshake = client_handshake(rx, wtx, &config, &replays)
            .await
            .unwrap();
        assert!(matches!(handshake, ClientHandshake::Established(_)));
    }

    #[tokio::test]
    async fn test_backend_handshake_header_recoverable() {
        let ((mut backend_rx, _backend_tx), (relay_rx, relay_tx)) = pair();

        let client_keys = SessionKeys {
            dec_key: [1; 32],
            dec_iv: [2; 16],
            enc_key: [3; 32],
            enc_iv: [4; 16],
        };

        let mut backend = backend_handshake(relay_rx, relay_tx, ProtoTag::Secure, &client_keys, false)
            .await
            .unwrap();

        let mut header = [0u8; SAMPLE_LEN];
        backend_rx.read_exact(&mut header).await.unwrap();

        // The backend mirrors any server: keys from the plain region,
        // decrypt the whole header, find the tag.
        let backend_keys = HandshakeSample::new(header).derive_keys(None);
        let mut backend_dec = backend_keys.decryptor();
        let mut decrypted = header;
        backend_dec.apply(&mut decrypted);
        assert_eq!(
            ProtoTag::from_header(&decrypted, false),
            Some(ProtoTag::Secure)
        );

        // Stream bytes after the header decrypt with the same cipher
        backend.writer.write_all(b"forwarded").await.unwrap();
        backend.writer.flush().await.unwrap();
        let mut data = [0u8; 9];
        backend_rx.read_exact(&mut data).await.unwrap();
        backend_dec.apply(&mut data);
        assert_eq!(&data, b"forwarded");
    }

    #[tokio::test]
    async fn test_relay_backend_eof_cancels_client_direction() {
        let config = test_config();

        // client <-> relay and relay <-> backend, all identity transforms
        let ((mut client_rx, client_tx), (relay_client_rx, relay_client_tx)) = pair();
        let ((mut backend_rx, backend_tx), (relay_backend_rx, relay_backend_tx)) = pair();

        let mut cr = CryptoStreamReader::new(relay_client_rx, StreamTransform::Identity);
        let mut cw = CryptoStreamWriter::new(relay_client_tx, StreamTransform::Identity);
        let mut br = CryptoStreamReader::new(relay_backend_rx, StreamTransform::Identity);
        let mut bw = CryptoStreamWriter::new(relay_backend_tx, StreamTransform::Identity);

        let driver = tokio::spawn(async move {
            let mut backend_tx = backend_tx;
            backend_tx.write_all(b"from backend").await.unwrap();
            backend_tx.flush().await.unwrap();
            // Half-close the backend leg while the client leg stays open;
            // backend_rx must survive to observe the relay's shutdown.
            backend_tx.shutdown().await.unwrap();
        });

        relay(&mut cr, &mut cw, &mut br, &mut bw, &config, 1)
            .await
            .unwrap();
        driver.await.unwrap();

        // The client received the backend bytes and then EOF, without the
        // client leg ever finishing on its own
        let mut buf = [0u8; 64];
        let n = client_rx.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"from backend");
        assert_eq!(client_rx.read(&mut buf).await.unwrap(), 0);

        // The backend read side saw EOF as well (writer shut down)
        assert_eq!(backend_rx.read(&mut buf).await.unwrap(), 0);

        drop(client_tx);
    }

    #[tokio::test]
    async fn test_pump_blocks_probe_sentinel_first_packet() {
        let ((_, mut source_tx), (source_rx, _source_keep)) = pair();
        let ((mut sink_rx, _sink_keep), (_, sink_tx)) = pair();

        let mut reader = CryptoStreamReader::new(source_rx, StreamTransform::Identity);
        let mut writer = CryptoStreamWriter::new(sink_tx, StreamTransform::Identity);

        source_tx.write_all(&PROBE_SENTINEL).await.unwrap();
        source_tx.flush().await.unwrap();

        pump(&mut reader, &mut writer, 4096, true, 7, "test")
            .await
            .unwrap();

        // The sentinel was not forwarded; downstream only sees EOF
        let mut buf = [0u8; 16];
        assert_eq!(sink_rx.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pump_forwards_sentinel_when_block_mode_off() {
        let ((_, mut source_tx), (source_rx, _source_keep)) = pair();
        let ((mut sink_rx, _sink_keep), (_, sink_tx)) = pair();

        let mut reader = CryptoStreamReader::new(source_rx, StreamTransform::Identity);
        let mut writer = CryptoStreamWriter::new(sink_tx, StreamTransform::Identity);

        source_tx.write_all(&PROBE_SENTINEL).await.unwrap();
        source_tx.flush().await.unwrap();
        drop(source_tx);

        pump(&mut reader, &mut writer, 4096, false, 8, "test")
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        sink_rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, PROBE_SENTINEL);
    }

    #[test]
    fn test_transient_connect_classification() {
        assert!(is_transient_connect_error(&io::Error::from(
            io::ErrorKind::ConnectionRefused
        )));
        assert!(is_transient_connect_error(&io::Error::from(
            io::ErrorKind::HostUnreachable
        )));
        assert!(!is_transient_connect_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}

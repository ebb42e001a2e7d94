use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{Mutex as AsyncMutex, Notify},
};

use crate::{
    address::AddressGuard,
    allowlist::AllowList,
    dedup::{CloseCallback, DeduplicationManager, ReleaseHandle},
    error::Error,
    key::{PeerPublicKey, ProtoVersion},
    preamble::{LinkPreamble, PREAMBLE_LEN},
    security::SecurityLevel,
    transport::RawStream,
};

/// Deadline for reading the 38-byte preamble off a freshly accepted or
/// dialed stream.
const PREAMBLE_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// A single-writer, multi-reader slot: the handshake task writes into it
/// at most once, and any number of concurrent callers can await the same
/// value without consuming it.
///
/// Built on `tokio::sync::Notify` rather than `tokio::sync::oneshot`
/// because a oneshot receiver is consumed by its first `.await`, but
/// `peer_version()`/`peer_public_key()` must remain readable by every
/// caller for the lifetime of the connection.
struct Rendezvous<T: Clone> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T: Clone> Rendezvous<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    fn set(&self, value: T) {
        *self.slot.lock() = Some(value);
        self.notify.notify_waiters();
    }

    /// Like [`Self::set`], but a no-op if the slot is already occupied.
    /// Used by the failure path so an outcome already exposed earlier in
    /// the handshake (e.g. a version parsed before a later step rejected
    /// the connection) is never clobbered by the generic failure value.
    fn set_if_vacant(&self, value: T) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(value);
            self.notify.notify_waiters();
        }
    }

    async fn get(&self) -> T {
        loop {
            if let Some(value) = self.slot.lock().clone() {
                return value;
            }
            let notified = self.notify.notified();
            if let Some(value) = self.slot.lock().clone() {
                return value;
            }
            notified.await;
        }
    }
}

#[derive(Clone)]
enum Outcome<T> {
    Ready(T),
    Failed(Error),
}

struct HandshakeState {
    version: Rendezvous<Outcome<ProtoVersion>>,
    peer_key: Rendezvous<Outcome<PeerPublicKey>>,
    replay_ready: Rendezvous<()>,
}

impl HandshakeState {
    fn new() -> Self {
        Self {
            version: Rendezvous::new(),
            peer_key: Rendezvous::new(),
            replay_ready: Rendezvous::new(),
        }
    }
}

type BoxedRead = ReadHalf<Box<dyn RawStream>>;
type BoxedWrite = WriteHalf<Box<dyn RawStream>>;

/// A wrapped raw link running the mesh handshake in the background.
///
/// States: `connecting -> handshake_pending -> {ready, failed}`, with
/// `closed` orthogonal and reachable from any state. This is realized as
/// a spawned `tokio::task` writing into the [`HandshakeState`] rendezvous
/// slots and a `latched_error` slot that every public operation consults
/// first.
///
/// The raw stream is split into independent read and write halves (each
/// behind its own `tokio::sync::Mutex`) so that `write()` never blocks on
/// the handshake task's in-flight preamble read: writes pass through
/// without waiting on the handshake.
pub struct HandshakeConn {
    read_half: AsyncMutex<BoxedRead>,
    write_half: AsyncMutex<BoxedWrite>,
    state: Arc<HandshakeState>,
    latched_error: Mutex<Option<Error>>,
    replay_buf: Mutex<Option<Vec<u8>>>,
    release: Mutex<Option<ReleaseHandle>>,
    closed: AsyncMutex<bool>,
}

/// Inputs a `ConnectionManager` or listener supplies when wrapping a raw
/// link in a `HandshakeConn`.
pub struct HandshakeOptions {
    pub transport_key: Option<PeerPublicKey>,
    pub allow_list: AllowList,
    pub security_level: SecurityLevel,
    pub dedup: Option<Arc<DeduplicationManager>>,
    pub address_guard: AddressGuard,
}

impl HandshakeConn {
    pub fn new(stream: Box<dyn RawStream>, options: HandshakeOptions) -> Arc<Self> {
        let local_remote = (stream.local_addr(), stream.peer_addr());
        let (read_half, write_half) = tokio::io::split(stream);

        let conn = Arc::new(Self {
            read_half: AsyncMutex::new(read_half),
            write_half: AsyncMutex::new(write_half),
            state: Arc::new(HandshakeState::new()),
            latched_error: Mutex::new(None),
            replay_buf: Mutex::new(None),
            release: Mutex::new(None),
            closed: AsyncMutex::new(false),
        });

        let task_conn = conn.clone();
        tokio::spawn(async move {
            task_conn.run_handshake(options, local_remote).await;
        });

        conn
    }

    async fn run_handshake(
        self: Arc<Self>,
        options: HandshakeOptions,
        local_remote: (std::io::Result<std::net::SocketAddr>, std::io::Result<std::net::SocketAddr>),
    ) {
        if let Err(err) = self.check_addresses(&options.address_guard, local_remote) {
            self.fail(err).await;
            return;
        }

        let buf = match self.read_preamble_with_deadline().await {
            Ok(buf) => buf,
            Err(err) => {
                self.fail(err).await;
                return;
            }
        };

        let preamble = match LinkPreamble::parse(&buf) {
            Ok(preamble) => preamble,
            Err((err, version, peer_key)) => {
                if let Some(version) = version {
                    self.state.version.set(Outcome::Ready(version));
                }
                if let Some(peer_key) = peer_key {
                    self.state.peer_key.set(Outcome::Ready(peer_key));
                }
                self.fail(err).await;
                return;
            }
        };

        self.state.version.set(Outcome::Ready(preamble.version));
        self.state.peer_key.set(Outcome::Ready(preamble.peer_key));

        if let Some(transport_key) = options.transport_key {
            if transport_key != preamble.peer_key {
                self.fail(Error::TransportSecurityCheck {
                    expected: transport_key,
                    received: preamble.peer_key,
                })
                .await;
                return;
            }
        }

        if !options.allow_list.is_null() && !options.allow_list.is_allowed(Some(&preamble.peer_key)) {
            self.fail(Error::InvalidPeerKey(
                "peer public key is not in the allow list".into(),
            ))
            .await;
            return;
        }

        if let Some(dedup) = options.dedup {
            let close_conn = self.clone();
            let close: CloseCallback = Box::new(move || {
                let close_conn = close_conn.clone();
                tokio::spawn(async move {
                    close_conn.fail(Error::ClosedByDeduplicator).await;
                });
            });

            match dedup.check(preamble.peer_key, options.security_level, close) {
                Some(handle) => {
                    *self.release.lock() = Some(handle);
                }
                None => {
                    self.fail(Error::ClosedByDeduplicator).await;
                    return;
                }
            }
        }

        *self.replay_buf.lock() = Some(buf.to_vec());
        self.state.replay_ready.set(());
    }

    fn check_addresses(
        &self,
        guard: &AddressGuard,
        local_remote: (std::io::Result<std::net::SocketAddr>, std::io::Result<std::net::SocketAddr>),
    ) -> Result<(), Error> {
        let (local, remote) = local_remote;
        guard.check(local?.ip())?;
        guard.check(remote?.ip())?;
        Ok(())
    }

    async fn read_preamble_with_deadline(&self) -> Result<[u8; PREAMBLE_LEN], Error> {
        let mut buf = [0u8; PREAMBLE_LEN];
        let mut read_half = self.read_half.lock().await;
        match tokio::time::timeout(PREAMBLE_READ_TIMEOUT, read_half.read_exact(&mut buf)).await {
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => {
                drop(read_half);
                self.close_stream().await;
                Err(Error::ConnectionTimeout)
            }
        }
    }

    async fn fail(&self, err: Error) {
        self.latch(err.clone());
        self.state.version.set_if_vacant(Outcome::Failed(err.clone()));
        self.state.peer_key.set_if_vacant(Outcome::Failed(err));
        self.state.replay_ready.set(());
        self.close_stream().await;
    }

    fn latch(&self, err: Error) {
        let mut slot = self.latched_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    async fn close_stream(&self) {
        let mut closed = self.closed.lock().await;
        if *closed {
            return;
        }
        *closed = true;
        if let Some(release) = self.release.lock().take() {
            release.release();
        }
        let mut write_half = self.write_half.lock().await;
        let _ = write_half.shutdown().await;
    }

    /// Blocks until the version field has been parsed (or the handshake
    /// fails before reaching it).
    pub async fn peer_version(&self) -> Result<ProtoVersion, Error> {
        match self.state.version.get().await {
            Outcome::Ready(version) => Ok(version),
            Outcome::Failed(err) => Err(err),
        }
    }

    /// Blocks until the peer key field has been parsed (or the handshake
    /// fails before reaching it).
    pub async fn peer_public_key(&self) -> Result<PeerPublicKey, Error> {
        match self.state.peer_key.get().await {
            Outcome::Ready(key) => Ok(key),
            Outcome::Failed(err) => Err(err),
        }
    }

    /// Blocks until handshake completes, then drains the 38-byte replay
    /// buffer before forwarding to the raw stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, Error> {
        self.state.replay_ready.get().await;
        if let Some(err) = self.latched_error.lock().clone() {
            return Err(err);
        }

        {
            let mut replay = self.replay_buf.lock();
            if let Some(remaining) = replay.as_mut() {
                let n = remaining.len().min(buf.len());
                buf[..n].copy_from_slice(&remaining[..n]);
                remaining.drain(..n);
                if remaining.is_empty() {
                    *replay = None;
                }
                if n > 0 {
                    return Ok(n);
                }
            }
        }

        let mut read_half = self.read_half.lock().await;
        let n = read_half.read(buf).await?;
        drop(read_half);

        if let Some(err) = self.latched_error.lock().clone() {
            return Err(err);
        }
        Ok(n)
    }

    /// Writes pass through without waiting on the handshake: the wire
    /// protocol permits speaking before the peer's announcement has been
    /// read.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, Error> {
        if let Some(err) = self.latched_error.lock().clone() {
            return Err(err);
        }
        let mut write_half = self.write_half.lock().await;
        let n = write_half.write(buf).await?;
        drop(write_half);

        if let Some(err) = self.latched_error.lock().clone() {
            return Err(err);
        }
        Ok(n)
    }

    /// Idempotent. Invokes the dedup release callback once and closes the
    /// underlying stream. Returns whatever error had already latched, if
    /// any.
    pub async fn close(&self) -> Result<(), Error> {
        self.close_stream().await;
        if let Some(err) = self.latched_error.lock().clone() {
            return Err(err);
        }
        Ok(())
    }
}

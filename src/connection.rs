//! TCP link to the controller.
//!
//! The socket is split on connect: the read half moves into a background
//! session task that scans frames and reconnects when the link drops, the
//! write half stays behind a lock so commands never interleave on the wire.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ReconnectConfig, CONNECT_TIMEOUT, IDLE_READ_BACKOFF};
use crate::packet::{Packet, FRAME_LEN};
use crate::scanner::FrameScanner;
use crate::{Error, Result};

const READ_CHUNK: usize = 1024;

pub type PacketCallback = Arc<dyn Fn(Packet) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub connect_timeout: Duration,
    /// Pause after a read that found no data.
    pub idle_backoff: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            idle_backoff: IDLE_READ_BACKOFF,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Owns the single socket to one controller.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    addr: String,
    options: ConnectionOptions,
    link: tokio::sync::Mutex<Link>,
    // Token of the newest session, reachable without the link lock so a
    // disconnect can interrupt a send that holds it.
    active: Mutex<CancellationToken>,
    callback: RwLock<Option<PacketCallback>>,
    state: AtomicU8,
}

#[derive(Default)]
struct Link {
    writer: Option<OwnedWriteHalf>,
    session: Option<Session>,
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            warn!("receive task panicked: {e}");
        }
    }
}

enum Exit {
    Cancelled,
    PeerClosed,
    Failed(std::io::Error),
}

impl ConnectionManager {
    pub fn new(addr: impl Into<String>) -> Self {
        Self::with_options(addr, ConnectionOptions::default())
    }

    pub fn with_options(addr: impl Into<String>, options: ConnectionOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                addr: addr.into(),
                options,
                link: tokio::sync::Mutex::new(Link::default()),
                active: Mutex::new(CancellationToken::new()),
                callback: RwLock::new(None),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Register the single subscriber for inbound packets. It runs on the
    /// receive task, once per decoded frame, and replaces any earlier one.
    pub fn set_inbound_callback(&self, f: impl Fn(Packet) + Send + Sync + 'static) {
        let mut slot = match self.inner.callback.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(f));
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the socket and start the receive loop. No-op when connected.
    pub async fn connect(&self) -> Result<()> {
        let mut link = self.inner.link.lock().await;
        if link.writer.is_some() {
            return Ok(());
        }
        self.inner.establish(&mut link).await
    }

    /// Write one frame, connecting first if needed. A short write tears the
    /// connection down; the frame is never resumed.
    pub async fn send(&self, packet: &Packet) -> Result<()> {
        let mut link = self.inner.link.lock().await;
        if link.writer.is_none() {
            debug!(addr = %self.inner.addr, "not connected, connecting before send");
            self.inner.establish(&mut link).await?;
        }

        let cancel = link
            .session
            .as_ref()
            .map(|s| s.cancel.clone())
            .unwrap_or_default();
        let Some(writer) = link.writer.as_mut() else {
            return Err(Error::NotConnected);
        };

        let bytes = packet.to_bytes();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::NotConnected),
            written = writer.write(&bytes) => match written {
                Ok(FRAME_LEN) => Ok(()),
                Ok(n) => Err(Error::PartialWrite { written: n }),
                Err(e) => Err(Error::Io(e)),
            },
        };

        match &result {
            Ok(()) => trace!(%packet, "frame sent"),
            Err(e) => {
                error!(error = %e, %packet, "send failed, disconnecting");
                let session = self.inner.teardown(&mut link);
                drop(link);
                if let Some(session) = session {
                    session.stop().await;
                }
            }
        }
        result
    }

    /// Stop the receive loop and close the socket. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        self.inner.current_token().cancel();
        let mut link = self.inner.link.lock().await;
        let session = self.inner.teardown(&mut link);
        drop(link);
        if let Some(session) = session {
            session.stop().await;
            debug!(addr = %self.inner.addr, "disconnected");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.current_token().cancel();
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn current_token(&self) -> CancellationToken {
        lock(&self.active).clone()
    }

    async fn establish(self: &Arc<Self>, link: &mut Link) -> Result<()> {
        // A session still trying to reconnect is superseded by this one.
        if let Some(old) = link.session.take() {
            old.cancel.cancel();
        }
        link.writer = None;

        self.set_state(ConnectionState::Connecting);
        debug!(addr = %self.addr, "connecting");
        let stream = match open(&self.addr, self.options.connect_timeout).await {
            Ok(s) => s,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let (reader, writer) = stream.into_split();
        let cancel = CancellationToken::new();
        *lock(&self.active) = cancel.clone();
        let task = tokio::spawn(Arc::clone(self).run_session(reader, cancel.clone()));
        link.writer = Some(writer);
        link.session = Some(Session { cancel, task });
        self.set_state(ConnectionState::Connected);
        debug!(addr = %self.addr, "connected");
        Ok(())
    }

    /// Drop the writer and cancel the session while the link is held, so the
    /// receive task cannot reconnect behind this teardown.
    fn teardown(&self, link: &mut Link) -> Option<Session> {
        link.writer = None;
        self.set_state(ConnectionState::Disconnected);
        let session = link.session.take();
        if let Some(session) = &session {
            session.cancel.cancel();
        }
        session
    }

    async fn run_session(self: Arc<Self>, mut reader: OwnedReadHalf, cancel: CancellationToken) {
        let mut scanner = FrameScanner::new();
        loop {
            match self.receive(&reader, &mut scanner, &cancel).await {
                Exit::Cancelled => break,
                Exit::PeerClosed => debug!(addr = %self.addr, "peer closed connection"),
                Exit::Failed(e) => warn!(addr = %self.addr, error = %e, "read failed"),
            }

            scanner.clear();
            if !self.mark_lost(&cancel).await {
                break;
            }
            match self.reconnect(&cancel).await {
                Some(r) => reader = r,
                None => break,
            }
        }
        trace!(addr = %self.addr, "receive loop exiting");
    }

    async fn receive(
        &self,
        reader: &OwnedReadHalf,
        scanner: &mut FrameScanner,
        cancel: &CancellationToken,
    ) -> Exit {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Exit::Cancelled,
                ready = reader.readable() => {
                    if let Err(e) = ready {
                        return Exit::Failed(e);
                    }
                }
            }

            match reader.try_read(&mut buf) {
                Ok(0) => return Exit::PeerClosed,
                Ok(n) => {
                    trace!(bytes = n, "read");
                    scanner.extend(&buf[..n]);
                    for packet in scanner.frames() {
                        self.dispatch(packet);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Exit::Cancelled,
                        _ = tokio::time::sleep(self.options.idle_backoff) => {}
                    }
                }
                Err(e) => return Exit::Failed(e),
            }
        }
    }

    fn dispatch(&self, packet: Packet) {
        let callback = match self.callback.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(callback) = callback {
            callback(packet);
        }
    }

    /// Drop the dead writer. Returns false if this session was superseded
    /// or stopped in the meantime.
    async fn mark_lost(&self, cancel: &CancellationToken) -> bool {
        let mut link = self.link.lock().await;
        if cancel.is_cancelled() {
            return false;
        }
        link.writer = None;
        self.set_state(ConnectionState::Disconnected);
        true
    }

    async fn reconnect(&self, cancel: &CancellationToken) -> Option<OwnedReadHalf> {
        let backoff = &self.options.reconnect;
        let mut attempt: u32 = 0;
        loop {
            if let Some(max) = backoff.max_retries
                && attempt >= max
            {
                error!(addr = %self.addr, max_retries = max, "reconnection limit reached, giving up");
                return None;
            }

            let delay = backoff.delay(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let mut link = self.link.lock().await;
            if cancel.is_cancelled() {
                return None;
            }
            self.set_state(ConnectionState::Connecting);
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                opened = open(&self.addr, self.options.connect_timeout) => opened,
            };
            match opened {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    link.writer = Some(writer);
                    self.set_state(ConnectionState::Connected);
                    info!(addr = %self.addr, attempt, "reconnected");
                    return Some(reader);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(addr = %self.addr, attempt, error = %e, "reconnect failed");
                }
            }
            drop(link);
            attempt += 1;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn open(addr: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "could not disable nagle");
            }
            Ok(stream)
        }
        Ok(Err(source)) => Err(Error::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(Error::Connect {
            addr: addr.to_string(),
            source: std::io::Error::new(ErrorKind::TimedOut, "connect timed out"),
        }),
    }
}

//! User-facing connection handle.
//!
//! A [`Session`] owns the queues into and out of a spawned
//! [`crate::engine::Engine`] task.  Payloads pushed with `send` come out of
//! the peer's `recv` in the same order, each as one datagram-sized message.
//! The engine reconnects on its own after failures; the session outlives
//! individual connection incarnations and only [`Session::close`] (or
//! dropping it) stops the machinery for good.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{ConfigError, RssiConfig};
use crate::engine::Engine;
use crate::stats::{RssiStats, StatsSnapshot};
use crate::transport::Transport;

/// Which side of the connection this end plays.  The server listens and
/// supervises peer liveness; the client dials and sends keep-alives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Role::Server => "server",
            Role::Client => "client",
        })
    }
}

/// Coarse connection state observable by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Closed,
    /// Handshake (or reconnect back-off) in progress.
    Connecting,
    Open,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The engine has been torn down; no further traffic is possible.
    #[error("session is not open")]
    NotOpen,
    /// A bounded-time operation ran out of time.
    #[error("operation timed out")]
    Timeout,
    /// A non-blocking operation found no queue space / no pending data.
    #[error("operation would block")]
    WouldBlock,
}

/// Handle to one running connection engine.
pub struct Session {
    inp_tx: mpsc::Sender<Vec<u8>>,
    out_rx: mpsc::Receiver<Vec<u8>>,
    state_rx: watch::Receiver<ConnState>,
    stats: Arc<RssiStats>,
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Session {
    /// Start a passive (listening) endpoint on `transport`.
    pub fn server<T: Transport>(transport: T, cfg: RssiConfig) -> Result<Self, ConfigError> {
        Self::spawn(Role::Server, transport, cfg)
    }

    /// Start an active (dialing) endpoint on `transport`.
    pub fn client<T: Transport>(transport: T, cfg: RssiConfig) -> Result<Self, ConfigError> {
        Self::spawn(Role::Client, transport, cfg)
    }

    fn spawn<T: Transport>(
        role: Role,
        transport: T,
        cfg: RssiConfig,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let depth = cfg.effective_queue_depth();
        let (inp_tx, inp_rx) = mpsc::channel(depth);
        let (out_tx, out_rx) = mpsc::channel(depth);
        let (state_tx, state_rx) = watch::channel(ConnState::Closed);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let stats = Arc::new(RssiStats::new());
        let engine = Engine::new(
            role,
            cfg,
            transport,
            Arc::clone(&stats),
            inp_rx,
            out_tx,
            state_tx,
            shutdown_rx,
        );
        let handle = tokio::spawn(engine.run());
        Ok(Self {
            inp_tx,
            out_rx,
            state_rx,
            stats,
            shutdown_tx,
            handle,
        })
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Queue one payload for reliable delivery, waiting for queue space.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.inp_tx.send(data).await.map_err(|_| SessionError::NotOpen)
    }

    /// Queue one payload without waiting.
    pub fn try_send(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.inp_tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SessionError::WouldBlock,
            mpsc::error::TrySendError::Closed(_) => SessionError::NotOpen,
        })
    }

    /// Queue one payload, waiting at most `timeout` for queue space.
    pub async fn send_timeout(&self, data: Vec<u8>, timeout: Duration) -> Result<(), SessionError> {
        match tokio::time::timeout(timeout, self.send(data)).await {
            Ok(res) => res,
            Err(_) => Err(SessionError::Timeout),
        }
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// Wait for the next in-order payload from the peer.
    pub async fn recv(&mut self) -> Result<Vec<u8>, SessionError> {
        self.out_rx.recv().await.ok_or(SessionError::NotOpen)
    }

    /// Take a pending payload without waiting.
    pub fn try_recv(&mut self) -> Result<Vec<u8>, SessionError> {
        self.out_rx.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => SessionError::WouldBlock,
            mpsc::error::TryRecvError::Disconnected => SessionError::NotOpen,
        })
    }

    /// Wait at most `timeout` for the next payload.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Vec<u8>, SessionError> {
        match tokio::time::timeout(timeout, self.out_rx.recv()).await {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(SessionError::NotOpen),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    // -----------------------------------------------------------------------
    // Observation and teardown
    // -----------------------------------------------------------------------

    /// Current coarse connection state.
    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// Block until the connection reaches `Open` (e.g. after start-up or a
    /// reconnect).  Fails only when the engine is gone.
    pub async fn wait_open(&mut self) -> Result<(), SessionError> {
        self.state_rx
            .wait_for(|s| *s == ConnState::Open)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::NotOpen)
    }

    /// Point-in-time copy of the engine counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Tear the connection down (a RST goes out when connected) and wait
    /// for the engine task to finish.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.handle.await;
    }
}

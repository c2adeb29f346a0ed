//! In-process transport for tests and demos.
//!
//! [`pair`] returns two connected [`SimTransport`] ends backed by channels.
//! Loss is modeled deterministically through [`FaultConfig`] so tests can
//! reproduce retransmission behavior exactly.

use std::num::NonZeroU64;

use log::debug;
use tokio::sync::mpsc;

use crate::transport::Transport;

/// Deterministic fault model applied on the sending side.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    /// Drop every n-th outgoing segment (1-based count). `None` is a
    /// transparent link.
    pub drop_every: Option<NonZeroU64>,
}

/// One end of a simulated duplex link.
#[derive(Debug)]
pub struct SimTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    faults: FaultConfig,
    sent: u64,
    mtu: usize,
}

/// Create a connected pair of transports with `depth` segments of buffering
/// per direction. `a_faults` applies to segments sent by the first end,
/// `b_faults` to the second.
pub fn pair(depth: usize, a_faults: FaultConfig, b_faults: FaultConfig) -> (SimTransport, SimTransport) {
    let (a_tx, b_rx) = mpsc::channel(depth);
    let (b_tx, a_rx) = mpsc::channel(depth);
    let mk = |tx, rx, faults| SimTransport {
        tx,
        rx,
        faults,
        sent: 0,
        mtu: 1024,
    };
    (mk(a_tx, a_rx, a_faults), mk(b_tx, b_rx, b_faults))
}

/// A transparent pair with default buffering.
pub fn loopback() -> (SimTransport, SimTransport) {
    pair(64, FaultConfig::default(), FaultConfig::default())
}

impl SimTransport {
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu;
    }
}

impl Transport for SimTransport {
    async fn send(&mut self, seg: Vec<u8>) -> bool {
        self.sent += 1;
        if let Some(n) = self.faults.drop_every {
            if self.sent % n.get() == 0 {
                debug!("sim link dropping segment #{}", self.sent);
                return false;
            }
        }
        self.tx.send(seg).await.is_ok()
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transparent_link_delivers_in_order() {
        let (mut a, mut b) = loopback();
        for i in 0u8..5 {
            assert!(a.send(vec![i]).await);
        }
        for i in 0u8..5 {
            assert_eq!(b.recv().await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn drop_every_third_segment() {
        let faults = FaultConfig {
            drop_every: NonZeroU64::new(3),
        };
        let (mut a, mut b) = pair(16, faults, FaultConfig::default());
        for i in 0u8..6 {
            a.send(vec![i]).await;
        }
        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(b.recv().await.unwrap()[0]);
        }
        assert_eq!(got, vec![0, 1, 3, 4]);
    }

    #[tokio::test]
    async fn closed_peer_ends_recv() {
        let (a, mut b) = loopback();
        drop(a);
        assert!(b.recv().await.is_none());
    }
}

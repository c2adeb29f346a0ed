//! Engine counters.
//!
//! One [`RssiStats`] is shared between the engine task and the user-facing
//! session handle, so the counters are atomics updated with relaxed ordering
//! (they are diagnostics, not synchronization). [`RssiStats::snapshot`]
//! yields a plain struct for display or assertions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RssiStats {
    /// Outgoing segments dropped (transport refused, or oversized payload).
    pub outgoing_dropped: AtomicU64,
    /// Segments re-sent by the retransmission pass.
    pub rex_segments: AtomicU64,
    /// Retransmission timer expirations.
    pub rex_timeouts: AtomicU64,
    /// Delayed-ack timer expirations.
    pub ack_timeouts: AtomicU64,
    /// Keep-alive timer expirations.
    pub nul_timeouts: AtomicU64,
    /// Connections declared failed (retransmissions exhausted or the
    /// server's peer-liveness deadline passed).
    pub conn_failed: AtomicU64,
    /// Inbound segments dropped for a checksum mismatch.
    pub bad_checksum: AtomicU64,
    /// Inbound segments dropped for a malformed header.
    pub bad_hdr_dropped: AtomicU64,
    /// Inbound SYN segments dropped as malformed.
    pub bad_syn_dropped: AtomicU64,
    /// Inbound segments rejected by the state machine (wrong flags for the
    /// state, or outside the reassembly window).
    pub rejected_segs: AtomicU64,
    /// Keep-alive NULs replaced by a plain ack because the window was full.
    pub skipped_nuls: AtomicU64,
    /// Our segments the peer has cumulatively acknowledged.
    pub segs_acked_by_peer: AtomicU64,
    /// Payload segments delivered to the user in order.
    pub segs_given_to_user: AtomicU64,
    /// Inbound segments carrying the busy flag.
    pub busy_flags_rx: AtomicU64,
    /// Outgoing segments on which we set the busy flag.
    pub busy_flags_tx: AtomicU64,
    /// Retransmission passes triggered by the peer deasserting busy.
    pub busy_deassert_rex: AtomicU64,
}

macro_rules! bump {
    ($($name:ident),+ $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self) {
                self.$name.fetch_add(1, Ordering::Relaxed);
            }
        )+
    };
}

impl RssiStats {
    pub fn new() -> Self {
        Self::default()
    }

    bump!(
        outgoing_dropped,
        rex_timeouts,
        ack_timeouts,
        nul_timeouts,
        conn_failed,
        bad_checksum,
        bad_hdr_dropped,
        bad_syn_dropped,
        rejected_segs,
        skipped_nuls,
        segs_given_to_user,
        busy_flags_rx,
        busy_flags_tx,
        busy_deassert_rex,
    );

    #[inline]
    pub fn rex_segments(&self, n: u64) {
        self.rex_segments.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn segs_acked_by_peer(&self, n: u64) {
        self.segs_acked_by_peer.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            outgoing_dropped: get(&self.outgoing_dropped),
            rex_segments: get(&self.rex_segments),
            rex_timeouts: get(&self.rex_timeouts),
            ack_timeouts: get(&self.ack_timeouts),
            nul_timeouts: get(&self.nul_timeouts),
            conn_failed: get(&self.conn_failed),
            bad_checksum: get(&self.bad_checksum),
            bad_hdr_dropped: get(&self.bad_hdr_dropped),
            bad_syn_dropped: get(&self.bad_syn_dropped),
            rejected_segs: get(&self.rejected_segs),
            skipped_nuls: get(&self.skipped_nuls),
            segs_acked_by_peer: get(&self.segs_acked_by_peer),
            segs_given_to_user: get(&self.segs_given_to_user),
            busy_flags_rx: get(&self.busy_flags_rx),
            busy_flags_tx: get(&self.busy_flags_tx),
            busy_deassert_rex: get(&self.busy_deassert_rex),
        }
    }
}

/// Point-in-time copy of the engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub outgoing_dropped: u64,
    pub rex_segments: u64,
    pub rex_timeouts: u64,
    pub ack_timeouts: u64,
    pub nul_timeouts: u64,
    pub conn_failed: u64,
    pub bad_checksum: u64,
    pub bad_hdr_dropped: u64,
    pub bad_syn_dropped: u64,
    pub rejected_segs: u64,
    pub skipped_nuls: u64,
    pub segs_acked_by_peer: u64,
    pub segs_given_to_user: u64,
    pub busy_flags_rx: u64,
    pub busy_flags_tx: u64,
    pub busy_deassert_rex: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "outgoing dropped ....... {}", self.outgoing_dropped)?;
        writeln!(f, "retransmitted segs ..... {}", self.rex_segments)?;
        writeln!(f, "retransmit timeouts .... {}", self.rex_timeouts)?;
        writeln!(f, "delayed-ack timeouts ... {}", self.ack_timeouts)?;
        writeln!(f, "keep-alive timeouts .... {}", self.nul_timeouts)?;
        writeln!(f, "connections failed ..... {}", self.conn_failed)?;
        writeln!(f, "bad checksum ........... {}", self.bad_checksum)?;
        writeln!(f, "bad header dropped ..... {}", self.bad_hdr_dropped)?;
        writeln!(f, "bad SYN dropped ........ {}", self.bad_syn_dropped)?;
        writeln!(f, "rejected segments ...... {}", self.rejected_segs)?;
        writeln!(f, "skipped NULs ........... {}", self.skipped_nuls)?;
        writeln!(f, "acked by peer .......... {}", self.segs_acked_by_peer)?;
        writeln!(f, "delivered to user ...... {}", self.segs_given_to_user)?;
        writeln!(f, "busy flags received .... {}", self.busy_flags_rx)?;
        writeln!(f, "busy flags sent ........ {}", self.busy_flags_tx)?;
        write!(f, "busy-deassert rex ...... {}", self.busy_deassert_rex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_accumulate() {
        let stats = RssiStats::new();
        stats.rex_timeouts();
        stats.rex_timeouts();
        stats.rex_segments(5);
        stats.segs_acked_by_peer(3);
        let snap = stats.snapshot();
        assert_eq!(snap.rex_timeouts, 2);
        assert_eq!(snap.rex_segments, 5);
        assert_eq!(snap.segs_acked_by_peer, 3);
        assert_eq!(snap.conn_failed, 0);
    }

    #[test]
    fn shared_across_threads() {
        let stats = Arc::new(RssiStats::new());
        let writer = Arc::clone(&stats);
        let handle = std::thread::spawn(move || {
            for _ in 0..100 {
                writer.segs_given_to_user();
            }
        });
        handle.join().unwrap();
        assert_eq!(stats.snapshot().segs_given_to_user, 100);
    }

    #[test]
    fn display_lists_every_counter() {
        let text = StatsSnapshot::default().to_string();
        assert!(text.contains("retransmit timeouts"));
        assert!(text.contains("busy-deassert rex"));
        assert_eq!(text.lines().count(), 16);
    }
}

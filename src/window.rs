//! Sliding-window ring buffers.
//!
//! Two fixed-capacity (power-of-two) rings of segments:
//!
//! - [`SendWindow`] — segments sent but not yet cumulatively acknowledged,
//!   kept for retransmission.  At most the peer's advertised window may be
//!   occupied; admission is gated by the state machine, so overflowing the
//!   ring is a programming error.
//! - [`ReassemblyWindow`] — segments received out of order, held until they
//!   become contiguous and can be drained in sequence.
//!
//! Sequence numbers are a single byte and **always** compared with wrapping
//! arithmetic; the rings track the sequence number of their oldest slot and
//! derive everything else from offsets.
//!
//! These types only manage state; all socket I/O is the caller's
//! responsibility.

/// Next sequence number after `s`, modulo 256.
#[inline]
pub fn next_seq(s: u8) -> u8 {
    s.wrapping_add(1)
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Ring of outgoing segments awaiting a cumulative acknowledgment.
///
/// # Sequence-number layout
///
/// ```text
///   oldest                      oldest + len - 1
///      │                              │
///  ────┼──────────────────────────────┼─────▶ seq space (mod 256)
///      │ <──────── unacked ─────────▶ │
/// ```
#[derive(Debug)]
pub struct SendWindow {
    buf: Vec<Option<Vec<u8>>>,
    rp: usize,
    wp: usize,
    mask: usize,
    /// Sequence number of the slot at `rp`.
    oldest: u8,
}

impl SendWindow {
    /// Create a window with capacity `2^ld_capacity` slots.
    pub fn new(ld_capacity: u8) -> Self {
        let capacity = 1usize << ld_capacity;
        Self {
            buf: vec![None; capacity],
            rp: 0,
            wp: 0,
            mask: capacity - 1,
            oldest: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of segments currently awaiting acknowledgment.
    pub fn len(&self) -> usize {
        self.wp.wrapping_sub(self.rp)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number of the oldest outstanding segment.
    pub fn oldest(&self) -> u8 {
        self.oldest
    }

    /// Remember the sequence number the next pushed segment will carry.
    /// Called once per handshake, before the SYN enters the ring.
    pub fn seed(&mut self, seq: u8) {
        self.oldest = seq;
    }

    /// Append a just-transmitted segment.
    ///
    /// # Panics
    ///
    /// Panics if the ring is already at capacity.  Admission is gated on
    /// the peer's advertised window upstream, so this must never happen.
    pub fn push(&mut self, seg: Vec<u8>) {
        if self.len() >= self.capacity() {
            panic!("send window overflow ({} slots)", self.capacity());
        }
        self.buf[self.wp & self.mask] = Some(seg);
        self.wp = self.wp.wrapping_add(1);
    }

    fn pop(&mut self) -> Option<Vec<u8>> {
        let seg = self.buf[self.rp & self.mask].take();
        if seg.is_some() {
            self.rp = self.rp.wrapping_add(1);
            self.oldest = next_seq(self.oldest);
        }
        seg
    }

    /// Process a cumulative acknowledgment.
    ///
    /// Every segment whose sequence number lies in `[oldest, ack_no]`
    /// (inclusive, mod 256) is released.  Returns the number of segments
    /// released, or `None` when the ack does not fit the window — a
    /// malformed or duplicate ack the caller must discard as a no-op.
    pub fn ack(&mut self, ack_no: u8) -> Option<usize> {
        let cum = ack_no.wrapping_sub(self.oldest).wrapping_add(1) as usize;
        if cum > self.len() {
            return None;
        }
        for _ in 0..cum {
            self.pop();
        }
        Some(cum)
    }

    /// Iterate over all unacked segments from oldest to newest, mutably so
    /// a retransmission pass can refresh per-transmission header fields.
    /// The order must match the original transmission order even after the
    /// ring has wrapped.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Vec<u8>> {
        let start = self.rp & self.mask;
        let len = self.len();
        // The live slots are `len` consecutive ring positions beginning at
        // `start`; walking tail-then-head visits them in sequence order.
        let (head, tail) = self.buf.split_at_mut(start);
        tail.iter_mut()
            .chain(head.iter_mut())
            .take(len)
            .filter_map(|s| s.as_mut())
    }

    /// Collect clones of all unacked segments in sequence order.
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(self.len());
        let mut p = self.rp;
        while p != self.wp {
            if let Some(seg) = &self.buf[p & self.mask] {
                out.push(seg.clone());
            }
            p = p.wrapping_add(1);
        }
        out
    }

    /// Drop everything; the oldest-sequence seed is re-established by the
    /// next handshake.
    pub fn purge(&mut self) {
        while self.pop().is_some() {}
    }

    /// Grow the ring to at least `new_capacity` slots (rounded up to a
    /// power of two), preserving queued segments and the oldest-sequence
    /// seed.  Only legal at handshake time.
    pub fn resize(&mut self, new_capacity: usize) {
        let oldest = self.oldest;
        let mut kept = Vec::with_capacity(self.len());
        while let Some(seg) = self.pop() {
            kept.push(seg);
        }
        let capacity = new_capacity.next_power_of_two();
        self.buf = vec![None; capacity];
        self.mask = capacity - 1;
        self.rp = 0;
        self.wp = 0;
        self.oldest = oldest;
        for seg in kept {
            self.push(seg);
        }
    }
}

// ---------------------------------------------------------------------------
// ReassemblyWindow
// ---------------------------------------------------------------------------

/// Ring of inbound segments indexed by their offset from the next expected
/// sequence number.
///
/// The acceptance `limit` is the negotiated inbound window and is
/// independent of the physical capacity, which may be larger to leave
/// resizing headroom.
#[derive(Debug)]
pub struct ReassemblyWindow {
    buf: Vec<Option<Vec<u8>>>,
    rp: usize,
    mask: usize,
    /// Next expected in-order sequence number.
    oldest: u8,
    limit: u8,
}

impl ReassemblyWindow {
    /// Capacity is `2^ld_capacity` slots; `limit` is the negotiated
    /// acceptance window and may be anything up to the capacity.
    pub fn new(ld_capacity: u8, limit: u8) -> Self {
        let capacity = 1usize << ld_capacity;
        debug_assert!(limit as usize <= capacity);
        Self {
            buf: vec![None; capacity],
            rp: 0,
            mask: capacity - 1,
            oldest: 0,
            limit,
        }
    }

    /// Establish the first expected sequence number (from the handshake).
    pub fn seed(&mut self, seq: u8) {
        self.oldest = seq;
    }

    /// `true` when `seq` falls inside the acceptance window.
    pub fn can_accept(&self, seq: u8) -> bool {
        seq.wrapping_sub(self.oldest) < self.limit
    }

    /// File a segment under its sequence number.  A duplicate overwrites
    /// the earlier copy of the same segment.
    ///
    /// # Panics
    ///
    /// Panics when `seq` is outside the acceptance window; callers must
    /// check [`can_accept`](Self::can_accept) first.
    pub fn store(&mut self, seq: u8, seg: Vec<u8>) {
        let off = seq.wrapping_sub(self.oldest);
        if off >= self.limit {
            panic!("reassembly store outside acceptance window");
        }
        let idx = (self.rp.wrapping_add(off as usize)) & self.mask;
        self.buf[idx] = Some(seg);
    }

    /// The next in-order segment, if it has arrived.
    pub fn peek_oldest(&self) -> Option<&Vec<u8>> {
        self.buf[self.rp & self.mask].as_ref()
    }

    /// Remove and return the next in-order segment, advancing the window.
    pub fn pop_oldest(&mut self) -> Option<Vec<u8>> {
        let seg = self.buf[self.rp & self.mask].take();
        if seg.is_some() {
            self.rp = self.rp.wrapping_add(1);
            self.oldest = next_seq(self.oldest);
        }
        seg
    }

    /// Sequence number of the newest segment delivered in order; this is
    /// what we acknowledge.
    pub fn last_in_order(&self) -> u8 {
        self.oldest.wrapping_sub(1)
    }

    /// Drop all held segments without moving the window.
    pub fn purge(&mut self) {
        for slot in &mut self.buf {
            *slot = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(tag: u8) -> Vec<u8> {
        vec![tag; 4]
    }

    #[test]
    fn send_initial_state() {
        let w = SendWindow::new(4);
        assert_eq!(w.capacity(), 16);
        assert_eq!(w.len(), 0);
        assert!(w.is_empty());
    }

    #[test]
    fn cumulative_ack_releases_range() {
        let mut w = SendWindow::new(4);
        w.seed(10);
        for i in 0..5 {
            w.push(seg(i));
        }
        // ack 12 covers seqs 10, 11, 12.
        assert_eq!(w.ack(12), Some(3));
        assert_eq!(w.len(), 2);
        assert_eq!(w.oldest(), 13);
    }

    #[test]
    fn ack_of_everything_empties_window() {
        let mut w = SendWindow::new(4);
        w.seed(0);
        for i in 0..4 {
            w.push(seg(i));
        }
        assert_eq!(w.ack(3), Some(4));
        assert!(w.is_empty());
        assert_eq!(w.oldest(), 4);
    }

    #[test]
    fn duplicate_ack_is_noop() {
        let mut w = SendWindow::new(4);
        w.seed(100);
        w.push(seg(0));
        assert_eq!(w.ack(100), Some(1));
        // ack_no = oldest - 1 now; cumulative count is zero.
        assert_eq!(w.ack(100), Some(0));
        assert!(w.is_empty());
    }

    #[test]
    fn ack_beyond_window_rejected() {
        let mut w = SendWindow::new(4);
        w.seed(0);
        w.push(seg(0));
        w.push(seg(1));
        assert_eq!(w.ack(5), None, "ack for unsent data must be discarded");
        assert_eq!(w.len(), 2, "a rejected ack must not disturb the window");
    }

    #[test]
    fn ack_across_wraparound() {
        let mut w = SendWindow::new(4);
        w.seed(254);
        for i in 0..4 {
            w.push(seg(i)); // seqs 254, 255, 0, 1
        }
        assert_eq!(w.ack(0), Some(3));
        assert_eq!(w.oldest(), 1);
        assert_eq!(w.ack(1), Some(1));
        assert!(w.is_empty());
    }

    #[test]
    fn exhaustive_seq_arithmetic() {
        // For every base and burst length, acking the k-th segment releases
        // exactly k+1 and never panics.
        for base in (0u16..256).step_by(17) {
            let base = base as u8;
            let mut w = SendWindow::new(4);
            w.seed(base);
            for i in 0..8 {
                w.push(seg(i));
            }
            assert_eq!(w.ack(base.wrapping_add(5)), Some(6));
            assert_eq!(w.len(), 2);
            assert_eq!(w.oldest(), base.wrapping_add(6));
        }
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn push_past_capacity_panics() {
        let mut w = SendWindow::new(1);
        w.push(seg(0));
        w.push(seg(1));
        w.push(seg(2));
    }

    #[test]
    fn snapshot_preserves_order_and_content() {
        let mut w = SendWindow::new(3);
        w.seed(7);
        for i in 0..5 {
            w.push(seg(i));
        }
        // Repeated snapshots (retransmission passes) must not disturb the ring.
        for _ in 0..3 {
            let snap = w.snapshot();
            assert_eq!(snap.len(), 5);
            for (i, s) in snap.iter().enumerate() {
                assert_eq!(s[0], i as u8);
            }
        }
        // After acking the oldest two, the pass contains exactly the rest.
        w.ack(8).unwrap();
        let snap = w.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0][0], 2);
    }

    #[test]
    fn iter_mut_stays_in_sequence_order_after_wrap() {
        // Fill, release the head, refill: the live range now wraps the
        // physical ring, and a retransmission walk must still run oldest
        // to newest.
        let mut w = SendWindow::new(2);
        w.seed(10);
        for i in 1..=3 {
            w.push(seg(i));
        }
        assert_eq!(w.ack(11), Some(2));
        w.push(seg(4));
        w.push(seg(5));
        let order: Vec<u8> = w.iter_mut().map(|s| s[0]).collect();
        assert_eq!(order, vec![3, 4, 5]);
        let snap: Vec<u8> = w.snapshot().iter().map(|s| s[0]).collect();
        assert_eq!(snap, order, "mutable and cloning walks must agree");
    }

    #[test]
    fn resize_preserves_content_and_seed() {
        let mut w = SendWindow::new(2);
        w.seed(250);
        for i in 0..4 {
            w.push(seg(i));
        }
        w.resize(20); // rounds up to 32
        assert_eq!(w.capacity(), 32);
        assert_eq!(w.len(), 4);
        assert_eq!(w.oldest(), 250);
        assert_eq!(w.ack(251), Some(2));
        assert_eq!(w.oldest(), 252);
    }

    #[test]
    fn purge_empties_and_keeps_working() {
        let mut w = SendWindow::new(2);
        w.seed(9);
        w.push(seg(0));
        w.push(seg(1));
        w.purge();
        assert!(w.is_empty());
        w.seed(50);
        w.push(seg(2));
        assert_eq!(w.ack(50), Some(1));
    }

    #[test]
    fn reassembly_in_order_path() {
        let mut r = ReassemblyWindow::new(4, 16);
        r.seed(11);
        assert!(r.can_accept(11));
        r.store(11, seg(1));
        assert_eq!(r.pop_oldest().unwrap()[0], 1);
        assert_eq!(r.last_in_order(), 11);
        assert!(r.peek_oldest().is_none());
    }

    #[test]
    fn reassembly_out_of_order_drains_contiguously() {
        let mut r = ReassemblyWindow::new(4, 16);
        r.seed(11);
        // Arrival order 12, 13, 11; delivery must be 11, 12, 13.
        r.store(12, seg(2));
        r.store(13, seg(3));
        assert!(r.peek_oldest().is_none(), "gap at 11 blocks draining");
        r.store(11, seg(1));
        let drained: Vec<u8> = std::iter::from_fn(|| r.pop_oldest().map(|s| s[0])).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert_eq!(r.last_in_order(), 13);
    }

    #[test]
    fn reassembly_rejects_outside_window() {
        let mut r = ReassemblyWindow::new(4, 4);
        r.seed(0);
        assert!(r.can_accept(3));
        assert!(!r.can_accept(4), "offset == limit is out of window");
        assert!(!r.can_accept(200), "stale/far-future seq is out of window");
    }

    #[test]
    fn reassembly_window_slides_with_delivery() {
        let mut r = ReassemblyWindow::new(4, 4);
        r.seed(0);
        r.store(0, seg(0));
        assert!(!r.can_accept(4));
        r.pop_oldest();
        assert!(r.can_accept(4), "delivery frees window at the far edge");
    }

    #[test]
    fn reassembly_limit_below_capacity() {
        let r = ReassemblyWindow::new(5, 8); // 32 slots, window of 8
        assert!(r.can_accept(7));
        assert!(!r.can_accept(8));
    }

    #[test]
    #[should_panic(expected = "acceptance window")]
    fn reassembly_store_without_check_panics() {
        let mut r = ReassemblyWindow::new(4, 4);
        r.seed(0);
        r.store(9, seg(0));
    }

    #[test]
    fn reassembly_purge_drops_everything() {
        let mut r = ReassemblyWindow::new(4, 16);
        r.seed(5);
        r.store(5, seg(1));
        r.store(6, seg(2));
        r.purge();
        assert!(r.peek_oldest().is_none());
        // The window position is untouched; a reseed follows on reset.
        assert_eq!(r.last_in_order(), 4);
    }

    #[test]
    fn reassembly_wraparound_offsets() {
        let mut r = ReassemblyWindow::new(4, 16);
        r.seed(250);
        r.store(251, seg(2));
        r.store(250, seg(1));
        r.store(2, seg(3)); // offset 8, wraps past 255
        assert_eq!(r.pop_oldest().unwrap()[0], 1);
        assert_eq!(r.pop_oldest().unwrap()[0], 2);
        assert!(r.peek_oldest().is_none(), "gap before seq 2");
    }
}

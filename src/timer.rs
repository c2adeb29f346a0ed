//! Countdown timers for the connection reactor.
//!
//! The engine runs three timers: retransmission (REX), delayed cumulative
//! acknowledgment (ACK), and keep-alive (NUL). The reactor never sleeps per
//! timer; it asks the set for the earliest armed deadline and waits on that
//! single instant, so arming or cancelling a timer is just a field update.

use std::time::Duration;

use tokio::time::Instant;

/// Identifies one of the engine's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Retransmit the unacked window when it fires.
    Rex = 0,
    /// Flush a pending cumulative acknowledgment.
    Ack = 1,
    /// Keep-alive: client transmit pacing, server peer-liveness deadline.
    Nul = 2,
}

const TIMER_COUNT: usize = 3;

/// Fixed set of three optionally-armed deadlines.
#[derive(Debug)]
pub struct TimerSet {
    deadlines: [Option<Instant>; TIMER_COUNT],
}

impl TimerSet {
    pub fn new() -> Self {
        Self {
            deadlines: [None; TIMER_COUNT],
        }
    }

    /// Arm `kind` to fire `after` from now, replacing any earlier deadline.
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines[kind as usize] = Some(Instant::now() + after);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[kind as usize] = None;
    }

    pub fn cancel_all(&mut self) {
        self.deadlines = [None; TIMER_COUNT];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind as usize].is_some()
    }

    /// The earliest armed deadline, if any. Ties resolve in REX, ACK, NUL
    /// order, which keeps retransmission ahead of courtesy traffic.
    pub fn earliest(&self) -> Option<(TimerKind, Instant)> {
        const KINDS: [TimerKind; TIMER_COUNT] = [TimerKind::Rex, TimerKind::Ack, TimerKind::Nul];
        let mut best: Option<(TimerKind, Instant)> = None;
        for kind in KINDS {
            if let Some(dl) = self.deadlines[kind as usize] {
                match best {
                    Some((_, b)) if b <= dl => {}
                    _ => best = Some((kind, dl)),
                }
            }
        }
        best
    }

    /// Disarm and return the timer owning `deadline`; called by the reactor
    /// after its sleep completes so a timer never fires twice.
    pub fn take_expired(&mut self, deadline: Instant) -> Option<TimerKind> {
        match self.earliest() {
            Some((kind, dl)) if dl == deadline => {
                self.cancel(kind);
                Some(kind)
            }
            _ => None,
        }
    }
}

impl Default for TimerSet {
    fn default() -> Self {
        Self::new()
    }
}

//! Connection state machine and reactor loop.
//!
//! One engine runs per connection, spawned by [`crate::session::Session`].
//! It owns the transport, the send/reassembly windows, and the three
//! protocol timers, and multiplexes everything with a single
//! `tokio::select!`:
//!
//! ```text
//!  Application
//!      │ send()/recv()            Session handle
//!      │                           ┌─────────────────────┐
//!      ▼                           │  inp (mpsc)         │
//!  Engine reactor  ◀───────────────│  out (mpsc)         │
//!    ├── SendWindow (unacked ring) │  state (watch)      │
//!    ├── ReassemblyWindow          └─────────────────────┘
//!    ├── TimerSet (REX / ACK / NUL)
//!    └── Transport (UDP or sim link)
//! ```
//!
//! The reactor waits on: an inbound segment, user input (only while open
//! and the peer's window has room), space opening up in the user output
//! queue (only while delivery is blocked), the earliest armed timer, and
//! shutdown. Each wakeup is handled to completion before the next wait, so
//! the state machine never sees concurrent events.
//!
//! A failed or reset connection goes back to `Closed` and the reactor
//! reopens it on its own: a server re-listens immediately, a client
//! redials after a growing back-off. Only the session tears the loop down
//! for good.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::RssiConfig;
use crate::segment::{self, flags, xflags, Header, SegmentError, SynHeader};
use crate::session::{ConnState, Role};
use crate::stats::RssiStats;
use crate::timer::{TimerKind, TimerSet};
use crate::transport::Transport;
use crate::window::{ReassemblyWindow, SendWindow};

/// Wire timeouts are advertised in milliseconds (10^-3 s).
const WIRE_UNITS_MS: u8 = 3;

/// Finest unit exponent a peer may advertise (1 µs).
const MAX_UNITS: u8 = 6;

/// Cap on the client's reconnect back-off.
const MAX_REOPEN_DELAY: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Connection FSM states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    /// Server side waiting for the first SYN.
    Listen,
    /// Client sent SYN, waiting for the server's SYN+ACK.
    ClntWaitSynAck,
    /// Server sent SYN+ACK, waiting for it to be acknowledged.
    ServWaitSynAck,
    /// Handshake complete; promoted to `Open` on the next loop turn.
    PrepOpen,
    Open,
    /// Open, but the peer's advertised window is full; user input is
    /// paused until acknowledgments free a slot.
    OpenOutwinFull,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::ClntWaitSynAck => "CLNT_WAIT_SYN_ACK",
            State::ServWaitSynAck => "SERV_WAIT_SYN_ACK",
            State::PrepOpen => "PREP_OPEN",
            State::Open => "OPEN",
            State::OpenOutwinFull => "OPEN_OUTWIN_FULL",
        };
        f.write_str(name)
    }
}

/// What a reactor wakeup was about.  The select! arms only produce one of
/// these; all handling happens afterwards with the arm futures dropped.
enum Event {
    Shutdown,
    Rx(Option<Vec<u8>>),
    Input(Option<Vec<u8>>),
    OutSpace,
    Timer(TimerKind),
    Spurious,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub(crate) struct Engine<T: Transport> {
    role: Role,
    cfg: RssiConfig,
    transport: T,
    state: State,

    // Operational parameters; start from `cfg`, replaced by the SYN
    // exchange.
    rex_to: Duration,
    cak_to: Duration,
    /// Base keep-alive period as advertised on the wire.  The client paces
    /// NULs at a third of it; the server declares the peer dead after
    /// three times it.
    nul_base: Duration,
    rex_max: u8,
    cak_max: i32,
    /// Peer's advertised window: how many segments we may keep in flight.
    peer_oss_max: u8,
    /// Peer's advertised max segment size, header included.
    peer_sgs_max: usize,
    verify_checksum: bool,
    add_checksum: bool,
    conn_id: u32,

    // Per-connection counters.
    num_rex: u32,
    /// Pending-ack counter.  Signed: pure acks from the peer drive it
    /// negative so they are never themselves acknowledged.
    num_cak: i32,
    peer_busy: bool,
    last_seq_sent: u8,
    last_seq_recv: u8,
    reopen_delay: Duration,

    unacked: SendWindow,
    reassembly: ReassemblyWindow,
    timers: TimerSet,
    stats: Arc<RssiStats>,

    inp_rx: mpsc::Receiver<Vec<u8>>,
    out_tx: mpsc::Sender<Vec<u8>>,
    /// Set while in-order segments are stuck behind a full user output
    /// queue; enables the queue-space select arm.
    out_wait: bool,
    state_tx: watch::Sender<ConnState>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl<T: Transport> Engine<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        role: Role,
        cfg: RssiConfig,
        transport: T,
        stats: Arc<RssiStats>,
        inp_rx: mpsc::Receiver<Vec<u8>>,
        out_tx: mpsc::Sender<Vec<u8>>,
        state_tx: watch::Sender<ConnState>,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Self {
        let conn_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let ld = cfg.ld_max_unacked;
        let window = cfg.max_unacked() as u8;
        let seg_size = cfg.effective_seg_size(transport.mtu());
        Self {
            role,
            transport,
            state: State::Closed,
            rex_to: cfg.rex_timeout,
            cak_to: cfg.cak_timeout,
            nul_base: cfg.nul_timeout,
            rex_max: cfg.rex_max,
            cak_max: i32::from(cfg.cak_max),
            peer_oss_max: window,
            peer_sgs_max: seg_size,
            verify_checksum: false,
            add_checksum: true,
            conn_id,
            num_rex: 0,
            num_cak: 0,
            peer_busy: false,
            last_seq_sent: 0,
            last_seq_recv: 0,
            reopen_delay: Duration::ZERO,
            unacked: SendWindow::new(ld),
            reassembly: ReassemblyWindow::new(ld, window),
            timers: TimerSet::new(),
            stats,
            inp_rx,
            out_tx,
            out_wait: false,
            state_tx,
            shutdown_rx,
            cfg,
        }
    }

    /// Drive the connection until the session tears it down.
    pub(crate) async fn run(mut self) {
        loop {
            let keep_going = match self.state {
                State::Closed => self.advance_closed().await,
                State::PrepOpen => {
                    self.change_state(State::Open);
                    true
                }
                State::Listen => self.advance(false).await,
                _ => self.advance(true).await,
            };
            if !keep_going {
                break;
            }
        }
        self.teardown().await;
    }

    // -----------------------------------------------------------------------
    // Reactor
    // -----------------------------------------------------------------------

    /// Re-open from `Closed`: server re-listens, client redials after the
    /// current back-off.  Returns `false` on shutdown.
    async fn advance_closed(&mut self) -> bool {
        self.reset();
        match self.role {
            Role::Server => self.change_state(State::Listen),
            Role::Client => {
                if !self.reopen_delay.is_zero() {
                    info!("[rssi:{}] redialing in {:?}", self.role, self.reopen_delay);
                    tokio::select! {
                        _ = self.shutdown_rx.recv() => return false,
                        _ = tokio::time::sleep(self.reopen_delay) => {}
                    }
                }
                self.reopen_delay =
                    (self.reopen_delay + Duration::from_secs(1)).min(MAX_REOPEN_DELAY);
                self.send_syn(false).await;
                self.change_state(State::ClntWaitSynAck);
            }
        }
        true
    }

    /// One reactor turn: wait for the next event and handle it.
    /// `timer_expected` asserts the invariant that every state past
    /// `Listen` keeps at least one timer armed.
    async fn advance(&mut self, timer_expected: bool) -> bool {
        let deadline = self.timers.earliest().map(|(_, dl)| dl);
        debug_assert!(!timer_expected || deadline.is_some());
        let sleep_until = deadline.unwrap_or_else(far_future);
        let can_take_input = self.state == State::Open && self.window_space();

        let event = tokio::select! {
            _ = self.shutdown_rx.recv() => Event::Shutdown,
            seg = self.transport.recv() => Event::Rx(seg),
            data = self.inp_rx.recv(), if can_take_input => Event::Input(data),
            permit = self.out_tx.reserve(), if self.out_wait => {
                // Only the wakeup matters; the slot is re-taken by try_send.
                match permit {
                    Ok(p) => drop(p),
                    Err(_) => return false,
                }
                Event::OutSpace
            }
            _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                match self.timers.take_expired(sleep_until) {
                    Some(kind) => Event::Timer(kind),
                    None => Event::Spurious,
                }
            }
        };

        match event {
            Event::Shutdown => false,
            Event::Rx(None) => false,
            Event::Input(None) => false,
            Event::Rx(Some(seg)) => {
                self.handle_rx(seg).await;
                true
            }
            Event::Input(Some(data)) => {
                self.handle_usr_input(data).await;
                true
            }
            Event::OutSpace => {
                self.handle_usr_output().await;
                true
            }
            Event::Timer(kind) => self.handle_timer(kind).await,
            Event::Spurious => true,
        }
    }

    /// Final RST (when connected) and closing notification.
    async fn teardown(&mut self) {
        if !matches!(self.state, State::Closed | State::Listen) {
            self.send_rst().await;
        }
        self.change_state(State::Closed);
        debug!(
            "[rssi:{}] engine stopped; final counters:\n{}",
            self.role,
            self.stats.snapshot()
        );
    }

    /// Back to a pristine per-connection state.  Negotiated parameters
    /// revert to the local configuration; user queues are untouched.
    fn reset(&mut self) {
        self.timers.cancel_all();
        self.unacked.purge();
        self.reassembly.purge();
        self.num_rex = 0;
        self.num_cak = 0;
        self.peer_busy = false;
        self.out_wait = false;
        self.verify_checksum = false;
        self.add_checksum = true;
        self.rex_to = self.cfg.rex_timeout;
        self.cak_to = self.cfg.cak_timeout;
        self.nul_base = self.cfg.nul_timeout;
        self.rex_max = self.cfg.rex_max;
        self.cak_max = i32::from(self.cfg.cak_max);
        self.peer_oss_max = self.cfg.max_unacked() as u8;
        self.peer_sgs_max = self.cfg.effective_seg_size(self.transport.mtu());
        // A new instance id lets the peer tell a reincarnation from a
        // delayed segment of the old connection.
        self.conn_id = self.conn_id.wrapping_add(1);
    }

    fn change_state(&mut self, to: State) {
        if self.state == to {
            return;
        }
        debug!("[rssi:{}] {} -> {}", self.role, self.state, to);
        self.state = to;
        let conn = match to {
            State::Closed => ConnState::Closed,
            State::Open | State::OpenOutwinFull => ConnState::Open,
            _ => ConnState::Connecting,
        };
        if to == State::Open {
            self.reopen_delay = Duration::ZERO;
        }
        self.state_tx.send_replace(conn);
    }

    // -----------------------------------------------------------------------
    // Inbound segments
    // -----------------------------------------------------------------------

    async fn handle_rx(&mut self, seg: Vec<u8>) {
        let hdr = match Header::parse(&seg, self.verify_checksum) {
            Ok(h) => h,
            Err(SegmentError::BadChecksum) => {
                self.stats.bad_checksum();
                return;
            }
            Err(_) => {
                self.stats.bad_hdr_dropped();
                return;
            }
        };
        let has_payload = seg.len() > hdr.hsize as usize;
        let is_syn = hdr.flags & flags::SYN != 0;

        let accepted = if is_syn {
            self.handle_syn(&seg, hdr).await
        } else {
            self.handle_oth(hdr, has_payload).await
        };
        if !accepted {
            self.stats.rejected_segs();
            return;
        }
        if self.state == State::Closed {
            // The segment itself closed us (reset).
            return;
        }

        if hdr.flags & flags::ACK != 0 {
            self.process_ack_number(hdr.ack);
        }

        // File data and keep-alives for in-order delivery.  Duplicates of
        // already-delivered segments fall outside the window; they still
        // run the ack policy below so the peer stops resending them.
        let is_sequenced = !is_syn && (has_payload || hdr.flags & flags::NUL != 0);
        if is_sequenced {
            if self.reassembly.can_accept(hdr.seq) {
                self.reassembly.store(hdr.seq, seg);
                self.drain_reassembly();
            } else {
                debug!("[rssi:{}] seq {} outside window", self.role, hdr.seq);
            }
        }

        // Busy-flag edges.
        let busy = hdr.flags & flags::BSY != 0;
        if busy {
            self.stats.busy_flags_rx();
        }
        if busy != self.peer_busy {
            self.peer_busy = busy;
            if busy {
                // Peer has nowhere to put retransmissions; hold them.
                self.timers.cancel(TimerKind::Rex);
            } else if !self.unacked.is_empty() {
                self.stats.busy_deassert_rex();
                // The retransmission pass carries the pending ack and
                // re-arms the timers.
                self.retransmit_all().await;
                self.check_state_progress();
                return;
            }
        }

        // Every accepted segment owes the peer an acknowledgment.  The
        // handlers above pre-decrement for the ones that must not be acked
        // (a pure ack, a SYN already answered by our SYN+ACK) so those net
        // out to zero here.
        self.num_cak += 1;
        if self.num_cak > self.cak_max {
            self.send_ack_or_piggyback().await;
        } else if self.num_cak == 1 {
            self.timers.arm(TimerKind::Ack, self.cak_to);
        }

        // Anything the peer sends proves it is alive.
        if self.role == Role::Server && self.state != State::Listen {
            self.timers.arm(TimerKind::Nul, self.nul_deadline());
        }

        self.check_state_progress();
    }

    /// Transitions that may complete on any accepted segment: the server's
    /// handshake finishing, or acknowledgments re-opening a full window.
    fn check_state_progress(&mut self) {
        match self.state {
            State::ServWaitSynAck if self.unacked.is_empty() => {
                self.change_state(State::PrepOpen);
            }
            State::OpenOutwinFull if self.window_space() => {
                self.change_state(State::Open);
            }
            _ => {}
        }
    }

    /// SYN dispatch per state.  Returns `false` for a rejected segment.
    async fn handle_syn(&mut self, seg: &[u8], hdr: Header) -> bool {
        let syn = match SynHeader::parse(seg) {
            Ok(s) => s,
            Err(_) => {
                self.stats.bad_syn_dropped();
                return false;
            }
        };
        match self.state {
            State::Listen => {
                // The server honors only the client's window geometry; the
                // SYN+ACK advertises our own timing parameters, which the
                // client adopts.
                self.extract_window_params(&syn);
                self.last_seq_recv = syn.seq;
                self.reassembly.seed(syn.seq.wrapping_add(1));
                self.send_syn(true).await;
                // The SYN+ACK already acknowledges the peer's SYN; a
                // separate ack would be redundant.
                self.num_cak -= 1;
                self.change_state(State::ServWaitSynAck);
                true
            }
            State::ClntWaitSynAck => {
                if hdr.flags & flags::ACK == 0 {
                    // Both ends dialed at once.  This link is strictly
                    // client/server, so give up and let the back-off retry.
                    warn!("[rssi:{}] simultaneous open; resetting", self.role);
                    self.send_rst().await;
                    self.change_state(State::Closed);
                    return false;
                }
                if !self.extract_params(&syn) {
                    return false;
                }
                self.last_seq_recv = syn.seq;
                self.reassembly.seed(syn.seq.wrapping_add(1));
                // The server is waiting on our ack to open.
                self.force_ack();
                if hdr.ack == self.last_seq_sent {
                    self.change_state(State::PrepOpen);
                }
                true
            }
            _ => {
                // Open (or mid-handshake server): the peer retransmitted
                // its SYN because it missed our answer; re-acking is all
                // it needs.
                self.force_ack();
                true
            }
        }
    }

    /// Non-SYN dispatch per state.  Returns `false` for a rejected segment.
    async fn handle_oth(&mut self, hdr: Header, has_payload: bool) -> bool {
        match self.state {
            State::Listen => false,
            State::ClntWaitSynAck => {
                // Waiting on a SYN+ACK only a reset with a plausible
                // sequence number is meaningful; a stale RST from an
                // earlier incarnation must not abort the handshake.
                if hdr.flags & flags::RST != 0
                    && self.reassembly.can_accept(hdr.seq)
                    && !has_payload
                {
                    info!("[rssi:{}] reset during handshake", self.role);
                    self.send_rst().await;
                    self.change_state(State::Closed);
                    true
                } else {
                    false
                }
            }
            _ => {
                if hdr.flags & flags::RST != 0 {
                    info!("[rssi:{}] peer reset the connection", self.role);
                    self.change_state(State::Closed);
                    return true;
                }
                if hdr.is_pure_ack() && !has_payload {
                    // Pure acks are never acked back.
                    self.num_cak -= 1;
                    return true;
                }
                if hdr.flags & flags::NUL != 0 {
                    // Keep-alives flow client -> server and carry no data.
                    if self.role == Role::Server && !has_payload {
                        self.force_ack();
                        true
                    } else {
                        false
                    }
                } else {
                    has_payload
                }
            }
        }
    }

    /// Release segments covered by a cumulative acknowledgment.
    fn process_ack_number(&mut self, ack: u8) {
        match self.unacked.ack(ack) {
            Some(n) if n > 0 => {
                self.stats.segs_acked_by_peer(n as u64);
                self.num_rex = 0;
                if self.unacked.is_empty() {
                    self.timers.cancel(TimerKind::Rex);
                } else if !self.peer_busy {
                    self.timers.arm(TimerKind::Rex, self.rex_to);
                }
            }
            Some(_) => {}
            // Stale or corrupt ack number; ignore it.
            None => {}
        }
    }

    /// Move contiguous segments from the reassembly ring to the user,
    /// discarding keep-alives, until a gap or a full output queue stops us.
    fn drain_reassembly(&mut self) {
        loop {
            let is_nul = match self.reassembly.peek_oldest() {
                None => break,
                Some(seg) => segment::flags_of(seg) & flags::NUL != 0,
            };
            if is_nul {
                self.reassembly.pop_oldest();
                continue;
            }
            if self.out_tx.capacity() == 0 {
                self.out_wait = true;
                break;
            }
            if let Some(mut seg) = self.reassembly.pop_oldest() {
                let hsize = segment::hsize_of(&seg);
                seg.drain(..hsize);
                if self.out_tx.try_send(seg).is_ok() {
                    self.stats.segs_given_to_user();
                }
            }
        }
        self.last_seq_recv = self.reassembly.last_in_order();
    }

    // -----------------------------------------------------------------------
    // User events
    // -----------------------------------------------------------------------

    /// New payload from the application; keep pulling while the peer's
    /// window has room so a burst fills the pipe in one turn.
    async fn handle_usr_input(&mut self, data: Vec<u8>) {
        self.send_dat(data).await;
        while self.window_space() {
            match self.inp_rx.try_recv() {
                Ok(data) => self.send_dat(data).await,
                Err(_) => return,
            }
        }
        if self.state == State::Open {
            self.change_state(State::OpenOutwinFull);
        }
    }

    /// The user output queue has space again: resume in-order delivery and
    /// let the peer know it may stop seeing BSY.
    async fn handle_usr_output(&mut self) {
        self.out_wait = false;
        self.drain_reassembly();
        if !self.out_wait {
            self.send_ack().await;
        }
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    async fn handle_timer(&mut self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Rex => self.process_rex_timeout().await,
            TimerKind::Ack => self.process_ack_timeout().await,
            TimerKind::Nul => self.process_nul_timeout().await,
        }
        true
    }

    async fn process_rex_timeout(&mut self) {
        self.stats.rex_timeouts();
        self.num_rex += 1;
        if self.num_rex > u32::from(self.rex_max) {
            warn!(
                "[rssi:{}] {} retransmissions without progress; giving up",
                self.role, self.rex_max
            );
            self.stats.conn_failed();
            self.send_rst().await;
            self.change_state(State::Closed);
            return;
        }
        self.retransmit_all().await;
    }

    /// Delayed-ack expiry.
    async fn process_ack_timeout(&mut self) {
        self.stats.ack_timeouts();
        self.send_ack_or_piggyback().await;
    }

    async fn process_nul_timeout(&mut self) {
        self.stats.nul_timeouts();
        match self.role {
            Role::Server => {
                warn!("[rssi:{}] peer silent past its deadline; resetting", self.role);
                self.stats.conn_failed();
                self.send_rst().await;
                self.change_state(State::Closed);
            }
            Role::Client => {
                if !self.send_nul().await && self.state == State::Open {
                    self.change_state(State::OpenOutwinFull);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound segments
    // -----------------------------------------------------------------------

    /// Finalize and transmit one segment: fill in the current cumulative
    /// ack, reflect our queue pressure in BSY, refresh the checksum.
    /// Every transmission also clears any pending-ack obligation.
    async fn transmit(&mut self, seg: &mut Vec<u8>) {
        let busy = self.out_tx.capacity() == 0;
        if busy {
            self.stats.busy_flags_tx();
        }
        segment::finalize(seg, self.last_seq_recv, busy, self.add_checksum);
        self.num_cak = 0;
        self.timers.cancel(TimerKind::Ack);
        if !self.transport.send(seg.clone()).await {
            self.stats.outgoing_dropped();
        }
    }

    /// Transmit and keep for retransmission.
    async fn send_and_keep(&mut self, mut seg: Vec<u8>) {
        self.transmit(&mut seg).await;
        self.unacked.push(seg);
        self.arm_rex_and_nul();
    }

    async fn send_dat(&mut self, payload: Vec<u8>) {
        if segment::HEADER_LEN + payload.len() > self.peer_sgs_max {
            error!(
                "[rssi:{}] {}-byte payload exceeds negotiated segment size {}; dropping",
                self.role,
                payload.len(),
                self.peer_sgs_max
            );
            self.stats.outgoing_dropped();
            return;
        }
        self.last_seq_sent = self.last_seq_sent.wrapping_add(1);
        let seg = segment::build(flags::ACK, self.last_seq_sent, &payload);
        self.send_and_keep(seg).await;
    }

    /// Send queued data when the window allows (the segment carries the
    /// cumulative ack anyway), otherwise a bare ack.
    async fn send_ack_or_piggyback(&mut self) {
        if self.state == State::Open && self.window_space() {
            if let Ok(data) = self.inp_rx.try_recv() {
                self.send_dat(data).await;
                return;
            }
        }
        self.send_ack().await;
    }

    /// Bare cumulative ack.  Uses the next unsent sequence number without
    /// consuming it and is never retained.
    async fn send_ack(&mut self) {
        let mut seg = segment::build(flags::ACK, self.last_seq_sent.wrapping_add(1), &[]);
        self.transmit(&mut seg).await;
    }

    async fn send_rst(&mut self) {
        self.last_seq_sent = self.last_seq_sent.wrapping_add(1);
        let mut seg = segment::build(flags::ACK | flags::RST, self.last_seq_sent, &[]);
        self.transmit(&mut seg).await;
    }

    /// Client keep-alive.  Consumes a sequence number and is retransmitted
    /// like data; when the window is full a bare ack goes out instead.
    /// Returns `false` in the window-full case.
    async fn send_nul(&mut self) -> bool {
        if !self.window_space() {
            self.stats.skipped_nuls();
            self.timers.arm(TimerKind::Nul, self.nul_period());
            self.send_ack().await;
            return false;
        }
        self.last_seq_sent = self.last_seq_sent.wrapping_add(1);
        let seg = segment::build(flags::ACK | flags::NUL, self.last_seq_sent, &[]);
        self.send_and_keep(seg).await;
        true
    }

    /// Send a SYN (client open) or SYN+ACK (server answer), advertising
    /// our current operational parameters, and seed the send window with
    /// the fresh initial sequence number.
    async fn send_syn(&mut self, is_reply: bool) {
        self.last_seq_sent = rand::random();
        let flags = if is_reply {
            flags::SYN | flags::ACK
        } else {
            flags::SYN
        };
        let millis = |d: Duration| d.as_millis() as u16;
        let hdr = SynHeader {
            flags,
            seq: self.last_seq_sent,
            ack: 0,
            xflags: xflags::ONE | xflags::CHK,
            oss_max: self.cfg.max_unacked() as u8,
            sgs_max: self.cfg.effective_seg_size(self.transport.mtu()) as u16,
            rex_to: millis(self.rex_to),
            cak_to: millis(self.cak_to),
            nul_to: millis(self.nul_base),
            rex_max: self.rex_max,
            cak_max: self.cak_max as u8,
            osa_max: 0,
            units: WIRE_UNITS_MS,
            conn_id: self.conn_id,
        };
        debug!(
            "[rssi:{}] sending SYN{} isn={} conn_id={}",
            self.role,
            if is_reply { "+ACK" } else { "" },
            self.last_seq_sent,
            self.conn_id
        );
        self.unacked.seed(self.last_seq_sent);
        self.send_and_keep(hdr.build()).await;
    }

    /// Resend the whole unacked window in order with refreshed headers.
    async fn retransmit_all(&mut self) {
        let ack = self.last_seq_recv;
        let busy = self.out_tx.capacity() == 0;
        let add = self.add_checksum;
        let mut segs = Vec::new();
        for seg in self.unacked.iter_mut() {
            segment::finalize(seg, ack, busy, add);
            segs.push(seg.clone());
        }
        debug!(
            "[rssi:{}] retransmitting {} segment(s), attempt {}",
            self.role,
            segs.len(),
            self.num_rex
        );
        if busy {
            self.stats.busy_flags_tx();
        }
        self.num_cak = 0;
        self.timers.cancel(TimerKind::Ack);
        self.stats.rex_segments(segs.len() as u64);
        for seg in segs {
            if !self.transport.send(seg).await {
                self.stats.outgoing_dropped();
            }
        }
        self.arm_rex_and_nul();
    }

    // -----------------------------------------------------------------------
    // Negotiation and small helpers
    // -----------------------------------------------------------------------

    /// The peer's window geometry.  Both sides honor it; everything else
    /// in a SYN is only adopted by the client.
    fn extract_window_params(&mut self, syn: &SynHeader) {
        self.peer_oss_max = syn.oss_max;
        self.peer_sgs_max = usize::from(syn.sgs_max);
        if usize::from(self.peer_oss_max) > self.unacked.capacity() {
            self.unacked.resize(usize::from(self.peer_oss_max));
        }
    }

    /// Adopt the full parameter block of the server's SYN+ACK.  Returns
    /// `false` (and counts the segment as a bad SYN) for unusable
    /// advertisements.
    fn extract_params(&mut self, syn: &SynHeader) -> bool {
        if syn.units > MAX_UNITS {
            warn!(
                "[rssi:{}] SYN advertises unit exponent {}; dropping",
                self.role, syn.units
            );
            self.stats.bad_syn_dropped();
            return false;
        }
        self.extract_window_params(syn);
        let unit_us = 10u64.pow(u32::from(MAX_UNITS - syn.units));
        let dur = |v: u16| Duration::from_micros(u64::from(v) * unit_us);
        self.rex_to = dur(syn.rex_to);
        self.cak_to = dur(syn.cak_to);
        self.nul_base = dur(syn.nul_to);
        self.rex_max = syn.rex_max;
        self.cak_max = i32::from(syn.cak_max);
        self.verify_checksum = syn.checksum_enabled();
        self.add_checksum = syn.checksum_enabled();
        // The keep-alive timer is already running on the pre-negotiation
        // period; restart it on the adopted one.
        if self.timers.is_armed(TimerKind::Nul) {
            self.timers.arm(TimerKind::Nul, self.nul_period());
        }
        debug!(
            "[rssi:{}] negotiated: win={} sgs={} rex={:?}/{} cak={:?}/{} nul={:?} chk={} conn_id={}",
            self.role,
            self.peer_oss_max,
            self.peer_sgs_max,
            self.rex_to,
            self.rex_max,
            self.cak_to,
            self.cak_max,
            self.nul_base,
            self.verify_checksum,
            syn.conn_id
        );
        true
    }

    /// Saturate the pending-ack counter so the segment being processed
    /// triggers an immediate acknowledgment.
    fn force_ack(&mut self) {
        self.num_cak = self.cak_max;
    }

    fn window_space(&self) -> bool {
        self.unacked.len() < usize::from(self.peer_oss_max)
    }

    fn arm_rex_and_nul(&mut self) {
        if !self.peer_busy {
            self.timers.arm(TimerKind::Rex, self.rex_to);
        }
        if self.role == Role::Client {
            self.timers.arm(TimerKind::Nul, self.nul_period());
        }
    }

    /// Client transmit pacing: a third of the advertised period.
    fn nul_period(&self) -> Duration {
        self.nul_base / 3
    }

    /// Server give-up deadline: three missed keep-alive periods.
    fn nul_deadline(&self) -> Duration {
        self.nul_base * 3
    }
}

/// Deadline for a disarmed timer; far enough out to never fire.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(365 * 24 * 3600)
}

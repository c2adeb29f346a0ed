//! Connection parameters.
//!
//! An [`RssiConfig`] is validated once when the session is created and is
//! immutable afterwards. The values here are only the *local proposal*: the
//! SYN exchange may replace them with the peer's (a client adopts the
//! server's advertisement verbatim).

use std::time::Duration;

use thiserror::Error;

/// Largest supported log2 window (256 one-byte sequence numbers give a
/// usable window of at most 128, one power of two below the full space).
pub const LD_MAX_UNACKED_LIMIT: u8 = 8;

/// Wire timeouts travel as 16-bit counts of the advertised time unit.
const MAX_WIRE_TIMEOUT: u64 = u16::MAX as u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("log2 window size {0} out of range (must be < {LD_MAX_UNACKED_LIMIT})")]
    WindowTooLarge(u8),
    #[error("{name} timeout {millis} ms does not fit the 16-bit wire field")]
    TimeoutTooLarge { name: &'static str, millis: u64 },
    #[error("{name} timeout must be non-zero")]
    TimeoutZero { name: &'static str },
    #[error("cumulative-ack timeout must be shorter than the retransmission timeout")]
    AckNotBelowRex,
    #[error("max segment size {0} too small to carry a header")]
    SegSizeTooSmall(usize),
}

/// Local protocol parameters, advertised during the handshake.
#[derive(Debug, Clone)]
pub struct RssiConfig {
    /// log2 of the outgoing window (max unacked segments).
    pub ld_max_unacked: u8,
    /// Retransmission timeout.
    pub rex_timeout: Duration,
    /// Delayed cumulative-ack timeout; must be below `rex_timeout`.
    pub cak_timeout: Duration,
    /// Keep-alive period. The client paces NULs at a third of the
    /// negotiated value; the server declares the peer dead after three
    /// times its configured value.
    pub nul_timeout: Duration,
    /// Retransmissions of the same window before the connection fails.
    pub rex_max: u8,
    /// Segments accepted before an ack is forced out.
    pub cak_max: u8,
    /// Max segment size (header + payload) to advertise; `None` derives it
    /// from the transport MTU.
    pub forced_seg_size: Option<usize>,
    /// Depth of the user-facing input and output queues; `None` uses the
    /// window size plus a small margin.
    pub queue_depth: Option<usize>,
}

impl Default for RssiConfig {
    fn default() -> Self {
        Self {
            ld_max_unacked: 4,
            rex_timeout: Duration::from_millis(100),
            cak_timeout: Duration::from_millis(50),
            nul_timeout: Duration::from_millis(3000),
            rex_max: 15,
            cak_max: 5,
            forced_seg_size: None,
            queue_depth: None,
        }
    }
}

impl RssiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ld_max_unacked >= LD_MAX_UNACKED_LIMIT {
            return Err(ConfigError::WindowTooLarge(self.ld_max_unacked));
        }
        for (name, to) in [
            ("retransmission", self.rex_timeout),
            ("cumulative-ack", self.cak_timeout),
            ("keep-alive", self.nul_timeout),
        ] {
            if to.is_zero() {
                return Err(ConfigError::TimeoutZero { name });
            }
            let millis = to.as_millis() as u64;
            if millis > MAX_WIRE_TIMEOUT {
                return Err(ConfigError::TimeoutTooLarge { name, millis });
            }
        }
        if self.cak_timeout >= self.rex_timeout {
            return Err(ConfigError::AckNotBelowRex);
        }
        if let Some(sz) = self.forced_seg_size {
            if sz < crate::segment::SYN_HEADER_LEN {
                return Err(ConfigError::SegSizeTooSmall(sz));
            }
        }
        Ok(())
    }

    /// Window size in segments.
    pub fn max_unacked(&self) -> usize {
        1usize << self.ld_max_unacked
    }

    /// User queue depth: explicit, or the window plus headroom so the app
    /// can stay a few segments ahead of the wire.
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.max_unacked() + 4)
    }

    /// Segment size to advertise: forced, or the transport's receive MTU.
    pub fn effective_seg_size(&self, mtu: usize) -> usize {
        self.forced_seg_size.unwrap_or(mtu)
    }
}

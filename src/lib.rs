//! `rssi` — a reliable, windowed, connection-oriented transport for
//! message-sized payloads over an unreliable datagram link (typically UDP).
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ send()/recv()
//!  ┌───▼───────┐  bounded queues  ┌──────────────────────────┐
//!  │  Session  │◀────────────────▶│  Engine (spawned task)   │
//!  └───────────┘                  │   ├── SendWindow         │
//!                                 │   ├── ReassemblyWindow   │
//!                                 │   ├── TimerSet           │
//!                                 │   └── state machine      │
//!                                 └────────────┬─────────────┘
//!                                              │ segments
//!                                 ┌────────────▼─────────────┐
//!                                 │ Transport (UDP or sim)   │
//!                                 └──────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`segment`]   — wire format (headers, SYN parameter block, checksum)
//! - [`window`]    — send / reassembly rings with 8-bit wrapping sequences
//! - [`timer`]     — the three protocol timers (REX / ACK / NUL)
//! - [`config`]    — validated connection parameters
//! - `engine`      — per-connection state machine and reactor loop
//! - [`session`]   — user-facing handle over the spawned engine
//! - [`transport`] — datagram port trait and the UDP implementation
//! - [`sim`]       — in-process transport pair with fault injection
//! - [`stats`]     — shared counters and printable snapshots
//!
//! # Example
//!
//! ```ignore
//! let (a, b) = rssi::sim::loopback();
//! let server = rssi::Session::server(a, rssi::RssiConfig::default())?;
//! let mut client = rssi::Session::client(b, rssi::RssiConfig::default())?;
//! client.wait_open().await?;
//! client.send(b"hello".to_vec()).await?;
//! ```

pub mod config;
mod engine;
pub mod segment;
pub mod session;
pub mod sim;
pub mod stats;
pub mod timer;
pub mod transport;
pub mod window;

pub use config::{ConfigError, RssiConfig};
pub use session::{ConnState, Role, Session, SessionError};
pub use stats::StatsSnapshot;
pub use transport::{Transport, UdpTransport};

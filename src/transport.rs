//! Datagram transports.
//!
//! The engine speaks to the wire through the [`Transport`] trait: whole
//! segments in, whole segments out, unreliable in both directions. The
//! production implementation is [`UdpTransport`]; tests and demos use the
//! in-process pair from [`crate::sim`].

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use log::{debug, warn};
use tokio::net::UdpSocket;

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

/// Receive MTU assumed for UDP: Ethernet 1500 minus IPv4 (20), UDP (8), and
/// one RSSI header (8).
const DEFAULT_UDP_MTU: usize = 1500 - 20 - 8 - 8;

/// An unreliable, segment-oriented duplex port.
///
/// `send` reports whether the transport accepted the segment; a `false` is a
/// drop, which the protocol absorbs like any other loss. `recv` returns
/// `None` when the transport is permanently gone, which tears the
/// connection down.
pub trait Transport: Send + 'static {
    fn send(&mut self, seg: Vec<u8>) -> impl Future<Output = bool> + Send;
    fn recv(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;
    /// Largest segment (header included) the far side can expect us to
    /// receive; advertised during the handshake.
    fn mtu(&self) -> usize;
}

/// UDP transport locked to a single peer.
///
/// A server side starts unconnected and adopts the source address of the
/// first datagram it sees; datagrams from anyone else are dropped. A client
/// side is given its peer up front.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    mtu: usize,
}

impl UdpTransport {
    /// Bind to `local_addr` and wait for a peer to appear (server side).
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        debug!("listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            peer: None,
            mtu: DEFAULT_UDP_MTU,
        })
    }

    /// Bind an ephemeral port and lock to `peer` (client side).
    pub async fn connect(peer: SocketAddr) -> io::Result<Self> {
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer).await?;
        debug!("{} -> {}", socket.local_addr()?, peer);
        Ok(Self {
            socket,
            peer: Some(peer),
            mtu: DEFAULT_UDP_MTU,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    async fn send(&mut self, seg: Vec<u8>) -> bool {
        let res = match self.peer {
            Some(peer) => self.socket.send_to(&seg, peer).await,
            // No peer yet; nothing useful to say.
            None => return false,
        };
        match res {
            Ok(_) => true,
            Err(e) => {
                warn!("udp send failed: {e}");
                false
            }
        }
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    match self.peer {
                        None => {
                            debug!("adopting peer {from}");
                            self.peer = Some(from);
                        }
                        Some(peer) if peer != from => {
                            debug!("dropping datagram from stranger {from}");
                            continue;
                        }
                        Some(_) => {}
                    }
                    buf.truncate(n);
                    return Some(std::mem::take(&mut buf));
                }
                Err(e) => {
                    warn!("udp recv failed: {e}");
                    return None;
                }
            }
        }
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

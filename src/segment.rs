//! Wire-format definitions for RSSI segments.
//!
//! Every datagram exchanged between peers is a segment: a fixed-size header
//! optionally followed by payload bytes.  This module is responsible for:
//! - Defining the on-wire binary layout (flags, sequence/ack numbers, the
//!   extended SYN parameter block).
//! - Writing headers in place at the start of a segment buffer.
//! - Parsing a raw datagram back into a header view, returning errors for
//!   malformed or truncated input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  Sequence and ack numbers are
//! a single byte each and wrap modulo 256.
//!
//! ```text
//!  0               1               2               3
//! +---------------+---------------+---------------+---------------+
//! |     Flags     |  Header Size  |    Seq No     |    Ack No     |
//! +---------------+---------------+---------------+---------------+
//! |            (spare)            |           Checksum            |
//! +---------------+---------------+---------------+---------------+
//! |                        Payload ...                            |
//! +---------------------------------------------------------------+
//! ```
//!
//! The SYN segment replaces the spare bytes with the negotiable-parameter
//! block (24-byte header, no payload):
//!
//! ```text
//! byte  4      version nibble | extension flags (checksum-present, ...)
//! byte  5      max unacked segments        (not negotiated; peer's value)
//! bytes 6-7    max segment size            (not negotiated; peer's value)
//! bytes 8-9    retransmission timeout      (in sender's units)
//! bytes 10-11  cumulative-ack timeout      (in sender's units)
//! bytes 12-13  null/keep-alive timeout     (in sender's units)
//! byte  14     max retransmissions
//! byte  15     max cumulative acks
//! byte  16     max out-of-sequence acks    (always 0; EACK unsupported)
//! byte  17     unit exponent               (timeouts are 10^-exp seconds)
//! bytes 18-21  connection id
//! bytes 22-23  checksum
//! ```
//!
//! The checksum, when present, is the 16-bit one's-complement sum of the
//! header words only (never the payload); a header verifies when the sum
//! over all header words, checksum field included, folds to zero.

use thiserror::Error;

/// Bit-flag constants for the `flags` header byte.
pub mod flags {
    /// Peer-signaled backpressure ("no receive buffer space right now").
    pub const BSY: u8 = 1 << 0;
    /// Zero-payload keep-alive segment.
    pub const NUL: u8 = 1 << 3;
    /// Reset the connection.
    pub const RST: u8 = 1 << 4;
    /// Extended (out-of-sequence) acknowledgment present.  Unsupported;
    /// never set, preserved for wire compatibility.
    pub const EAC: u8 = 1 << 5;
    /// Acknowledgment field is valid.
    pub const ACK: u8 = 1 << 6;
    /// Synchronize sequence numbers (handshake initiation).
    pub const SYN: u8 = 1 << 7;
}

/// Extension-flag bits carried in byte 4 of a SYN header (low nibble).
pub mod xflags {
    /// Header checksums are in use for this connection.
    pub const CHK: u8 = 1 << 2;
    /// Always set by version 1 peers.
    pub const ONE: u8 = 1 << 3;
}

/// Protocol version spoken by this implementation.
pub const VERSION_1: u8 = 1;

/// Byte length of the fixed data/control header on the wire.
pub const HEADER_LEN: usize = 8;

/// Byte length of the extended SYN header.
pub const SYN_HEADER_LEN: usize = 24;

// Byte offsets of each field within the serialized header.
const OFF_FLAGS: usize = 0;
const OFF_HSIZE: usize = 1;
const OFF_SEQ: usize = 2;
const OFF_ACK: usize = 3;

const OFF_XFLAGS: usize = 4;
const OFF_OSS_MAX: usize = 5;
const OFF_SGS_MAX: usize = 6;
const OFF_REX_TO: usize = 8;
const OFF_CAK_TO: usize = 10;
const OFF_NUL_TO: usize = 12;
const OFF_REX_MAX: usize = 14;
const OFF_CAK_MAX: usize = 15;
const OFF_OSA_MAX: usize = 16;
const OFF_UNITS: usize = 17;
const OFF_CONN_ID: usize = 18;

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SegmentError {
    /// Buffer shorter than the header size it claims, or claims a header
    /// smaller than the fixed minimum.
    #[error("header size disagrees with buffer size")]
    BadSize,
    /// Checksum verification failed.
    #[error("header checksum verification failed")]
    BadChecksum,
    /// SYN header malformed (wrong length, trailing data, or bad version).
    #[error("malformed SYN header")]
    BadSyn,
}

/// Parsed view of the fixed header.  Values are copied out so the segment
/// buffer can change hands afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    /// Header size in bytes (8 for data/control, 24 for SYN).
    pub hsize: u8,
    pub seq: u8,
    pub ack: u8,
}

impl Header {
    /// Parse a header from the front of `buf`, optionally verifying the
    /// checksum over the header bytes.
    pub fn parse(buf: &[u8], verify_checksum: bool) -> Result<Header, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::BadSize);
        }
        let hsize = buf[OFF_HSIZE];
        if (hsize as usize) < HEADER_LEN || buf.len() < hsize as usize {
            return Err(SegmentError::BadSize);
        }
        if verify_checksum && fold_sum(&buf[..hsize as usize]) != 0 {
            return Err(SegmentError::BadChecksum);
        }
        Ok(Header {
            flags: buf[OFF_FLAGS],
            hsize,
            seq: buf[OFF_SEQ],
            ack: buf[OFF_ACK],
        })
    }

    /// `true` when the flags describe a bare acknowledgment (the BSY bit
    /// is ignored for the purpose of this test). Flags only: the caller
    /// must also check for a payload.
    pub fn is_pure_ack(&self) -> bool {
        self.flags & !flags::BSY == flags::ACK
    }
}

/// Parsed view of the extended SYN header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynHeader {
    pub flags: u8,
    pub seq: u8,
    pub ack: u8,
    pub xflags: u8,
    /// Peer's max unacked segments (its receive window).
    pub oss_max: u8,
    /// Peer's max segment size, header included.
    pub sgs_max: u16,
    /// Retransmission timeout in the sender's units.
    pub rex_to: u16,
    /// Cumulative-ack timeout in the sender's units.
    pub cak_to: u16,
    /// Null/keep-alive timeout in the sender's units.
    pub nul_to: u16,
    pub rex_max: u8,
    pub cak_max: u8,
    pub osa_max: u8,
    /// Unit exponent: timeout fields count 10^-units seconds.
    pub units: u8,
    pub conn_id: u32,
}

impl SynHeader {
    /// Protocol version encoded in the high nibble of the xflags byte.
    pub fn version(&self) -> u8 {
        self.xflags >> 4
    }

    /// `true` when the peer proposed header checksums.
    pub fn checksum_enabled(&self) -> bool {
        self.xflags & xflags::CHK != 0
    }

    /// Parse the extended header from a buffer whose fixed header has
    /// already been accepted (checksum included, since it covers the whole
    /// 24 bytes).
    pub fn parse(buf: &[u8]) -> Result<SynHeader, SegmentError> {
        if buf.len() != SYN_HEADER_LEN || buf[OFF_HSIZE] as usize != SYN_HEADER_LEN {
            return Err(SegmentError::BadSyn);
        }
        let hdr = SynHeader {
            flags: buf[OFF_FLAGS],
            seq: buf[OFF_SEQ],
            ack: buf[OFF_ACK],
            xflags: buf[OFF_XFLAGS],
            oss_max: buf[OFF_OSS_MAX],
            sgs_max: ld16(buf, OFF_SGS_MAX),
            rex_to: ld16(buf, OFF_REX_TO),
            cak_to: ld16(buf, OFF_CAK_TO),
            nul_to: ld16(buf, OFF_NUL_TO),
            rex_max: buf[OFF_REX_MAX],
            cak_max: buf[OFF_CAK_MAX],
            osa_max: buf[OFF_OSA_MAX],
            units: buf[OFF_UNITS],
            conn_id: ld32(buf, OFF_CONN_ID),
        };
        if hdr.version() != VERSION_1 {
            return Err(SegmentError::BadSyn);
        }
        Ok(hdr)
    }

    /// Write this header as the first [`SYN_HEADER_LEN`] bytes of a new
    /// segment buffer.  The checksum field is left zero; the sender fills
    /// it in just before transmission.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = vec![0u8; SYN_HEADER_LEN];
        buf[OFF_FLAGS] = self.flags;
        buf[OFF_HSIZE] = SYN_HEADER_LEN as u8;
        buf[OFF_SEQ] = self.seq;
        buf[OFF_ACK] = self.ack;
        buf[OFF_XFLAGS] = (VERSION_1 << 4) | (self.xflags & 0x0f);
        buf[OFF_OSS_MAX] = self.oss_max;
        st16(&mut buf, OFF_SGS_MAX, self.sgs_max);
        st16(&mut buf, OFF_REX_TO, self.rex_to);
        st16(&mut buf, OFF_CAK_TO, self.cak_to);
        st16(&mut buf, OFF_NUL_TO, self.nul_to);
        buf[OFF_REX_MAX] = self.rex_max;
        buf[OFF_CAK_MAX] = self.cak_max;
        buf[OFF_OSA_MAX] = self.osa_max;
        buf[OFF_UNITS] = self.units;
        st32(&mut buf, OFF_CONN_ID, self.conn_id);
        buf
    }
}

/// Allocate a segment buffer holding a fixed header followed by `payload`.
///
/// Spare and checksum bytes are zeroed; the ack number and checksum are
/// rewritten by the sender on every (re)transmission.
pub fn build(flags: u8, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&[flags, HEADER_LEN as u8, seq, 0, 0, 0, 0, 0]);
    buf.extend_from_slice(payload);
    buf
}

/// Rewrite the per-transmission header fields of an outgoing segment:
/// current cumulative ack number, optional BSY flag, and (when enabled)
/// a fresh checksum.  Retransmissions pass through here again so the peer
/// always sees up-to-date ack/busy state.
pub fn finalize(seg: &mut [u8], ack: u8, busy: bool, add_checksum: bool) {
    if busy {
        seg[OFF_FLAGS] |= flags::BSY;
    }
    seg[OFF_ACK] = ack;
    let hsize = seg[OFF_HSIZE] as usize;
    seg[hsize - 2] = 0;
    seg[hsize - 1] = 0;
    if add_checksum {
        let cs = fold_sum(&seg[..hsize]);
        st16(seg, hsize - 2, cs);
    }
}

/// Flags byte of an already-validated segment buffer.
pub fn flags_of(seg: &[u8]) -> u8 {
    seg[OFF_FLAGS]
}

/// Header size byte of an already-validated segment buffer.
pub fn hsize_of(seg: &[u8]) -> usize {
    seg[OFF_HSIZE] as usize
}

/// One's-complement sum of consecutive big-endian 16-bit words.
///
/// With the checksum field zeroed this yields the value to store; with the
/// field populated it yields zero for an intact header.
fn fold_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u32::from(u16::from_be_bytes([data[i], data[i + 1]]));
        i += 2;
    }
    if i < data.len() {
        sum += u32::from(data[i]) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn ld16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn st16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_be_bytes());
}

fn ld32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn st32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_then_parse_roundtrip() {
        let mut seg = build(flags::ACK, 42, b"hello");
        finalize(&mut seg, 7, false, true);

        let hdr = Header::parse(&seg, true).unwrap();
        assert_eq!(hdr.flags, flags::ACK);
        assert_eq!(hdr.hsize as usize, HEADER_LEN);
        assert_eq!(hdr.seq, 42);
        assert_eq!(hdr.ack, 7);
        assert_eq!(&seg[HEADER_LEN..], b"hello");
    }

    #[test]
    fn short_buffer_rejected() {
        assert_eq!(Header::parse(&[], false), Err(SegmentError::BadSize));
        assert_eq!(
            Header::parse(&[0u8; HEADER_LEN - 1], false),
            Err(SegmentError::BadSize)
        );
    }

    #[test]
    fn claimed_header_larger_than_buffer_rejected() {
        let mut seg = build(0, 0, b"");
        seg[1] = 24; // claims a SYN-sized header the buffer does not have
        assert_eq!(Header::parse(&seg, false), Err(SegmentError::BadSize));
    }

    #[test]
    fn corrupt_header_fails_checksum() {
        let mut seg = build(flags::ACK, 1, b"");
        finalize(&mut seg, 0, false, true);
        seg[2] ^= 0xff;
        assert_eq!(Header::parse(&seg, true), Err(SegmentError::BadChecksum));
        // With verification off the same bytes parse fine.
        assert!(Header::parse(&seg, false).is_ok());
    }

    #[test]
    fn finalize_refreshes_ack_and_checksum() {
        let mut seg = build(flags::ACK, 5, b"x");
        finalize(&mut seg, 10, false, true);
        assert!(Header::parse(&seg, true).is_ok());

        // A retransmission carries a newer ack number; the checksum must be
        // recomputed, not accumulated.
        finalize(&mut seg, 11, false, true);
        let hdr = Header::parse(&seg, true).unwrap();
        assert_eq!(hdr.ack, 11);
    }

    #[test]
    fn busy_flag_set_on_finalize() {
        let mut seg = build(flags::ACK, 5, b"");
        finalize(&mut seg, 0, true, true);
        let hdr = Header::parse(&seg, true).unwrap();
        assert_ne!(hdr.flags & flags::BSY, 0);
        assert!(hdr.is_pure_ack(), "BSY must not disturb pure-ack detection");
    }

    #[test]
    fn pure_ack_detection() {
        let ack = Header { flags: flags::ACK, hsize: 8, seq: 0, ack: 0 };
        let data = Header { flags: flags::ACK | flags::NUL, hsize: 8, seq: 0, ack: 0 };
        assert!(ack.is_pure_ack());
        assert!(!data.is_pure_ack());
    }

    fn sample_syn() -> SynHeader {
        SynHeader {
            flags: flags::SYN | flags::ACK,
            seq: 50,
            ack: 10,
            xflags: xflags::ONE | xflags::CHK,
            oss_max: 16,
            sgs_max: 1464,
            rex_to: 100,
            cak_to: 50,
            nul_to: 3000,
            rex_max: 15,
            cak_max: 5,
            osa_max: 0,
            units: 3,
            conn_id: 0xdead_beef,
        }
    }

    #[test]
    fn syn_roundtrip() {
        let mut seg = sample_syn().build();
        finalize(&mut seg, 10, false, true);

        // The fixed-header view and the checksum still work on a SYN.
        let hdr = Header::parse(&seg, true).unwrap();
        assert_eq!(hdr.hsize as usize, SYN_HEADER_LEN);

        let syn = SynHeader::parse(&seg).unwrap();
        assert_eq!(syn.version(), VERSION_1);
        assert!(syn.checksum_enabled());
        assert_eq!(syn.seq, 50);
        assert_eq!(syn.oss_max, 16);
        assert_eq!(syn.sgs_max, 1464);
        assert_eq!(syn.rex_to, 100);
        assert_eq!(syn.cak_to, 50);
        assert_eq!(syn.nul_to, 3000);
        assert_eq!(syn.rex_max, 15);
        assert_eq!(syn.cak_max, 5);
        assert_eq!(syn.units, 3);
        assert_eq!(syn.conn_id, 0xdead_beef);
    }

    #[test]
    fn syn_with_trailing_data_rejected() {
        let mut seg = sample_syn().build();
        seg.push(0);
        assert_eq!(SynHeader::parse(&seg), Err(SegmentError::BadSyn));
    }

    #[test]
    fn syn_bad_version_rejected() {
        let mut seg = sample_syn().build();
        seg[4] = (2 << 4) | (seg[4] & 0x0f);
        assert_eq!(SynHeader::parse(&seg), Err(SegmentError::BadSyn));
    }

    #[test]
    fn multibyte_fields_big_endian_on_wire() {
        let seg = sample_syn().build();
        assert_eq!(&seg[6..8], &[0x05, 0xb8]); // 1464
        assert_eq!(&seg[18..22], &[0xde, 0xad, 0xbe, 0xef]);
    }
}

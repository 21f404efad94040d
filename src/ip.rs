//! Strip the link and network layer envelope from captured frames
//!
//! The decoders in [`crate::segment`] expect a slice that starts exactly at the transport
//! header. This module does the stripping on their behalf: check the Ethernet ethertype, parse
//! and validate the IPv4 header, and hand back the inner segment together with the envelope
//! fields the capture driver wants to display (addresses, protocol, TTL).
//!
//! Only IPv4 is supported. Everything else is an [`EnvelopeError`] and gets skipped by the
//! driver.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Ethertype value for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Size of an untagged Ethernet header in bytes.
pub const ETHERNET_HEADER: usize = 14;

/// IP protocol number for TCP.
pub const PROTO_TCP: u8 = 6;

/// IP protocol number for UDP.
pub const PROTO_UDP: u8 = 17;

/// Minimum IPv4 header size in bytes.
const IPV4_MIN_HEADER: usize = 20;

/// Errors that can occur when stripping a frame down to its transport segment
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Frame is too short to hold an Ethernet header. Contains the frame size.
    #[error("Frame of {0} bytes is too short for an Ethernet header")]
    RuntFrame(usize),
    /// Frame does not carry an IPv4 datagram. Contains the ethertype found.
    #[error("Not an IPv4 frame (ethertype {0:#06x})")]
    NotIpv4(u16),
    /// Datagram is shorter than the minimum IPv4 header. Contains the datagram size.
    #[error("IPv4 header is 20 bytes, only passed a buffer of size {0}")]
    Truncated(usize),
    /// Version field was not 4. Contains the parsed version.
    #[error("Found version {0}, expected 4")]
    Version(u8),
    /// IHL field was outside its valid range or overruns the received bytes.
    #[error("IHL field was outside valid range of [5, 15] ({0})")]
    InvalidIhl(u8),
    /// Total length field is larger than the received bytes or smaller than the header.
    #[error("Total length field in datagram is invalid ({0})")]
    InvalidLength(usize),
}

/// Return the IPv4 datagram carried by an Ethernet frame
///
/// VLAN tagged frames are not recognized; their ethertype fails the IPv4 check.
///
/// # Errors
/// Returns an error if the frame is shorter than an Ethernet header or the ethertype is not
/// IPv4.
pub fn strip_ethernet(frame: &[u8]) -> Result<&[u8], EnvelopeError> {
    if frame.len() < ETHERNET_HEADER {
        return Err(EnvelopeError::RuntFrame(frame.len()));
    }
    let ethertype = u16::from_be_bytes(frame[12..14].try_into().unwrap());
    if ethertype != ETHERTYPE_IPV4 {
        return Err(EnvelopeError::NotIpv4(ethertype));
    }
    Ok(&frame[ETHERNET_HEADER..])
}

/// The IPv4 header fields the capture driver cares about
///
/// The envelope is informational. It is parsed so the driver can filter on the protocol number
/// and print the addresses next to the decoded record; nothing in it is handed to the
/// transport decoders.
#[derive(Debug, Clone)]
pub struct Ipv4Envelope {
    /// Source address
    pub source: Ipv4Addr,
    /// Destination address
    pub dest: Ipv4Addr,
    /// Encapsulated protocol number, e.g. [`PROTO_TCP`] or [`PROTO_UDP`]
    pub protocol: u8,
    /// Time to live
    pub ttl: u8,
    /// Header length in bytes
    pub header_len: usize,
    /// Total length of header plus payload in bytes
    pub total_len: usize,
}

impl Ipv4Envelope {
    /// Parse an IPv4 header and split off the transport segment it carries
    ///
    /// The returned slice spans exactly the bytes the total length field declares beyond the
    /// header, so the transport decoders see the segment at its received length. Trailing
    /// bytes past the total length (link layer padding on short frames) are dropped here.
    ///
    /// # Errors
    /// Returns an error if the buffer is shorter than 20 bytes, the version is not 4, the IHL
    /// is outside [5, 15] or overruns the buffer, or the total length field overruns the
    /// buffer or falls inside the header.
    pub fn strip(datagram: &[u8]) -> Result<(Self, &[u8]), EnvelopeError> {
        if datagram.len() < IPV4_MIN_HEADER {
            return Err(EnvelopeError::Truncated(datagram.len()));
        }
        let version = datagram[0] >> 4;
        if version != 4 {
            return Err(EnvelopeError::Version(version));
        }
        let ihl = datagram[0] & 0xf;
        if ihl < 5 {
            return Err(EnvelopeError::InvalidIhl(ihl));
        }
        let header_len = usize::from(ihl) * 4;
        if header_len > datagram.len() {
            return Err(EnvelopeError::InvalidIhl(ihl));
        }
        let total_len = usize::from(u16::from_be_bytes(datagram[2..4].try_into().unwrap()));
        if total_len > datagram.len() || total_len < header_len {
            return Err(EnvelopeError::InvalidLength(total_len));
        }
        let ttl = datagram[8];
        let protocol = datagram[9];
        let source = Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15]);
        let dest = Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19]);
        let envelope = Ipv4Envelope {
            source,
            dest,
            protocol,
            ttl,
            header_len,
            total_len,
        };
        let segment = &datagram[header_len..total_len];
        Ok((envelope, segment))
    }
}

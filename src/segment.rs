//! Decode TCP segments and UDP datagrams
//!
//! This module is the decoding core of the crate. Each decoder consumes a byte slice that is
//! expected to start at the first byte of the transport header, with the Ethernet and IPv4
//! envelope already removed by the caller (see [`crate::ip`]). A successful decode produces an
//! owned record; a failed decode produces a [`DecodeError`] describing why the bytes were
//! rejected.
//!
//! The buffers handed to these decoders come straight off the wire and must be treated as
//! hostile. Every slice derived from a header-declared length is preceded by an explicit bounds
//! check, so a decoder never reads outside the slice it was given no matter what the length
//! fields claim.
//!
//! Decoding is stateless and pure. Nothing is retained between calls and no packet relates to
//! any other, so the decoders can be called from any number of threads at once.

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

/// Minimum (and fixed-field) size of a TCP header in bytes.
const TCP_FIXED_HEADER: usize = 20;

/// Size of a UDP header in bytes.
const UDP_HEADER: usize = 8;

/// Errors that can occur when decoding a transport segment
///
/// Every variant is a local, per-packet failure. The capture driver skips the offending frame
/// and keeps receiving; nothing here should ever end the process.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Buffer is shorter than the minimum or declared header size.
    #[error("Segment truncated: need {needed} bytes, have {got}")]
    Truncated { needed: usize, got: usize },
    /// TCP data offset field is below the protocol minimum of 5 words.
    #[error("Data offset {0} is below the minimum of 5")]
    InvalidHeaderLength(u8),
    /// The three reserved TCP header bits were not zero.
    #[error("Reserved header bits set: {0:#05b}")]
    ReservedBitsSet(u8),
    /// UDP length field is below the 8 byte header minimum.
    #[error("Length field {0} is below the UDP header size of 8")]
    InvalidLength(u16),
    /// UDP length field disagrees with the number of bytes actually received.
    #[error("Length field says {declared} bytes but buffer has {actual}")]
    LengthMismatch { declared: u16, actual: usize },
}

bitflags! {
    /// TCP control bits
    ///
    /// The nine flag bits from the combined offset/reserved/flags field of the TCP header.
    #[repr(transparent)]
    pub struct TcpFlags: u16 {
        /// ECN-nonce concealment protection
        const NS = 0b1_0000_0000;
        /// Congestion window reduced
        const CWR = 0b1000_0000;
        /// ECN-Echo
        const ECE = 0b100_0000;
        /// Urgent pointer field is significant
        const URG = 0b10_0000;
        /// Acknowledgment field is significant
        const ACK = 0b10000;
        /// Push buffered data to the application
        const PSH = 0b1000;
        /// Reset the connection
        const RST = 0b100;
        /// Synchronize sequence numbers
        const SYN = 0b10;
        /// Last packet from the sender
        const FIN = 0b1;
    }
}

/// Canonical rendering order for the flag list. ECE, CWR, and NS trail the six classic flags.
const FLAG_ORDER: &[(TcpFlags, &str)] = &[
    (TcpFlags::URG, "URG"),
    (TcpFlags::ACK, "ACK"),
    (TcpFlags::PSH, "PSH"),
    (TcpFlags::RST, "RST"),
    (TcpFlags::SYN, "SYN"),
    (TcpFlags::FIN, "FIN"),
    (TcpFlags::ECE, "ECE"),
    (TcpFlags::CWR, "CWR"),
    (TcpFlags::NS, "NS"),
];

/// One decoded TCP segment
///
/// All multi-byte fields have already been converted from network byte order. The record is
/// built fresh by every [`TcpSegment::decode`] call and holds no connection to any other
/// segment.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    /// Source port
    pub source: u16,
    /// Destination port
    pub dest: u16,
    /// Sequence number
    pub seq: u32,
    /// Acknowledgment number
    pub ack: u32,
    /// Header length in 32-bit words, always in the range 5..=15
    pub data_offset: u8,
    /// Control bits such as SYN, ACK, RST
    pub flags: TcpFlags,
    /// Window size
    pub window: u16,
    /// Checksum as received. It is stored for display but never verified.
    pub checksum: u16,
    /// Urgent pointer
    pub urgent: u16,
    /// Option bytes between the fixed header and the payload. Empty when the data offset is 5.
    pub options: Vec<u8>,
    /// Everything after the header
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Decode a TCP segment from a slice of bytes
    ///
    /// The slice must start at the first byte of the TCP header. The bytes after the header,
    /// as declared by the data offset field, become the payload.
    ///
    /// # Errors
    /// Returns [`DecodeError::Truncated`] if the slice is shorter than the fixed header or the
    /// header length the data offset declares, [`DecodeError::InvalidHeaderLength`] if the data
    /// offset is below 5, and [`DecodeError::ReservedBitsSet`] if any of the three reserved
    /// bits are set. Nonzero reserved bits are treated as nonconformant traffic rather than
    /// silently tolerated.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < TCP_FIXED_HEADER {
            return Err(DecodeError::Truncated {
                needed: TCP_FIXED_HEADER,
                got: data.len(),
            });
        }
        let source = u16::from_be_bytes(data[0..2].try_into().unwrap());
        let dest = u16::from_be_bytes(data[2..4].try_into().unwrap());
        let seq = u32::from_be_bytes(data[4..8].try_into().unwrap());
        let ack = u32::from_be_bytes(data[8..12].try_into().unwrap());
        let off_flags = u16::from_be_bytes(data[12..14].try_into().unwrap());
        let data_offset = (off_flags >> 12) as u8;
        if data_offset < 5 {
            return Err(DecodeError::InvalidHeaderLength(data_offset));
        }
        let header_len = usize::from(data_offset) * 4;
        if data.len() < header_len {
            return Err(DecodeError::Truncated {
                needed: header_len,
                got: data.len(),
            });
        }
        let reserved = ((off_flags >> 9) & 0b111) as u8;
        if reserved != 0 {
            return Err(DecodeError::ReservedBitsSet(reserved));
        }
        let flags = TcpFlags::from_bits_truncate(off_flags & 0x1FF);
        let window = u16::from_be_bytes(data[14..16].try_into().unwrap());
        let checksum = u16::from_be_bytes(data[16..18].try_into().unwrap());
        let urgent = u16::from_be_bytes(data[18..20].try_into().unwrap());
        let options = data[TCP_FIXED_HEADER..header_len].to_vec();
        let payload = data[header_len..].to_vec();
        Ok(TcpSegment {
            source,
            dest,
            seq,
            ack,
            data_offset,
            flags,
            window,
            checksum,
            urgent,
            options,
            payload,
        })
    }

    /// Header length in bytes, derived from the data offset field.
    #[must_use]
    pub fn header_len(&self) -> usize {
        usize::from(self.data_offset) * 4
    }
}

impl fmt::Display for TcpSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source Port: {}", self.source)?;
        writeln!(f, "Dest Port: {}", self.dest)?;
        writeln!(f, "Sequence Number: {}", self.seq)?;
        writeln!(f, "Ack Number: {}", self.ack)?;
        writeln!(f, "Header Length: {} bytes", self.header_len())?;
        // Decode rejects nonzero reserved bits, so a record always shows them clear.
        writeln!(f, "Reserved Bits: 0x0")?;
        writeln!(f, "Window Size: {}", self.window)?;
        writeln!(f, "Checksum: {:#06x}", self.checksum)?;
        writeln!(f, "Urgent Pointer: {}", self.urgent)?;
        writeln!(f, "Flags: {}", format_flags(self.flags))?;
        writeln!(
            f,
            "Options ({} bytes): {}",
            self.options.len(),
            format_bytes(&self.options)
        )?;
        write!(
            f,
            "Payload ({} bytes): {}",
            self.payload.len(),
            format_bytes(&self.payload)
        )
    }
}

/// One decoded UDP datagram
///
/// Unlike TCP, UDP carries its own authoritative length field, which decode checks against the
/// byte count actually received.
#[derive(Debug, Clone)]
pub struct UdpDatagram {
    /// Source port
    pub source: u16,
    /// Destination port
    pub dest: u16,
    /// Declared length of header plus payload, matching the received size exactly
    pub length: u16,
    /// Checksum as received, stored but not verified
    pub checksum: u16,
    /// Everything after the 8 byte header
    pub payload: Vec<u8>,
}

impl UdpDatagram {
    /// Decode a UDP datagram from a slice of bytes
    ///
    /// # Errors
    /// Returns [`DecodeError::Truncated`] if the slice is shorter than the 8 byte header,
    /// [`DecodeError::InvalidLength`] if the length field is below 8, and
    /// [`DecodeError::LengthMismatch`] if the length field does not equal the slice length
    /// exactly. A mismatch means truncation, padding, or malformed construction and is never
    /// silently tolerated.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < UDP_HEADER {
            return Err(DecodeError::Truncated {
                needed: UDP_HEADER,
                got: data.len(),
            });
        }
        let source = u16::from_be_bytes(data[0..2].try_into().unwrap());
        let dest = u16::from_be_bytes(data[2..4].try_into().unwrap());
        let length = u16::from_be_bytes(data[4..6].try_into().unwrap());
        let checksum = u16::from_be_bytes(data[6..8].try_into().unwrap());
        if usize::from(length) < UDP_HEADER {
            return Err(DecodeError::InvalidLength(length));
        }
        if usize::from(length) != data.len() {
            return Err(DecodeError::LengthMismatch {
                declared: length,
                actual: data.len(),
            });
        }
        let payload = data[UDP_HEADER..].to_vec();
        Ok(UdpDatagram {
            source,
            dest,
            length,
            checksum,
            payload,
        })
    }
}

impl fmt::Display for UdpDatagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source Port: {}", self.source)?;
        writeln!(f, "Dest Port: {}", self.dest)?;
        writeln!(f, "Length: {}", self.length)?;
        writeln!(f, "Checksum: {:#06x}", self.checksum)?;
        write!(
            f,
            "Payload ({} bytes): {}",
            self.payload.len(),
            format_bytes(&self.payload)
        )
    }
}

/// Render the set flags in canonical order, `[None]` when no flag is set
///
/// The empty case renders an explicit marker rather than an empty string so the output stays
/// parseable by eye.
#[must_use]
pub fn format_flags(flags: TcpFlags) -> String {
    let names: Vec<&str> = FLAG_ORDER
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        String::from("[None]")
    } else {
        format!("[{}]", names.join(", "))
    }
}

/// Render a byte sequence for diagnostic display
///
/// Printable ASCII bytes render as the literal character, everything else (including space, so
/// runs of bytes stay unambiguous) as a two digit hex escape like `0x1f`. Bytes are separated
/// by single spaces. This is display output, not a round-trippable encoding.
#[must_use]
pub fn format_bytes(bytes: &[u8]) -> String {
    let rendered: Vec<String> = bytes
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() {
                char::from(b).to_string()
            } else {
                format!("{b:#04x}")
            }
        })
        .collect();
    rendered.join(" ")
}

#[cfg(test)]
mod segment_testing {
    use super::*;

    /// SYN to port 80: seq 1000, window 8192, checksum 0xabcd, no options, no payload.
    const SYN_SEGMENT: &[u8] = &[
        0x04, 0xd2, 0x00, 0x50, 0x00, 0x00, 0x03, 0xe8, 0x00, 0x00, 0x00, 0x00, 0x50, 0x02, 0x20,
        0x00, 0xab, 0xcd, 0x00, 0x00,
    ];

    #[test]
    fn tcp_syn_no_options() {
        let segment = TcpSegment::decode(SYN_SEGMENT).unwrap();
        assert_eq!(segment.source, 1234);
        assert_eq!(segment.dest, 80);
        assert_eq!(segment.seq, 1000);
        assert_eq!(segment.ack, 0);
        assert_eq!(segment.data_offset, 5);
        assert_eq!(segment.flags, TcpFlags::SYN);
        assert_eq!(segment.window, 8192);
        assert_eq!(segment.checksum, 0xabcd);
        assert_eq!(segment.urgent, 0);
        assert!(segment.options.is_empty());
        assert!(segment.payload.is_empty());
    }

    #[test]
    fn tcp_syn_rendering() {
        let segment = TcpSegment::decode(SYN_SEGMENT).unwrap();
        let text = segment.to_string();
        assert!(text.contains("Source Port: 1234"));
        assert!(text.contains("Header Length: 20 bytes"));
        assert!(text.contains("Checksum: 0xabcd"));
        assert!(text.contains("Flags: [SYN]"));
        assert!(text.contains("Payload (0 bytes):"));
    }

    #[test]
    fn tcp_payload_after_fixed_header() {
        let mut data = SYN_SEGMENT.to_vec();
        data.extend_from_slice(b"GET / HTTP/1.1");
        let segment = TcpSegment::decode(&data).unwrap();
        assert!(segment.options.is_empty());
        assert_eq!(segment.payload, b"GET / HTTP/1.1");
    }

    #[test]
    fn tcp_options_with_offset_eight() {
        let mut data = SYN_SEGMENT.to_vec();
        // Data offset 8: 12 option bytes, then 4 bytes of payload.
        data[12] = 0x80;
        data.extend_from_slice(&[0x02, 0x04, 0x05, 0xb4, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x00]);
        data.extend_from_slice(b"data");
        let segment = TcpSegment::decode(&data).unwrap();
        assert_eq!(segment.data_offset, 8);
        assert_eq!(segment.options.len(), 12);
        assert_eq!(segment.options[0], 0x02);
        assert_eq!(segment.payload, b"data");
    }

    #[test]
    fn tcp_truncated_below_fixed_header() {
        let err = TcpSegment::decode(&SYN_SEGMENT[..19]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { needed: 20, got: 19 }));
        assert!(matches!(
            TcpSegment::decode(&[]).unwrap_err(),
            DecodeError::Truncated { .. }
        ));
    }

    #[test]
    fn tcp_truncated_below_declared_header() {
        let mut data = SYN_SEGMENT.to_vec();
        // Data offset 15 claims a 60 byte header the buffer does not have.
        data[12] = 0xf0;
        let err = TcpSegment::decode(&data).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { needed: 60, got: 20 }));
    }

    #[test]
    fn tcp_rejects_small_data_offset() {
        let mut data = SYN_SEGMENT.to_vec();
        data[12] = 0x40;
        let err = TcpSegment::decode(&data).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidHeaderLength(4)));
    }

    #[test]
    fn tcp_rejects_reserved_bits() {
        for bit in [0x02, 0x04, 0x08] {
            let mut data = SYN_SEGMENT.to_vec();
            data[12] |= bit;
            let err = TcpSegment::decode(&data).unwrap_err();
            assert!(matches!(err, DecodeError::ReservedBitsSet(_)));
        }
    }

    #[test]
    fn tcp_flag_order_is_canonical() {
        let mut data = SYN_SEGMENT.to_vec();
        // ACK, PSH, and FIN together.
        data[13] = 0b0001_1001;
        let segment = TcpSegment::decode(&data).unwrap();
        assert_eq!(format_flags(segment.flags), "[ACK, PSH, FIN]");
        assert_eq!(format_flags(TcpFlags::empty()), "[None]");
    }

    #[test]
    fn udp_hello_datagram() {
        let mut data = vec![0x10, 0x92, 0x00, 0x35, 0x00, 0x10, 0x00, 0x00];
        data.extend_from_slice(b"HELLO!!!");
        let datagram = UdpDatagram::decode(&data).unwrap();
        assert_eq!(datagram.source, 4242);
        assert_eq!(datagram.dest, 53);
        assert_eq!(datagram.length, 16);
        assert_eq!(datagram.payload.len(), 8);
        let text = datagram.to_string();
        assert!(text.contains("Payload (8 bytes): H E L L O ! ! !"));
    }

    #[test]
    fn udp_truncated_header() {
        let zeros = [0u8; 8];
        for len in 0..8 {
            let err = UdpDatagram::decode(&zeros[..len]).unwrap_err();
            assert!(matches!(err, DecodeError::Truncated { needed: 8, .. }));
        }
    }

    #[test]
    fn udp_rejects_length_below_header() {
        let data = [0x10, 0x92, 0x00, 0x35, 0x00, 0x07, 0x00, 0x00];
        let err = UdpDatagram::decode(&data).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidLength(7)));
    }

    #[test]
    fn udp_rejects_length_mismatch() {
        let mut data = vec![0x10, 0x92, 0x00, 0x35, 0x00, 0x20, 0x00, 0x00];
        data.extend_from_slice(b"HELLO!!!");
        let err = UdpDatagram::decode(&data).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LengthMismatch {
                declared: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn rendering_is_deterministic() {
        let segment = TcpSegment::decode(SYN_SEGMENT).unwrap();
        assert_eq!(segment.to_string(), segment.to_string());
    }

    #[test]
    fn byte_formatting_escapes_non_printable() {
        assert_eq!(format_bytes(&[]), "");
        assert_eq!(format_bytes(b"Hi!"), "H i !");
        assert_eq!(format_bytes(&[0x48, 0x00, 0x20, 0xff]), "H 0x00 0x20 0xff");
    }
}

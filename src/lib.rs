//! Capture and inspect TCP and UDP packets
//!
//! This crate is a diagnostic packet inspector. The [`segment`] module is the core: given the
//! raw bytes of one transport segment it decodes a structured [`segment::TcpSegment`] or
//! [`segment::UdpDatagram`] and renders it as deterministic human-readable text. Decoding is
//! strict: truncated buffers, bad length fields, and nonzero TCP reserved bits are typed
//! failures, and no length field in the packet can make a decoder read outside the buffer it
//! was given.
//!
//! The [`ip`] module strips the Ethernet and IPv4 envelope off captured frames, and the
//! [`capture`] module drives the receive loop and printing. **Capturing traffic requires
//! elevated privileges to run properly**.

pub use pcap::Device;
pub mod capture;
pub mod ip;
pub mod segment;

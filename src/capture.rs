//! Capture frames and print decoded transport records
//!
//! [`Spy`] owns the capture device and the receive loop. For every frame it receives it strips
//! the Ethernet and IPv4 envelope, filters on the selected transport protocol, decodes the
//! inner segment, and prints the record together with the addresses from the envelope.
//! **Opening a capture device requires elevated privileges.**
//!
//! Malformed frames never stop the loop. Every stripping or decoding failure is logged at
//! debug level and the loop moves on to the next frame; only errors from the capture device
//! itself abort the run. The loop checks a shared stop flag between frames so a controlling
//! thread (or a signal handler) can shut it down cleanly, and the device handle is released on
//! every exit path when the capture value drops.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pcap::{Capture, Device, Inactive};
use thiserror::Error;
use tracing::{debug, info};

use crate::ip::{self, Ipv4Envelope};
use crate::segment::{TcpSegment, UdpDatagram};

/// Errors that can occur when running a capture session
#[derive(Debug, Error)]
pub enum SpyError {
    /// Failed to find a reasonable default device
    #[error("Could not find a default device")]
    NoDevice,
    /// Failed to do a capture device operation
    #[error("Failed to do a capture device operation")]
    DeviceError(#[from] pcap::Error),
}

/// Transport protocol a [`Spy`] inspects
///
/// Selection is made by the caller up front; the decoders never guess the protocol from the
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    /// The IP protocol number this transport is carried under.
    #[must_use]
    pub fn protocol_number(self) -> u8 {
        match self {
            Self::Tcp => ip::PROTO_TCP,
            Self::Udp => ip::PROTO_UDP,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

/// Inspect one transport protocol on a capture device
pub struct Spy {
    device: Device,
    transport: Transport,
}

impl Spy {
    /// Set up a spy for the given transport on an interface
    ///
    /// When no device is passed, the default capture device is looked up.
    ///
    /// # Errors
    /// Returns an error if the device lookup fails or finds nothing.
    pub fn open(transport: Transport, device: Option<Device>) -> Result<Self, SpyError> {
        let device = match device {
            Some(d) => d,
            None => Device::lookup()?.ok_or(SpyError::NoDevice)?,
        };
        Ok(Self { device, transport })
    }

    /// Receive frames and print decoded records until the stop flag is set
    ///
    /// The capture handle uses a short read timeout so the stop flag is observed promptly even
    /// on a quiet interface. Relaxed ordering is enough for the flag; the loop only needs to
    /// see the store shortly after it happens.
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened or the capture fails mid-run. Frames
    /// that fail to strip or decode are skipped, not errors.
    pub fn run(self, stop: Arc<AtomicBool>) -> Result<(), SpyError> {
        let mut capture = Capture::<Inactive>::from_device(self.device.clone())?
            .timeout(50)
            .open()?;
        info!(device = %self.device.name, transport = %self.transport, "listening");
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            match capture.next_packet() {
                Ok(frame) => self.inspect(frame.data),
                Err(pcap::Error::TimeoutExpired) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Strip, filter, decode, and print one received frame.
    fn inspect(&self, frame: &[u8]) {
        let datagram = match ip::strip_ethernet(frame) {
            Ok(d) => d,
            Err(e) => {
                debug!(%e, "skipping frame");
                return;
            }
        };
        let (envelope, segment) = match Ipv4Envelope::strip(datagram) {
            Ok(parts) => parts,
            Err(e) => {
                debug!(%e, "skipping datagram");
                return;
            }
        };
        if envelope.protocol != self.transport.protocol_number() {
            return;
        }
        match self.transport {
            Transport::Tcp => match TcpSegment::decode(segment) {
                Ok(record) => print_record(&envelope, record.source, record.dest, &record),
                Err(e) => debug!(%e, "failed to decode TCP segment"),
            },
            Transport::Udp => match UdpDatagram::decode(segment) {
                Ok(record) => print_record(&envelope, record.source, record.dest, &record),
                Err(e) => debug!(%e, "failed to decode UDP datagram"),
            },
        }
    }
}

/// Print a decoded record with the addresses from its envelope.
fn print_record(envelope: &Ipv4Envelope, src_port: u16, dst_port: u16, record: &dyn fmt::Display) {
    println!("\n=========================");
    println!("Source: {}:{}", envelope.source, src_port);
    println!("Destination: {}:{}", envelope.dest, dst_port);
    println!("{record}");
    println!("=========================");
}

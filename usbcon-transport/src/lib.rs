//! Transport layer for USB console devices
//!
//! Provides device enumeration and bulk endpoint I/O. The session engine only
//! talks to the two traits defined here, so any USB stack (or a test double)
//! can drive it.

pub mod error;
pub mod libusb;

pub use error::{Error, Result};
pub use libusb::LibUsbTransport;

use std::time::Duration;

use bitflags::bitflags;
use bytes::Bytes;
use tracing::trace;
use usbcon_types::DeviceDescriptor;

bitflags! {
    /// Optional operations a device handle supports
    ///
    /// A handle for a whole device usually supports everything. A handle
    /// for a single interface (e.g. WinUSB) needs no configuration or claim.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        /// Configuration can be selected
        const CONFIGURE = 1;
        /// Interfaces must be claimed before use
        const CLAIM_INTERFACE = 1 << 1;
        /// Device can be reset
        const RESET = 1 << 2;
    }
}

/// Outcome of a bulk read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes received before the timeout
    Data(Bytes),

    /// The timeout elapsed with nothing received
    TimedOut,
}

impl ReadOutcome {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// USB stack entry point (device enumeration and opening)
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait Transport: Send {
    /// List connected devices
    ///
    /// String descriptors are only read when `with_strings` is set, since
    /// that requires briefly opening each device.
    fn enumerate(&mut self, with_strings: bool) -> Result<Vec<DeviceDescriptor>>;

    /// Open a device previously returned by [`Transport::enumerate`]
    fn open(&mut self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceHandle>>;

    /// Release process-wide USB resources
    ///
    /// Handles already opened stay valid until dropped. Further calls to
    /// `enumerate`/`open` fail.
    fn teardown(&mut self);

    /// Short description for logs
    fn name(&self) -> String;
}

/// An opened USB device
///
/// Dropping the handle closes the device.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait DeviceHandle: Send {
    /// Operations this handle supports
    fn capabilities(&self) -> Capabilities;

    /// Check if the handle is still usable
    fn is_open(&self) -> bool;

    /// Select the active configuration
    fn set_configuration(&mut self, configuration: u8) -> Result<()>;

    /// Claim an interface for exclusive use
    fn claim_interface(&mut self, interface: u8) -> Result<()>;

    /// Release a claimed interface
    fn release_interface(&mut self, interface: u8) -> Result<()>;

    /// Reset the device
    fn reset(&mut self) -> Result<()>;

    /// Check that `writer` and `reader` are bulk endpoints of `interface`
    ///
    /// Returns the reader's maximum packet size. Reads are capped at that
    /// size afterwards, so every received packet completes a transfer.
    fn bind_endpoints(&mut self, interface: u8, writer: u8, reader: u8) -> Result<usize>;

    /// Bulk write; returns the number of bytes written
    fn write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize>;

    /// Bulk read of at most `max_len` bytes
    fn read(&mut self, endpoint: u8, max_len: usize, timeout: Duration) -> Result<ReadOutcome>;

    /// Discard bytes waiting on an IN endpoint; returns how many were dropped
    fn flush(&mut self, endpoint: u8) -> Result<usize> {
        drain(self, endpoint)
    }
}

/// Per-read timeout while draining
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Bytes requested per read while draining
pub const DRAIN_CHUNK: usize = 512;

/// Maximum reads per drain
pub const DRAIN_MAX_READS: usize = 64;

/// Read and discard until the endpoint goes quiet
///
/// Bounded by [`DRAIN_MAX_READS`] so a device that streams without pause
/// cannot stall the caller.
pub fn drain<H: DeviceHandle + ?Sized>(handle: &mut H, endpoint: u8) -> Result<usize> {
    let mut discarded = 0;

    for _ in 0..DRAIN_MAX_READS {
        match handle.read(endpoint, DRAIN_CHUNK, DRAIN_TIMEOUT)? {
            ReadOutcome::Data(bytes) => {
                trace!("Discarding {} stale bytes: {}", bytes.len(), hex::encode(&bytes));
                discarded += bytes.len();
            }
            ReadOutcome::TimedOut => break,
        }
    }

    Ok(discarded)
}

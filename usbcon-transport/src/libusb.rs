//! libusb transport (via `rusb`)
//!
//! Works with any device libusb can open: the whole device is opened, so
//! configuration selection and interface claims are available.

use std::time::Duration;

use bytes::Bytes;
use rusb::{Context, UsbContext};
use tracing::{debug, trace, warn};
use usbcon_types::DeviceDescriptor;

use crate::{Capabilities, DeviceHandle, ReadOutcome, Transport, error::*};

/// Transport backed by a libusb context
pub struct LibUsbTransport {
    context: Option<Context>,
}

impl LibUsbTransport {
    /// Create a new libusb context
    pub fn new() -> Result<Self> {
        let mut context = Context::new()?;
        context.set_log_level(rusb::LogLevel::Info);

        Ok(Self {
            context: Some(context),
        })
    }

    fn context(&self) -> Result<&Context> {
        self.context.as_ref().ok_or(Error::ContextReleased)
    }
}

/// Read manufacturer and product strings, skipping devices we may not open
fn read_strings(device: &rusb::Device<Context>, raw: &rusb::DeviceDescriptor, desc: &mut DeviceDescriptor) {
    match device.open() {
        Ok(handle) => {
            desc.manufacturer = handle.read_manufacturer_string_ascii(raw).ok();
            desc.product = handle.read_product_string_ascii(raw).ok();
        }
        Err(e) => {
            trace!("Cannot read strings of {}: {}", desc, e);
        }
    }
}

impl Transport for LibUsbTransport {
    fn enumerate(&mut self, with_strings: bool) -> Result<Vec<DeviceDescriptor>> {
        let devices = self.context()?.devices()?;
        let mut found = Vec::with_capacity(devices.len());

        for device in devices.iter() {
            let raw = match device.device_descriptor() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(
                        "Skipping device at bus {} addr {}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            let mut desc = DeviceDescriptor::new(raw.vendor_id(), raw.product_id())
                .at(device.bus_number(), device.address());

            if with_strings {
                read_strings(&device, &raw, &mut desc);
            }

            trace!("Found {}", desc);
            found.push(desc);
        }

        debug!("Enumerated {} devices", found.len());
        Ok(found)
    }

    fn open(&mut self, device: &DeviceDescriptor) -> Result<Box<dyn DeviceHandle>> {
        let devices = self.context()?.devices()?;

        let usb_device = devices
            .iter()
            .find(|d| d.bus_number() == device.bus_number && d.address() == device.address)
            .ok_or_else(|| Error::DeviceGone(device.to_string()))?;

        // A device re-plugged into the same slot may carry a new identity
        let raw = usb_device.device_descriptor()?;
        if raw.vendor_id() != device.vendor_id || raw.product_id() != device.product_id {
            return Err(Error::DeviceGone(device.to_string()));
        }

        debug!("Opening {}...", device);

        let mut handle = usb_device.open()?;

        // Not available on every platform
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            trace!("Kernel driver auto-detach unavailable: {}", e);
        }

        Ok(Box::new(LibUsbHandle {
            handle,
            description: device.to_string(),
            reader: None,
            lost: false,
        }))
    }

    fn teardown(&mut self) {
        if self.context.take().is_some() {
            debug!("Released libusb context");
        }
    }

    fn name(&self) -> String {
        match self.context {
            Some(_) => format!("libusb {}", rusb::version().major()),
            None => "libusb (released)".to_string(),
        }
    }
}

/// Opened libusb device
struct LibUsbHandle {
    handle: rusb::DeviceHandle<Context>,
    description: String,
    /// Bound IN endpoint and its max packet size
    reader: Option<(u8, usize)>,
    lost: bool,
}

impl LibUsbHandle {
    /// Convert a libusb error, remembering when the device has gone away
    fn fail(&mut self, e: rusb::Error) -> Error {
        if e == rusb::Error::NoDevice {
            warn!("Device {} disconnected", self.description);
            self.lost = true;
            return Error::Disconnected;
        }
        Error::Usb(e)
    }
}

/// Largest read on `endpoint` that ends with the first packet received
fn read_len(bound: Option<(u8, usize)>, endpoint: u8, requested: usize) -> usize {
    match bound {
        Some((reader, max_packet)) if reader == endpoint => requested.min(max_packet),
        _ => requested,
    }
}

impl DeviceHandle for LibUsbHandle {
    fn capabilities(&self) -> Capabilities {
        // The WinUSB backend cannot change the active configuration
        if cfg!(windows) {
            Capabilities::CLAIM_INTERFACE | Capabilities::RESET
        } else {
            Capabilities::all()
        }
    }

    fn is_open(&self) -> bool {
        !self.lost
    }

    fn set_configuration(&mut self, configuration: u8) -> Result<()> {
        if cfg!(windows) {
            return Err(Error::Unsupported("set configuration"));
        }

        // Re-selecting the current configuration fails while a kernel driver is bound
        match self.handle.active_configuration() {
            Ok(active) if active == configuration => {
                trace!("Configuration {} already active", configuration);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(self.fail(e)),
        }

        self.handle
            .set_active_configuration(configuration)
            .map_err(|e| self.fail(e))
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        self.handle
            .claim_interface(interface)
            .map_err(|e| self.fail(e))
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        self.handle
            .release_interface(interface)
            .map_err(|e| self.fail(e))
    }

    fn reset(&mut self) -> Result<()> {
        // Re-enumeration after a reset is reported as NoDevice on some hosts
        match self.handle.reset() {
            Ok(()) | Err(rusb::Error::NotFound) | Err(rusb::Error::NoDevice) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn bind_endpoints(&mut self, interface: u8, writer: u8, reader: u8) -> Result<usize> {
        let config = match self.handle.device().active_config_descriptor() {
            Ok(config) => config,
            Err(e) => return Err(self.fail(e)),
        };

        let mut writer_found = false;
        let mut reader_packet = None;

        for iface in config.interfaces().filter(|i| i.number() == interface) {
            for alt in iface.descriptors() {
                for ep in alt.endpoint_descriptors() {
                    if ep.transfer_type() != rusb::TransferType::Bulk {
                        continue;
                    }

                    match ep.direction() {
                        rusb::Direction::Out if ep.address() == writer => writer_found = true,
                        rusb::Direction::In if ep.address() == reader => {
                            reader_packet = Some(usize::from(ep.max_packet_size()).max(1));
                        }
                        _ => {}
                    }
                }
            }
        }

        if !writer_found {
            return Err(Error::NoSuchEndpoint {
                interface,
                endpoint: writer,
            });
        }

        let max_packet = reader_packet.ok_or(Error::NoSuchEndpoint {
            interface,
            endpoint: reader,
        })?;

        debug!(
            "Bound endpoints 0x{:02X}/0x{:02X} (max packet {})",
            writer, reader, max_packet
        );
        self.reader = Some((reader, max_packet));
        Ok(max_packet)
    }

    fn write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize> {
        trace!(
            "Writing {} bytes to 0x{:02X}: {}",
            data.len(),
            endpoint,
            hex::encode(&data[..data.len().min(32)])
        );

        self.handle
            .write_bulk(endpoint, data, timeout)
            .map_err(|e| self.fail(e))
    }

    fn read(&mut self, endpoint: u8, max_len: usize, timeout: Duration) -> Result<ReadOutcome> {
        // A timeout mid-transfer discards what was received, so never ask
        // for more than one packet
        let mut buf = vec![0u8; read_len(self.reader, endpoint, max_len)];

        match self.handle.read_bulk(endpoint, &mut buf, timeout) {
            Ok(0) | Err(rusb::Error::Timeout) => Ok(ReadOutcome::TimedOut),
            Ok(n) => {
                buf.truncate(n);
                trace!(
                    "Read {} bytes from 0x{:02X}: {}",
                    n,
                    endpoint,
                    hex::encode(&buf[..n.min(32)])
                );
                Ok(ReadOutcome::Data(Bytes::from(buf)))
            }
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl Drop for LibUsbHandle {
    fn drop(&mut self) {
        trace!("Closing handle for {}", self.description);
    }
}

//! USB device identity structures

use std::fmt;

/// Physical location of a device on the host (bus number + device address)
///
/// Two descriptors with the same key refer to the same physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKey {
    pub bus_number: u8,
    pub address: u8,
}

impl DeviceKey {
    pub const fn new(bus_number: u8, address: u8) -> Self {
        Self { bus_number, address }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus {:03} addr {:03}", self.bus_number, self.address)
    }
}

/// Identity of one connected USB device, as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// USB vendor ID
    pub vendor_id: u16,

    /// USB product ID
    pub product_id: u16,

    /// Manufacturer string (if the device exposes one)
    pub manufacturer: Option<String>,

    /// Product string (if the device exposes one)
    pub product: Option<String>,

    /// Bus the device is attached to
    pub bus_number: u8,

    /// Device address on the bus
    pub address: u8,
}

impl DeviceDescriptor {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            manufacturer: None,
            product: None,
            bus_number: 0,
            address: 0,
        }
    }

    /// Set bus location
    pub fn at(mut self, bus_number: u8, address: u8) -> Self {
        self.bus_number = bus_number;
        self.address = address;
        self
    }

    /// Set manufacturer string
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set product string
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.bus_number, self.address)
    }

    /// Human-readable names the device reports (manufacturer first)
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.manufacturer
            .as_deref()
            .into_iter()
            .chain(self.product.as_deref())
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} ({})",
            self.vendor_id,
            self.product_id,
            self.key()
        )?;

        let names: Vec<&str> = self.names().collect();
        if !names.is_empty() {
            write!(f, " {}", names.join(" "))?;
        }

        Ok(())
    }
}

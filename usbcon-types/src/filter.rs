//! Candidate filters used to pick the target device out of an enumeration

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::descriptor::DeviceDescriptor;
use crate::error::{Error, Result};

/// Predicate over device identity
///
/// Each variant is a separate way of naming the device a session should bind
/// to. The textual form accepted by [`FromStr`] is:
///
/// ```text
/// 14be          vendor ID
/// 14be:0009     vendor ID and product ID
/// name=<regex>  manufacturer or product string match
/// ```
///
/// # Examples
///
/// ```
/// use usbcon_types::{DeviceDescriptor, DeviceFilter};
///
/// let filter: DeviceFilter = "0x14be:0009".parse().unwrap();
/// assert!(filter.matches(&DeviceDescriptor::new(0x14be, 0x0009)));
/// assert!(!filter.matches(&DeviceDescriptor::new(0x14be, 0x000a)));
/// ```
#[derive(Debug, Clone)]
pub enum DeviceFilter {
    /// Vendor ID equality
    Vendor(u16),

    /// Vendor ID and product ID equality
    Product { vendor_id: u16, product_id: u16 },

    /// Regular expression over the manufacturer or product string
    Name(Regex),
}

impl DeviceFilter {
    pub fn vendor(vendor_id: u16) -> Self {
        Self::Vendor(vendor_id)
    }

    pub fn product(vendor_id: u16, product_id: u16) -> Self {
        Self::Product { vendor_id, product_id }
    }

    /// Build a name filter from a regular expression
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pattern`] if the expression does not compile.
    pub fn name(pattern: &str) -> Result<Self> {
        Ok(Self::Name(Regex::new(pattern)?))
    }

    /// Check whether `device` satisfies this filter
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        match self {
            Self::Vendor(vendor_id) => device.vendor_id == *vendor_id,
            Self::Product { vendor_id, product_id } => {
                device.vendor_id == *vendor_id && device.product_id == *product_id
            }
            Self::Name(pattern) => device.names().any(|name| pattern.is_match(name)),
        }
    }

    /// Whether matching needs the device's string descriptors
    ///
    /// Reading strings requires opening each candidate, which enumeration
    /// skips unless a name filter asks for it.
    pub fn needs_strings(&self) -> bool {
        matches!(self, Self::Name(_))
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vendor(vendor_id) => write!(f, "{:04x}", vendor_id),
            Self::Product { vendor_id, product_id } => {
                write!(f, "{:04x}:{:04x}", vendor_id, product_id)
            }
            Self::Name(pattern) => write!(f, "name={}", pattern.as_str()),
        }
    }
}

impl FromStr for DeviceFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(pattern) = s.strip_prefix("name=") {
            if pattern.is_empty() {
                return Err(Error::Validation("empty name pattern".into()));
            }
            return Self::name(pattern);
        }

        match s.split_once(':') {
            Some((vendor, product)) => Ok(Self::product(parse_id(vendor)?, parse_id(product)?)),
            None => Ok(Self::vendor(parse_id(s)?)),
        }
    }
}

fn parse_id(s: &str) -> Result<u16> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    if digits.is_empty() || digits.len() > 4 {
        return Err(Error::Parse(format!("invalid USB ID: {:?}", s)));
    }

    u16::from_str_radix(digits, 16).map_err(|e| Error::Parse(format!("invalid USB ID {:?}: {}", s, e)))
}

//! Type definitions for usbcon

pub mod descriptor;
pub mod error;
pub mod filter;

pub use descriptor::{DeviceDescriptor, DeviceKey};
pub use error::{Error, Result};
pub use filter::DeviceFilter;

//! High-level error types

use std::fmt;

use usbcon_types::DeviceKey;

pub type Result<T> = std::result::Result<T, Error>;

/// Step of [`Session::open`](crate::Session::open) that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStep {
    /// Opening the device handle
    Open,
    /// Selecting the configuration
    Configure,
    /// Claiming the interface
    Claim,
    /// Binding the bulk endpoints
    Endpoints,
}

impl fmt::Display for OpenStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open device"),
            Self::Configure => f.write_str("select configuration"),
            Self::Claim => f.write_str("claim interface"),
            Self::Endpoints => f.write_str("bind endpoints"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] usbcon_core::Error),
    
    #[error("Transport error: {0}")]
    Transport(#[from] usbcon_transport::Error),
    
    #[error("Type error: {0}")]
    Types(#[from] usbcon_types::Error),
    
    #[error("Device at {0} is already bound to another session")]
    DeviceInUse(DeviceKey),
    
    #[error("Failed to {step}: {source}")]
    OpenFailed {
        step: OpenStep,
        #[source]
        source: usbcon_transport::Error,
    },
    
    #[error("Session not open")]
    NotOpen,
    
    #[error("Write failed: {0}")]
    WriteError(#[source] usbcon_transport::Error),
    
    #[error("Read failed: {0}")]
    ReadError(#[source] usbcon_transport::Error),
}

impl Error {
    /// Check if the session was closed as a side effect of this error
    pub fn closes_session(&self) -> bool {
        matches!(
            self,
            Self::OpenFailed { .. } | Self::WriteError(_) | Self::ReadError(_)
        )
    }
    
    /// Check if no device matched the filter
    pub fn is_no_device(&self) -> bool {
        matches!(self, Self::Core(usbcon_core::Error::NoDeviceFound { .. }))
    }
    
    /// Check if several devices matched the filter
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Core(usbcon_core::Error::AmbiguousDevice { .. }))
    }
}

//! Transport errors

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("USB context already torn down")]
    ContextReleased,
    
    #[error("Device {0} is no longer attached")]
    DeviceGone(String),
    
    #[error("Device disconnected")]
    Disconnected,
    
    #[error("Endpoint 0x{endpoint:02X} is not a bulk endpoint of interface {interface}")]
    NoSuchEndpoint {
        interface: u8,
        endpoint: u8,
    },
    
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite {
        written: usize,
        expected: usize,
    },
    
    #[error("Operation not supported by this handle: {0}")]
    Unsupported(&'static str),
    
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

impl Error {
    /// Check if the device handle is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ContextReleased
                | Self::DeviceGone(_)
                | Self::Disconnected
                | Self::Usb(rusb::Error::NoDevice)
                | Self::Usb(rusb::Error::Io)
        )
    }
}

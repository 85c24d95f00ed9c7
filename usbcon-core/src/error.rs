//! Error types for usbcon-core

/// Result type alias for usbcon-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No enumerated device satisfied the filter
    #[error("No device matching {filter} is connected")]
    NoDeviceFound {
        filter: String,
    },
    
    /// More than one enumerated device satisfied the filter
    #[error("{count} devices match {filter}; connect only the one to talk to")]
    AmbiguousDevice {
        filter: String,
        count: usize,
    },
    
    /// Prompt pattern failed to compile
    #[error("Invalid prompt pattern: {0}")]
    InvalidPrompt(#[from] regex::Error),
}


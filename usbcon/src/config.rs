//! Session configuration

use std::time::Duration;

use usbcon_core::constants::{
    CONFIGURATION, DEFAULT_INVOKE_DEADLINE, DEFAULT_READ_CHUNK, DEFAULT_READ_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT, INTERFACE,
};
use usbcon_core::{EndpointPair, Prompt};
use usbcon_types::{Error, Result};

/// Tunables of a [`Session`](crate::Session)
///
/// The defaults suit the console device family; every value can be
/// overridden with the `with_*` methods.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use usbcon::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_read_timeout(Duration::from_millis(500))
///     .with_read_chunk_size(64);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout of the command write
    pub write_timeout: Duration,

    /// Read quantum: a read that sees nothing for this long ends the response
    pub read_timeout: Duration,

    /// Bytes requested per read
    pub read_chunk_size: usize,

    /// Upper bound on one invocation (`None` waits for prompt or timeout only)
    pub invoke_deadline: Option<Duration>,

    /// Prompt used by [`Session::invoke`](crate::Session::invoke)
    pub prompt: Prompt,

    /// Configuration selected on open
    pub configuration: u8,

    /// Interface claimed on open
    pub interface: u8,

    /// Bulk endpoints used for the exchange
    pub endpoints: EndpointPair,

    /// Reset the device when closing
    pub reset_on_close: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            read_chunk_size: DEFAULT_READ_CHUNK,
            invoke_deadline: Some(DEFAULT_INVOKE_DEADLINE),
            prompt: Prompt::default(),
            configuration: CONFIGURATION,
            interface: INTERFACE,
            endpoints: EndpointPair::default(),
            reset_on_close: true,
        }
    }
}

impl SessionConfig {
    /// Set the command write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the read quantum
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the bytes requested per read (capped at the reader's packet size)
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Bound each invocation (`None` to wait for prompt or timeout only)
    pub fn with_invoke_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.invoke_deadline = deadline;
        self
    }

    /// Set the prompt used by [`Session::invoke`](crate::Session::invoke)
    pub fn with_prompt(mut self, prompt: Prompt) -> Self {
        self.prompt = prompt;
        self
    }

    /// Select the configuration and interface claimed on open
    pub fn with_interface(mut self, configuration: u8, interface: u8) -> Self {
        self.configuration = configuration;
        self.interface = interface;
        self
    }

    /// Set the bulk writer/reader endpoints
    pub fn with_endpoints(mut self, endpoints: EndpointPair) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Reset the device when closing
    pub fn with_reset_on_close(mut self, reset: bool) -> Self {
        self.reset_on_close = reset;
        self
    }

    /// Check the configuration for values the transport cannot honor
    ///
    /// A zero timeout means "wait forever" to libusb, so it is rejected.
    pub fn validate(&self) -> Result<()> {
        if self.write_timeout.is_zero() {
            return Err(Error::Validation("write timeout must be non-zero".into()));
        }

        if self.read_timeout.is_zero() {
            return Err(Error::Validation("read timeout must be non-zero".into()));
        }

        if self.read_chunk_size == 0 {
            return Err(Error::Validation("read chunk size must be non-zero".into()));
        }

        if self.invoke_deadline.is_some_and(|d| d.is_zero()) {
            return Err(Error::Validation("invoke deadline must be non-zero".into()));
        }

        if !self.endpoints.is_valid() {
            return Err(Error::Validation(format!(
                "endpoint directions are wrong ({})",
                self.endpoints
            )));
        }

        Ok(())
    }
}

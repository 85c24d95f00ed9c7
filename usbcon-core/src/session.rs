//! Session state for the console protocol
//!
//! A session is either closed or open. While open it owns a configured
//! device handle and the pair of bulk endpoints used for the exchange.

use std::fmt;

use crate::constants::{ENDPOINT_IN, ENDPOINT_OUT};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No device handle held
    #[default]
    Closed,

    /// Device opened, interface claimed, endpoints bound
    Open,
}

impl SessionState {
    /// Check if commands may be exchanged
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
        }
    }
}

/// Writer and reader bulk endpoint addresses
///
/// Bound to the open device handle; meaningless without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    /// Bulk OUT endpoint
    pub writer: u8,

    /// Bulk IN endpoint
    pub reader: u8,
}

impl EndpointPair {
    /// Direction bit of an endpoint address
    pub const DIR_IN: u8 = 0x80;

    pub const fn new(writer: u8, reader: u8) -> Self {
        Self { writer, reader }
    }

    /// Check that the writer is an OUT endpoint and the reader an IN endpoint
    pub fn is_valid(&self) -> bool {
        self.writer & Self::DIR_IN == 0 && self.reader & Self::DIR_IN != 0
    }
}

impl Default for EndpointPair {
    fn default() -> Self {
        Self::new(ENDPOINT_OUT, ENDPOINT_IN)
    }
}

impl fmt::Display for EndpointPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "out=0x{:02X} in=0x{:02X}", self.writer, self.reader)
    }
}

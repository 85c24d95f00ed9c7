//! Protocol constants

use std::time::Duration;

/// Line terminator appended to every command
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Prompt the console prints when it is ready for the next command
pub const DEFAULT_PROMPT: &str = ">";

/// Vendor ID of the console device family
pub const DEFAULT_VENDOR_ID: u16 = 0x14BE;

/// Configuration selected on open
pub const CONFIGURATION: u8 = 1;

/// Interface claimed on open
pub const INTERFACE: u8 = 0;

/// Bulk OUT endpoint (host to device)
pub const ENDPOINT_OUT: u8 = 0x02;

/// Bulk IN endpoint (device to host)
pub const ENDPOINT_IN: u8 = 0x81;

/// Default write timeout
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default read quantum: a read that sees no data for this long ends the response
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Default number of bytes requested per read
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Default upper bound on a single invocation
pub const DEFAULT_INVOKE_DEADLINE: Duration = Duration::from_secs(30);

/// Byte substituted for characters outside the single-byte range
pub const REPLACEMENT_BYTE: u8 = b'?';

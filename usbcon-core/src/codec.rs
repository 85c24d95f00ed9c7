//! Command framing and response decoding
//!
//! The console speaks plain single-byte text:
//! - Commands are sent as-is followed by CR-LF, with no length prefix or checksum
//! - Responses are decoded byte-for-byte (each byte maps to the Unicode scalar
//!   with the same value, so decoding never fails and never loses data)

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::constants::{LINE_TERMINATOR, REPLACEMENT_BYTE};

/// Frame a command for transmission
///
/// Characters outside the single-byte range are replaced by `?`.
///
/// # Examples
///
/// ```
/// use usbcon_core::codec;
///
/// assert_eq!(&codec::encode_command("VER -V")[..], b"VER -V\r\n");
/// assert_eq!(&codec::encode_command("")[..], b"\r\n");
/// ```
pub fn encode_command(command: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(command.len() + LINE_TERMINATOR.len());

    for c in command.chars() {
        buf.put_u8(u8::try_from(c).unwrap_or(REPLACEMENT_BYTE));
    }
    buf.put_slice(LINE_TERMINATOR);

    trace!("Framed command: {}", hex::encode(&buf));

    buf.freeze()
}

/// Decode response bytes as single-byte text
///
/// # Examples
///
/// ```
/// use usbcon_core::codec;
///
/// assert_eq!(codec::decode(b"OK\r\n>"), "OK\r\n>");
/// ```
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

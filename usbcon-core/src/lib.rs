//! # usbcon-core
//!
//! Core protocol implementation for USB bulk console devices.
//!
//! This crate provides the I/O-free protocol primitives:
//! - Command framing and single-byte text decoding
//! - Prompt matching
//! - Response accumulation
//! - Device selection among enumerated candidates
//! - Session state and endpoint addressing

pub mod codec;
pub mod constants;
pub mod error;
pub mod prompt;
pub mod response;
pub mod selector;
pub mod session;

pub use error::{Error, Result};
pub use prompt::Prompt;
pub use response::ResponseBuffer;
pub use selector::select;
pub use session::{EndpointPair, SessionState};

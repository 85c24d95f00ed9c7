//! # usbcon
//!
//! Interactive command sessions with USB bulk-transfer console devices.
//!
//! ## Features
//!
//! - Refuses to guess when several matching devices are attached
//! - Open/close state machine that always leaves the device releasable
//! - Prompt-pattern or timeout based end-of-response detection
//! - Blocking API, one exchange at a time
//!
//! ## Quick Start
//!
//! ```no_run
//! use usbcon::Session;
//!
//! fn main() -> usbcon::Result<()> {
//!     // Bind to the only attached console
//!     let mut session = Session::new()?;
//!     session.open()?;
//!     
//!     let version = session.invoke("VER -V")?;
//!     println!("{}", version);
//!     
//!     session.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
mod lease;
pub mod session;

// Re-exports
pub use config::SessionConfig;
pub use error::{Error, OpenStep, Result};
pub use lease::is_bound as is_device_bound;
pub use session::Session;

// Re-export types
pub use usbcon_core::{EndpointPair, Prompt, SessionState};
pub use usbcon_transport::{Capabilities, DeviceHandle, LibUsbTransport, ReadOutcome, Transport};
pub use usbcon_types::{DeviceDescriptor, DeviceFilter, DeviceKey};

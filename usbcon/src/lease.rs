//! Registry of devices bound to live sessions
//!
//! Only device keys are recorded here; each session still owns its handle.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use tracing::trace;
use usbcon_types::DeviceKey;

use crate::error::{Error, Result};

static BOUND: Mutex<BTreeSet<DeviceKey>> = parking_lot::const_mutex(BTreeSet::new());

/// Exclusive claim on a physical device, released on drop
#[derive(Debug)]
pub(crate) struct DeviceLease {
    key: DeviceKey,
}

impl DeviceLease {
    /// Bind `key` to the caller
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceInUse`] if another live session holds it.
    pub(crate) fn acquire(key: DeviceKey) -> Result<Self> {
        if !BOUND.lock().insert(key) {
            return Err(Error::DeviceInUse(key));
        }

        trace!("Leased device at {}", key);
        Ok(Self { key })
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        BOUND.lock().remove(&self.key);
        trace!("Released device at {}", self.key);
    }
}

/// Check whether a live session is bound to `key`
pub fn is_bound(key: DeviceKey) -> bool {
    BOUND.lock().contains(&key)
}

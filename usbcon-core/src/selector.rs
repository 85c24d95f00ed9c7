//! Device selection
//!
//! A session binds to exactly one device. When the filter matches several
//! attached devices the selector refuses to guess.

use tracing::debug;
use usbcon_types::{DeviceDescriptor, DeviceFilter};

use crate::error::{Error, Result};

/// Pick the single candidate matching `filter`
///
/// # Errors
///
/// - [`Error::NoDeviceFound`] if no candidate matches
/// - [`Error::AmbiguousDevice`] if more than one candidate matches
///
/// # Examples
///
/// ```
/// use usbcon_core::select;
/// use usbcon_types::{DeviceDescriptor, DeviceFilter};
///
/// let devices = vec![
///     DeviceDescriptor::new(0x14be, 0x0009).at(1, 4),
///     DeviceDescriptor::new(0x046d, 0xc52b).at(1, 5),
/// ];
///
/// let chosen = select(devices, &DeviceFilter::vendor(0x14be)).unwrap();
/// assert_eq!(chosen.product_id, 0x0009);
/// ```
pub fn select<I>(candidates: I, filter: &DeviceFilter) -> Result<DeviceDescriptor>
where
    I: IntoIterator<Item = DeviceDescriptor>,
{
    let mut matching: Vec<DeviceDescriptor> = candidates
        .into_iter()
        .filter(|device| {
            let hit = filter.matches(device);
            debug!("Candidate {} {}", device, if hit { "matches" } else { "skipped" });
            hit
        })
        .collect();

    match matching.len() {
        0 => Err(Error::NoDeviceFound {
            filter: filter.to_string(),
        }),
        1 => Ok(matching.remove(0)),
        count => Err(Error::AmbiguousDevice {
            filter: filter.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn candidates() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::new(0x14be, 0x0009).at(1, 4).with_product("CP3"),
            DeviceDescriptor::new(0x14be, 0x0011).at(1, 6).with_product("DMPS"),
            DeviceDescriptor::new(0x046d, 0xc52b).at(2, 3).with_product("Receiver"),
        ]
    }

    #[test]
    fn test_select_unique_product() {
        let chosen = select(candidates(), &DeviceFilter::product(0x14be, 0x0011)).unwrap();
        assert_eq!(chosen.product.as_deref(), Some("DMPS"));
    }

    #[test]
    fn test_select_by_name() {
        let chosen = select(candidates(), &DeviceFilter::name("^CP").unwrap()).unwrap();
        assert_eq!(chosen.key(), usbcon_types::DeviceKey::new(1, 4));
    }

    #[test]
    fn test_select_none() {
        let result = select(candidates(), &DeviceFilter::vendor(0xdead));
        match result {
            Err(Error::NoDeviceFound { filter }) => assert_eq!(filter, "dead"),
            other => panic!("Expected NoDeviceFound, got {:?}", other),
        }
    }

    #[test]
    fn test_select_empty_list() {
        let result = select(Vec::new(), &DeviceFilter::vendor(0x14be));
        assert!(matches!(result, Err(Error::NoDeviceFound { .. })));
    }

    #[test]
    fn test_select_ambiguous() {
        let result = select(candidates(), &DeviceFilter::vendor(0x14be));
        match result {
            Err(Error::AmbiguousDevice { count, .. }) => assert_eq!(count, 2),
            other => panic!("Expected AmbiguousDevice, got {:?}", other),
        }
    }
}

//! USB discovery of connected sensors.

use crate::Result;

/// Cypress FX3 vendor id used by the sensor.
pub const VID: u16 = 0x04B4;
pub const PID: u16 = 0x00F9;

/// Name assumed when the product string cannot be read.
pub const DEFAULT_NAME: &str = "MYNTEYE";

/// A sensor found on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub name: String,
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

pub(crate) fn is_mynteye(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == VID && product_id == PID
}

/// List every connected sensor.
///
/// Devices whose product string cannot be read (usually a permissions issue)
/// are still listed under [`DEFAULT_NAME`].
pub fn list_devices() -> Result<Vec<UsbDeviceInfo>> {
    let mut found = Vec::new();
    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                log::debug!(
                    "Skipping USB device {}:{}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                continue;
            }
        };
        if !is_mynteye(desc.vendor_id(), desc.product_id()) {
            continue;
        }

        let name = match device.open() {
            Ok(handle) => handle
                .read_product_string_ascii(&desc)
                .map(|s| s.trim().to_string())
                .ok()
                .filter(|s| !s.is_empty()),
            Err(e) => {
                log::warn!(
                    "Cannot open sensor at {}:{} ({}), try sudo or a udev rule",
                    device.bus_number(),
                    device.address(),
                    e
                );
                None
            }
        }
        .unwrap_or_else(|| DEFAULT_NAME.to_string());

        found.push(UsbDeviceInfo {
            name,
            bus_number: device.bus_number(),
            address: device.address(),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
        });
    }
    log::debug!("Found {} sensor(s)", found.len());
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_mynteye() {
        assert!(is_mynteye(0x04B4, 0x00F9));
        assert!(!is_mynteye(0x04B4, 0x00F8));
        assert!(!is_mynteye(0x040E, 0xF408));
    }
}

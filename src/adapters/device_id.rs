//! Device identity derived from the ESP32 factory MAC address.
//!
//! Produces a stable thing name of the form `ota-XXYYZZ` (last 3 bytes of
//! the 6-byte MAC in uppercase hex). It is used when the stored
//! configuration leaves `thing_name` empty, and is therefore the device
//! level of every control-plane topic.

use core::fmt::Write;

use crate::config::ThingName;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Derive the thing name from the last 3 MAC bytes (e.g. `ota-EFCAFE`).
pub fn thing_name(mac: &MacAddress) -> ThingName {
    let mut name = ThingName::new();
    let _ = write!(name, "ota-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    name
}

/// The configured thing name, or the MAC-derived one when it is empty.
pub fn resolve_thing_name(configured: &ThingName) -> ThingName {
    if configured.is_empty() {
        thing_name(&read_mac())
    } else {
        configured.clone()
    }
}
